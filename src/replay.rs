//! Executes generated unload code against a synthetic accelerator memory.
//!
//! Only the statement forms produced by [`crate::emit::Emitter`] are understood.

use crate::address;
use bitvec::vec::BitVec;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("line {line}: unrecognized statement {statement:?}")]
    UnknownStatement { line: usize, statement: String },
    #[error("line {line}: bad number {value:?}")]
    BadNumber { line: usize, value: String },
    #[error("line {line}: read from unmapped address {addr:#010x}")]
    UnmappedRead { line: usize, addr: address },
    #[error("line {line}: `{what}` used before it was set")]
    Uninitialized { line: usize, what: &'static str },
    #[error("line {line}: write to offset {offset:#x} outside of the {len} byte buffer")]
    OutOfBounds {
        line: usize,
        offset: usize,
        len: usize,
    },
}

static SET_ADDRESS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^addr = \(uint32_t \*\) 0x(?P<addr>[0-9a-fA-F]+);$").unwrap());

static SET_OFFSET_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^offs = 0x(?P<offs>[0-9a-fA-F]+);$").unwrap());

static WRITE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^out_buf\[offs(\+0x(?P<step>[0-9a-fA-F]+))?\] = (val|\(val >> (?P<shift>\d+)\)) & 0xff;$",
    )
    .unwrap()
});

static FUNCTION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^void \w+\(uint8_t \*out_buf\)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Statement {
    /// `addr = (uint32_t *) 0x...;`
    SetAddress(address),
    /// `val = *addr++;`
    Read,
    /// `offs = 0x...;`
    SetOffset(usize),
    /// `offs++;`
    IncrementOffset,
    /// `out_buf[offs+step] = (val >> shift) & 0xff;`
    Write { step: usize, shift: u32 },
}

fn parse_hex<T>(value: &str, line: usize) -> Result<T, Error>
where
    T: TryFrom<u64>,
{
    u64::from_str_radix(value, 16)
        .ok()
        .and_then(|value| T::try_from(value).ok())
        .ok_or_else(|| Error::BadNumber {
            line,
            value: value.to_string(),
        })
}

impl Statement {
    /// Parse one line of generated code.
    ///
    /// Returns `None` for lines without an effect (comments, declarations, braces).
    pub fn parse(line: &str, line_num: usize) -> Result<Option<Self>, Error> {
        let line = line.trim();
        if line.is_empty()
            || line.starts_with("//")
            || line == "{"
            || line == "}"
            || line == "uint32_t val, *addr, offs;"
            || FUNCTION_REGEX.is_match(line)
        {
            return Ok(None);
        }
        if line == "val = *addr++;" {
            return Ok(Some(Self::Read));
        }
        if line == "offs++;" {
            return Ok(Some(Self::IncrementOffset));
        }
        if let Some(captures) = SET_ADDRESS_REGEX.captures(line) {
            let addr = parse_hex(&captures["addr"], line_num)?;
            return Ok(Some(Self::SetAddress(addr)));
        }
        if let Some(captures) = SET_OFFSET_REGEX.captures(line) {
            let offs = parse_hex(&captures["offs"], line_num)?;
            return Ok(Some(Self::SetOffset(offs)));
        }
        if let Some(captures) = WRITE_REGEX.captures(line) {
            let step = captures
                .name("step")
                .map(|step| parse_hex(step.as_str(), line_num))
                .transpose()?
                .unwrap_or(0);
            let shift = captures
                .name("shift")
                .map(|shift| {
                    shift.as_str().parse().map_err(|_| Error::BadNumber {
                        line: line_num,
                        value: shift.as_str().to_string(),
                    })
                })
                .transpose()?
                .unwrap_or(0);
            return Ok(Some(Self::Write { step, shift }));
        }
        Err(Error::UnknownStatement {
            line: line_num,
            statement: line.to_string(),
        })
    }
}

/// Parse all statements of a generated function, with their 1-based line numbers.
pub fn parse(code: &str) -> Result<Vec<(usize, Statement)>, Error> {
    code.lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            Statement::parse(line, idx + 1)
                .transpose()
                .map(|stmt| stmt.map(|stmt| (idx + 1, stmt)))
        })
        .collect()
}

/// Sparse word-addressed accelerator memory.
#[derive(Debug, Default, Clone)]
pub struct Memory {
    words: HashMap<address, u32>,
    pattern: Option<fn(address) -> u32>,
}

impl Memory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory where every word not explicitly set holds `pattern(addr)`.
    #[must_use]
    pub fn from_fn(pattern: fn(address) -> u32) -> Self {
        Self {
            words: HashMap::new(),
            pattern: Some(pattern),
        }
    }

    pub fn insert(&mut self, addr: address, value: u32) -> Option<u32> {
        self.words.insert(addr, value)
    }

    #[must_use]
    pub fn read(&self, addr: address) -> Option<u32> {
        self.words
            .get(&addr)
            .copied()
            .or_else(|| self.pattern.map(|pattern| pattern(addr)))
    }
}

impl FromIterator<(address, u32)> for Memory {
    fn from_iter<I: IntoIterator<Item = (address, u32)>>(iter: I) -> Self {
        Self {
            words: iter.into_iter().collect(),
            pattern: None,
        }
    }
}

/// Output buffer after replaying an unload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub buffer: Vec<u8>,
    /// Bytes of `buffer` that were written at least once.
    pub written: BitVec,
    pub num_writes: usize,
}

impl Output {
    /// Every byte of the buffer was written exactly once.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.written.all() && self.num_writes == self.buffer.len()
    }
}

/// Run generated `code` against `memory` with an output buffer of `len` bytes.
pub fn run(code: &str, memory: &Memory, len: usize) -> Result<Output, Error> {
    let mut buffer = vec![0u8; len];
    let mut written = BitVec::repeat(false, len);
    let mut num_writes = 0;

    let mut addr: Option<address> = None;
    let mut val: Option<u32> = None;
    let mut offs: Option<usize> = None;

    for (line, stmt) in parse(code)? {
        match stmt {
            Statement::SetAddress(value) => addr = Some(value),
            Statement::Read => {
                let current = addr.ok_or(Error::Uninitialized { line, what: "addr" })?;
                let word = memory
                    .read(current)
                    .ok_or(Error::UnmappedRead { line, addr: current })?;
                val = Some(word);
                addr = current.checked_add(4);
            }
            Statement::SetOffset(value) => offs = Some(value),
            Statement::IncrementOffset => {
                let current = offs.ok_or(Error::Uninitialized { line, what: "offs" })?;
                offs = Some(current + 1);
            }
            Statement::Write { step, shift } => {
                let base = offs.ok_or(Error::Uninitialized { line, what: "offs" })?;
                let word = val.ok_or(Error::Uninitialized { line, what: "val" })?;
                let offset = base + step;
                if offset >= len {
                    return Err(Error::OutOfBounds { line, offset, len });
                }
                buffer[offset] = (word.checked_shr(shift).unwrap_or(0) & 0xff) as u8;
                written.set(offset, true);
                num_writes += 1;
            }
        }
    }
    Ok(Output {
        buffer,
        written,
        num_writes,
    })
}
