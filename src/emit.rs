//! C code emitter for planned unloads.
//!
//! The generated function keeps two cursors: `addr` walks accelerator memory
//! and `offs` walks the output buffer. A statement that only moves a cursor
//! to where it already points next is replaced by the cursor's implicit
//! advance (`*addr++` and `offs++`).

use crate::{
    address,
    config::InputShape,
    plan::{Plan, WordAccess},
};
use serde::Serialize;
use std::io::Write;

pub const DEFAULT_FUNCTION_NAME: &str = "unload";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmitOptions {
    /// Replace redundant cursor updates by increments.
    pub coalesce: bool,
    /// Name of the generated C function.
    pub function_name: String,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            coalesce: true,
            function_name: DEFAULT_FUNCTION_NAME.to_string(),
        }
    }
}

/// Where the cursors of the generated code point after the last statement.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmissionState {
    next_read: Option<address>,
    next_write: Option<usize>,
}

impl EmissionState {
    /// Record a read of `source`.
    ///
    /// Returns `true` if `addr` already pointed at `source`.
    pub fn read(&mut self, source: address) -> bool {
        let sequential = self.next_read == Some(source);
        self.next_read = source.checked_add(4);
        sequential
    }

    /// Record moving `offs` to `destination`.
    ///
    /// Returns `true` if `destination` directly follows the previous offset.
    pub fn write(&mut self, destination: usize) -> bool {
        let sequential = self.next_write == Some(destination);
        self.next_write = destination.checked_add(1);
        sequential
    }
}

/// Statement counts of one generated function.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EmitStats {
    pub words: usize,
    pub address_sets: usize,
    pub sequential_reads: usize,
    pub offset_sets: usize,
    pub offset_increments: usize,
    pub byte_writes: usize,
}

impl EmitStats {
    /// Number of body statements.
    #[must_use]
    pub fn num_statements(&self) -> usize {
        // every word is read exactly once
        self.address_sets
            + self.words
            + self.offset_sets
            + self.offset_increments
            + self.byte_writes
    }
}

#[derive(Debug)]
pub struct Emitter<W> {
    out: W,
    options: EmitOptions,
    state: EmissionState,
    stats: EmitStats,
}

impl<W> Emitter<W>
where
    W: Write,
{
    pub fn new(out: W, options: EmitOptions) -> Self {
        Self {
            out,
            options,
            state: EmissionState::default(),
            stats: EmitStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> EmitStats {
        self.stats
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn prologue(&mut self, shape: &InputShape) -> std::io::Result<()> {
        writeln!(self.out, "// Custom unload for this network:")?;
        writeln!(self.out, "// Input shape: {shape}")?;
        writeln!(self.out, "void {}(uint8_t *out_buf)", self.options.function_name)?;
        writeln!(self.out, "{{")?;
        writeln!(self.out, "  uint32_t val, *addr, offs;")?;
        writeln!(self.out)?;
        Ok(())
    }

    pub fn epilogue(&mut self) -> std::io::Result<()> {
        writeln!(self.out, "}}")?;
        writeln!(self.out)?;
        self.out.flush()
    }

    pub fn word(&mut self, word: &WordAccess) -> std::io::Result<()> {
        let coalesce = self.options.coalesce;
        self.stats.words += 1;

        if self.state.read(word.source) && coalesce {
            self.stats.sequential_reads += 1;
        } else {
            writeln!(self.out, "  addr = (uint32_t *) 0x{:08x};", word.source)?;
            self.stats.address_sets += 1;
        }
        writeln!(self.out, "  val = *addr++;")?;

        if self.state.write(word.destination) && coalesce {
            writeln!(self.out, "  offs++;")?;
            self.stats.offset_increments += 1;
        } else {
            writeln!(self.out, "  offs = 0x{:04x};", word.destination)?;
            self.stats.offset_sets += 1;
        }

        for lane in &word.lanes {
            write!(self.out, "  out_buf[offs")?;
            if lane.step > 0 {
                write!(self.out, "+0x{:02x}", lane.step)?;
            }
            write!(self.out, "] = ")?;
            if lane.lane == 0 {
                write!(self.out, "val")?;
            } else {
                write!(self.out, "(val >> {})", lane.lane * 8)?;
            }
            writeln!(self.out, " & 0xff;")?;
            self.stats.byte_writes += 1;
        }
        Ok(())
    }

    /// Emit the complete unload function for `plan`.
    pub fn emit(&mut self, plan: &Plan) -> std::io::Result<()> {
        self.prologue(&plan.shape)?;
        for word in &plan.words {
            log::trace!(
                "word {:#010x} -> {:#06x} ({} lanes)",
                word.source,
                word.destination,
                word.lanes.len()
            );
            self.word(word)?;
        }
        self.epilogue()
    }
}
