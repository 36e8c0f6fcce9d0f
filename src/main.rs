use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use hwc_unload::{Device, EmitOptions, InputShape, Layer, Pooling, ProcessorMap};
use std::path::{Path, PathBuf};

fn parse_u64(value: &str) -> eyre::Result<u64> {
    let value = value.trim().replace('_', "");
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.wrap_err_with(|| eyre::eyre!("invalid integer {:?}", value))
}

fn parse_u32(value: &str) -> eyre::Result<u32> {
    let parsed = parse_u64(value)?;
    u32::try_from(parsed).wrap_err_with(|| eyre::eyre!("{:#x} does not fit into 32 bits", parsed))
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Generate C code that unloads an accelerator layer output into a channel-major buffer",
    long_about = None
)]
struct Options {
    /// Layer description (YAML, or JSON with a .json extension)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Target device (ai84, ai85)
    #[arg(short, long)]
    device: Option<Device>,

    /// Active processors, e.g. 0xffff
    #[arg(short = 'm', long, value_parser = parse_u64)]
    processor_map: Option<u64>,

    /// Output shape as C,H,W
    #[arg(short, long)]
    shape: Option<InputShape>,

    #[arg(long, value_parser = parse_u32)]
    apb_base: Option<u32>,

    /// Byte offset of the layer output in data memory
    #[arg(long, value_parser = parse_u32)]
    out_offset: Option<u32>,

    #[arg(long, value_parser = parse_u32)]
    out_expand: Option<u32>,

    #[arg(long, value_parser = parse_u32)]
    out_expand_thresh: Option<u32>,

    /// Pooling kernel size of the layer
    #[arg(long, value_parser = parse_u32)]
    pool: Option<u32>,

    #[arg(long, value_parser = parse_u32, requires = "pool")]
    pool_stride: Option<u32>,

    /// Force the legacy addressing quirks
    #[arg(long, overrides_with = "no_legacy")]
    legacy: bool,

    /// Disable the legacy addressing quirks
    #[arg(long, overrides_with = "legacy")]
    no_legacy: bool,

    /// Name of the generated function
    #[arg(long, default_value = hwc_unload::emit::DEFAULT_FUNCTION_NAME)]
    function: String,

    /// Always emit full address and offset statements
    #[arg(long)]
    no_coalesce: bool,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Turn debugging information on
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn load_layer(path: &Path) -> eyre::Result<Layer> {
    let content = utils::fs::read_to_string(path)?;
    let layer = match path.extension().and_then(std::ffi::OsStr::to_str) {
        Some("json") => Layer::from_json(&content).map_err(eyre::Report::from),
        _ => Layer::from_yaml(&content).map_err(eyre::Report::from),
    };
    layer.wrap_err_with(|| eyre::eyre!("failed to parse layer description {}", path.display()))
}

fn resolve_layer(options: &Options) -> eyre::Result<Layer> {
    let mut layer = if let Some(ref path) = options.config {
        load_layer(path)?
    } else {
        let missing =
            |flag: &str| eyre::eyre!("missing {flag} (or a layer description via --config)");
        Layer::new(
            options.device.ok_or_else(|| missing("--device"))?,
            ProcessorMap::from(options.processor_map.ok_or_else(|| missing("--processor-map"))?),
            options.shape.ok_or_else(|| missing("--shape"))?,
        )
    };

    if let Some(device) = options.device {
        layer.device = device;
    }
    if let Some(processor_map) = options.processor_map {
        layer.processor_map = ProcessorMap::from(processor_map);
    }
    if let Some(shape) = options.shape {
        layer.shape = shape;
    }
    if let Some(apb_base) = options.apb_base {
        layer.apb_base = Some(apb_base);
    }
    if let Some(out_offset) = options.out_offset {
        layer.out_offset = out_offset;
    }
    if let Some(out_expand) = options.out_expand {
        layer.out_expand = out_expand;
    }
    if let Some(out_expand_thresh) = options.out_expand_thresh {
        layer.out_expand_thresh = out_expand_thresh;
    }
    if let Some(size) = options.pool {
        layer.pool = Some(Pooling::new(size, options.pool_stride.unwrap_or(1)));
    }
    if options.legacy {
        layer.legacy = Some(true);
    } else if options.no_legacy {
        layer.legacy = Some(false);
    }
    Ok(layer)
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let options = Options::parse();

    let level = match options.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let layer = resolve_layer(&options)?;
    log::debug!("{:#?}", layer);

    let emit_options = EmitOptions {
        coalesce: !options.no_coalesce,
        function_name: options.function.clone(),
    };
    let stats = match options.output {
        Some(ref path) => {
            let mut writer = utils::fs::open_writable(path)?;
            hwc_unload::generate_layer(&mut writer, &layer, &emit_options)?
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = stdout.lock();
            hwc_unload::generate_layer(&mut writer, &layer, &emit_options)?
        }
    };
    log::info!(
        "{} words, {} statements ({} address sets, {} offset sets, {} byte writes)",
        stats.words,
        stats.num_statements(),
        stats.address_sets,
        stats.offset_sets,
        stats.byte_writes
    );
    log::trace!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
