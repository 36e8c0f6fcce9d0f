#![allow(
    non_camel_case_types,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation
)]

pub mod addressing;
pub mod bits;
pub mod config;
pub mod device;
pub mod emit;
pub mod error;
pub mod plan;
pub mod processor_map;
pub mod replay;

#[cfg(test)]
pub mod testing;

pub use config::{InputShape, Layer, Pooling, UnloadConfig};
pub use device::{Device, DeviceProfile};
pub use emit::{EmitOptions, EmitStats};
pub use error::Error;
pub use plan::Plan;
pub use processor_map::ProcessorMap;

/// Address on the target's 32-bit bus.
pub type address = u32;

/// Write a C function that unloads one layer output into a channel-major buffer.
///
/// The function reads the accelerator's interleaved data memory through
/// hard-coded absolute addresses, so the generated code is only valid for
/// the given configuration.
pub fn generate(
    out: impl std::io::Write,
    device: Device,
    processor_map: ProcessorMap,
    shape: InputShape,
    config: &UnloadConfig,
) -> Result<EmitStats, Error> {
    generate_with(
        out,
        device.profile(),
        processor_map,
        shape,
        config,
        &EmitOptions::default(),
    )
}

/// Like [`generate`], with an explicit device profile and emit options.
///
/// Nothing is written to `out` if the configuration is invalid.
pub fn generate_with(
    out: impl std::io::Write,
    profile: &DeviceProfile,
    processor_map: ProcessorMap,
    shape: InputShape,
    config: &UnloadConfig,
    options: &EmitOptions,
) -> Result<EmitStats, Error> {
    let plan = Plan::new(profile, processor_map, shape, config)?;
    let mut emitter = emit::Emitter::new(out, options.clone());
    emitter.emit(&plan)?;
    let stats = emitter.stats();
    log::debug!(
        "generated {}() for {} on {}: {} statements ({} coalesced reads, {} offset increments)",
        options.function_name,
        shape,
        profile.device,
        stats.num_statements(),
        stats.sequential_reads,
        stats.offset_increments,
    );
    Ok(stats)
}

/// Generate the unload function described by `layer`.
pub fn generate_layer(
    out: impl std::io::Write,
    layer: &Layer,
    options: &EmitOptions,
) -> Result<EmitStats, Error> {
    generate_with(
        out,
        layer.profile(),
        layer.processor_map,
        layer.shape,
        &layer.unload_config(),
        options,
    )
}
