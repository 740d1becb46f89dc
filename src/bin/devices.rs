//! List audio devices and the stream parameters the client would use
//!
//! Usage: devices [--json] [CONFIG_PATH]

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use realtime_voice::audio::list_devices;
use realtime_voice::config::ClientConfig;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut json = false;
    let mut config_path: Option<PathBuf> = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json" => json = true,
            path => config_path = Some(PathBuf::from(path)),
        }
    }

    let config = ClientConfig::load(config_path.as_deref()).context("failed to load config")?;
    let devices = list_devices();

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    println!("Input devices:");
    for device in devices.iter().filter(|d| d.is_input) {
        let marker = if device.is_default { " (default)" } else { "" };
        println!(
            "  {}{}  rates={:?} channels={:?}",
            device.name, marker, device.sample_rates, device.channels
        );
    }

    println!("Output devices:");
    for device in devices.iter().filter(|d| d.is_output) {
        let marker = if device.is_default { " (default)" } else { "" };
        println!(
            "  {}{}  rates={:?} channels={:?}",
            device.name, marker, device.sample_rates, device.channels
        );
    }

    let stream = config.stream;
    println!();
    println!(
        "Stream: {} Hz, {} channel(s), {} ms frames",
        stream.sample_rate, stream.channels, stream.frame_duration_ms
    );
    println!(
        "Frame: {} samples per channel, {} interleaved",
        stream.frame_sample_count(),
        stream.samples_per_frame()
    );
    println!(
        "Buffers: playback {} frames ({} ms), outbound {} frames",
        config.playback_capacity,
        config.playback_capacity as u64 * stream.frame_duration_ms as u64,
        config.outbound_capacity
    );
    println!(
        "Input: {}  Output: {}",
        config.input_device.as_deref().unwrap_or("default"),
        config.output_device.as_deref().unwrap_or("default")
    );

    Ok(())
}
