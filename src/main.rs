use anyhow::Result;
use std::time::Instant;

use rust_kinfu::config::KinfuConfig;
use rust_kinfu::device::{DepthSource, RawFileDevice, SyntheticDevice};
use rust_kinfu::imaging::image::Image;
use rust_kinfu::pipeline::Pipeline;

/// Benchmark harness: drives the fusion pipeline over a depth source and
/// prints one TSV telemetry row per frame.
///
/// Usage: `kinfu-bench [synthetic | <depth.raw>] [config.json]`
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let source_arg = std::env::args().nth(1).unwrap_or_else(|| "synthetic".to_string());
    let config = match std::env::args().nth(2) {
        Some(path) => KinfuConfig::from_json_file(path)?,
        None => KinfuConfig::default(),
    };

    let mut device: Box<dyn DepthSource> = if source_arg == "synthetic" {
        Box::new(SyntheticDevice::new(
            config.input_width,
            config.input_height,
            config.camera,
            1.0,
            100,
        ))
    } else {
        Box::new(RawFileDevice::open(
            &source_arg,
            config.input_width,
            config.input_height,
            config.camera,
        )?)
    };

    eprintln!(
        "depth source: {} ({}x{})",
        source_arg,
        device.width(),
        device.height()
    );

    let initial_position = config.initial_position();
    let mut pipeline = Pipeline::new(config.clone())?;
    let mut depth = Image::filled(config.input_width, config.input_height, 0.0f32);

    device.start()?;

    println!(
        "frame\tacquisition\tpreprocessing\ttracking\tintegration\traycasting\ttotal\tX\tY\tZ\ttracked\tintegrated"
    );

    let mut acquire_start = Instant::now();
    while device.poll_depth(&mut depth)? {
        let acquisition_s = acquire_start.elapsed().as_secs_f64();

        let mut stats = pipeline.process_frame(&depth)?;
        stats.acquisition_s = acquisition_s;

        let position = stats.position - initial_position;
        println!(
            "{}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{}\t{}",
            stats.frame,
            stats.acquisition_s,
            stats.preprocessing_s,
            stats.tracking_s,
            stats.integration_s,
            stats.raycasting_s,
            stats.acquisition_s + stats.total_s,
            position.x,
            position.y,
            position.z,
            stats.tracked as u8,
            stats.integrated as u8,
        );

        acquire_start = Instant::now();
    }

    device.stop();
    eprintln!("done: processed {} frames", pipeline.frames());

    Ok(())
}
