/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Drives a wall of simulated camera tiles through the pipeline: every camera
//! streams JPEG frames at a fixed rate, tiles scroll in and out of view, and a
//! fraction of the frames arrive corrupted.

use anyhow::{anyhow, Context};
use camera_tiles::diagnostics::{DiagnosticsBus, MetricValue};
use camera_tiles::{
    CameraPipeline, HostCommand, InboundMessage, PipelineConfig, PrinterId, RenderFrame,
};
use clap::Parser;
use flume::Sender;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use rand::Rng;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::thread;
use std::time::{Duration, Instant};
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};

/// Camera tile simulation
#[derive(Parser, Debug, Clone)]
#[clap(name = "tile_sim")]
struct Opt {
    /// Number of camera tiles.
    #[clap(long, default_value = "12")]
    cameras: u32,

    /// Frames per second each camera produces.
    #[clap(long, default_value = "15")]
    fps: u32,

    /// How long to run, in seconds.
    #[clap(long, default_value = "10")]
    seconds: u64,

    /// Frame size in WIDTHxHEIGHT format.
    #[clap(long, default_value = "640x360")]
    resolution: String,

    /// Fraction of frames replaced by garbage bytes.
    #[clap(long, default_value = "0.05")]
    corrupt_ratio: f64,

    /// Fraction of tiles visible at any moment.
    #[clap(long, default_value = "0.5")]
    visible_ratio: f64,

    /// YAML pipeline config. Falls back to CAMERA_PIPELINE_* variables.
    #[clap(long)]
    config: Option<String>,
}

fn parse_resolution(s: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| anyhow!("resolution must look like 640x360, got {s:?}"))?;
    Ok((w.trim().parse()?, h.trim().parse()?))
}

/// One pre-encoded JPEG per camera, each a different colour.
fn encode_frames(cameras: u32, width: u32, height: u32) -> anyhow::Result<Vec<Vec<u8>>> {
    (0..cameras)
        .map(|i| {
            let shade = (i * 255 / cameras.max(1)) as u8;
            let img = RgbImage::from_pixel(width, height, Rgb([shade, 255 - shade, 128]));
            let mut out = Cursor::new(Vec::new());
            DynamicImage::ImageRgb8(img)
                .write_to(&mut out, ImageFormat::Jpeg)
                .context("encoding simulated frame")?;
            Ok(out.into_inner())
        })
        .collect()
}

/// The frame and visibility sources: runs for the configured duration, then
/// drops its command sender, which stops the pipeline loop.
fn produce(opt: Opt, frames: Vec<Vec<u8>>, commands: Sender<HostCommand>) {
    let mut rng = rand::thread_rng();
    let ids: Vec<PrinterId> = (1..=opt.cameras).collect();
    let frame_interval = Duration::from_secs_f64(1.0 / opt.fps.max(1) as f64);
    let deadline = Instant::now() + Duration::from_secs(opt.seconds);
    let mut next_scroll = Instant::now();

    for &id in &ids {
        if commands.send(HostCommand::Register(id)).is_err() {
            return;
        }
    }

    while Instant::now() < deadline {
        // Scrolling: every half second each tile re-rolls its visibility.
        if Instant::now() >= next_scroll {
            for &id in &ids {
                let visible = rng.gen_bool(opt.visible_ratio.clamp(0.0, 1.0));
                let _ = commands.send(HostCommand::Inbound(InboundMessage::Visibility {
                    printer_id: id,
                    visible,
                }));
            }
            next_scroll += Duration::from_millis(500);
        }

        for (&id, frame) in ids.iter().zip(&frames) {
            let bytes = if rng.gen_bool(opt.corrupt_ratio.clamp(0.0, 1.0)) {
                (0..64).map(|_| rng.gen()).collect()
            } else {
                frame.clone()
            };
            let message = InboundMessage::Frame {
                printer_id: id,
                bytes,
            };
            if commands.send(HostCommand::Inbound(message)).is_err() {
                return;
            }
        }
        thread::sleep(frame_interval);
    }

    for &id in &ids {
        let _ = commands.send(HostCommand::Unregister(id));
    }
}

fn main() -> anyhow::Result<()> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .finish(),
    )?;

    let opt = Opt::parse();
    let config = match &opt.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::from_env_or_default()?,
    };
    let (width, height) = parse_resolution(&opt.resolution)?;
    let frames = encode_frames(opt.cameras, width, height)?;
    info!(
        cameras = opt.cameras,
        fps = opt.fps,
        workers = config.decode_workers,
        "--- Camera Tile Pipeline Simulation ---"
    );

    let (render_tx, render_rx) = flume::unbounded::<RenderFrame>();
    let (commands, commands_rx) = flume::unbounded();
    let bus = DiagnosticsBus::bounded(1024);
    let diag_rx = bus.subscribe();
    let mut pipeline = CameraPipeline::new(config, render_tx)?.with_diagnostics(bus);

    let pipeline_thread = thread::Builder::new()
        .name("camera-pipeline".to_string())
        .spawn(move || {
            pipeline.run(commands_rx);
            pipeline
        })?;
    let producer = {
        let opt = opt.clone();
        thread::Builder::new()
            .name("frame-source".to_string())
            .spawn(move || produce(opt, frames, commands))?
    };

    // This thread plays the UI: it draws (here, counts) whatever the
    // pipeline forwards and disposes of it.
    let mut shown: BTreeMap<PrinterId, u64> = BTreeMap::new();
    while !pipeline_thread.is_finished() {
        if let Ok(frame) = render_rx.recv_timeout(Duration::from_millis(100)) {
            *shown.entry(frame.printer_id).or_default() += 1;
            frame.bitmap.dispose();
        }
        for event in diag_rx.try_iter() {
            if let (Some(id), Some(MetricValue::Bool(true))) =
                (event.printer_id, event.metric("stalled"))
            {
                debug!(printer_id = id, "tile stalled");
            }
        }
    }
    for frame in render_rx.drain() {
        *shown.entry(frame.printer_id).or_default() += 1;
    }

    producer
        .join()
        .map_err(|_| anyhow!("frame source thread panicked"))?;
    let pipeline = pipeline_thread
        .join()
        .map_err(|_| anyhow!("pipeline thread panicked"))?;

    let totals = pipeline.totals();
    println!("\n[STATS] {totals:?}");
    for (id, count) in &shown {
        println!("  camera {id:>3}: {count} frames shown");
    }
    Ok(())
}
