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

//! Randomised checks of the pipeline's ordering, admission and in-flight
//! guarantees, plus the dedicated run loop.

use camera_tiles::decoder::{DecoderFactory, FrameDecoder};
use camera_tiles::diagnostics::DiagnosticsBus;
use camera_tiles::{
    Admission, Bitmap, CameraPipeline, DecodeError, HostCommand, InboundMessage, PipelineConfig,
    PrinterId, RenderFrame, RenderSink, Seq,
};
use image::RgbaImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct Recorder {
    frames: Arc<Mutex<Vec<(PrinterId, Seq)>>>,
}

impl RenderSink for Recorder {
    fn render(&mut self, frame: RenderFrame) {
        self.frames
            .lock()
            .unwrap()
            .push((frame.printer_id, frame.seq));
    }
}

#[derive(Default)]
struct Concurrency {
    active: HashSet<u8>,
    violations: usize,
}

/// Byte 0 is the printer id, byte 1 == 0 means corrupt. Flags any overlap of
/// two decodes for the same printer.
fn tracking_factory(tracker: Arc<Mutex<Concurrency>>) -> DecoderFactory {
    Arc::new(move || {
        let tracker = tracker.clone();
        Box::new(move |bytes: &[u8]| {
            let id = bytes[0];
            {
                let mut t = tracker.lock().unwrap();
                if !t.active.insert(id) {
                    t.violations += 1;
                }
            }
            thread::sleep(Duration::from_micros(200));
            tracker.lock().unwrap().active.remove(&id);
            if bytes[1] == 0 {
                Err(DecodeError::Malformed("corrupt".to_string()))
            } else {
                Ok(Bitmap::new(RgbaImage::new(1, 1)))
            }
        }) as Box<dyn FrameDecoder>
    })
}

#[test]
fn random_traffic_keeps_every_invariant() {
    let tracker = Arc::new(Mutex::new(Concurrency::default()));
    let sink = Recorder::default();
    let rendered = sink.frames.clone();
    let config = PipelineConfig {
        decode_workers: 4,
        ..PipelineConfig::default()
    };
    let mut pipeline =
        CameraPipeline::with_decoder(config, tracking_factory(tracker.clone()), sink).unwrap();

    let mut rng = StdRng::seed_from_u64(0x7113);
    let ids: Vec<PrinterId> = (1..=8).collect();
    let mut visible: HashMap<PrinterId, bool> = HashMap::new();
    for &id in &ids {
        pipeline.register(id);
    }

    for step in 0..3000 {
        let id = ids[rng.gen_range(0..ids.len())];
        match rng.gen_range(0..10) {
            0 | 1 => {
                let v = rng.gen_bool(0.7);
                pipeline.on_visibility(id, v);
                visible.insert(id, v);
            }
            _ => {
                let corrupt = rng.gen_bool(0.1);
                let admission = pipeline.on_frame(id, vec![id as u8, u8::from(!corrupt)]);
                if !visible.get(&id).copied().unwrap_or(false) {
                    assert_eq!(admission, Some(Admission::NotVisible));
                }
            }
        }
        if step % 7 == 0 {
            pipeline.pump();
        }
        if step % 50 == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
    assert!(pipeline.settle(WAIT));

    assert_eq!(tracker.lock().unwrap().violations, 0);

    let frames = rendered.lock().unwrap().clone();
    assert!(!frames.is_empty());
    let mut last: HashMap<PrinterId, Seq> = HashMap::new();
    for (id, seq) in frames {
        let prev = last.insert(id, seq).unwrap_or(0);
        assert!(seq > prev, "printer {id} went from {prev} back to {seq}");
    }

    let totals = pipeline.totals();
    let per_source: u64 = ids
        .iter()
        .map(|&id| pipeline.stats(id).unwrap().frames_received)
        .sum();
    assert_eq!(totals.frames_received, per_source);
    for &id in &ids {
        let stats = pipeline.stats(id).unwrap();
        assert_eq!(stats.dropped() + stats.rendered, stats.frames_received);
    }
}

#[test]
fn run_loop_drives_pipeline_from_commands() {
    let (render_tx, render_rx) = flume::unbounded::<RenderFrame>();
    let (commands, commands_rx) = flume::unbounded();
    let bus = DiagnosticsBus::bounded(64);
    let config = PipelineConfig {
        decode_workers: 2,
        diagnostics_interval_ms: 10,
        ..PipelineConfig::default()
    };
    let tracker = Arc::new(Mutex::new(Concurrency::default()));
    let mut pipeline = CameraPipeline::with_decoder(config, tracking_factory(tracker), render_tx)
        .unwrap()
        .with_diagnostics(bus.clone());

    let handle = thread::spawn(move || {
        pipeline.run(commands_rx);
        pipeline.totals()
    });

    commands.send(HostCommand::Register(5)).unwrap();
    commands
        .send(HostCommand::Json(
            r#"{"type":"visibility","printerId":5,"visible":true}"#.to_string(),
        ))
        .unwrap();
    commands
        .send(HostCommand::Inbound(InboundMessage::Frame {
            printer_id: 5,
            bytes: vec![5, 1],
        }))
        .unwrap();
    commands.send(HostCommand::Json("nonsense".to_string())).unwrap();

    let frame = render_rx.recv_timeout(WAIT).unwrap();
    assert_eq!((frame.printer_id, frame.seq), (5, 1));

    // Let at least one diagnostics tick pass.
    thread::sleep(Duration::from_millis(50));
    drop(commands);
    let totals = handle.join().unwrap();
    assert_eq!(totals.rendered, 1);
    assert_eq!(totals.protocol_violations, 1);

    let events = bus.drain();
    assert!(events.iter().any(|e| e.printer_id == Some(5)));
}
