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

//! End-to-end scenarios: frames, visibility signals and decode timing driven
//! through a real `CameraPipeline` with a decoder the test can hold mid-decode.

use camera_tiles::decoder::{DecoderFactory, FrameDecoder, ImageDecoder};
use camera_tiles::{
    Admission, Bitmap, CameraPipeline, DecodeError, PipelineConfig, PrinterId, RenderFrame,
    RenderSink, Seq,
};
use flume::{Receiver, Sender};
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct Recorder {
    frames: Arc<Mutex<Vec<(PrinterId, Seq, u32)>>>,
}

impl RenderSink for Recorder {
    fn render(&mut self, frame: RenderFrame) {
        self.frames
            .lock()
            .unwrap()
            .push((frame.printer_id, frame.seq, frame.bitmap.width()));
        frame.bitmap.dispose();
    }
}

/// Real image decoding that waits for a release token before finishing.
struct GatedDecoder {
    inner: ImageDecoder,
    started: Arc<AtomicUsize>,
    release: Receiver<()>,
}

impl FrameDecoder for GatedDecoder {
    fn decode(&mut self, bytes: &[u8]) -> Result<Bitmap, DecodeError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _ = self.release.recv_timeout(WAIT);
        self.inner.decode(bytes)
    }
}

struct Harness {
    pipeline: CameraPipeline<Recorder>,
    rendered: Arc<Mutex<Vec<(PrinterId, Seq, u32)>>>,
    started: Arc<AtomicUsize>,
    release: Sender<()>,
}

impl Harness {
    fn new(workers: usize) -> Self {
        let started = Arc::new(AtomicUsize::new(0));
        let (release, release_rx) = flume::unbounded();
        let factory: DecoderFactory = {
            let started = started.clone();
            Arc::new(move || {
                Box::new(GatedDecoder {
                    inner: ImageDecoder::new(),
                    started: started.clone(),
                    release: release_rx.clone(),
                }) as Box<dyn FrameDecoder>
            })
        };
        let sink = Recorder::default();
        let rendered = sink.frames.clone();
        let config = PipelineConfig {
            decode_workers: workers,
            ..PipelineConfig::default()
        };
        Harness {
            pipeline: CameraPipeline::with_decoder(config, factory, sink).unwrap(),
            rendered,
            started,
            release,
        }
    }

    fn release(&self, n: usize) {
        for _ in 0..n {
            self.release.send(()).unwrap();
        }
    }

    fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    fn wait_started(&self, n: usize) {
        let deadline = Instant::now() + WAIT;
        while self.started() < n {
            assert!(Instant::now() < deadline, "decode never started");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn settle(&mut self) {
        assert!(self.pipeline.settle(WAIT), "pipeline did not go idle");
    }

    fn rendered(&self) -> Vec<(PrinterId, Seq)> {
        self.rendered
            .lock()
            .unwrap()
            .iter()
            .map(|&(p, s, _)| (p, s))
            .collect()
    }
}

fn png(width: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, 2, Rgba([1, 2, 3, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

#[test]
fn scenario_a_visible_frame_is_decoded_and_rendered() {
    let mut h = Harness::new(2);
    h.pipeline.register(1);
    h.pipeline.on_visibility(1, true);
    h.release(1);

    assert_eq!(h.pipeline.on_frame(1, png(6)), Some(Admission::Accepted));
    h.settle();

    assert_eq!(h.started(), 1);
    let frames = h.rendered.lock().unwrap().clone();
    assert_eq!(frames, vec![(1, 1, 6)]);
    assert_eq!(h.pipeline.stats(1).unwrap().rendered, 1);
}

#[test]
fn scenario_b_hidden_source_is_never_decoded() {
    let mut h = Harness::new(2);
    h.pipeline.register(1);
    h.pipeline.on_visibility(1, false);

    assert_eq!(h.pipeline.on_frame(1, png(4)), Some(Admission::NotVisible));
    h.settle();
    thread::sleep(Duration::from_millis(20));

    assert_eq!(h.started(), 0);
    assert!(h.rendered().is_empty());
    assert_eq!(h.pipeline.stats(1).unwrap().dropped_not_visible, 1);
}

#[test]
fn scenario_c_frame_arriving_while_busy_is_dropped() {
    let mut h = Harness::new(2);
    h.pipeline.register(1);
    h.pipeline.on_visibility(1, true);

    assert_eq!(h.pipeline.on_frame(1, png(3)), Some(Admission::Accepted));
    h.wait_started(1);
    assert_eq!(h.pipeline.on_frame(1, png(5)), Some(Admission::Busy));

    h.release(1);
    h.settle();

    assert_eq!(h.started(), 1);
    assert_eq!(h.rendered(), vec![(1, 1)]);
    let stats = h.pipeline.stats(1).unwrap();
    assert_eq!(stats.dropped_busy, 1);
    assert_eq!(stats.admitted, 1);
}

#[test]
fn scenario_d_hidden_mid_decode_is_disposed() {
    let mut h = Harness::new(2);
    h.pipeline.register(1);
    for _ in 1..=4 {
        h.pipeline.on_frame(1, png(2));
    }
    h.pipeline.on_visibility(1, true);
    assert_eq!(h.pipeline.on_frame(1, png(2)), Some(Admission::Accepted));
    h.wait_started(1);

    h.pipeline.on_visibility(1, false);
    h.release(1);
    h.settle();

    assert!(h.rendered().is_empty());
    let status = h.pipeline.status(1).unwrap();
    assert_eq!(status.last_rendered_seq, 0);
    assert_eq!(status.stats.invisible_discarded, 1);
    assert!(!status.in_flight);
}

#[test]
fn scenario_e_corrupt_frame_does_not_wedge_the_source() {
    let mut h = Harness::new(2);
    h.pipeline.register(1);
    h.pipeline.on_frame(1, png(2));
    h.pipeline.on_frame(1, png(2));
    h.pipeline.on_visibility(1, true);
    h.release(2);

    let mut corrupt = png(8);
    corrupt.truncate(30);
    assert_eq!(h.pipeline.on_frame(1, corrupt), Some(Admission::Accepted));
    h.settle();

    assert_eq!(h.pipeline.totals().decode_failures, 1);
    let status = h.pipeline.status(1).unwrap();
    assert_eq!(status.stats.decode_failures, 1);
    assert!(status.last_error.is_some());

    assert_eq!(h.pipeline.on_frame(1, png(8)), Some(Admission::Accepted));
    h.settle();
    assert_eq!(h.rendered(), vec![(1, 4)]);
}

#[test]
fn corrupt_frame_on_one_source_does_not_affect_another() {
    let mut h = Harness::new(2);
    for id in [1, 2] {
        h.pipeline.register(id);
        h.pipeline.on_visibility(id, true);
    }
    h.release(2);
    h.pipeline.on_frame(1, b"\xff\xd8\xff garbage".to_vec());
    h.pipeline.on_frame(2, png(9));
    h.settle();

    assert_eq!(h.rendered(), vec![(2, 1)]);
    assert_eq!(h.pipeline.stats(1).unwrap().decode_failures, 1);
    assert_eq!(h.pipeline.stats(2).unwrap().decode_failures, 0);
}

#[test]
fn late_result_after_unregister_is_discarded() {
    let mut h = Harness::new(1);
    h.pipeline.register(1);
    h.pipeline.on_visibility(1, true);
    h.pipeline.on_frame(1, png(2));
    h.wait_started(1);

    assert!(h.pipeline.unregister(1));
    h.release(1);
    h.settle();

    assert!(h.rendered().is_empty());
    assert_eq!(h.pipeline.totals().orphaned_results, 1);
    assert_eq!(h.pipeline.in_flight(), 0);
}

#[test]
fn remount_waits_for_previous_decode_and_ignores_its_result() {
    let mut h = Harness::new(2);
    h.pipeline.register(1);
    h.pipeline.on_visibility(1, true);
    h.pipeline.on_frame(1, png(2));
    h.wait_started(1);

    h.pipeline.unregister(1);
    h.pipeline.register(1);
    h.pipeline.on_visibility(1, true);
    // Still one decode in flight for printer 1.
    assert_eq!(h.pipeline.on_frame(1, png(3)), Some(Admission::Busy));

    h.release(1);
    h.settle();
    assert!(h.rendered().is_empty());

    h.release(1);
    assert_eq!(h.pipeline.on_frame(1, png(3)), Some(Admission::Accepted));
    h.settle();
    assert_eq!(h.rendered(), vec![(1, 2)]);
}

#[test]
fn repeated_visibility_signals_are_idempotent() {
    let mut h = Harness::new(1);
    h.pipeline.register(1);
    assert!(h.pipeline.on_visibility(1, true));
    assert!(!h.pipeline.on_visibility(1, true));
    assert!(!h.pipeline.on_visibility(1, true));
    h.release(1);
    h.pipeline.on_frame(1, png(2));
    h.settle();
    assert_eq!(h.rendered(), vec![(1, 1)]);

    assert!(h.pipeline.on_visibility(1, false));
    assert!(!h.pipeline.on_visibility(1, false));
    assert_eq!(h.pipeline.on_frame(1, png(2)), Some(Admission::NotVisible));
}

#[test]
fn sources_decode_independently() {
    let mut h = Harness::new(3);
    for id in 1..=3 {
        h.pipeline.register(id);
        h.pipeline.on_visibility(id, true);
        assert_eq!(h.pipeline.on_frame(id, png(id)), Some(Admission::Accepted));
    }
    h.wait_started(3);
    assert_eq!(h.pipeline.in_flight(), 3);

    h.release(3);
    h.settle();
    let mut frames = h.rendered.lock().unwrap().clone();
    frames.sort_unstable();
    assert_eq!(frames, vec![(1, 1, 1), (2, 1, 2), (3, 1, 3)]);
}
