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

//! The CameraPipeline, which wires frame and visibility inputs through the
//! admission gate, the decode pool and the sequencer to a render sink.
//!
//! A pipeline lives on one thread (the host's UI thread, or a dedicated loop
//! via [`CameraPipeline::run`]) and never decodes there. Decoding happens on
//! the worker pool; completed results come back over a channel and are applied
//! by [`CameraPipeline::pump`] or by the run loop.

use crate::config::PipelineConfig;
use crate::decoder::{image_decoder_factory, DecodeWorker, DecoderFactory};
use crate::diagnostics::{now_ms, DiagEvent, DiagnosticsBus, SUBSYSTEM};
use crate::error::{DecodeFailure, Result};
use crate::frame::{DecodedFrame, Frame, PrinterId};
use crate::gate::{Admission, AdmissionGate};
use crate::messages::{DecodeJob, DecodeResult, HostCommand, InboundMessage};
use crate::metric;
use crate::sequencer::{FrameSequencer, SequencerOutcome};
use crate::sink::RenderSink;
use crate::stats::{PipelineTotals, SourceStats, SourceStatus};
use flume::{Receiver, RecvTimeoutError, Selector};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Host-side facts about a source that neither the gate nor the sequencer keep.
#[derive(Debug, Default)]
struct SourceRecord {
    stats: SourceStats,
    /// When the tile last became visible, for stall detection.
    visible_since: Option<Instant>,
    last_error: Option<String>,
}

enum LoopEvent {
    Command(Option<HostCommand>),
    Decoded(Option<DecodeResult>),
}

pub struct CameraPipeline<S: RenderSink> {
    config: PipelineConfig,
    gate: AdmissionGate,
    sequencer: FrameSequencer,
    records: HashMap<PrinterId, SourceRecord>,
    totals: PipelineTotals,
    results: Receiver<DecodeResult>,
    sink: S,
    diagnostics: Option<DiagnosticsBus>,
    worker: DecodeWorker,
}

impl<S: RenderSink> CameraPipeline<S> {
    /// Builds a pipeline decoding still images (JPEG, PNG).
    pub fn new(config: PipelineConfig, sink: S) -> Result<Self> {
        Self::with_decoder(config, image_decoder_factory(), sink)
    }

    /// Builds a pipeline whose workers each get a decoder from `factory`.
    pub fn with_decoder(config: PipelineConfig, factory: DecoderFactory, sink: S) -> Result<Self> {
        config.validate()?;
        let (results_tx, results) = flume::unbounded();
        let worker = DecodeWorker::spawn(config.decode_workers, factory, results_tx)?;
        info!(workers = config.decode_workers, "camera pipeline started");
        Ok(Self {
            config,
            gate: AdmissionGate::new(),
            sequencer: FrameSequencer::new(),
            records: HashMap::new(),
            totals: PipelineTotals::default(),
            results,
            sink,
            diagnostics: None,
            worker,
        })
    }

    /// Publishes per-source diagnostics to `bus`.
    pub fn with_diagnostics(mut self, bus: DiagnosticsBus) -> Self {
        self.diagnostics = Some(bus);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// A tile mounted. Re-registering an existing source resets it.
    pub fn register(&mut self, printer_id: PrinterId) {
        let now = Instant::now();
        if self.sequencer.is_registered(printer_id) {
            debug!(printer_id, "source re-registered, resetting");
        }
        let generation = self.sequencer.register(printer_id, now);
        let visible_since = self.gate.is_visible(printer_id).then_some(now);
        self.records.insert(
            printer_id,
            SourceRecord {
                visible_since,
                ..SourceRecord::default()
            },
        );
        debug!(printer_id, generation, "source registered");
    }

    /// A tile unmounted. A decode still running for it finishes, and its
    /// result is thrown away.
    /// Tears down a source. Its visibility is left as last signalled, so a
    /// remounted tile keeps showing frames without a fresh visibility signal.
    pub fn unregister(&mut self, printer_id: PrinterId) -> bool {
        self.records.remove(&printer_id);
        let removed = self.sequencer.unregister(printer_id);
        if removed {
            debug!(printer_id, "source unregistered");
        }
        removed
    }

    pub fn is_registered(&self, printer_id: PrinterId) -> bool {
        self.sequencer.is_registered(printer_id)
    }

    pub fn handle(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Frame { printer_id, bytes } => {
                self.on_frame(printer_id, bytes);
            }
            InboundMessage::Visibility {
                printer_id,
                visible,
            } => {
                self.on_visibility(printer_id, visible);
            }
        }
    }

    /// Handles a message in its JSON wire form. Malformed messages are logged
    /// and dropped.
    pub fn handle_json(&mut self, text: &str) {
        match InboundMessage::from_json(text) {
            Ok(message) => self.handle(message),
            Err(e) => {
                self.totals.protocol_violations += 1;
                warn!(error = %e, "dropping malformed inbound message");
            }
        }
    }

    pub fn handle_command(&mut self, command: HostCommand) {
        match command {
            HostCommand::Register(printer_id) => self.register(printer_id),
            HostCommand::Unregister(printer_id) => {
                self.unregister(printer_id);
            }
            HostCommand::Inbound(message) => self.handle(message),
            HostCommand::Json(text) => self.handle_json(&text),
        }
    }

    /// Applies a visibility signal. Repeats of the current state do nothing.
    pub fn on_visibility(&mut self, printer_id: PrinterId, visible: bool) -> bool {
        let changed = self.gate.set_visibility(printer_id, visible);
        if changed {
            if let Some(record) = self.records.get_mut(&printer_id) {
                record.visible_since = visible.then(Instant::now);
            }
        }
        changed
    }

    /// Offers a compressed frame for decoding. Returns the gate's decision, or
    /// `None` if the source is not registered.
    pub fn on_frame(&mut self, printer_id: PrinterId, bytes: Vec<u8>) -> Option<Admission> {
        self.totals.frames_received += 1;
        let Some((generation, seq)) = self.sequencer.stamp(printer_id) else {
            self.totals.protocol_violations += 1;
            debug!(printer_id, "frame for unregistered source dropped");
            return None;
        };

        let frame = Frame::new(printer_id, seq, bytes);
        let admission = self.gate.admit(&frame);
        let record = self.records.entry(printer_id).or_default();
        record.stats.frames_received += 1;

        match admission {
            Admission::Accepted => {
                record.stats.admitted += 1;
                self.totals.decodes_started += 1;
                let job = DecodeJob {
                    printer_id,
                    generation,
                    seq,
                    bytes: frame.bytes,
                };
                if !self.worker.submit(job) {
                    self.gate.release(printer_id);
                }
            }
            Admission::NotVisible => {
                record.stats.dropped_not_visible += 1;
                trace!(printer_id, seq, "frame dropped, tile not visible");
            }
            Admission::Busy => {
                record.stats.dropped_busy += 1;
                trace!(printer_id, seq, "frame dropped, decode in flight");
            }
        }
        Some(admission)
    }

    /// Applies every decode result that is ready, without blocking. Returns
    /// the number of results applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(result) = self.results.try_recv() {
            self.apply_result(result);
            applied += 1;
        }
        applied
    }

    /// Waits up to `timeout` for at least one result, then applies everything
    /// that is ready.
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        match self.results.recv_timeout(timeout) {
            Ok(result) => {
                self.apply_result(result);
                1 + self.pump()
            }
            Err(RecvTimeoutError::Timeout) => 0,
            Err(RecvTimeoutError::Disconnected) => {
                error!("decode result channel disconnected");
                0
            }
        }
    }

    /// Waits until no decode is outstanding or `timeout` passes. Returns
    /// `true` if the pipeline went idle.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.gate.in_flight_count() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.pump_timeout(remaining);
        }
        true
    }

    fn apply_result(&mut self, result: DecodeResult) {
        let DecodeResult {
            printer_id,
            generation,
            seq,
            outcome,
        } = result;

        match outcome {
            Ok(bitmap) => {
                let decoded = DecodedFrame {
                    printer_id,
                    seq,
                    bitmap,
                };
                let outcome = self.sequencer.on_decoded(
                    &mut self.gate,
                    generation,
                    decoded,
                    &mut self.sink,
                    Instant::now(),
                );
                if outcome == SequencerOutcome::Unregistered {
                    self.totals.orphaned_results += 1;
                    return;
                }
                let Some(record) = self.records.get_mut(&printer_id) else {
                    return;
                };
                match outcome {
                    SequencerOutcome::Forwarded => {
                        record.stats.consecutive_failures = 0;
                        record.last_error = None;
                        record.stats.rendered += 1;
                        self.totals.rendered += 1;
                    }
                    SequencerOutcome::Stale => {
                        record.stats.stale_discarded += 1;
                        self.totals.discarded += 1;
                    }
                    SequencerOutcome::Invisible => {
                        record.stats.invisible_discarded += 1;
                        self.totals.discarded += 1;
                    }
                    SequencerOutcome::Unregistered => {}
                }
            }
            Err(error) => {
                self.totals.decode_failures += 1;
                let failure = DecodeFailure {
                    printer_id,
                    seq,
                    error,
                };
                if !self
                    .sequencer
                    .on_failed(&mut self.gate, printer_id, generation, seq)
                {
                    self.totals.orphaned_results += 1;
                    return;
                }
                if let Some(record) = self.records.get_mut(&printer_id) {
                    record.stats.decode_failures += 1;
                    record.stats.consecutive_failures += 1;
                    record.last_error = Some(failure.error.to_string());
                    debug!(
                        %failure,
                        consecutive = record.stats.consecutive_failures,
                        "frame dropped, decode failed"
                    );
                }
            }
        }
    }

    pub fn stats(&self, printer_id: PrinterId) -> Option<SourceStats> {
        self.records.get(&printer_id).map(|r| r.stats)
    }

    pub fn totals(&self) -> PipelineTotals {
        self.totals
    }

    pub fn in_flight(&self) -> usize {
        self.gate.in_flight_count()
    }

    pub fn status(&self, printer_id: PrinterId) -> Option<SourceStatus> {
        self.status_at(printer_id, Instant::now())
    }

    /// Status of a source as of `now`.
    ///
    /// A source is stalled when it is visible, has been visible and registered
    /// for longer than the start-up grace period, and has rendered nothing
    /// within the stall timeout.
    pub fn status_at(&self, printer_id: PrinterId, now: Instant) -> Option<SourceStatus> {
        let entry = self.sequencer.source(printer_id)?;
        let record = self.records.get(&printer_id)?;

        let uptime = now.saturating_duration_since(entry.registered_at);
        let since_frame = entry
            .last_rendered_at
            .map(|t| now.saturating_duration_since(t));
        let visible = self.gate.is_visible(printer_id);

        let stalled = match record.visible_since {
            Some(visible_since) if visible => {
                let watched = now.saturating_duration_since(visible_since.max(entry.registered_at));
                watched > self.config.startup_grace()
                    && since_frame.map_or(true, |d| d > self.config.stall_timeout())
            }
            _ => false,
        };

        Some(SourceStatus {
            visible,
            in_flight: self.gate.is_in_flight(printer_id),
            last_rendered_seq: entry.last_rendered_seq,
            has_frames: entry.last_rendered_at.is_some(),
            seconds_since_frame: since_frame.map(|d| d.as_secs_f64()),
            uptime_secs: uptime.as_secs_f64(),
            stalled,
            last_error: record.last_error.clone(),
            stats: record.stats,
        })
    }

    /// Sources currently considered stalled.
    pub fn stalled_sources(&self) -> Vec<PrinterId> {
        let now = Instant::now();
        let mut stalled: Vec<PrinterId> = self
            .sequencer
            .registered()
            .filter(|&id| self.status_at(id, now).is_some_and(|s| s.stalled))
            .collect();
        stalled.sort_unstable();
        stalled
    }

    /// Publishes one event per registered source plus a pipeline-wide one.
    /// Returns how many events were accepted by the bus.
    pub fn report_diagnostics(&self) -> usize {
        let Some(bus) = &self.diagnostics else {
            return 0;
        };
        let now = Instant::now();
        let ts_ms = now_ms();
        let mut published = 0;

        for printer_id in self.sequencer.registered() {
            let Some(status) = self.status_at(printer_id, now) else {
                continue;
            };
            let stats = status.stats;
            let mut metrics = vec![
                metric!("frames_received", stats.frames_received),
                metric!("admitted", stats.admitted),
                metric!("dropped_not_visible", stats.dropped_not_visible),
                metric!("dropped_busy", stats.dropped_busy),
                metric!("decode_failures", stats.decode_failures),
                metric!("consecutive_failures", stats.consecutive_failures),
                metric!("stale_discarded", stats.stale_discarded + stats.invisible_discarded),
                metric!("rendered", stats.rendered),
                metric!("last_rendered_seq", status.last_rendered_seq),
                metric!("visible", status.visible),
                metric!("stalled", status.stalled),
            ];
            if let Some(secs) = status.seconds_since_frame {
                metrics.push(metric!("seconds_since_frame", secs));
            }
            let event = DiagEvent {
                subsystem: SUBSYSTEM.to_string(),
                printer_id: Some(printer_id),
                ts_ms,
                metrics,
            };
            if bus.publish(event) {
                published += 1;
            }
        }

        let totals = self.totals;
        let event = DiagEvent {
            subsystem: SUBSYSTEM.to_string(),
            printer_id: None,
            ts_ms,
            metrics: vec![
                metric!("sources", self.sequencer.len() as u64),
                metric!("in_flight", self.gate.in_flight_count() as u64),
                metric!("queued_jobs", self.worker.queued() as u64),
                metric!("frames_received", totals.frames_received),
                metric!("decodes_started", totals.decodes_started),
                metric!("decode_failures", totals.decode_failures),
                metric!("rendered", totals.rendered),
                metric!("discarded", totals.discarded),
                metric!("orphaned_results", totals.orphaned_results),
                metric!("protocol_violations", totals.protocol_violations),
            ],
        };
        if bus.publish(event) {
            published += 1;
        }
        published
    }

    /// Runs the pipeline as a dedicated consumer loop: host commands and
    /// decode results are applied in arrival order until every command sender
    /// has been dropped. Diagnostics are published on the configured interval.
    pub fn run(&mut self, commands: Receiver<HostCommand>) {
        let interval = self.config.diagnostics_interval();
        let mut next_report = Instant::now() + interval;
        info!("camera pipeline loop running");

        loop {
            let now = Instant::now();
            if now >= next_report {
                self.report_diagnostics();
                next_report = now + interval;
            }

            let event = Selector::new()
                .recv(&commands, |r| LoopEvent::Command(r.ok()))
                .recv(&self.results, |r| LoopEvent::Decoded(r.ok()))
                .wait_timeout(next_report.saturating_duration_since(now));

            match event {
                Ok(LoopEvent::Command(Some(command))) => self.handle_command(command),
                Ok(LoopEvent::Command(None)) => {
                    info!("command channel closed, camera pipeline loop exiting");
                    break;
                }
                Ok(LoopEvent::Decoded(Some(result))) => self.apply_result(result),
                Ok(LoopEvent::Decoded(None)) => {
                    error!("decode result channel disconnected, camera pipeline loop exiting");
                    break;
                }
                // Reporting is due; handled at the top of the loop.
                Err(_) => {}
            }
        }
    }
}
