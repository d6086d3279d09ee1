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

//! The FrameSequencer, the single authority on which decoded frame reaches
//! the screen.
//!
//! It owns the per-source bookkeeping (registration, sequence counter, last
//! rendered sequence number) and enforces that a tile never goes back to an
//! older image: a result is forwarded only if it is newer than what the tile
//! already shows and the tile is still visible. Everything else is disposed
//! here, before it gets anywhere near the render sink.

use crate::frame::{DecodedFrame, PrinterId, RenderFrame, Seq, INITIAL_SEQ};
use crate::gate::AdmissionGate;
use crate::messages::Generation;
use crate::sink::RenderSink;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, trace};

/// What happened to a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerOutcome {
    /// Handed to the render sink.
    Forwarded,
    /// Not newer than the frame already on screen.
    Stale,
    /// The tile went off screen while the frame was decoding.
    Invisible,
    /// The source is gone (or was re-registered since the decode started).
    Unregistered,
}

/// Bookkeeping for one registered camera source.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub generation: Generation,
    /// Sequence number the next arriving frame will get.
    pub next_seq: Seq,
    pub last_rendered_seq: Seq,
    pub registered_at: Instant,
    pub last_rendered_at: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct FrameSequencer {
    sources: HashMap<PrinterId, SourceEntry>,
    generations: Generation,
}

impl FrameSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or resets) the bookkeeping for a source. Returns the new
    /// registration's generation.
    pub fn register(&mut self, printer_id: PrinterId, now: Instant) -> Generation {
        self.generations += 1;
        let generation = self.generations;
        self.sources.insert(
            printer_id,
            SourceEntry {
                generation,
                next_seq: INITIAL_SEQ + 1,
                last_rendered_seq: INITIAL_SEQ,
                registered_at: now,
                last_rendered_at: None,
            },
        );
        generation
    }

    /// Removes a source. Results still in flight for it will be disposed.
    pub fn unregister(&mut self, printer_id: PrinterId) -> bool {
        self.sources.remove(&printer_id).is_some()
    }

    pub fn is_registered(&self, printer_id: PrinterId) -> bool {
        self.sources.contains_key(&printer_id)
    }

    pub fn source(&self, printer_id: PrinterId) -> Option<&SourceEntry> {
        self.sources.get(&printer_id)
    }

    pub fn registered(&self) -> impl Iterator<Item = PrinterId> + '_ {
        self.sources.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Assigns the next sequence number to a frame arriving for `printer_id`.
    pub fn stamp(&mut self, printer_id: PrinterId) -> Option<(Generation, Seq)> {
        let entry = self.sources.get_mut(&printer_id)?;
        let seq = entry.next_seq;
        entry.next_seq += 1;
        Some((entry.generation, seq))
    }

    pub fn last_rendered_seq(&self, printer_id: PrinterId) -> Option<Seq> {
        self.sources.get(&printer_id).map(|e| e.last_rendered_seq)
    }

    /// Decides the fate of a decoded frame. The bitmap is either moved into
    /// `sink` or dropped here; it never survives this call otherwise.
    pub fn on_decoded<S: RenderSink + ?Sized>(
        &mut self,
        gate: &mut AdmissionGate,
        generation: Generation,
        decoded: DecodedFrame,
        sink: &mut S,
        now: Instant,
    ) -> SequencerOutcome {
        let DecodedFrame {
            printer_id,
            seq,
            bitmap,
        } = decoded;

        let entry = match self.sources.get_mut(&printer_id) {
            Some(entry) if entry.generation == generation => entry,
            _ => {
                trace!(printer_id, seq, "result for unregistered source, disposing");
                bitmap.dispose();
                // This job held the source's in-flight slot, whatever its generation.
                gate.release(printer_id);
                return SequencerOutcome::Unregistered;
            }
        };

        if seq <= entry.last_rendered_seq {
            trace!(
                printer_id,
                seq,
                last_rendered = entry.last_rendered_seq,
                "stale result, disposing"
            );
            bitmap.dispose();
            gate.release(printer_id);
            return SequencerOutcome::Stale;
        }

        if !gate.is_visible(printer_id) {
            trace!(printer_id, seq, "source hidden mid-decode, disposing");
            bitmap.dispose();
            gate.release(printer_id);
            return SequencerOutcome::Invisible;
        }

        entry.last_rendered_seq = seq;
        entry.last_rendered_at = Some(now);
        gate.release(printer_id);
        sink.render(RenderFrame {
            printer_id,
            seq,
            bitmap,
        });
        SequencerOutcome::Forwarded
    }

    /// Resolves the in-flight state after a failed decode. Returns `false` if
    /// the failure belongs to a registration that no longer exists.
    pub fn on_failed(
        &mut self,
        gate: &mut AdmissionGate,
        printer_id: PrinterId,
        generation: Generation,
        seq: Seq,
    ) -> bool {
        gate.release(printer_id);
        let current = self
            .sources
            .get(&printer_id)
            .is_some_and(|entry| entry.generation == generation);
        if !current {
            debug!(printer_id, seq, "failure for unregistered source ignored");
        }
        current
    }
}
