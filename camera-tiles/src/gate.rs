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

//! The AdmissionGate, which decides whether an inbound frame is worth decoding.
//!
//! The gate owns the two pieces of per-source state the decode path depends
//! on: which sources are currently visible, and which already have a frame
//! in flight. A source gets at most one outstanding decode; anything that
//! arrives while it is busy is dropped, never queued.

use crate::frame::{Frame, PrinterId};
use std::collections::HashSet;
use tracing::trace;

/// Why a frame was or was not let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The frame may be decoded; the source is now in flight.
    Accepted,
    /// The source's tile is off screen.
    NotVisible,
    /// The source already has a decode outstanding.
    Busy,
}

impl Admission {
    pub fn is_accepted(self) -> bool {
        self == Admission::Accepted
    }
}

#[derive(Debug, Default)]
pub struct AdmissionGate {
    visible: HashSet<PrinterId>,
    in_flight: HashSet<PrinterId>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a visibility signal. Returns `true` if it changed anything, so
    /// repeated identical signals are no-ops.
    ///
    /// Going invisible does not touch the in-flight flag: a running decode
    /// finishes and its result is discarded by the sequencer.
    pub fn set_visibility(&mut self, printer_id: PrinterId, visible: bool) -> bool {
        let changed = if visible {
            self.visible.insert(printer_id)
        } else {
            self.visible.remove(&printer_id)
        };
        if changed {
            trace!(printer_id, visible, "visibility changed");
        }
        changed
    }

    pub fn admit(&mut self, frame: &Frame) -> Admission {
        let printer_id = frame.printer_id;
        if !self.visible.contains(&printer_id) {
            return Admission::NotVisible;
        }
        if !self.in_flight.insert(printer_id) {
            return Admission::Busy;
        }
        Admission::Accepted
    }

    /// Marks the source's outstanding decode as resolved.
    pub fn release(&mut self, printer_id: PrinterId) {
        self.in_flight.remove(&printer_id);
    }

    pub fn is_visible(&self, printer_id: PrinterId) -> bool {
        self.visible.contains(&printer_id)
    }

    pub fn is_in_flight(&self, printer_id: PrinterId) -> bool {
        self.in_flight.contains(&printer_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn visible_count(&self) -> usize {
        self.visible.len()
    }
}
