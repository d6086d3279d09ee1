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

//! Diagnostics events describing the pipeline's per-source behaviour.
//!
//! Events are pushed onto a [`DiagnosticsBus`] that the host owns and hands
//! to the pipeline; there is no process-wide bus.

use crate::frame::PrinterId;
use flume::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

/// Subsystem tag carried by every event this crate emits.
pub const SUBSYSTEM: &str = "camera_tiles";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiagEvent {
    pub subsystem: String,
    /// Camera source the metrics describe, `None` for pipeline-wide events.
    pub printer_id: Option<PrinterId>,
    /// Unix time in milliseconds when the metrics were captured.
    pub ts_ms: u64,
    pub metrics: Vec<Metric>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum MetricValue {
    U64(u64),
    F64(f64),
    Bool(bool),
}

impl DiagEvent {
    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.iter().find(|m| m.name == name).map(|m| &m.value)
    }
}

/// Shorthand for constructing a [`Metric`].
#[macro_export]
macro_rules! metric {
    ($name:expr, $value:expr) => {
        $crate::diagnostics::Metric {
            name: ($name).to_string(),
            value: $crate::diagnostics::MetricValue::from($value),
        }
    };
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::U64(v)
    }
}
impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::F64(v)
    }
}
impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Bool(v)
    }
}

/// Bounded event channel. Publishing never blocks; when nobody drains the
/// bus, new events are dropped.
#[derive(Clone)]
pub struct DiagnosticsBus {
    sender: Sender<DiagEvent>,
    receiver: Receiver<DiagEvent>,
}

impl DiagnosticsBus {
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = flume::bounded(capacity);
        Self { sender, receiver }
    }

    /// Returns `false` if the event was dropped.
    pub fn publish(&self, event: DiagEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// A receiver for the events. Receivers compete: each event goes to one.
    pub fn subscribe(&self) -> Receiver<DiagEvent> {
        self.receiver.clone()
    }

    pub fn drain(&self) -> Vec<DiagEvent> {
        self.receiver.drain().collect()
    }
}

impl Default for DiagnosticsBus {
    fn default() -> Self {
        Self::bounded(256)
    }
}

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
