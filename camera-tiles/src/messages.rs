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

//! Message types crossing the host / worker boundary

use crate::error::{DecodeError, PipelineError};
use crate::frame::{Bitmap, PrinterId, Seq};
use serde::{Deserialize, Serialize};

/// Registration incarnation of a source. Bumped on every `register`.
pub type Generation = u64;

/// Messages delivered to the pipeline by the frame and visibility sources.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundMessage {
    /// A compressed frame for one camera.
    #[serde(rename_all = "camelCase")]
    Frame { printer_id: PrinterId, bytes: Vec<u8> },
    /// A tile entered or left the viewport.
    #[serde(rename_all = "camelCase")]
    Visibility { printer_id: PrinterId, visible: bool },
}

impl InboundMessage {
    /// Parses a JSON-encoded message, e.g.
    /// `{"type":"visibility","printerId":3,"visible":true}`.
    pub fn from_json(text: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(text).map_err(|e| PipelineError::ProtocolViolation(e.to_string()))
    }

    pub fn printer_id(&self) -> PrinterId {
        match self {
            InboundMessage::Frame { printer_id, .. } => *printer_id,
            InboundMessage::Visibility { printer_id, .. } => *printer_id,
        }
    }
}

/// Everything the host may ask of a pipeline running on its own loop.
#[derive(Debug)]
pub enum HostCommand {
    Register(PrinterId),
    Unregister(PrinterId),
    Inbound(InboundMessage),
    /// Inbound message still in its JSON wire form.
    Json(String),
}

/// A decode request handed to the worker pool.
#[derive(Debug)]
pub struct DecodeJob {
    pub printer_id: PrinterId,
    pub generation: Generation,
    pub seq: Seq,
    pub bytes: Vec<u8>,
}

/// Messages that can be sent to a decode worker thread
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Decode(DecodeJob),
    Shutdown,
}

/// The outcome of one decode job, sent back to the host context.
#[derive(Debug)]
pub struct DecodeResult {
    pub printer_id: PrinterId,
    pub generation: Generation,
    pub seq: Seq,
    pub outcome: Result<Bitmap, DecodeError>,
}
