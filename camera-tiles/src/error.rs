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

use crate::frame::{PrinterId, Seq};
use thiserror::Error;

/// Result type for pipeline setup operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced while building or configuring a pipeline.
///
/// The frame path itself never returns these; per-frame problems are
/// counted and dropped.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read config file {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("Failed to spawn decode worker {index}: {source}")]
    WorkerSpawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
}

/// A single frame could not be turned into a bitmap.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Empty frame payload")]
    Empty,

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Decoder panicked: {0}")]
    Panicked(String),
}

/// A decode failure tagged with the frame it belongs to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("printer {printer_id} frame {seq}: {error}")]
pub struct DecodeFailure {
    pub printer_id: PrinterId,
    pub seq: Seq,
    #[source]
    pub error: DecodeError,
}
