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

//! A real-time multi-camera frame pipeline for live preview tiles.
//!
//! Compressed frames from many cameras arrive continuously. For each camera
//! the pipeline keeps at most one frame decoding at a time, decodes only for
//! tiles that are on screen, does all decoding on a worker pool, and never
//! lets a tile go back to an older image.
//!
//! ```text
//! frames ─▶ AdmissionGate ─▶ DecodeWorker pool ─▶ FrameSequencer ─▶ RenderSink
//!               ▲                                        ▲
//! visibility ───┴────────────────────────────────────────┘
//! ```

pub mod config;
pub mod decoder;
pub mod diagnostics;
pub mod error;
pub mod frame;
pub mod gate;
pub mod messages;
pub mod pipeline;
pub mod sequencer;
pub mod sink;
pub mod stats;

pub use config::PipelineConfig;
pub use decoder::{DecodeWorker, DecoderFactory, FrameDecoder, ImageDecoder};
pub use error::{DecodeError, DecodeFailure, PipelineError};
pub use frame::{Bitmap, DecodedFrame, Frame, PrinterId, RenderFrame, Seq};
pub use gate::{Admission, AdmissionGate};
pub use messages::{HostCommand, InboundMessage};
pub use pipeline::CameraPipeline;
pub use sequencer::{FrameSequencer, SequencerOutcome};
pub use sink::RenderSink;
pub use stats::{PipelineTotals, SourceStats, SourceStatus};
