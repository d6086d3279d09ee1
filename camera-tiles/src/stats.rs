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

//! Per-source and pipeline-wide counters.

use crate::frame::Seq;
use serde::{Deserialize, Serialize};

/// Counters for one camera source, reset when it re-registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub frames_received: u64,
    pub admitted: u64,
    pub dropped_not_visible: u64,
    pub dropped_busy: u64,
    pub decode_failures: u64,
    /// Failures since the last rendered frame.
    pub consecutive_failures: u64,
    pub stale_discarded: u64,
    pub invisible_discarded: u64,
    pub rendered: u64,
}

impl SourceStats {
    /// Frames that never reached the screen, for whatever reason.
    pub fn dropped(&self) -> u64 {
        self.dropped_not_visible
            + self.dropped_busy
            + self.decode_failures
            + self.stale_discarded
            + self.invisible_discarded
    }
}

/// Totals across every source the pipeline has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTotals {
    pub frames_received: u64,
    pub decodes_started: u64,
    pub decode_failures: u64,
    pub rendered: u64,
    pub discarded: u64,
    /// Results that arrived for sources no longer registered.
    pub orphaned_results: u64,
    pub protocol_violations: u64,
}

/// Point-in-time view of one source, as reported by `CameraPipeline::status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub visible: bool,
    pub in_flight: bool,
    pub last_rendered_seq: Seq,
    /// Whether any frame has rendered since registration.
    pub has_frames: bool,
    /// `None` until the first frame renders.
    pub seconds_since_frame: Option<f64>,
    pub uptime_secs: f64,
    /// Visible, past its start-up grace period, and no frame rendered recently.
    pub stalled: bool,
    /// Most recent decode failure, cleared when a frame renders.
    pub last_error: Option<String>,
    pub stats: SourceStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_sums_every_discard_reason() {
        let stats = SourceStats {
            frames_received: 20,
            admitted: 9,
            dropped_not_visible: 5,
            dropped_busy: 6,
            decode_failures: 2,
            consecutive_failures: 1,
            stale_discarded: 1,
            invisible_discarded: 3,
            rendered: 3,
        };
        assert_eq!(stats.dropped(), 17);
        assert_eq!(stats.dropped() + stats.rendered, stats.frames_received);
    }
}
