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

//! Where accepted frames end up.

use crate::frame::RenderFrame;
use flume::Sender;
use tracing::debug;

/// Draws accepted frames. Receiving a [`RenderFrame`] transfers ownership of
/// its bitmap; the sink disposes of it by dropping it once drawn.
///
/// Called from whatever context drains decode results, which may be a
/// dedicated pipeline thread, hence `Send`.
pub trait RenderSink: Send {
    fn render(&mut self, frame: RenderFrame);
}

impl<F> RenderSink for F
where
    F: FnMut(RenderFrame) + Send,
{
    fn render(&mut self, frame: RenderFrame) {
        self(frame)
    }
}

/// Forwards frames to another thread, typically the UI thread.
impl RenderSink for Sender<RenderFrame> {
    fn render(&mut self, frame: RenderFrame) {
        if let Err(e) = self.send(frame) {
            let frame = e.into_inner();
            debug!(
                printer_id = frame.printer_id,
                seq = frame.seq,
                "render receiver gone, disposing frame"
            );
        }
    }
}
