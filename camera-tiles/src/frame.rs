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

//! Contains the fundamental data structures for camera frames.

use image::RgbaImage;
use std::fmt;

/// Stable identifier of one camera source (one printer, one tile).
pub type PrinterId = u32;

/// Per-source frame counter. Real frames start at 1, so 0 sits below any of them.
pub type Seq = u64;

/// The `lastRenderedSeq` of a freshly registered source.
pub const INITIAL_SEQ: Seq = 0;

/// A raw, compressed frame as it arrived from the frame source, stamped with
/// its per-source sequence number.
///
/// Frames are not `Clone`: each one is consumed at most once, by the
/// admission decision and, if admitted, by a decode worker.
#[derive(Debug)]
pub struct Frame {
    pub printer_id: PrinterId,
    pub seq: Seq,
    pub bytes: Vec<u8>,
}

impl Frame {
    pub fn new(printer_id: PrinterId, seq: Seq, bytes: Vec<u8>) -> Self {
        Self {
            printer_id,
            seq,
            bytes,
        }
    }
}

/// A decoded, drawable RGBA image.
///
/// A `Bitmap` has exactly one owner at a time and cannot be cloned. Moving it
/// is the ownership handoff between worker, sequencer and render sink;
/// dropping it is disposal.
pub struct Bitmap {
    image: RgbaImage,
}

impl Bitmap {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Raw RGBA8 pixel data, row major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Explicitly releases the pixel memory.
    pub fn dispose(self) {
        drop(self);
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// A successfully decoded frame on its way to the sequencer.
#[derive(Debug)]
pub struct DecodedFrame {
    pub printer_id: PrinterId,
    pub seq: Seq,
    pub bitmap: Bitmap,
}

/// What the render sink receives for an accepted frame.
#[derive(Debug)]
pub struct RenderFrame {
    pub printer_id: PrinterId,
    pub seq: Seq,
    pub bitmap: Bitmap,
}
