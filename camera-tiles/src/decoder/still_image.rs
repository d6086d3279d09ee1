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

//! Still-image decoding (JPEG, PNG) through the `image` crate.

use super::FrameDecoder;
use crate::error::DecodeError;
use crate::frame::Bitmap;
use image::{ImageReader, Limits};
use std::io::Cursor;

/// Camera snapshots larger than this in either dimension are rejected.
const MAX_DIMENSION: u32 = 8192;
/// Upper bound on decoder allocations per frame.
const MAX_ALLOC_BYTES: u64 = 256 * 1024 * 1024;

/// Decodes MJPEG-style still frames into RGBA bitmaps.
#[derive(Debug, Clone)]
pub struct ImageDecoder {
    limits: Limits,
}

impl ImageDecoder {
    pub fn new() -> Self {
        let mut limits = Limits::default();
        limits.max_image_width = Some(MAX_DIMENSION);
        limits.max_image_height = Some(MAX_DIMENSION);
        limits.max_alloc = Some(MAX_ALLOC_BYTES);
        Self { limits }
    }
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder for ImageDecoder {
    fn decode(&mut self, bytes: &[u8]) -> Result<Bitmap, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;
        if reader.format().is_none() {
            return Err(DecodeError::Malformed("unrecognised image format".to_string()));
        }
        reader.limits(self.limits.clone());
        let image = reader
            .decode()
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;
        Ok(Bitmap::new(image.into_rgba8()))
    }
}
