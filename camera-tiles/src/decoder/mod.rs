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

//! The common interface for frame decoders, and the pool that runs them.

use crate::error::DecodeError;
use crate::frame::Bitmap;
use std::sync::Arc;

mod still_image;
mod worker;

pub use self::still_image::ImageDecoder;
pub use self::worker::DecodeWorker;

/// Turns one compressed frame into a bitmap.
///
/// Each decode worker thread owns its own instance, so implementations may
/// keep internal state without synchronisation. A decoder must report bad
/// input as an error; a panic is caught by the worker, reported as a failure
/// for that frame, and the decoder is rebuilt from its factory.
pub trait FrameDecoder: Send {
    fn decode(&mut self, bytes: &[u8]) -> Result<Bitmap, DecodeError>;
}

impl<F> FrameDecoder for F
where
    F: FnMut(&[u8]) -> Result<Bitmap, DecodeError> + Send,
{
    fn decode(&mut self, bytes: &[u8]) -> Result<Bitmap, DecodeError> {
        self(bytes)
    }
}

/// Builds a fresh decoder for a worker thread.
pub type DecoderFactory = Arc<dyn Fn() -> Box<dyn FrameDecoder> + Send + Sync>;

/// Factory for the default still-image decoder.
pub fn image_decoder_factory() -> DecoderFactory {
    Arc::new(|| Box::new(ImageDecoder::new()) as Box<dyn FrameDecoder>)
}
