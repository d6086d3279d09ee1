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

//! The decode worker pool, built on `std::thread` and `flume` channels.

use super::{DecoderFactory, FrameDecoder};
use crate::error::{DecodeError, PipelineError, Result};
use crate::messages::{DecodeJob, DecodeResult, WorkerMessage};
use flume::{Receiver, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace, warn};

/// A pool of decode threads sharing one job queue.
///
/// Each thread builds its own decoder from the factory, so no decoder state is
/// shared between concurrent decodes. Jobs and results move through channels;
/// neither the compressed bytes nor the bitmap are ever copied.
pub struct DecodeWorker {
    sender: Sender<WorkerMessage>,
    threads: Vec<JoinHandle<()>>,
}

impl DecodeWorker {
    /// Starts `workers` decode threads. Every finished job, successful or not,
    /// is reported on `results`.
    pub fn spawn(
        workers: usize,
        factory: DecoderFactory,
        results: Sender<DecodeResult>,
    ) -> Result<Self> {
        if workers == 0 {
            return Err(PipelineError::InvalidConfig(
                "decode worker pool needs at least one thread".to_string(),
            ));
        }

        let (sender, receiver) = flume::unbounded();
        let mut pool = DecodeWorker {
            sender,
            threads: Vec::with_capacity(workers),
        };

        for index in 0..workers {
            let receiver = receiver.clone();
            let results = results.clone();
            let factory = factory.clone();
            // On error, dropping `pool` shuts down the threads already started.
            let handle = thread::Builder::new()
                .name(format!("decode-worker-{index}"))
                .spawn(move || worker_loop(index, factory, receiver, results))
                .map_err(|source| PipelineError::WorkerSpawn { index, source })?;
            pool.threads.push(handle);
        }

        debug!(workers, "decode worker pool started");
        Ok(pool)
    }

    /// Hands a job to the pool. Fire-and-forget: the outcome arrives later on
    /// the results channel. Returns `false` only if every worker is gone.
    pub fn submit(&self, job: DecodeJob) -> bool {
        match self.sender.send(WorkerMessage::Decode(job)) {
            Ok(()) => true,
            Err(e) => {
                if let WorkerMessage::Decode(job) = e.into_inner() {
                    error!(
                        printer_id = job.printer_id,
                        seq = job.seq,
                        "decode pool is down, dropping job"
                    );
                }
                false
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.threads.len()
    }

    /// Jobs submitted but not yet picked up by a thread.
    pub fn queued(&self) -> usize {
        self.sender.len()
    }
}

fn worker_loop(
    index: usize,
    factory: DecoderFactory,
    receiver: Receiver<WorkerMessage>,
    results: Sender<DecodeResult>,
) {
    let mut decoder = build_isolated(&factory, index).ok();

    while let Ok(message) = receiver.recv() {
        match message {
            WorkerMessage::Decode(job) => {
                let DecodeJob {
                    printer_id,
                    generation,
                    seq,
                    bytes,
                } = job;
                trace!(worker = index, printer_id, seq, len = bytes.len(), "decoding");

                // A missing decoder is rebuilt here, so a failing factory only
                // fails the job that needed it.
                let outcome = match decoder
                    .take()
                    .map_or_else(|| build_isolated(&factory, index), Ok)
                {
                    Ok(mut current) => {
                        let outcome = decode_isolated(current.as_mut(), &bytes);
                        if let Err(DecodeError::Panicked(_)) = &outcome {
                            warn!(worker = index, printer_id, seq, "decoder panicked, discarding it");
                        } else {
                            decoder = Some(current);
                        }
                        outcome
                    }
                    Err(error) => Err(error),
                };
                drop(bytes);

                let result = DecodeResult {
                    printer_id,
                    generation,
                    seq,
                    outcome,
                };
                if results.send(result).is_err() {
                    debug!(worker = index, "result channel closed, stopping");
                    break;
                }
            }
            WorkerMessage::Shutdown => {
                trace!(worker = index, "shutting down");
                break;
            }
        }
    }
}

fn build_isolated(
    factory: &DecoderFactory,
    index: usize,
) -> std::result::Result<Box<dyn FrameDecoder>, DecodeError> {
    panic::catch_unwind(AssertUnwindSafe(|| factory())).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        error!(worker = index, %message, "decoder factory panicked");
        DecodeError::Panicked(message)
    })
}

/// Runs one decode so that a panicking decoder only fails its own frame.
fn decode_isolated(
    decoder: &mut dyn FrameDecoder,
    bytes: &[u8],
) -> std::result::Result<crate::frame::Bitmap, DecodeError> {
    match panic::catch_unwind(AssertUnwindSafe(|| decoder.decode(bytes))) {
        Ok(outcome) => outcome,
        Err(payload) => Err(DecodeError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        debug!(workers = self.threads.len(), "stopping decode worker pool");
        for _ in 0..self.threads.len() {
            if self.sender.send(WorkerMessage::Shutdown).is_err() {
                break;
            }
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("decode worker thread panicked during shutdown");
            }
        }
    }
}
