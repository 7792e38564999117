//! Real-time audio output via cpal.
//!
//! cpal streams are not `Send`, so [`AudioOutput`] spawns a dedicated thread
//! that builds and owns the stream; the handle itself stays movable and lives
//! inside a playback node on the render thread. Construction is synchronous:
//! the spawned thread reports success or failure back over a channel before
//! `open` returns, so a missing device surfaces as an error where the node is
//! built.
//!
//! The device pull callback never blocks and never allocates: it pops at most
//! one finished block per invocation, copies it into the device buffer, and
//! acknowledges it so the render loop's barrier can release. An empty queue
//! is an underrun: counted, zero-filled, and logged.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use telar_core::BlockQueue;

use crate::{Error, Result};

/// Blocks buffered ahead of the device; the barrier keeps the real depth
/// near one.
const QUEUE_CAPACITY: usize = 8;

/// A stereo float32 output stream fed from a [`BlockQueue`].
pub struct AudioOutput {
    queue: Arc<BlockQueue>,
    device_name: String,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AudioOutput {
    /// Opens the default output device at the given session parameters.
    ///
    /// The stream runs with two channels and a fixed buffer of `block_size`
    /// frames. Fails with [`Error::NoDevice`] when the system has no output
    /// device, or [`Error::Stream`] when the stream cannot be built.
    pub fn open(sample_rate: u32, block_size: usize) -> Result<Self> {
        let queue = Arc::new(BlockQueue::with_capacity(QUEUE_CAPACITY));
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_queue = Arc::clone(&queue);
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("telar-audio-out".into())
            .spawn(move || {
                match build_stream(sample_rate, block_size, &thread_queue) {
                    Ok((stream, device_name)) => {
                        let _ = ready_tx.send(Ok(device_name));
                        // Keep the stream alive until close(); it is dropped
                        // (and thereby stopped) when this thread exits.
                        while !thread_stop.load(Ordering::SeqCst) {
                            std::thread::sleep(Duration::from_millis(10));
                        }
                        drop(stream);
                    }
                    Err(error) => {
                        let _ = ready_tx.send(Err(error));
                    }
                }
            })
            .map_err(|e| Error::Stream(format!("failed to spawn audio thread: {e}")))?;

        let device_name = ready_rx
            .recv()
            .map_err(|_| Error::Stream("audio output thread died during startup".into()))??;

        Ok(Self {
            queue,
            device_name,
            stop,
            thread: Some(thread),
        })
    }

    /// The queue the render thread pushes finished blocks into.
    pub fn queue(&self) -> Arc<BlockQueue> {
        Arc::clone(&self.queue)
    }

    /// Name of the device the stream was opened on.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Number of callback invocations that found the queue empty.
    pub fn underruns(&self) -> u64 {
        self.queue.underruns()
    }

    /// Stops the stream and releases the device.
    ///
    /// Closes the queue first so a render loop parked on the barrier wakes
    /// up. Idempotent.
    pub fn close(&mut self) {
        self.queue.close();
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream(
    sample_rate: u32,
    block_size: usize,
    queue: &Arc<BlockQueue>,
) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(Error::NoDevice)?;
    let device_name = device.name().unwrap_or_else(|_| "unknown".into());

    let config = cpal::StreamConfig {
        channels: 2,
        sample_rate,
        buffer_size: cpal::BufferSize::Fixed(block_size as u32),
    };

    let callback_queue = Arc::clone(queue);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                match callback_queue.pop() {
                    Some(block) => {
                        let len = data.len().min(block.len());
                        data[..len].copy_from_slice(&block[..len]);
                        data[len..].fill(0.0);
                        callback_queue.task_done();
                    }
                    None => {
                        data.fill(0.0);
                        callback_queue.record_underrun();
                        tracing::warn!(
                            underruns = callback_queue.underruns(),
                            "playback queue empty"
                        );
                    }
                }
            },
            |err| tracing::warn!(%err, "output stream error"),
            None,
        )
        .map_err(|e| Error::Stream(e.to_string()))?;

    stream.play().map_err(|e| Error::Stream(e.to_string()))?;
    tracing::info!(
        device = %device_name,
        sample_rate,
        block_size,
        "output stream started"
    );
    Ok((stream, device_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_smoke() {
        // Device availability depends on the machine; either outcome is
        // fine, but an opened stream must report a device and close cleanly.
        match AudioOutput::open(44100, 256) {
            Ok(mut output) => {
                assert!(!output.device_name().is_empty());
                assert_eq!(output.underruns(), output.queue().underruns());
                output.close();
                output.close();
            }
            Err(error) => {
                assert!(matches!(error, Error::NoDevice | Error::Stream(_)));
            }
        }
    }
}
