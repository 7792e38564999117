//! Device layer for the Telar synthesis engine.
//!
//! This crate wraps the external collaborators the graph core talks to:
//!
//! - **Audio output**: [`AudioOutput`] owns a cpal stream on a dedicated
//!   thread and drains a [`BlockQueue`](telar_core::BlockQueue) from the
//!   device's pull callback
//! - **WAV files**: [`WavSink`] appends mono float32 blocks via hound
//! - **MIDI input**: [`MidiSource`] exposes midir ports through a
//!   non-blocking poll interface
//!
//! Everything here is driven by the node library; the graph core itself has
//! no device dependencies.

mod midi_in;
mod output;
mod wav;

pub use midi_in::MidiSource;
pub use output::AudioOutput;
pub use wav::WavSink;

/// Error types for device operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV file read/write error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Audio stream setup or runtime error.
    #[error("audio stream error: {0}")]
    Stream(String),

    /// No audio output device available on the system.
    #[error("no audio output device available")]
    NoDevice,

    /// MIDI subsystem could not be initialized.
    #[error("MIDI init error: {0}")]
    MidiInit(#[from] midir::InitError),

    /// A MIDI port could not be opened or enumerated.
    #[error("MIDI port error: {0}")]
    MidiPort(String),

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for device operations.
pub type Result<T> = std::result::Result<T, Error>;
