//! Node library for the Telar synthesis engine.
//!
//! Concrete [`Node`](telar_core::Node) implementations in three families:
//!
//! - **Audio** ([`audio`]): oscillators ([`SilenceNode`], [`SineNode`],
//!   [`SquareNode`], [`SawtoothNode`]) and sinks ([`PlaybackNode`],
//!   [`WavFileNode`])
//! - **Data** ([`data`]): literals and block utilities ([`DataNode`],
//!   [`StreamNode`], [`UniformRandomNode`], [`AddNode`], [`MultiplyNode`],
//!   [`DebugNode`], [`SequenceNode`])
//! - **MIDI** ([`midi`]): device input and message interpreters
//!   ([`MidiInputNode`], [`MonophonicRenderNode`], [`MidiTriggerNode`],
//!   [`MidiTranspositionNode`])
//!
//! All stream DSP is 32-bit float; oscillator phase accumulates in 64-bit to
//! keep long sessions drift-free.

pub mod audio;
pub mod data;
pub mod midi;

pub use audio::{PlaybackNode, SawtoothNode, SilenceNode, SineNode, SquareNode, WavFileNode};
pub use data::{
    AddNode, DataNode, DebugNode, MultiplyNode, SequenceNode, StreamNode, UniformRandomNode,
};
pub use midi::{MidiInputNode, MidiTranspositionNode, MidiTriggerNode, MonophonicRenderNode};

/// Type names of every node this library provides, for command-layer
/// listings and UIs.
pub fn node_types() -> &'static [&'static str] {
    &[
        "SilenceNode",
        "SineNode",
        "SquareNode",
        "SawtoothNode",
        "PlaybackNode",
        "WavFileNode",
        "DataNode",
        "StreamNode",
        "UniformRandomNode",
        "AddNode",
        "MultiplyNode",
        "DebugNode",
        "SequenceNode",
        "MidiInputNode",
        "MonophonicRenderNode",
        "MidiTriggerNode",
        "MidiTranspositionNode",
    ]
}

/// Maps a device-layer failure onto the graph error surface.
pub(crate) fn device_error(error: telar_io::Error) -> telar_core::Error {
    telar_core::Error::Device(error.to_string())
}
