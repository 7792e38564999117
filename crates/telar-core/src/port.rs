//! Typed ports and their per-block payloads.
//!
//! Ports come in three kinds: data (arbitrary [`Value`] literals), stream
//! (blocks of `f32` samples), and MIDI ([`MidiBuffer`]s). Inputs hold at most
//! one incoming connection; outputs fan out to any number of sinks. Payloads
//! written to an output are shared by reference when the graph propagates
//! them, so a block feeding several sinks is never duplicated. A node
//! must never mutate a block it did not produce, which `Arc<[f32]>` enforces
//! at the type level.

use std::sync::Arc;

use crate::connection::{InputRef, OutputRef};
use crate::midi::MidiBuffer;
use crate::value::Value;
use crate::{Error, Result};

/// The payload family a port carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortKind {
    /// Arbitrary literal values.
    Data,
    /// Blocks of single-precision samples.
    Stream,
    /// Sample-offset-indexed MIDI messages.
    Midi,
}

impl PortKind {
    /// Lowercase name used in JSON introspection.
    pub fn as_str(self) -> &'static str {
        match self {
            PortKind::Data => "data",
            PortKind::Stream => "stream",
            PortKind::Midi => "midi",
        }
    }
}

impl std::fmt::Display for PortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The buffered payload of a port.
///
/// `Empty` is the state before anything was written or propagated. Stream and
/// MIDI payloads are reference-counted so propagation across a connection is
/// a pointer copy.
#[derive(Clone, Debug, Default)]
pub enum Payload {
    /// Nothing has been written yet.
    #[default]
    Empty,
    /// A data literal.
    Data(Value),
    /// A block of samples.
    Stream(Arc<[f32]>),
    /// A block of MIDI messages.
    Midi(Arc<MidiBuffer>),
}

impl Payload {
    /// Whether two payloads refer to the same underlying buffer.
    ///
    /// Stream and MIDI payloads compare by pointer identity; data payloads by
    /// value. Used by the graph's block-boundary invariant checks.
    pub fn same_buffer(&self, other: &Payload) -> bool {
        match (self, other) {
            (Payload::Empty, Payload::Empty) => true,
            (Payload::Data(a), Payload::Data(b)) => a == b,
            (Payload::Stream(a), Payload::Stream(b)) => Arc::ptr_eq(a, b),
            (Payload::Midi(a), Payload::Midi(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Allocates a block of `length` samples all set to `fill`.
pub(crate) fn constant_block(length: usize, fill: f32) -> Arc<[f32]> {
    Arc::from(vec![fill; length])
}

/// An input endpoint on a node.
///
/// Holds at most one incoming connection. Reading an unconnected input
/// yields the caller-supplied default rather than failing.
#[derive(Debug)]
pub struct InputPort {
    name: &'static str,
    kind: PortKind,
    pub(crate) payload: Payload,
    pub(crate) source: Option<OutputRef>,
}

impl InputPort {
    pub(crate) fn new(name: &'static str, kind: PortKind) -> Self {
        Self {
            name,
            kind,
            payload: Payload::Empty,
            source: None,
        }
    }

    /// The port's name within its node.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The payload family this port accepts.
    pub fn kind(&self) -> PortKind {
        self.kind
    }

    /// The source output currently feeding this input, if any.
    pub fn source(&self) -> Option<OutputRef> {
        self.source
    }

    /// Whether a connection currently feeds this input.
    pub fn is_connected(&self) -> bool {
        self.source.is_some()
    }

    /// The buffered payload as last written or propagated.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Reads a data literal, falling back to `default` when nothing has been
    /// written.
    pub fn read_data(&self, default: Value) -> Value {
        match &self.payload {
            Payload::Data(value) => value.clone(),
            _ => default,
        }
    }

    /// Reads a stream block of `block_size` samples.
    ///
    /// An unconnected input materializes a fresh block filled with
    /// `default_constant`. A scalar payload (a data literal propagated through
    /// a coercing path) is broadcast to block length. A proper stream payload
    /// is returned as-is, sharing the producer's buffer.
    pub fn read_stream(&self, block_size: usize, default_constant: f32) -> Result<Arc<[f32]>> {
        if self.source.is_none() {
            return Ok(constant_block(block_size, default_constant));
        }
        match &self.payload {
            Payload::Stream(block) => {
                debug_assert_eq!(block.len(), block_size, "stream block length mismatch");
                Ok(Arc::clone(block))
            }
            Payload::Data(value) => {
                let fill = value.as_f32().ok_or_else(|| {
                    Error::Argument(format!(
                        "cannot broadcast {} value into stream port '{}'",
                        value.type_name(),
                        self.name
                    ))
                })?;
                Ok(constant_block(block_size, fill))
            }
            Payload::Empty => Ok(constant_block(block_size, default_constant)),
            Payload::Midi(_) => Err(Error::Argument(format!(
                "midi payload in stream port '{}'",
                self.name
            ))),
        }
    }

    /// Reads a MIDI buffer, yielding an empty block-length buffer when
    /// nothing has arrived.
    pub fn read_midi(&self, block_size: usize) -> Arc<MidiBuffer> {
        match &self.payload {
            Payload::Midi(buffer) => Arc::clone(buffer),
            _ => Arc::new(MidiBuffer::new(block_size)),
        }
    }
}

/// An output endpoint on a node.
///
/// Fans out to any number of sinks; the graph copies the payload reference to
/// each connected input after the owning node renders.
#[derive(Debug)]
pub struct OutputPort {
    name: &'static str,
    kind: PortKind,
    pub(crate) payload: Payload,
    pub(crate) sinks: Vec<InputRef>,
}

impl OutputPort {
    pub(crate) fn new(name: &'static str, kind: PortKind) -> Self {
        Self {
            name,
            kind,
            payload: Payload::Empty,
            sinks: Vec::new(),
        }
    }

    /// The port's name within its node.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The payload family this port produces.
    pub fn kind(&self) -> PortKind {
        self.kind
    }

    /// The inputs currently fed by this output.
    pub fn sinks(&self) -> &[InputRef] {
        &self.sinks
    }

    /// The payload most recently written.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Stores a data literal.
    pub fn write_data(&mut self, value: Value) {
        self.payload = Payload::Data(value);
    }

    /// Stores a stream block.
    pub fn write_stream(&mut self, block: Arc<[f32]>) {
        self.payload = Payload::Stream(block);
    }

    /// Stores a MIDI buffer.
    pub fn write_midi(&mut self, buffer: Arc<MidiBuffer>) {
        self.payload = Payload::Midi(buffer);
    }
}
