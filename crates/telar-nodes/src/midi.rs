//! MIDI device input and message interpreters.
//!
//! Note numbering follows the MIDI specification: note-off is `0x80`,
//! note-on is `0x90` (see [`telar_core::midi`]).

use std::collections::BTreeMap;

use telar_core::midi::{is_note_off, is_note_on, note_key};
use telar_core::{
    Error, MidiBuffer, Node, NodeDescriptor, NodePorts, PortSpec, RenderContext, Result, Value,
};
use telar_io::MidiSource;

use crate::device_error;

/// Frequency in Hz of a MIDI note number (A4 = 69 = 440 Hz).
fn note_frequency(note: u8) -> f32 {
    (440.0 * 2f64.powf((f64::from(note) - 69.0) / 12.0)) as f32
}

/// Reads a hardware MIDI port into a per-block [`MidiBuffer`].
///
/// The `port` data input selects the device port; when it changes, the old
/// port is closed and the new one opened on the spot. Message timing
/// accumulates the inter-message deltas the driver reports and folds the
/// running time into a sample offset within the current block.
pub struct MidiInputNode {
    source: MidiSource,
    current_port: i64,
    /// Seconds of accumulated inter-message time since the port opened.
    accumulated_time: f64,
}

const MIDI_INPUT: NodeDescriptor = NodeDescriptor {
    type_name: "MidiInputNode",
    inputs: &[PortSpec::data("port")],
    outputs: &[PortSpec::midi("out")],
};

impl MidiInputNode {
    /// Opens device port 0.
    pub fn new() -> Result<Self> {
        Self::with_port(0)
    }

    /// Opens the given device port.
    pub fn with_port(port: usize) -> Result<Self> {
        let mut source = MidiSource::new().map_err(device_error)?;
        source.open_port(port).map_err(device_error)?;
        Ok(Self {
            source,
            current_port: port as i64,
            accumulated_time: 0.0,
        })
    }

    const PORT: usize = 0;
    const OUT: usize = 0;
}

impl Node for MidiInputNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &MIDI_INPUT
    }

    fn render(&mut self, ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        let requested = ports
            .read_data(Self::PORT, Value::Int(self.current_port))?
            .as_i64()
            .ok_or_else(|| Error::Argument("MIDI port index must be an integer".into()))?;
        if requested != self.current_port {
            let index = usize::try_from(requested)
                .map_err(|_| Error::Argument(format!("invalid MIDI port index {requested}")))?;
            self.source.open_port(index).map_err(device_error)?;
            self.current_port = requested;
            self.accumulated_time = 0.0;
        }

        let mut buffer = MidiBuffer::new(ctx.block_size);
        while let Some((message, dt)) = self.source.poll() {
            self.accumulated_time += dt;
            let offset =
                (self.accumulated_time * f64::from(ctx.sample_rate)) as usize % ctx.block_size;
            buffer.push(offset, message)?;
        }
        ports.write_midi(Self::OUT, buffer)
    }

    fn exports(&self) -> BTreeMap<String, Value> {
        let available = self
            .source
            .port_names()
            .unwrap_or_default()
            .into_iter()
            .map(Value::Str)
            .collect();
        let selected = self
            .source
            .open_port_index()
            .and_then(|index| self.source.port_name(index).ok())
            .map_or(Value::Null, Value::Str);
        BTreeMap::from([
            ("Available Ports".to_owned(), Value::List(available)),
            ("Selected Port".to_owned(), selected),
        ])
    }

    fn teardown(&mut self) {
        self.source.close_port();
    }
}

/// Renders a MIDI stream to a monophonic frequency stream.
///
/// Tracks the most recent held note; a note-off only releases when its key
/// matches. With no note held the output is 0.
#[derive(Debug, Default)]
pub struct MonophonicRenderNode {
    current_note: Option<u8>,
}

const MONOPHONIC: NodeDescriptor = NodeDescriptor {
    type_name: "MonophonicRenderNode",
    inputs: &[PortSpec::midi("midi")],
    outputs: &[PortSpec::stream("frequency")],
};

impl MonophonicRenderNode {
    /// Creates a monophonic note tracker with no note held.
    pub fn new() -> Self {
        Self::default()
    }

    const MIDI: usize = 0;
    const FREQUENCY: usize = 0;
}

impl Node for MonophonicRenderNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &MONOPHONIC
    }

    fn render(&mut self, ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        let midi = ports.read_midi(Self::MIDI)?;

        let mut out = vec![0.0f32; ctx.block_size];
        for (i, sample) in out.iter_mut().enumerate() {
            for message in midi.messages_at(i) {
                if is_note_on(message) {
                    self.current_note = note_key(message);
                } else if is_note_off(message) && note_key(message) == self.current_note {
                    self.current_note = None;
                }
            }
            *sample = self.current_note.map_or(0.0, note_frequency);
        }
        ports.write_stream(Self::FREQUENCY, out)
    }
}

/// Emits 1.0 at every sample offset carrying a note-on, 0.0 elsewhere.
#[derive(Debug, Default)]
pub struct MidiTriggerNode;

const TRIGGER: NodeDescriptor = NodeDescriptor {
    type_name: "MidiTriggerNode",
    inputs: &[PortSpec::midi("midi")],
    outputs: &[PortSpec::stream("trigger")],
};

impl MidiTriggerNode {
    /// Creates a note-on trigger extractor.
    pub fn new() -> Self {
        Self
    }

    const MIDI: usize = 0;
    const TRIGGER_OUT: usize = 0;
}

impl Node for MidiTriggerNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &TRIGGER
    }

    fn render(&mut self, ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        let midi = ports.read_midi(Self::MIDI)?;

        let mut out = vec![0.0f32; ctx.block_size];
        for (offset, message) in midi.iter() {
            if is_note_on(message) {
                out[offset] = 1.0;
            }
        }
        ports.write_stream(Self::TRIGGER_OUT, out)
    }
}

/// Shifts note keys by the `transposition` stream, in semitones.
///
/// Note-on/off messages are re-emitted with their key shifted by the
/// transposition value at their sample offset (clamped to the MIDI key
/// range); all other messages pass through untouched.
#[derive(Debug, Default)]
pub struct MidiTranspositionNode;

const TRANSPOSITION: NodeDescriptor = NodeDescriptor {
    type_name: "MidiTranspositionNode",
    inputs: &[PortSpec::midi("midi"), PortSpec::stream("transposition")],
    outputs: &[PortSpec::midi("out")],
};

impl MidiTranspositionNode {
    /// Creates a transposer.
    pub fn new() -> Self {
        Self
    }

    const MIDI: usize = 0;
    const TRANSPOSITION_IN: usize = 1;
    const OUT: usize = 0;
}

impl Node for MidiTranspositionNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &TRANSPOSITION
    }

    fn render(&mut self, ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        let midi = ports.read_midi(Self::MIDI)?;
        let transposition = ports.read_stream(Self::TRANSPOSITION_IN, 0.0)?;

        let mut out = MidiBuffer::new(ctx.block_size);
        for (offset, message) in midi.iter() {
            let mut message = message.clone();
            if (is_note_on(&message) || is_note_off(&message)) && message.len() >= 2 {
                let shift = transposition[offset] as i32;
                message[1] = (i32::from(message[1]) + shift).clamp(0, 127) as u8;
            }
            out.push(offset, message)?;
        }
        ports.write_midi(Self::OUT, out)
    }
}
