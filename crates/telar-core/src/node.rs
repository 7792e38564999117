//! The node contract: static port shape, render hook, lifecycle.
//!
//! A node type declares its ports once, as data, in a [`NodeDescriptor`]; the
//! graph instantiates the ports when the node is added. Each tick the graph
//! calls [`Node::render`] with a [`RenderContext`] and a [`NodePorts`] view of
//! the node's own ports. Nodes address their ports by constant index into the
//! descriptor table, which keeps the hot path free of string lookups.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::midi::MidiBuffer;
use crate::port::{InputPort, OutputPort, PortKind};
use crate::value::Value;
use crate::{Error, Result};

/// Declaration of one port: its name and payload kind.
///
/// Direction comes from which descriptor list the spec sits in.
#[derive(Debug, Clone, Copy)]
pub struct PortSpec {
    /// Port name, unique within the node.
    pub name: &'static str,
    /// Payload family.
    pub kind: PortKind,
}

impl PortSpec {
    /// Declares a data port.
    pub const fn data(name: &'static str) -> Self {
        Self {
            name,
            kind: PortKind::Data,
        }
    }

    /// Declares a stream port.
    pub const fn stream(name: &'static str) -> Self {
        Self {
            name,
            kind: PortKind::Stream,
        }
    }

    /// Declares a MIDI port.
    pub const fn midi(name: &'static str) -> Self {
        Self {
            name,
            kind: PortKind::Midi,
        }
    }
}

/// Static description of a node type: its name and port shape.
///
/// The shape is a property of the type, not the instance; implementations
/// return a `&'static` descriptor from [`Node::descriptor`].
#[derive(Debug, Clone, Copy)]
pub struct NodeDescriptor {
    /// Type name reported through introspection (e.g. `"SineNode"`).
    pub type_name: &'static str,
    /// Input ports in declaration order.
    pub inputs: &'static [PortSpec],
    /// Output ports in declaration order.
    pub outputs: &'static [PortSpec],
}

/// Per-block state passed to every render call.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext {
    /// Monotonically increasing tick counter, starting at 0.
    pub global_clock: u64,
    /// Sample rate in Hz, fixed for the session.
    pub sample_rate: u32,
    /// Samples per block, fixed for the session.
    pub block_size: usize,
}

/// A signal-processing node in the graph.
///
/// Implementations declare their port shape through [`descriptor`]
/// (Self::descriptor) and do their per-block work in [`render`](Self::render).
/// Node state is owned by the implementation and only ever touched from the
/// render thread.
pub trait Node: Send {
    /// The static port table for this node type.
    fn descriptor(&self) -> &'static NodeDescriptor;

    /// Produces one block of output from the current inputs.
    ///
    /// Errors are logged by the graph and do not abort the tick; the node's
    /// outputs keep their previous payloads.
    fn render(&mut self, ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()>;

    /// Free-form introspection values shown by UIs and the JSON view.
    fn exports(&self) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    /// Called once when the node is removed from the graph or the engine
    /// shuts down. Close files and device handles here.
    fn teardown(&mut self) {}
}

/// Render-time view of a node's own ports.
///
/// Handed to [`Node::render`]; all accessors address ports by index into the
/// node's descriptor table. Reads on unconnected inputs yield defaults,
/// writes validate block length against the session block size.
pub struct NodePorts<'a> {
    inputs: &'a mut [InputPort],
    outputs: &'a mut [OutputPort],
    block_size: usize,
}

impl<'a> NodePorts<'a> {
    pub(crate) fn new(
        inputs: &'a mut [InputPort],
        outputs: &'a mut [OutputPort],
        block_size: usize,
    ) -> Self {
        Self {
            inputs,
            outputs,
            block_size,
        }
    }

    /// Samples per block for this session.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Whether the given input currently has a connection.
    pub fn is_connected(&self, input: usize) -> bool {
        self.inputs.get(input).is_some_and(InputPort::is_connected)
    }

    fn input(&self, index: usize) -> Result<&InputPort> {
        self.inputs
            .get(index)
            .ok_or_else(|| Error::PortNotFound(format!("input #{index}")))
    }

    fn output_mut(&mut self, index: usize) -> Result<&mut OutputPort> {
        self.outputs
            .get_mut(index)
            .ok_or_else(|| Error::PortNotFound(format!("output #{index}")))
    }

    /// Reads a data literal from an input, with `default` for the
    /// unconnected/unwritten case.
    pub fn read_data(&self, input: usize, default: Value) -> Result<Value> {
        let port = self.input(input)?;
        if port.kind() != PortKind::Data {
            return Err(Error::Argument(format!(
                "port '{}' is not a data input",
                port.name()
            )));
        }
        Ok(port.read_data(default))
    }

    /// Reads a block of samples from a stream input.
    ///
    /// An unconnected input yields a constant block of `default_constant`.
    pub fn read_stream(&self, input: usize, default_constant: f32) -> Result<Arc<[f32]>> {
        let port = self.input(input)?;
        if port.kind() != PortKind::Stream {
            return Err(Error::Argument(format!(
                "port '{}' is not a stream input",
                port.name()
            )));
        }
        port.read_stream(self.block_size, default_constant)
    }

    /// Reads a MIDI buffer from a MIDI input; empty when unconnected.
    pub fn read_midi(&self, input: usize) -> Result<Arc<MidiBuffer>> {
        let port = self.input(input)?;
        if port.kind() != PortKind::Midi {
            return Err(Error::Argument(format!(
                "port '{}' is not a midi input",
                port.name()
            )));
        }
        Ok(port.read_midi(self.block_size))
    }

    /// Stores a data literal on an output.
    pub fn write_data(&mut self, output: usize, value: Value) -> Result<()> {
        let port = self.output_mut(output)?;
        if port.kind() != PortKind::Data {
            return Err(Error::Argument(format!(
                "port '{}' is not a data output",
                port.name()
            )));
        }
        port.write_data(value);
        Ok(())
    }

    /// Stores a block of samples on a stream output.
    ///
    /// The block length must equal the session block size.
    pub fn write_stream(&mut self, output: usize, block: impl Into<Arc<[f32]>>) -> Result<()> {
        let block = block.into();
        if block.len() != self.block_size {
            return Err(Error::Argument(format!(
                "stream block length {} does not match block size {}",
                block.len(),
                self.block_size
            )));
        }
        let port = self.output_mut(output)?;
        if port.kind() != PortKind::Stream {
            return Err(Error::Argument(format!(
                "port '{}' is not a stream output",
                port.name()
            )));
        }
        port.write_stream(block);
        Ok(())
    }

    /// Stores a MIDI buffer on a MIDI output.
    pub fn write_midi(&mut self, output: usize, buffer: MidiBuffer) -> Result<()> {
        if buffer.length() != self.block_size {
            return Err(Error::Argument(format!(
                "midi buffer length {} does not match block size {}",
                buffer.length(),
                self.block_size
            )));
        }
        let port = self.output_mut(output)?;
        if port.kind() != PortKind::Midi {
            return Err(Error::Argument(format!(
                "port '{}' is not a midi output",
                port.name()
            )));
        }
        port.write_midi(Arc::new(buffer));
        Ok(())
    }
}

/// Builds the port instances a descriptor declares.
pub(crate) fn instantiate_ports(
    descriptor: &NodeDescriptor,
) -> Result<(Vec<InputPort>, Vec<OutputPort>)> {
    let mut seen: Vec<&str> = Vec::new();
    for spec in descriptor.inputs.iter().chain(descriptor.outputs) {
        if seen.contains(&spec.name) {
            return Err(Error::Argument(format!(
                "duplicate port name '{}' on node type {}",
                spec.name, descriptor.type_name
            )));
        }
        seen.push(spec.name);
    }

    let inputs = descriptor
        .inputs
        .iter()
        .map(|spec| InputPort::new(spec.name, spec.kind))
        .collect();
    let outputs = descriptor
        .outputs
        .iter()
        .map(|spec| OutputPort::new(spec.name, spec.kind))
        .collect();
    Ok((inputs, outputs))
}
