//! Literal sources and block utilities.

use std::collections::BTreeMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use telar_core::{
    Error, Node, NodeDescriptor, NodePorts, PortSpec, RenderContext, Result, Value,
};

/// Holds a literal and writes it to its data output every tick.
#[derive(Debug)]
pub struct DataNode {
    value: Value,
}

const DATA: NodeDescriptor = NodeDescriptor {
    type_name: "DataNode",
    inputs: &[],
    outputs: &[PortSpec::data("out")],
};

impl DataNode {
    /// Creates a literal source.
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// The held literal.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Replaces the held literal; takes effect on the next tick.
    pub fn set_value(&mut self, value: impl Into<Value>) {
        self.value = value.into();
    }

    const OUT: usize = 0;
}

impl Node for DataNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &DATA
    }

    fn render(&mut self, _ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        ports.write_data(Self::OUT, self.value.clone())
    }

    fn exports(&self) -> BTreeMap<String, Value> {
        BTreeMap::from([("Value".to_owned(), self.value.clone())])
    }
}

/// Broadcasts a data literal into a constant stream block.
#[derive(Debug, Default)]
pub struct StreamNode;

const STREAM: NodeDescriptor = NodeDescriptor {
    type_name: "StreamNode",
    inputs: &[PortSpec::data("data")],
    outputs: &[PortSpec::stream("out")],
};

impl StreamNode {
    /// Creates a data-to-stream coercion node.
    pub fn new() -> Self {
        Self
    }

    const DATA: usize = 0;
    const OUT: usize = 0;
}

impl Node for StreamNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &STREAM
    }

    fn render(&mut self, ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        let value = ports.read_data(Self::DATA, Value::Float(0.0))?;
        let fill = value.as_f32().ok_or_else(|| {
            Error::Argument(format!(
                "cannot broadcast {} value into a stream",
                value.type_name()
            ))
        })?;
        ports.write_stream(Self::OUT, vec![fill; ctx.block_size])
    }
}

/// Uniform noise between per-block bounds.
///
/// `min` and `max` latch at sample 0 of the block (per-block controls, not
/// per-sample); unconnected they default to 0 and 1. Each output sample is an
/// independent draw from `[min, max)`.
#[derive(Debug)]
pub struct UniformRandomNode {
    rng: SmallRng,
}

const UNIFORM_RANDOM: NodeDescriptor = NodeDescriptor {
    type_name: "UniformRandomNode",
    inputs: &[PortSpec::stream("min"), PortSpec::stream("max")],
    outputs: &[PortSpec::stream("out")],
};

impl UniformRandomNode {
    /// Creates a noise source seeded from the operating system.
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_os_rng(),
        }
    }

    /// Creates a noise source with a fixed seed, for reproducible output.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    const MIN: usize = 0;
    const MAX: usize = 1;
    const OUT: usize = 0;
}

impl Default for UniformRandomNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Node for UniformRandomNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &UNIFORM_RANDOM
    }

    fn render(&mut self, ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        let low = ports.read_stream(Self::MIN, 0.0)?[0];
        let high = ports.read_stream(Self::MAX, 1.0)?[0];

        let out: Vec<f32> = if high > low {
            (0..ctx.block_size)
                .map(|_| self.rng.random_range(low..high))
                .collect()
        } else {
            // Degenerate or inverted bounds collapse to the lower edge.
            vec![low; ctx.block_size]
        };
        ports.write_stream(Self::OUT, out)
    }
}

/// Pointwise sum of two streams.
#[derive(Debug, Default)]
pub struct AddNode;

const ADD: NodeDescriptor = NodeDescriptor {
    type_name: "AddNode",
    inputs: &[PortSpec::stream("a"), PortSpec::stream("b")],
    outputs: &[PortSpec::stream("out")],
};

impl AddNode {
    /// Creates an adder.
    pub fn new() -> Self {
        Self
    }

    const A: usize = 0;
    const B: usize = 1;
    const OUT: usize = 0;
}

impl Node for AddNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &ADD
    }

    fn render(&mut self, _ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        let a = ports.read_stream(Self::A, 0.0)?;
        let b = ports.read_stream(Self::B, 0.0)?;
        let out: Vec<f32> = a.iter().zip(b.iter()).map(|(x, y)| x + y).collect();
        ports.write_stream(Self::OUT, out)
    }
}

/// Pointwise product of two streams.
#[derive(Debug, Default)]
pub struct MultiplyNode;

const MULTIPLY: NodeDescriptor = NodeDescriptor {
    type_name: "MultiplyNode",
    inputs: &[PortSpec::stream("a"), PortSpec::stream("b")],
    outputs: &[PortSpec::stream("out")],
};

impl MultiplyNode {
    /// Creates a multiplier.
    pub fn new() -> Self {
        Self
    }

    const A: usize = 0;
    const B: usize = 1;
    const OUT: usize = 0;
}

impl Node for MultiplyNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &MULTIPLY
    }

    fn render(&mut self, _ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        let a = ports.read_stream(Self::A, 0.0)?;
        let b = ports.read_stream(Self::B, 0.0)?;
        let out: Vec<f32> = a.iter().zip(b.iter()).map(|(x, y)| x * y).collect();
        ports.write_stream(Self::OUT, out)
    }
}

/// Logs whatever is connected to it.
///
/// Carries one input per payload family the log can show; unconnected inputs
/// are skipped, so an idle DebugNode costs nothing.
#[derive(Debug, Default)]
pub struct DebugNode;

const DEBUG: NodeDescriptor = NodeDescriptor {
    type_name: "DebugNode",
    inputs: &[PortSpec::data("data"), PortSpec::stream("stream")],
    outputs: &[],
};

impl DebugNode {
    /// Creates a debug probe.
    pub fn new() -> Self {
        Self
    }

    const DATA: usize = 0;
    const STREAM: usize = 1;
}

impl Node for DebugNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &DEBUG
    }

    fn render(&mut self, ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        if ports.is_connected(Self::DATA) {
            let value = ports.read_data(Self::DATA, Value::Null)?;
            tracing::info!(clock = ctx.global_clock, value = %value, "debug data");
        }
        if ports.is_connected(Self::STREAM) {
            let block = ports.read_stream(Self::STREAM, 0.0)?;
            let head = &block[..block.len().min(8)];
            tracing::info!(clock = ctx.global_clock, ?head, len = block.len(), "debug stream");
        }
        Ok(())
    }
}

/// Steps through a list, advancing on a trigger stream.
///
/// `sequence` is a data list; `position` starts at 0 and advances by one for
/// every truthy (non-zero) sample of `step`, wrapping at the end of the
/// list. Each output sample is the element at the current position. An empty
/// sequence renders silence and holds position.
#[derive(Debug, Default)]
pub struct SequenceNode {
    position: usize,
}

const SEQUENCE: NodeDescriptor = NodeDescriptor {
    type_name: "SequenceNode",
    inputs: &[PortSpec::data("sequence"), PortSpec::stream("step")],
    outputs: &[PortSpec::stream("out")],
};

impl SequenceNode {
    /// Creates a sequencer at position 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current position in the sequence.
    pub fn position(&self) -> usize {
        self.position
    }

    const SEQUENCE_IN: usize = 0;
    const STEP: usize = 1;
    const OUT: usize = 0;
}

impl Node for SequenceNode {
    fn descriptor(&self) -> &'static NodeDescriptor {
        &SEQUENCE
    }

    fn render(&mut self, ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
        let sequence = ports.read_data(Self::SEQUENCE_IN, Value::List(Vec::new()))?;
        let items = sequence.as_list().ok_or_else(|| {
            Error::Argument(format!(
                "sequence input must be a list, got {}",
                sequence.type_name()
            ))
        })?;
        let step = ports.read_stream(Self::STEP, 0.0)?;

        if items.is_empty() {
            return ports.write_stream(Self::OUT, vec![0.0; ctx.block_size]);
        }
        // The list may have shrunk since the last tick.
        self.position %= items.len();

        let mut out = vec![0.0f32; ctx.block_size];
        for (i, sample) in out.iter_mut().enumerate() {
            if step[i] != 0.0 {
                self.position = (self.position + 1) % items.len();
            }
            *sample = items[self.position].as_f32().ok_or_else(|| {
                Error::Argument(format!(
                    "sequence element {} is not numeric",
                    self.position
                ))
            })?;
        }
        ports.write_stream(Self::OUT, out)
    }
}
