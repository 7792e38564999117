//! Telar Core - graph evaluation engine for modular audio synthesis.
//!
//! A patch is a directed acyclic graph of named nodes connected through typed
//! ports. Once per tick the engine evaluates the graph in topological order,
//! producing one block of audio per output, and hands finished blocks to the
//! playback layer through bounded block-sync queues.
//!
//! # Core Abstractions
//!
//! - [`Graph`] - node and connection registry plus the per-tick evaluator
//! - [`Engine`] - render-thread lifecycle around a shared [`Graph`]
//! - [`Node`] - contract every signal-processing node implements
//! - [`InputPort`] / [`OutputPort`] - typed endpoints carrying per-block payloads
//! - [`Value`] - dynamic payload for data ports
//! - [`MidiBuffer`] - sample-offset-indexed raw MIDI messages
//! - [`BlockQueue`] - bounded queue coupling the render loop to the device
//!   callback
//!
//! # Threading Model
//!
//! Three threads cooperate: a control thread issues graph mutations, the
//! render thread evaluates the graph, and the audio callback thread drains
//! block queues. The graph lives behind one exclusive lock taken per tick, so
//! every mutation lands on a tick boundary and the render pass always sees a
//! consistent snapshot. The audio callback never blocks and never allocates;
//! it pops at most one ready block per invocation.
//!
//! # Example
//!
//! ```rust,ignore
//! use telar_core::{Engine, Graph};
//!
//! let mut engine = Engine::new(44100, 256);
//! engine.with_graph(|graph| {
//!     graph.add_node("osc", Box::new(SineNode::new()))?;
//!     graph.add_node("out", Box::new(PlaybackNode::new(graph)?))?;
//!     let src = graph.output_ref("osc", "out")?;
//!     let dst = graph.input_ref("out", "left")?;
//!     graph.add_connection(src, dst)?;
//!     Ok::<_, telar_core::Error>(())
//! })?;
//! engine.start_rendering()?;
//! ```

pub mod connection;
pub mod engine;
pub mod graph;
pub mod midi;
pub mod node;
pub mod port;
pub mod queue;
pub mod value;

pub use connection::{Connection, InputRef, NodeId, OutputRef, PortRef};
pub use engine::Engine;
pub use graph::Graph;
pub use midi::{MidiBuffer, MidiMessage};
pub use node::{Node, NodeDescriptor, NodePorts, PortSpec, RenderContext};
pub use port::{InputPort, OutputPort, Payload, PortKind};
pub use queue::{BlockQueue, QueueRegistry};
pub use value::Value;

/// Errors surfaced by graph mutations and node operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No node with the given name exists in the graph.
    #[error("node '{0}' not found")]
    NodeNotFound(String),

    /// The named port does not exist on its node.
    #[error("port '{0}' does not exist")]
    PortNotFound(String),

    /// The connection between the given endpoints does not exist.
    #[error("connection {from} -> {sink} does not exist")]
    ConnectionNotFound {
        /// Qualified name of the source port.
        from: String,
        /// Qualified name of the sink port.
        sink: String,
    },

    /// A node with the same name is already registered.
    #[error("node '{0}' is already in the graph")]
    DuplicateNode(String),

    /// The endpoints of a proposed connection carry different port kinds.
    #[error("cannot connect {source_kind} port {from} to {sink_kind} port {sink}")]
    KindMismatch {
        /// Qualified name of the source port.
        from: String,
        /// Kind of the source port.
        source_kind: PortKind,
        /// Qualified name of the sink port.
        sink: String,
        /// Kind of the sink port.
        sink_kind: PortKind,
    },

    /// The proposed connection would make the graph cyclic.
    #[error("connecting {from} to {sink} would create a cycle")]
    Cycle {
        /// Qualified name of the source port.
        from: String,
        /// Qualified name of the sink port.
        sink: String,
    },

    /// An argument to a constructor or a port read was invalid.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// The audio or MIDI device layer reported a failure.
    #[error("device error: {0}")]
    Device(String),

    /// A playback queue could not accept another block this tick.
    #[error("playback queue is full")]
    Backpressure,

    /// `start_rendering` was called while the render thread is alive.
    #[error("render thread is already running")]
    AlreadyRunning,
}

/// Convenience result type for graph operations.
pub type Result<T> = std::result::Result<T, Error>;
