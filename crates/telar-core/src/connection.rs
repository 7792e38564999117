//! Directed connections between output and input ports.

/// Unique identifier for a node in the graph.
///
/// Node IDs are assigned sequentially and never reused within a graph
/// instance, so they stay stable across mutations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Reference to an output port: owning node plus position in the node's
/// output list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputRef {
    /// The node that owns the port.
    pub node: NodeId,
    /// Index into the node's outputs.
    pub port: usize,
}

/// Reference to an input port: owning node plus position in the node's
/// input list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputRef {
    /// The node that owns the port.
    pub node: NodeId,
    /// Index into the node's inputs.
    pub port: usize,
}

/// Reference to a port of either direction, for operations such as
/// [`Graph::unlink_port`](crate::Graph::unlink_port) that accept both.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortRef {
    /// An input port.
    Input(InputRef),
    /// An output port.
    Output(OutputRef),
}

/// A directed edge from an output port to an input port.
///
/// Two connections are equal iff their endpoints are equal; the
/// `is_connected` flag does not participate in equality, so a disconnected
/// record returned by [`Graph::get_connection`](crate::Graph::get_connection)
/// compares equal to its live counterpart.
#[derive(Clone, Debug)]
pub struct Connection {
    /// The output port feeding the edge.
    pub source: OutputRef,
    /// The input port fed by the edge.
    pub sink: InputRef,
    /// Whether the edge is currently part of the graph.
    pub is_connected: bool,
}

impl Connection {
    /// Creates a disconnected record between two endpoints.
    pub fn disconnected(source: OutputRef, sink: InputRef) -> Self {
        Self {
            source,
            sink,
            is_connected: false,
        }
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.sink == other.sink
    }
}

impl Eq for Connection {}
