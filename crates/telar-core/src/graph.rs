//! The node and connection registry plus the per-tick evaluator.
//!
//! [`Graph`] owns every node, the list of live connections, and the per-node
//! dependency sets derived from them. Mutations (add/remove nodes, connect/
//! disconnect ports) happen between ticks under the engine's graph lock;
//! [`render_tick`](Graph::render_tick) evaluates the whole graph once in
//! topological order, propagates output payloads across connections by
//! reference, and then blocks on the barrier until every registered playback
//! queue has drained this tick's blocks.
//!
//! A failed mutation leaves the graph untouched: kind and cycle checks run
//! before anything is modified.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;

use crate::connection::{Connection, InputRef, NodeId, OutputRef, PortRef};
use crate::node::{Node, NodePorts, RenderContext, instantiate_ports};
use crate::port::{InputPort, OutputPort, Payload};
use crate::queue::QueueRegistry;
use crate::{Error, Result};

struct NodeEntry {
    name: String,
    node: Box<dyn Node>,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    /// Predecessor nodes, derived from incoming connections.
    dependencies: HashSet<NodeId>,
}

/// A patch: named nodes wired through typed connections, evaluated once per
/// tick.
///
/// Node slots are never reused, so a [`NodeId`] stays valid (or dead) for the
/// lifetime of the graph.
pub struct Graph {
    sample_rate: u32,
    block_size: usize,
    global_clock: u64,
    nodes: Vec<Option<NodeEntry>>,
    connections: Vec<Connection>,
    queues: Arc<QueueRegistry>,
}

impl Graph {
    /// Creates an empty graph for the given session parameters.
    ///
    /// Sample rate and block size are fixed for the life of the graph.
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            global_clock: 0,
            nodes: Vec::new(),
            connections: Vec::new(),
            queues: Arc::new(QueueRegistry::new()),
        }
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples per block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Ticks completed so far.
    pub fn global_clock(&self) -> u64 {
        self.global_clock
    }

    /// The registry playback sinks add their block queues to.
    pub fn queue_registry(&self) -> Arc<QueueRegistry> {
        Arc::clone(&self.queues)
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    /// The live connections, in creation order.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    fn iter_entries(&self) -> impl Iterator<Item = (NodeId, &NodeEntry)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|entry| (NodeId(index as u32), entry)))
    }

    fn entry(&self, id: NodeId) -> Result<&NodeEntry> {
        self.nodes
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::NodeNotFound(id.to_string()))
    }

    fn entry_mut(&mut self, id: NodeId) -> Result<&mut NodeEntry> {
        self.nodes
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::NodeNotFound(id.to_string()))
    }

    // --- Node registry ---

    /// Adds a node under a unique name and instantiates its declared ports.
    pub fn add_node(&mut self, name: impl Into<String>, node: Box<dyn Node>) -> Result<NodeId> {
        let name = name.into();
        if self.iter_entries().any(|(_, entry)| entry.name == name) {
            return Err(Error::DuplicateNode(name));
        }
        let (inputs, outputs) = instantiate_ports(node.descriptor())?;
        let id = NodeId(self.nodes.len() as u32);
        tracing::debug!(
            node = %name,
            node_type = node.descriptor().type_name,
            "node added"
        );
        self.nodes.push(Some(NodeEntry {
            name,
            node,
            inputs,
            outputs,
            dependencies: HashSet::new(),
        }));
        Ok(id)
    }

    /// Resolves a node name to its id.
    pub fn node_id(&self, name: &str) -> Result<NodeId> {
        self.iter_entries()
            .find(|(_, entry)| entry.name == name)
            .map(|(id, _)| id)
            .ok_or_else(|| Error::NodeNotFound(name.to_owned()))
    }

    /// The name a node was registered under.
    pub fn node_name(&self, id: NodeId) -> Result<&str> {
        Ok(self.entry(id)?.name.as_str())
    }

    /// Borrows a node by name.
    pub fn get_node(&self, name: &str) -> Result<&dyn Node> {
        let id = self.node_id(name)?;
        Ok(self.entry(id)?.node.as_ref())
    }

    /// Mutably borrows a node by name (for command-level parameter changes;
    /// callers hold the graph lock, so this never races the render pass).
    pub fn get_node_mut(&mut self, name: &str) -> Result<&mut dyn Node> {
        let id = self.node_id(name)?;
        Ok(self.entry_mut(id)?.node.as_mut())
    }

    /// Removes a node: detaches every connection touching it, drops it from
    /// the registry and dependency map, then runs its teardown hook.
    pub fn remove_node(&mut self, name: &str) -> Result<Box<dyn Node>> {
        let id = self.node_id(name)?;
        self.unlink_node(name)?;
        let entry = self.nodes[id.0 as usize]
            .take()
            .ok_or_else(|| Error::NodeNotFound(name.to_owned()))?;
        let mut node = entry.node;
        node.teardown();
        tracing::debug!(node = name, "node removed");
        Ok(node)
    }

    /// Runs every node's teardown hook without removing anything.
    ///
    /// Used at engine shutdown so files and device handles close even though
    /// the graph stays introspectable.
    pub fn teardown_all(&mut self) {
        for slot in &mut self.nodes {
            if let Some(entry) = slot {
                entry.node.teardown();
            }
        }
    }

    // --- Port resolution ---

    /// Resolves `(node, port)` names to an input reference.
    pub fn input_ref(&self, node: &str, port: &str) -> Result<InputRef> {
        let id = self.node_id(node)?;
        let entry = self.entry(id)?;
        let index = entry
            .inputs
            .iter()
            .position(|p| p.name() == port)
            .ok_or_else(|| Error::PortNotFound(format!("{node}.{port}")))?;
        Ok(InputRef { node: id, port: index })
    }

    /// Resolves `(node, port)` names to an output reference.
    pub fn output_ref(&self, node: &str, port: &str) -> Result<OutputRef> {
        let id = self.node_id(node)?;
        let entry = self.entry(id)?;
        let index = entry
            .outputs
            .iter()
            .position(|p| p.name() == port)
            .ok_or_else(|| Error::PortNotFound(format!("{node}.{port}")))?;
        Ok(OutputRef { node: id, port: index })
    }

    /// Resolves `(node, port)` names to a port of either direction.
    pub fn port_ref(&self, node: &str, port: &str) -> Result<PortRef> {
        if let Ok(input) = self.input_ref(node, port) {
            return Ok(PortRef::Input(input));
        }
        self.output_ref(node, port).map(PortRef::Output)
    }

    /// Borrows the port behind an input reference.
    pub fn input_port(&self, input: InputRef) -> Result<&InputPort> {
        self.entry(input.node)?
            .inputs
            .get(input.port)
            .ok_or_else(|| Error::PortNotFound(format!("input #{}", input.port)))
    }

    /// Borrows the port behind an output reference.
    pub fn output_port(&self, output: OutputRef) -> Result<&OutputPort> {
        self.entry(output.node)?
            .outputs
            .get(output.port)
            .ok_or_else(|| Error::PortNotFound(format!("output #{}", output.port)))
    }

    /// Qualified `node.port` name of an output, for errors and logs.
    pub fn qualified_output(&self, output: OutputRef) -> String {
        match (self.entry(output.node), self.output_port(output)) {
            (Ok(entry), Ok(port)) => format!("{}.{}", entry.name, port.name()),
            _ => format!("{}.#{}", output.node, output.port),
        }
    }

    /// Qualified `node.port` name of an input, for errors and logs.
    pub fn qualified_input(&self, input: InputRef) -> String {
        match (self.entry(input.node), self.input_port(input)) {
            (Ok(entry), Ok(port)) => format!("{}.{}", entry.name, port.name()),
            _ => format!("{}.#{}", input.node, input.port),
        }
    }

    // --- Connection registry ---

    /// Looks up the connection between two endpoints.
    ///
    /// With `return_disconnected`, a missing edge yields a fresh disconnected
    /// record instead of an error, which lets callers refer to
    /// a prospective connection.
    pub fn get_connection(
        &self,
        source: OutputRef,
        sink: InputRef,
        return_disconnected: bool,
    ) -> Result<Connection> {
        self.output_port(source)?;
        self.input_port(sink)?;
        if let Some(connection) = self
            .connections
            .iter()
            .find(|c| c.source == source && c.sink == sink)
        {
            return Ok(connection.clone());
        }
        if return_disconnected {
            Ok(Connection::disconnected(source, sink))
        } else {
            Err(Error::ConnectionNotFound {
                from: self.qualified_output(source),
                sink: self.qualified_input(sink),
            })
        }
    }

    /// Whether `from` can reach `to` following live connections.
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            for connection in &self.connections {
                if connection.source.node == current {
                    stack.push(connection.sink.node);
                }
            }
        }
        false
    }

    /// Connects an output to an input.
    ///
    /// Idempotent: re-adding an existing edge returns it unchanged. A sink
    /// that is already fed has its previous connection removed first
    /// (implicit replace). Kind and cycle violations are detected before any
    /// mutation, so a failed call leaves the graph exactly as it was.
    pub fn add_connection(&mut self, source: OutputRef, sink: InputRef) -> Result<Connection> {
        let source_kind = self.output_port(source)?.kind();
        let sink_kind = self.input_port(sink)?.kind();
        if source_kind != sink_kind {
            return Err(Error::KindMismatch {
                from: self.qualified_output(source),
                source_kind,
                sink: self.qualified_input(sink),
                sink_kind,
            });
        }

        if let Some(existing) = self
            .connections
            .iter()
            .find(|c| c.source == source && c.sink == sink)
        {
            return Ok(existing.clone());
        }

        // A cycle would form iff the sink's node already reaches the source's
        // node (covers self-connections too). Checked before the implicit
        // replace below: removing an edge *into* the sink cannot change what
        // the sink's node reaches downstream.
        if self.reaches(sink.node, source.node) {
            return Err(Error::Cycle {
                from: self.qualified_output(source),
                sink: self.qualified_input(sink),
            });
        }

        if let Some(previous) = self.input_port(sink)?.source() {
            self.remove_connection(previous, sink);
        }

        self.entry_mut(source.node)?.outputs[source.port].sinks.push(sink);
        {
            let entry = self.entry_mut(sink.node)?;
            entry.inputs[sink.port].source = Some(source);
            entry.dependencies.insert(source.node);
        }
        let connection = Connection {
            source,
            sink,
            is_connected: true,
        };
        self.connections.push(connection.clone());
        tracing::debug!(
            source = %self.qualified_output(source),
            sink = %self.qualified_input(sink),
            "connection added"
        );
        Ok(connection)
    }

    /// Removes the connection between two endpoints, if it exists.
    ///
    /// Idempotent: returns `None` for an absent edge. Drops the source node
    /// from the sink node's dependency set unless another edge still links
    /// the two nodes.
    pub fn remove_connection(&mut self, source: OutputRef, sink: InputRef) -> Option<Connection> {
        let index = self
            .connections
            .iter()
            .position(|c| c.source == source && c.sink == sink)?;
        let mut connection = self.connections.remove(index);
        connection.is_connected = false;

        if let Ok(entry) = self.entry_mut(source.node)
            && let Some(port) = entry.outputs.get_mut(source.port)
        {
            port.sinks.retain(|s| *s != sink);
        }
        if let Ok(entry) = self.entry_mut(sink.node) {
            if let Some(port) = entry.inputs.get_mut(sink.port) {
                port.source = None;
            }
            let still_linked = entry
                .inputs
                .iter()
                .any(|p| p.source.is_some_and(|s| s.node == source.node));
            if !still_linked {
                entry.dependencies.remove(&source.node);
            }
        }
        tracing::debug!(
            source = %self.qualified_output(source),
            sink = %self.qualified_input(sink),
            "connection removed"
        );
        Some(connection)
    }

    /// Removes every connection touching a port, returning the removed edges.
    pub fn unlink_port(&mut self, port: PortRef) -> Result<Vec<Connection>> {
        match port {
            PortRef::Input(input) => {
                let source = self.input_port(input)?.source();
                Ok(source
                    .and_then(|s| self.remove_connection(s, input))
                    .into_iter()
                    .collect())
            }
            PortRef::Output(output) => {
                let sinks: Vec<InputRef> = self.output_port(output)?.sinks().to_vec();
                Ok(sinks
                    .into_iter()
                    .filter_map(|sink| self.remove_connection(output, sink))
                    .collect())
            }
        }
    }

    /// Removes every connection touching a node, returning the removed edges.
    pub fn unlink_node(&mut self, name: &str) -> Result<Vec<Connection>> {
        let id = self.node_id(name)?;
        let entry = self.entry(id)?;
        let input_count = entry.inputs.len();
        let output_count = entry.outputs.len();

        let mut removed = Vec::new();
        for port in 0..input_count {
            removed.extend(self.unlink_port(PortRef::Input(InputRef { node: id, port }))?);
        }
        for port in 0..output_count {
            removed.extend(self.unlink_port(PortRef::Output(OutputRef { node: id, port }))?);
        }
        Ok(removed)
    }

    /// Predecessors of a node, as tracked by the dependency map.
    pub fn dependencies(&self, id: NodeId) -> Result<&HashSet<NodeId>> {
        Ok(&self.entry(id)?.dependencies)
    }

    // --- Evaluation ---

    fn kahn_order(&self) -> Vec<NodeId> {
        use std::cmp::Reverse;
        use std::collections::BinaryHeap;

        let mut in_degree: Vec<usize> = self
            .nodes
            .iter()
            .map(|slot| slot.as_ref().map_or(0, |e| e.dependencies.len()))
            .collect();

        // Min-heap on node id keeps tie-breaking deterministic per session.
        let mut ready: BinaryHeap<Reverse<u32>> = self
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| (slot.is_some() && in_degree[i] == 0).then_some(Reverse(i as u32)))
            .collect();

        let mut order = Vec::with_capacity(self.node_count());
        while let Some(Reverse(index)) = ready.pop() {
            let id = NodeId(index);
            order.push(id);
            for (i, slot) in self.nodes.iter().enumerate() {
                if let Some(entry) = slot
                    && entry.dependencies.contains(&id)
                    && in_degree[i] > 0
                {
                    in_degree[i] -= 1;
                    if in_degree[i] == 0 {
                        ready.push(Reverse(i as u32));
                    }
                }
            }
        }
        order
    }

    /// The order nodes render in this tick: every node after all of its
    /// predecessors, ties broken by ascending node id.
    pub fn topological_order(&self) -> Vec<NodeId> {
        let order = self.kahn_order();
        debug_assert_eq!(order.len(), self.node_count(), "dependency graph must be acyclic");
        order
    }

    /// Evaluates the whole graph once.
    ///
    /// Renders every node in topological order, propagates each node's output
    /// payloads to its connected sinks by reference, joins every registered
    /// block queue (the barrier that paces rendering to real time), and
    /// advances the global clock. A node whose render fails is logged and
    /// skipped; its outputs keep their previous payloads and the tick
    /// completes for everyone else.
    pub fn render_tick(&mut self) {
        let ctx = RenderContext {
            global_clock: self.global_clock,
            sample_rate: self.sample_rate,
            block_size: self.block_size,
        };
        let block_size = self.block_size;

        for id in self.topological_order() {
            let index = id.0 as usize;

            let render_result = {
                let Some(entry) = self.nodes[index].as_mut() else {
                    continue;
                };
                let NodeEntry {
                    name,
                    node,
                    inputs,
                    outputs,
                    ..
                } = entry;
                let mut ports = NodePorts::new(inputs, outputs, block_size);
                node.render(&ctx, &mut ports)
                    .map_err(|error| (name.clone(), error))
            };
            if let Err((name, error)) = render_result {
                tracing::error!(node = %name, %error, "node render failed");
            }

            // Shallow-propagate payload references across outgoing edges.
            let propagations: Vec<(InputRef, Payload)> = match self.nodes[index].as_ref() {
                Some(entry) => entry
                    .outputs
                    .iter()
                    .flat_map(|output| {
                        output
                            .sinks
                            .iter()
                            .map(|sink| (*sink, output.payload.clone()))
                    })
                    .collect(),
                None => continue,
            };
            for (sink, payload) in propagations {
                if let Some(target) = self.nodes[sink.node.0 as usize].as_mut()
                    && let Some(port) = target.inputs.get_mut(sink.port)
                {
                    port.payload = payload;
                }
            }
        }

        for queue in self.queues.snapshot() {
            queue.join();
        }
        self.global_clock += 1;

        #[cfg(debug_assertions)]
        if let Err(violation) = self.check_invariants() {
            panic!("graph invariant violated after tick: {violation}");
        }
    }

    // --- Invariants & introspection ---

    /// Verifies the block-boundary invariants; returns the first violation.
    ///
    /// Runs automatically after every tick in debug builds.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        // 1. Connection list and port back-references agree.
        for connection in &self.connections {
            if !connection.is_connected {
                return Err(format!(
                    "disconnected record in connection list: {} -> {}",
                    self.qualified_output(connection.source),
                    self.qualified_input(connection.sink)
                ));
            }
            let source_port = self
                .output_port(connection.source)
                .map_err(|e| e.to_string())?;
            let sink_port = self.input_port(connection.sink).map_err(|e| e.to_string())?;
            if !source_port.sinks().contains(&connection.sink) {
                return Err(format!(
                    "source {} does not list sink {}",
                    self.qualified_output(connection.source),
                    self.qualified_input(connection.sink)
                ));
            }
            if sink_port.source() != Some(connection.source) {
                return Err(format!(
                    "sink {} does not point back at {}",
                    self.qualified_input(connection.sink),
                    self.qualified_output(connection.source)
                ));
            }

            // 2. Propagation left both ends sharing one payload.
            if !source_port.payload().same_buffer(sink_port.payload()) {
                return Err(format!(
                    "payload of {} diverges from {}",
                    self.qualified_input(connection.sink),
                    self.qualified_output(connection.source)
                ));
            }
        }
        for (id, entry) in self.iter_entries() {
            for (port, input) in entry.inputs.iter().enumerate() {
                if let Some(source) = input.source() {
                    let sink = InputRef { node: id, port };
                    if !self
                        .connections
                        .iter()
                        .any(|c| c.source == source && c.sink == sink)
                    {
                        return Err(format!(
                            "input {} references an unregistered connection",
                            self.qualified_input(sink)
                        ));
                    }
                }
            }
            for (port, output) in entry.outputs.iter().enumerate() {
                let source = OutputRef { node: id, port };
                for sink in output.sinks() {
                    if !self
                        .connections
                        .iter()
                        .any(|c| c.source == source && c.sink == *sink)
                    {
                        return Err(format!(
                            "output {} references an unregistered connection",
                            self.qualified_output(source)
                        ));
                    }
                }
            }

            // 3. Dependency adjacency matches the connection list.
            let derived: HashSet<NodeId> = self
                .connections
                .iter()
                .filter(|c| c.sink.node == id)
                .map(|c| c.source.node)
                .collect();
            if derived != entry.dependencies {
                return Err(format!(
                    "dependency set of '{}' diverges from its connections",
                    entry.name
                ));
            }
        }

        // 4. The adjacency graph is a DAG.
        if self.kahn_order().len() != self.node_count() {
            return Err("dependency graph contains a cycle".to_owned());
        }
        Ok(())
    }

    fn output_endpoint_json(&self, output: OutputRef) -> serde_json::Value {
        json!({
            "node_name": self.entry(output.node).map(|e| e.name.as_str()).unwrap_or(""),
            "port_name": self.output_port(output).map(OutputPort::name).unwrap_or(""),
        })
    }

    fn input_endpoint_json(&self, input: InputRef) -> serde_json::Value {
        json!({
            "node_name": self.entry(input.node).map(|e| e.name.as_str()).unwrap_or(""),
            "port_name": self.input_port(input).map(InputPort::name).unwrap_or(""),
        })
    }

    fn node_entry_json(&self, entry: &NodeEntry) -> serde_json::Value {
        let inputs: Vec<serde_json::Value> = entry
            .inputs
            .iter()
            .map(|port| {
                json!({
                    "node_name": entry.name,
                    "port_name": port.name(),
                    "type": port.kind().as_str(),
                    "source": port.source().map(|s| self.output_endpoint_json(s)),
                })
            })
            .collect();
        let outputs: Vec<serde_json::Value> = entry
            .outputs
            .iter()
            .map(|port| {
                json!({
                    "node_name": entry.name,
                    "port_name": port.name(),
                    "type": port.kind().as_str(),
                    "sinks": port
                        .sinks()
                        .iter()
                        .map(|s| self.input_endpoint_json(*s))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        let exports: serde_json::Map<String, serde_json::Value> = entry
            .node
            .exports()
            .into_iter()
            .map(|(key, value)| {
                (
                    key,
                    serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
                )
            })
            .collect();
        json!({
            "name": entry.name,
            "type": entry.node.descriptor().type_name,
            "inputs": inputs,
            "outputs": outputs,
            "exports": exports,
        })
    }

    /// JSON view of one node, in the stable introspection shape.
    pub fn node_json(&self, name: &str) -> Result<serde_json::Value> {
        let id = self.node_id(name)?;
        Ok(self.node_entry_json(self.entry(id)?))
    }

    /// JSON view of the whole graph: session parameters, nodes, connections.
    pub fn as_json(&self) -> serde_json::Value {
        let nodes: Vec<serde_json::Value> = self
            .iter_entries()
            .map(|(_, entry)| self.node_entry_json(entry))
            .collect();
        let connections: Vec<serde_json::Value> = self
            .connections
            .iter()
            .map(|c| {
                json!({
                    "source": self.output_endpoint_json(c.source),
                    "sink": self.input_endpoint_json(c.sink),
                })
            })
            .collect();
        json!({
            "sample_rate": self.sample_rate,
            "block_size": self.block_size,
            "global_clock": self.global_clock,
            "nodes": nodes,
            "connections": connections,
        })
    }

    /// Serializable view sufficient to reconstruct the patch: node names,
    /// types, exports, and the connection list.
    pub fn export_state(&self) -> serde_json::Value {
        self.as_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeDescriptor, PortSpec};
    use crate::value::Value;
    use std::sync::Arc as StdArc;

    /// Writes a constant block every tick.
    struct Feed(f32);

    const FEED: NodeDescriptor = NodeDescriptor {
        type_name: "Feed",
        inputs: &[],
        outputs: &[PortSpec::stream("out")],
    };

    impl Node for Feed {
        fn descriptor(&self) -> &'static NodeDescriptor {
            &FEED
        }
        fn render(&mut self, _ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
            let block = vec![self.0; ports.block_size()];
            ports.write_stream(0, block)
        }
    }

    /// Stream passthrough with one input and one output.
    struct Pass;

    const PASS: NodeDescriptor = NodeDescriptor {
        type_name: "Pass",
        inputs: &[PortSpec::stream("in")],
        outputs: &[PortSpec::stream("out")],
    };

    impl Node for Pass {
        fn descriptor(&self) -> &'static NodeDescriptor {
            &PASS
        }
        fn render(&mut self, _ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
            let block = ports.read_stream(0, 0.0)?;
            ports.write_stream(0, block)
        }
    }

    /// Remembers the blocks it has seen.
    struct Record(Vec<StdArc<[f32]>>);

    const RECORD: NodeDescriptor = NodeDescriptor {
        type_name: "Record",
        inputs: &[PortSpec::stream("in")],
        outputs: &[],
    };

    impl Node for Record {
        fn descriptor(&self) -> &'static NodeDescriptor {
            &RECORD
        }
        fn render(&mut self, _ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
            self.0.push(ports.read_stream(0, 0.0)?);
            Ok(())
        }
    }

    /// Always fails to render.
    struct Broken;

    const BROKEN: NodeDescriptor = NodeDescriptor {
        type_name: "Broken",
        inputs: &[PortSpec::stream("in")],
        outputs: &[PortSpec::stream("out")],
    };

    impl Node for Broken {
        fn descriptor(&self) -> &'static NodeDescriptor {
            &BROKEN
        }
        fn render(&mut self, _ctx: &RenderContext, _ports: &mut NodePorts<'_>) -> Result<()> {
            Err(Error::Argument("broken on purpose".into()))
        }
    }

    /// Data literal source.
    struct DataFeed(Value);

    const DATA_FEED: NodeDescriptor = NodeDescriptor {
        type_name: "DataFeed",
        inputs: &[],
        outputs: &[PortSpec::data("out")],
    };

    impl Node for DataFeed {
        fn descriptor(&self) -> &'static NodeDescriptor {
            &DATA_FEED
        }
        fn render(&mut self, _ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
            ports.write_data(0, self.0.clone())
        }
    }

    fn graph() -> Graph {
        Graph::new(44100, 64)
    }

    #[test]
    fn test_add_node_rejects_duplicate_name() {
        let mut g = graph();
        g.add_node("a", Box::new(Feed(1.0))).unwrap();
        let err = g.add_node("a", Box::new(Feed(2.0))).unwrap_err();
        assert!(matches!(err, Error::DuplicateNode(_)));
    }

    #[test]
    fn test_node_lookup() {
        let mut g = graph();
        let id = g.add_node("a", Box::new(Feed(1.0))).unwrap();
        assert_eq!(g.node_id("a").unwrap(), id);
        assert_eq!(g.node_name(id).unwrap(), "a");
        assert!(matches!(g.node_id("missing"), Err(Error::NodeNotFound(_))));
        assert!(g.get_node("a").is_ok());
    }

    #[test]
    fn test_port_resolution() {
        let mut g = graph();
        g.add_node("p", Box::new(Pass)).unwrap();
        assert!(g.input_ref("p", "in").is_ok());
        assert!(g.output_ref("p", "out").is_ok());
        assert!(matches!(g.input_ref("p", "out"), Err(Error::PortNotFound(_))));
        assert!(matches!(g.port_ref("p", "nope"), Err(Error::PortNotFound(_))));
        assert!(matches!(g.port_ref("p", "in"), Ok(PortRef::Input(_))));
        assert!(matches!(g.port_ref("p", "out"), Ok(PortRef::Output(_))));
    }

    #[test]
    fn test_add_connection_is_idempotent() {
        let mut g = graph();
        g.add_node("src", Box::new(Feed(1.0))).unwrap();
        g.add_node("dst", Box::new(Record(Vec::new()))).unwrap();
        let source = g.output_ref("src", "out").unwrap();
        let sink = g.input_ref("dst", "in").unwrap();

        let first = g.add_connection(source, sink).unwrap();
        let second = g.add_connection(source, sink).unwrap();
        assert_eq!(first, second);
        assert_eq!(g.connections().len(), 1);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut g = graph();
        g.add_node("data", Box::new(DataFeed(Value::Int(1)))).unwrap();
        g.add_node("dst", Box::new(Record(Vec::new()))).unwrap();
        let source = g.output_ref("data", "out").unwrap();
        let sink = g.input_ref("dst", "in").unwrap();

        let err = g.add_connection(source, sink).unwrap_err();
        assert!(matches!(err, Error::KindMismatch { .. }));
        assert!(g.connections().is_empty());
    }

    #[test]
    fn test_sink_replacement() {
        let mut g = graph();
        g.add_node("a", Box::new(Feed(1.0))).unwrap();
        g.add_node("b", Box::new(Feed(2.0))).unwrap();
        g.add_node("s", Box::new(Record(Vec::new()))).unwrap();
        let a_out = g.output_ref("a", "out").unwrap();
        let b_out = g.output_ref("b", "out").unwrap();
        let sink = g.input_ref("s", "in").unwrap();

        g.add_connection(a_out, sink).unwrap();
        g.add_connection(b_out, sink).unwrap();

        assert_eq!(g.connections().len(), 1);
        assert_eq!(g.input_port(sink).unwrap().source(), Some(b_out));
        assert!(g.output_port(a_out).unwrap().sinks().is_empty());

        let a = g.node_id("a").unwrap();
        let b = g.node_id("b").unwrap();
        let s = g.node_id("s").unwrap();
        assert!(!g.dependencies(s).unwrap().contains(&a));
        assert!(g.dependencies(s).unwrap().contains(&b));
        g.check_invariants().unwrap();
    }

    #[test]
    fn test_cycle_rejected_and_state_unchanged() {
        let mut g = graph();
        g.add_node("x", Box::new(Pass)).unwrap();
        g.add_node("y", Box::new(Pass)).unwrap();
        let x_out = g.output_ref("x", "out").unwrap();
        let x_in = g.input_ref("x", "in").unwrap();
        let y_out = g.output_ref("y", "out").unwrap();
        let y_in = g.input_ref("y", "in").unwrap();

        g.add_connection(x_out, y_in).unwrap();
        let err = g.add_connection(y_out, x_in).unwrap_err();
        assert!(matches!(err, Error::Cycle { .. }));

        // The first edge is intact, the second never landed.
        assert_eq!(g.connections().len(), 1);
        assert!(g.get_connection(x_out, y_in, false).is_ok());
        assert!(g.input_port(x_in).unwrap().source().is_none());
        g.check_invariants().unwrap();
    }

    #[test]
    fn test_self_connection_is_a_cycle() {
        let mut g = graph();
        g.add_node("p", Box::new(Pass)).unwrap();
        let out = g.output_ref("p", "out").unwrap();
        let input = g.input_ref("p", "in").unwrap();
        assert!(matches!(g.add_connection(out, input), Err(Error::Cycle { .. })));
    }

    #[test]
    fn test_remove_connection_is_idempotent() {
        let mut g = graph();
        g.add_node("src", Box::new(Feed(1.0))).unwrap();
        g.add_node("dst", Box::new(Record(Vec::new()))).unwrap();
        let source = g.output_ref("src", "out").unwrap();
        let sink = g.input_ref("dst", "in").unwrap();

        g.add_connection(source, sink).unwrap();
        let removed = g.remove_connection(source, sink).unwrap();
        assert!(!removed.is_connected);
        assert!(g.remove_connection(source, sink).is_none());
        assert!(g.connections().is_empty());
        g.check_invariants().unwrap();
    }

    #[test]
    fn test_get_connection_disconnected_record() {
        let mut g = graph();
        g.add_node("src", Box::new(Feed(1.0))).unwrap();
        g.add_node("dst", Box::new(Record(Vec::new()))).unwrap();
        let source = g.output_ref("src", "out").unwrap();
        let sink = g.input_ref("dst", "in").unwrap();

        assert!(matches!(
            g.get_connection(source, sink, false),
            Err(Error::ConnectionNotFound { .. })
        ));
        let record = g.get_connection(source, sink, true).unwrap();
        assert!(!record.is_connected);
        assert_eq!(record.source, source);
        assert_eq!(record.sink, sink);
    }

    #[test]
    fn test_remove_node_cleans_up_everything() {
        let mut g = graph();
        g.add_node("src", Box::new(Feed(1.0))).unwrap();
        g.add_node("mid", Box::new(Pass)).unwrap();
        g.add_node("dst", Box::new(Record(Vec::new()))).unwrap();
        let src_out = g.output_ref("src", "out").unwrap();
        let mid_in = g.input_ref("mid", "in").unwrap();
        let mid_out = g.output_ref("mid", "out").unwrap();
        let dst_in = g.input_ref("dst", "in").unwrap();
        g.add_connection(src_out, mid_in).unwrap();
        g.add_connection(mid_out, dst_in).unwrap();

        let mid = g.node_id("mid").unwrap();
        g.remove_node("mid").unwrap();

        assert_eq!(g.node_count(), 2);
        assert!(g.connections().is_empty());
        let dst = g.node_id("dst").unwrap();
        assert!(!g.dependencies(dst).unwrap().contains(&mid));
        assert!(g.input_port(dst_in).unwrap().source().is_none());
        g.check_invariants().unwrap();
    }

    #[test]
    fn test_unlink_node_returns_removed_edges() {
        let mut g = graph();
        g.add_node("src", Box::new(Feed(1.0))).unwrap();
        g.add_node("mid", Box::new(Pass)).unwrap();
        g.add_node("dst", Box::new(Record(Vec::new()))).unwrap();
        g.add_connection(
            g.output_ref("src", "out").unwrap(),
            g.input_ref("mid", "in").unwrap(),
        )
        .unwrap();
        g.add_connection(
            g.output_ref("mid", "out").unwrap(),
            g.input_ref("dst", "in").unwrap(),
        )
        .unwrap();

        let removed = g.unlink_node("mid").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(g.connections().is_empty());
    }

    #[test]
    fn test_topological_order_respects_dependencies() {
        let mut g = graph();
        // dst added first; order must still place src before mid before dst.
        g.add_node("dst", Box::new(Record(Vec::new()))).unwrap();
        g.add_node("mid", Box::new(Pass)).unwrap();
        g.add_node("src", Box::new(Feed(1.0))).unwrap();
        g.add_connection(
            g.output_ref("src", "out").unwrap(),
            g.input_ref("mid", "in").unwrap(),
        )
        .unwrap();
        g.add_connection(
            g.output_ref("mid", "out").unwrap(),
            g.input_ref("dst", "in").unwrap(),
        )
        .unwrap();

        let order = g.topological_order();
        let pos = |name: &str| {
            let id = g.node_id(name).unwrap();
            order.iter().position(|&n| n == id).unwrap()
        };
        assert!(pos("src") < pos("mid"));
        assert!(pos("mid") < pos("dst"));
    }

    #[test]
    fn test_render_propagates_by_reference() {
        let mut g = graph();
        g.add_node("src", Box::new(Feed(0.5))).unwrap();
        g.add_node("a", Box::new(Record(Vec::new()))).unwrap();
        g.add_node("b", Box::new(Record(Vec::new()))).unwrap();
        let source = g.output_ref("src", "out").unwrap();
        g.add_connection(source, g.input_ref("a", "in").unwrap()).unwrap();
        g.add_connection(source, g.input_ref("b", "in").unwrap()).unwrap();

        g.render_tick();
        assert_eq!(g.global_clock(), 1);

        // Fan-out shares one buffer; both sinks read the same allocation.
        let a_in = g.input_port(g.input_ref("a", "in").unwrap()).unwrap();
        let b_in = g.input_port(g.input_ref("b", "in").unwrap()).unwrap();
        let src_out = g.output_port(source).unwrap();
        assert!(src_out.payload().same_buffer(a_in.payload()));
        assert!(src_out.payload().same_buffer(b_in.payload()));
        g.check_invariants().unwrap();
    }

    #[test]
    fn test_render_survives_failing_node() {
        let mut g = graph();
        g.add_node("bad", Box::new(Broken)).unwrap();
        g.add_node("src", Box::new(Feed(1.0))).unwrap();
        g.add_node("dst", Box::new(Record(Vec::new()))).unwrap();
        g.add_connection(
            g.output_ref("src", "out").unwrap(),
            g.input_ref("dst", "in").unwrap(),
        )
        .unwrap();

        g.render_tick();
        g.render_tick();
        assert_eq!(g.global_clock(), 2);
        g.check_invariants().unwrap();
    }

    #[test]
    fn test_data_connection_propagates_value() {
        let mut g = graph();
        g.add_node("value", Box::new(DataFeed(Value::Float(2.5)))).unwrap();

        // A data sink: reuse DataFeed's descriptor shape via Record-like node.
        struct DataRecord(Vec<Value>);
        const DATA_RECORD: NodeDescriptor = NodeDescriptor {
            type_name: "DataRecord",
            inputs: &[PortSpec::data("in")],
            outputs: &[],
        };
        impl Node for DataRecord {
            fn descriptor(&self) -> &'static NodeDescriptor {
                &DATA_RECORD
            }
            fn render(&mut self, _ctx: &RenderContext, ports: &mut NodePorts<'_>) -> Result<()> {
                self.0.push(ports.read_data(0, Value::Null)?);
                Ok(())
            }
        }

        g.add_node("record", Box::new(DataRecord(Vec::new()))).unwrap();
        g.add_connection(
            g.output_ref("value", "out").unwrap(),
            g.input_ref("record", "in").unwrap(),
        )
        .unwrap();

        g.render_tick();
        let sink = g.input_ref("record", "in").unwrap();
        assert!(matches!(
            g.input_port(sink).unwrap().payload(),
            Payload::Data(Value::Float(v)) if *v == 2.5
        ));
    }

    #[test]
    fn test_as_json_shape() {
        let mut g = graph();
        g.add_node("src", Box::new(Feed(1.0))).unwrap();
        g.add_node("dst", Box::new(Record(Vec::new()))).unwrap();
        g.add_connection(
            g.output_ref("src", "out").unwrap(),
            g.input_ref("dst", "in").unwrap(),
        )
        .unwrap();

        let view = g.as_json();
        assert_eq!(view["sample_rate"], 44100);
        assert_eq!(view["block_size"], 64);
        assert_eq!(view["nodes"].as_array().unwrap().len(), 2);
        assert_eq!(view["connections"].as_array().unwrap().len(), 1);

        let src = &view["nodes"][0];
        assert_eq!(src["name"], "src");
        assert_eq!(src["type"], "Feed");
        assert_eq!(src["outputs"][0]["type"], "stream");
        assert_eq!(src["outputs"][0]["sinks"][0]["node_name"], "dst");

        let dst = &view["nodes"][1];
        assert_eq!(dst["inputs"][0]["source"]["node_name"], "src");
        assert_eq!(
            view["connections"][0]["source"]["port_name"], "out",
        );
    }

    #[test]
    fn test_barrier_joins_registered_queue() {
        use crate::queue::BlockQueue;
        use std::thread;
        use std::time::Duration;

        let mut g = graph();
        let queue = StdArc::new(BlockQueue::with_capacity(4));
        g.queue_registry().register(StdArc::clone(&queue));
        queue.try_push(vec![0.0; 8]).unwrap();

        let consumer = {
            let queue = StdArc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                let block = queue.pop().unwrap();
                assert_eq!(block.len(), 8);
                queue.task_done();
            })
        };

        // render_tick must not return before the consumer acknowledged.
        g.render_tick();
        assert!(queue.is_empty());
        consumer.join().unwrap();
    }
}
