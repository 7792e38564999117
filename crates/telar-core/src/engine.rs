//! Engine facade: the render thread and the command surface.
//!
//! [`Engine`] wraps a [`Graph`] behind one exclusive lock and owns the render
//! thread that ticks it. The lock is taken once per tick, so control-thread
//! mutations serialize with rendering at tick boundaries and each tick sees a
//! consistent snapshot of the patch. Stopping is cooperative: the stop flag is
//! checked between ticks, never mid-tick.
//!
//! Shutdown ordering matters: the block queues are closed *before* joining
//! the render thread, so a loop parked on the playback barrier always wakes
//! up and exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crate::connection::{Connection, NodeId};
use crate::graph::Graph;
use crate::node::Node;
use crate::queue::QueueRegistry;
use crate::{Error, Result};

/// Owns the graph lock and the render-thread lifecycle.
pub struct Engine {
    graph: Arc<Mutex<Graph>>,
    queues: Arc<QueueRegistry>,
    stop: Arc<AtomicBool>,
    render_thread: Option<JoinHandle<()>>,
    sample_rate: u32,
    block_size: usize,
}

fn lock_graph(graph: &Mutex<Graph>) -> MutexGuard<'_, Graph> {
    graph.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Engine {
    /// Creates an engine with an empty graph.
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        let graph = Graph::new(sample_rate, block_size);
        let queues = graph.queue_registry();
        Self {
            graph: Arc::new(Mutex::new(graph)),
            queues,
            stop: Arc::new(AtomicBool::new(false)),
            render_thread: None,
            sample_rate,
            block_size,
        }
    }

    /// Sample rate in Hz, fixed for the session.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples per block, fixed for the session.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Runs a closure against the locked graph.
    ///
    /// This is the general mutation entry point; the convenience methods
    /// below cover the common commands. The lock is the render lock: work
    /// done here delays the next tick, so keep it short.
    pub fn with_graph<R>(&self, f: impl FnOnce(&mut Graph) -> R) -> R {
        f(&mut lock_graph(&self.graph))
    }

    /// Ticks completed so far.
    pub fn global_clock(&self) -> u64 {
        self.with_graph(|graph| graph.global_clock())
    }

    // --- Command surface ---

    /// Adds a node under a unique name.
    pub fn add_node(&self, name: &str, node: Box<dyn Node>) -> Result<NodeId> {
        self.with_graph(|graph| graph.add_node(name, node))
    }

    /// Removes a node, detaching all of its connections and tearing it down.
    pub fn remove_node(&self, name: &str) -> Result<()> {
        self.with_graph(|graph| graph.remove_node(name).map(drop))
    }

    /// Connects `source_node.source_port` to `sink_node.sink_port`.
    pub fn add_connection(
        &self,
        source_node: &str,
        source_port: &str,
        sink_node: &str,
        sink_port: &str,
    ) -> Result<Connection> {
        self.with_graph(|graph| {
            let source = graph.output_ref(source_node, source_port)?;
            let sink = graph.input_ref(sink_node, sink_port)?;
            graph.add_connection(source, sink)
        })
    }

    /// Looks up the connection between the named ports; with
    /// `return_disconnected`, a missing edge yields a disconnected record.
    pub fn get_connection(
        &self,
        source_node: &str,
        source_port: &str,
        sink_node: &str,
        sink_port: &str,
        return_disconnected: bool,
    ) -> Result<Connection> {
        self.with_graph(|graph| {
            let source = graph.output_ref(source_node, source_port)?;
            let sink = graph.input_ref(sink_node, sink_port)?;
            graph.get_connection(source, sink, return_disconnected)
        })
    }

    /// Removes the connection between the named ports, if present.
    pub fn remove_connection(
        &self,
        source_node: &str,
        source_port: &str,
        sink_node: &str,
        sink_port: &str,
    ) -> Result<Option<Connection>> {
        self.with_graph(|graph| {
            let source = graph.output_ref(source_node, source_port)?;
            let sink = graph.input_ref(sink_node, sink_port)?;
            Ok(graph.remove_connection(source, sink))
        })
    }

    /// Removes every connection touching the named port.
    pub fn unlink_port(&self, node: &str, port: &str) -> Result<Vec<Connection>> {
        self.with_graph(|graph| {
            let port = graph.port_ref(node, port)?;
            graph.unlink_port(port)
        })
    }

    /// Removes every connection touching the named node.
    pub fn unlink_node(&self, node: &str) -> Result<Vec<Connection>> {
        self.with_graph(|graph| graph.unlink_node(node))
    }

    /// JSON view of one node.
    pub fn node_json(&self, name: &str) -> Result<serde_json::Value> {
        self.with_graph(|graph| graph.node_json(name))
    }

    /// JSON view of the whole graph.
    pub fn as_json(&self) -> serde_json::Value {
        self.with_graph(|graph| graph.as_json())
    }

    /// Serializable view sufficient to reconstruct the patch.
    pub fn export_state(&self) -> serde_json::Value {
        self.with_graph(|graph| graph.export_state())
    }

    // --- Render thread lifecycle ---

    /// Whether the render thread is currently alive.
    pub fn is_rendering(&self) -> bool {
        self.render_thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawns the render thread.
    ///
    /// The loop locks the graph, runs one tick, releases the lock, and
    /// checks the stop flag before going again.
    pub fn start_rendering(&mut self) -> Result<()> {
        if self.is_rendering() {
            return Err(Error::AlreadyRunning);
        }
        self.stop.store(false, Ordering::SeqCst);

        let graph = Arc::clone(&self.graph);
        let stop = Arc::clone(&self.stop);
        let handle = std::thread::Builder::new()
            .name("telar-render".into())
            .spawn(move || {
                tracing::info!("render thread started");
                while !stop.load(Ordering::SeqCst) {
                    lock_graph(&graph).render_tick();
                }
                tracing::info!("render thread stopped");
            })
            .map_err(|e| Error::Device(format!("failed to spawn render thread: {e}")))?;
        self.render_thread = Some(handle);
        Ok(())
    }

    /// Stops the render loop after the tick in progress and joins the thread.
    pub fn stop_rendering(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.render_thread.take() {
            let _ = handle.join();
        }
    }

    /// Full shutdown: unblocks the playback barrier, stops the loop, and
    /// tears down every node (closing files and device sessions).
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.queues.close_all();
        if let Some(handle) = self.render_thread.take() {
            let _ = handle.join();
        }
        self.with_graph(Graph::teardown_all);
        tracing::info!("engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
