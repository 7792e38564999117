//! Block-sync queues between the render loop and playback consumers.
//!
//! Each playback sink owns a [`BlockQueue`]: a bounded FIFO of interleaved
//! stereo blocks with task-done acknowledgment. The render thread pushes one
//! block per tick; the audio callback pops one block per invocation, copies
//! it out, and acknowledges. At the end of every tick the graph joins all
//! registered queues, which couples the render rate to device consumption
//! and therefore to wall-clock time.
//!
//! The consumer side never blocks: [`pop`](BlockQueue::pop) returns `None`
//! immediately on an empty queue, which the playback layer records as an
//! underrun.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::{Error, Result};

/// A finished block of interleaved stereo samples (`[l0, r0, l1, r1, ...]`).
pub type StereoBlock = Vec<f32>;

struct QueueState {
    items: VecDeque<StereoBlock>,
    /// Blocks pushed but not yet acknowledged via `task_done`.
    unfinished: usize,
    closed: bool,
}

/// Bounded FIFO of ready audio blocks with join/acknowledge semantics.
pub struct BlockQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    all_done: Condvar,
    underruns: AtomicU64,
}

impl BlockQueue {
    /// Creates a queue holding at most `capacity` blocks.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                unfinished: 0,
                closed: false,
            }),
            all_done: Condvar::new(),
            underruns: AtomicU64::new(0),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maximum number of buffered blocks.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of blocks currently buffered.
    pub fn len(&self) -> usize {
        self.lock_state().items.len()
    }

    /// Returns true if no blocks are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue has been shut down.
    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Offers a block to the queue without blocking.
    ///
    /// Returns [`Error::Backpressure`] when the queue is full. Pushing to a
    /// closed queue silently drops the block, so a render tick racing a
    /// shutdown does not error out.
    pub fn try_push(&self, block: StereoBlock) -> Result<()> {
        let mut state = self.lock_state();
        if state.closed {
            return Ok(());
        }
        if state.items.len() >= self.capacity {
            return Err(Error::Backpressure);
        }
        state.items.push_back(block);
        state.unfinished += 1;
        Ok(())
    }

    /// Pops the oldest block, or `None` when the queue is empty.
    ///
    /// Never blocks; safe to call from the audio callback. The caller must
    /// follow up with [`task_done`](Self::task_done) once the block has been
    /// consumed.
    pub fn pop(&self) -> Option<StereoBlock> {
        self.lock_state().items.pop_front()
    }

    /// Acknowledges one consumed block, releasing the producer's barrier once
    /// every pushed block is acknowledged.
    pub fn task_done(&self) {
        let mut state = self.lock_state();
        state.unfinished = state.unfinished.saturating_sub(1);
        if state.unfinished == 0 {
            self.all_done.notify_all();
        }
    }

    /// Blocks until every pushed block has been acknowledged.
    ///
    /// Returns immediately once the queue is closed, so shutdown can always
    /// unstick a waiting producer.
    pub fn join(&self) {
        let mut state = self.lock_state();
        while state.unfinished > 0 && !state.closed {
            state = self
                .all_done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Shuts the queue down: wakes all joiners and drops future pushes.
    pub fn close(&self) {
        let mut state = self.lock_state();
        state.closed = true;
        self.all_done.notify_all();
    }

    /// Records one underrun (the callback found the queue empty).
    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of underruns recorded so far.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// The set of block queues the graph joins at the end of each tick.
///
/// Shared between the graph (which joins) and the engine (which closes on
/// shutdown); playback sinks register their queue at construction.
#[derive(Default)]
pub struct QueueRegistry {
    queues: Mutex<Vec<std::sync::Arc<BlockQueue>>>,
}

impl QueueRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_queues(&self) -> MutexGuard<'_, Vec<std::sync::Arc<BlockQueue>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a queue for the per-tick barrier.
    pub fn register(&self, queue: std::sync::Arc<BlockQueue>) {
        self.lock_queues().push(queue);
    }

    /// Unregisters a queue (its sink was removed from the graph).
    pub fn unregister(&self, queue: &std::sync::Arc<BlockQueue>) {
        self.lock_queues()
            .retain(|q| !std::sync::Arc::ptr_eq(q, queue));
    }

    /// Snapshot of the registered queues.
    pub fn snapshot(&self) -> Vec<std::sync::Arc<BlockQueue>> {
        self.lock_queues().clone()
    }

    /// Closes every registered queue, unblocking any joined producer.
    pub fn close_all(&self) {
        for queue in self.lock_queues().iter() {
            queue.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_push_pop_fifo() {
        let queue = BlockQueue::with_capacity(4);
        queue.try_push(vec![1.0]).unwrap();
        queue.try_push(vec![2.0]).unwrap();

        assert_eq!(queue.pop(), Some(vec![1.0]));
        assert_eq!(queue.pop(), Some(vec![2.0]));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_full_queue_signals_backpressure() {
        let queue = BlockQueue::with_capacity(1);
        queue.try_push(vec![0.0]).unwrap();
        assert!(matches!(queue.try_push(vec![0.0]), Err(Error::Backpressure)));
    }

    #[test]
    fn test_join_waits_for_task_done() {
        let queue = Arc::new(BlockQueue::with_capacity(4));
        queue.try_push(vec![0.0; 8]).unwrap();
        queue.try_push(vec![0.0; 8]).unwrap();

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                while queue.pop().is_some() {
                    thread::sleep(Duration::from_millis(1));
                    queue.task_done();
                }
            })
        };

        queue.join();
        assert!(queue.is_empty());
        consumer.join().unwrap();
    }

    #[test]
    fn test_close_unblocks_join() {
        let queue = Arc::new(BlockQueue::with_capacity(4));
        queue.try_push(vec![0.0]).unwrap();

        let closer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                queue.close();
            })
        };

        // Nothing ever acknowledges the block; only close() lets this return.
        queue.join();
        closer.join().unwrap();
        assert!(queue.is_closed());
    }

    #[test]
    fn test_push_after_close_is_dropped() {
        let queue = BlockQueue::with_capacity(2);
        queue.close();
        queue.try_push(vec![1.0]).unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_underrun_counter() {
        let queue = BlockQueue::with_capacity(2);
        assert_eq!(queue.underruns(), 0);
        queue.record_underrun();
        queue.record_underrun();
        assert_eq!(queue.underruns(), 2);
    }

    #[test]
    fn test_registry_register_and_close_all() {
        let registry = QueueRegistry::new();
        let a = Arc::new(BlockQueue::with_capacity(1));
        let b = Arc::new(BlockQueue::with_capacity(1));
        registry.register(Arc::clone(&a));
        registry.register(Arc::clone(&b));
        assert_eq!(registry.snapshot().len(), 2);

        registry.unregister(&a);
        assert_eq!(registry.snapshot().len(), 1);

        registry.close_all();
        assert!(b.is_closed());
        assert!(!a.is_closed());
    }
}
