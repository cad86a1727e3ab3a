//! Thread-safe FIFO with explicit shutdown semantics: one producer side (CommandServer), one
//! consumer side (Machine's control thread). Grounded on the teacher's hand-rolled `pchannel.rs`
//! (`Mutex` + `Condvar`, explicit closed flag) but collapsed to a single shared-state struct
//! rather than split sender/receiver handles, since this queue only ever has one of each.
use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct State<T> {
    queue: VecDeque<T>,
    closed: bool,
}

/// A bounded-lifetime FIFO: open until [`CommandQueue::shutdown`] is called, after which `push`
/// is refused but `try_pop`/`pop_wait_for` keep draining whatever is left.
pub struct CommandQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CommandQueue<T> {
    /// A new, open queue.
    pub fn new() -> Self {
        Self { state: Mutex::new(State { queue: VecDeque::new(), closed: false }), not_empty: Condvar::new() }
    }

    /// Enqueue an item. Returns `false` without enqueuing if the queue has been shut down.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.queue.push_back(item);
        self.not_empty.notify_one();
        true
    }

    /// Pop an item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().queue.pop_front()
    }

    /// Pop an item, blocking up to `timeout` if the queue is currently empty. Returns `None` on
    /// timeout and once the queue is shut down and drained.
    pub fn pop_wait_for(&self, timeout: Duration) -> Option<T> {
        let mut state = self.state.lock();
        if let Some(item) = state.queue.pop_front() {
            return Some(item);
        }
        if state.closed {
            return None;
        }
        let result = self.not_empty.wait_for(&mut state, timeout);
        if result.timed_out() {
            return None;
        }
        state.queue.pop_front()
    }

    /// Mark the queue closed and wake every waiter. Idempotent. Existing entries remain
    /// poppable so the orchestrator can resolve each with a shutdown reply.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
    }

    /// Whether `shutdown` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether the queue currently has no items.
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_try_pop_round_trips() {
        let queue = CommandQueue::new();
        assert!(queue.push(1));
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn push_is_refused_after_shutdown() {
        let queue = CommandQueue::new();
        queue.shutdown();
        assert!(!queue.push(1));
    }

    #[test]
    fn shutdown_still_drains_existing_entries() {
        let queue = CommandQueue::new();
        queue.push(1);
        queue.push(2);
        queue.shutdown();
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn pop_wait_for_times_out_on_empty_queue() {
        let queue: CommandQueue<i32> = CommandQueue::new();
        assert_eq!(queue.pop_wait_for(Duration::from_millis(10)), None);
    }

    #[test]
    fn pop_wait_for_wakes_on_push() {
        let queue = Arc::new(CommandQueue::new());
        let producer = Arc::clone(&queue);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(42);
        });
        assert_eq!(queue.pop_wait_for(Duration::from_secs(1)), Some(42));
    }

    #[test]
    fn shutdown_wakes_blocked_waiter() {
        let queue: Arc<CommandQueue<i32>> = Arc::new(CommandQueue::new());
        let closer = Arc::clone(&queue);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.shutdown();
        });
        assert_eq!(queue.pop_wait_for(Duration::from_secs(1)), None);
    }
}
