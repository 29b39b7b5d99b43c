//! A bounded, completion-tracked message queue.
//!
//! [`Queue`] is a FIFO mailbox of [`Envelope`]s shared between threads
//! through cheap handle clones. It differs from a plain channel in two ways:
//!
//! 1. Every `put` increments a pending counter that is only released by an
//!    explicit [`Queue::ack`], so [`Queue::wait`] can act as a drain barrier
//!    over delivered-and-consumed work regardless of how many consumer
//!    threads exist.
//! 2. Iteration treats a single [`Envelope::EndOfQueue`] sentinel as a
//!    shared, one-time termination signal: when several threads iterate the
//!    same queue, each message (the sentinel included) is delivered to
//!    exactly one of them, and all the others observe clean termination
//!    instead of blocking on a drained queue.
//!
//! `put` blocks while a bounded queue is at capacity, which is what gives
//! the pipeline in [`crate::grep`] its backpressure.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// A queue message: either a payload or the end-of-queue sentinel.
///
/// Producers place exactly one `EndOfQueue` on a queue over their lifetime;
/// consumers must never reinterpret it as data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope<T> {
    Value(T),
    EndOfQueue,
}

struct State<T> {
    items: VecDeque<Envelope<T>>,
    /// Messages put but not yet acked.
    pending: usize,
}

struct IterGate {
    eoq_seen: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    drained: Condvar,
    /// Serializes the check-get-ack step of iteration across all iterators
    /// of this queue and records whether the sentinel has been consumed.
    iter_gate: Mutex<IterGate>,
    /// `None` means unbounded.
    capacity: Option<usize>,
}

/// A bounded (or unbounded) FIFO of [`Envelope`]s with completion tracking.
///
/// Cloning a `Queue` clones a handle to the same underlying mailbox.
pub struct Queue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

// No operation mutates queue state across a panic point, so a poisoned lock
// cannot hide an inconsistent queue; recover the guard instead of unwinding.
fn lock<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn wait_on<'a, T>(condvar: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    condvar.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

impl<T> Queue<T> {
    /// Creates a queue that holds at most `capacity` in-flight envelopes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn bounded(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be at least 1");
        Self::with_capacity(Some(capacity))
    }

    /// Creates a queue with no capacity limit; `put` never blocks.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    items: VecDeque::new(),
                    pending: 0,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                drained: Condvar::new(),
                iter_gate: Mutex::new(IterGate { eoq_seen: false }),
                capacity,
            }),
        }
    }

    /// Appends an envelope, blocking while the queue is at capacity.
    ///
    /// Increments the pending counter; the envelope counts as in-flight
    /// until a consumer calls [`Queue::ack`] for it.
    pub fn put(&self, envelope: Envelope<T>) {
        let mut state = lock(&self.shared.state);
        if let Some(capacity) = self.shared.capacity {
            while state.items.len() >= capacity {
                state = wait_on(&self.shared.not_full, state);
            }
        }
        state.items.push_back(envelope);
        state.pending += 1;
        self.shared.not_empty.notify_one();
    }

    /// Removes and returns the oldest envelope, blocking while the queue is
    /// empty.
    ///
    /// Releases a capacity slot but not the pending count; callers that
    /// consider the envelope consumed must follow up with [`Queue::ack`].
    pub fn get(&self) -> Envelope<T> {
        let mut state = lock(&self.shared.state);
        loop {
            if let Some(envelope) = state.items.pop_front() {
                self.shared.not_full.notify_one();
                return envelope;
            }
            state = wait_on(&self.shared.not_empty, state);
        }
    }

    /// Records that one previously retrieved envelope has been consumed.
    ///
    /// Must be called exactly once per [`Queue::get`] whose envelope is
    /// treated as consumed; wakes [`Queue::wait`]ers once the pending count
    /// reaches zero.
    pub fn ack(&self) {
        let mut state = lock(&self.shared.state);
        debug_assert!(state.pending > 0, "ack without a matching put");
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            self.shared.drained.notify_all();
        }
    }

    /// Blocks until every put envelope has been acked.
    pub fn wait(&self) {
        let mut state = lock(&self.shared.state);
        while state.pending > 0 {
            state = wait_on(&self.shared.drained, state);
        }
    }

    /// Returns a draining iterator over payloads, terminated by the shared
    /// end-of-queue sentinel.
    ///
    /// Multiple iterators over the same queue (from any number of threads)
    /// cooperate: each payload goes to exactly one of them, and once any of
    /// them consumes the sentinel, all of them terminate. Iteration is not
    /// restartable; after the sentinel is seen, every iterator of this
    /// queue yields `None` without touching the mailbox.
    pub fn iter(&self) -> Iter<T> {
        Iter {
            queue: self.clone(),
        }
    }
}

impl<T> IntoIterator for &Queue<T> {
    type Item = T;
    type IntoIter = Iter<T>;

    fn into_iter(self) -> Iter<T> {
        self.iter()
    }
}

/// Draining iterator returned by [`Queue::iter`].
pub struct Iter<T> {
    queue: Queue<T>,
}

impl<T> Iterator for Iter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        // The gate is held across the blocking get so that the sentinel
        // check, the retrieval, and the ack are one atomic step; a second
        // iterating thread either takes the whole step after us or sees the
        // sentinel flag we set.
        let mut gate = lock(&self.queue.shared.iter_gate);
        if gate.eoq_seen {
            return None;
        }
        let envelope = self.queue.get();
        self.queue.ack();
        match envelope {
            Envelope::Value(value) => Some(value),
            Envelope::EndOfQueue => {
                gate.eoq_seen = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    /// Runs `f` on a helper thread and asserts it finishes within `timeout`.
    fn assert_completes(timeout: Duration, f: impl FnOnce() + Send + 'static) {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            f();
            let _ = tx.send(());
        });
        rx.recv_timeout(timeout)
            .expect("operation did not complete in time");
    }

    #[test]
    fn test_wait_on_untouched_queue() {
        let queue: Queue<i32> = Queue::unbounded();
        assert_completes(Duration::from_secs(1), move || queue.wait());
    }

    #[test]
    fn test_put_get_ack_wait() {
        let queue = Queue::unbounded();
        queue.put(Envelope::Value(1));
        assert_eq!(queue.get(), Envelope::Value(1));
        queue.ack();
        assert_completes(Duration::from_secs(1), move || queue.wait());
    }

    #[test]
    fn test_iteration_yields_in_order_then_terminates() {
        let queue = Queue::unbounded();
        for i in 0..3 {
            queue.put(Envelope::Value(i));
        }
        queue.put(Envelope::EndOfQueue);

        let got: Vec<i32> = queue.iter().collect();
        assert_eq!(got, vec![0, 1, 2]);

        // Not restartable: the sentinel has been consumed.
        assert_eq!(queue.iter().next(), None);
        assert_completes(Duration::from_secs(1), move || queue.wait());
    }

    #[test]
    fn test_wait_blocks_until_ack() {
        let queue = Queue::unbounded();
        queue.put(Envelope::Value(7));
        let _ = queue.get();

        let (tx, rx) = mpsc::channel();
        let waiter = queue.clone();
        thread::spawn(move || {
            waiter.wait();
            let _ = tx.send(());
        });

        assert!(
            rx.recv_timeout(Duration::from_millis(100)).is_err(),
            "wait returned before the message was acked"
        );
        queue.ack();
        rx.recv_timeout(Duration::from_secs(1))
            .expect("wait did not return after ack");
    }

    #[test]
    fn test_bounded_put_blocks_at_capacity() {
        let queue = Queue::bounded(2);
        queue.put(Envelope::Value(1));
        queue.put(Envelope::Value(2));

        let (tx, rx) = mpsc::channel();
        let producer = queue.clone();
        thread::spawn(move || {
            producer.put(Envelope::Value(3));
            let _ = tx.send(());
        });

        assert!(
            rx.recv_timeout(Duration::from_millis(100)).is_err(),
            "put returned while the queue was full"
        );
        let _ = queue.get();
        queue.ack();
        rx.recv_timeout(Duration::from_secs(1))
            .expect("put did not unblock after a slot freed");
    }

    #[test]
    fn test_threaded_consumer_sees_all_values() {
        let queue = Queue::unbounded();
        let want: Vec<i32> = (0..3).collect();

        let consumer = queue.clone();
        let handle = thread::spawn(move || {
            let got: Vec<i32> = consumer.iter().collect();
            consumer.wait();
            got
        });

        for &i in &want {
            queue.put(Envelope::Value(i));
        }
        queue.put(Envelope::EndOfQueue);

        let got = handle.join().expect("consumer thread panicked");
        assert_eq!(got, want);
    }

    #[test]
    fn test_multi_consumer_drain() {
        let queue = Queue::unbounded();
        let consumers = 4;
        let want: Vec<i32> = (0..20).collect();

        let handles: Vec<_> = (0..consumers)
            .map(|_| {
                let consumer = queue.clone();
                thread::spawn(move || {
                    let mut got = Vec::new();
                    for value in consumer.iter() {
                        // Give the other consumers a chance to interleave.
                        thread::sleep(Duration::from_millis(1));
                        got.push(value);
                    }
                    got
                })
            })
            .collect();

        for &i in &want {
            queue.put(Envelope::Value(i));
        }
        queue.put(Envelope::EndOfQueue);

        let mut got: Vec<i32> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("consumer thread panicked"))
            .collect();
        got.sort_unstable();
        assert_eq!(got, want, "values were lost or duplicated across consumers");
        assert_completes(Duration::from_secs(1), move || queue.wait());
    }
}
