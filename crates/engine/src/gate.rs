//! Reader and writer admission.
//!
//! - [`WriterGate`]: a fair lock admitting one Update at a time, in arrival
//!   order. Unlike a guard-based mutex it can be released from a different
//!   call than the one that acquired it, which commit needs in order to let
//!   the next Update start while it is still syncing.
//! - [`ReaderCount`]: counts open Queries so that closing a store can wait
//!   for them to drain.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Tickets {
    next: u64,
    serving: u64,
}

/// FIFO ticket lock.
#[derive(Debug, Default)]
pub(crate) struct WriterGate {
    tickets: Mutex<Tickets>,
    turn: Condvar,
}

impl WriterGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Block until every earlier caller has released the gate.
    pub(crate) fn acquire(&self) {
        let mut tickets = self.tickets.lock();
        let ticket = tickets.next;
        tickets.next += 1;
        while tickets.serving != ticket {
            self.turn.wait(&mut tickets);
        }
    }

    /// Admit the next waiter. Must pair with exactly one `acquire`.
    pub(crate) fn release(&self) {
        let mut tickets = self.tickets.lock();
        tickets.serving += 1;
        self.turn.notify_all();
    }
}

#[derive(Debug, Default)]
struct Readers {
    open: usize,
    closed: bool,
}

/// Count of open Queries plus the store's closed flag.
#[derive(Debug, Default)]
pub(crate) struct ReaderCount {
    readers: Mutex<Readers>,
    drained: Condvar,
}

impl ReaderCount {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a reader. Returns false once the store is closed.
    pub(crate) fn enter(&self) -> bool {
        let mut readers = self.readers.lock();
        if readers.closed {
            return false;
        }
        readers.open += 1;
        true
    }

    /// Unregister a reader, waking a pending close at zero.
    pub(crate) fn exit(&self) {
        let mut readers = self.readers.lock();
        readers.open = readers.open.saturating_sub(1);
        if readers.open == 0 {
            self.drained.notify_all();
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.readers.lock().closed
    }

    /// Refuse new readers, then wait for open ones to finish.
    ///
    /// Returns false if the store was already closed.
    pub(crate) fn close_and_drain(&self) -> bool {
        let mut readers = self.readers.lock();
        let first = !readers.closed;
        readers.closed = true;
        while readers.open != 0 {
            self.drained.wait(&mut readers);
        }
        first
    }

    #[cfg(test)]
    pub(crate) fn open_readers(&self) -> usize {
        self.readers.lock().open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_gate_serializes_writers() {
        let gate = Arc::new(WriterGate::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..50 {
                        gate.acquire();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        gate.release();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_gate_is_fifo() {
        let gate = Arc::new(WriterGate::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        gate.acquire();

        let mut handles = Vec::new();
        for i in 0..4 {
            let worker_gate = Arc::clone(&gate);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                worker_gate.acquire();
                order.lock().push(i);
                worker_gate.release();
            }));
            // Let each thread take its ticket before the next one starts.
            while gate.tickets.lock().next != i as u64 + 2 {
                thread::yield_now();
            }
        }
        gate.release();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_close_waits_for_readers() {
        let readers = Arc::new(ReaderCount::new());
        assert!(readers.enter());
        assert!(readers.enter());

        let closer = {
            let readers = Arc::clone(&readers);
            thread::spawn(move || readers.close_and_drain())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!closer.is_finished());
        readers.exit();
        readers.exit();
        assert!(closer.join().unwrap());
        assert_eq!(readers.open_readers(), 0);
        assert!(!readers.enter());
        assert!(readers.is_closed());
    }

    #[test]
    fn test_second_close_reports_already_closed() {
        let readers = ReaderCount::new();
        assert!(readers.close_and_drain());
        assert!(!readers.close_and_drain());
    }
}
