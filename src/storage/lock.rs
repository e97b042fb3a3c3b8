//! FIFO writer lock.
//!
//! Callers take a ticket and wait until the lock serves it, so writers are
//! admitted strictly in arrival order. `parking_lot::Mutex` alone is
//! eventually fair but not FIFO.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Tickets {
    next: u64,
    serving: u64,
}

/// A ticket lock admitting one holder at a time, first come first served.
#[derive(Debug, Default)]
pub struct WriterLock {
    tickets: Mutex<Tickets>,
    turn: Condvar,
}

/// Held while a transaction is in flight. Dropping it admits the next
/// waiter.
#[derive(Debug)]
pub struct WriterGuard<'l> {
    lock: &'l WriterLock,
    ticket: u64,
}

impl WriterGuard<'_> {
    /// Position of this holder in arrival order, starting at 0.
    #[must_use]
    pub const fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl WriterLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until every earlier caller has released the lock.
    pub fn acquire(&self) -> WriterGuard<'_> {
        let mut tickets = self.tickets.lock();
        let ticket = tickets.next;
        tickets.next += 1;
        if tickets.serving != ticket {
            tracing::trace!(ticket, serving = tickets.serving, "waiting for writer lock");
        }
        while tickets.serving != ticket {
            self.turn.wait(&mut tickets);
        }
        WriterGuard { lock: self, ticket }
    }

    /// Number of callers holding or waiting for the lock.
    #[must_use]
    pub fn queued(&self) -> u64 {
        let tickets = self.tickets.lock();
        tickets.next - tickets.serving
    }
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        let mut tickets = self.lock.tickets.lock();
        tickets.serving += 1;
        drop(tickets);
        self.lock.turn.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn tickets_are_served_in_order() {
        let lock = WriterLock::new();
        let a = lock.acquire();
        assert_eq!(a.ticket(), 0);
        assert_eq!(lock.queued(), 1);
        drop(a);
        assert_eq!(lock.acquire().ticket(), 1);
        assert_eq!(lock.queued(), 0);
    }

    #[test]
    fn waiters_are_admitted_first_come_first_served() {
        let lock = Arc::new(WriterLock::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let held = lock.acquire();

        let mut handles = Vec::new();
        for i in 0..4 {
            let worker_lock = Arc::clone(&lock);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                let guard = worker_lock.acquire();
                order.lock().push((i, guard.ticket()));
            }));
            // Let each thread take its ticket before the next one starts.
            while lock.queued() < i + 2 {
                thread::sleep(Duration::from_millis(1));
            }
        }
        drop(held);
        for handle in handles {
            handle.join().unwrap_or_default();
        }
        let order = order.lock();
        assert_eq!(*order, vec![(0, 1), (1, 2), (2, 3), (3, 4)]);
    }
}
