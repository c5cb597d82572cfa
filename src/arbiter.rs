//! Serialises per-client report-directory access across the Worker pool.
//!
//! Two workers handling the same `client_id` concurrently would race on
//! the same report subdirectory. The arbiter blocks a second acquirer
//! until the first releases, and is deadlock-free because a worker only
//! ever holds one slot at a time.

use std::collections::HashSet;

use parking_lot::{Condvar, Mutex};

struct Held {
    clients: HashSet<String>,
}

pub struct ReportDirArbiter {
    state: Mutex<Held>,
    condvar: Condvar,
}

/// RAII token returned by [`ReportDirArbiter::acquire`]. Releasing happens
/// on drop, so every exit path from a worker's iteration — success,
/// rejection, failure, or panic unwinding — releases the slot.
pub struct Slot<'a> {
    arbiter: &'a ReportDirArbiter,
    client_id: String,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.arbiter.release(&self.client_id);
    }
}

impl Default for ReportDirArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportDirArbiter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Held {
                clients: HashSet::new(),
            }),
            condvar: Condvar::new(),
        }
    }

    /// Block until no other worker holds `client_id`, then take the slot.
    pub fn acquire(&self, client_id: &str) -> Slot<'_> {
        let mut guard = self.state.lock();
        while guard.clients.contains(client_id) {
            self.condvar.wait(&mut guard);
        }
        guard.clients.insert(client_id.to_string());
        Slot {
            arbiter: self,
            client_id: client_id.to_string(),
        }
    }

    fn release(&self, client_id: &str) {
        let mut guard = self.state.lock();
        guard.clients.remove(client_id);
        drop(guard);
        self.condvar.notify_all();
    }

    #[cfg(test)]
    fn is_held(&self, client_id: &str) -> bool {
        self.state.lock().clients.contains(client_id)
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
    fn acquire_and_release_round_trips() {
        let arbiter = ReportDirArbiter::new();
        {
            let _slot = arbiter.acquire("client-a");
            assert!(arbiter.is_held("client-a"));
        }
        assert!(!arbiter.is_held("client-a"));
    }

    #[test]
    fn release_is_idempotent_via_drop_only() {
        let arbiter = ReportDirArbiter::new();
        let slot = arbiter.acquire("client-a");
        drop(slot);
        assert!(!arbiter.is_held("client-a"));
    }

    #[test]
    fn distinct_clients_never_block_each_other() {
        let arbiter = Arc::new(ReportDirArbiter::new());
        let _a = arbiter.acquire("a");
        let b_arbiter = arbiter.clone();
        let handle = thread::spawn(move || {
            let _b = b_arbiter.acquire("b");
        });
        handle.join().unwrap();
    }

    #[test]
    fn second_acquirer_for_same_client_waits_for_release() {
        let arbiter = Arc::new(ReportDirArbiter::new());
        let overlap = Arc::new(AtomicUsize::new(0));
        let max_overlap = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let arbiter = arbiter.clone();
            let overlap = overlap.clone();
            let max_overlap = max_overlap.clone();
            handles.push(thread::spawn(move || {
                let _slot = arbiter.acquire("shared-client");
                let current = overlap.fetch_add(1, Ordering::SeqCst) + 1;
                max_overlap.fetch_max(current, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                overlap.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_overlap.load(Ordering::SeqCst), 1);
    }
}
