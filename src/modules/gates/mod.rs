//! Per-hostname concurrency gates.
//!
//! One semaphore per target hostname, sized to the number of egress ports and
//! created lazily. Gates live as long as the owning fetcher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("concurrency gate for {0} is closed")]
    Closed(String),
}

#[derive(Debug)]
pub struct HostnameGates {
    capacity: usize,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HostnameGates {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn gate(&self, hostname: &str) -> Arc<Semaphore> {
        let mut guard = self.gates.lock().expect("gate lock poisoned");
        guard
            .entry(hostname.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.capacity)))
            .clone()
    }

    /// Waits for a permit for `hostname`. There is no timeout.
    pub async fn acquire(&self, hostname: &str) -> Result<OwnedSemaphorePermit, GateError> {
        self.gate(hostname)
            .acquire_owned()
            .await
            .map_err(|_| GateError::Closed(hostname.to_string()))
    }

    /// Permits currently held for `hostname`.
    pub fn in_flight(&self, hostname: &str) -> usize {
        self.gates
            .lock()
            .expect("gate lock poisoned")
            .get(hostname)
            .map(|gate| self.capacity - gate.available_permits())
            .unwrap_or(0)
    }

    pub fn tracked_hosts(&self) -> usize {
        self.gates.lock().expect("gate lock poisoned").len()
    }

    /// Closes every gate; pending and future acquisitions fail.
    pub fn close(&self) {
        for gate in self.gates.lock().expect("gate lock poisoned").values() {
            gate.close();
        }
    }
}
