//! Egress port pool.
//!
//! Each port tracks the hostnames it is currently serving. A claim marks one
//! (port, hostname) pair as busy until the [`PortClaim`] is dropped; dropping
//! a claim wakes every task waiting for a free port.

use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("no free port for {hostname} within {waited:?}")]
    ClaimTimeout { hostname: String, waited: Duration },
    #[error("port {0} is not part of the pool")]
    UnknownPort(u16),
}

/// One egress proxy endpoint and the hostnames it is serving.
#[derive(Debug)]
pub struct Port {
    number: u16,
    claimed: Mutex<HashSet<String>>,
}

impl Port {
    fn new(number: u16) -> Self {
        Self {
            number,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    /// Claims `hostname` on this port unless it is already claimed.
    fn try_claim(&self, hostname: &str) -> bool {
        let mut guard = self.claimed.lock().expect("port lock poisoned");
        if guard.contains(hostname) {
            return false;
        }
        guard.insert(hostname.to_string());
        true
    }

    fn release(&self, hostname: &str) -> bool {
        self.claimed
            .lock()
            .expect("port lock poisoned")
            .remove(hostname)
    }

    pub fn is_claimed(&self, hostname: &str) -> bool {
        self.claimed
            .lock()
            .expect("port lock poisoned")
            .contains(hostname)
    }

    pub fn claim_count(&self) -> usize {
        self.claimed.lock().expect("port lock poisoned").len()
    }
}

/// Exclusive hold on a (port, hostname) pair.
#[derive(Debug)]
pub struct PortClaim {
    port: Arc<Port>,
    hostname: String,
    released: Arc<Notify>,
    claimed_at: Instant,
}

impl PortClaim {
    pub fn port(&self) -> u16 {
        self.port.number
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Time since the claim was taken.
    pub fn held_for(&self) -> Duration {
        self.claimed_at.elapsed()
    }
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        if !self.port.release(&self.hostname) {
            log::warn!(
                "claim for {} on port {} was already released",
                self.hostname,
                self.port.number
            );
        }
        self.released.notify_waiters();
    }
}

/// Shared pool of egress ports.
#[derive(Debug, Clone)]
pub struct PortPool {
    ports: Arc<Vec<Arc<Port>>>,
    released: Arc<Notify>,
}

impl PortPool {
    pub fn new(numbers: &[u16]) -> Self {
        Self {
            ports: Arc::new(numbers.iter().copied().map(|n| Arc::new(Port::new(n))).collect()),
            released: Arc::new(Notify::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn numbers(&self) -> Vec<u16> {
        self.ports.iter().map(|p| p.number).collect()
    }

    pub fn get(&self, number: u16) -> Option<&Arc<Port>> {
        self.ports.iter().find(|p| p.number == number)
    }

    /// One pass over the ports in shuffled order.
    pub fn try_claim_any(&self, hostname: &str) -> Option<PortClaim> {
        let mut order: Vec<&Arc<Port>> = self.ports.iter().collect();
        order.shuffle(&mut rand::thread_rng());
        order
            .into_iter()
            .find(|port| port.try_claim(hostname))
            .map(|port| self.claim_for(port, hostname))
    }

    pub fn try_claim_port(&self, number: u16, hostname: &str) -> Result<Option<PortClaim>, PortError> {
        let port = self.get(number).ok_or(PortError::UnknownPort(number))?;
        Ok(port.try_claim(hostname).then(|| self.claim_for(port, hostname)))
    }

    /// Claims any port free for `hostname`, waiting for releases up to `timeout`.
    pub async fn claim(&self, hostname: &str, timeout: Duration) -> Result<PortClaim, PortError> {
        self.wait_for(hostname, timeout, || self.try_claim_any(hostname))
            .await
    }

    /// Claims one specific port for `hostname`, waiting for its release up to `timeout`.
    pub async fn claim_port(
        &self,
        number: u16,
        hostname: &str,
        timeout: Duration,
    ) -> Result<PortClaim, PortError> {
        self.get(number).ok_or(PortError::UnknownPort(number))?;
        self.wait_for(hostname, timeout, || {
            self.try_claim_port(number, hostname).ok().flatten()
        })
        .await
    }

    async fn wait_for<F>(
        &self,
        hostname: &str,
        timeout: Duration,
        mut attempt: F,
    ) -> Result<PortClaim, PortError>
    where
        F: FnMut() -> Option<PortClaim>,
    {
        let wait = async {
            loop {
                let notified = self.released.notified();
                tokio::pin!(notified);
                // Register before scanning so a release between the scan and
                // the await is not lost.
                notified.as_mut().enable();

                if let Some(claim) = attempt() {
                    return claim;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| PortError::ClaimTimeout {
                hostname: hostname.to_string(),
                waited: timeout,
            })
    }

    /// Ports currently serving at least one hostname.
    pub fn busy_ports(&self) -> usize {
        self.ports.iter().filter(|p| p.claim_count() > 0).count()
    }

    /// Total live (port, hostname) claims.
    pub fn live_claims(&self) -> usize {
        self.ports.iter().map(|p| p.claim_count()).sum()
    }

    fn claim_for(&self, port: &Arc<Port>, hostname: &str) -> PortClaim {
        PortClaim {
            port: port.clone(),
            hostname: hostname.to_string(),
            released: self.released.clone(),
            claimed_at: Instant::now(),
        }
    }
}
