//! Per-port ownership of long-lived rendering sessions.
//!
//! A slot lazily launches its session, checks its health before every hand-out, and
//! relaunches it when the check fails.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::BackendError;

/// A session that can report liveness and be shut down.
#[async_trait]
pub trait ManagedSession: Send + Sync + 'static {
    async fn is_alive(&self) -> bool;

    async fn shutdown(&mut self);

    /// Releases background work for a session that is still shared with
    /// in-flight callers and so cannot be shut down in place.
    fn abandon(&self) {}
}

pub struct SessionSlot<S> {
    port: u16,
    current: Mutex<Option<Arc<S>>>,
    launches: AtomicUsize,
}

impl<S: ManagedSession> SessionSlot<S> {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            current: Mutex::new(None),
            launches: AtomicUsize::new(0),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of times a session was launched for this port.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::Relaxed)
    }

    /// Returns the live session, launching or relaunching it when needed.
    ///
    /// The slot lock is held while launching so concurrent callers on the
    /// same port share one launch.
    pub async fn get_or_launch<F, Fut>(&self, launch: F) -> Result<Arc<S>, BackendError>
    where
        F: FnOnce(u16) -> Fut,
        Fut: Future<Output = Result<S, BackendError>>,
    {
        let mut guard = self.current.lock().await;

        if let Some(session) = guard.as_ref() {
            if session.is_alive().await {
                return Ok(session.clone());
            }
            log::warn!("rendering session on port {} failed its health check; relaunching", self.port);
            if let Some(stale) = guard.take() {
                retire(stale).await;
            }
        }

        let session = Arc::new(launch(self.port).await?);
        self.launches.fetch_add(1, Ordering::Relaxed);
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Shuts the current session down, if any.
    pub async fn shutdown(&self) {
        let stale = self.current.lock().await.take();
        if let Some(stale) = stale {
            retire(stale).await;
        }
    }
}

async fn retire<S: ManagedSession>(session: Arc<S>) {
    match Arc::try_unwrap(session) {
        Ok(mut owned) => owned.shutdown().await,
        // Pages still in flight keep their reference; the last one drops it.
        Err(shared) => shared.abandon(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct FakeSession {
        alive: Arc<AtomicBool>,
        shut_down: Arc<AtomicBool>,
        abandoned: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ManagedSession for FakeSession {
        async fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn shutdown(&mut self) {
            self.shut_down.store(true, Ordering::SeqCst);
        }

        fn abandon(&self) {
            self.abandoned.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn relaunches_dead_sessions() {
        let slot = SessionSlot::<FakeSession>::new(7000);
        let alive = Arc::new(AtomicBool::new(true));
        let shut_down = Arc::new(AtomicBool::new(false));

        let abandoned = Arc::new(AtomicBool::new(false));

        let launch = |_port: u16| {
            let alive = alive.clone();
            let shut_down = shut_down.clone();
            let abandoned = abandoned.clone();
            async move {
                Ok(FakeSession {
                    alive,
                    shut_down,
                    abandoned,
                })
            }
        };

        let first = slot.get_or_launch(launch).await.unwrap();
        drop(first);
        slot.get_or_launch(launch).await.unwrap();
        assert_eq!(slot.launches(), 1);

        alive.store(false, Ordering::SeqCst);
        slot.get_or_launch(launch).await.unwrap();
        assert_eq!(slot.launches(), 2);
        assert!(shut_down.load(Ordering::SeqCst));
        assert!(!abandoned.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dead_session_still_in_use_is_abandoned() {
        let slot = SessionSlot::<FakeSession>::new(7002);
        let alive = Arc::new(AtomicBool::new(true));
        let shut_down = Arc::new(AtomicBool::new(false));
        let abandoned = Arc::new(AtomicBool::new(false));

        let first = slot
            .get_or_launch(|_| {
                let (alive, shut_down, abandoned) =
                    (alive.clone(), shut_down.clone(), abandoned.clone());
                async move {
                    Ok(FakeSession {
                        alive,
                        shut_down,
                        abandoned,
                    })
                }
            })
            .await
            .unwrap();

        alive.store(false, Ordering::SeqCst);
        let second = slot
            .get_or_launch(|_| async {
                Ok(FakeSession {
                    alive: Arc::new(AtomicBool::new(true)),
                    shut_down: Arc::new(AtomicBool::new(false)),
                    abandoned: Arc::new(AtomicBool::new(false)),
                })
            })
            .await
            .unwrap();

        assert_eq!(slot.launches(), 2);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(abandoned.load(Ordering::SeqCst));
        assert!(!shut_down.load(Ordering::SeqCst));
        drop(first);
    }

    #[tokio::test]
    async fn launch_errors_propagate_and_leave_slot_empty() {
        let slot = SessionSlot::<FakeSession>::new(7001);
        let result = slot
            .get_or_launch(|port| async move {
                Err(BackendError::Session(format!("no browser for {port}")))
            })
            .await;
        assert!(matches!(result, Err(BackendError::Session(_))));
        assert_eq!(slot.launches(), 0);
    }
}
