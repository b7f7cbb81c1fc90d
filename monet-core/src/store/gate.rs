use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info};

use super::backend::DocumentBackend;
use crate::error::{CatalogError, Result};

enum GateState {
    Connecting,
    Ready(Arc<dyn DocumentBackend>),
    Failed(Arc<str>),
    Closed,
}

/// Holds operations back until the backend connection settles.
///
/// The write half is held by the connecting task. tokio's `RwLock` is fair,
/// so operations queued behind it are released in the order they arrived.
#[derive(Clone)]
pub(crate) struct ReadyGate {
    state: Arc<RwLock<GateState>>,
}

impl std::fmt::Debug for ReadyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state.try_read() {
            Ok(guard) => match &*guard {
                GateState::Connecting => "connecting",
                GateState::Ready(_) => "ready",
                GateState::Failed(_) => "failed",
                GateState::Closed => "closed",
            },
            Err(_) => "connecting",
        };
        f.debug_struct("ReadyGate").field("state", &state).finish()
    }
}

impl ReadyGate {
    /// Start `connect` in the background and gate on its outcome.
    pub(crate) async fn pending<F>(connect: F) -> Self
    where
        F: Future<Output = Result<Arc<dyn DocumentBackend>>> + Send + 'static,
    {
        let state = Arc::new(RwLock::new(GateState::Connecting));
        let mut guard = Arc::clone(&state).write_owned().await;

        tokio::spawn(async move {
            *guard = match connect.await {
                Ok(backend) => {
                    info!(target: "catalog::store", backend = backend.name(), "metadata store ready");
                    GateState::Ready(backend)
                }
                Err(e) => {
                    error!(target: "catalog::store", error = %e, "could not connect metadata store");
                    GateState::Failed(e.to_string().into())
                }
            };
        });

        Self { state }
    }

    pub(crate) fn ready(backend: Arc<dyn DocumentBackend>) -> Self {
        Self {
            state: Arc::new(RwLock::new(GateState::Ready(backend))),
        }
    }

    /// Wait for the connection to settle and return the backend.
    pub(crate) async fn backend(&self) -> Result<Arc<dyn DocumentBackend>> {
        match &*self.state.read().await {
            GateState::Ready(backend) => Ok(Arc::clone(backend)),
            GateState::Failed(message) => Err(CatalogError::StoreConnection(Arc::clone(message))),
            GateState::Closed => Err(CatalogError::StoreConnection("store is closed".into())),
            // Connecting task ended without settling (panicked).
            GateState::Connecting => Err(CatalogError::StoreConnection(
                "connection attempt did not complete".into(),
            )),
        }
    }

    /// Mark the gate closed and hand back the backend, if one was connected.
    pub(crate) async fn close(&self) -> Option<Arc<dyn DocumentBackend>> {
        let mut state = self.state.write().await;
        match std::mem::replace(&mut *state, GateState::Closed) {
            GateState::Ready(backend) => Some(backend),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryBackend;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn operations_wait_for_connection() {
        let (tx, rx) = oneshot::channel::<()>();
        let gate = ReadyGate::pending(async move {
            let _ = rx.await;
            Ok::<_, CatalogError>(Arc::new(InMemoryBackend::new()) as Arc<dyn DocumentBackend>)
        })
        .await;

        let waiting = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.backend().await.map(|b| b.name()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiting.is_finished());

        tx.send(()).expect("release");
        assert_eq!(waiting.await.expect("join").expect("backend"), "memory");
    }

    #[tokio::test]
    async fn failed_connection_is_reported_to_every_caller() {
        let gate = ReadyGate::pending(async {
            Err::<Arc<dyn DocumentBackend>, _>(CatalogError::StoreConnection("refused".into()))
        })
        .await;

        for _ in 0..2 {
            let err = gate.backend().await.expect_err("connection failed");
            assert!(matches!(err, CatalogError::StoreConnection(msg) if msg.contains("refused")));
        }
    }

    #[tokio::test]
    async fn closed_gate_rejects_operations() {
        let gate = ReadyGate::ready(Arc::new(InMemoryBackend::new()));
        assert!(gate.close().await.is_some());
        assert!(matches!(
            gate.backend().await,
            Err(CatalogError::StoreConnection(_))
        ));
        assert!(gate.close().await.is_none());
    }
}
