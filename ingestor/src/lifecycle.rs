use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::{error, info};

use crate::errors::{Error, Result};
use crate::metrics::STORAGE_READY;
use crate::store::TelemetryStore;

/// Connection state of the durable store.
///
/// `Disconnected -> Connecting -> Ready`, or `Connecting -> Failed`. `Failed`
/// is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Disconnected,
    Connecting,
    Ready,
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Disconnected => "disconnected",
            LifecycleState::Connecting => "connecting",
            LifecycleState::Ready => "ready",
            LifecycleState::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the single store handle and gates access to it on readiness.
pub struct StorageLifecycle {
    state: RwLock<LifecycleState>,
    store: OnceLock<Arc<dyn TelemetryStore>>,
}

impl Default for StorageLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StorageLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageLifecycle")
            .field("state", &self.state())
            .finish()
    }
}

impl StorageLifecycle {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::Disconnected),
            store: OnceLock::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    /// The shared store handle, only while `Ready`.
    pub fn handle(&self) -> Option<Arc<dyn TelemetryStore>> {
        if !self.is_ready() {
            return None;
        }
        self.store.get().cloned()
    }

    pub fn begin_connecting(&self) -> Result<()> {
        self.transition(LifecycleState::Disconnected, LifecycleState::Connecting)?;
        info!("Storage connecting");
        Ok(())
    }

    /// Publishes the confirmed store. The handle is installed before the
    /// state flips so a reader that sees `Ready` always finds it.
    pub fn mark_ready(&self, store: Arc<dyn TelemetryStore>) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if *state != LifecycleState::Connecting {
            return Err(Error::InvalidTransition {
                from: state.as_str(),
                to: LifecycleState::Ready.as_str(),
            });
        }
        if self.store.set(store).is_err() {
            return Err(Error::InvalidTransition {
                from: state.as_str(),
                to: LifecycleState::Ready.as_str(),
            });
        }
        *state = LifecycleState::Ready;
        STORAGE_READY.set(1.0);
        info!("Storage ready");
        Ok(())
    }

    pub fn mark_failed(&self, reason: &str) -> Result<()> {
        self.transition(LifecycleState::Connecting, LifecycleState::Failed)?;
        STORAGE_READY.set(0.0);
        error!("Storage connection failed: {}", reason);
        Ok(())
    }

    /// Runs the whole startup sequence with `connector`, ending in `Ready` or
    /// `Failed`. A connector error is reported as `FatalStartup`.
    pub async fn connect<F, Fut>(&self, connector: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn TelemetryStore>>>,
    {
        self.begin_connecting()?;

        match connector().await {
            Ok(store) => self.mark_ready(store),
            Err(e) => {
                let reason = e.to_string();
                self.mark_failed(&reason)?;
                Err(Error::FatalStartup(reason))
            }
        }
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if *state != from {
            return Err(Error::InvalidTransition {
                from: state.as_str(),
                to: to.as_str(),
            });
        }
        *state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryLimits;
    use crate::memory::MemoryTelemetryStore;

    fn memory_store() -> Arc<dyn TelemetryStore> {
        Arc::new(MemoryTelemetryStore::new(QueryLimits::default()))
    }

    #[test]
    fn test_starts_disconnected() {
        let lifecycle = StorageLifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Disconnected);
        assert!(!lifecycle.is_ready());
        assert!(lifecycle.handle().is_none());
    }

    #[test]
    fn test_no_handle_while_connecting() {
        let lifecycle = StorageLifecycle::new();
        lifecycle.begin_connecting().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Connecting);
        assert!(lifecycle.handle().is_none());
    }

    #[tokio::test]
    async fn test_connect_success() {
        let lifecycle = StorageLifecycle::new();
        lifecycle
            .connect(|| async { Ok::<_, Error>(memory_store()) })
            .await
            .unwrap();

        assert!(lifecycle.is_ready());
        assert!(lifecycle.handle().is_some());
    }

    #[tokio::test]
    async fn test_connect_failure_is_terminal() {
        let lifecycle = StorageLifecycle::new();
        let result = lifecycle
            .connect(|| async {
                Err::<Arc<dyn TelemetryStore>, _>(Error::Database(sqlx::Error::PoolTimedOut))
            })
            .await;

        assert!(matches!(result, Err(Error::FatalStartup(_))));
        assert_eq!(lifecycle.state(), LifecycleState::Failed);
        assert!(lifecycle.handle().is_none());

        // Failed cannot be left.
        assert!(lifecycle.begin_connecting().is_err());
        assert!(lifecycle.mark_ready(memory_store()).is_err());
        assert_eq!(lifecycle.state(), LifecycleState::Failed);
    }

    #[test]
    fn test_ready_requires_connecting() {
        let lifecycle = StorageLifecycle::new();
        let err = lifecycle.mark_ready(memory_store()).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: "disconnected",
                to: "ready"
            }
        ));
        assert!(!lifecycle.is_ready());
    }

    #[test]
    fn test_connecting_happens_once() {
        let lifecycle = StorageLifecycle::new();
        lifecycle.begin_connecting().unwrap();
        assert!(lifecycle.begin_connecting().is_err());
    }
}
