use crate::error::MuxError;
use crate::session::BackendConnection;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// The set of live backend sessions, keyed by logical name.
///
/// Names are unique and case-sensitive. Enumeration order is insertion order;
/// the dispatcher's bare-name probing and the tool-list aggregation both rely
/// on that, so it is part of the contract, not an accident of the container.
///
/// The mapping itself is guarded by a `RwLock`; callers clone the session
/// `Arc` out of the guard before awaiting any round trip, so no registry lock
/// is ever held across backend I/O. A disconnect racing an in-flight dispatch
/// is resolved by reference counting: the removed session stays alive until
/// the dispatch drops its `Arc`, and `close` serializes behind the session's
/// own round-trip lock.
#[derive(Default)]
pub struct BackendRegistry {
    entries: RwLock<Vec<(String, Arc<dyn BackendConnection>)>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session under `name`.
    ///
    /// A duplicate name is rejected with [`MuxError::DuplicateBackend`] and
    /// the existing session is left untouched; callers must disconnect first.
    pub async fn register(
        &self,
        name: impl Into<String>,
        session: Arc<dyn BackendConnection>,
    ) -> Result<(), MuxError> {
        let name = name.into();
        let mut entries = self.entries.write().await;
        if entries.iter().any(|(existing, _)| *existing == name) {
            return Err(MuxError::DuplicateBackend(name));
        }
        info!(backend = %name, "backend registered");
        entries.push((name, session));
        Ok(())
    }

    /// Close and remove the session under `name`.
    ///
    /// Unknown names are a no-op: disconnecting a backend that is not
    /// connected is not an error. A close failure is logged and the entry is
    /// removed regardless, so a wedged subprocess cannot pin a stale name.
    pub async fn unregister(&self, name: &str) {
        let removed = {
            let mut entries = self.entries.write().await;
            match entries.iter().position(|(existing, _)| existing == name) {
                Some(index) => Some(entries.remove(index)),
                None => None,
            }
        };

        if let Some((name, session)) = removed {
            if let Err(error) = session.close().await {
                warn!(backend = %name, %error, "error while closing backend session");
            }
            info!(backend = %name, "backend unregistered");
        }
    }

    /// Connected backend names, in insertion order.
    pub async fn list(&self) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn BackendConnection>> {
        self.entries
            .read()
            .await
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, session)| session.clone())
    }

    /// Snapshot of all sessions, in insertion order.
    pub async fn sessions(&self) -> Vec<(String, Arc<dyn BackendConnection>)> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Close every session and empty the mapping; used at shutdown.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.entries.write().await.drain(..).collect();
        for (name, session) in drained {
            if let Err(error) = session.close().await {
                warn!(backend = %name, %error, "error while closing backend session");
            }
        }
    }
}
