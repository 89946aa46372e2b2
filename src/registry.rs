//! An ambient, process-wide registry of live connections.
//!
//! Not part of the core dispatch path — a convenience for callers that
//! want to look a [`Connection`] up by id (e.g. from an HTTP handler or a
//! metrics endpoint) without threading one through by hand. A
//! [`ParentClient`](crate::collaborator::ParentClient) implementation
//! typically owns one of these and calls
//! [`ConnectionRegistry::remove`] from its `remove_connection` hook.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_lock::RwLock;

use crate::connection::Connection;

/// A weak map from connection id to connection, so a closed connection
/// can be dropped without the registry itself keeping it alive.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Weak<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, id: impl Into<String>, connection: &Arc<Connection>) {
        self.connections
            .write()
            .await
            .insert(id.into(), Arc::downgrade(connection));
    }

    /// Look up a live connection by id. Returns `None` if it was never
    /// registered, or has since been dropped.
    pub async fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.read().await.get(id).and_then(Weak::upgrade)
    }

    pub async fn remove(&self, id: &str) {
        self.connections.write().await.remove(id);
    }

    /// Snapshot every still-live connection, dropping any entries whose
    /// weak reference has expired.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .await
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
