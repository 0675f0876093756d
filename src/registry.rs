//! Identity-to-session registry.
//!
//! Guarantees exactly one [`Session`] instance per `(host, port)` identity
//! for its own lifetime: concurrent callers asking for the same identity
//! observe the same `Arc`, so a node never ends up with duplicate
//! transports. The map itself uses `DashMap`, so lookups and insertions are
//! short shard-level operations; session I/O always happens after the map
//! reference has been dropped, never under it.
//!
//! The registry is an explicit value owned by the process's orchestrator
//! and passed by reference to callers. It also exposes the narrow facade
//! the protocol helpers consume: `exec`, `exec_verified`, `transfer`,
//! `disconnect`, `disconnect_all`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::resolve_command_timeout;
use crate::error::ExecError;
use crate::session::Session;
use crate::types::{CommandResult, NodeIdentity, NodeKey, SessionInfo, TransferDirection};

/// Process-wide map of node identities to reusable sessions.
pub struct Registry {
    sessions: DashMap<NodeKey, Arc<Session>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Return the session bound to `node`, creating an inactive one on
    /// first lookup. Creation is cheap; no I/O happens until the session is
    /// first used.
    pub fn get_or_create(&self, node: &NodeIdentity) -> Arc<Session> {
        self.sessions
            .entry(node.key())
            .or_insert_with(|| Arc::new(Session::new(node.clone())))
            .value()
            .clone()
    }

    /// Remove the session for `node` and disconnect it.
    pub async fn evict(&self, node: &NodeIdentity) {
        if let Some((_, session)) = self.sessions.remove(&node.key()) {
            session.disconnect().await;
        }
    }

    /// Disconnect and remove every session. Intended for process shutdown.
    pub async fn evict_all(&self) {
        let keys: Vec<NodeKey> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            if let Some((_, session)) = self.sessions.remove(&key) {
                session.disconnect().await;
            }
        }
    }

    pub fn contains(&self, node: &NodeIdentity) -> bool {
        self.sessions.contains_key(&node.key())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Connection metadata of every currently-established session.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();

        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            if let Some(info) = session.info().await {
                infos.push(info);
            }
        }
        infos
    }

    /// Execute a command on `node`, connecting or reconnecting as needed.
    ///
    /// `timeout_secs` falls back to `SSH_COMMAND_TIMEOUT`, then the
    /// built-in default. With `sudo` the command is wrapped for privilege
    /// escalation; `stdin` is streamed to the remote process.
    pub async fn exec(
        &self,
        node: &NodeIdentity,
        command: &str,
        timeout_secs: Option<u64>,
        sudo: bool,
        stdin: Option<&[u8]>,
    ) -> Result<CommandResult, ExecError> {
        let timeout = Duration::from_secs(resolve_command_timeout(timeout_secs));
        self.get_or_create(node)
            .exec(command, timeout, sudo, stdin)
            .await
    }

    /// Execute a command on `node` and require a zero return code, retrying
    /// nonzero outcomes. The failure message combines `context` with the
    /// command, return code, and captured stderr.
    pub async fn exec_verified(
        &self,
        node: &NodeIdentity,
        command: &str,
        timeout_secs: Option<u64>,
        retries: u32,
        sudo: bool,
        context: &str,
    ) -> Result<(String, String), ExecError> {
        let timeout = Duration::from_secs(resolve_command_timeout(timeout_secs));
        self.get_or_create(node)
            .exec_verified(command, timeout, retries, sudo, context)
            .await
    }

    /// Copy a file between the local host and `node`. `get` selects the
    /// download direction.
    pub async fn transfer(
        &self,
        node: &NodeIdentity,
        local_path: &Path,
        remote_path: &str,
        get: bool,
        timeout: Duration,
        wildcard: bool,
    ) -> Result<(), ExecError> {
        let direction = if get {
            TransferDirection::Download
        } else {
            TransferDirection::Upload
        };
        self.get_or_create(node)
            .transfer(local_path, remote_path, direction, timeout, wildcard)
            .await
    }

    /// Disconnect and forget the session for `node`.
    pub async fn disconnect(&self, node: &NodeIdentity) {
        self.evict(node).await;
    }

    /// Disconnect and forget every session.
    pub async fn disconnect_all(&self) {
        self.evict_all().await;
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(host: &str, port: u16) -> NodeIdentity {
        NodeIdentity {
            host: host.to_string(),
            port,
            username: "testuser".to_string(),
            password: Some("secret".to_string()),
            priv_key: None,
        }
    }

    mod singleton_per_identity {
        use super::*;

        #[test]
        fn test_same_identity_returns_same_instance() {
            let registry = Registry::new();
            let n = node("10.0.0.1", 22);

            let first = registry.get_or_create(&n);
            let second = registry.get_or_create(&n);

            assert!(Arc::ptr_eq(&first, &second));
            assert_eq!(registry.len(), 1);
        }

        #[test]
        fn test_credentials_do_not_affect_identity() {
            let registry = Registry::new();
            let a = node("10.0.0.1", 22);
            let b = NodeIdentity {
                password: Some("different".to_string()),
                ..a.clone()
            };

            let first = registry.get_or_create(&a);
            let second = registry.get_or_create(&b);

            assert!(Arc::ptr_eq(&first, &second));
        }

        #[test]
        fn test_different_ports_are_different_sessions() {
            let registry = Registry::new();
            let first = registry.get_or_create(&node("10.0.0.1", 22));
            let second = registry.get_or_create(&node("10.0.0.1", 2222));

            assert!(!Arc::ptr_eq(&first, &second));
            assert_eq!(registry.len(), 2);
        }

        #[tokio::test]
        async fn test_concurrent_lookups_observe_one_instance() {
            let registry = Arc::new(Registry::new());
            let n = node("10.0.0.1", 22);

            let mut handles = Vec::new();
            for _ in 0..16 {
                let registry = Arc::clone(&registry);
                let n = n.clone();
                handles.push(tokio::spawn(async move { registry.get_or_create(&n) }));
            }

            let mut sessions = Vec::new();
            for handle in handles {
                sessions.push(handle.await.unwrap());
            }

            assert_eq!(registry.len(), 1);
            for session in &sessions[1..] {
                assert!(Arc::ptr_eq(&sessions[0], session));
            }
        }
    }

    mod eviction {
        use super::*;

        #[tokio::test]
        async fn test_evict_removes_entry() {
            let registry = Registry::new();
            let n = node("10.0.0.1", 22);
            registry.get_or_create(&n);
            assert!(registry.contains(&n));

            registry.evict(&n).await;
            assert!(!registry.contains(&n));
            assert!(registry.is_empty());
        }

        #[tokio::test]
        async fn test_evict_absent_is_noop() {
            let registry = Registry::new();
            registry.evict(&node("10.0.0.1", 22)).await;
            assert!(registry.is_empty());
        }

        #[tokio::test]
        async fn test_evict_all_clears_every_entry() {
            let registry = Registry::new();
            registry.get_or_create(&node("10.0.0.1", 22));
            registry.get_or_create(&node("10.0.0.2", 22));
            registry.get_or_create(&node("10.0.0.3", 2222));
            assert_eq!(registry.len(), 3);

            registry.evict_all().await;
            assert!(registry.is_empty());
        }

        #[tokio::test]
        async fn test_lookup_after_evict_creates_fresh_session() {
            let registry = Registry::new();
            let n = node("10.0.0.1", 22);
            let first = registry.get_or_create(&n);
            registry.evict(&n).await;
            let second = registry.get_or_create(&n);

            assert!(!Arc::ptr_eq(&first, &second));
        }
    }

    mod listing {
        use super::*;

        #[tokio::test]
        async fn test_unconnected_sessions_are_not_listed() {
            let registry = Registry::new();
            registry.get_or_create(&node("10.0.0.1", 22));
            // Sessions are created lazily and have no connection metadata yet.
            assert!(registry.list().await.is_empty());
        }
    }
}
