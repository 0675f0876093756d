//! Session lifecycle management.
//!
//! A [`Session`] owns at most one authenticated transport for its node
//! identity. The transport lives behind a tokio mutex that is held for the
//! whole of channel-open plus command I/O, so concurrent commands against
//! the same node queue instead of interleaving on one transport. Different
//! nodes have different sessions and never contend.
//!
//! State machine: inactive (no transport, or transport no longer alive) or
//! active (transport alive, keepalive running). `connect` on an active
//! session is a no-op; transport loss is detected lazily on the next
//! liveness check; `disconnect` is idempotent.
//!
//! # Thread Safety
//!
//! `Session` values are shared as `Arc<Session>` by the registry; every
//! method takes `&self` and is safe to call from any task.

use std::path::Path;
use std::time::Duration;

use russh::{Disconnect, client, keys};
use russh_sftp::client::SftpSession;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::client::{connect_with_retry, drive_channel};
use crate::command::{escalate_command, verify_with_retries};
use crate::config::{
    CHANNEL_OPEN_TIMEOUT, VERIFY_RETRY_DELAY, resolve_connect_attempts, resolve_connect_timeout,
    resolve_retry_delay_ms,
};
use crate::error::ExecError;
use crate::terminal::{self, Terminal};
use crate::transfer;
use crate::types::{CommandResult, NodeIdentity, SessionInfo, TransferDirection};

/// Client handler for russh that accepts all host keys.
///
/// Testbed nodes are reinstalled constantly, so their host keys churn;
/// verification is the topology operator's problem, not this layer's.
pub struct NodeHandler;

impl client::Handler for NodeHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Why a channel failed to open on a live transport.
enum ChannelOpenError {
    TimedOut,
    Failed(String),
}

impl std::fmt::Display for ChannelOpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelOpenError::TimedOut => {
                write!(f, "channel open timed out after {:?}", CHANNEL_OPEN_TIMEOUT)
            }
            ChannelOpenError::Failed(reason) => write!(f, "{}", reason),
        }
    }
}

/// Transport state guarded by the per-session lock.
struct SessionState {
    handle: Option<client::Handle<NodeHandler>>,
    info: Option<SessionInfo>,
}

/// One reusable authenticated connection to a remote node.
pub struct Session {
    identity: NodeIdentity,
    transport: Mutex<SessionState>,
}

impl Session {
    /// Create an inactive session for `identity`. No I/O happens until the
    /// first `connect` or command.
    pub fn new(identity: NodeIdentity) -> Self {
        Self {
            identity,
            transport: Mutex::new(SessionState {
                handle: None,
                info: None,
            }),
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Connect the session, reusing the live transport if there is one.
    ///
    /// Makes up to `attempts` tries with a fixed short delay between them;
    /// after exhausting them the last failure surfaces as
    /// [`ExecError::Connection`].
    pub async fn connect(&self, attempts: u32) -> Result<(), ExecError> {
        let mut state = self.transport.lock().await;
        self.connect_locked(&mut state, attempts).await
    }

    /// True iff a transport exists and still reports itself alive.
    /// Never fails.
    pub async fn is_active(&self) -> bool {
        let state = self.transport.lock().await;
        matches!(&state.handle, Some(handle) if !handle.is_closed())
    }

    /// Close the transport if one exists. Idempotent.
    pub async fn disconnect(&self) {
        let mut state = self.transport.lock().await;
        state.info = None;
        if let Some(handle) = state.handle.take() {
            debug!("Disconnecting session to {}", self.identity.endpoint());
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "")
                .await;
        }
    }

    /// Connection metadata, if the session is currently established.
    pub async fn info(&self) -> Option<SessionInfo> {
        self.transport.lock().await.info.clone()
    }

    /// Execute one command over a fresh channel.
    ///
    /// Connects lazily (a lost transport is redialed here), opens the
    /// channel under a short budget with exactly one reconnect-and-retry on
    /// failure, then drives the command to completion bounded by `timeout`.
    /// A nonzero return code is a normal result; only connection loss and
    /// the deadline raise.
    pub async fn exec(
        &self,
        command: &str,
        timeout: Duration,
        escalate: bool,
        stdin: Option<&[u8]>,
    ) -> Result<CommandResult, ExecError> {
        let command = if escalate {
            escalate_command(command)
        } else {
            command.to_string()
        };
        let endpoint = self.identity.endpoint();

        let mut state = self.transport.lock().await;
        self.connect_locked(&mut state, resolve_connect_attempts(None))
            .await?;

        let first = Self::open_channel(&state).await;
        let channel = match first {
            Ok(channel) => channel,
            Err(open_err) => {
                warn!(
                    "Channel open on {} failed ({}), reconnecting once",
                    endpoint, open_err
                );
                state.handle = None;
                self.connect_locked(&mut state, 1).await?;
                match Self::open_channel(&state).await {
                    Ok(channel) => channel,
                    Err(ChannelOpenError::TimedOut) => {
                        return Err(ExecError::Timeout {
                            elapsed: CHANNEL_OPEN_TIMEOUT,
                            stdout: String::new(),
                            stderr: String::new(),
                        });
                    }
                    Err(ChannelOpenError::Failed(reason)) => {
                        return Err(ExecError::Connection { endpoint, reason });
                    }
                }
            }
        };

        drive_channel(channel, &endpoint, &command, timeout, stdin).await
    }

    /// Execute a command and require a zero return code, retrying nonzero
    /// outcomes up to `retries` additional times.
    ///
    /// Timeouts and connection errors propagate immediately without being
    /// retried here.
    pub async fn exec_verified(
        &self,
        command: &str,
        timeout: Duration,
        retries: u32,
        escalate: bool,
        context: &str,
    ) -> Result<(String, String), ExecError> {
        verify_with_retries(
            || self.exec(command, timeout, escalate, None),
            command,
            retries,
            VERIFY_RETRY_DELAY,
            context,
        )
        .await
    }

    /// Copy a file between the local host and the node over SFTP.
    ///
    /// With `wildcard`, the source path is treated as a glob pattern and
    /// every match is copied into the destination directory; the pattern is
    /// passed through verbatim, never sanitized. The whole operation is
    /// bounded by `timeout`. A missing path on a live transport raises
    /// [`ExecError::Transfer`], not a connection error.
    pub async fn transfer(
        &self,
        local_path: &Path,
        remote_path: &str,
        direction: TransferDirection,
        timeout: Duration,
        wildcard: bool,
    ) -> Result<(), ExecError> {
        let endpoint = self.identity.endpoint();

        let mut state = self.transport.lock().await;
        self.connect_locked(&mut state, resolve_connect_attempts(None))
            .await?;

        // Dropping the SFTP session tears down its channel.
        let sftp = Self::open_sftp(&state, &endpoint).await?;
        let copy = transfer::run(&sftp, local_path, remote_path, direction, wildcard);
        match tokio::time::timeout(timeout, copy).await {
            Ok(result) => result,
            Err(_) => Err(ExecError::Timeout {
                elapsed: timeout,
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }

    /// Open an interactive PTY terminal on a fresh channel and wait for the
    /// shell prompt to appear.
    ///
    /// The returned [`Terminal`] runs its own channel and does not hold the
    /// session lock, so regular commands can keep flowing while it is open.
    pub async fn open_terminal(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> Result<Terminal, ExecError> {
        let endpoint = self.identity.endpoint();

        let mut state = self.transport.lock().await;
        self.connect_locked(&mut state, resolve_connect_attempts(None))
            .await?;

        let channel = match Self::open_channel(&state).await {
            Ok(channel) => channel,
            Err(ChannelOpenError::TimedOut) => {
                return Err(ExecError::Timeout {
                    elapsed: CHANNEL_OPEN_TIMEOUT,
                    stdout: String::new(),
                    stderr: String::new(),
                });
            }
            Err(ChannelOpenError::Failed(reason)) => {
                return Err(ExecError::Connection { endpoint, reason });
            }
        };
        drop(state);

        terminal::start(channel, &endpoint, prompt, timeout).await
    }

    /// Reuse the live transport or dial a fresh one, under the caller's
    /// lock. Stale handles are dropped before redialing.
    async fn connect_locked(
        &self,
        state: &mut SessionState,
        attempts: u32,
    ) -> Result<(), ExecError> {
        if let Some(handle) = &state.handle {
            if !handle.is_closed() {
                debug!("Reusing session to {}", self.identity.endpoint());
                return Ok(());
            }
            debug!(
                "Transport to {} no longer alive, reconnecting",
                self.identity.endpoint()
            );
        }

        state.handle = None;
        state.info = None;

        let delay = Duration::from_millis(resolve_retry_delay_ms(None));
        let connect_timeout = Duration::from_secs(resolve_connect_timeout(None));
        let (handle, used_attempts) =
            connect_with_retry(&self.identity, attempts, delay, connect_timeout).await?;

        state.info = Some(SessionInfo {
            endpoint: self.identity.endpoint(),
            username: self.identity.username.clone(),
            connected_at: chrono::Utc::now().to_rfc3339(),
            connect_attempts: used_attempts,
        });
        state.handle = Some(handle);
        Ok(())
    }

    /// Open a session channel on the live transport under a short budget.
    async fn open_channel(
        state: &SessionState,
    ) -> Result<russh::Channel<client::Msg>, ChannelOpenError> {
        let handle = state
            .handle
            .as_ref()
            .ok_or_else(|| ChannelOpenError::Failed("transport not connected".to_string()))?;

        match tokio::time::timeout(CHANNEL_OPEN_TIMEOUT, handle.channel_open_session()).await {
            Ok(Ok(channel)) => Ok(channel),
            Ok(Err(e)) => Err(ChannelOpenError::Failed(format!(
                "failed to open channel: {}",
                e
            ))),
            Err(_) => Err(ChannelOpenError::TimedOut),
        }
    }

    /// Open a channel and start the SFTP subsystem on it.
    async fn open_sftp(state: &SessionState, endpoint: &str) -> Result<SftpSession, ExecError> {
        let channel = match Self::open_channel(state).await {
            Ok(channel) => channel,
            Err(ChannelOpenError::TimedOut) => {
                return Err(ExecError::Timeout {
                    elapsed: CHANNEL_OPEN_TIMEOUT,
                    stdout: String::new(),
                    stderr: String::new(),
                });
            }
            Err(ChannelOpenError::Failed(reason)) => {
                return Err(ExecError::Connection {
                    endpoint: endpoint.to_string(),
                    reason,
                });
            }
        };

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| ExecError::Connection {
                endpoint: endpoint.to_string(),
                reason: format!("failed to request sftp subsystem: {}", e),
            })?;

        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ExecError::Connection {
                endpoint: endpoint.to_string(),
                reason: format!("failed to start sftp session: {}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_node() -> NodeIdentity {
        // Port 1 on loopback refuses immediately on any sane test host.
        NodeIdentity {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: "testuser".to_string(),
            password: Some("secret".to_string()),
            priv_key: None,
        }
    }

    mod lifecycle {
        use super::*;

        #[tokio::test]
        async fn test_new_session_is_inactive() {
            let session = Session::new(unreachable_node());
            assert!(!session.is_active().await);
            assert!(session.info().await.is_none());
        }

        #[tokio::test]
        async fn test_disconnect_is_idempotent_when_inactive() {
            let session = Session::new(unreachable_node());
            session.disconnect().await;
            session.disconnect().await;
            assert!(!session.is_active().await);
        }

        #[tokio::test]
        async fn test_connect_to_closed_port_is_connection_error() {
            let session = Session::new(unreachable_node());
            let err = session.connect(1).await.unwrap_err();
            assert!(matches!(err, ExecError::Connection { .. }));
            assert!(err.to_string().contains("127.0.0.1:1"));
            assert!(!session.is_active().await);
        }

        #[tokio::test]
        async fn test_identity_is_preserved() {
            let node = unreachable_node();
            let session = Session::new(node.clone());
            assert_eq!(session.identity().endpoint(), node.endpoint());
        }
    }
}
