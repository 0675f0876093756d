//! SSH connection establishment and the bounded channel I/O loop.
//!
//! ## Connection Lifecycle
//!
//! 1. **Client Configuration**: Build the russh client configuration with
//!    keepalive enabled; sessions stay open until explicitly disconnected.
//!
//! 2. **Connection Establishment**: TCP + handshake to `(host, port)`,
//!    bounded by the per-attempt connect timeout.
//!
//! 3. **Authentication**: Private key material if the topology supplies it,
//!    password otherwise, via [`AuthChain`].
//!
//! ## Retry Strategy
//!
//! Connect attempts repeat with a fixed short delay via the `backon` crate.
//! Every failure is retried up to the attempt budget; authentication
//! rejections and unreachable hosts are logged distinctly (see
//! [`classify_connect_failure`]) so an operator can tell bad credentials
//! from a dead host, but both surface as the same connection error.
//!
//! ## Command I/O Loop
//!
//! [`drive_channel`] runs one already-opened channel to completion under a
//! wall-clock deadline: stream the optional stdin payload, accumulate
//! stdout/stderr, capture the exit status, then drain whatever the remote
//! wrote between reporting the status and closing the channel. Hitting the
//! deadline abandons the channel and returns a timeout error carrying the
//! partial output.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use russh::{ChannelMsg, client};
use tracing::{error, info, warn};

use crate::auth::{AuthChain, AuthStrategy};
use crate::config::KEEPALIVE_INTERVAL;
use crate::error::{ConnectFailure, ExecError, classify_connect_failure};
use crate::session::NodeHandler;
use crate::types::{CommandResult, NodeIdentity};

/// Build the russh client configuration for node transports.
///
/// Keepalive requests go out every [`KEEPALIVE_INTERVAL`] with up to three
/// unanswered before the transport is torn down. The inactivity timeout is
/// disabled: sessions are reused across the whole process run and closed
/// explicitly.
pub(crate) fn build_client_config() -> Arc<client::Config> {
    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: 3,
        ..Default::default()
    })
}

/// Dial and authenticate one transport with retry.
///
/// Makes up to `attempts` tries with a fixed `delay` between them. Returns
/// the authenticated handle and the number of attempts used.
pub(crate) async fn connect_with_retry(
    identity: &NodeIdentity,
    attempts: u32,
    delay: Duration,
    connect_timeout: Duration,
) -> Result<(client::Handle<NodeHandler>, u32), ExecError> {
    let attempt_counter = AtomicU32::new(0);
    let endpoint = identity.endpoint();

    let backoff = ConstantBuilder::default()
        .with_delay(delay)
        .with_max_times(attempts.saturating_sub(1) as usize);

    let result = (|| async {
        let current_attempt = attempt_counter.fetch_add(1, Ordering::SeqCst);

        if current_attempt > 0 {
            warn!(
                "SSH connection retry attempt {} to {}@{}",
                current_attempt, identity.username, endpoint
            );
        }

        connect_once(identity, connect_timeout).await
    })
    .retry(backoff)
    .notify(|err, dur| {
        // Both failure kinds retry; the log line tells them apart.
        match classify_connect_failure(err) {
            ConnectFailure::Auth => {
                warn!(
                    "SSH authentication rejected by {}: {}. Retrying in {:?}",
                    endpoint, err, dur
                );
            }
            ConnectFailure::Network => {
                warn!(
                    "SSH host {} not reachable: {}. Retrying in {:?}",
                    endpoint, err, dur
                );
            }
        }
    })
    .await;

    let total_attempts = attempt_counter.load(Ordering::SeqCst);

    match result {
        Ok(handle) => {
            if total_attempts > 1 {
                info!(
                    "SSH connection to {}@{} succeeded on attempt {}",
                    identity.username, endpoint, total_attempts
                );
            }
            Ok((handle, total_attempts))
        }
        Err(reason) => {
            error!(
                "SSH connection to {}@{} failed after {} attempt(s). Last error: {}",
                identity.username, endpoint, total_attempts, reason
            );
            Err(ExecError::Connection {
                endpoint,
                reason: format!("after {} attempt(s): {}", total_attempts, reason),
            })
        }
    }
}

/// Establish one SSH connection and authenticate.
async fn connect_once(
    identity: &NodeIdentity,
    connect_timeout: Duration,
) -> Result<client::Handle<NodeHandler>, String> {
    let config = build_client_config();
    let handler = NodeHandler;

    let connect_future = client::connect(
        config,
        (identity.host.as_str(), identity.port),
        handler,
    );

    let mut handle = tokio::time::timeout(connect_timeout, connect_future)
        .await
        .map_err(|_| format!("Connection timed out after {:?}", connect_timeout))?
        .map_err(|e| format!("Failed to connect: {}", e))?;

    let auth_chain = build_auth_chain(identity);
    let success = auth_chain.authenticate(&mut handle, &identity.username).await?;

    if !success {
        return Err("Authentication failed: no authentication methods succeeded".to_string());
    }

    Ok(handle)
}

/// Build the authentication chain from the node's credential material.
///
/// Key material takes precedence over a password when both are present.
fn build_auth_chain(identity: &NodeIdentity) -> AuthChain {
    let mut chain = AuthChain::new();

    if let Some(key_data) = &identity.priv_key {
        chain = chain.with_key(key_data);
    }

    if let Some(password) = &identity.password {
        chain = chain.with_password(password);
    }

    chain
}

/// Run one opened channel to completion under a wall-clock deadline.
///
/// The caller has already opened the channel; this function issues the
/// command, streams `stdin` (closing the write side once fully sent),
/// accumulates output, and collects the exit status.
///
/// # Timeout Behavior
///
/// When the deadline fires the channel is abandoned (closed locally, the
/// remote process is not killed) and [`ExecError::Timeout`] is returned
/// carrying everything collected so far. Timeouts are never silent.
///
/// # Exit Code
///
/// -1 when the remote closes the channel without reporting a status.
/// Output bytes are decoded lossily; malformed sequences never raise.
pub(crate) async fn drive_channel(
    mut channel: russh::Channel<client::Msg>,
    endpoint: &str,
    command: &str,
    timeout: Duration,
    stdin: Option<&[u8]>,
) -> Result<CommandResult, ExecError> {
    let deadline = tokio::time::Instant::now() + timeout;

    channel
        .exec(true, command)
        .await
        .map_err(|e| ExecError::Connection {
            endpoint: endpoint.to_string(),
            reason: format!("failed to issue command: {}", e),
        })?;

    // Pre-allocate buffers to reduce reallocations during output collection
    let mut stdout = Vec::with_capacity(4096);
    let mut stderr = Vec::with_capacity(1024);
    let mut exit_code: Option<u32> = None;

    if let Some(payload) = stdin {
        let wrote = tokio::time::timeout_at(deadline, async {
            channel.data(payload).await?;
            channel.eof().await
        })
        .await;
        match wrote {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(ExecError::Connection {
                    endpoint: endpoint.to_string(),
                    reason: format!("failed to stream stdin: {}", e),
                });
            }
            Err(_) => {
                let _ = channel.close().await;
                return Err(ExecError::Timeout {
                    elapsed: timeout,
                    stdout: String::new(),
                    stderr: String::new(),
                });
            }
        }
    }

    loop {
        let waited = tokio::time::timeout_at(deadline, channel.wait()).await;
        let msg = match waited {
            Ok(msg) => msg,
            Err(_) => {
                warn!(
                    "Command timed out after {:?} on {} ({} bytes stdout, {} bytes stderr collected)",
                    timeout,
                    endpoint,
                    stdout.len(),
                    stderr.len()
                );
                // Abandon the channel; the remote process keeps running.
                let _ = channel.close().await;
                return Err(ExecError::Timeout {
                    elapsed: timeout,
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                });
            }
        };

        match msg {
            Some(ChannelMsg::Data { data }) => {
                stdout.extend_from_slice(&data);
            }
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                // ext == 1 is stderr in SSH protocol
                if ext == 1 {
                    stderr.extend_from_slice(&data);
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                exit_code = Some(exit_status);
            }
            Some(ChannelMsg::Eof) => {
                // Output written after the status report has been drained by
                // now; without a status, keep waiting for it.
                if exit_code.is_some() {
                    break;
                }
            }
            Some(ChannelMsg::Close) => {
                break;
            }
            Some(_) => {
                // Ignore other message types
            }
            None => {
                // Channel closed
                break;
            }
        }
    }

    // Close gracefully so the transport stays reusable.
    let _ = channel.close().await;

    Ok(CommandResult {
        ret_code: exit_code.map(|c| c as i32).unwrap_or(-1),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    mod client_config {
        use super::*;

        #[test]
        fn test_keepalive_enabled() {
            let config = build_client_config();
            assert_eq!(config.keepalive_interval, Some(KEEPALIVE_INTERVAL));
            assert_eq!(config.keepalive_max, 3);
        }

        #[test]
        fn test_no_inactivity_timeout() {
            // Sessions are reused for the life of the process.
            let config = build_client_config();
            assert_eq!(config.inactivity_timeout, None);
        }
    }

    mod auth_chain_building {
        use super::*;

        fn identity(password: Option<&str>, priv_key: Option<&str>) -> NodeIdentity {
            NodeIdentity {
                host: "10.0.0.1".to_string(),
                port: 22,
                username: "testuser".to_string(),
                password: password.map(str::to_string),
                priv_key: priv_key.map(str::to_string),
            }
        }

        #[test]
        fn test_password_only() {
            let chain = build_auth_chain(&identity(Some("secret"), None));
            assert!(!chain.is_empty());
        }

        #[test]
        fn test_key_only() {
            let chain = build_auth_chain(&identity(None, Some("pem")));
            assert!(!chain.is_empty());
        }

        #[test]
        fn test_no_credentials_yields_empty_chain() {
            let chain = build_auth_chain(&identity(None, None));
            assert!(chain.is_empty());
        }

        #[test]
        fn test_key_tried_before_password() {
            let chain = build_auth_chain(&identity(Some("secret"), Some("pem")));
            assert_eq!(chain.len(), 2);
        }
    }
}
