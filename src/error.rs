//! Typed failures for the execution core, plus connect-failure
//! classification for diagnostic logging.
//!
//! The taxonomy is deliberately small:
//!
//! - [`ExecError::Connection`]: host unreachable, port closed, or
//!   authentication rejected, raised after connect attempts are exhausted.
//! - [`ExecError::Timeout`]: a command or channel-open exceeded its
//!   wall-clock budget. Carries whatever output had been produced when the
//!   deadline fired, so callers can diagnose without re-running.
//! - [`ExecError::Transfer`]: file copy failed for a reason other than
//!   connection loss (path missing, permission denied).
//! - [`ExecError::CommandFailure`]: every verified-execution attempt
//!   returned nonzero; carries the last return code and captured stderr.
//!
//! Connection and timeout errors always propagate unmodified; the verified
//! wrapper is the only layer that retries, and it retries only nonzero
//! return codes, never these errors.

use std::time::Duration;

use thiserror::Error;

/// Failure raised by session lifecycle, command execution, or transfer.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Connect attempts exhausted against `endpoint`.
    #[error("connection to {endpoint} failed: {reason}")]
    Connection { endpoint: String, reason: String },

    /// Wall-clock budget elapsed before the remote side reported completion.
    #[error("timed out after {elapsed:?} ({out} bytes stdout, {err} bytes stderr collected)",
            out = .stdout.len(), err = .stderr.len())]
    Timeout {
        elapsed: Duration,
        /// Output collected before the deadline fired.
        stdout: String,
        stderr: String,
    },

    /// File copy failed on a live transport.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// All verified-execution attempts returned nonzero.
    #[error("{context}: command {command:?} returned {ret_code}\n{stderr}")]
    CommandFailure {
        context: String,
        command: String,
        ret_code: i32,
        stderr: String,
    },
}

/// Kind of a failed connect attempt.
///
/// Both kinds surface to the caller as [`ExecError::Connection`]; the
/// distinction only drives logging, so an operator can tell bad credentials
/// from a dead host without re-running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectFailure {
    /// Host reachable but the server rejected our credentials.
    Auth,
    /// Host unreachable, port closed, or the handshake never completed.
    Network,
}

/// Authentication error patterns. A match means retrying with the same
/// credentials is pointless, which is worth calling out in the log.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "authentication rejected",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
    "all authentication methods failed",
];

/// Classify a connect failure message as authentication or network.
///
/// Authentication patterns are checked first: an error like "connection
/// reset during authentication failed" concerns credentials, not the wire.
pub(crate) fn classify_connect_failure(error: &str) -> ConnectFailure {
    let error_lower = error.to_lowercase();

    for auth_err in AUTH_ERRORS {
        if error_lower.contains(auth_err) {
            return ConnectFailure::Auth;
        }
    }

    ConnectFailure::Network
}
