//! Configuration resolution for the execution core.
//!
//! Tunable values resolve with a three-tier priority:
//!
//! 1. **Parameter** - Explicitly provided function parameter (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSH_CONNECT_TIMEOUT` | 30s | Per-attempt connection timeout in seconds |
//! | `SSH_COMMAND_TIMEOUT` | 10s | Command execution timeout in seconds |
//! | `SSH_CONNECT_ATTEMPTS` | 3 | Connect attempts before giving up |
//! | `SSH_RETRY_DELAY_MS` | 1000ms | Delay between connect attempts |

use std::env;
use std::time::Duration;

/// Default per-attempt SSH connection timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default command execution timeout in seconds
pub(crate) const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 10;

/// Default number of connect attempts
pub(crate) const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;

/// Default delay between connect attempts in milliseconds
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Keepalive request interval on established transports
pub(crate) const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Budget for opening one session channel on a live transport
pub(crate) const CHANNEL_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep between verified-execution attempts
pub(crate) const VERIFY_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Environment variable name for the per-attempt connection timeout
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";

/// Environment variable name for the command execution timeout
pub(crate) const COMMAND_TIMEOUT_ENV_VAR: &str = "SSH_COMMAND_TIMEOUT";

/// Environment variable name for the connect attempt count
pub(crate) const CONNECT_ATTEMPTS_ENV_VAR: &str = "SSH_CONNECT_ATTEMPTS";

/// Environment variable name for the connect retry delay in milliseconds
pub(crate) const RETRY_DELAY_MS_ENV_VAR: &str = "SSH_RETRY_DELAY_MS";

/// Resolve the connection timeout with priority: parameter -> env var -> default
pub(crate) fn resolve_connect_timeout(timeout_param: Option<u64>) -> u64 {
    if let Some(timeout) = timeout_param {
        return timeout;
    }

    if let Ok(env_timeout) = env::var(CONNECT_TIMEOUT_ENV_VAR)
        && let Ok(timeout) = env_timeout.parse::<u64>()
    {
        return timeout;
    }

    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// Resolve the command execution timeout with priority: parameter -> env var -> default
pub(crate) fn resolve_command_timeout(timeout_param: Option<u64>) -> u64 {
    if let Some(timeout) = timeout_param {
        return timeout;
    }

    if let Ok(env_timeout) = env::var(COMMAND_TIMEOUT_ENV_VAR)
        && let Ok(timeout) = env_timeout.parse::<u64>()
    {
        return timeout;
    }

    DEFAULT_COMMAND_TIMEOUT_SECS
}

/// Resolve the connect attempt count with priority: parameter -> env var -> default
///
/// A value of zero would mean "never dial", so it is clamped to one attempt.
pub(crate) fn resolve_connect_attempts(attempts_param: Option<u32>) -> u32 {
    let attempts = if let Some(attempts) = attempts_param {
        attempts
    } else if let Ok(env_attempts) = env::var(CONNECT_ATTEMPTS_ENV_VAR)
        && let Ok(attempts) = env_attempts.parse::<u32>()
    {
        attempts
    } else {
        DEFAULT_CONNECT_ATTEMPTS
    };

    attempts.max(1)
}

/// Resolve the connect retry delay with priority: parameter -> env var -> default
pub(crate) fn resolve_retry_delay_ms(retry_delay_param: Option<u64>) -> u64 {
    if let Some(delay) = retry_delay_param {
        return delay;
    }

    if let Ok(env_delay) = env::var(RETRY_DELAY_MS_ENV_VAR)
        && let Ok(delay) = env_delay.parse::<u64>()
    {
        return delay;
    }

    DEFAULT_RETRY_DELAY_MS
}
