//! Reusable SSH session management and bounded command execution for
//! remote testbed nodes.
//!
//! This crate is the remote-execution core of a testbed automation stack:
//! it keeps one authenticated SSH session per `(host, port)` identity and
//! multiplexes command execution, file transfer, and keepalive over it with
//! strict timeout and retry semantics. Everything else (topology parsing,
//! protocol configuration helpers, reporting) is a consumer of the narrow
//! surface exposed here.
//!
//! # Architecture
//!
//! - [`Registry`]: identity-to-session map; exactly one [`Session`] per
//!   node identity, plus the facade consumers call (`exec`, `exec_verified`,
//!   `transfer`, `disconnect`, `disconnect_all`).
//! - [`Session`]: connect/reconnect/disconnect lifecycle around one
//!   transport, with a per-session lock so commands to the same node queue
//!   instead of interleaving.
//! - `client`: connection establishment with fixed-delay retry and the
//!   deadline-bounded channel I/O loop.
//! - `command`: privilege-escalation wrapping and the verified-execution
//!   retry core (retries nonzero return codes only, never transport
//!   errors).
//! - `transfer`: SFTP upload/download, including verbatim wildcard
//!   expansion.
//! - [`Terminal`]: interactive PTY sessions for remote tools that require
//!   one.
//! - [`executor`]: worker-pool fan-out of one command across many nodes.
//!
//! # Example
//!
//! ```ignore
//! use testbed_exec::{NodeIdentity, Registry};
//!
//! let registry = Registry::new();
//! let node: NodeIdentity = serde_json::from_str(topology_entry)?;
//!
//! let result = registry.exec(&node, "uname -a", Some(10), false, None).await?;
//! assert_eq!(result.ret_code, 0);
//!
//! registry.disconnect_all().await;
//! ```

pub(crate) mod auth;
pub(crate) mod client;
pub(crate) mod command;
pub(crate) mod config;
pub mod error;
pub mod executor;
pub mod registry;
pub mod session;
pub mod terminal;
pub(crate) mod transfer;
pub mod types;

pub use error::ExecError;
pub use executor::{NodeRunResult, run_on_nodes};
pub use registry::Registry;
pub use session::Session;
pub use terminal::Terminal;
pub use types::{CommandResult, NodeIdentity, NodeKey, SessionInfo, TransferDirection};
