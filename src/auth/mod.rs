//! Authentication strategies for SSH connections.
//!
//! A trait-based authentication system: each strategy represents one way of
//! proving the topology's credentials to the remote server, and a chain
//! tries them in order until one succeeds.
//!
//! # Available Strategies
//!
//! - [`KeyAuth`]: Public-key authentication from in-memory PEM material
//! - [`PasswordAuth`]: Password-based authentication

mod chain;
mod key;
mod password;
mod traits;

pub(crate) use chain::AuthChain;
pub(crate) use key::KeyAuth;
pub(crate) use password::PasswordAuth;
pub(crate) use traits::AuthStrategy;
