//! Authentication strategy trait definition.

use async_trait::async_trait;
use russh::client;

use crate::session::NodeHandler;

/// Trait for SSH authentication strategies.
///
/// Implementations must be thread-safe (`Send + Sync`) for use across
/// async tasks. Errors are plain strings here; the session boundary turns
/// them into typed connection failures.
#[async_trait]
pub(crate) trait AuthStrategy: Send + Sync {
    /// Attempt to authenticate with the SSH server.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Authentication succeeded
    /// * `Ok(false)` - Authentication failed (credentials rejected)
    /// * `Err(message)` - Error during authentication attempt
    async fn authenticate(
        &self,
        handle: &mut client::Handle<NodeHandler>,
        username: &str,
    ) -> Result<bool, String>;

    /// Name of this strategy, for logging.
    fn name(&self) -> &'static str;
}
