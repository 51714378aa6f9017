//! Authentication strategy trait definition.

use async_trait::async_trait;
use russh::client;

use crate::ssh::error::SshError;
use crate::ssh::handler::ClientHandler;

/// One SSH authentication method.
///
/// A method may offer several credentials (the public-key method offers every
/// signer it holds) but counts as a single entry in a [`CredentialPlan`](super::CredentialPlan).
#[async_trait]
pub trait AuthStrategy: Send {
    /// Attempt to authenticate with the SSH server.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Authentication succeeded
    /// * `Ok(false)` - Every credential this method offered was rejected
    /// * `Err(_)` - The transport failed during the attempt
    async fn authenticate(
        &mut self,
        handle: &mut client::Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool, SshError>;

    /// Get the name of this authentication strategy.
    ///
    /// Used for logging and debugging purposes.
    fn name(&self) -> &'static str;
}
