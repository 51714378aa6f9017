//! SSH agent connection.

use std::path::Path;

use russh::keys::{self, PublicKey};
use tokio::net::UnixStream;
use tracing::debug;

/// An open agent connection and the identities it advertised.
///
/// Owned by exactly one session and dropped (closing the socket) when the
/// session closes.
pub struct AgentConnection {
    client: keys::agent::client::AgentClient<UnixStream>,
    identities: Vec<PublicKey>,
}

impl AgentConnection {
    /// Connect to the agent at `socket` and list its identities.
    ///
    /// Returns `None` when the agent is unreachable or holds no keys. Agent
    /// problems never fail credential resolution.
    pub async fn connect(socket: &Path) -> Option<Self> {
        let mut client = match keys::agent::client::AgentClient::connect_uds(socket).await {
            Ok(client) => client,
            Err(e) => {
                debug!("SSH agent at {} unreachable: {}", socket.display(), e);
                return None;
            }
        };

        let identities = match client.request_identities().await {
            Ok(identities) => identities,
            Err(e) => {
                debug!("Failed to get identities from SSH agent: {}", e);
                return None;
            }
        };

        if identities.is_empty() {
            debug!("No identities found in SSH agent");
            return None;
        }

        debug!("SSH agent offers {} identities", identities.len());
        Some(Self { client, identities })
    }

    pub fn identities(&self) -> &[PublicKey] {
        &self.identities
    }

    pub(crate) fn signer(&mut self) -> &mut keys::agent::client::AgentClient<UnixStream> {
        &mut self.client
    }
}

impl std::fmt::Debug for AgentConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConnection")
            .field("identities", &self.identities.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_socket_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AgentConnection::connect(&dir.path().join("agent.sock")).await.is_none());
    }

    #[tokio::test]
    async fn test_non_socket_path_is_none() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(AgentConnection::connect(file.path()).await.is_none());
    }
}
