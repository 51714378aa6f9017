//! russh client handler that checks server keys against the trust store.
//!
//! A rejected key aborts the handshake with [`SshError::HostKeyRejected`],
//! which `client::connect` hands back unchanged. An unknown key accepted under
//! the lenient policy is parked in a shared slot so the session can record it
//! once authentication has succeeded.

use std::sync::{Arc, Mutex};

use russh::{client, keys};
use tracing::{debug, warn};

use super::error::SshError;
use super::known_hosts::{TrustDecision, TrustStore, fingerprint};

/// Unknown host key waiting to be recorded after a successful connect.
pub type PendingHostKey = Arc<Mutex<Option<keys::PublicKey>>>;

pub struct ClientHandler {
    host: String,
    port: u16,
    trust: TrustStore,
    pending: PendingHostKey,
}

impl ClientHandler {
    pub fn new(host: impl Into<String>, port: u16, trust: TrustStore) -> Self {
        Self {
            host: host.into(),
            port,
            trust,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Shared slot filled when an unknown host key is accepted.
    pub fn pending_host_key(&self) -> PendingHostKey {
        Arc::clone(&self.pending)
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        match self.trust.verify(&self.host, self.port, server_public_key) {
            Ok(TrustDecision::Trusted) | Ok(TrustDecision::Unverified) => Ok(true),
            Ok(TrustDecision::Unknown) => {
                debug!(
                    "Accepting unknown {} host key {} for {}",
                    server_public_key.algorithm().as_str(),
                    fingerprint(server_public_key),
                    self.host
                );
                if let Ok(mut slot) = self.pending.lock() {
                    *slot = Some(server_public_key.clone());
                }
                Ok(true)
            }
            Err(reason) => {
                warn!("Rejecting host key for {}: {}", self.host, reason);
                Err(SshError::HostKeyRejected {
                    host: self.host.clone(),
                    reason,
                })
            }
        }
    }
}
