//! Credential resolution.
//!
//! Signers are collected in priority order:
//!
//! 1. identities held by the SSH agent
//! 2. `IdentityFile`s contributed by the matching host alias
//! 3. the explicit key (decrypted with the explicit passphrase, if any)
//! 4. the default key paths (ed25519, ecdsa, rsa, dsa)
//!
//! Each key path contributes at most one signer, and a key already offered by
//! the agent is not offered again from disk. All signers are then offered
//! through a single public-key method, followed by at most one password
//! method. Servers cap authentication attempts per connection, so offering
//! each key as its own method can lock a client out before the working key is
//! reached.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use russh::client;
use russh::keys::{PrivateKeyWithHashAlg, PublicKey};
use tracing::{debug, info};

use crate::ssh::error::SshError;
use crate::ssh::handler::ClientHandler;

use super::agent::AgentConnection;
use super::key::{LoadedKey, path_identity};
use super::password::PasswordAuth;
use super::traits::AuthStrategy;

/// Inputs to credential resolution.
#[derive(Debug, Clone, Default)]
pub struct CredentialRequest {
    /// Agent socket to query. `None` skips the agent.
    pub agent_socket: Option<PathBuf>,
    /// Identity files from the matching alias, in declaration order.
    pub alias_identity_files: Vec<PathBuf>,
    /// Explicitly requested private key.
    pub explicit_key: Option<PathBuf>,
    /// Passphrase for `explicit_key` only.
    pub passphrase: Option<String>,
    /// Conventional key locations, most preferred first.
    pub default_key_paths: Vec<PathBuf>,
    /// Password for the fallback method. Empty counts as absent.
    pub password: Option<String>,
}

/// Every signer, offered as one public-key method.
#[derive(Debug, Default)]
pub struct PublicKeyAuth {
    agent: Option<AgentConnection>,
    keys: Vec<LoadedKey>,
}

impl PublicKeyAuth {
    pub fn signer_count(&self) -> usize {
        self.agent.as_ref().map_or(0, |a| a.identities().len()) + self.keys.len()
    }

    /// Paths of the file-backed signers, in the order they are offered.
    pub fn key_paths(&self) -> Vec<&Path> {
        self.keys.iter().map(|k| k.path()).collect()
    }

    fn is_empty(&self) -> bool {
        self.signer_count() == 0
    }
}

#[async_trait]
impl AuthStrategy for PublicKeyAuth {
    async fn authenticate(
        &mut self,
        handle: &mut client::Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool, SshError> {
        // For RSA keys, use the best supported hash algorithm
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!("Using RSA hash algorithm: {:?}", hash_alg);

        if let Some(agent) = self.agent.as_mut() {
            let identities = agent.identities().to_vec();
            for identity in identities {
                debug!("Trying SSH agent identity: {:?}", identity.comment());
                match handle
                    .authenticate_publickey_with(username, identity, hash_alg, agent.signer())
                    .await
                {
                    Ok(result) if result.success() => {
                        info!("Authenticated with SSH agent identity");
                        return Ok(true);
                    }
                    Ok(_) => debug!("Agent identity not accepted, trying next"),
                    Err(e) => debug!("Agent signing failed: {:?}, trying next", e),
                }
            }
        }

        for key in &self.keys {
            debug!("Trying key {}", key.path().display());
            let key_with_hash = PrivateKeyWithHashAlg::new(key.private_key(), hash_alg);
            let result = handle.authenticate_publickey(username, key_with_hash).await?;
            if result.success() {
                info!("Authenticated with key {}", key.path().display());
                return Ok(true);
            }
            debug!("Key {} not accepted", key.path().display());
        }

        Ok(false)
    }

    fn name(&self) -> &'static str {
        "publickey"
    }
}

/// The authentication methods for one session.
///
/// Holds at most one public-key method and at most one password method, and
/// never zero methods.
#[derive(Debug)]
pub struct CredentialPlan {
    public_key: Option<PublicKeyAuth>,
    password: Option<PasswordAuth>,
}

impl CredentialPlan {
    /// Build a plan, failing with [`SshError::NoAuthMethod`] if nothing usable
    /// was found. Individual key and agent failures are skipped.
    pub async fn resolve(request: CredentialRequest) -> Result<Self, SshError> {
        let agent = match request.agent_socket.as_deref() {
            Some(socket) => AgentConnection::connect(socket).await,
            None => None,
        };

        let mut collector = KeyCollector::new(agent.as_ref());
        for path in &request.alias_identity_files {
            collector.add(path, None);
        }
        if let Some(path) = request.explicit_key.as_deref() {
            collector.add(path, request.passphrase.as_deref());
        }
        for path in &request.default_key_paths {
            collector.add(path, None);
        }

        let public_key = PublicKeyAuth {
            agent,
            keys: collector.finish(),
        };
        let public_key = (!public_key.is_empty()).then_some(public_key);

        let password = request
            .password
            .filter(|p| !p.is_empty())
            .map(PasswordAuth::new);

        if public_key.is_none() && password.is_none() {
            return Err(SshError::NoAuthMethod);
        }

        let plan = Self {
            public_key,
            password,
        };
        debug!(
            "Credential plan: {} signer(s), password: {}",
            plan.signer_count(),
            plan.has_password()
        );
        Ok(plan)
    }

    /// Number of authentication methods (1 or 2).
    pub fn method_count(&self) -> usize {
        usize::from(self.public_key.is_some()) + usize::from(self.password.is_some())
    }

    pub fn signer_count(&self) -> usize {
        self.public_key.as_ref().map_or(0, PublicKeyAuth::signer_count)
    }

    /// True when at least one key-based credential is available.
    pub fn has_signers(&self) -> bool {
        self.signer_count() > 0
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn key_paths(&self) -> Vec<&Path> {
        self.public_key
            .as_ref()
            .map(PublicKeyAuth::key_paths)
            .unwrap_or_default()
    }

    /// Drop the agent connection. Safe to call repeatedly.
    pub fn release_agent(&mut self) {
        if let Some(public_key) = self.public_key.as_mut()
            && public_key.agent.take().is_some()
        {
            debug!("Released SSH agent connection");
        }
    }

    /// Run the methods in order until one succeeds.
    ///
    /// `Ok(false)` means every credential was rejected; errors are transport
    /// failures.
    pub async fn authenticate(
        &mut self,
        handle: &mut client::Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool, SshError> {
        let mut methods: Vec<&mut dyn AuthStrategy> = Vec::with_capacity(2);
        if let Some(public_key) = self.public_key.as_mut() {
            methods.push(public_key);
        }
        if let Some(password) = self.password.as_mut() {
            methods.push(password);
        }

        for method in methods {
            debug!("Trying authentication method: {}", method.name());
            if method.authenticate(handle, username).await? {
                debug!("Authentication succeeded with method: {}", method.name());
                return Ok(true);
            }
            debug!("Authentication rejected for method: {}", method.name());
        }

        Ok(false)
    }
}

/// Loads keys in order, skipping repeated paths and keys the agent holds.
struct KeyCollector {
    seen_paths: HashSet<PathBuf>,
    seen_keys: Vec<PublicKey>,
    keys: Vec<LoadedKey>,
}

impl KeyCollector {
    fn new(agent: Option<&AgentConnection>) -> Self {
        let seen_keys = agent
            .map(|a| a.identities().to_vec())
            .unwrap_or_default();
        Self {
            seen_paths: HashSet::new(),
            seen_keys,
            keys: Vec::new(),
        }
    }

    /// A path counts as seen only once it has loaded, so a later entry for
    /// the same file with a passphrase still gets its chance.
    fn add(&mut self, path: &Path, passphrase: Option<&str>) {
        let identity = path_identity(path);
        if self.seen_paths.contains(&identity) {
            debug!("Skipping duplicate key path {}", path.display());
            return;
        }

        let Some(key) = LoadedKey::load(path, passphrase) else {
            return;
        };
        self.seen_paths.insert(identity);

        let public_key = key.public_key();
        if self
            .seen_keys
            .iter()
            .any(|seen| seen.key_data() == public_key.key_data())
        {
            debug!("Key {} is already offered", path.display());
            return;
        }
        self.seen_keys.push(public_key.clone());
        self.keys.push(key);
    }

    fn finish(self) -> Vec<LoadedKey> {
        self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    fn plain() -> PathBuf {
        fixture("id_ed25519_plain")
    }

    fn encrypted() -> PathBuf {
        fixture("id_ed25519_encrypted")
    }

    mod dedup {
        use super::*;

        #[tokio::test]
        async fn test_same_path_from_two_routes_is_one_signer() {
            let plan = CredentialPlan::resolve(CredentialRequest {
                explicit_key: Some(plain()),
                default_key_paths: vec![plain(), fixture("id_missing")],
                ..Default::default()
            })
            .await
            .unwrap();

            assert_eq!(plan.signer_count(), 1);
            assert_eq!(plan.method_count(), 1);
        }

        #[tokio::test]
        async fn test_alias_and_default_path_collapse() {
            let plan = CredentialPlan::resolve(CredentialRequest {
                alias_identity_files: vec![plain()],
                default_key_paths: vec![plain()],
                ..Default::default()
            })
            .await
            .unwrap();

            assert_eq!(plan.key_paths(), vec![plain().as_path()]);
        }

        #[cfg(unix)]
        #[tokio::test]
        async fn test_symlinked_path_is_one_signer() {
            let dir = tempfile::tempdir().unwrap();
            let link = dir.path().join("id_link");
            std::os::unix::fs::symlink(plain(), &link).unwrap();

            let plan = CredentialPlan::resolve(CredentialRequest {
                explicit_key: Some(link),
                default_key_paths: vec![plain()],
                ..Default::default()
            })
            .await
            .unwrap();

            assert_eq!(plan.signer_count(), 1);
        }

        #[tokio::test]
        async fn test_copied_key_is_offered_once() {
            let dir = tempfile::tempdir().unwrap();
            let copy = dir.path().join("id_copy");
            std::fs::copy(plain(), &copy).unwrap();

            let plan = CredentialPlan::resolve(CredentialRequest {
                alias_identity_files: vec![copy.clone()],
                default_key_paths: vec![plain()],
                ..Default::default()
            })
            .await
            .unwrap();

            assert_eq!(plan.key_paths(), vec![copy.as_path()]);
        }

        #[tokio::test]
        async fn test_failed_alias_load_does_not_block_explicit_key() {
            let plan = CredentialPlan::resolve(CredentialRequest {
                alias_identity_files: vec![encrypted()],
                explicit_key: Some(encrypted()),
                passphrase: Some("hunter2".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

            assert_eq!(plan.signer_count(), 1);
            assert_eq!(plan.key_paths(), vec![encrypted().as_path()]);
        }
    }

    mod ordering {
        use super::*;

        #[tokio::test]
        async fn test_alias_then_explicit_then_defaults() {
            let plan = CredentialPlan::resolve(CredentialRequest {
                alias_identity_files: vec![plain()],
                explicit_key: Some(encrypted()),
                passphrase: Some("hunter2".to_string()),
                default_key_paths: vec![plain(), encrypted()],
                ..Default::default()
            })
            .await
            .unwrap();

            assert_eq!(
                plan.key_paths(),
                vec![plain().as_path(), encrypted().as_path()]
            );
            assert_eq!(plan.method_count(), 1);
        }

        #[tokio::test]
        async fn test_passphrase_only_applies_to_explicit_key() {
            // The encrypted key as an alias file gets no passphrase and is skipped
            let result = CredentialPlan::resolve(CredentialRequest {
                alias_identity_files: vec![encrypted()],
                passphrase: Some("hunter2".to_string()),
                ..Default::default()
            })
            .await;

            assert!(matches!(result, Err(SshError::NoAuthMethod)));
        }
    }

    mod methods {
        use super::*;

        #[tokio::test]
        async fn test_nothing_available_fails_before_dial() {
            let dir = tempfile::tempdir().unwrap();
            let err = CredentialPlan::resolve(CredentialRequest {
                agent_socket: Some(dir.path().join("no-agent.sock")),
                default_key_paths: vec![dir.path().join("id_ed25519")],
                ..Default::default()
            })
            .await
            .unwrap_err();

            assert!(matches!(err, SshError::NoAuthMethod));
            assert!(err.to_string().contains("authentication method"));
        }

        #[tokio::test]
        async fn test_empty_password_is_absent() {
            let result = CredentialPlan::resolve(CredentialRequest {
                password: Some(String::new()),
                ..Default::default()
            })
            .await;
            assert!(matches!(result, Err(SshError::NoAuthMethod)));
        }

        #[tokio::test]
        async fn test_password_only() {
            let plan = CredentialPlan::resolve(CredentialRequest {
                password: Some("secret".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

            assert_eq!(plan.method_count(), 1);
            assert!(!plan.has_signers());
            assert!(plan.has_password());
        }

        #[tokio::test]
        async fn test_keys_and_password_are_two_methods() {
            let plan = CredentialPlan::resolve(CredentialRequest {
                explicit_key: Some(plain()),
                default_key_paths: vec![encrypted()],
                password: Some("secret".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

            assert_eq!(plan.method_count(), 2);
            assert_eq!(plan.signer_count(), 1);
        }

        #[tokio::test]
        async fn test_bad_explicit_key_falls_back_to_password() {
            let plan = CredentialPlan::resolve(CredentialRequest {
                explicit_key: Some(encrypted()),
                passphrase: Some("wrong".to_string()),
                password: Some("secret".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

            assert_eq!(plan.method_count(), 1);
            assert!(!plan.has_signers());
        }

        #[tokio::test]
        async fn test_release_agent_is_idempotent() {
            let mut plan = CredentialPlan::resolve(CredentialRequest {
                explicit_key: Some(plain()),
                ..Default::default()
            })
            .await
            .unwrap();

            plan.release_agent();
            plan.release_agent();
            assert_eq!(plan.signer_count(), 1);
        }
    }
}
