//! Host key verification against a known_hosts trust store.
//!
//! Two policies:
//!
//! - **Strict**: a host must already be present with a matching key.
//! - **Lenient** (default): an unknown host is accepted and reported as
//!   [`TrustDecision::Unknown`] so the caller can record it after connecting.
//!
//! In both modes a recorded host presenting a different key is rejected, and
//! an `@revoked` entry matching the presented key is rejected.
//!
//! When the store cannot be read, strict mode rejects everything while lenient
//! mode accepts everything. A store that simply does not exist yet is treated
//! as empty.
//!
//! Entries use the OpenSSH line format `[marker] patterns key-type base64 [comment]`.
//! Patterns may be comma-separated globs (`*`, `?`), negated with `!`, or
//! hashed (`|1|salt|hash`). Hosts on a port other than 22 are looked up and
//! recorded as `[host]:port`.

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use russh::keys::{HashAlg, PublicKey};
use sha1::Sha1;
use tracing::{debug, info, warn};

use super::error::SshError;
use super::types::DEFAULT_SSH_PORT;

/// How unknown hosts are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// Reject hosts that are not already in the trust store.
    Strict,
    /// Accept unknown hosts; still reject changed keys.
    #[default]
    Lenient,
}

impl HostKeyPolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            HostKeyPolicy::Strict
        } else {
            HostKeyPolicy::Lenient
        }
    }
}

/// Why a host key was not trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyRejection {
    /// Strict mode and no entry for the host.
    Unknown,
    /// The host is recorded with a different key.
    Changed {
        expected: String,
        actual: String,
        line: usize,
    },
    /// The presented key is marked `@revoked`.
    Revoked,
    /// Strict mode and the trust store could not be read.
    StoreUnavailable(String),
}

impl fmt::Display for HostKeyRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKeyRejection::Unknown => {
                write!(f, "host is not in known_hosts and strict checking is enabled")
            }
            HostKeyRejection::Changed {
                expected,
                actual,
                line,
            } => write!(
                f,
                "REMOTE HOST IDENTIFICATION HAS CHANGED: known_hosts line {} has {}, server presented {}",
                line, expected, actual
            ),
            HostKeyRejection::Revoked => write!(f, "presented key is marked @revoked"),
            HostKeyRejection::StoreUnavailable(reason) => {
                write!(f, "known_hosts is unavailable in strict mode: {}", reason)
            }
        }
    }
}

/// Outcome of an accepted verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// The presented key matches a recorded entry.
    Trusted,
    /// No entry for the host; accepted under the lenient policy and
    /// expected to be recorded once the connection succeeds.
    Unknown,
    /// The store could not be read; accepted under the lenient policy
    /// without verification.
    Unverified,
}

/// Result of looking a host up in known_hosts content.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Lookup {
    Matched,
    Unknown,
    Mismatch { expected: String, line: usize },
    Revoked,
}

/// A known_hosts file plus the policy used to judge it.
#[derive(Debug, Clone)]
pub struct TrustStore {
    path: PathBuf,
    policy: HostKeyPolicy,
}

impl TrustStore {
    pub fn new(path: impl Into<PathBuf>, policy: HostKeyPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> HostKeyPolicy {
        self.policy
    }

    /// Verify a presented host key.
    pub fn verify(
        &self,
        host: &str,
        port: u16,
        key: &PublicKey,
    ) -> Result<TrustDecision, HostKeyRejection> {
        let read = if self.path.as_os_str().is_empty() {
            Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "no known_hosts location (home directory unknown)",
            ))
        } else {
            fs::read_to_string(&self.path)
        };

        let content = match read {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => {
                return match self.policy {
                    HostKeyPolicy::Strict => {
                        warn!("Cannot read {}: {}", self.path.display(), e);
                        Err(HostKeyRejection::StoreUnavailable(e.to_string()))
                    }
                    HostKeyPolicy::Lenient => {
                        warn!(
                            "Cannot read {}: {}; accepting host key for {} unverified",
                            self.path.display(),
                            e,
                            host
                        );
                        Ok(TrustDecision::Unverified)
                    }
                };
            }
        };

        self.verify_against(&content, host, port, key)
    }

    fn verify_against(
        &self,
        content: &str,
        host: &str,
        port: u16,
        key: &PublicKey,
    ) -> Result<TrustDecision, HostKeyRejection> {
        let label = host_label(host, port);

        match lookup(content, &label, key) {
            Lookup::Matched => {
                debug!("Host key for {} matches known_hosts", label);
                Ok(TrustDecision::Trusted)
            }
            Lookup::Revoked => Err(HostKeyRejection::Revoked),
            Lookup::Mismatch { expected, line } => Err(HostKeyRejection::Changed {
                expected,
                actual: fingerprint(key),
                line,
            }),
            Lookup::Unknown => match self.policy {
                HostKeyPolicy::Strict => Err(HostKeyRejection::Unknown),
                HostKeyPolicy::Lenient => {
                    debug!("Host {} is not in known_hosts; accepting", label);
                    Ok(TrustDecision::Unknown)
                }
            },
        }
    }

    /// Append a host key to the store.
    ///
    /// Creates the parent directory (mode 700) and the file (mode 600) if
    /// missing.
    pub fn record(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), SshError> {
        let label = host_label(host, port);
        let (key_type, key_base64) = openssh_parts(key).ok_or_else(|| {
            SshError::Io(std::io::Error::new(
                ErrorKind::InvalidData,
                "cannot encode host key",
            ))
        })?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(parent, fs::Permissions::from_mode(0o700)) {
                    warn!("Failed to set {} permissions: {}", parent.display(), e);
                }
            }
        }

        let needs_newline = fs::read(&self.path)
            .map(|bytes| !bytes.is_empty() && !bytes.ends_with(b"\n"))
            .unwrap_or(false);

        let mut options = fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;

        let mut line = String::new();
        if needs_newline {
            line.push('\n');
        }
        line.push_str(&format!("{} {} {}\n", label, key_type, key_base64));
        file.write_all(line.as_bytes())?;

        info!(
            "Added {} host key for {} to {}",
            key_type,
            label,
            self.path.display()
        );
        Ok(())
    }
}

/// `host` for the default port, `[host]:port` otherwise.
pub fn host_label(host: &str, port: u16) -> String {
    if port == DEFAULT_SSH_PORT {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

/// SHA256 fingerprint in OpenSSH display form (`SHA256:...`).
pub fn fingerprint(key: &PublicKey) -> String {
    key.fingerprint(HashAlg::Sha256).to_string()
}

/// Split a public key into its OpenSSH `key-type` and base64 fields.
fn openssh_parts(key: &PublicKey) -> Option<(String, String)> {
    let encoded = key.to_openssh().ok()?;
    let mut fields = encoded.split_whitespace();
    let key_type = fields.next()?.to_string();
    let key_base64 = fields.next()?.to_string();
    Some((key_type, key_base64))
}

fn lookup(content: &str, label: &str, key: &PublicKey) -> Lookup {
    let Some((key_type, key_base64)) = openssh_parts(key) else {
        return Lookup::Unknown;
    };

    let mut first_mismatch: Option<(String, usize)> = None;

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let Some(mut first) = fields.next() else {
            continue;
        };

        let mut revoked = false;
        if first.starts_with('@') {
            match first {
                "@revoked" => revoked = true,
                // CA entries certify other keys; they are not host keys themselves
                _ => continue,
            }
            match fields.next() {
                Some(next) => first = next,
                None => continue,
            }
        }

        let (Some(entry_type), Some(entry_base64)) = (fields.next(), fields.next()) else {
            continue;
        };

        if !patterns_match(first, label) {
            continue;
        }

        let same_key = entry_type == key_type && entry_base64 == key_base64;

        if revoked {
            if same_key {
                return Lookup::Revoked;
            }
            continue;
        }

        if same_key {
            return Lookup::Matched;
        }

        if first_mismatch.is_none() {
            first_mismatch = Some((stored_fingerprint(entry_type, entry_base64), index + 1));
        }
    }

    match first_mismatch {
        Some((expected, line)) => Lookup::Mismatch { expected, line },
        None => Lookup::Unknown,
    }
}

fn stored_fingerprint(key_type: &str, key_base64: &str) -> String {
    PublicKey::from_openssh(&format!("{} {}", key_type, key_base64))
        .map(|key| fingerprint(&key))
        .unwrap_or_else(|_| format!("{} key", key_type))
}

/// Match a comma-separated pattern list (or a hashed name) against a host label.
fn patterns_match(patterns: &str, label: &str) -> bool {
    if let Some(hashed) = patterns.strip_prefix("|1|") {
        return hashed_match(hashed, label);
    }

    let mut matched = false;
    for pattern in patterns.split(',') {
        if let Some(negated) = pattern.strip_prefix('!') {
            if glob_match(negated, label) {
                return false;
            }
        } else if glob_match(pattern, label) {
            matched = true;
        }
    }
    matched
}

/// Check `salt|hash` where hash = HMAC-SHA1(salt, label), both base64.
fn hashed_match(salt_and_hash: &str, label: &str) -> bool {
    let Some((salt, hash)) = salt_and_hash.split_once('|') else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (STANDARD.decode(salt), STANDARD.decode(hash)) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(&salt) else {
        return false;
    };
    mac.update(label.as_bytes());
    mac.verify_slice(&hash).is_ok()
}

/// Glob matching with `*` and `?`, case-insensitive like OpenSSH host patterns.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    let t: Vec<char> = text.to_lowercase().chars().collect();
    glob_match_inner(&p, &t)
}

fn glob_match_inner(pattern: &[char], text: &[char]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some('*'), _) => {
            glob_match_inner(&pattern[1..], text)
                || (!text.is_empty() && glob_match_inner(pattern, &text[1..]))
        }
        (Some('?'), Some(_)) => glob_match_inner(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_match_inner(&pattern[1..], &text[1..]),
        _ => false,
    }
}
