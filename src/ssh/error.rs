//! Error taxonomy for the SSH client core.
//!
//! Errors fall into the following groups:
//!
//! 1. **Configuration errors** (`MissingHost`, `MissingUser`, `NoAuthMethod`,
//!    `InvalidTarget`): detected before any network I/O. Never retryable.
//!
//! 2. **Transport errors** (`Connect`, `Timeout`, most `Protocol`/`Io` errors):
//!    the dial or the handshake failed. A caller may retry, possibly with
//!    different parameters; the core never retries on its own.
//!
//! 3. **Authentication rejection** (`AuthRejected`): every offered credential
//!    was refused. One error per connect attempt, without saying which key
//!    failed. This is the signal a caller uses to fall back to a password.
//!
//! 4. **Host-trust rejection** (`HostKeyRejected`): always fatal.
//!
//! 5. **Execution errors** (`NotConnected`, `Closed`, `Channel`, `Cancelled`):
//!    reported through [`ExecutionResult::error`](super::types::ExecutionResult).
//!    `CommandFailed` and `InvalidPublicKey` are only produced by helpers that
//!    need a remote command to succeed, such as public key installation.
//!
//! A nonzero remote exit code is not an error anywhere in this crate.
//!
//! # Retry classification
//!
//! [`SshError::is_retryable`] decides whether a failure is transient. For
//! errors that only carry a message (the transport library's own errors),
//! [`is_retryable_message`] classifies the text. Authentication keywords take
//! precedence over connection keywords so that a bad credential is never
//! hammered against a server.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::known_hosts::HostKeyRejection;

/// Errors produced by connect, authentication and execution.
#[derive(Debug, Error)]
pub enum SshError {
    #[error("host is required")]
    MissingHost,

    #[error("user is required")]
    MissingUser,

    #[error(
        "no authentication method available: no agent identity, usable private key or password"
    )]
    NoAuthMethod,

    #[error("invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("connection to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("authentication failed for {user}@{address}: all offered credentials were rejected")]
    AuthRejected { user: String, address: String },

    #[error("host key verification failed for {host}: {reason}")]
    HostKeyRejected {
        host: String,
        reason: HostKeyRejection,
    },

    #[error("not connected")]
    NotConnected,

    #[error("session is closed; create a new session to reconnect")]
    Closed,

    #[error("channel error: {0}")]
    Channel(String),

    #[error("command cancelled")]
    Cancelled,

    #[error("remote command failed with exit code {exit_code}: {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    #[error("invalid public key {path:?}: {reason}")]
    InvalidPublicKey { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),
}

impl SshError {
    /// True for errors detected before any network I/O.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SshError::MissingHost
                | SshError::MissingUser
                | SshError::NoAuthMethod
                | SshError::InvalidTarget { .. }
        )
    }

    /// True when the server refused every offered credential.
    ///
    /// Callers use this to decide whether to prompt for a password and try
    /// again with a fresh session.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, SshError::AuthRejected { .. })
    }

    /// True when the host key was not trusted.
    pub fn is_host_key_rejection(&self) -> bool {
        matches!(self, SshError::HostKeyRejected { .. })
    }

    /// Whether retrying the same operation could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SshError::Timeout { .. } => true,
            SshError::Connect { reason, .. } => is_retryable_message(reason),
            SshError::Io(e) => is_retryable_io(e),
            SshError::Protocol(e) => is_retryable_message(&e.to_string()),
            SshError::MissingHost
            | SshError::MissingUser
            | SshError::NoAuthMethod
            | SshError::InvalidTarget { .. }
            | SshError::AuthRejected { .. }
            | SshError::HostKeyRejected { .. }
            | SshError::NotConnected
            | SshError::Closed
            | SshError::Channel(_)
            | SshError::Cancelled
            | SshError::CommandFailed { .. }
            | SshError::InvalidPublicKey { .. } => false,
        }
    }
}

/// Authentication error patterns that indicate permanent failures.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
    "host key",
    "unknown key",
    "key changed",
];

/// Connection error patterns that indicate transient failures.
const RETRYABLE_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timeout",
    "timed out",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "resource temporarily unavailable",
    "broken pipe",
    "disconnect",
];

/// Classify an error message as transient (`true`) or permanent (`false`).
///
/// Authentication and host-key keywords are checked first. Messages matching
/// neither list are treated as permanent.
pub fn is_retryable_message(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    if AUTH_ERRORS.iter().any(|p| error_lower.contains(p)) {
        return false;
    }

    RETRYABLE_ERRORS.iter().any(|p| error_lower.contains(p))
}

fn is_retryable_io(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        e.kind(),
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut
            | ErrorKind::BrokenPipe
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    ) || is_retryable_message(&e.to_string())
}
