//! SSH connection, authentication and command execution core.
//!
//! This module is organized into the following submodules:
//!
//! - `types`: Connection targets and execution results
//! - `config`: Configuration resolution with environment variable support
//! - `error`: Error type and retry classification
//! - `alias`: `~/.ssh/config` host alias resolution
//! - `known_hosts`: Host key trust store
//! - `handler`: russh client handler gating the handshake on the trust store
//! - `auth`: Credential resolution and authentication strategies
//! - `command`: Shell command construction and directory-change parsing
//! - `session`: Session transport and batch execution
//! - `interactive`: PTY execution for terminal-attached programs
//! - `local`: Local counterpart of a session
//! - `executor`: The contract shared by sessions and the local executor
//! - `retry`: Caller-side connection retry with backoff

pub mod alias;
pub mod auth;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod interactive;
pub mod known_hosts;
pub mod local;
pub mod retry;
pub mod session;
#[cfg(test)]
mod test_server;
pub mod types;

pub use alias::{AliasRule, AliasTable, ResolvedHost};
pub use error::SshError;
pub use executor::Executor;
pub use known_hosts::{HostKeyPolicy, HostKeyRejection, TrustDecision, TrustStore};
pub use local::LocalExecutor;
pub use retry::connect_with_retry;
pub use session::{Session, SessionConfig};
pub use types::{DEFAULT_SSH_PORT, ExecutionResult, HostInfo};
