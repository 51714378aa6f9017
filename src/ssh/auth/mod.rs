//! Credential resolution and SSH authentication methods.
//!
//! # Available Strategies
//!
//! - [`PublicKeyAuth`]: every agent identity and private key, offered as one method
//! - [`PasswordAuth`]: Password-based authentication
//!
//! # Example
//!
//! ```ignore
//! use sherlock::ssh::auth::{CredentialPlan, CredentialRequest};
//!
//! let mut plan = CredentialPlan::resolve(CredentialRequest {
//!     agent_socket: sherlock::ssh::config::resolve_agent_socket(),
//!     default_key_paths: sherlock::ssh::config::default_key_paths(),
//!     ..Default::default()
//! })
//! .await?;
//!
//! let accepted = plan.authenticate(&mut handle, "username").await?;
//! ```

mod agent;
mod key;
mod password;
mod plan;
mod traits;

pub use agent::AgentConnection;
pub use key::LoadedKey;
pub use password::PasswordAuth;
pub use plan::{CredentialPlan, CredentialRequest, PublicKeyAuth};
pub use traits::AuthStrategy;
