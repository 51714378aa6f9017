//! Password-based SSH authentication.

use async_trait::async_trait;
use russh::client;
use tracing::debug;

use crate::ssh::error::SshError;
use crate::ssh::handler::ClientHandler;

use super::traits::AuthStrategy;

/// Password authentication strategy.
///
/// Uses username/password credentials to authenticate with the SSH server.
pub struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for PasswordAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordAuth(..)")
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(
        &mut self,
        handle: &mut client::Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool, SshError> {
        let result = handle
            .authenticate_password(username, &self.password)
            .await?;

        debug!("Password authentication success: {}", result.success());
        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "password"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_auth_name() {
        let auth = PasswordAuth::new("secret");
        assert_eq!(auth.name(), "password");
    }

    #[test]
    fn test_password_auth_creation() {
        let auth = PasswordAuth::new(String::from("my-password"));
        assert_eq!(auth.password, "my-password");
    }

    #[test]
    fn test_debug_hides_password() {
        let auth = PasswordAuth::new("hunter2");
        assert!(!format!("{:?}", auth).contains("hunter2"));
    }
}
