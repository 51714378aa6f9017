//! Connection targets and execution results.
//!
//! These are the values that cross the boundary between the client core and
//! its callers: a [`HostInfo`] goes in at connect time, a command string goes
//! in per execution, and an [`ExecutionResult`] comes back out.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

use super::error::SshError;

/// Default SSH port. Also the "unset" sentinel for alias merging.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// A connection target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Hostname, alias or IP address.
    pub host: String,
    /// SSH port (default 22).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login user. Empty means "not specified yet".
    #[serde(default)]
    pub user: String,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl HostInfo {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
        }
    }

    /// Parse a `[user@]host[:port]` target.
    ///
    /// Bracketed IPv6 literals (`[::1]:2222`) are accepted. An unbracketed
    /// address with several colons is taken as a bare IPv6 host on port 22.
    ///
    /// # Examples
    ///
    /// ```
    /// use sherlock::ssh::HostInfo;
    ///
    /// let info = HostInfo::parse("deploy@db1.example.com:2222").unwrap();
    /// assert_eq!(info.user, "deploy");
    /// assert_eq!(info.host, "db1.example.com");
    /// assert_eq!(info.port, 2222);
    /// ```
    pub fn parse(target: &str) -> Result<Self, SshError> {
        let target = target.trim();
        let invalid = |reason: &str| SshError::InvalidTarget {
            target: target.to_string(),
            reason: reason.to_string(),
        };

        let (user, rest) = match target.rsplit_once('@') {
            Some((user, _)) if user.is_empty() => return Err(invalid("empty user before '@'")),
            Some((user, rest)) => (user.to_string(), rest),
            None => (String::new(), target),
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("missing closing ']'"))?;
            let port = match after {
                "" => DEFAULT_SSH_PORT,
                _ => {
                    let port = after
                        .strip_prefix(':')
                        .ok_or_else(|| invalid("unexpected text after ']'"))?;
                    parse_port(port).map_err(|reason| invalid(&reason))?
                }
            };
            (host, port)
        } else if rest.matches(':').count() == 1 {
            let (host, port) = rest.split_once(':').unwrap_or((rest, ""));
            (host, parse_port(port).map_err(|reason| invalid(&reason))?)
        } else {
            (rest, DEFAULT_SSH_PORT)
        };

        if host.is_empty() {
            return Err(SshError::MissingHost);
        }

        Ok(Self {
            host: host.to_string(),
            port,
            user,
        })
    }

    /// Address used for dialing and error messages (`host:port`, IPv6 bracketed).
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(port: &str) -> Result<u16, String> {
    match port.parse::<u16>() {
        Ok(0) => Err("port must be between 1 and 65535".to_string()),
        Ok(port) => Ok(port),
        Err(e) => Err(format!("invalid port number: {}", e)),
    }
}

impl fmt::Display for HostInfo {
    /// Connection identity in `user@host:port` form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Outcome of a batch command execution.
///
/// `error` is set only for transport-level failures. A nonzero remote exit
/// status is reported through `exit_code` with `error` left unset. Output
/// captured before a failure is preserved.
#[derive(Debug, Default, Serialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<SshError>,
}

impl ExecutionResult {
    /// A result carrying only a transport-level error.
    pub fn from_error(error: SshError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    /// True when the command ran and exited with status 0.
    pub fn success(&self) -> bool {
        self.error.is_none() && self.exit_code == 0
    }
}

fn serialize_error<S: Serializer>(error: &Option<SshError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}
