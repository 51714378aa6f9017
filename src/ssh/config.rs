//! Configuration resolution for the SSH client core.
//!
//! Values follow a three-tier priority:
//!
//! 1. **Parameter** - explicitly provided value (highest priority)
//! 2. **Environment Variable** - value from the process environment
//! 3. **Default** - built-in default (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSH_CONNECT_TIMEOUT` | 30s | Dial and handshake timeout in seconds |
//! | `SSH_STRICT_HOST_KEY_CHECKING` | false | Reject hosts missing from known_hosts |
//! | `SSH_USE_CONFIG` | true | Consult `~/.ssh/config` for host aliases |
//! | `SSH_COMPRESSION` | true | Offer zlib compression |
//! | `SSH_MAX_RETRIES` | 3 | Caller-side connect retry attempts |
//! | `SSH_RETRY_DELAY_MS` | 1000ms | Initial retry delay in milliseconds |
//! | `SSH_AUTH_SOCK` | unset | Authentication agent socket |
//! | `TERM` | xterm-256color | Terminal type forwarded to remote commands |

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use russh::client;

/// Default SSH connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default maximum retry attempts for caller-side connect retries
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default retry delay in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Maximum retry delay cap
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Terminal type used when `TERM` is unset or unsafe.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Keepalive interval for established sessions.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Private key file names tried under `~/.ssh`, in preference order.
pub const DEFAULT_KEY_NAMES: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa", "id_dsa"];

pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub(crate) const STRICT_HOST_KEY_ENV_VAR: &str = "SSH_STRICT_HOST_KEY_CHECKING";
pub(crate) const USE_CONFIG_ENV_VAR: &str = "SSH_USE_CONFIG";
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";
pub(crate) const MAX_RETRIES_ENV_VAR: &str = "SSH_MAX_RETRIES";
pub(crate) const RETRY_DELAY_MS_ENV_VAR: &str = "SSH_RETRY_DELAY_MS";
pub(crate) const AUTH_SOCK_ENV_VAR: &str = "SSH_AUTH_SOCK";
pub(crate) const TERM_ENV_VAR: &str = "TERM";

/// Resolve the connection timeout with priority: parameter -> env var -> default
pub fn resolve_connect_timeout(timeout_param: Option<u64>) -> Duration {
    if let Some(timeout) = timeout_param {
        return Duration::from_secs(timeout);
    }

    if let Ok(env_timeout) = env::var(CONNECT_TIMEOUT_ENV_VAR)
        && let Ok(timeout) = env_timeout.parse::<u64>()
    {
        return Duration::from_secs(timeout);
    }

    Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS)
}

/// Resolve strict host key checking with priority: parameter -> env var -> default (false)
pub fn resolve_strict_host_key_checking(strict_param: Option<bool>) -> bool {
    if let Some(strict) = strict_param {
        return strict;
    }

    env::var(STRICT_HOST_KEY_ENV_VAR)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(false)
}

/// Resolve whether to read the alias file with priority: parameter -> env var -> default (true)
pub fn resolve_use_ssh_config(use_param: Option<bool>) -> bool {
    if let Some(use_config) = use_param {
        return use_config;
    }

    env::var(USE_CONFIG_ENV_VAR)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(true)
}

/// Resolve the compression setting with priority: parameter -> env var -> default (true)
pub fn resolve_compression(compress_param: Option<bool>) -> bool {
    if let Some(compress) = compress_param {
        return compress;
    }

    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    true
}

/// Resolve the max retries value with priority: parameter -> env var -> default
pub fn resolve_max_retries(max_retries_param: Option<u32>) -> u32 {
    if let Some(max_retries) = max_retries_param {
        return max_retries;
    }

    if let Ok(env_retries) = env::var(MAX_RETRIES_ENV_VAR)
        && let Ok(retries) = env_retries.parse::<u32>()
    {
        return retries;
    }

    DEFAULT_MAX_RETRIES
}

/// Resolve the initial retry delay with priority: parameter -> env var -> default
pub fn resolve_retry_delay(retry_delay_param: Option<u64>) -> Duration {
    if let Some(delay) = retry_delay_param {
        return Duration::from_millis(delay);
    }

    if let Ok(env_delay) = env::var(RETRY_DELAY_MS_ENV_VAR)
        && let Ok(delay) = env_delay.parse::<u64>()
    {
        return Duration::from_millis(delay);
    }

    Duration::from_millis(DEFAULT_RETRY_DELAY_MS)
}

/// Agent socket from `SSH_AUTH_SOCK`, if set and non-empty.
pub fn resolve_agent_socket() -> Option<PathBuf> {
    env::var_os(AUTH_SOCK_ENV_VAR)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Terminal type to export for remote commands.
///
/// The local `TERM` is used only if it passes [`is_valid_term_type`];
/// anything else falls back to [`DEFAULT_TERM`].
pub fn resolve_term_type() -> String {
    safe_term_type(env::var(TERM_ENV_VAR).ok().as_deref())
}

pub(crate) fn safe_term_type(term: Option<&str>) -> String {
    match term {
        Some(term) if is_valid_term_type(term) => term.to_string(),
        _ => DEFAULT_TERM.to_string(),
    }
}

/// A terminal type is safe to interpolate into a shell command only if it
/// consists of ASCII alphanumerics, `-` and `_`.
pub fn is_valid_term_type(term: &str) -> bool {
    !term.is_empty()
        && term
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// The invoking user's `~/.ssh` directory.
pub fn ssh_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh"))
}

/// `~/.ssh/config`
pub fn default_ssh_config_path() -> Option<PathBuf> {
    ssh_dir().map(|dir| dir.join("config"))
}

/// `~/.ssh/known_hosts`
pub fn default_known_hosts_path() -> Option<PathBuf> {
    ssh_dir().map(|dir| dir.join("known_hosts"))
}

/// Conventional private key paths, most preferred first (ed25519, ecdsa, rsa, dsa).
pub fn default_key_paths() -> Vec<PathBuf> {
    ssh_dir()
        .map(|dir| key_paths_in(&dir))
        .unwrap_or_default()
}

pub(crate) fn key_paths_in(dir: &Path) -> Vec<PathBuf> {
    DEFAULT_KEY_NAMES.iter().map(|name| dir.join(name)).collect()
}

/// Expand a leading `~` or `~/` to the invoking user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

/// Build russh client configuration.
///
/// - Inactivity timeout: `None`; interactive programs may sit idle indefinitely
///   and liveness is covered by keepalives
/// - Keepalive interval of 30 seconds with max 3 keepalives
/// - Compression preference based on `compress` (ZLIB if enabled, NONE if disabled)
pub fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) static ENV_TEST_MUTEX: once_cell::sync::Lazy<std::sync::Mutex<()>> =
    once_cell::sync::Lazy::new(|| std::sync::Mutex::new(()));

/// Helper to set an environment variable within tests.
/// SAFETY: Must be called while holding ENV_TEST_MUTEX to prevent data races.
#[cfg(test)]
pub(crate) unsafe fn set_env(key: &str, value: &str) {
    // SAFETY: Caller ensures ENV_TEST_MUTEX is held
    unsafe { env::set_var(key, value) };
}

/// Helper to remove an environment variable within tests.
/// SAFETY: Must be called while holding ENV_TEST_MUTEX to prevent data races.
#[cfg(test)]
pub(crate) unsafe fn remove_env(key: &str) {
    // SAFETY: Caller ensures ENV_TEST_MUTEX is held
    unsafe { env::remove_var(key) };
}
