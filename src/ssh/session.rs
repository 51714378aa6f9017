//! SSH session transport and batch command execution.
//!
//! ## Lifecycle
//!
//! A [`Session`] moves through three states:
//!
//! 1. **Idle**: constructed, credentials resolved, nothing dialed yet.
//! 2. **Connected**: dial, host key verification and authentication succeeded.
//! 3. **Closed**: after [`Session::close`] or a detected transport failure.
//!    Terminal; reconnecting means building a new `Session`.
//!
//! Construction does all the work that needs no network: alias substitution,
//! target validation and credential resolution. A target with no usable
//! credential therefore fails in [`Session::new`] before any dial.
//!
//! ## Working directory
//!
//! Each execution opens a fresh channel and shell, so a `cd` does not persist
//! on the remote side. The session tracks the directory itself:
//!
//! - A simple `cd` is resolved remotely in one round trip
//!   (`cd <tracked> && cd <target> && pwd`) and the printed path becomes the
//!   tracked directory. A failed `cd` leaves it unchanged.
//! - Other commands are prefixed with `cd <tracked> &&`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use russh::keys::PublicKey;
use russh::{ChannelMsg, Disconnect, client};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::alias::AliasTable;
use super::auth::{CredentialPlan, CredentialRequest};
use super::command::{
    build_cd_resolve_command, parse_cd, shell_escape, with_term, wrap_with_cwd,
};
use super::config::{
    build_client_config, default_key_paths, default_known_hosts_path, default_ssh_config_path,
    resolve_agent_socket, resolve_compression, resolve_connect_timeout,
    resolve_strict_host_key_checking, resolve_term_type, resolve_use_ssh_config,
};
use super::error::SshError;
use super::handler::ClientHandler;
use super::interactive;
use super::known_hosts::{HostKeyPolicy, TrustStore};
use super::types::{ExecutionResult, HostInfo};

/// Everything needed to build a [`Session`].
///
/// [`SessionConfig::new`] fills every field from the environment and the
/// user's `~/.ssh` directory; override fields to change behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host_info: HostInfo,
    /// Explicit private key, tried after alias identity files.
    pub key_path: Option<PathBuf>,
    /// Passphrase for `key_path`.
    pub passphrase: Option<String>,
    /// Password offered after every key.
    pub password: Option<String>,
    pub strict_host_key_checking: bool,
    /// Apply aliases from `ssh_config_path`.
    pub use_ssh_config: bool,
    pub ssh_config_path: Option<PathBuf>,
    /// Trust store location. `None` means it cannot be read.
    pub known_hosts_path: Option<PathBuf>,
    pub default_key_paths: Vec<PathBuf>,
    pub agent_socket: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub compress: bool,
    /// Append unknown host keys accepted in lenient mode to the trust store.
    pub record_new_hosts: bool,
    /// Terminal type exported to remote commands and requested for PTYs.
    pub term: String,
}

impl SessionConfig {
    pub fn new(host_info: HostInfo) -> Self {
        Self {
            host_info,
            key_path: None,
            passphrase: None,
            password: None,
            strict_host_key_checking: resolve_strict_host_key_checking(None),
            use_ssh_config: resolve_use_ssh_config(None),
            ssh_config_path: default_ssh_config_path(),
            known_hosts_path: default_known_hosts_path(),
            default_key_paths: default_key_paths(),
            agent_socket: resolve_agent_socket(),
            connect_timeout: resolve_connect_timeout(None),
            compress: resolve_compression(None),
            record_new_hosts: true,
            term: resolve_term_type(),
        }
    }

    pub fn with_key(mut self, key_path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        self.key_path = Some(key_path.into());
        self.passphrase = passphrase;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

enum SessionState {
    Idle,
    Connected(client::Handle<ClientHandler>),
    Closed,
}

/// One SSH connection and its tracked working directory.
pub struct Session {
    host_info: HostInfo,
    credentials: CredentialPlan,
    trust: TrustStore,
    client_config: Arc<client::Config>,
    connect_timeout: Duration,
    record_new_hosts: bool,
    term: String,
    state: SessionState,
    cwd: Option<String>,
}

impl Session {
    /// Validate the target and resolve credentials without touching the network.
    ///
    /// # Errors
    ///
    /// - [`SshError::MissingHost`] / [`SshError::MissingUser`] after alias substitution
    /// - [`SshError::NoAuthMethod`] if no agent identity, key or password is usable
    pub async fn new(config: SessionConfig) -> Result<Self, SshError> {
        if config.host_info.host.trim().is_empty() {
            return Err(SshError::MissingHost);
        }

        let (host_info, alias_identity_files) = if config.use_ssh_config {
            let table = match config.ssh_config_path.as_deref() {
                Some(path) => AliasTable::load(path).unwrap_or_else(|e| {
                    warn!("Ignoring unreadable alias file {}: {}", path.display(), e);
                    AliasTable::default()
                }),
                None => AliasTable::default(),
            };
            let resolved = table.resolve(&config.host_info);
            (resolved.host_info, resolved.identity_files)
        } else {
            (config.host_info.clone(), Vec::new())
        };

        if host_info.user.trim().is_empty() {
            return Err(SshError::MissingUser);
        }

        let credentials = CredentialPlan::resolve(CredentialRequest {
            agent_socket: config.agent_socket,
            alias_identity_files,
            explicit_key: config.key_path,
            passphrase: config.passphrase,
            default_key_paths: config.default_key_paths,
            password: config.password,
        })
        .await?;

        let trust = TrustStore::new(
            config.known_hosts_path.unwrap_or_default(),
            HostKeyPolicy::from_strict(config.strict_host_key_checking),
        );

        Ok(Self {
            host_info,
            credentials,
            trust,
            client_config: build_client_config(config.compress),
            connect_timeout: config.connect_timeout,
            record_new_hosts: config.record_new_hosts,
            term: config.term,
            state: SessionState::Idle,
            cwd: None,
        })
    }

    /// Dial, verify the host key and authenticate.
    ///
    /// Does nothing if already connected. A closed session cannot reconnect.
    pub async fn connect(&mut self) -> Result<(), SshError> {
        let transport_lost = match &self.state {
            SessionState::Connected(handle) if !handle.is_closed() => return Ok(()),
            SessionState::Connected(_) => true,
            SessionState::Closed => return Err(SshError::Closed),
            SessionState::Idle => false,
        };
        if transport_lost {
            warn!("Connection to {} was lost", self.host_info);
            self.state = SessionState::Closed;
            return Err(SshError::Closed);
        }

        let address = self.host_info.address();
        let handler = ClientHandler::new(
            self.host_info.host.clone(),
            self.host_info.port,
            self.trust.clone(),
        );
        let pending_host_key = handler.pending_host_key();

        debug!("Connecting to {}", address);
        let connect_future = client::connect(
            Arc::clone(&self.client_config),
            (self.host_info.host.as_str(), self.host_info.port),
            handler,
        );

        let mut handle = tokio::time::timeout(self.connect_timeout, connect_future)
            .await
            .map_err(|_| SshError::Timeout {
                address: address.clone(),
                timeout: self.connect_timeout,
            })?
            .map_err(|e| dial_error(&address, e))?;

        let user = self.host_info.user.clone();
        if !self.credentials.authenticate(&mut handle, &user).await? {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(SshError::AuthRejected {
                user,
                address,
            });
        }

        if self.record_new_hosts {
            let learned = pending_host_key.lock().ok().and_then(|mut slot| slot.take());
            if let Some(key) = learned {
                self.learn_host_key(&key);
            }
        }

        info!("Connected to {}", self.host_info);
        self.state = SessionState::Connected(handle);
        Ok(())
    }

    fn learn_host_key(&self, key: &PublicKey) {
        if let Err(e) = self
            .trust
            .record(&self.host_info.host, self.host_info.port, key)
        {
            warn!(
                "Failed to record host key for {} in {}: {}",
                self.host_info.host,
                self.trust.path().display(),
                e
            );
        }
    }

    /// Disconnect and release the agent connection. Safe to call at any time.
    pub async fn close(&mut self) -> Result<(), SshError> {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Connected(handle) = previous {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                debug!("Disconnect from {} failed: {}", self.host_info, e);
            }
            info!("Disconnected from {}", self.host_info);
        }
        self.credentials.release_agent();
        Ok(())
    }

    /// True only while connected and the transport is alive.
    pub fn is_connected(&self) -> bool {
        matches!(&self.state, SessionState::Connected(handle) if !handle.is_closed())
    }

    fn live_handle(&self) -> Result<&client::Handle<ClientHandler>, SshError> {
        match &self.state {
            SessionState::Connected(handle) if !handle.is_closed() => Ok(handle),
            _ => Err(SshError::NotConnected),
        }
    }

    /// Run a command and capture its output.
    ///
    /// A nonzero exit status is reported through `exit_code`; `error` is set
    /// only for transport failures.
    pub async fn execute(&mut self, command: &str) -> ExecutionResult {
        self.execute_cancellable(command, &CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), but stops waiting when `cancel` fires.
    ///
    /// A cancelled command reports [`SshError::Cancelled`] with whatever output
    /// arrived first. The remote process may keep running.
    pub async fn execute_cancellable(
        &mut self,
        command: &str,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let handle = match self.live_handle() {
            Ok(handle) => handle,
            Err(e) => return ExecutionResult::from_error(e),
        };

        let command = command.trim();
        let Some(target) = parse_cd(command) else {
            let full = with_term(&self.term, &wrap_with_cwd(self.cwd.as_deref(), command));
            return run_remote(handle, &full, cancel).await;
        };

        let resolve = build_cd_resolve_command(self.cwd.as_deref(), &target);
        let mut result = run_remote(handle, &with_term(&self.term, &resolve), cancel).await;
        if result.error.is_some() || result.exit_code != 0 {
            return result;
        }

        match result.stdout.lines().rev().find(|line| !line.trim().is_empty()) {
            Some(path) => {
                debug!("Working directory is now {}", path.trim());
                self.cwd = Some(path.trim().to_string());
            }
            None => warn!("Directory change printed no path; keeping previous directory"),
        }
        result.stdout.clear();
        result
    }

    /// Run a terminal-attached command with a PTY. Returns the remote exit
    /// status when the server reports one.
    pub async fn execute_interactive(&mut self, command: &str) -> Result<Option<u32>, SshError> {
        let handle = self.live_handle()?;
        let full = wrap_with_cwd(self.cwd.as_deref(), command.trim());
        interactive::run(handle, &full, &self.term).await
    }

    /// Append a local public key to the remote `~/.ssh/authorized_keys`.
    ///
    /// Creates `~/.ssh` (mode 700) and the file (mode 600) when missing and
    /// skips keys that are already present.
    pub async fn install_public_key(&mut self, public_key_path: &Path) -> Result<(), SshError> {
        let handle = self.live_handle()?;

        let text = tokio::fs::read_to_string(public_key_path).await?;
        let key_line = text.trim();
        if key_line.is_empty() || key_line.contains('\n') {
            return Err(SshError::InvalidPublicKey {
                path: public_key_path.to_path_buf(),
                reason: "expected exactly one key line".to_string(),
            });
        }
        PublicKey::from_openssh(key_line).map_err(|e| SshError::InvalidPublicKey {
            path: public_key_path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let result = run_remote(
            handle,
            &build_install_key_command(key_line),
            &CancellationToken::new(),
        )
        .await;

        if let Some(error) = result.error {
            return Err(error);
        }
        if result.exit_code != 0 {
            return Err(SshError::CommandFailed {
                exit_code: result.exit_code,
                stderr: result.stderr.trim().to_string(),
            });
        }

        info!(
            "Installed {} on {}",
            public_key_path.display(),
            self.host_info
        );
        Ok(())
    }

    /// Connection identity in `user@host:port` form, after alias substitution.
    pub fn identity(&self) -> String {
        self.host_info.to_string()
    }

    /// True when the credentials include at least one key-based signer.
    pub fn uses_key_auth(&self) -> bool {
        self.credentials.has_signers()
    }

    /// Effective target after alias substitution.
    pub fn host_info(&self) -> &HostInfo {
        &self.host_info
    }

    pub fn credentials(&self) -> &CredentialPlan {
        &self.credentials
    }

    /// Tracked remote working directory. `None` means the login directory.
    pub fn cwd(&self) -> Option<&str> {
        self.cwd.as_deref()
    }
}

fn dial_error(address: &str, error: SshError) -> SshError {
    match error {
        SshError::Protocol(e) => SshError::Connect {
            address: address.to_string(),
            reason: e.to_string(),
        },
        SshError::Io(e) => SshError::Connect {
            address: address.to_string(),
            reason: e.to_string(),
        },
        other => other,
    }
}

fn build_install_key_command(key_line: &str) -> String {
    let key = shell_escape(key_line);
    format!(
        "mkdir -p ~/.ssh && chmod 700 ~/.ssh && touch ~/.ssh/authorized_keys && \
         chmod 600 ~/.ssh/authorized_keys && \
         {{ grep -qxF {key} ~/.ssh/authorized_keys || \
         {{ [ -z \"$(tail -c 1 ~/.ssh/authorized_keys)\" ] || echo >> ~/.ssh/authorized_keys; \
         printf '%s\\n' {key} >> ~/.ssh/authorized_keys; }}; }}"
    )
}

/// Output accumulated from one exec channel.
#[derive(Default)]
struct ChannelOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl ChannelOutput {
    /// Read until the channel closes. Returns the exit status.
    async fn collect(
        &mut self,
        channel: &mut russh::Channel<client::Msg>,
    ) -> Result<u32, SshError> {
        let mut exit_code: Option<u32> = None;
        let mut exit_signal: Option<String> = None;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    self.stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    // ext == 1 is stderr in SSH protocol
                    if ext == 1 {
                        self.stderr.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status);
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    exit_signal = Some(format!("{:?}", signal_name));
                }
                Some(ChannelMsg::Eof) => {
                    // Continue to wait for exit status if not received yet
                    if exit_code.is_some() {
                        break;
                    }
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }

        match (exit_code, exit_signal) {
            (Some(code), _) => Ok(code),
            (None, Some(signal)) => Err(SshError::Channel(format!(
                "remote command terminated by signal {}",
                signal
            ))),
            (None, None) => Err(SshError::Channel(
                "channel closed without an exit status".to_string(),
            )),
        }
    }

    fn into_result(self, outcome: Result<u32, SshError>) -> ExecutionResult {
        let (exit_code, error) = match outcome {
            Ok(code) => (i32::try_from(code).unwrap_or(i32::MAX), None),
            Err(e) => (0, Some(e)),
        };
        ExecutionResult {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            exit_code,
            error,
        }
    }
}

/// Execute one command on a fresh channel.
async fn run_remote(
    handle: &client::Handle<ClientHandler>,
    command: &str,
    cancel: &CancellationToken,
) -> ExecutionResult {
    let mut channel = match handle.channel_open_session().await {
        Ok(channel) => channel,
        Err(e) => {
            return ExecutionResult::from_error(SshError::Channel(format!(
                "failed to open session channel: {}",
                e
            )));
        }
    };

    if let Err(e) = channel.exec(true, command).await {
        return ExecutionResult::from_error(SshError::Channel(format!(
            "failed to execute command: {}",
            e
        )));
    }

    let mut output = ChannelOutput::default();
    let outcome = tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            warn!("Command cancelled: {}", command);
            Err(SshError::Cancelled)
        }
        outcome = output.collect(&mut channel) => outcome,
    };

    // Always close the channel gracefully to keep the session alive
    let _ = channel.close().await;

    output.into_result(outcome)
}
