//! In-process SSH server for session tests.
//!
//! Accepts one user with a fixed password and runs every exec request through
//! `sh -c` on this machine, with `HOME` and the starting directory pointed at a
//! temporary directory. Stdout, stderr and the exit status travel back over
//! the channel the way a real sshd sends them.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use russh::keys::{self, PublicKey};
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

pub const USER: &str = "tester";
pub const PASSWORD: &str = "open sesame";

pub struct TestServer {
    pub port: u16,
    pub host_key: PublicKey,
    home: tempfile::TempDir,
    accept_loop: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let fixture =
            Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/id_ed25519_plain");
        let key = keys::load_secret_key(&fixture, None).unwrap();
        let host_key = key.public_key().clone();

        let home = tempfile::tempdir().unwrap();
        let home_path = home.path().canonicalize().unwrap();

        let config = Arc::new(russh::server::Config {
            auth_rejection_time: Duration::from_millis(10),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            keys: vec![key],
            ..Default::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept_loop = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let config = Arc::clone(&config);
                let handler = ShellHandler {
                    home: home_path.clone(),
                };
                tokio::spawn(async move {
                    match russh::server::run_stream(config, stream, handler).await {
                        Ok(session) => {
                            if let Err(e) = session.await {
                                debug!("Test server session ended: {}", e);
                            }
                        }
                        Err(e) => debug!("Test server handshake failed: {}", e),
                    }
                });
            }
        });

        Self {
            port,
            host_key,
            home,
            accept_loop,
        }
    }

    /// The login directory and `$HOME` of every exec.
    pub fn home(&self) -> PathBuf {
        self.home.path().canonicalize().unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

struct ShellHandler {
    home: PathBuf,
}

impl Handler for ShellHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if user == USER && password == PASSWORD {
            return Ok(Auth::Accept);
        }
        Ok(Auth::Reject {
            proceed_with_methods: None,
            partial_success: false,
        })
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        let home = self.home.clone();
        let handle = session.handle();
        let _ = session.channel_success(channel_id);

        tokio::spawn(async move {
            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&command)
                .env("HOME", &home)
                .env_remove("TERM")
                .current_dir(&home)
                .output()
                .await;
            let (stdout, stderr, code) = match output {
                Ok(output) => (
                    output.stdout,
                    output.stderr,
                    output.status.code().unwrap_or(255) as u32,
                ),
                Err(e) => (Vec::new(), e.to_string().into_bytes(), 127),
            };

            if !stdout.is_empty() {
                let _ = handle.data(channel_id, CryptoVec::from_slice(&stdout)).await;
            }
            if !stderr.is_empty() {
                let _ = handle
                    .extended_data(channel_id, 1, CryptoVec::from_slice(&stderr))
                    .await;
            }
            let _ = handle.exit_status_request(channel_id, code).await;
            let _ = handle.eof(channel_id).await;
            let _ = handle.close(channel_id).await;
        });
        Ok(())
    }
}
