//! Command execution on the local machine.
//!
//! [`LocalExecutor`] follows the same contract as a remote
//! [`Session`](super::Session): each command runs in a fresh `sh -c` and the
//! working directory is tracked by the executor. Directory changes are
//! resolved against the local filesystem directly, so no shell round trip is
//! needed. Paths are tracked logically: `cd link` then `cd ..` returns to the
//! directory holding `link`, as it does in a shell.

use std::io::ErrorKind;
use std::os::unix::process::ExitStatusExt;
use std::path::{Component, Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
use tracing::debug;

use super::command::{CdTarget, parse_cd};
use super::config::{resolve_term_type, safe_term_type};
use super::error::SshError;
use super::types::ExecutionResult;

/// Runs commands through the local `sh`.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    cwd: Option<PathBuf>,
    term: String,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalExecutor {
    /// Start in the process working directory with `TERM` from the environment.
    pub fn new() -> Self {
        Self {
            cwd: None,
            term: resolve_term_type(),
        }
    }

    /// Start in `dir` instead of the process working directory.
    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn with_term(mut self, term: &str) -> Self {
        self.term = safe_term_type(Some(term));
        self
    }

    /// Tracked directory. `None` means the process working directory.
    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Identity in `user@hostname:local` form.
    pub fn identity(&self) -> String {
        let user = whoami::username().unwrap_or_else(|_| "unknown".to_string());
        let host = whoami::hostname().unwrap_or_else(|_| "localhost".to_string());
        format!("{}@{}:local", user, host)
    }

    /// Run a command and capture its output.
    ///
    /// A simple `cd` only updates the tracked directory. A target that does
    /// not resolve to a directory reports exit status 1 and leaves the tracked
    /// directory unchanged.
    pub async fn execute(&mut self, command: &str) -> ExecutionResult {
        let command = command.trim();
        if let Some(target) = parse_cd(command) {
            return self.change_directory(&target);
        }

        let mut cmd = self.shell(command);
        cmd.stdin(Stdio::null());
        match cmd.output().await {
            Ok(output) => ExecutionResult {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: exit_code(output.status),
                error: None,
            },
            Err(e) => ExecutionResult::from_error(SshError::Io(e)),
        }
    }

    /// Run a command with the local terminal attached. Returns its exit status.
    pub async fn execute_interactive(&mut self, command: &str) -> Result<Option<u32>, SshError> {
        let status = self
            .shell(command.trim())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;
        Ok(u32::try_from(exit_code(status)).ok())
    }

    fn shell(&self, command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).env("TERM", &self.term);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn change_directory(&mut self, target: &CdTarget) -> ExecutionResult {
        let (label, candidate) = match self.cd_candidate(target) {
            Ok(resolved) => resolved,
            Err(e) => return ExecutionResult::from_error(e),
        };

        let failure = |reason: &str| ExecutionResult {
            stderr: format!("cd: {}: {}\n", label, reason),
            exit_code: 1,
            ..Default::default()
        };

        let path = normalize_lexically(&candidate);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => {
                debug!("Local working directory is now {}", path.display());
                self.cwd = Some(path);
                ExecutionResult::default()
            }
            Ok(_) => failure("Not a directory"),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => failure("Permission denied"),
            Err(e) if e.kind() == ErrorKind::NotADirectory => failure("Not a directory"),
            Err(_) => failure("No such file or directory"),
        }
    }

    /// The path a `cd` would move to, before resolving `.` and `..`.
    fn cd_candidate(&self, target: &CdTarget) -> Result<(String, PathBuf), SshError> {
        let home = || {
            dirs::home_dir().ok_or_else(|| {
                SshError::Io(std::io::Error::new(
                    ErrorKind::NotFound,
                    "home directory is not known",
                ))
            })
        };

        match target {
            CdTarget::Home => Ok(("~".to_string(), home()?)),
            CdTarget::Path(path) => {
                let candidate = if let Some(rest) = path.strip_prefix("~/") {
                    home()?.join(rest)
                } else if target.is_relative() {
                    self.base_dir()?.join(path)
                } else {
                    PathBuf::from(path)
                };
                Ok((path.clone(), candidate))
            }
        }
    }

    fn base_dir(&self) -> Result<PathBuf, SshError> {
        match &self.cwd {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }
}

/// Resolve `.` and `..` without following links, the way a shell's logical
/// `cd` does. `..` at the root stays at the root.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if normalized.parent().is_some() {
                    normalized.pop();
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_tempdir() -> (tempfile::TempDir, LocalExecutor) {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        (dir, LocalExecutor::new().with_cwd(base))
    }

    mod execution {
        use super::*;

        #[tokio::test]
        async fn test_captures_stdout_and_stderr() {
            let (_dir, mut exec) = in_tempdir();
            let result = exec.execute("echo out; echo err >&2").await;
            assert_eq!(result.stdout, "out\n");
            assert_eq!(result.stderr, "err\n");
            assert!(result.success());
        }

        #[tokio::test]
        async fn test_nonzero_exit_is_not_an_error() {
            let (_dir, mut exec) = in_tempdir();
            let result = exec.execute("exit 3").await;
            assert_eq!(result.exit_code, 3);
            assert!(result.error.is_none());
        }

        #[tokio::test]
        async fn test_signal_exit_code() {
            let (_dir, mut exec) = in_tempdir();
            let result = exec.execute("kill -TERM $$").await;
            assert_eq!(result.exit_code, 128 + 15);
        }

        #[tokio::test]
        async fn test_runs_in_tracked_directory() {
            let (dir, mut exec) = in_tempdir();
            let result = exec.execute("pwd").await;
            assert_eq!(
                result.stdout.trim(),
                dir.path().canonicalize().unwrap().to_string_lossy()
            );
        }

        #[tokio::test]
        async fn test_term_is_exported() {
            let (_dir, exec) = in_tempdir();
            let mut exec = exec.with_term("vt100");
            let result = exec.execute("echo $TERM").await;
            assert_eq!(result.stdout, "vt100\n");
        }

        #[tokio::test]
        async fn test_unsafe_term_replaced() {
            let (_dir, exec) = in_tempdir();
            let mut exec = exec.with_term("xterm;id");
            let result = exec.execute("echo $TERM").await;
            assert_eq!(result.stdout, "xterm-256color\n");
        }
    }

    mod directory_tracking {
        use super::*;

        #[tokio::test]
        async fn test_cd_into_child_and_back() {
            let (dir, mut exec) = in_tempdir();
            let base = dir.path().canonicalize().unwrap();
            std::fs::create_dir(base.join("child")).unwrap();

            let result = exec.execute("cd child").await;
            assert!(result.success());
            assert!(result.stdout.is_empty());
            assert_eq!(exec.cwd(), Some(base.join("child").as_path()));

            exec.execute("cd ..").await;
            assert_eq!(exec.cwd(), Some(base.as_path()));
        }

        #[tokio::test]
        async fn test_cd_quoted_name_with_spaces() {
            let (dir, mut exec) = in_tempdir();
            let base = dir.path().canonicalize().unwrap();
            std::fs::create_dir(base.join("my dir")).unwrap();

            let result = exec.execute("cd 'my dir'").await;
            assert!(result.success());
            assert_eq!(exec.cwd(), Some(base.join("my dir").as_path()));
        }

        #[tokio::test]
        async fn test_missing_directory_keeps_cwd() {
            let (dir, mut exec) = in_tempdir();
            let base = dir.path().canonicalize().unwrap();

            let result = exec.execute("cd nowhere").await;
            assert_eq!(result.exit_code, 1);
            assert!(result.error.is_none());
            assert!(result.stderr.contains("No such file or directory"));
            assert_eq!(exec.cwd(), Some(base.as_path()));
        }

        #[tokio::test]
        async fn test_cd_into_file_fails() {
            let (dir, mut exec) = in_tempdir();
            std::fs::write(dir.path().join("plain"), "x").unwrap();

            let result = exec.execute("cd plain").await;
            assert_eq!(result.exit_code, 1);
            assert!(result.stderr.contains("Not a directory"));
        }

        #[tokio::test]
        async fn test_compound_cd_does_not_move() {
            let (dir, mut exec) = in_tempdir();
            let base = dir.path().canonicalize().unwrap();
            std::fs::create_dir(base.join("sub")).unwrap();

            let result = exec.execute("cd sub && pwd").await;
            assert_eq!(result.stdout.trim(), base.join("sub").to_string_lossy());
            assert_eq!(exec.cwd(), Some(base.as_path()));
        }

        #[tokio::test]
        async fn test_bare_cd_goes_home() {
            let Some(home) = dirs::home_dir().filter(|h| h.is_dir()) else {
                return;
            };
            let home = normalize_lexically(&home);
            let (_dir, mut exec) = in_tempdir();
            let result = exec.execute("cd").await;
            assert!(result.success());
            assert_eq!(exec.cwd(), Some(home.as_path()));
        }

        #[tokio::test]
        async fn test_parent_of_symlink_is_logical() {
            let (dir, mut exec) = in_tempdir();
            let base = dir.path().canonicalize().unwrap();
            std::fs::create_dir_all(base.join("real/inner")).unwrap();
            std::fs::create_dir(base.join("app")).unwrap();
            std::os::unix::fs::symlink(base.join("real/inner"), base.join("app/link")).unwrap();

            let result = exec.execute("cd app/link").await;
            assert!(result.success());
            assert_eq!(exec.cwd(), Some(base.join("app/link").as_path()));

            let result = exec.execute("cd ..").await;
            assert!(result.success());
            assert_eq!(exec.cwd(), Some(base.join("app").as_path()));
        }

        #[tokio::test]
        async fn test_dot_segments_are_dropped() {
            let (dir, mut exec) = in_tempdir();
            let base = dir.path().canonicalize().unwrap();
            std::fs::create_dir_all(base.join("a/b")).unwrap();

            exec.execute("cd ./a/./b/../b").await;
            assert_eq!(exec.cwd(), Some(base.join("a/b").as_path()));
        }
    }

    mod normalization {
        use super::*;

        #[test]
        fn test_lexical_rules() {
            assert_eq!(normalize_lexically(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
            assert_eq!(normalize_lexically(Path::new("/a/b/..")), PathBuf::from("/a"));
            assert_eq!(normalize_lexically(Path::new("/..")), PathBuf::from("/"));
            assert_eq!(normalize_lexically(Path::new("/../../x")), PathBuf::from("/x"));
        }
    }

    mod identity {
        use super::*;
        use crate::ssh::config::{ENV_TEST_MUTEX, remove_env, set_env};

        #[test]
        fn test_identity_is_marked_local() {
            let exec = LocalExecutor::new();
            assert!(exec.identity().ends_with(":local"));
            assert!(exec.identity().contains('@'));
        }

        #[test]
        fn test_identity_uses_account_name_not_environment() {
            let Ok(user) = whoami::username() else {
                return;
            };
            let _guard = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = std::env::var("USER").ok();
            // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
            unsafe { remove_env("USER") };

            let identity = LocalExecutor::new().identity();

            if let Some(value) = saved {
                // SAFETY: Holding ENV_TEST_MUTEX, no concurrent env access
                unsafe { set_env("USER", &value) };
            }
            assert!(identity.starts_with(&format!("{}@", user)), "{identity}");
        }
    }
}
