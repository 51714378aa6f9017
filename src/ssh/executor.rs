//! The execution contract shared by remote sessions and the local shell.

use async_trait::async_trait;

use super::error::SshError;
use super::local::LocalExecutor;
use super::session::Session;
use super::types::ExecutionResult;

/// Something that runs shell commands while tracking a working directory.
///
/// Commands on one executor must be issued one at a time: each call may update
/// the tracked directory that the next call reads.
#[async_trait]
pub trait Executor: Send {
    /// Run a command and capture its output.
    async fn execute(&mut self, command: &str) -> ExecutionResult;

    /// Run a command attached to the local terminal. Returns the exit status
    /// when known; a nonzero status is not an error.
    async fn execute_interactive(&mut self, command: &str) -> Result<Option<u32>, SshError>;

    fn is_connected(&self) -> bool;

    /// Release resources. Safe to call more than once.
    async fn close(&mut self) -> Result<(), SshError>;

    /// Display identity (`user@host:port`, or `user@hostname:local`).
    fn host_info_string(&self) -> String;

    fn cwd(&self) -> Option<String>;
}

#[async_trait]
impl Executor for Session {
    async fn execute(&mut self, command: &str) -> ExecutionResult {
        Session::execute(self, command).await
    }

    async fn execute_interactive(&mut self, command: &str) -> Result<Option<u32>, SshError> {
        Session::execute_interactive(self, command).await
    }

    fn is_connected(&self) -> bool {
        Session::is_connected(self)
    }

    async fn close(&mut self) -> Result<(), SshError> {
        Session::close(self).await
    }

    fn host_info_string(&self) -> String {
        self.identity()
    }

    fn cwd(&self) -> Option<String> {
        Session::cwd(self).map(str::to_string)
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(&mut self, command: &str) -> ExecutionResult {
        LocalExecutor::execute(self, command).await
    }

    async fn execute_interactive(&mut self, command: &str) -> Result<Option<u32>, SshError> {
        LocalExecutor::execute_interactive(self, command).await
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn close(&mut self) -> Result<(), SshError> {
        Ok(())
    }

    fn host_info_string(&self) -> String {
        self.identity()
    }

    fn cwd(&self) -> Option<String> {
        LocalExecutor::cwd(self).map(|p| p.to_string_lossy().into_owned())
    }
}
