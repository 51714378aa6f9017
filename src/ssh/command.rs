//! Shell command construction for stateless executions.
//!
//! Every batch execution runs in a fresh remote shell, so the working
//! directory is tracked on the client and re-applied to each command.

use std::collections::HashSet;

use once_cell::sync::Lazy;

use super::config::safe_term_type;

/// Quote `value` as a single literal POSIX shell word.
///
/// Single quotes are closed, emitted as `\'`, and reopened, so nothing inside
/// the value is interpreted by the shell.
pub fn shell_escape(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Destination of a simple directory change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CdTarget {
    /// Bare `cd` or `cd ~`.
    Home,
    Path(String),
}

impl CdTarget {
    /// True for targets that depend on the current directory.
    pub fn is_relative(&self) -> bool {
        match self {
            CdTarget::Home => false,
            CdTarget::Path(path) => !path.starts_with('/') && !path.starts_with('~'),
        }
    }

    /// Shell expression for the target. `~` and `~/...` expand against `$HOME`.
    fn shell_word(&self) -> String {
        match self {
            CdTarget::Home => "\"$HOME\"".to_string(),
            CdTarget::Path(path) => match path.strip_prefix("~/") {
                Some(rest) => format!("\"$HOME\"/{}", shell_escape(rest)),
                None => shell_escape(path),
            },
        }
    }
}

/// Recognize `cd` and `cd <target>` with a single, optionally quoted target.
///
/// Anything else (`cd a && ls`, `cd -`, several arguments) is `None` and runs
/// as an ordinary command.
pub fn parse_cd(command: &str) -> Option<CdTarget> {
    let command = command.trim();
    if command == "cd" {
        return Some(CdTarget::Home);
    }

    let rest = command.strip_prefix("cd")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim();

    let target = match unquote(rest) {
        Some(inner) => inner,
        None if rest.contains(|c: char| c.is_whitespace() || is_shell_special(c)) => return None,
        None => rest,
    };

    match target {
        "" | "~" => Some(CdTarget::Home),
        "-" => None,
        _ => Some(CdTarget::Path(target.to_string())),
    }
}

fn unquote(value: &str) -> Option<&str> {
    ['\'', '"'].into_iter().find_map(|quote| {
        let inner = value.strip_prefix(quote)?.strip_suffix(quote)?;
        (!inner.contains(quote)).then_some(inner)
    })
}

fn is_shell_special(c: char) -> bool {
    matches!(
        c,
        ';' | '&' | '|' | '<' | '>' | '`' | '$' | '(' | ')' | '\'' | '"' | '\\' | '*' | '?'
    )
}

/// One round trip that changes into `target` and prints the absolute result.
///
/// A relative target is resolved from `cwd` when one is tracked.
pub fn build_cd_resolve_command(cwd: Option<&str>, target: &CdTarget) -> String {
    match cwd.filter(|c| !c.is_empty()) {
        Some(cwd) if target.is_relative() => format!(
            "cd {} && cd {} && pwd",
            shell_escape(cwd),
            target.shell_word()
        ),
        _ => format!("cd {} && pwd", target.shell_word()),
    }
}

/// Prefix `command` with a change into the tracked directory.
pub fn wrap_with_cwd(cwd: Option<&str>, command: &str) -> String {
    match cwd.filter(|c| !c.is_empty()) {
        Some(cwd) => format!("cd {} && {}", shell_escape(cwd), command),
        None => command.to_string(),
    }
}

/// Prefix `command` with `export TERM=...`.
///
/// Servers often refuse `env` requests, so the variable is set inline. Unsafe
/// values are replaced with the default terminal type.
pub fn with_term(term: &str, command: &str) -> String {
    format!(
        "export TERM={}; {}",
        shell_escape(&safe_term_type(Some(term))),
        command
    )
}

/// Programs that need a terminal attached.
static INTERACTIVE_PROGRAMS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "vi", "vim", "nvim", "view", "nano", "pico", "emacs", "micro", "ed", "less", "more",
        "most", "man", "top", "htop", "btop", "atop", "iotop", "iftop", "nmon", "glances",
        "watch", "tmux", "screen", "ssh", "telnet", "ftp", "sftp", "mysql", "psql", "sqlite3",
        "mongo", "mongosh", "redis-cli", "irb", "ipython", "ncdu", "mc", "ranger", "nnn", "tig",
        "journalctl", "visudo", "crontab", "passwd", "su",
    ]
    .into_iter()
    .collect()
});

/// True when the program `command` runs is terminal-attached.
///
/// Leading `sudo`, `env` and `VAR=value` words are skipped, and the program is
/// compared by its base name. `journalctl -f` and `crontab -e` style usages
/// are covered by listing the program itself.
pub fn is_interactive_command(command: &str) -> bool {
    let program = command
        .split_whitespace()
        .find(|word| !matches!(*word, "sudo" | "env" | "exec") && !word.contains('=') && !word.starts_with('-'));

    match program {
        Some(program) => {
            let name = program.rsplit('/').next().unwrap_or(program);
            INTERACTIVE_PROGRAMS.contains(name)
        }
        None => false,
    }
}
