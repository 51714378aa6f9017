#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use dotenv::dotenv;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use sherlock::ssh::command::is_interactive_command;
use sherlock::ssh::config::{resolve_max_retries, resolve_retry_delay};
use sherlock::ssh::{
    ExecutionResult, Executor, HostInfo, LocalExecutor, Session, SessionConfig, SshError,
    connect_with_retry,
};

/// Exit status used when the command could not be run at all.
const EXIT_FAILURE: i32 = 255;

/// Run one command on a remote host over SSH, or on this machine.
#[derive(Debug, Parser)]
#[command(name = "sherlock", version, about)]
struct Cli {
    /// Reject hosts that are not already in known_hosts.
    #[arg(long)]
    strict: bool,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,

    /// Attach the command to a pseudo-terminal.
    #[arg(short, long)]
    tty: bool,

    /// Private key to offer after agent and alias identities.
    #[arg(short = 'i', long = "identity")]
    key: Option<PathBuf>,

    /// Environment variable holding the passphrase for `--identity`.
    #[arg(long, value_name = "VAR")]
    passphrase_env: Option<String>,

    /// Environment variable holding the login password.
    #[arg(long, value_name = "VAR")]
    password_env: Option<String>,

    /// `[user@]host[:port]`, an alias from ~/.ssh/config, or `local`.
    target: String,

    /// Command to run.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Cli {
    fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

fn read_secret(var: &str) -> Result<String, String> {
    std::env::var(var).map_err(|_| format!("environment variable {} is not set", var))
}

async fn open_session(args: &Cli) -> Result<Session, String> {
    let host_info = HostInfo::parse(&args.target).map_err(|e| e.to_string())?;

    let mut config = SessionConfig::new(host_info);
    if args.strict {
        config.strict_host_key_checking = true;
    }
    if let Some(key) = &args.key {
        let passphrase = args.passphrase_env.as_deref().map(read_secret).transpose()?;
        config = config.with_key(key.clone(), passphrase);
    }
    if let Some(var) = &args.password_env {
        config = config.with_password(read_secret(var)?);
    }

    let session = Session::new(config).await.map_err(|e| e.to_string())?;
    let (session, retries) = connect_with_retry(
        session,
        resolve_max_retries(None),
        resolve_retry_delay(None),
    )
    .await
    .map_err(|e: SshError| e.to_string())?;
    debug!("Connected after {} retries", retries);
    Ok(session)
}

fn print_result(result: &ExecutionResult, json: bool) -> i32 {
    if json {
        match serde_json::to_string_pretty(result) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("sherlock: failed to encode result: {}", e),
        }
    } else {
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
        if let Some(e) = &result.error {
            eprintln!("sherlock: {}", e);
        }
    }
    let _ = std::io::stdout().flush();

    match result.error {
        Some(_) => EXIT_FAILURE,
        None => result.exit_code,
    }
}

async fn run(args: Cli) -> i32 {
    let command = args.command_line();
    let mut executor: Box<dyn Executor> = if args.target == "local" {
        Box::new(LocalExecutor::new())
    } else {
        match open_session(&args).await {
            Ok(session) => Box::new(session),
            Err(e) => {
                error!("Connection to {} failed", args.target);
                eprintln!("sherlock: {}", e);
                return EXIT_FAILURE;
            }
        }
    };
    debug!("Running on {}", executor.host_info_string());

    let code = if args.tty || is_interactive_command(&command) {
        match executor.execute_interactive(&command).await {
            Ok(Some(status)) => i32::try_from(status).unwrap_or(EXIT_FAILURE),
            Ok(None) => 0,
            Err(e) => {
                eprintln!("sherlock: {}", e);
                EXIT_FAILURE
            }
        }
    } else {
        let result = executor.execute(&command).await;
        print_result(&result, args.json)
    };

    let _ = executor.close().await;
    code
}

#[tokio::main]
async fn main() {
    dotenv().ok();

    // Logs go to stderr so command output stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Cli::parse();
    let code = run(args).await;
    std::process::exit(code);
}
