//! PTY-backed execution for terminal-attached programs.
//!
//! The remote command gets a pseudo-terminal sized like the local one. While
//! it runs, local input is relayed to it, its output is written straight to
//! the local terminal, and `SIGWINCH` resizes are forwarded. The local
//! terminal is in raw mode for the duration and restored on every exit path.
//!
//! Input is read on a dedicated thread. On a terminal the thread polls
//! crossterm key events and checks a stop flag between polls, so it exits
//! shortly after the command does and never swallows the next keystroke.

use std::io::{IsTerminal, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use russh::{ChannelMsg, client};
use tokio::io::AsyncWriteExt;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::error::SshError;
use super::handler::ClientHandler;

/// PTY size used when the local terminal size is unknown.
pub const DEFAULT_PTY_SIZE: (u16, u16) = (80, 24);

/// How long the input thread waits for a key before checking its stop flag.
const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Restores cooked mode when dropped.
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> std::io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Local terminal size as `(cols, rows)`, or [`DEFAULT_PTY_SIZE`].
pub fn local_terminal_size() -> (u16, u16) {
    if !std::io::stdout().is_terminal() {
        return DEFAULT_PTY_SIZE;
    }
    sanitize_size(terminal::size().ok())
}

fn sanitize_size(size: Option<(u16, u16)>) -> (u16, u16) {
    match size {
        Some((cols, rows)) if cols > 0 && rows > 0 => (cols, rows),
        _ => DEFAULT_PTY_SIZE,
    }
}

/// Run `command` on a PTY channel until it exits.
///
/// Returns the exit status if the server sent one. A nonzero status is not
/// an error.
pub async fn run(
    handle: &client::Handle<ClientHandler>,
    command: &str,
    term: &str,
) -> Result<Option<u32>, SshError> {
    let mut channel = handle
        .channel_open_session()
        .await
        .map_err(|e| SshError::Channel(format!("failed to open session channel: {}", e)))?;

    let (cols, rows) = local_terminal_size();
    channel
        .request_pty(true, term, u32::from(cols), u32::from(rows), 0, 0, &[])
        .await
        .map_err(|e| SshError::Channel(format!("failed to request PTY: {}", e)))?;

    let attached = std::io::stdin().is_terminal() && std::io::stdout().is_terminal();
    let _raw_guard = if attached {
        Some(RawModeGuard::enable()?)
    } else {
        None
    };

    channel
        .exec(true, command)
        .await
        .map_err(|e| SshError::Channel(format!("failed to execute command: {}", e)))?;

    let mut resize = match signal(SignalKind::window_change()) {
        Ok(sig) => Some(sig),
        Err(e) => {
            debug!("Window resize forwarding disabled: {}", e);
            None
        }
    };

    let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(32);
    let relay = InputRelay::start(attached, input_tx)?;
    let mut stdin_open = true;

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let mut exit_code: Option<u32> = None;

    let outcome = async {
        loop {
            tokio::select! {
                msg = channel.wait() => match msg {
                    Some(ChannelMsg::Data { data }) => {
                        stdout.write_all(&data).await?;
                        stdout.flush().await?;
                    }
                    Some(ChannelMsg::ExtendedData { data, .. }) => {
                        stderr.write_all(&data).await?;
                        stderr.flush().await?;
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = Some(exit_status);
                    }
                    Some(ChannelMsg::Eof) => {
                        if exit_code.is_some() {
                            break;
                        }
                    }
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                },
                input = input_rx.recv(), if stdin_open => match input {
                    Some(bytes) => {
                        channel.data(&bytes[..]).await.map_err(|e| {
                            SshError::Channel(format!("failed to send input: {}", e))
                        })?;
                    }
                    None => {
                        stdin_open = false;
                        let _ = channel.eof().await;
                    }
                },
                Some(()) = next_resize(&mut resize) => {
                    let (cols, rows) = local_terminal_size();
                    debug!("Forwarding window size {}x{}", cols, rows);
                    if let Err(e) = channel
                        .window_change(u32::from(cols), u32::from(rows), 0, 0)
                        .await
                    {
                        warn!("Failed to forward window size: {}", e);
                    }
                }
            }
        }
        Ok::<(), SshError>(())
    }
    .await;

    relay.stop();
    let _ = channel.close().await;

    outcome.map(|_| exit_code)
}

async fn next_resize(resize: &mut Option<Signal>) -> Option<()> {
    match resize {
        Some(sig) => sig.recv().await,
        None => std::future::pending().await,
    }
}

/// Local input source feeding the PTY channel.
struct InputRelay {
    stop: Arc<AtomicBool>,
    /// Present only for the key event reader, which can be joined.
    thread: Option<JoinHandle<()>>,
}

impl InputRelay {
    /// Key events when `attached`, raw stdin bytes otherwise.
    fn start(attached: bool, tx: mpsc::Sender<Vec<u8>>) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let builder = std::thread::Builder::new().name("sherlock-input".to_string());

        let thread = if attached {
            Some(builder.spawn(move || relay_key_events(&flag, &tx))?)
        } else {
            // A blocked pipe read cannot be interrupted; the thread is left to
            // finish at EOF or its next read
            builder.spawn(move || relay_reader(std::io::stdin().lock(), &flag, &tx))?;
            None
        };

        Ok(Self { stop, thread })
    }

    fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for InputRelay {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn relay_key_events(stop: &AtomicBool, tx: &mpsc::Sender<Vec<u8>>) {
    while !stop.load(Ordering::Relaxed) {
        match event::poll(INPUT_POLL_INTERVAL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                debug!("Terminal event poll failed: {}", e);
                break;
            }
        }
        let bytes = match event::read() {
            Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => key_to_bytes(&key),
            Ok(Event::Paste(text)) => text.into_bytes(),
            Ok(_) => continue,
            Err(e) => {
                debug!("Terminal event read failed: {}", e);
                break;
            }
        };
        if !bytes.is_empty() && tx.blocking_send(bytes).is_err() {
            break;
        }
    }
}

fn relay_reader<R: Read>(mut reader: R, stop: &AtomicBool, tx: &mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; 1024];
    while !stop.load(Ordering::Relaxed) {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if stop.load(Ordering::Relaxed) || tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                debug!("stdin read failed: {}", e);
                break;
            }
        }
    }
}

/// Bytes a terminal would send for `key`.
fn key_to_bytes(key: &KeyEvent) -> Vec<u8> {
    let mut bytes = match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => match control_byte(c) {
            Some(byte) => vec![byte],
            None => return Vec::new(),
        },
        KeyCode::Char(c) => c.to_string().into_bytes(),
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::BackTab => b"\x1b[Z".to_vec(),
        KeyCode::Esc => vec![0x1b],
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        KeyCode::Home => b"\x1b[H".to_vec(),
        KeyCode::End => b"\x1b[F".to_vec(),
        KeyCode::PageUp => b"\x1b[5~".to_vec(),
        KeyCode::PageDown => b"\x1b[6~".to_vec(),
        KeyCode::Delete => b"\x1b[3~".to_vec(),
        KeyCode::Insert => b"\x1b[2~".to_vec(),
        KeyCode::F(n) => function_key(n),
        _ => Vec::new(),
    };
    if key.modifiers.contains(KeyModifiers::ALT) && !bytes.is_empty() {
        bytes.insert(0, 0x1b);
    }
    bytes
}

fn control_byte(c: char) -> Option<u8> {
    match c.to_ascii_lowercase() {
        c @ 'a'..='z' => Some(c as u8 - b'a' + 1),
        ' ' | '@' | '2' => Some(0),
        '[' | '3' => Some(0x1b),
        '\\' | '4' => Some(0x1c),
        ']' | '5' => Some(0x1d),
        '^' | '6' => Some(0x1e),
        '_' | '7' | '/' => Some(0x1f),
        '?' | '8' => Some(0x7f),
        _ => None,
    }
}

fn function_key(n: u8) -> Vec<u8> {
    let sequence: &[u8] = match n {
        1 => b"\x1bOP",
        2 => b"\x1bOQ",
        3 => b"\x1bOR",
        4 => b"\x1bOS",
        5 => b"\x1b[15~",
        6 => b"\x1b[17~",
        7 => b"\x1b[18~",
        8 => b"\x1b[19~",
        9 => b"\x1b[20~",
        10 => b"\x1b[21~",
        11 => b"\x1b[23~",
        12 => b"\x1b[24~",
        _ => b"",
    };
    sequence.to_vec()
}
