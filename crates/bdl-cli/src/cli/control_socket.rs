//! Control socket: server (during `bdl run`) and client (for `bdl pause` / `bdl cancel`).
//! Protocol: one line per command, "pause <key>" or "cancel <key>"; the server
//! answers "ok" or "err <message>" once the orchestrator call returns.

use anyhow::{bail, Context, Result};
use bdl_core::Orchestrator;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Pause(String),
    Cancel(String),
}

impl ControlCommand {
    /// Parses one protocol line. Malformed lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let (verb, key) = line.trim().split_once(char::is_whitespace)?;
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        match verb {
            "pause" => Some(Self::Pause(key.to_string())),
            "cancel" => Some(Self::Cancel(key.to_string())),
            _ => None,
        }
    }

    pub fn to_line(&self) -> String {
        match self {
            Self::Pause(key) => format!("pause {}\n", key),
            Self::Cancel(key) => format!("cancel {}\n", key),
        }
    }

    async fn apply(&self, orch: &Orchestrator) -> Result<()> {
        match self {
            Self::Pause(key) => orch.pause(key).await?,
            Self::Cancel(key) => orch.cancel(key).await?,
        }
        Ok(())
    }
}

/// Binds `path` (replacing a stale socket) and serves commands against `orch`
/// until the returned task is aborted.
pub fn spawn_control_listener(
    orch: Arc<Orchestrator>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref();
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)
        .with_context(|| format!("control socket bind {}", path.display()))?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let orch = Arc::clone(&orch);
                    tokio::spawn(serve_connection(orch, stream));
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve_connection(orch: Arc<Orchestrator>, stream: UnixStream) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let reply = match ControlCommand::parse(&line) {
            Some(command) => {
                tracing::info!(?command, "control command");
                match command.apply(&orch).await {
                    Ok(()) => "ok\n".to_string(),
                    Err(e) => format!("err {:#}\n", e),
                }
            }
            None => {
                tracing::debug!(line = %line, "ignoring malformed control line");
                "err malformed command\n".to_string()
            }
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Sends `command` to a running `bdl run`. `Ok(false)` when none is listening.
pub async fn send_to_running(command: &ControlCommand) -> Result<bool> {
    match bdl_core::control::default_control_socket_path() {
        Ok(path) => send(&path, command).await,
        Err(_) => Ok(false),
    }
}

pub async fn send(socket_path: &Path, command: &ControlCommand) -> Result<bool> {
    if !socket_path.exists() {
        return Ok(false);
    }
    let stream = match UnixStream::connect(socket_path).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::debug!(path = %socket_path.display(), "stale control socket: {}", e);
            return Ok(false);
        }
    };
    let (read, mut write) = stream.into_split();
    write.write_all(command.to_line().as_bytes()).await?;
    let reply = BufReader::new(read)
        .lines()
        .next_line()
        .await?
        .unwrap_or_default();
    match reply.strip_prefix("err ") {
        Some(message) => bail!("running bdl refused: {message}"),
        None => Ok(true),
    }
}
