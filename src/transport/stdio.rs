//! stdio transport: newline-delimited JSON over a child process's stdin/stdout
//! (spec §4.B "stdio").

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};

use crate::error::TransportError;
use crate::protocol::Frame;

use super::{FrameEnvelope, Transport, TransportEvent, TransportState};

/// Grace period the transport waits after spawning before treating the
/// server as reachable — some servers print a banner and set up state on
/// stdout before their stdin is actually read.
const DEFAULT_READY_DELAY: Duration = Duration::from_millis(100);

/// How long to wait after `SIGTERM` before escalating to `SIGKILL`.
const DEFAULT_GRACE_SHUTDOWN: Duration = Duration::from_secs(5);

/// A stdio-transport target: command, arguments, and environment overlay.
#[derive(Debug, Clone)]
pub struct StdioTarget {
    /// Executable to run.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Environment variables merged on top of the current process's env.
    pub env: HashMap<String, String>,
    /// Delay after spawn before the transport is considered ready.
    pub ready_delay: Duration,
    /// Grace period between `SIGTERM` and `SIGKILL` on shutdown.
    pub grace_shutdown: Duration,
}

impl StdioTarget {
    /// Build a target with default timing knobs.
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            ready_delay: DEFAULT_READY_DELAY,
            grace_shutdown: DEFAULT_GRACE_SHUTDOWN,
        }
    }
}

/// stdio transport over a spawned child process.
pub struct StdioTransport {
    target: StdioTarget,
    child: Option<Child>,
    stdin: Option<Mutex<ChildStdin>>,
    events_tx: Option<mpsc::UnboundedSender<TransportEvent>>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl StdioTransport {
    /// Create a transport bound to `target`, not yet connected.
    #[must_use]
    pub fn new(target: StdioTarget) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            target,
            child: None,
            stdin: None,
            events_tx: Some(tx),
            events_rx: Some(rx),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let tx = self
            .events_tx
            .clone()
            .ok_or_else(|| TransportError::ConnectFailed("transport already consumed".into()))?;

        tx.send(TransportEvent::StateChanged(TransportState::Connecting))
            .ok();

        let mut cmd = Command::new(&self.target.command);
        cmd.args(&self.target.args)
            .envs(&self.target.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::SpawnFailed(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::SpawnFailed("no stdin handle".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::SpawnFailed("no stdout handle".into()))?;
        let stderr = child.stderr.take();

        tokio::time::sleep(self.target.ready_delay).await;

        let reader_tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match Frame::decode(line.as_bytes()) {
                            Ok(frame) => {
                                if reader_tx
                                    .send(TransportEvent::Message(FrameEnvelope { frame }))
                                    .is_err()
                                {
                                    break;
                                }
                            },
                            Err(e) => {
                                if reader_tx
                                    .send(TransportEvent::Warning(format!(
                                        "malformed stdio frame: {e}"
                                    )))
                                    .is_err()
                                {
                                    break;
                                }
                            },
                        }
                    },
                    Ok(None) => {
                        reader_tx
                            .send(TransportEvent::StateChanged(TransportState::Closed))
                            .ok();
                        break;
                    },
                    Err(e) => {
                        reader_tx
                            .send(TransportEvent::Warning(format!("stdout read error: {e}")))
                            .ok();
                        break;
                    },
                }
            }
        });

        if let Some(stderr) = stderr {
            let log_tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log_tx
                        .send(TransportEvent::Warning(format!("stderr: {line}")))
                        .ok();
                }
            });
        }

        self.child = Some(child);
        self.stdin = Some(Mutex::new(stdin));
        tx.send(TransportEvent::StateChanged(TransportState::Connected))
            .ok();
        Ok(())
    }

    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let stdin = self
            .stdin
            .as_ref()
            .ok_or_else(|| TransportError::WriteFailed("not connected".into()))?;
        let mut bytes = frame
            .encode()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        bytes.push(b'\n');
        let mut guard = stdin.lock().await;
        guard
            .write_all(&bytes)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        guard
            .flush()
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    fn events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.take()
    }

    async fn disconnect(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        self.stdin = None;

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        let _ = child.start_kill();

        let grace = self.target.grace_shutdown;
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(_) => {},
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
            },
        }

        if let Some(tx) = &self.events_tx {
            tx.send(TransportEvent::StateChanged(TransportState::Closed)).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_and_exchanges_one_line_and_shuts_down() {
        let target = StdioTarget::new("cat", vec![]);
        let mut transport = StdioTransport::new(target);
        let mut events = transport.events().unwrap();

        transport.connect().await.unwrap();

        let frame = Frame::request(
            crate::protocol::RequestId::Num(1),
            "ping",
            None,
        );
        transport.send(&frame).await.unwrap();

        let mut saw_connected = false;
        let mut saw_message = false;
        for _ in 0..10 {
            match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
                Ok(Some(TransportEvent::StateChanged(TransportState::Connected))) => {
                    saw_connected = true;
                },
                Ok(Some(TransportEvent::Message(_))) => {
                    saw_message = true;
                    break;
                },
                Ok(Some(_)) => {},
                _ => break,
            }
        }
        assert!(saw_connected);
        assert!(saw_message, "expected cat to echo the request back");

        transport.disconnect().await;
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_connect_error() {
        let target = StdioTarget::new("definitely-not-a-real-binary-xyz", vec![]);
        let mut transport = StdioTransport::new(target);
        let result = transport.connect().await;
        assert!(result.is_err());
    }
}
