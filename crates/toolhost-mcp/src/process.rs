//! Subprocess ownership and stream plumbing for one MCP server.
//!
//! Spawns the child and runs three background tasks on the current tokio
//! runtime: a stdout reader that decodes frames into an inbound queue, a
//! stderr drain used only for diagnostics, and a stdin writer.

use crate::codec::{self, FrameReader, Framing};
use crate::config::ServerConfig;
use crate::error::McpError;
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Receiving end of a server's decoded stdout messages.
pub type InboundQueue = mpsc::UnboundedReceiver<serde_json::Value>;

/// One spawned MCP server process.
pub struct ServerProcess {
    name: String,
    framing: Framing,
    pid: Option<u32>,
    write_tx: parking_lot::Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    child: Arc<Mutex<Child>>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    stderr_handle: JoinHandle<()>,
}

impl ServerProcess {
    /// Spawn the configured command and start the stream tasks.
    ///
    /// The child inherits this process's environment with the config's `env`
    /// entries layered on top. Must be called from within a tokio runtime.
    pub fn spawn(config: &ServerConfig) -> Result<(Self, InboundQueue), McpError> {
        let program = config.resolved_command();
        tracing::info!(
            "Spawning MCP server '{}': {} {}",
            config.name,
            program.display(),
            config.args.join(" ")
        );

        let spawn_err = |source: std::io::Error| McpError::Spawn {
            server: config.name.clone(),
            source,
        };

        let mut child = Command::new(&program)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        let missing = |stream: &str| spawn_err(std::io::Error::other(format!("{stream} not captured")));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
        let pid = child.id();

        // Writer task: one write call per frame so frames never interleave.
        let (write_tx, mut write_rx) = mpsc::channel::<Vec<u8>>(64);
        let writer_name = config.name.clone();
        let writer_handle = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(frame) = write_rx.recv().await {
                if let Err(e) = stdin.write_all(&frame).await {
                    tracing::debug!("Write to '{writer_name}' failed: {e}");
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
            // Dropping stdin here delivers EOF to the child.
        });

        // Reader task: decodes frames from stdout into the inbound queue.
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let reader_name = config.name.clone();
        let reader_handle = tokio::spawn(async move {
            let mut frames = FrameReader::new(BufReader::new(stdout));
            loop {
                match frames.next_message().await {
                    Ok(Some(message)) => {
                        tracing::debug!("<-- {reader_name} {message}");
                        if inbound_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("Server '{reader_name}' closed stdout");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Reading from '{reader_name}' failed: {e}");
                        break;
                    }
                }
            }
        });

        // Stderr is diagnostics only; never parsed as protocol.
        let stderr_name = config.name.clone();
        let stderr_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.is_empty() {
                    tracing::debug!("[stderr][{stderr_name}] {line}");
                }
            }
        });

        Ok((
            Self {
                name: config.name.clone(),
                framing: config.framing,
                pid,
                write_tx: parking_lot::Mutex::new(Some(write_tx)),
                child: Arc::new(Mutex::new(child)),
                reader_handle,
                writer_handle,
                stderr_handle,
            },
            inbound_rx,
        ))
    }

    /// Server name from the config entry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id, if the child was still running when spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Encode and queue one message for the child's stdin.
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<(), McpError> {
        let frame = codec::encode(message, self.framing)?;
        let tx = self
            .write_tx
            .lock()
            .clone()
            .ok_or_else(|| McpError::ConnectionClosed {
                server: self.name.clone(),
            })?;
        tracing::debug!("--> {} {}", self.name, String::from_utf8_lossy(&frame).trim_end());
        tx.send(frame).await.map_err(|_| McpError::ConnectionClosed {
            server: self.name.clone(),
        })
    }

    /// Whether the child has exited.
    pub async fn has_exited(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(Some(_)))
    }

    /// Kill the child. A no-op if it has already exited.
    pub async fn terminate(&self) {
        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!("Server '{}' already exited ({status})", self.name);
            }
            _ => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill server '{}': {e}", self.name);
                }
            }
        }
    }

    /// Close stdin, give the child `grace` to exit, then kill it.
    pub async fn shutdown(&self, grace: Duration) {
        // Dropping the last sender ends the writer task, which closes stdin.
        self.write_tx.lock().take();

        let child = Arc::clone(&self.child);
        let graceful = tokio::time::timeout(grace, async move {
            let mut child = child.lock().await;
            let _ = child.wait().await;
        })
        .await;

        if graceful.is_err() {
            tracing::debug!("Server '{}' ignored stdin EOF; killing", self.name);
        }
        self.terminate().await;

        self.reader_handle.abort();
        self.writer_handle.abort();
        self.stderr_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(name: &str, script: &str) -> ServerConfig {
        ServerConfig::new(name, "sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn echo_process_roundtrip() {
        // `cat` echoes each frame back, which the reader decodes.
        let config = ServerConfig::new("echo", "cat", vec![]);
        let (process, mut inbound) = ServerProcess::spawn(&config).unwrap();
        process
            .send(&serde_json::json!({"id": 1, "result": {"ok": true}}))
            .await
            .unwrap();
        let message = inbound.recv().await.unwrap();
        assert_eq!(message["result"]["ok"], true);
        process.shutdown(Duration::from_millis(500)).await;
        assert!(process.has_exited().await);
    }

    #[tokio::test]
    async fn content_length_framing_echo() {
        let mut config = ServerConfig::new("echo", "cat", vec![]);
        config.framing = Framing::ContentLength;
        let (process, mut inbound) = ServerProcess::spawn(&config).unwrap();
        process.send(&serde_json::json!({"id": 2})).await.unwrap();
        assert_eq!(inbound.recv().await.unwrap()["id"], 2);
        process.shutdown(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn spawn_nonexistent_command_fails() {
        let config = ServerConfig::new("bad", "this_command_does_not_exist_xyz123", vec![]);
        match ServerProcess::spawn(&config) {
            Err(McpError::Spawn { server, .. }) => assert_eq!(server, "bad"),
            Err(other) => panic!("Expected Spawn, got: {other:?}"),
            Ok(_) => panic!("Expected error, got Ok"),
        }
    }

    #[tokio::test]
    async fn env_overrides_layer_on_inherited_env() {
        let mut config = sh(
            "env",
            r#"printf '{"v":"%s","path":"%s"}\n' "$TOOLHOST_TEST_VAR" "$PATH""#,
        );
        config
            .env
            .insert("TOOLHOST_TEST_VAR".to_string(), "overlaid".to_string());
        let (process, mut inbound) = ServerProcess::spawn(&config).unwrap();
        let message = inbound.recv().await.unwrap();
        assert_eq!(message["v"], "overlaid");
        assert!(!message["path"].as_str().unwrap().is_empty());
        process.shutdown(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn stderr_and_noise_never_reach_inbound() {
        let config = sh(
            "noisy",
            r#"echo 'booting' ; echo '{"broken' >&2 ; echo '{"id":1}'"#,
        );
        let (process, mut inbound) = ServerProcess::spawn(&config).unwrap();
        assert_eq!(inbound.recv().await.unwrap()["id"], 1);
        // Queue closes after the child exits.
        assert!(inbound.recv().await.is_none());
        process.shutdown(Duration::from_millis(500)).await;
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let config = ServerConfig::new("sleeper", "sleep", vec!["10".to_string()]);
        let (process, _inbound) = ServerProcess::spawn(&config).unwrap();
        assert!(process.pid().is_some());
        process.terminate().await;
        process.terminate().await;
        process.shutdown(Duration::from_millis(100)).await;
        assert!(process.has_exited().await);
    }

    #[tokio::test]
    async fn send_after_shutdown_reports_closed() {
        let config = ServerConfig::new("echo", "cat", vec![]);
        let (process, _inbound) = ServerProcess::spawn(&config).unwrap();
        process.shutdown(Duration::from_millis(200)).await;
        let err = process.send(&serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::ConnectionClosed { .. }));
    }
}
