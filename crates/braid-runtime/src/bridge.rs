//! Bridges a spawned inference process to an ordered event stream.
//!
//! One [`ChatBridge::start`] call maps to one child process. The bridge
//! writes the prompt to the child's stdin, closes it, and pumps stdout
//! chunks to the caller's sink in arrival order until the process exits,
//! the caller cancels, or the stream goes idle for too long.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use braid_core::error::BridgeError;
use braid_core::events::BridgeEvent;
use braid_core::ports::ServiceProbe;
use braid_core::wire::ChatRequest;

const STDOUT_CHUNK_BYTES: usize = 4096;

/// How to spawn the inference process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Binary to execute.
    pub program: String,
    /// Arguments placed before the model name.
    pub run_args: Vec<String>,
    /// Kill the child if stdout produces nothing for this long.
    /// `None` disables the idle watchdog.
    pub idle_timeout: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            program: "ollama".to_string(),
            run_args: vec!["run".to_string()],
            idle_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Handle to one in-flight generation.
///
/// Dropping the handle does not stop the generation; call
/// [`BridgeHandle::cancel`] for that.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    request_id: Uuid,
    cancel: CancellationToken,
}

impl BridgeHandle {
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Stop the generation and kill the underlying process.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Spawns inference processes and streams their output.
pub struct ChatBridge {
    config: BridgeConfig,
    probe: Arc<dyn ServiceProbe>,
}

impl ChatBridge {
    pub fn new(config: BridgeConfig, probe: Arc<dyn ServiceProbe>) -> Self {
        Self { config, probe }
    }

    /// Start one generation.
    ///
    /// Validates the request, checks the service is up, spawns the child
    /// and hands the pumping off to a background task. Events arrive on
    /// `sink` strictly ordered: one `Start`, stdout chunks as `Chunk`s,
    /// then exactly one `End` or `Failed`. If the sink's receiver is
    /// dropped mid-stream the child keeps being drained so it can exit
    /// on its own, but nothing more is delivered.
    pub async fn start(
        &self,
        request: ChatRequest,
        sink: mpsc::Sender<BridgeEvent>,
    ) -> Result<BridgeHandle, BridgeError> {
        let model = request.model.trim();
        let prompt = request.prompt.trim();
        if model.is_empty() {
            return Err(BridgeError::InvalidInput("model must not be empty".into()));
        }
        if prompt.is_empty() {
            return Err(BridgeError::InvalidInput("prompt must not be empty".into()));
        }

        if !self.probe.is_running().await {
            return Err(BridgeError::UpstreamUnavailable);
        }

        let mut child = Command::new(&self.config.program)
            .args(&self.config.run_args)
            .arg(model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let request_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        debug!(%request_id, model, "spawned inference process");

        spawn_stderr_reader(&mut child, request_id);

        let prompt = prompt.to_string();
        let idle_timeout = self.config.idle_timeout;
        let pump_cancel = cancel.clone();
        tokio::spawn(async move {
            pump(child, request_id, prompt, sink, pump_cancel, idle_timeout).await;
        });

        Ok(BridgeHandle { request_id, cancel })
    }
}

fn spawn_stderr_reader(child: &mut Child, request_id: Uuid) {
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    warn!(%request_id, line = %line, "inference process stderr");
                }
            }
        });
    }
}

async fn pump(
    mut child: Child,
    request_id: Uuid,
    prompt: String,
    sink: mpsc::Sender<BridgeEvent>,
    cancel: CancellationToken,
    idle_timeout: Option<Duration>,
) {
    // Write the prompt, then close stdin so the process knows input is done.
    if let Some(mut stdin) = child.stdin.take() {
        let write = async {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.shutdown().await
        };
        if let Err(e) = write.await {
            warn!(%request_id, error = %e, "failed to write prompt to stdin");
            let _ = child.kill().await;
            let _ = sink
                .send(BridgeEvent::Failed {
                    request_id,
                    exit_code: None,
                    message: format!("failed to deliver prompt: {e}"),
                })
                .await;
            return;
        }
    }

    let mut delivering = sink.send(BridgeEvent::Start { request_id }).await.is_ok();

    let Some(mut stdout) = child.stdout.take() else {
        let _ = child.kill().await;
        if delivering {
            let _ = sink
                .send(BridgeEvent::Failed {
                    request_id,
                    exit_code: None,
                    message: "inference process has no stdout".into(),
                })
                .await;
        }
        return;
    };
    let mut buf = [0u8; STDOUT_CHUNK_BYTES];

    loop {
        let read = read_chunk(&mut stdout, &mut buf, idle_timeout);
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(%request_id, "generation cancelled, killing process");
                let _ = child.kill().await;
                if delivering {
                    let _ = sink
                        .send(BridgeEvent::Failed {
                            request_id,
                            exit_code: None,
                            message: "generation cancelled".into(),
                        })
                        .await;
                }
                return;
            }
            outcome = read => match outcome {
                ReadOutcome::Chunk(n) => {
                    if delivering {
                        let content = String::from_utf8_lossy(&buf[..n]).into_owned();
                        if sink
                            .send(BridgeEvent::Chunk { request_id, content })
                            .await
                            .is_err()
                        {
                            // Receiver is gone. Keep draining so the child
                            // is not blocked on a full pipe.
                            debug!(%request_id, "sink closed, draining remaining output");
                            delivering = false;
                        }
                    }
                }
                ReadOutcome::Eof => break,
                ReadOutcome::Idle => {
                    warn!(%request_id, "stdout idle past deadline, killing process");
                    let _ = child.kill().await;
                    if delivering {
                        let _ = sink
                            .send(BridgeEvent::Failed {
                                request_id,
                                exit_code: None,
                                message: "generation timed out while idle".into(),
                            })
                            .await;
                    }
                    return;
                }
                ReadOutcome::Error(e) => {
                    warn!(%request_id, error = %e, "stdout read failed");
                    let _ = child.kill().await;
                    if delivering {
                        let _ = sink
                            .send(BridgeEvent::Failed {
                                request_id,
                                exit_code: None,
                                message: format!("stream read failed: {e}"),
                            })
                            .await;
                    }
                    return;
                }
            }
        }
    }

    let terminal = match child.wait().await {
        Ok(status) if status.success() => BridgeEvent::End { request_id },
        Ok(status) => {
            let exit_code = status.code();
            BridgeEvent::Failed {
                request_id,
                exit_code,
                message: match exit_code {
                    Some(code) => format!("inference process exited with code {code}"),
                    None => "inference process was terminated by a signal".to_string(),
                },
            }
        }
        Err(e) => BridgeEvent::Failed {
            request_id,
            exit_code: None,
            message: format!("failed to reap inference process: {e}"),
        },
    };

    if delivering {
        let _ = sink.send(terminal).await;
    }
}

enum ReadOutcome {
    Chunk(usize),
    Eof,
    Idle,
    Error(std::io::Error),
}

async fn read_chunk(
    stdout: &mut ChildStdout,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> ReadOutcome {
    let read = stdout.read(buf);
    let result = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, read).await {
            Ok(r) => r,
            Err(_) => return ReadOutcome::Idle,
        },
        None => read.await,
    };
    match result {
        Ok(0) => ReadOutcome::Eof,
        Ok(n) => ReadOutcome::Chunk(n),
        Err(e) => ReadOutcome::Error(e),
    }
}
