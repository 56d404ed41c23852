//! A running backend child process: its stdio, a single writer queue, and
//! a correlation table from request id to the caller awaiting its reply.
//!
//! Grounded on the "long-lived child processes" design note: one dedicated
//! reader task, one dedicated writer task, and a `DashMap<id, oneshot::Sender>`
//! standing in for the correlation table. Restart is the Registry's job
//! (`registry.rs`); a `BackendSession` itself is never restarted, only
//! replaced.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{ToolHostError, ToolHostResult};
use crate::protocol::{parse_line, RawResponse, Request};

#[derive(Debug, Clone)]
pub struct BackendDescriptor {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub workdir: Option<std::path::PathBuf>,
}

/// Fixed 30s budget for `list_tools`, per spec §4.2/§5.
pub const LIST_TOOLS_TIMEOUT: Duration = Duration::from_secs(30);

type Pending = Arc<DashMap<u64, oneshot::Sender<RawResponse>>>;

pub struct BackendSession {
    name: String,
    next_id: AtomicU64,
    pending: Pending,
    writer_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<String>>>,
    child: tokio::sync::Mutex<Child>,
    /// Set once the reader observes stdout EOF (the child exited).
    crashed: Arc<tokio::sync::Notify>,
    crashed_flag: Arc<std::sync::atomic::AtomicBool>,
}

impl BackendSession {
    pub async fn spawn(descriptor: &BackendDescriptor) -> ToolHostResult<Self> {
        let mut cmd = Command::new(&descriptor.command);
        cmd.args(&descriptor.args)
            .envs(descriptor.env.iter())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(workdir) = &descriptor.workdir {
            cmd.current_dir(workdir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ToolHostError::SpawnFailed(descriptor.name.clone(), e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolHostError::SpawnFailed(descriptor.name.clone(), "no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolHostError::SpawnFailed(descriptor.name.clone(), "no stdout".into()))?;
        let stderr = child.stderr.take();

        let pending: Pending = Arc::new(DashMap::new());
        let crashed = Arc::new(tokio::sync::Notify::new());
        let crashed_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = writer_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_name = descriptor.name.clone();
        let reader_crashed = crashed.clone();
        let reader_crashed_flag = crashed_flag.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_line(&line) {
                        Ok(resp) => {
                            if let Some((_, tx)) = reader_pending.remove(&resp.id) {
                                let _ = tx.send(resp);
                            } else {
                                warn!(backend = %reader_name, id = resp.id, "dropping unsolicited or duplicate-id reply");
                            }
                        }
                        Err(e) => {
                            warn!(backend = %reader_name, error = %e, "dropping unparseable frame");
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(backend = %reader_name, error = %e, "stdout read error");
                        break;
                    }
                }
            }
            reader_crashed_flag.store(true, Ordering::SeqCst);
            for entry in reader_pending.iter() {
                debug!(backend = %reader_name, id = *entry.key(), "failing in-flight call, backend exited");
            }
            reader_pending.clear();
            reader_crashed.notify_waiters();
        });

        if let Some(stderr) = stderr {
            let stderr_name = descriptor.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(backend = %stderr_name, stderr = %line, "backend stderr");
                }
            });
        }

        Ok(BackendSession {
            name: descriptor.name.clone(),
            next_id: AtomicU64::new(1),
            pending,
            writer_tx: parking_lot::Mutex::new(Some(writer_tx)),
            child: tokio::sync::Mutex::new(child),
            crashed,
            crashed_flag,
        })
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed_flag.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send(&self, build: impl FnOnce(u64) -> Request) -> ToolHostResult<RawResponse> {
        if self.is_crashed() {
            return Err(ToolHostError::BackendCrashed(self.name.clone()));
        }
        let id = self.next_id();
        let request = build(id);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let line = request
            .to_line()
            .map_err(|e| ToolHostError::BackendError(self.name.clone(), e.to_string()))?;
        let send_ok = match self.writer_tx.lock().as_ref() {
            Some(tx) => tx.send(line).is_ok(),
            None => false,
        };
        if !send_ok {
            self.pending.remove(&id);
            return Err(ToolHostError::BackendCrashed(self.name.clone()));
        }

        tokio::select! {
            resp = rx => resp.map_err(|_| ToolHostError::BackendCrashed(self.name.clone())),
            _ = self.crashed.notified() => {
                self.pending.remove(&id);
                Err(ToolHostError::BackendCrashed(self.name.clone()))
            }
        }
    }

    /// Issue `list_tools`, bounded by the fixed 30s budget.
    pub async fn list_tools(&self) -> ToolHostResult<serde_json::Value> {
        let resp = timeout(LIST_TOOLS_TIMEOUT, self.send(|id| Request::ListTools { id }))
            .await
            .map_err(|_| ToolHostError::ListToolsFailed(self.name.clone(), "timed out".into()))??;
        match resp.result {
            Some(result) => Ok(result),
            None => Err(ToolHostError::ListToolsFailed(
                self.name.clone(),
                resp.error.map(|e| e.message).unwrap_or_default(),
            )),
        }
    }

    /// Issue `call_tool` with the given per-call timeout. Timeout and
    /// backend-error are distinguished so the invoker can format the
    /// §4.3 structured error strings correctly.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        call_timeout: Duration,
    ) -> ToolHostResult<String> {
        let tool_name = name.to_string();
        let result = timeout(
            call_timeout,
            self.send(|id| Request::CallTool {
                id,
                params: crate::protocol::CallToolParams {
                    name: tool_name.clone(),
                    arguments,
                },
            }),
        )
        .await
        .map_err(|_| ToolHostError::ToolTimeout {
            name: tool_name.clone(),
            timeout_secs: call_timeout.as_secs(),
        })??;

        if let Some(err) = result.error {
            return Err(ToolHostError::BackendError(self.name.clone(), err.message));
        }
        let result = result
            .result
            .ok_or_else(|| ToolHostError::BackendError(self.name.clone(), "empty reply".into()))?;
        let parsed: crate::protocol::CallToolResult = serde_json::from_value(result)
            .map_err(|e| ToolHostError::BackendError(self.name.clone(), e.to_string()))?;
        Ok(parsed.content)
    }

    /// Close stdin, wait up to 5s for graceful exit, then force-kill.
    pub async fn shutdown(&self) {
        self.writer_tx.lock().take();
        let mut child = self.child.lock().await;
        match timeout(Duration::from_secs(5), child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                let _ = child.start_kill();
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
