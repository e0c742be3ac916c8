//! Child-process transport: newline-delimited JSON-RPC over stdin/stdout.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    serde_json::Value,
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, ChildStdin, Command},
        sync::{Mutex, oneshot},
        task::JoinHandle,
        time::timeout,
    },
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    traits::Transport,
    types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, TransportError},
};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Transport over a spawned child process. The child is killed when the
/// transport is dropped.
pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Duration,
    alive: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn `command args..` with `env` merged into the child environment.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::message("child stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::message("child stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::message("child stderr not captured"))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader_pending = Arc::clone(&pending);
        let reader_alive = Arc::clone(&alive);
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                dispatch_line(&line, &reader_pending).await;
            }
            // EOF: the child exited or closed stdout. Dropping the pending
            // senders wakes every in-flight request with an error.
            reader_alive.store(false, Ordering::SeqCst);
            reader_pending.lock().await.clear();
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "mcp::server", "{line}");
            }
        });

        Ok(Self {
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            alive,
            reader: Mutex::new(Some(reader)),
        })
    }

    async fn write_line(&self, payload: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(payload.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

/// Route one stdout line to the pending request it answers.
async fn dispatch_line(line: &str, pending: &PendingMap) {
    match serde_json::from_str::<JsonRpcResponse>(line) {
        Ok(response) => {
            let Some(id) = response.id.as_u64() else {
                debug!("ignoring message without numeric id");
                return;
            };
            if let Some(tx) = pending.lock().await.remove(&id) {
                let _ = tx.send(response);
            } else {
                debug!(id, "response for unknown request id");
            }
        },
        Err(e) => warn!(error = %e, "unparseable line from server"),
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = JsonRpcRequest::new(id, method, params);
        let payload = serde_json::to_string(&request)?;
        if let Err(e) = self.write_line(&payload).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::Closed.into()),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(TransportError::Timeout {
                    method: method.into(),
                    timeout_secs: self.request_timeout.as_secs(),
                }
                .into())
            },
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        let payload = serde_json::to_string(&notification)?;
        self.write_line(&payload).await
    }

    async fn is_alive(&self) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return false;
        }
        // try_wait is non-blocking; Some(_) means the child already exited.
        match self.child.lock().await.try_wait() {
            Ok(None) => true,
            _ => {
                self.alive.store(false, Ordering::SeqCst);
                false
            },
        }
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        let mut child = self.child.lock().await;
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "child already exited");
        }
        let _ = child.wait().await;
        self.pending.lock().await.clear();
    }
}
