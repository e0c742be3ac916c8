//! TCP transport: newline-delimited JSON-RPC over a socket.
//!
//! Shares the wire discipline of the stdio transport; only the byte
//! channel differs.

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
        net::{
            TcpStream,
            tcp::{OwnedReadHalf, OwnedWriteHalf},
        },
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

pub struct SocketTransport {
    writer: Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Duration,
    alive: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SocketTransport {
    /// Connect to `address` (`host:port`). The connect attempt itself is
    /// bounded by `request_timeout`.
    pub async fn connect(address: &str, request_timeout: Duration) -> Result<Self> {
        let stream = timeout(request_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| TransportError::Timeout {
                method: "connect".into(),
                timeout_secs: request_timeout.as_secs(),
            })?
            .map_err(Error::Io)?;

        let (read_half, write_half) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&pending),
            Arc::clone(&alive),
        ));

        Ok(Self {
            writer: Mutex::new(write_half),
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            alive,
            reader: Mutex::new(Some(reader)),
        })
    }

    async fn write_line(&self, payload: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(payload.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }
}

async fn read_loop(read_half: OwnedReadHalf, pending: PendingMap, alive: Arc<AtomicBool>) {
    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JsonRpcResponse>(&line) {
            Ok(response) => {
                let Some(id) = response.id.as_u64() else {
                    debug!("ignoring message without numeric id");
                    continue;
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
    alive.store(false, Ordering::SeqCst);
    pending.lock().await.clear();
}

#[async_trait]
impl Transport for SocketTransport {
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
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "socket already closed");
        }
        self.pending.lock().await.clear();
    }
}
