//! RPC connection
//!
//! [`RpcConn`] turns a pair of object-stream halves into a JSON-RPC peer:
//! requests with replies (`call`), fire-and-forget notifications
//! (`notify`), inbound dispatch to a [`Handler`], and a disconnect event
//! both ends can wait on.
//!
//! Two tasks run per connection. The writer task owns the sink and drains
//! an outbound channel, so at most one message body is ever in flight and
//! any task may send without coordination. The reader task owns the source
//! and dispatches inbound messages *synchronously*, which preserves the
//! per-connection FIFO that session data relies on.
//!
//! A handler must never `call` back into its own connection: the reader is
//! parked inside the handler, so the reply could not be processed. Calls
//! to a *different* connection (the hub proxying file transfers) are fine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::envelope::Envelope;
use crate::error::ProtocolError;
use crate::stream::{ObjectSink, ObjectSource};

/// Outbound queue depth. Senders briefly block when the peer stalls; the
/// transport write applies the real back-pressure.
const OUTBOUND_QUEUE: usize = 64;

/// An inbound request or notification
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Call id when the peer expects a reply
    pub id: Option<u64>,
    /// Method name
    pub method: String,
    /// Raw parameter object
    pub params: Option<Value>,
}

impl Inbound {
    /// Deserialize the parameter object
    pub fn parse_params<P: DeserializeOwned>(&self) -> Result<P, ProtocolError> {
        let params = self.params.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(params)?)
    }
}

/// Receives inbound requests and notifications for one connection
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handle one inbound message. Runs on the reader task; implementations
    /// reply through [`RpcConn::reply`] and must not block indefinitely.
    async fn handle(&self, conn: &RpcConn, inbound: Inbound);
}

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<Result<Value, ProtocolError>>>>;

struct ConnInner {
    outbound_tx: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

/// A live JSON-RPC connection. Cheap to clone; all clones share the
/// underlying stream.
#[derive(Clone)]
pub struct RpcConn {
    inner: Arc<ConnInner>,
}

impl RpcConn {
    /// Spawn the writer and reader tasks over the given stream halves and
    /// return a handle to the connection.
    pub fn spawn<Si, So>(sink: Si, source: So, handler: Arc<dyn Handler>) -> Self
    where
        Si: ObjectSink,
        So: ObjectSource,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);

        let inner = Arc::new(ConnInner {
            outbound_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        });

        let conn = Self {
            inner: Arc::clone(&inner),
        };

        tokio::spawn(write_loop(sink, outbound_rx, Arc::clone(&inner)));
        tokio::spawn(read_loop(source, handler, conn.clone()));

        conn
    }

    /// Send a request and wait for the peer's reply
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, ProtocolError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .expect("pending map poisoned")
            .insert(id, tx);

        let envelope = Envelope::request(id, method, params)?;
        if let Err(e) = self.send(&envelope).await {
            self.take_pending(id);
            return Err(e);
        }

        tokio::select! {
            reply = rx => match reply {
                Ok(Ok(value)) => Ok(serde_json::from_value(value)?),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ProtocolError::Disconnected),
            },
            _ = self.inner.shutdown.cancelled() => {
                self.take_pending(id);
                Err(ProtocolError::Disconnected)
            }
        }
    }

    /// Send a notification
    pub async fn notify<P: Serialize>(&self, method: &str, params: &P) -> Result<(), ProtocolError> {
        let envelope = Envelope::notification(method, params)?;
        self.send(&envelope).await
    }

    /// Reply to an inbound request
    pub async fn reply<R: Serialize>(&self, id: u64, result: &R) -> Result<(), ProtocolError> {
        let envelope = Envelope::response(id, result)?;
        self.send(&envelope).await
    }

    /// Reply to an inbound request with a JSON-RPC error
    pub async fn reply_error(
        &self,
        id: u64,
        code: i64,
        message: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        let envelope = Envelope::error_response(id, code, message);
        self.send(&envelope).await
    }

    /// Close the connection. Queued outbound messages are flushed
    /// best-effort; closing twice is a no-op.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }

    /// Whether the connection has disconnected
    pub fn is_disconnected(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Wait until the connection disconnects (peer closed, transport
    /// failed, or [`RpcConn::close`] was called)
    pub async fn disconnected(&self) {
        self.inner.shutdown.cancelled().await;
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), ProtocolError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(ProtocolError::Disconnected);
        }
        let text = serde_json::to_string(envelope)?;
        self.inner
            .outbound_tx
            .send(text)
            .await
            .map_err(|_| ProtocolError::Disconnected)
    }

    fn take_pending(&self, id: u64) -> Option<oneshot::Sender<Result<Value, ProtocolError>>> {
        self.inner.pending.lock().expect("pending map poisoned").remove(&id)
    }

    fn fail_all_pending(&self) {
        // Dropping the senders resolves every waiting call with an error.
        self.inner
            .pending
            .lock()
            .expect("pending map poisoned")
            .clear();
    }
}

async fn write_loop<Si: ObjectSink>(
    mut sink: Si,
    mut outbound_rx: mpsc::Receiver<String>,
    inner: Arc<ConnInner>,
) {
    loop {
        tokio::select! {
            biased;
            maybe = outbound_rx.recv() => match maybe {
                Some(text) => {
                    if sink.send(text).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = inner.shutdown.cancelled() => {
                // Flush whatever was queued before the close.
                while let Ok(text) = outbound_rx.try_recv() {
                    if sink.send(text).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    sink.close().await;
    inner.shutdown.cancel();
}

async fn read_loop<So: ObjectSource>(mut source: So, handler: Arc<dyn Handler>, conn: RpcConn) {
    loop {
        let text = tokio::select! {
            maybe = source.recv() => match maybe {
                Some(Ok(text)) => text,
                Some(Err(e)) => {
                    tracing::debug!("transport read failed: {}", e);
                    break;
                }
                None => break,
            },
            _ = conn.inner.shutdown.cancelled() => break,
        };

        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!("dropping malformed message: {}", e);
                continue;
            }
        };

        if envelope.is_call() {
            let inbound = Inbound {
                id: envelope.id,
                method: envelope.method.unwrap_or_default(),
                params: envelope.params,
            };
            // Synchronous dispatch: inbound order is delivery order.
            handler.handle(&conn, inbound).await;
        } else if envelope.is_reply() {
            let id = envelope.id.unwrap_or_default();
            if let Some(tx) = conn.take_pending(id) {
                let outcome = match envelope.error {
                    Some(err) => Err(ProtocolError::Remote {
                        code: err.code,
                        message: err.message,
                    }),
                    None => Ok(envelope.result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(outcome);
            } else {
                tracing::warn!(id, "reply for unknown call id");
            }
        } else {
            tracing::warn!("dropping envelope with neither method nor id");
        }
    }

    conn.inner.shutdown.cancel();
    conn.fail_all_pending();
}
