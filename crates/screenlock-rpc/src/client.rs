//! RPC client helper for connecting to the screenlock daemon.
//!
//! Wraps one framed Unix-socket connection: requests are matched to their
//! responses by id, everything else (events pushed by the daemon) is queued
//! for [`RpcClient::next_event`].

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::net::UnixStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use screenlock_types::{ConnectionId, Envelope, EnvelopeError, Session};

use crate::protocol::{
    Message, Notification, RegisterParams, RegisterResult, Request, RequestId, Response,
    RpcError, StatusResult, TakeControlParams, events, methods,
};
use crate::transport::{CodecError, FrameCodec};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR").map_or_else(|_| std::env::temp_dir(), PathBuf::from)
}

/// Default socket path for the daemon.
///
/// Prefers `$XDG_RUNTIME_DIR`, falling back to the system temp directory.
#[must_use]
pub fn socket_path() -> PathBuf {
    runtime_dir().join("screenlock.sock")
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error: {code} - {message}")]
    Rpc { code: i32, message: String },

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timeout")]
    Timeout,

    #[error("Unexpected response type")]
    UnexpectedResponse,
}

impl From<RpcError> for ClientError {
    fn from(e: RpcError) -> Self {
        ClientError::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

type PendingRequest = oneshot::Sender<Result<Response, ClientError>>;
type FrameSink = SplitSink<Framed<UnixStream, FrameCodec>, Message>;

pub struct RpcClient {
    sender: Arc<Mutex<FrameSink>>,
    incoming_rx: mpsc::Receiver<Notification>,
    backlog: VecDeque<Notification>,
    pending: Arc<Mutex<HashMap<RequestId, PendingRequest>>>,
    next_id: AtomicU64,
    connection_id: Option<ConnectionId>,
    reader: JoinHandle<()>,
}

impl RpcClient {
    /// Connect to the daemon at the default socket path.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Io` if the socket connection fails.
    pub async fn connect() -> Result<Self, ClientError> {
        Self::connect_to(&socket_path()).await
    }

    /// Connect to the daemon at a custom socket path.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Io` if the socket connection fails.
    pub async fn connect_to(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path).await?;
        let (sink, mut stream) = Framed::new(stream, FrameCodec::new()).split();

        let pending: Arc<Mutex<HashMap<RequestId, PendingRequest>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_reader = pending.clone();
        let (incoming_tx, incoming_rx) = mpsc::channel(64);

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Response(resp)) => {
                        if let Some(tx) = pending_reader.lock().await.remove(&resp.id) {
                            let _ = tx.send(Ok(resp));
                        }
                    }
                    Ok(Message::Notification(n)) => {
                        if incoming_tx.send(n).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Request(r)) => {
                        tracing::debug!("Ignoring request from daemon: {}", r.method);
                    }
                    Err(e) => {
                        tracing::debug!("Read error: {e}");
                        break;
                    }
                }
            }
            // Fail whatever is still waiting; the stream is gone
            for (_, tx) in pending_reader.lock().await.drain() {
                let _ = tx.send(Err(ClientError::ConnectionClosed));
            }
        });

        Ok(Self {
            sender: Arc::new(Mutex::new(sink)),
            incoming_rx,
            backlog: VecDeque::new(),
            pending,
            next_id: AtomicU64::new(1),
            connection_id: None,
            reader,
        })
    }

    /// Register this connection in a namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the daemon rejects the namespace.
    pub async fn register(
        &mut self,
        namespace: &str,
        params: Option<Map<String, Value>>,
    ) -> Result<RegisterResult, ClientError> {
        let params = RegisterParams {
            namespace: namespace.to_string(),
            params,
        };
        let result: RegisterResult = self
            .request(methods::REGISTER, Some(serde_json::to_value(params)?))
            .await?;

        self.connection_id = Some(result.connection_id.clone());
        Ok(result)
    }

    #[must_use]
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.connection_id.as_ref()
    }

    /// Fetch the daemon status.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn status(&self) -> Result<StatusResult, ClientError> {
        self.request(methods::STATUS, None).await
    }

    /// Ask for control of a source and wait for the `ControlSession` answer.
    ///
    /// Events that arrive before the answer stay queued for `next_event`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Envelope` when the daemon refuses (unknown
    /// source) or answers with a malformed envelope.
    pub async fn take_control(&mut self, target: &ConnectionId) -> Result<Session, ClientError> {
        let params = TakeControlParams {
            target_connection_id: target.clone(),
        };
        self.notify(events::TAKE_CONTROL, Some(serde_json::to_value(params)?))
            .await?;

        // Unrelated events stay queued for next_event, even if this fails
        let answer = loop {
            let next = tokio::time::timeout(REQUEST_TIMEOUT, self.incoming_rx.recv())
                .await
                .map_err(|_| ClientError::Timeout)?;
            let Some(notification) = next else {
                return Err(ClientError::ConnectionClosed);
            };
            if notification.method == events::CONTROL_SESSION {
                break notification;
            }
            self.backlog.push_back(notification);
        };

        let payload = Envelope::into_result(answer.params.unwrap_or(Value::Null))?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails, the connection closes, the daemon
    /// answers with an error, or the result cannot be deserialized.
    pub async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, ClientError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let request = Request::new(method, params, id.clone());

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        self.sender
            .lock()
            .await
            .send(Message::Request(request))
            .await?;

        let response = tokio::time::timeout(REQUEST_TIMEOUT, rx)
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|_| ClientError::ConnectionClosed)??;

        if let Some(error) = response.error {
            return Err(error.into());
        }

        let result = response.result.ok_or(ClientError::UnexpectedResponse)?;
        Ok(serde_json::from_value(result)?)
    }

    /// Emit an event (no response expected).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Codec` if sending fails.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        let notification = Notification::new(method, params);
        self.sender
            .lock()
            .await
            .send(Message::Notification(notification))
            .await?;
        Ok(())
    }

    /// Next event pushed by the daemon, or `None` once the connection closed.
    pub async fn next_event(&mut self) -> Option<Notification> {
        if let Some(queued) = self.backlog.pop_front() {
            return Some(queued);
        }
        self.incoming_rx.recv().await
    }
}

// The reader task holds the read half; the socket only closes once it is gone.
impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
