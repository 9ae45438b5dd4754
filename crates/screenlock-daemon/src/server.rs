//! Socket server for the screenlock daemon.
//!
//! Every connection gets a reader loop and a writer task. All state sits in
//! one [`DaemonState`] behind an `RwLock`; each inbound message, idle-timer
//! firing, and disconnect runs under a single write guard.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{RwLock, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use screenlock_rpc::protocol::{Message, Response};
use screenlock_rpc::transport::FrameCodec;
use screenlock_types::ConnectionId;

use crate::config::DaemonConfig;
use crate::config_watcher::spawn_config_watcher;
use crate::error::{DaemonError, Result};
use crate::handlers::{HandlerContext, handle_notification, handle_request};
use crate::registry::{ConnectionRegistry, ConnectionRole};

const CONFIG_RELOAD_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

pub struct DaemonState {
    pub registry: ConnectionRegistry,
    pub config: DaemonConfig,
    pub started_at: Instant,
}

impl DaemonState {
    #[must_use]
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            config,
            started_at: Instant::now(),
        }
    }

    pub fn create_handler_context<'a>(
        &'a mut self,
        connection_id: &'a ConnectionId,
    ) -> HandlerContext<'a> {
        HandlerContext {
            registry: &mut self.registry,
            config: &self.config,
            started_at: self.started_at,
            connection_id,
        }
    }

    /// Forget a connection and release whatever control it held or owned.
    ///
    /// A client's session is withdrawn from its source; a source's sessions
    /// are all finished and their requesters unlocked.
    pub fn disconnect(&mut self, connection_id: &ConnectionId) {
        let Some(connection) = self.registry.remove(connection_id) else {
            return;
        };
        info!("Connection closed: {connection_id}");

        match connection.role {
            ConnectionRole::Client(mut client) => {
                if let Some(binding) = client.unbind()
                    && let Some(source) = self.registry.source_mut(&binding.source)
                {
                    let signals = source.withdraw(&binding.session);
                    self.registry.deliver(signals);
                }
            }
            ConnectionRole::Source(mut source) => {
                let signals = source.close();
                debug!(
                    "Source {connection_id} gone, unlocking {} requester(s)",
                    signals.len()
                );
                self.registry.deliver(signals);
            }
            ConnectionRole::Pending => {}
        }
    }

    /// Take over a reloaded config.
    ///
    /// The socket path and frame limit are bound at startup and stay as they
    /// are; namespaces and the default timeout apply to new registrations.
    pub fn apply_config(&mut self, mut next: DaemonConfig) {
        if next.socket_path != self.config.socket_path
            || next.max_frame_bytes != self.config.max_frame_bytes
        {
            warn!("socketPath and maxFrameBytes changes need a daemon restart");
        }
        next.socket_path = self.config.socket_path.clone();
        next.max_frame_bytes = self.config.max_frame_bytes;

        info!(
            "Config reloaded: {} namespace(s), default timeout {}s",
            next.namespaces.len(),
            next.default_timeout_secs
        );
        self.config = next;
    }
}

async fn config_reload_task(config_path: PathBuf, state: Arc<RwLock<DaemonState>>) {
    let (reload_tx, mut reload_rx) = mpsc::unbounded_channel::<()>();
    let _watcher = spawn_config_watcher(config_path.clone(), reload_tx);

    while reload_rx.recv().await.is_some() {
        let next = match DaemonConfig::load(&config_path) {
            Ok(next) => next,
            Err(e) => {
                error!("Failed to reload config: {e}");
                continue;
            }
        };

        let Ok(mut state_guard) =
            tokio::time::timeout(CONFIG_RELOAD_LOCK_TIMEOUT, state.write()).await
        else {
            error!("Config reload timed out waiting for write lock");
            continue;
        };
        state_guard.apply_config(next);
    }

    debug!("Config watcher task ended");
}

/// Run the daemon until Ctrl-C.
///
/// `config_path` is watched for changes when given.
///
/// # Errors
///
/// Returns an error if another daemon owns the socket or binding fails.
pub async fn run(config: DaemonConfig, config_path: Option<PathBuf>) -> Result<()> {
    let path = config.socket_path();

    cleanup_stale_socket(&path).await?;
    let listener = UnixListener::bind(&path)?;
    info!("Daemon listening on {}", path.display());

    let state = Arc::new(RwLock::new(DaemonState::new(config)));

    if let Some(config_path) = config_path {
        tokio::spawn(config_reload_task(config_path, state.clone()));
    }

    tokio::select! {
        () = serve(listener, state) => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown requested, stopping server");
        }
    }

    if path.exists()
        && let Err(e) = std::fs::remove_file(&path)
    {
        warn!("Failed to remove socket file {}: {}", path.display(), e);
    }

    Ok(())
}

/// Accept connections on `listener` forever.
pub async fn serve(listener: UnixListener, state: Arc<RwLock<DaemonState>>) {
    info!("Ready to accept connections");
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        error!("Connection error: {e}");
                    }
                });
            }
            Err(e) => {
                error!("Accept error: {e}");
            }
        }
    }
}

async fn cleanup_stale_socket(path: &Path) -> Result<()> {
    if path.exists() {
        if UnixStream::connect(path).await.is_ok() {
            return Err(DaemonError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "Another daemon is already running",
            )));
        }
        info!("Removing stale socket at {}", path.display());
        std::fs::remove_file(path)?;
    }
    Ok(())
}

async fn handle_connection(stream: UnixStream, state: Arc<RwLock<DaemonState>>) -> Result<()> {
    let max_frame_bytes = state.read().await.config.max_frame_bytes;
    let framed = Framed::new(stream, FrameCodec::with_max_frame_bytes(max_frame_bytes));
    let (mut sink, mut stream) = framed.split();

    let connection_id = ConnectionId::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let (idle_tx, mut idle_rx) = mpsc::unbounded_channel::<u64>();

    state
        .write()
        .await
        .registry
        .insert_pending(connection_id.clone(), tx, idle_tx);

    let send_id = connection_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Message::Notification(n) = &msg {
                trace!("[{send_id}] -> {}", n.method);
            }
            if let Err(e) = sink.send(msg).await {
                warn!("Failed to send to {send_id}: {e}");
                break;
            }
        }
    });

    let mut timed_out = false;
    let mut outcome = Ok(());
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(msg)) => process_message(&connection_id, msg, &state).await,
                Some(Err(e)) => {
                    outcome = Err(DaemonError::Codec(e));
                    break;
                }
                None => break,
            },
            Some(generation) = idle_rx.recv() => {
                let mut state_guard = state.write().await;
                let expired = state_guard
                    .registry
                    .client(&connection_id)
                    .is_some_and(|c| c.is_timer_current(generation));
                if expired {
                    info!("[{connection_id}] Idle timeout, closing connection");
                    state_guard.disconnect(&connection_id);
                    timed_out = true;
                    break;
                }
                trace!("[{connection_id}] Stale idle firing {generation} ignored");
            }
        }
    }

    if !timed_out {
        state.write().await.disconnect(&connection_id);
    }
    send_task.abort();

    outcome
}

async fn process_message(
    connection_id: &ConnectionId,
    msg: Message,
    state: &Arc<RwLock<DaemonState>>,
) {
    let mut state_guard = state.write().await;

    match msg {
        Message::Request(request) => {
            let mut ctx = state_guard.create_handler_context(connection_id);
            let response: Response = handle_request(&mut ctx, &request);
            state_guard
                .registry
                .send_to(connection_id, Message::Response(response));
        }
        Message::Notification(notification) => {
            trace!("[{connection_id}] <- {}", notification.method);
            let mut ctx = state_guard.create_handler_context(connection_id);
            if let Err(e) = handle_notification(&mut ctx, &notification) {
                warn!("Notification handler error: {e}");
            }
        }
        Message::Response(resp) => {
            warn!("Unexpected response from {connection_id}: {:?}", resp.id);
        }
    }
}
