//! Screenlock daemon library.
//!
//! Connections register in a namespace as either a *source* (something that
//! can be controlled) or a *client* (something that asks for control). Each
//! source serializes control through its own
//! [`SessionManager`](session::SessionManager): one active session at a
//! time, the rest waiting in FIFO order.

pub mod client;
pub mod config;
pub(crate) mod config_watcher;
pub mod error;
pub(crate) mod handlers;
pub mod registry;
pub mod server;
pub mod session;
pub mod source;

pub use client::{Binding, ClientManager, IdleTimer};
pub use config::DaemonConfig;
pub use error::{DaemonError, Result};
pub use registry::{ConnectionRegistry, STATS_TARGET};
pub use server::{DaemonState, run, serve};
pub use session::{ControlSignal, Recipient, SessionManager, SignalKind};
pub use source::SourceManager;
