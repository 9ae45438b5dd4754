//! Wire protocol for screenlock components.
//!
//! This crate provides the protocol types, transport codec, and client helper
//! used between the daemon, sources and clients over a Unix socket.
//!
//! - [`protocol`]: request/response/notification types and event names
//! - [`transport`]: length-prefixed codec for message framing
//! - [`client`]: async client for talking to the daemon
//! - [`helpers`]: event builders and param decoding
//!
//! # Example
//!
//! ```no_run
//! use screenlock_rpc::RpcClient;
//!
//! # async fn example() -> Result<(), screenlock_rpc::ClientError> {
//! let mut client = RpcClient::connect().await?;
//! client.register("remote", None).await?;
//!
//! let session = client.take_control(&"source-connection-id".into()).await?;
//! println!("Session {} is {}", session.id(), session.status());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod helpers;
pub mod protocol;
pub mod transport;

pub use client::{ClientError, RpcClient, socket_path};

pub use helpers::{envelope_event, parse_params, raw_event};

pub use protocol::{
    ALREADY_REGISTERED, BroadcastResult, ControlEventParams, ExternalMessageParams,
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND, Message,
    NAMESPACE_NOT_FOUND, NOT_REGISTERED, NamespaceKind, Notification, PARSE_ERROR,
    RegisterParams, RegisterResult, Request, RequestId, Response, RpcError, SourceStatus,
    StatusResult, TakeControlParams, events, methods,
};

pub use transport::{CodecError, DEFAULT_MAX_FRAME_BYTES, FrameCodec};

pub use screenlock_types::{
    ConnectionId, Envelope, EnvelopeError, Session, SessionId, SessionStatus,
};
