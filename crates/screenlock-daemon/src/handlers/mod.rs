//! Request and event handlers for the daemon.
//!
//! - Requests (`register`, `status`, `broadcast`) always get a Response
//! - Events from clients go through [`control`]: `TakeControl` plus the
//!   gated forwarding of everything else to the controlled source

mod control;

use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use screenlock_rpc::helpers::parse_params;
use screenlock_rpc::protocol::{
    BroadcastResult, ExternalMessageParams, NamespaceKind, Notification, RegisterParams,
    RegisterResult, Request, RequestId, Response, StatusResult, methods,
};
use screenlock_types::ConnectionId;

use crate::config::DaemonConfig;
use crate::error::{DaemonError, Result};
use crate::registry::{Connection, ConnectionRegistry};

use control::handle_client_event;

pub struct HandlerContext<'a> {
    pub registry: &'a mut ConnectionRegistry,
    pub config: &'a DaemonConfig,
    pub started_at: Instant,
    pub connection_id: &'a ConnectionId,
}

impl HandlerContext<'_> {
    pub fn is_registered(&self) -> bool {
        self.registry
            .get(self.connection_id)
            .is_some_and(Connection::is_registered)
    }
}

pub fn handle_request(ctx: &mut HandlerContext<'_>, request: &Request) -> Response {
    let id = request.id.clone().unwrap_or(RequestId::Number(0));
    trace!("[{}] Request {}: {}", ctx.connection_id, id, request.method);

    let result = match request.method.as_str() {
        methods::REGISTER => handle_register(ctx, request.params.as_ref()),
        methods::STATUS => require_registered(ctx).and_then(|()| handle_status(ctx)),
        methods::BROADCAST => require_registered(ctx)
            .and_then(|()| handle_broadcast(ctx, request.params.as_ref())),
        method => Err(DaemonError::MethodNotFound(method.to_string())),
    };

    match result {
        Ok(value) => Response::success(id, value),
        Err(e) => Response::error(id, e.into()),
    }
}

pub fn handle_notification(
    ctx: &mut HandlerContext<'_>,
    notification: &Notification,
) -> Result<()> {
    let kind = ctx.registry.get(ctx.connection_id).map(Connection::kind);

    match kind {
        Some(Some(NamespaceKind::Client)) => handle_client_event(ctx, notification),
        Some(Some(NamespaceKind::Source)) => {
            debug!(
                "[{}] Ignoring event '{}' from source",
                ctx.connection_id, notification.method
            );
            Ok(())
        }
        Some(None) => {
            warn!(
                "[{}] Event '{}' before register, dropped",
                ctx.connection_id, notification.method
            );
            Ok(())
        }
        None => Err(DaemonError::NotRegistered),
    }
}

fn require_registered(ctx: &HandlerContext<'_>) -> Result<()> {
    if !ctx.is_registered() {
        return Err(DaemonError::NotRegistered);
    }
    Ok(())
}

fn handle_register(ctx: &mut HandlerContext<'_>, params: Option<&Value>) -> Result<Value> {
    let params: RegisterParams = parse_params(methods::REGISTER, params)?;

    let kind = ctx
        .config
        .namespace_kind(&params.namespace)
        .ok_or_else(|| DaemonError::NamespaceNotFound(params.namespace.clone()))?;

    ctx.registry.register(
        ctx.connection_id,
        &params.namespace,
        kind,
        params.params.unwrap_or_else(Map::new),
        ctx.config.default_timeout(),
    )?;

    let result = RegisterResult {
        connection_id: ctx.connection_id.clone(),
        kind,
    };
    Ok(serde_json::to_value(result)?)
}

fn handle_status(ctx: &HandlerContext<'_>) -> Result<Value> {
    let result = StatusResult {
        uptime_secs: ctx.started_at.elapsed().as_secs(),
        connections: ctx.registry.len(),
        sources: ctx.registry.summary(),
    };
    Ok(serde_json::to_value(result)?)
}

fn handle_broadcast(ctx: &HandlerContext<'_>, params: Option<&Value>) -> Result<Value> {
    let params: ExternalMessageParams = parse_params(methods::BROADCAST, params)?;
    let delivered = ctx
        .registry
        .broadcast_external_message(&params.from, params.message);
    Ok(serde_json::to_value(BroadcastResult { delivered })?)
}
