//! Control events sent by client connections.

use serde_json::Value;
use tracing::{debug, error, info};

use screenlock_rpc::helpers::{parse_params, raw_event};
use screenlock_rpc::protocol::{ControlEventParams, Notification, TakeControlParams, events};
use screenlock_types::ConnectionId;

use crate::client::{Binding, ClientManager};
use crate::error::{DaemonError, Result};

use super::HandlerContext;

/// Route one event from a client connection.
///
/// `TakeControl` is always accepted. Anything else needs a bound session:
/// it resets the idle timer and is forwarded to the source when the session
/// holds control.
pub fn handle_client_event(
    ctx: &mut HandlerContext<'_>,
    notification: &Notification,
) -> Result<()> {
    if notification.method == events::TAKE_CONTROL {
        return match parse_params::<TakeControlParams>(
            events::TAKE_CONTROL,
            notification.params.as_ref(),
        ) {
            Ok(params) => take_control(ctx, &params.target_connection_id),
            Err(e) => reject_take_control(ctx, notification.params.as_ref(), &e.message),
        };
    }

    let client = ctx
        .registry
        .client_mut(ctx.connection_id)
        .ok_or(DaemonError::NotRegistered)?;

    let Some(binding) = client.binding().cloned() else {
        error!(
            "[{}] Can't handle '{}': no source under control yet",
            ctx.connection_id, notification.method
        );
        return Ok(());
    };
    client.reset_timeout();

    forward_to_source(ctx, &binding, notification);
    Ok(())
}

/// Ask `target` for control on behalf of the current connection.
///
/// Answers with `ControlSession`. An unknown target gets a failure envelope
/// and creates nothing; otherwise any previous session of this client is
/// withdrawn before the new one is queued or activated.
pub fn take_control(ctx: &mut HandlerContext<'_>, target: &ConnectionId) -> Result<()> {
    let requester = ctx.connection_id.clone();

    let Some(source) = ctx.registry.source(target) else {
        info!("[{requester}] TakeControl for unknown source {target}");
        let message = format!("Source connection '{target}' doesn't exist.");
        let reply = ClientManager::control_session_reply(Err(message))?;
        ctx.registry.send_to(&requester, reply);
        return Ok(());
    };
    let timeout = source.timeout_duration(ctx.config.default_timeout());

    let previous = ctx
        .registry
        .client_mut(&requester)
        .ok_or(DaemonError::NotRegistered)?
        .unbind();
    if let Some(previous) = previous {
        debug!(
            "[{requester}] Leaving session {} on {}",
            previous.session, previous.source
        );
        if let Some(old_source) = ctx.registry.source_mut(&previous.source) {
            let signals = old_source.withdraw(&previous.session);
            ctx.registry.deliver(signals);
        }
    }

    let Some(source) = ctx.registry.source_mut(target) else {
        return Ok(());
    };
    let (session, signals) = source.new_session(requester.clone());
    info!(
        "[{requester}] Session {} on {target} is {}",
        session.id(),
        session.status()
    );

    if let Some(client) = ctx.registry.client_mut(&requester) {
        client.bind(
            Binding {
                source: target.clone(),
                session: session.id().clone(),
            },
            timeout,
        );
    }

    ctx.registry.deliver(signals);
    let reply = ClientManager::control_session_reply(Ok(&session))?;
    ctx.registry.send_to(&requester, reply);
    Ok(())
}

/// A `TakeControl` without a usable target still gets its one failed
/// `ControlSession`; nothing is created.
fn reject_take_control(
    ctx: &HandlerContext<'_>,
    payload: Option<&Value>,
    reason: &str,
) -> Result<()> {
    let payload = payload.map_or_else(|| "null".to_string(), Value::to_string);
    info!("[{}] Malformed TakeControl {payload}: {reason}", ctx.connection_id);

    let message = format!("Source connection for {payload} doesn't exist.");
    let reply = ClientManager::control_session_reply(Err(message))?;
    ctx.registry.send_to(ctx.connection_id, reply);
    Ok(())
}

fn forward_to_source(ctx: &HandlerContext<'_>, binding: &Binding, notification: &Notification) {
    let Some(source) = ctx.registry.source(&binding.source) else {
        debug!(
            "[{}] Source {} is gone, dropping '{}'",
            ctx.connection_id, binding.source, notification.method
        );
        return;
    };

    if !source.session_manager().is_active(&binding.session) {
        debug!(
            "[{}] Session {} is waiting, dropping '{}'",
            ctx.connection_id, binding.session, notification.method
        );
        return;
    }

    let params = ControlEventParams {
        session_id: binding.session.clone(),
        event: notification.method.clone(),
        content: notification.params.clone().unwrap_or_default(),
    };
    match raw_event(events::CONTROL_EVENT, &params) {
        Ok(msg) => {
            ctx.registry.send_to(&binding.source, msg);
        }
        Err(e) => error!("Failed to encode control event: {e}"),
    }
}
