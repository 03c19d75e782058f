// rust/coordinator-core/src/coordinator/dispatch.rs

//! Request validation and routing.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::protocol::{RequestKind, Response, WireMessage};
use super::registry::GroupRegistry;

/// Routes decoded requests to their group.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<GroupRegistry>,
}

/// A request that passed validation, with its required fields unwrapped.
struct Checked<'a> {
    kind: RequestKind,
    client: &'a str,
    group: &'a str,
    message_id: &'a str,
}

fn non_empty(field: Option<&str>) -> Option<&str> {
    field.filter(|value| !value.is_empty())
}

fn check(msg: &WireMessage) -> Result<Checked<'_>, String> {
    let kind = msg.kind().map_err(|e| e.to_string())?;

    let client = non_empty(msg.client_name.as_deref()).ok_or("missing client_name")?;
    let group = non_empty(msg.group_name.as_deref()).ok_or("missing group_name")?;

    let message_id = match msg.message_id.as_deref() {
        Some(id) => id,
        None if kind.needs_message_id() => return Err(format!("{kind} without messageID")),
        None => "",
    };

    if kind == RequestKind::Aggregate && (msg.bundle.is_none() || msg.sub_id.is_none()) {
        return Err("aggregate without bundle and sub_id".to_string());
    }

    Ok(Checked {
        kind,
        client,
        group,
        message_id,
    })
}

impl Dispatcher {
    pub fn new(registry: Arc<GroupRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    /// Handle one decoded frame.
    ///
    /// Returns the reply to send, or `None` when the connection should be
    /// closed without one. Malformed requests are answered with `nack` and
    /// leave every group untouched.
    pub async fn dispatch(&self, frame: Value) -> Option<Response> {
        let msg = match WireMessage::from_value(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "rejecting request");
                return Some(Response::nack());
            }
        };

        let req = match check(&msg) {
            Ok(req) => req,
            Err(reason) => {
                warn!(
                    client = msg.client_name.as_deref().unwrap_or_default(),
                    group = msg.group_name.as_deref().unwrap_or_default(),
                    "rejecting request: {reason}"
                );
                return Some(Response::nack());
            }
        };

        let reply = loop {
            let Some(group) = self.registry.resolve(req.group, msg.group_size).await else {
                warn!(
                    client = req.client,
                    group = req.group,
                    "unknown group and no group_size given"
                );
                return Some(Response::nack());
            };

            let mut state = group.lock().await;
            if state.is_evicted() {
                debug!(group = req.group, "group evicted while waiting, resolving again");
                continue;
            }

            state.register(req.client, msg.hostname.as_deref(), msg.role.as_deref());

            let reply = match req.kind {
                RequestKind::GroupData => Some(state.group_data()),
                RequestKind::ClearGroup => {
                    let reply = state.clear_group();
                    if state.should_evict() {
                        state.mark_evicted();
                        self.registry.evict(req.group, &group).await;
                    }
                    Some(reply)
                }
                RequestKind::Aggregate => {
                    let bundle = msg.bundle.clone().unwrap_or_default();
                    let sub_id = msg.sub_id.as_deref().unwrap_or_default();
                    Some(state.aggregate(req.client, bundle, sub_id))
                }
                RequestKind::LavaSync => {
                    Some(state.lava_sync(req.client, req.message_id, msg.message.clone()))
                }
                RequestKind::LavaWait => Some(state.lava_wait(req.client, req.message_id)),
                RequestKind::LavaWaitAll => Some(state.lava_wait_all(
                    req.client,
                    req.message_id,
                    msg.wait_role.as_deref(),
                    msg.role.as_deref(),
                )),
                RequestKind::LavaSend => {
                    Some(state.lava_send(req.client, req.message_id, msg.message.clone()))
                }
                RequestKind::Complete => {
                    info!(client = req.client, group = req.group, "client complete");
                    None
                }
            };
            break reply;
        };

        if let Some(reply) = &reply {
            debug!(
                client = req.client,
                group = req.group,
                request = %req.kind,
                response = ?reply.response,
                "handled request"
            );
        }
        reply
    }
}
