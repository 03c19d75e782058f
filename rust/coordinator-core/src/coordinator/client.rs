// rust/coordinator-core/src/coordinator/client.rs

//! Client side of the coordinator protocol.
//!
//! Every request opens a fresh connection. A `wait` reply is turned into a
//! paced re-poll, so the convenience methods only return once the
//! coordinator acknowledges.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use super::frame::{FrameCodec, FrameError};
use super::protocol::{RequestKind, Response, ResponseStatus, WireMessage};
use crate::config::ClientConfig;
use crate::error::{CoordinatorError, Result};
use crate::retry::{with_backoff, Attempt, Backoff};

/// Who a client is within its group.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub client_name: String,
    pub group_name: String,
    pub group_size: u64,
    pub role: Option<String>,
    pub hostname: Option<String>,
}

impl NodeIdentity {
    pub fn new(
        client_name: impl Into<String>,
        group_name: impl Into<String>,
        group_size: u64,
    ) -> Self {
        Self {
            client_name: client_name.into(),
            group_name: group_name.into(),
            group_size,
            role: None,
            hostname: None,
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }
}

pub struct CoordinatorClient {
    config: ClientConfig,
    policy: Backoff,
    identity: NodeIdentity,
}

impl CoordinatorClient {
    pub fn new(config: ClientConfig, identity: NodeIdentity) -> Self {
        let policy = Backoff::for_polling(&config);
        Self {
            config,
            policy,
            identity,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// A request of `kind` carrying this client's identity.
    pub fn message(&self, kind: RequestKind) -> WireMessage {
        let mut msg = WireMessage::new(
            kind,
            self.identity.client_name.as_str(),
            self.identity.group_name.as_str(),
        )
        .with_group_size(self.identity.group_size);
        msg.role = self.identity.role.clone();
        msg.hostname = self.identity.hostname.clone();
        msg
    }

    async fn connect(&self) -> Result<Framed<TcpStream, FrameCodec>> {
        let address = self.config.address.as_str();
        let stream = timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            TcpStream::connect(address),
        )
        .await
        .map_err(|_| CoordinatorError::io(address, "connect timed out"))?
        .map_err(|e| CoordinatorError::io_with_source(address, "connect failed", e))?;

        Ok(Framed::new(stream, FrameCodec::new()))
    }

    /// One request/reply exchange.
    ///
    /// Returns `None` if the coordinator closed the connection without
    /// replying, which is the expected outcome for `complete`.
    pub async fn exchange(&self, msg: &WireMessage) -> Result<Option<Response>> {
        let mut framed = self.connect().await?;
        let deadline = Duration::from_millis(self.config.request_timeout_ms);

        timeout(deadline, framed.send(msg))
            .await
            .map_err(|_| FrameError::Timeout)??;

        let frame = match timeout(deadline, framed.next())
            .await
            .map_err(|_| FrameError::Timeout)?
        {
            Some(frame) => frame?,
            None => return Ok(None),
        };

        let response: Response = serde_json::from_value(frame)
            .map_err(|e| CoordinatorError::serialization(format!("unexpected reply: {e}")))?;
        Ok(Some(response))
    }

    /// Send `msg` once and require a reply.
    pub async fn request(&self, msg: &WireMessage) -> Result<Response> {
        self.exchange(msg).await?.ok_or_else(|| {
            CoordinatorError::protocol(format!(
                "coordinator closed the connection without answering {}",
                msg.request.as_deref().unwrap_or_default()
            ))
        })
    }

    /// Re-send `msg` until the coordinator acknowledges it.
    ///
    /// `wait` replies and connection failures are retried under the client
    /// poll policy; `nack` fails at once.
    pub async fn poll(&self, msg: &WireMessage) -> Result<Response> {
        let request = msg.request.as_deref().unwrap_or_default();
        let client = self.identity.client_name.as_str();

        with_backoff(&self.policy, |attempt| {
            async move {
                match self.request(msg).await {
                    Ok(reply) => match reply.response {
                        ResponseStatus::Ack => Attempt::Done(reply),
                        ResponseStatus::Wait => {
                            debug!(client, request, attempt, "coordinator asked to wait");
                            Attempt::Again(CoordinatorError::poll_exhausted(
                                request,
                                attempt + 1,
                            ))
                        }
                        ResponseStatus::Nack => {
                            Attempt::Abort(CoordinatorError::rejected(request, client))
                        }
                    },
                    Err(e) if e.is_retryable() => {
                        warn!(client, request, attempt, error = %e, "request failed, retrying");
                        Attempt::Again(e)
                    }
                    Err(e) => Attempt::Abort(e),
                }
            }
        })
        .await
    }

    /// Block until the whole group has registered; returns client -> role.
    pub async fn group_data(&self) -> Result<Map<String, Value>> {
        let reply = self.poll(&self.message(RequestKind::GroupData)).await?;
        match reply.message {
            Some(Value::Object(mut message)) => match message.remove("roles") {
                Some(Value::Object(roles)) => Ok(roles),
                _ => Err(CoordinatorError::protocol("group_data reply without roles")),
            },
            _ => Err(CoordinatorError::protocol("group_data reply without roles")),
        }
    }

    /// Count this client towards tearing the group down.
    pub async fn clear_group(&self) -> Result<()> {
        self.poll(&self.message(RequestKind::ClearGroup)).await?;
        Ok(())
    }

    /// Contribute a result bundle.
    ///
    /// The primary contributor gets every bundle back once the group has
    /// delivered; everyone else gets `None`.
    pub async fn aggregate(&self, bundle: Value, sub_id: &str) -> Result<Option<Value>> {
        let msg = self.message(RequestKind::Aggregate).with_bundle(bundle, sub_id);
        let reply = self.poll(&msg).await?;
        Ok(reply
            .message
            .and_then(|mut message| message.get_mut("bundle").map(Value::take)))
    }

    /// Rendezvous with the whole group on `message_id`.
    pub async fn lava_sync(&self, message_id: &str, message: Option<Value>) -> Result<Value> {
        let mut msg = self
            .message(RequestKind::LavaSync)
            .with_message_id(message_id);
        msg.message = message;
        let reply = self.poll(&msg).await?;
        Ok(reply.message.unwrap_or_default())
    }

    /// Wait for any broadcast on `message_id` to reach this client.
    pub async fn lava_wait(&self, message_id: &str) -> Result<Value> {
        let msg = self
            .message(RequestKind::LavaWait)
            .with_message_id(message_id);
        let reply = self.poll(&msg).await?;
        Ok(reply.message.unwrap_or_default())
    }

    /// Wait until the targeted clients have all broadcast `message_id`.
    pub async fn lava_wait_all(&self, message_id: &str, wait_role: Option<&str>) -> Result<Value> {
        let mut msg = self
            .message(RequestKind::LavaWaitAll)
            .with_message_id(message_id);
        msg.wait_role = wait_role.map(str::to_string);
        let reply = self.poll(&msg).await?;
        Ok(reply.message.unwrap_or_default())
    }

    /// Broadcast `message` under `message_id`.
    pub async fn lava_send(&self, message_id: &str, message: Value) -> Result<()> {
        let msg = self
            .message(RequestKind::LavaSend)
            .with_message_id(message_id)
            .with_message(message);
        self.poll(&msg).await?;
        Ok(())
    }

    /// Tell the coordinator this client is done. No reply is expected.
    pub async fn complete(&self) -> Result<()> {
        match self.exchange(&self.message(RequestKind::Complete)).await? {
            None => Ok(()),
            Some(reply) if reply.is_nack() => Err(CoordinatorError::rejected(
                RequestKind::Complete.as_str(),
                self.identity.client_name.as_str(),
            )),
            Some(_) => Ok(()),
        }
    }
}
