//! Request and reply types carried inside coordinator frames.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{CoordinatorError, Result};

/// Suffix marking the primary contributor's sub-id in `aggregate` calls.
pub const PRIMARY_SUB_ID_SUFFIX: &str = ".0";

/// The request kinds understood by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    GroupData,
    ClearGroup,
    Aggregate,
    LavaSync,
    LavaWait,
    LavaWaitAll,
    LavaSend,
    Complete,
}

impl RequestKind {
    pub const ALL: [RequestKind; 8] = [
        Self::GroupData,
        Self::ClearGroup,
        Self::Aggregate,
        Self::LavaSync,
        Self::LavaWait,
        Self::LavaWaitAll,
        Self::LavaSend,
        Self::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GroupData => "group_data",
            Self::ClearGroup => "clear_group",
            Self::Aggregate => "aggregate",
            Self::LavaSync => "lava_sync",
            Self::LavaWait => "lava_wait",
            Self::LavaWaitAll => "lava_wait_all",
            Self::LavaSend => "lava_send",
            Self::Complete => "complete",
        }
    }

    /// Kinds that address a `messageID`.
    pub fn needs_message_id(&self) -> bool {
        matches!(
            self,
            Self::LavaSync | Self::LavaWait | Self::LavaWaitAll | Self::LavaSend
        )
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoordinatorError::protocol(format!("unknown request kind '{s}'")))
    }
}

/// Keeps an explicit JSON `null` distinguishable from an absent field.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// One decoded request.
///
/// `request` is kept as text so that an unrecognised kind can still be
/// answered with a `nack` instead of being treated as a framing error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(rename = "messageID", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(rename = "waitrole", default, skip_serializing_if = "Option::is_none")]
    pub wait_role: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub bundle: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_id: Option<String>,
}

impl WireMessage {
    /// Start a request for `client_name` in `group_name`.
    pub fn new(
        kind: RequestKind,
        client_name: impl Into<String>,
        group_name: impl Into<String>,
    ) -> Self {
        Self {
            request: Some(kind.as_str().to_string()),
            client_name: Some(client_name.into()),
            group_name: Some(group_name.into()),
            ..Default::default()
        }
    }

    /// Interpret a decoded frame as a request.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| CoordinatorError::protocol(format!("malformed request: {e}")))
    }

    pub fn kind(&self) -> Result<RequestKind> {
        self.request
            .as_deref()
            .ok_or_else(|| CoordinatorError::protocol("missing request kind"))?
            .parse()
    }

    #[must_use]
    pub fn with_group_size(mut self, size: u64) -> Self {
        self.group_size = Some(size);
        self
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

    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: Value) -> Self {
        self.message = Some(message);
        self
    }

    #[must_use]
    pub fn with_wait_role(mut self, wait_role: impl Into<String>) -> Self {
        self.wait_role = Some(wait_role.into());
        self
    }

    #[must_use]
    pub fn with_bundle(mut self, bundle: Value, sub_id: impl Into<String>) -> Self {
        self.bundle = Some(bundle);
        self.sub_id = Some(sub_id.into());
        self
    }
}

/// Reply status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ack,
    Wait,
    Nack,
}

/// One reply frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub response: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
}

impl Response {
    pub fn ack() -> Self {
        Self {
            response: ResponseStatus::Ack,
            message: None,
        }
    }

    pub fn ack_with(message: Value) -> Self {
        Self {
            response: ResponseStatus::Ack,
            message: Some(message),
        }
    }

    pub fn wait() -> Self {
        Self {
            response: ResponseStatus::Wait,
            message: None,
        }
    }

    pub fn nack() -> Self {
        Self {
            response: ResponseStatus::Nack,
            message: None,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.response == ResponseStatus::Ack
    }

    pub fn is_wait(&self) -> bool {
        self.response == ResponseStatus::Wait
    }

    pub fn is_nack(&self) -> bool {
        self.response == ResponseStatus::Nack
    }
}
