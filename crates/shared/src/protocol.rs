use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{domain::CallLaunch, error::PushError};

pub const RECEIVE_NOTIFICATION_EVENT: &str = "notification.received";

/// Local notification parsed from a `custom_notification` payload. Any JSON
/// object is accepted as-is; the renderer picks the fields it knows and values
/// of any JSON type are read through [`NotificationDescriptor::text`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationDescriptor(pub Map<String, Value>);

impl NotificationDescriptor {
    pub fn parse(raw: &str) -> Result<Self, PushError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| PushError::MalformedPayload(err.to_string()))?;
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(PushError::MalformedPayload(format!(
                "expected object, found {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Field rendered as text: strings verbatim, other scalars in their JSON
    /// form. `null`, arrays and objects have no text form.
    pub fn text(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn title(&self) -> Option<String> {
        self.text("title")
    }

    pub fn body(&self) -> Option<String> {
        self.text("body")
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Badge values follow 32-bit signed integer parsing: optional sign, no
/// surrounding whitespace.
pub fn parse_badge(raw: &str) -> Result<i32, PushError> {
    raw.parse::<i32>()
        .map_err(|_| PushError::MalformedBadge(raw.to_string()))
}

/// Record of a side effect handed to the host, in the order it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutboundAction {
    DisplayLocalNotification {
        descriptor: NotificationDescriptor,
    },
    SetBadgeCount {
        count: i32,
    },
    EmitEvent {
        name: String,
        payload: Value,
    },
    CancelRinging {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_name: Option<String>,
    },
    LaunchCallUi(CallLaunch),
}
