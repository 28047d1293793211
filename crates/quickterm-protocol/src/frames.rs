use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Request from the connecting side.
/// Wire: `{ "type": "req", "id": "abc", "method": "command.queue", "params": {...} }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReqFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl ReqFrame {
    /// New request with a fresh random id.
    pub fn new(method: impl Into<String>, params: impl Serialize) -> Self {
        Self {
            frame_type: "req".to_string(),
            id: Uuid::new_v4().to_string(),
            method: method.into(),
            params: serde_json::to_value(params).ok().filter(|v| !v.is_null()),
        }
    }

    /// Decode `params` into a typed payload. `None` when absent or mistyped.
    pub fn params_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.params
            .clone()
            .and_then(|p| serde_json::from_value(p).ok())
    }
}

/// Response to a [`ReqFrame`], matched by `id`.
/// Wire: `{ "type": "res", "id": "abc", "ok": true, "payload": {...} }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl ResFrame {
    pub fn ok(id: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            frame_type: "res".to_string(),
            id: id.into(),
            ok: true,
            payload: Some(serde_json::to_value(payload).unwrap_or(Value::Null)),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, code: &str, message: &str) -> Self {
        Self {
            frame_type: "res".to_string(),
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(ErrorShape {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.payload
            .clone()
            .and_then(|p| serde_json::from_value(p).ok())
    }
}

/// Unsolicited push event.
/// Wire: `{ "type": "event", "event": "executor.evicted", "payload": {...} }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            frame_type: "event".to_string(),
            event: event.into(),
            payload: Some(serde_json::to_value(payload).unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorShape {
    pub code: String,
    pub message: String,
}

/// Raw inbound frame: parse the `type` discriminator first, then extract body.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl InboundFrame {
    /// Try to interpret this frame as a request.
    pub fn as_req(&self) -> Option<ReqFrame> {
        self.as_kind("req")
    }

    /// Try to interpret this frame as a response.
    pub fn as_res(&self) -> Option<ResFrame> {
        self.as_kind("res")
    }

    /// Try to interpret this frame as an event.
    pub fn as_event(&self) -> Option<EventFrame> {
        self.as_kind("event")
    }

    fn as_kind<T: DeserializeOwned>(&self, kind: &str) -> Option<T> {
        if self.frame_type != kind {
            return None;
        }
        let mut map = self.rest.clone();
        map.insert("type".to_string(), Value::String(kind.to_string()));
        serde_json::from_value(Value::Object(map)).ok()
    }
}
