//! JSON protocol spoken over the WebSocket.
//!
//! | Direction | Shape |
//! |---|---|
//! | inbound | `{"cmd": "get_state" \| "call", "args": [...]}` |
//! | state | `{"state": {...}}` |
//! | text event | `{"event": name, "data": {...}}` |
//! | framed event | JSON header, `\n`, raw binary payload |
//! | acknowledgment | `{"ok": true, "cmd": name}` |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::BridgeError;

pub const CMD_GET_STATE: &str = "get_state";
pub const CMD_CALL: &str = "call";

/// Event name of the broadcast carrying a call outcome.
pub const EVENT_CALL_RESULT: &str = "call_result";
/// Event name of the framed camera broadcast.
pub const EVENT_CAMERA_FRAME: &str = "camera_frame";

/// Key that marks a mapping as a typed value.
pub const TYPE_TAG_KEY: &str = "__type";
/// Older clients tag typed values with this key.
pub const LEGACY_TYPE_TAG_KEY: &str = "__cozmo_type";

/// Named-argument keys carrying the out-of-band call id, in lookup order.
pub const CALL_ID_KEYS: [&str; 2] = ["__call_id", "call_id"];

/// Separator between the JSON header and the payload of a framed event.
pub const FRAME_DELIMITER: u8 = b'\n';

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A raw inbound message before command interpretation.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub args: Value,
}

/// An interpreted inbound command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetState,
    Call(Value),
    Unknown(String),
}

impl InboundMessage {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Protocol`] when the text is not a JSON object.
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        let malformed = |e: serde_json::Error| BridgeError::Protocol(format!("malformed message: {e}"));
        let value: Value = serde_json::from_str(raw).map_err(malformed)?;
        if !value.is_object() {
            return Err(BridgeError::Protocol(format!("message is not an object: {value}")));
        }
        serde_json::from_value(value).map_err(malformed)
    }

    /// Classify the message. The `call` arguments are left raw so a
    /// malformed argument list surfaces as a call error rather than a
    /// protocol error.
    pub fn command(self) -> Command {
        match self.cmd.as_deref() {
            Some(CMD_GET_STATE) => Command::GetState,
            Some(CMD_CALL) => Command::Call(self.args),
            Some(other) => Command::Unknown(other.to_string()),
            None => Command::Unknown(String::new()),
        }
    }
}

/// One remote call: `args = [path, positional, named, await_completion]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallRequest {
    pub path: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub await_completion: bool,
    pub call_id: Option<String>,
}

impl CallRequest {
    /// Build a request from the `args` array of a `call` message.
    ///
    /// Missing trailing elements take their defaults (empty path, no
    /// arguments, no wait). The call id is removed from the named arguments.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Protocol`] when an element has the wrong JSON
    /// type.
    pub fn from_args(args: &Value) -> Result<Self, BridgeError> {
        let items: &[Value] = match args {
            Value::Array(items) => items.as_slice(),
            Value::Null => &[],
            other => {
                return Err(BridgeError::Protocol(format!(
                    "call args must be an array, got {other}"
                )));
            }
        };

        let path = match items.first() {
            Some(Value::String(s)) => s.clone(),
            None | Some(Value::Null) => String::new(),
            Some(other) => {
                return Err(BridgeError::Protocol(format!("call path must be a string, got {other}")));
            }
        };

        let positional = match items.get(1) {
            Some(Value::Array(a)) => a.clone(),
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                return Err(BridgeError::Protocol(format!(
                    "positional arguments must be an array, got {other}"
                )));
            }
        };

        let mut kwargs = match items.get(2) {
            Some(Value::Object(m)) => m.clone(),
            None | Some(Value::Null) => Map::new(),
            Some(other) => {
                return Err(BridgeError::Protocol(format!(
                    "named arguments must be an object, got {other}"
                )));
            }
        };

        let await_completion = items.get(3).map(is_truthy).unwrap_or(false);

        let mut call_id = None;
        for key in CALL_ID_KEYS {
            if let Some(v) = kwargs.remove(key)
                && call_id.is_none()
                && is_truthy(&v)
            {
                call_id = Some(match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                });
            }
        }

        Ok(Self {
            path,
            args: positional,
            kwargs,
            await_completion,
            call_id,
        })
    }
}

/// JSON truthiness as loosely-typed clients expect it.
pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Successful outcome of a call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallResult {
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

/// Payload of a `call_result` event: either the result or only an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallOutcome {
    Failed { error: String },
    Completed(CallResult),
}

impl From<Result<CallResult, BridgeError>> for CallOutcome {
    fn from(r: Result<CallResult, BridgeError>) -> Self {
        match r {
            Ok(result) => CallOutcome::Completed(result),
            Err(e) => CallOutcome::Failed { error: e.to_string() },
        }
    }
}

/// Point-in-time projection of the device state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub battery_voltage: f32,
    pub battery_percent: String,
    pub is_picked_up: bool,
    pub is_charging: bool,
    pub is_cliff_detected: bool,
    pub is_moving: bool,
    pub is_carrying_block: bool,
    pub cube_1_connected: bool,
    pub cube_1_visible: bool,
    pub cube_2_connected: bool,
    pub cube_2_visible: bool,
    pub cube_3_connected: bool,
    pub cube_3_visible: bool,
    pub cube_tapped_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEnvelope {
    pub state: StateSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
    pub cmd: String,
}

impl Ack {
    pub fn for_cmd(cmd: impl Into<String>) -> Self {
        Self { ok: true, cmd: cmd.into() }
    }
}

/// Metadata of a `camera_frame` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub ts: f64,
    pub w: u32,
    pub h: u32,
}

/// Build a framed event: `{"event", "data"}` header, newline, payload.
///
/// # Errors
///
/// Returns [`BridgeError::Serialization`] if `data` cannot be serialized.
pub fn encode_framed<T: Serialize>(event: &str, data: &T, payload: &[u8]) -> Result<Vec<u8>, BridgeError> {
    let header = serde_json::to_vec(&serde_json::json!({ "event": event, "data": data }))?;
    let mut frame = Vec::with_capacity(header.len() + 1 + payload.len());
    frame.extend_from_slice(&header);
    frame.push(FRAME_DELIMITER);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Split a framed event into its parsed header and raw payload.
///
/// The header never contains a raw newline (JSON escapes it), so the first
/// delimiter byte always ends the header.
pub fn decode_framed(frame: &[u8]) -> Option<(Value, &[u8])> {
    let split = frame.iter().position(|b| *b == FRAME_DELIMITER)?;
    let header = serde_json::from_slice(&frame[..split]).ok()?;
    Some((header, &frame[split + 1..]))
}
