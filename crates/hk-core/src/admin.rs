//! Admin service envelopes.
//!
//! Each request and response is one JSON document in one length-delimited
//! frame. `key` is chosen by the caller and echoed back so responses can be
//! matched to requests on a shared connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HkError, HkResult};

/// Command names understood by the admin service.
pub mod commands {
    pub const STATUS: &str = "status";
    pub const PLAYER_LIST: &str = "player-list";
    pub const SEND_MESSAGE: &str = "send-message";
    pub const KICK: &str = "kick";
    pub const MAINTENANCE: &str = "maintenance";

    pub const ALL: &[&str] = &[STATUS, PLAYER_LIST, SEND_MESSAGE, KICK, MAINTENANCE];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminRequest {
    pub key: String,
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminResponse {
    pub key: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AdminRequest {
    pub fn new(key: impl Into<String>, command: impl Into<String>, payload: Value) -> Self {
        Self {
            key: key.into(),
            command: command.into(),
            payload,
        }
    }

    pub fn to_bytes(&self) -> HkResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| HkError::codec(format!("encoding request: {e}")))
    }

    pub fn from_bytes(data: &[u8]) -> HkResult<Self> {
        serde_json::from_slice(data).map_err(|e| HkError::codec(format!("decoding request: {e}")))
    }

    /// Deserialize the payload into a command-specific type.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> HkResult<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| HkError::codec(format!("bad payload for {}: {e}", self.command)))
    }
}

impl AdminResponse {
    pub fn ok(key: impl Into<String>, result: Value) -> Self {
        Self {
            key: key.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn to_bytes(&self) -> HkResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| HkError::codec(format!("encoding response: {e}")))
    }

    pub fn from_bytes(data: &[u8]) -> HkResult<Self> {
        serde_json::from_slice(data).map_err(|e| HkError::codec(format!("decoding response: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub version: String,
    pub uptime_secs: u64,
    pub connected_peers: usize,
    pub maintenance: bool,
    pub pending_transfers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEntry {
    pub file_name: String,
    pub size: u64,
    /// Seconds since the Unix epoch
    pub modified: u64,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessage {
    /// Target identity, or every connected peer when absent
    #[serde(default)]
    pub identity: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kick {
    pub identity: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetMaintenance {
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_payload_is_typed_on_demand() {
        let req = AdminRequest::new(
            "k1",
            commands::KICK,
            json!({"identity": "76561198000000001", "reason": "afk"}),
        );
        let back = AdminRequest::from_bytes(&req.to_bytes().unwrap()).unwrap();
        let kick: Kick = back.payload_as().unwrap();
        assert_eq!(kick.identity, "76561198000000001");
        assert_eq!(kick.reason.as_deref(), Some("afk"));
    }

    #[test]
    fn wrong_payload_shape_is_an_error() {
        let req = AdminRequest::new("k", commands::MAINTENANCE, json!({"on": 1}));
        assert!(req.payload_as::<SetMaintenance>().is_err());
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let req = AdminRequest::from_bytes(br#"{"key":"a","command":"status"}"#).unwrap();
        assert!(req.payload.is_null());
    }

    #[test]
    fn error_response_omits_result() {
        let resp = AdminResponse::err("k", "unknown command");
        let text = String::from_utf8(resp.to_bytes().unwrap()).unwrap();
        assert!(!text.contains("result"));
        assert!(!AdminResponse::from_bytes(text.as_bytes()).unwrap().ok);
    }
}
