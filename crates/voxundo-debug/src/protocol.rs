//! Status protocol - JSON command/response definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Commands sent from a client to the status server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "params")]
pub enum StatusCommand {
    /// Ping (health check)
    Ping,
    /// Get the in-flight operation and pool sizes
    GetStatus,
    /// List every pool entry, oldest first
    GetPools,
    /// Abort the in-flight complex operation, if any
    AbortComplex,
}

/// Failure to decode one request line
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty request")]
    Empty,
    #[error("invalid command JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode one request line.
pub fn parse_command(line: &str) -> Result<StatusCommand, ProtocolError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Responses from the status server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum StatusResponse {
    #[serde(rename = "ok")]
    Ok { data: ResponseData },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Generation-counted handle as seen over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleInfo {
    pub index: u32,
    pub generation: u32,
}

/// One pool entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEntryInfo {
    /// "complex" or "simple"
    pub pool: String,
    pub stamp: u64,
    pub actor: HandleInfo,
    pub environment: HandleInfo,
    pub transaction: String,
    pub changed_voxels: usize,
    pub undo_commenced: bool,
}

/// Response data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    None,
    Pong {
        message: String,
    },
    Status {
        busy: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
        percent: f32,
        #[serde(skip_serializing_if = "Option::is_none")]
        actor: Option<HandleInfo>,
        #[serde(skip_serializing_if = "Option::is_none")]
        transaction: Option<String>,
        complex_entries: usize,
        simple_entries: usize,
        deferred: usize,
    },
    Pools {
        entries: Vec<PoolEntryInfo>,
    },
    Aborted {
        operation: String,
        transaction: String,
    },
}

impl StatusResponse {
    pub fn ok(data: ResponseData) -> Self {
        Self::Ok { data }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(ResponseData::Pong {
            message: "pong".into(),
        })
    }

    pub fn none() -> Self {
        Self::ok(ResponseData::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::to_string(&StatusCommand::GetStatus).unwrap();
        assert_eq!(json, r#"{"cmd":"GetStatus"}"#);
        assert_eq!(parse_command(" {\"cmd\":\"Ping\"}\n").unwrap(), StatusCommand::Ping);
    }

    #[test]
    fn test_parse_rejects_blank_and_garbage() {
        assert!(matches!(parse_command("   \n"), Err(ProtocolError::Empty)));
        assert!(matches!(parse_command("{\"cmd\":\"Explode\"}"), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_status_response_shape() {
        let response = StatusResponse::ok(ResponseData::Status {
            busy: false,
            operation: None,
            percent: 0.0,
            actor: None,
            transaction: None,
            complex_entries: 2,
            simple_entries: 0,
            deferred: 0,
        });
        let value: serde_json::Value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["data"]["complex_entries"], 2);
        assert!(value["data"].get("operation").is_none());
    }

    #[test]
    fn test_untagged_data_decodes_to_matching_variant() {
        let text = r#"{"status":"ok","data":{"operation":"undo","transaction":"tx-2"}}"#;
        let response: StatusResponse = serde_json::from_str(text).unwrap();
        assert_eq!(
            response,
            StatusResponse::ok(ResponseData::Aborted {
                operation: "undo".into(),
                transaction: "tx-2".into(),
            })
        );

        let error: StatusResponse = serde_json::from_str(r#"{"status":"error","message":"busy"}"#).unwrap();
        assert_eq!(error, StatusResponse::error("busy"));
    }
}
