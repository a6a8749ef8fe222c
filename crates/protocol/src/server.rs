//! Server → Client response envelope

use serde::{Deserialize, Serialize};

use crate::types::*;

/// Every endpoint answers with this envelope. Only the payload fields that
/// apply to the endpoint are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_info: Option<ConnectionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qm2_detected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<LogEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_options: Option<Vec<FanOption>>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn err(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error_kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_connection_info(mut self, info: ConnectionInfo) -> Self {
        self.connection_info = Some(info);
        self
    }

    pub fn with_qm2_detected(mut self, enc_sys_id: Option<String>) -> Self {
        self.qm2_detected = enc_sys_id;
        self
    }

    pub fn with_is_connected(mut self, connected: bool) -> Self {
        self.is_connected = Some(connected);
        self
    }

    pub fn with_logs(mut self, logs: Vec<LogEntry>) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn with_fan_options(mut self, options: Vec<FanOption>) -> Self {
        self.fan_options = Some(options);
        self
    }
}
