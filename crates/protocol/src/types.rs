//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// Failure classification reported to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credentials rejected by the NAS
    AuthError,
    /// Host unreachable, refused, or unresolvable
    NetworkError,
    /// No answer within the configured bound
    TimeoutError,
    /// Operation needs a live connection and there is none
    NotConnected,
    /// Requested fan level is not in the catalog
    UnknownLevel,
    /// Every candidate command failed
    AllCandidatesFailed,
    /// I/O failure on an established connection
    TransportError,
    /// Request body failed validation
    InvalidInput,
    UnknownError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthError => "auth_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::TimeoutError => "timeout_error",
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::UnknownLevel => "unknown_level",
            ErrorKind::AllCandidatesFailed => "all_candidates_failed",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::UnknownError => "unknown_error",
        }
    }
}

/// Metadata of the live SSH connection. Never carries the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub username: String,
    pub port: u16,
    /// Local time, `%Y-%m-%d %H:%M:%S`
    pub connected_at: String,
    /// QM2 expansion card enclosure id, when one was detected
    pub qm2_enc_sys_id: Option<String>,
}

/// One executed command as shown in the command log panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Local time, `%H:%M:%S`
    pub timestamp: String,
    pub command: String,
    pub response: String,
    pub success: bool,
    pub error_message: Option<String>,
}

/// A selectable fan level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOption {
    pub value: String,
    pub label: String,
}
