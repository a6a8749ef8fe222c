//! Client → Server request bodies

use std::fmt;

use serde::{Deserialize, Serialize};

/// Port as sent by the browser form: either a JSON number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortField {
    Number(i64),
    Text(String),
}

impl PortField {
    /// Parse into a raw integer; range checking is the caller's job.
    pub fn parse(&self) -> Option<i64> {
        match self {
            PortField::Number(n) => Some(*n),
            PortField::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Body of `POST /connect`
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortField>,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

/// Body of `POST /set_fan_speed`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetFanSpeedRequest {
    #[serde(default)]
    pub speed: Option<String>,
}
