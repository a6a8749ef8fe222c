//! nasfan Protocol
//!
//! JSON bodies exchanged between the nasfan HTTP API and its browser client.
//! Every response shares one envelope (`ApiResponse`); request bodies live in
//! `client`.

use uuid::Uuid;

pub mod client;
pub mod server;
pub mod types;

pub use client::{ConnectRequest, PortField, SetFanSpeedRequest};
pub use server::ApiResponse;
pub use types::*;

/// Generate a new session identifier
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}
