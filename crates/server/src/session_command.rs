//! Commands sent to a session actor from the HTTP handlers.

use tokio::sync::oneshot;

use crate::catalog::FanStatus;
use crate::error::SessionError;
use crate::session::{ConnectOutcome, SpeedChange};
use crate::ssh::SshTarget;

/// A command that can be sent to a session actor. Each carries a oneshot
/// for its reply; reads that need no I/O go through the snapshot instead.
pub enum SessionCommand {
    Connect {
        target: SshTarget,
        reply: oneshot::Sender<Result<ConnectOutcome, SessionError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    GetStatus {
        reply: oneshot::Sender<Result<FanStatus, SessionError>>,
    },
    SetSpeed {
        level: String,
        reply: oneshot::Sender<Result<SpeedChange, SessionError>>,
    },
    ClearLogs {
        reply: oneshot::Sender<()>,
    },
    /// Close the connection, drop the log and stop the actor
    Teardown {
        reply: oneshot::Sender<()>,
    },
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::Connect { .. } => "connect",
            SessionCommand::Disconnect { .. } => "disconnect",
            SessionCommand::GetStatus { .. } => "get_status",
            SessionCommand::SetSpeed { .. } => "set_speed",
            SessionCommand::ClearLogs { .. } => "clear_logs",
            SessionCommand::Teardown { .. } => "teardown",
        }
    }
}
