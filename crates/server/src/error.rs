//! Error taxonomy for the SSH adapter and the session manager.

use std::time::Duration;

use nasfan_protocol::ErrorKind;
use thiserror::Error;

/// Failures raised at the SSH adapter boundary. Raw `russh` and I/O errors
/// are converted into one of these before they leave `ssh.rs`.
#[derive(Debug, Clone, Error)]
pub enum ShellError {
    #[error("Authentication failed. Please check username and password.")]
    Auth,

    #[error("Host key for {host} is not in the pinned fingerprint list")]
    HostKeyRejected { host: String },

    #[error("Could not reach {host}:{port}: {reason}")]
    Network {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Not connected to NAS")]
    NotConnected,

    #[error("SSH transport error: {0}")]
    Transport(String),

    #[error("SSH connection error: {0}")]
    Unknown(String),
}

impl ShellError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShellError::Auth | ShellError::HostKeyRejected { .. } => ErrorKind::AuthError,
            ShellError::Network { .. } => ErrorKind::NetworkError,
            ShellError::Timeout { .. } => ErrorKind::TimeoutError,
            ShellError::NotConnected => ErrorKind::NotConnected,
            ShellError::Transport(_) => ErrorKind::TransportError,
            ShellError::Unknown(_) => ErrorKind::UnknownError,
        }
    }

    /// Whether the error leaves the underlying connection unusable.
    /// A command timeout only loses that one channel.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ShellError::Timeout { .. })
    }
}

/// Failures of session manager operations, as surfaced to the HTTP layer.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error(transparent)]
    Shell(#[from] ShellError),

    #[error("Not connected to NAS")]
    NotConnected,

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("All {attempts} candidate command(s) failed; last `{command}`: {error}")]
    AllCandidatesFailed {
        attempts: usize,
        command: String,
        error: String,
    },

    #[error("Connection test failed: {0}")]
    ConnectionTest(String),

    #[error("Session is shutting down")]
    SessionClosed,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Shell(e) => e.kind(),
            SessionError::NotConnected => ErrorKind::NotConnected,
            SessionError::Catalog(_) => ErrorKind::UnknownLevel,
            SessionError::AllCandidatesFailed { .. } => ErrorKind::AllCandidatesFailed,
            SessionError::ConnectionTest(_) | SessionError::SessionClosed => {
                ErrorKind::UnknownError
            }
        }
    }
}

/// Catalog lookups
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Invalid fan speed value: {0}")]
    UnknownLevel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_timeouts_are_not_fatal() {
        let timeout = ShellError::Timeout {
            operation: "command",
            after: Duration::from_secs(30),
        };
        assert!(!timeout.is_fatal());
        assert!(ShellError::Transport("reset".into()).is_fatal());
        assert!(ShellError::NotConnected.is_fatal());
    }

    #[test]
    fn kinds_follow_the_wrapped_shell_error() {
        let err = SessionError::from(ShellError::Network {
            host: "10.0.0.5".into(),
            port: 22,
            reason: "connection refused".into(),
        });
        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert_eq!(
            SessionError::from(CatalogError::UnknownLevel("turbo".into())).kind(),
            ErrorKind::UnknownLevel
        );
    }

    #[test]
    fn timeout_message_is_one_line() {
        let err = ShellError::Timeout {
            operation: "connect",
            after: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "connect timed out after 10s");
    }
}
