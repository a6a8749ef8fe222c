//! SSH client adapter.
//!
//! `ShellTransport` opens authenticated sessions, `ShellSession` runs one
//! command at a time on them. The production implementation wraps a russh
//! client handle; tests drive the session manager with a scripted transport.
//! Every russh and I/O error is converted to `ShellError` here.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::ShellError;
use crate::host_key::{self, HostKeyPolicy};

/// Where to connect and as whom. The password is wiped from memory on drop.
#[derive(Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Zeroizing<String>,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, password: String) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: Zeroizing::new(password),
        }
    }
}

impl fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Captured result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
    pub exit_status: Option<u32>,
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    /// A command counts as successful only with exit status zero and an
    /// empty stderr.
    pub fn succeeded(&self) -> bool {
        self.exit_status == Some(0) && self.stderr.trim().is_empty()
    }

    /// One-line reason for a failed command
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.exit_status {
            Some(code) => format!("exit status {code}"),
            None => "command ended without an exit status".to_string(),
        }
    }
}

/// Opens SSH sessions
pub trait ShellTransport: Send + Sync + 'static {
    type Session: ShellSession;

    fn connect(
        &self,
        target: &SshTarget,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self::Session, ShellError>> + Send;
}

/// One authenticated SSH session
pub trait ShellSession: Send + 'static {
    fn run(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<ShellOutput, ShellError>> + Send;

    /// Release the transport. Calling it again is a no-op.
    fn close(&mut self) -> impl Future<Output = Result<(), ShellError>> + Send;

    /// Local check only, never touches the network.
    fn is_closed(&self) -> bool;
}

// ---------------------------------------------------------------------------
// russh implementation
// ---------------------------------------------------------------------------

/// Client-side russh handler; only consulted for the server key.
pub struct HostKeyCheck {
    host: String,
    policy: Arc<HostKeyPolicy>,
}

impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = host_key::fingerprint(server_public_key);
        let accepted = self.policy.accepts(&fingerprint);
        if accepted {
            debug!(
                component = "ssh",
                event = "ssh.host_key.accepted",
                host = %self.host,
                fingerprint = %fingerprint,
                policy = self.policy.describe(),
                "Server host key accepted"
            );
        } else {
            warn!(
                component = "ssh",
                event = "ssh.host_key.rejected",
                host = %self.host,
                fingerprint = %fingerprint,
                "Server host key is not pinned"
            );
        }
        Ok(accepted)
    }
}

/// Production transport backed by russh
pub struct RusshTransport {
    config: Arc<client::Config>,
    policy: Arc<HostKeyPolicy>,
}

impl RusshTransport {
    pub fn new(policy: HostKeyPolicy) -> Self {
        Self {
            config: Arc::new(client::Config::default()),
            policy: Arc::new(policy),
        }
    }
}

impl ShellTransport for RusshTransport {
    type Session = RusshSession;

    async fn connect(&self, target: &SshTarget, timeout: Duration) -> Result<RusshSession, ShellError> {
        let handler = HostKeyCheck {
            host: target.host.clone(),
            policy: self.policy.clone(),
        };

        let connecting = client::connect(
            self.config.clone(),
            (target.host.as_str(), target.port),
            handler,
        );
        let mut handle = match tokio::time::timeout(timeout, connecting).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => return Err(classify_connect_error(e, target, timeout)),
            Err(_) => {
                return Err(ShellError::Timeout {
                    operation: "connect",
                    after: timeout,
                })
            }
        };

        let auth = tokio::time::timeout(
            timeout,
            handle.authenticate_password(target.username.as_str(), target.password.as_str()),
        )
        .await;
        let authenticated = match auth {
            Ok(Ok(result)) => result.success(),
            Ok(Err(e)) => return Err(classify_connect_error(e, target, timeout)),
            Err(_) => {
                return Err(ShellError::Timeout {
                    operation: "authentication",
                    after: timeout,
                })
            }
        };

        if !authenticated {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(ShellError::Auth);
        }

        info!(
            component = "ssh",
            event = "ssh.session.opened",
            host = %target.host,
            port = target.port,
            username = %target.username,
            "SSH session authenticated"
        );

        Ok(RusshSession {
            handle: Some(handle),
        })
    }
}

fn classify_connect_error(error: russh::Error, target: &SshTarget, timeout: Duration) -> ShellError {
    match error {
        russh::Error::IO(io) if io.kind() == std::io::ErrorKind::TimedOut => ShellError::Timeout {
            operation: "connect",
            after: timeout,
        },
        russh::Error::IO(io) => ShellError::Network {
            host: target.host.clone(),
            port: target.port,
            reason: io.to_string(),
        },
        russh::Error::UnknownKey => ShellError::HostKeyRejected {
            host: target.host.clone(),
        },
        russh::Error::Disconnect => ShellError::Network {
            host: target.host.clone(),
            port: target.port,
            reason: "connection closed by remote host".to_string(),
        },
        other => ShellError::Unknown(other.to_string()),
    }
}

/// A live russh client session
pub struct RusshSession {
    handle: Option<Handle<HostKeyCheck>>,
}

impl ShellSession for RusshSession {
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<ShellOutput, ShellError> {
        let handle = match self.handle.as_ref() {
            Some(handle) if !handle.is_closed() => handle,
            _ => return Err(ShellError::NotConnected),
        };

        match tokio::time::timeout(timeout, exec(handle, command)).await {
            Ok(result) => result,
            Err(_) => Err(ShellError::Timeout {
                operation: "command",
                after: timeout,
            }),
        }
    }

    async fn close(&mut self) -> Result<(), ShellError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if handle.is_closed() {
            return Ok(());
        }
        handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| ShellError::Transport(e.to_string()))
    }

    fn is_closed(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_closed())
    }
}

async fn exec(handle: &Handle<HostKeyCheck>, command: &str) -> Result<ShellOutput, ShellError> {
    let mut channel = handle
        .channel_open_session()
        .await
        .map_err(|e| ShellError::Transport(e.to_string()))?;
    channel
        .exec(true, command)
        .await
        .map_err(|e| ShellError::Transport(e.to_string()))?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = None;
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
            // ext 1 is SSH_EXTENDED_DATA_STDERR
            ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
            ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
            _ => {}
        }
    }

    Ok(ShellOutput {
        exit_status,
        stdout: String::from_utf8_lossy(&stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_requires_zero_exit_and_empty_stderr() {
        let ok = ShellOutput {
            exit_status: Some(0),
            stdout: "128".into(),
            stderr: String::new(),
        };
        assert!(ok.succeeded());

        let noisy = ShellOutput {
            exit_status: Some(0),
            stdout: String::new(),
            stderr: "permission denied".into(),
        };
        assert!(!noisy.succeeded());
        assert_eq!(noisy.failure_reason(), "permission denied");

        let failed = ShellOutput {
            exit_status: Some(127),
            ..Default::default()
        };
        assert!(!failed.succeeded());
        assert_eq!(failed.failure_reason(), "exit status 127");

        assert!(!ShellOutput::default().succeeded());
    }

    #[test]
    fn target_debug_redacts_password() {
        let target = SshTarget::new("10.0.0.5", 22, "admin", "hunter2".to_string());
        let rendered = format!("{target:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("10.0.0.5"));
    }

    #[test]
    fn io_errors_classify_as_network_or_timeout() {
        let target = SshTarget::new("10.0.0.5", 22, "admin", "x".to_string());

        let refused = classify_connect_error(
            russh::Error::IO(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)),
            &target,
            Duration::from_secs(10),
        );
        assert!(matches!(refused, ShellError::Network { port: 22, .. }));

        let timed_out = classify_connect_error(
            russh::Error::IO(std::io::Error::from(std::io::ErrorKind::TimedOut)),
            &target,
            Duration::from_secs(10),
        );
        assert!(matches!(timed_out, ShellError::Timeout { .. }));

        let unknown_key = classify_connect_error(russh::Error::UnknownKey, &target, Duration::from_secs(10));
        assert!(matches!(unknown_key, ShellError::HostKeyRejected { .. }));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = RusshTransport::new(HostKeyPolicy::AcceptAny);
        let target = SshTarget::new("127.0.0.1", port, "admin", "x".to_string());
        let err = transport
            .connect(&target, Duration::from_secs(5))
            .await
            .err()
            .expect("connect should fail");
        assert_eq!(err.kind(), nasfan_protocol::ErrorKind::NetworkError);
    }
}
