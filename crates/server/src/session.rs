//! Session connection manager
//!
//! One `SessionManager` per browser session. It owns at most one live SSH
//! connection and the session's command log. All methods take `&mut self`;
//! the actor in `session_actor` is what serializes concurrent callers.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Local};
use nasfan_protocol::{ConnectionInfo, LogEntry};
use tracing::{debug, info, warn};

use crate::audit::{AuditRing, CommandAttempt, DEFAULT_CAPACITY};
use crate::catalog::{
    parse_enc_sys_id, AttemptOutcome, CommandCatalog, FanLevel, FanStatus, ReadingScale,
    CONNECTION_TEST_COMMAND, ENCLOSURE_PROBE_COMMAND,
};
use crate::error::{SessionError, ShellError};
use crate::ssh::{ShellSession, ShellTransport, SshTarget};

/// Timeouts and limits applied to every manager
#[derive(Debug, Clone, Copy)]
pub struct ManagerSettings {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub log_capacity: usize,
    /// How often an idle session checks whether its transport went away
    pub liveness_interval: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            log_capacity: DEFAULT_CAPACITY,
            liveness_interval: Duration::from_secs(1),
        }
    }
}

/// Live connection. The target owns the credential, which is zeroed when the
/// connection is dropped.
struct Connection<S> {
    session: S,
    target: SshTarget,
    established_at: DateTime<Local>,
    enc_sys_id: Option<String>,
}

impl<S> Connection<S> {
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            host: self.target.host.clone(),
            username: self.target.username.clone(),
            port: self.target.port,
            connected_at: self.established_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            qm2_enc_sys_id: self.enc_sys_id.clone(),
        }
    }
}

/// Read-only view published after every mutation
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub connection: Option<ConnectionInfo>,
    pub logs: Vec<CommandAttempt>,
}

impl SessionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.logs.iter().map(CommandAttempt::to_log_entry).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    pub info: ConnectionInfo,
    pub qm2_detected: Option<String>,
}

/// A speed change some command path accepted
#[derive(Debug, Clone)]
pub struct SpeedChange {
    pub level: FanLevel,
    pub command: String,
    pub enc_sys_id: Option<String>,
}

impl SpeedChange {
    pub fn message(&self) -> String {
        match &self.enc_sys_id {
            Some(id) => format!("Fan speed set to {} (QM2: {id})", self.level.label()),
            None => format!("Fan speed set to {}", self.level.label()),
        }
    }
}

pub struct SessionManager<T: ShellTransport> {
    id: String,
    transport: Arc<T>,
    catalog: Arc<CommandCatalog>,
    settings: ManagerSettings,
    connection: Option<Connection<T::Session>>,
    log: AuditRing,
    snapshot: Arc<ArcSwap<SessionSnapshot>>,
}

impl<T: ShellTransport> SessionManager<T> {
    pub fn new(
        id: impl Into<String>,
        transport: Arc<T>,
        catalog: Arc<CommandCatalog>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            id: id.into(),
            transport,
            catalog,
            settings,
            connection: None,
            log: AuditRing::new(settings.log_capacity),
            snapshot: Arc::new(ArcSwap::from_pointee(SessionSnapshot::default())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot_arc(&self) -> Arc<ArcSwap<SessionSnapshot>> {
        self.snapshot.clone()
    }

    pub fn liveness_interval(&self) -> Duration {
        self.settings.liveness_interval
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.connection.as_ref().map(Connection::info)
    }

    pub fn get_logs(&self) -> Vec<CommandAttempt> {
        self.log.snapshot()
    }

    pub fn clear_logs(&mut self) {
        self.log.clear();
        self.publish();
    }

    /// Open a connection, replacing any live one. On error no connection is
    /// held.
    pub async fn connect(&mut self, target: SshTarget) -> Result<ConnectOutcome, SessionError> {
        self.disconnect().await;

        info!(
            component = "session",
            event = "session.connect.started",
            session_id = %self.id,
            host = %target.host,
            port = target.port,
            username = %target.username,
            "Connecting to NAS"
        );

        let session = match self
            .transport
            .connect(&target, self.settings.connect_timeout)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    component = "session",
                    event = "session.connect.failed",
                    session_id = %self.id,
                    host = %target.host,
                    error_kind = e.kind().as_str(),
                    error = %e,
                    "Connection failed"
                );
                return Err(e.into());
            }
        };

        self.connection = Some(Connection {
            session,
            target,
            established_at: Local::now(),
            enc_sys_id: None,
        });

        match self.execute_logged(CONNECTION_TEST_COMMAND).await {
            AttemptOutcome::Accepted { .. } => {}
            AttemptOutcome::Rejected { cause: Some(e), .. } => {
                self.drop_connection().await;
                self.publish();
                return Err(e.into());
            }
            AttemptOutcome::Rejected { error, .. } => {
                self.drop_connection().await;
                self.publish();
                return Err(SessionError::ConnectionTest(error));
            }
            AttemptOutcome::Fatal(e) => return Err(SessionError::ConnectionTest(e.to_string())),
        }

        let enc_sys_id = match self.execute_logged(ENCLOSURE_PROBE_COMMAND).await {
            AttemptOutcome::Accepted { stdout } => parse_enc_sys_id(&stdout),
            AttemptOutcome::Rejected { .. } => None,
            // The connection is already dropped; report the transport failure itself.
            AttemptOutcome::Fatal(e) => return Err(e.into()),
        };

        let Some(connection) = self.connection.as_mut() else {
            return Err(SessionError::NotConnected);
        };
        connection.enc_sys_id = enc_sys_id.clone();
        let info = connection.info();
        self.publish();

        info!(
            component = "session",
            event = "session.connect.succeeded",
            session_id = %self.id,
            host = %info.host,
            qm2_enc_sys_id = ?enc_sys_id,
            "Connected to NAS"
        );

        Ok(ConnectOutcome {
            info,
            qm2_detected: enc_sys_id,
        })
    }

    /// Close the live connection, if any. Close errors are only logged.
    pub async fn disconnect(&mut self) {
        if self.drop_connection().await {
            info!(
                component = "session",
                event = "session.disconnected",
                session_id = %self.id,
                "Disconnected from NAS"
            );
        }
        self.publish();
    }

    pub async fn get_status(&mut self) -> Result<FanStatus, SessionError> {
        self.ensure_connected().await?;
        let (commands, scales): (Vec<String>, Vec<ReadingScale>) = self
            .catalog
            .status_candidates(self.enc_sys_id())
            .into_iter()
            .unzip();
        let (accepted, stdout) = self.run_candidates(&commands).await?;
        Ok(FanStatus::parse(
            commands[accepted].as_str(),
            scales[accepted],
            &stdout,
        ))
    }

    pub async fn set_speed(&mut self, level: &str) -> Result<SpeedChange, SessionError> {
        self.ensure_connected().await?;
        let (level, candidates) = self.catalog.speed_candidates(level, self.enc_sys_id())?;
        let (accepted, _) = self.run_candidates(&candidates).await?;
        let command = candidates[accepted].clone();

        info!(
            component = "session",
            event = "session.fan_speed.set",
            session_id = %self.id,
            level = level.as_str(),
            command = %command,
            "Fan speed changed"
        );

        Ok(SpeedChange {
            level,
            command,
            enc_sys_id: self.enc_sys_id().map(str::to_string),
        })
    }

    /// Close the connection and forget the log. Used on eviction.
    pub async fn teardown(&mut self) {
        self.drop_connection().await;
        self.log.clear();
        self.publish();
    }

    fn enc_sys_id(&self) -> Option<&str> {
        self.connection.as_ref().and_then(|c| c.enc_sys_id.as_deref())
    }

    /// Drop the connection if its transport closed underneath it, and
    /// publish so readers of the snapshot see the session as disconnected.
    /// Local check only.
    pub async fn check_transport(&mut self) {
        let lost = self
            .connection
            .as_ref()
            .is_some_and(|connection| connection.session.is_closed());
        if !lost {
            return;
        }

        warn!(
            component = "session",
            event = "session.transport.lost",
            session_id = %self.id,
            "SSH transport closed underneath the session"
        );
        self.drop_connection().await;
        self.publish();
    }

    /// Fail with `NotConnected` unless a connection is held and its transport
    /// is still open.
    async fn ensure_connected(&mut self) -> Result<(), SessionError> {
        self.check_transport().await;
        if self.connection.is_some() {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    /// Try candidates in order until one is accepted. Returns the index of
    /// the accepted candidate and its stdout.
    async fn run_candidates(
        &mut self,
        candidates: &[String],
    ) -> Result<(usize, String), SessionError> {
        let attempts = candidates.len();
        let mut last: Option<(String, String)> = None;

        for (index, command) in candidates.iter().enumerate() {
            match self.execute_logged(command).await {
                AttemptOutcome::Accepted { stdout } => return Ok((index, stdout)),
                AttemptOutcome::Rejected { error, .. } => last = Some((command.clone(), error)),
                AttemptOutcome::Fatal(e) => return Err(e.into()),
            }
        }

        let (command, error) = last.unwrap_or_else(|| {
            (String::new(), "no candidate commands available".to_string())
        });
        Err(SessionError::AllCandidatesFailed {
            attempts,
            command,
            error,
        })
    }

    /// Run one command, append exactly one log entry for it and publish.
    /// A fatal transport error drops the connection.
    async fn execute_logged(&mut self, command: &str) -> AttemptOutcome {
        let timeout = self.settings.command_timeout;
        let result = match self.connection.as_mut() {
            Some(connection) => connection.session.run(command, timeout).await,
            None => Err(ShellError::NotConnected),
        };
        let outcome = AttemptOutcome::from_result(result);

        let attempt = match &outcome {
            AttemptOutcome::Accepted { stdout } => CommandAttempt::succeeded(command, stdout.as_str()),
            AttemptOutcome::Rejected { response, error, .. } => {
                CommandAttempt::failed(command, response.as_str(), error.as_str())
            }
            AttemptOutcome::Fatal(e) => CommandAttempt::failed(command, "", e.to_string()),
        };
        debug!(
            component = "session",
            event = "session.command.attempt",
            session_id = %self.id,
            command = %command,
            success = attempt.success,
            error = attempt.error_message.as_deref().unwrap_or(""),
            "Command attempted"
        );
        self.log.append(attempt);

        if let AttemptOutcome::Fatal(e) = &outcome {
            warn!(
                component = "session",
                event = "session.transport.failed",
                session_id = %self.id,
                command = %command,
                error = %e,
                "Transport failure, dropping connection"
            );
            self.drop_connection().await;
        }

        self.publish();
        outcome
    }

    /// Returns whether a connection was held.
    async fn drop_connection(&mut self) -> bool {
        let Some(mut connection) = self.connection.take() else {
            return false;
        };
        if let Err(e) = connection.session.close().await {
            warn!(
                component = "session",
                event = "session.close.failed",
                session_id = %self.id,
                host = %connection.target.host,
                error = %e,
                "Error while closing SSH session"
            );
        }
        true
    }

    fn publish(&self) {
        self.snapshot.store(Arc::new(SessionSnapshot {
            connection: self.connection_info(),
            logs: self.log.snapshot(),
        }));
    }
}
