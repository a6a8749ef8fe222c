//! Session actor: owns a `SessionManager` and processes commands sequentially.
//!
//! Each session runs as an independent tokio task, so at most one remote
//! command is in flight per session while different sessions proceed in
//! parallel. Callers talk to it through `SessionActorHandle`; lock-free reads
//! go through `ArcSwap`.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::catalog::FanStatus;
use crate::error::SessionError;
use crate::session::{ConnectOutcome, SessionManager, SessionSnapshot, SpeedChange};
use crate::session_command::SessionCommand;
use crate::ssh::{ShellTransport, SshTarget};

const COMMAND_QUEUE: usize = 64;

/// Handle to a running session actor (cheap to Clone).
#[derive(Clone)]
pub struct SessionActorHandle {
    pub id: String,
    command_tx: mpsc::Sender<SessionCommand>,
    snapshot: Arc<ArcSwap<SessionSnapshot>>,
}

impl SessionActorHandle {
    pub fn spawn<T: ShellTransport>(manager: SessionManager<T>) -> SessionActorHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let snapshot = manager.snapshot_arc();
        let id = manager.id().to_string();

        tokio::spawn(actor_loop(manager, command_rx));

        SessionActorHandle {
            id,
            command_tx,
            snapshot,
        }
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.snapshot.load_full()
    }

    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    pub async fn connect(&self, target: SshTarget) -> Result<ConnectOutcome, SessionError> {
        self.request(|reply| SessionCommand::Connect { target, reply })
            .await?
    }

    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Disconnect { reply }).await
    }

    pub async fn get_status(&self) -> Result<FanStatus, SessionError> {
        self.request(|reply| SessionCommand::GetStatus { reply })
            .await?
    }

    pub async fn set_speed(&self, level: impl Into<String>) -> Result<SpeedChange, SessionError> {
        let level = level.into();
        self.request(|reply| SessionCommand::SetSpeed { level, reply })
            .await?
    }

    pub async fn clear_logs(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::ClearLogs { reply }).await
    }

    /// Close the connection and stop the actor. Commands queued behind the
    /// teardown fail with `SessionClosed`.
    pub async fn teardown(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::Teardown { reply }).await
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> SessionCommand,
    ) -> Result<R, SessionError> {
        let (tx, rx) = oneshot::channel();
        let command = build(tx);
        let name = command.name();
        if self.command_tx.send(command).await.is_err() {
            warn!(
                component = "session_actor",
                event = "session_actor.command.dropped",
                session_id = %self.id,
                command = name,
                "Actor channel closed, command dropped"
            );
            return Err(SessionError::SessionClosed);
        }
        rx.await.map_err(|_| SessionError::SessionClosed)
    }
}

async fn actor_loop<T: ShellTransport>(
    mut manager: SessionManager<T>,
    mut command_rx: mpsc::Receiver<SessionCommand>,
) {
    debug!(
        component = "session_actor",
        event = "session_actor.started",
        session_id = %manager.id(),
        "Session actor started"
    );

    // Between commands, notice a transport the NAS closed so the snapshot
    // stops reporting the session as connected.
    let mut liveness = tokio::time::interval(manager.liveness_interval());
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let command = tokio::select! {
            command = command_rx.recv() => command,
            _ = liveness.tick() => {
                manager.check_transport().await;
                continue;
            }
        };
        let Some(command) = command else {
            break;
        };

        match command {
            SessionCommand::Connect { target, reply } => {
                let _ = reply.send(manager.connect(target).await);
            }
            SessionCommand::Disconnect { reply } => {
                manager.disconnect().await;
                let _ = reply.send(());
            }
            SessionCommand::GetStatus { reply } => {
                let _ = reply.send(manager.get_status().await);
            }
            SessionCommand::SetSpeed { level, reply } => {
                let _ = reply.send(manager.set_speed(&level).await);
            }
            SessionCommand::ClearLogs { reply } => {
                manager.clear_logs();
                let _ = reply.send(());
            }
            SessionCommand::Teardown { reply } => {
                command_rx.close();
                manager.teardown().await;
                let _ = reply.send(());
                break;
            }
        }
    }

    // Also reached when every handle was dropped without a teardown.
    manager.teardown().await;

    debug!(
        component = "session_actor",
        event = "session_actor.stopped",
        session_id = %manager.id(),
        "Session actor stopped"
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::catalog::CommandCatalog;
    use crate::session::ManagerSettings;
    use crate::testing::{Reply, ScriptedTransport};
    use nasfan_protocol::ErrorKind;

    fn spawn(transport: &ScriptedTransport, id: &str) -> SessionActorHandle {
        spawn_with(transport, id, ManagerSettings::default())
    }

    fn spawn_with(
        transport: &ScriptedTransport,
        id: &str,
        settings: ManagerSettings,
    ) -> SessionActorHandle {
        SessionActorHandle::spawn(SessionManager::new(
            id,
            Arc::new(transport.clone()),
            Arc::new(CommandCatalog::builtin()),
            settings,
        ))
    }

    fn target() -> SshTarget {
        SshTarget::new("10.0.0.5", 22, "admin", "pw".to_string())
    }

    #[tokio::test]
    async fn actor_serializes_concurrent_requests() {
        let transport = ScriptedTransport::nas()
            .reply("qcontrol fan status", Reply::ok("3"))
            .with_delay(Duration::from_millis(10));
        let actor = spawn(&transport, "s1");
        actor.connect(target()).await.unwrap();

        let requests = (0..5).map(|_| actor.get_status());
        let results = futures::future::join_all(requests).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(transport.max_in_flight(), 1);

        // Each status run's attempts stay contiguous in the log.
        let logs = actor.snapshot().logs.clone();
        let runs: Vec<&str> = logs[2..].iter().map(|a| a.command.as_str()).collect();
        for pair in runs.chunks(2) {
            assert_eq!(
                pair,
                [
                    "cat /sys/devices/platform/pwm_fan/hwmon/hwmon0/pwm1",
                    "qcontrol fan status"
                ]
            );
        }
        assert_eq!(runs.len(), 10);
    }

    #[tokio::test]
    async fn separate_sessions_run_in_parallel() {
        let transport = ScriptedTransport::nas().with_delay(Duration::from_millis(100));
        let a = spawn(&transport, "a");
        let b = spawn(&transport, "b");

        let (ra, rb) = tokio::join!(a.connect(target()), b.connect(target()));
        assert!(ra.is_ok() && rb.is_ok());
        assert_eq!(transport.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn snapshot_updates_after_mutation() {
        let transport = ScriptedTransport::nas();
        let actor = spawn(&transport, "s1");
        assert!(!actor.snapshot().is_connected());

        actor.connect(target()).await.unwrap();
        let snap = actor.snapshot();
        assert!(snap.is_connected());
        assert_eq!(snap.connection.as_ref().unwrap().host, "10.0.0.5");

        actor.clear_logs().await.unwrap();
        assert!(actor.snapshot().logs.is_empty());

        actor.disconnect().await.unwrap();
        assert!(!actor.snapshot().is_connected());
    }

    #[tokio::test]
    async fn idle_actor_publishes_a_dropped_transport() {
        let transport = ScriptedTransport::nas();
        let settings = ManagerSettings {
            liveness_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let actor = spawn_with(&transport, "s1", settings);
        actor.connect(target()).await.unwrap();
        assert!(actor.snapshot().is_connected());

        transport.sever();
        for _ in 0..50 {
            if !actor.snapshot().is_connected() {
                assert_eq!(transport.closes(), 1);
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("snapshot still reports a connection after the transport closed");
    }

    #[tokio::test]
    async fn errors_are_returned_to_the_caller() {
        let transport = ScriptedTransport::nas();
        let actor = spawn(&transport, "s1");

        let err = actor.set_speed("max").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn teardown_closes_connection_and_stops_actor() {
        let transport = ScriptedTransport::nas();
        let actor = spawn(&transport, "s1");
        actor.connect(target()).await.unwrap();

        actor.teardown().await.unwrap();
        assert_eq!(transport.closes(), 1);
        assert!(!actor.snapshot().is_connected());

        let err = actor.connect(target()).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionClosed));
        assert_eq!(transport.connects(), 1);
    }

    #[tokio::test]
    async fn dropping_every_handle_releases_the_connection() {
        let transport = ScriptedTransport::nas();
        let actor = spawn(&transport, "s1");
        actor.connect(target()).await.unwrap();
        drop(actor);

        for _ in 0..50 {
            if transport.closes() == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connection was not closed after the last handle dropped");
    }
}
