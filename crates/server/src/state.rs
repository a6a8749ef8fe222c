//! Application state: the per-session registry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::catalog::CommandCatalog;
use crate::session::{ManagerSettings, SessionManager};
use crate::session_actor::SessionActorHandle;
use crate::ssh::ShellTransport;

struct SessionEntry {
    handle: SessionActorHandle,
    last_seen: Instant,
}

/// Maps session ids to running session actors. Creation, lookup and eviction
/// are safe under concurrency; one id never gets two actors.
pub struct SessionRegistry<T: ShellTransport> {
    sessions: DashMap<String, SessionEntry>,
    transport: Arc<T>,
    catalog: Arc<CommandCatalog>,
    settings: ManagerSettings,
}

impl<T: ShellTransport> SessionRegistry<T> {
    pub fn new(transport: T, catalog: CommandCatalog, settings: ManagerSettings) -> Self {
        Self {
            sessions: DashMap::new(),
            transport: Arc::new(transport),
            catalog: Arc::new(catalog),
            settings,
        }
    }

    pub fn catalog(&self) -> &CommandCatalog {
        &self.catalog
    }

    /// Return the actor for `id`, spawning one if absent, and mark the
    /// session as used.
    pub fn get_or_create(&self, id: &str) -> SessionActorHandle {
        let mut entry = self.sessions.entry(id.to_string()).or_insert_with(|| {
            info!(
                component = "registry",
                event = "registry.session.created",
                session_id = %id,
                "Session created"
            );
            SessionEntry {
                handle: self.spawn_actor(id),
                last_seen: Instant::now(),
            }
        });

        // An actor that stopped on its own is replaced in place.
        if entry.handle.is_closed() {
            entry.handle = self.spawn_actor(id);
        }
        entry.last_seen = Instant::now();
        entry.handle.clone()
    }

    /// Lookup without creating or touching the session
    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<SessionActorHandle> {
        self.sessions.get(id).map(|entry| entry.handle.clone())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove the session and tear its actor down. Returns whether it existed.
    pub async fn evict(&self, id: &str) -> bool {
        // The map guard is released before awaiting the teardown.
        let Some((_, entry)) = self.sessions.remove(id) else {
            return false;
        };
        teardown(&entry.handle).await;
        info!(
            component = "registry",
            event = "registry.session.evicted",
            session_id = %id,
            "Session evicted"
        );
        true
    }

    /// Evict sessions not used within `ttl` of `now`. Returns how many.
    pub async fn evict_idle_at(&self, now: Instant, ttl: Duration) -> usize {
        let idle: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.last_seen) > ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for id in idle {
            // Re-check: the session may have been used since the scan.
            let removed = self
                .sessions
                .remove_if(&id, |_, entry| now.saturating_duration_since(entry.last_seen) > ttl);
            if let Some((_, entry)) = removed {
                teardown(&entry.handle).await;
                evicted += 1;
            }
        }

        if evicted > 0 {
            info!(
                component = "registry",
                event = "registry.sessions.reaped",
                evicted,
                remaining = self.sessions.len(),
                "Idle sessions evicted"
            );
        }
        evicted
    }

    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        self.evict_idle_at(Instant::now(), ttl).await
    }

    /// Tear down every session (shutdown path).
    pub async fn evict_all(&self) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut evicted = 0;
        for id in ids {
            if self.evict(&id).await {
                evicted += 1;
            }
        }
        evicted
    }

    fn spawn_actor(&self, id: &str) -> SessionActorHandle {
        SessionActorHandle::spawn(SessionManager::new(
            id,
            self.transport.clone(),
            self.catalog.clone(),
            self.settings,
        ))
    }
}

async fn teardown(handle: &SessionActorHandle) {
    if let Err(e) = handle.teardown().await {
        warn!(
            component = "registry",
            event = "registry.session.teardown_failed",
            session_id = %handle.id,
            error = %e,
            "Session actor was already gone"
        );
    }
}

/// Periodically evict idle sessions until the task is aborted.
pub fn spawn_idle_reaper<T: ShellTransport>(
    registry: Arc<SessionRegistry<T>>,
    ttl: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            registry.evict_idle(ttl).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::SshTarget;
    use crate::testing::ScriptedTransport;

    fn registry(transport: &ScriptedTransport) -> SessionRegistry<ScriptedTransport> {
        SessionRegistry::new(
            transport.clone(),
            CommandCatalog::builtin(),
            ManagerSettings::default(),
        )
    }

    fn target() -> SshTarget {
        SshTarget::new("10.0.0.5", 22, "admin", "pw".to_string())
    }

    #[tokio::test]
    async fn same_id_returns_the_same_session() {
        let transport = ScriptedTransport::nas();
        let registry = registry(&transport);

        let a = registry.get_or_create("alpha");
        a.connect(target()).await.unwrap();
        let again = registry.get_or_create("alpha");
        assert!(again.snapshot().is_connected());

        let b = registry.get_or_create("beta");
        assert!(!b.snapshot().is_connected());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_creation_yields_one_manager_per_id() {
        let transport = ScriptedTransport::nas();
        let registry = Arc::new(registry(&transport));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_or_create("shared").id.clone() })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap(), "shared");
        }
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn evict_closes_the_connection() {
        let transport = ScriptedTransport::nas();
        let registry = registry(&transport);
        registry.get_or_create("alpha").connect(target()).await.unwrap();

        assert!(registry.evict("alpha").await);
        assert!(!registry.evict("alpha").await);
        assert_eq!(transport.closes(), 1);
        assert!(registry.get("alpha").is_none());

        // A later request starts from a clean session.
        let fresh = registry.get_or_create("alpha");
        assert!(!fresh.snapshot().is_connected());
        assert!(fresh.snapshot().logs.is_empty());
    }

    #[tokio::test]
    async fn idle_sessions_are_reaped() {
        let transport = ScriptedTransport::nas();
        let registry = registry(&transport);
        registry.get_or_create("old").connect(target()).await.unwrap();
        registry.get_or_create("recent");

        let ttl = Duration::from_secs(60);
        assert_eq!(registry.evict_idle_at(Instant::now(), ttl).await, 0);

        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(registry.evict_idle_at(later, ttl).await, 2);
        assert!(registry.is_empty());
        assert_eq!(transport.closes(), 1);
    }

    #[tokio::test]
    async fn evict_all_tears_everything_down() {
        let transport = ScriptedTransport::nas();
        let registry = registry(&transport);
        for id in ["a", "b", "c"] {
            registry.get_or_create(id).connect(target()).await.unwrap();
        }

        assert_eq!(registry.evict_all().await, 3);
        assert_eq!(transport.closes(), 3);
        assert!(registry.is_empty());
    }
}
