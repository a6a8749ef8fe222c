//! nasfan
//!
//! Web control panel for QNAP NAS fans. Each browser session gets its own
//! SSH connection to the NAS and its own command log.

mod audit;
mod catalog;
mod config;
mod error;
mod host_key;
mod http;
mod logging;
mod paths;
mod session;
mod session_actor;
mod session_command;
mod ssh;
mod state;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::catalog::CommandCatalog;
use crate::config::Cli;
use crate::host_key::HostKeyPolicy;
use crate::ssh::RusshTransport;
use crate::state::{spawn_idle_reaper, SessionRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = paths::resolve_data_dir(cli.data_dir.as_deref())?;
    paths::ensure_dirs(&data_dir)?;
    let logging = logging::init_logging(&paths::log_dir(&data_dir), cli.log_stderr)?;

    let addr = cli.bind_addr();
    let settings = cli.manager_settings();
    let policy = cli.host_key_policy();

    info!(
        component = "server",
        event = "server.starting",
        run_id = %logging.run_id,
        bind = %addr,
        data_dir = %data_dir.display(),
        connect_timeout_secs = settings.connect_timeout.as_secs(),
        command_timeout_secs = settings.command_timeout.as_secs(),
        log_capacity = settings.log_capacity,
        host_key_policy = policy.describe(),
        "Starting nasfan"
    );
    if policy == HostKeyPolicy::AcceptAny {
        warn!(
            component = "server",
            event = "server.host_key.unverified",
            "NAS host keys are not verified; pass --host-key-fingerprint to pin them"
        );
    }

    let registry = Arc::new(SessionRegistry::new(
        RusshTransport::new(policy),
        CommandCatalog::builtin(),
        settings,
    ));
    let reaper = spawn_idle_reaper(registry.clone(), cli.session_ttl(), cli.reap_interval());

    let app = http::router(registry.clone())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        component = "server",
        event = "server.listening",
        bind = %listener.local_addr()?,
        "Listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    let evicted = registry.evict_all().await;
    info!(
        component = "server",
        event = "server.stopped",
        sessions_closed = evicted,
        "Shutdown complete"
    );

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(
            component = "server",
            event = "server.signal.failed",
            error = %e,
            "Could not listen for Ctrl-C"
        );
        std::future::pending::<()>().await;
    }
    info!(
        component = "server",
        event = "server.shutdown_requested",
        "Shutdown requested"
    );
}
