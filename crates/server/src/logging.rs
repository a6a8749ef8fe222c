use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,tower_http=warn,hyper=warn,russh=warn";

pub struct LoggingHandle {
    pub run_id: String,
    pub guard: WorkerGuard,
}

/// Install the global subscriber. Writes to `<log_dir>/server.log`, or to
/// stderr when `to_stderr` is set. Keep the returned guard alive until exit.
pub fn init_logging(log_dir: &Path, to_stderr: bool) -> anyhow::Result<LoggingHandle> {
    let (writer, guard, destination) = if to_stderr {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
        (writer, guard, "stderr".to_string())
    } else {
        std::fs::create_dir_all(log_dir)?;
        let file_appender = tracing_appender::rolling::never(log_dir, "server.log");
        let (writer, guard) = tracing_appender::non_blocking(file_appender);
        (writer, guard, log_dir.join("server.log").display().to_string())
    };

    let filter_source = std::env::var("NASFAN_LOG_FILTER")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    let filter = std::env::var("NASFAN_LOG_FILTER")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    let format = std::env::var("NASFAN_LOG_FORMAT").unwrap_or_else(|_| "json".into());
    install(filter, writer, &format, to_stderr)?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let run_id = format!("pid-{}-{}", std::process::id(), now);

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        destination = %destination,
        format = %format,
        filter = %filter_source,
        run_id = %run_id,
    );

    Ok(LoggingHandle { run_id, guard })
}

fn install(filter: EnvFilter, writer: NonBlocking, format: &str, ansi: bool) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("pretty") {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .try_init()?;
    }
    Ok(())
}
