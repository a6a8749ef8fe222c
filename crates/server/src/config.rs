//! Command-line and environment configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::host_key::HostKeyPolicy;
use crate::session::ManagerSettings;

const DEFAULT_BIND: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 5000);

#[derive(Parser, Debug, Clone)]
#[command(
    name = "nasfan",
    version,
    about = "Web control panel for QNAP NAS fans over SSH"
)]
pub struct Cli {
    /// Address to listen on (defaults to 127.0.0.1:5000, or 0.0.0.0:$PORT)
    #[arg(long, env = "NASFAN_BIND")]
    pub bind: Option<SocketAddr>,

    /// Data directory for logs (defaults to ~/.nasfan)
    #[arg(long, env = "NASFAN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// SSH connect and authentication timeout, in seconds
    #[arg(long, env = "NASFAN_CONNECT_TIMEOUT", default_value_t = 10)]
    pub connect_timeout: u64,

    /// Timeout for each remote command, in seconds
    #[arg(long, env = "NASFAN_COMMAND_TIMEOUT", default_value_t = 30)]
    pub command_timeout: u64,

    /// Command log entries kept per session
    #[arg(long, env = "NASFAN_LOG_CAPACITY", default_value_t = crate::audit::DEFAULT_CAPACITY)]
    pub log_capacity: usize,

    /// Evict sessions idle for this many seconds
    #[arg(long, env = "NASFAN_SESSION_TTL", default_value_t = 3600)]
    pub session_ttl: u64,

    /// How often to look for idle sessions, in seconds
    #[arg(long, env = "NASFAN_REAP_INTERVAL", default_value_t = 60)]
    pub reap_interval: u64,

    /// Only accept NAS host keys with this SHA-256 fingerprint (repeatable)
    #[arg(
        long = "host-key-fingerprint",
        env = "NASFAN_HOST_KEY_FINGERPRINTS",
        value_name = "SHA256:...",
        value_delimiter = ','
    )]
    pub host_key_fingerprints: Vec<String>,

    /// Log to stderr instead of <data-dir>/logs/server.log
    #[arg(long, env = "NASFAN_LOG_STDERR")]
    pub log_stderr: bool,
}

impl Cli {
    pub fn bind_addr(&self) -> SocketAddr {
        resolve_bind(self.bind, std::env::var("PORT").ok())
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout.max(1)),
            command_timeout: Duration::from_secs(self.command_timeout.max(1)),
            log_capacity: self.log_capacity.max(1),
            ..ManagerSettings::default()
        }
    }

    pub fn host_key_policy(&self) -> HostKeyPolicy {
        HostKeyPolicy::from_fingerprints(&self.host_key_fingerprints)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval.max(1))
    }
}

/// Explicit bind address wins; a platform-provided `PORT` binds all
/// interfaces; otherwise loopback on 5000.
pub fn resolve_bind(explicit: Option<SocketAddr>, port_env: Option<String>) -> SocketAddr {
    if let Some(addr) = explicit {
        return addr;
    }
    port_env
        .and_then(|p| p.trim().parse::<u16>().ok())
        .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
        .unwrap_or(DEFAULT_BIND)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_resolution_order() {
        let explicit: SocketAddr = "10.1.2.3:8080".parse().unwrap();
        assert_eq!(resolve_bind(Some(explicit), Some("9000".into())), explicit);
        assert_eq!(
            resolve_bind(None, Some("9000".into())),
            "0.0.0.0:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(resolve_bind(None, Some("not-a-port".into())), DEFAULT_BIND);
        assert_eq!(resolve_bind(None, None), "127.0.0.1:5000".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn defaults_match_documented_values() {
        let cli = Cli::try_parse_from(["nasfan"]).unwrap();
        let settings = cli.manager_settings();
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.command_timeout, Duration::from_secs(30));
        assert_eq!(settings.log_capacity, 100);
        assert_eq!(cli.session_ttl(), Duration::from_secs(3600));
        assert_eq!(cli.host_key_policy(), HostKeyPolicy::AcceptAny);
        assert!(!cli.log_stderr);
    }

    #[test]
    fn repeated_fingerprints_pin_the_policy() {
        let cli = Cli::try_parse_from([
            "nasfan",
            "--host-key-fingerprint",
            "SHA256:abc",
            "--host-key-fingerprint",
            "SHA256:def",
            "--command-timeout",
            "0",
        ])
        .unwrap();
        assert_eq!(
            cli.host_key_policy(),
            HostKeyPolicy::Pinned(vec!["SHA256:abc".into(), "SHA256:def".into()])
        );
        // Zero would make every command time out immediately.
        assert_eq!(cli.manager_settings().command_timeout, Duration::from_secs(1));
    }
}
