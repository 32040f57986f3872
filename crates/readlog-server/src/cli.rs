//! Command-line argument parsing with clap.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use readlog_sources::DockerEndpoint;

use crate::config::{ServerConfig, DEFAULT_BIND_ADDR, DEFAULT_MAX_CONNECTIONS, DEFAULT_WS_PATH};

/// readlog - browse Docker container and systemd service logs over WebSocket.
#[derive(Parser, Debug, Clone)]
#[command(name = "readlog")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the WebSocket log server.
    Serve(ServeArgs),

    /// Print the containers and services that can be watched, as JSON.
    List(ListArgs),
}

/// Arguments for `readlog serve`.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "READLOG_ADDR", default_value_t = DEFAULT_BIND_ADDR)]
    pub addr: SocketAddr,

    /// Request path of the WebSocket endpoint.
    #[arg(long, env = "READLOG_WS_PATH", default_value = DEFAULT_WS_PATH)]
    pub ws_path: String,

    /// Maximum number of concurrent sessions.
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Seconds to wait for a replaced producer to stop before closing the session.
    #[arg(long, default_value_t = 10)]
    pub stop_timeout_secs: u64,

    /// journalctl binary used for service logs.
    #[arg(long, env = "READLOG_JOURNALCTL", default_value = "journalctl")]
    pub journalctl: String,

    /// Docker daemon address (`unix:///path`, `tcp://host:port`); defaults to `DOCKER_HOST`.
    #[arg(long, env = "READLOG_DOCKER_HOST")]
    pub docker_host: Option<DockerEndpoint>,
}

impl ServeArgs {
    /// Server configuration described by these arguments.
    #[must_use]
    pub fn to_config(&self) -> ServerConfig {
        ServerConfig::new(self.addr)
            .with_ws_path(self.ws_path.clone())
            .with_max_connections(self.max_connections)
            .with_stop_timeout(Duration::from_secs(self.stop_timeout_secs))
    }
}

/// Arguments for `readlog list`.
#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Only list services whose unit name matches this regular expression.
    #[arg(long)]
    pub unit_filter: Option<String>,

    /// Docker daemon address (`unix:///path`, `tcp://host:port`); defaults to `DOCKER_HOST`.
    #[arg(long, env = "READLOG_DOCKER_HOST")]
    pub docker_host: Option<DockerEndpoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["readlog", "serve"]).unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };

        let config = args.to_config();
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.ws_path, DEFAULT_WS_PATH);
        assert_eq!(config.stop_timeout, Duration::from_secs(10));
        assert_eq!(args.journalctl, "journalctl");
        assert_eq!(args.docker_host, None);
    }

    #[test]
    fn test_serve_flags() {
        let cli = Cli::try_parse_from([
            "readlog",
            "serve",
            "--addr",
            "127.0.0.1:7000",
            "--ws-path",
            "logs",
            "--max-connections",
            "3",
            "--stop-timeout-secs",
            "2",
            "--journalctl",
            "/opt/bin/journalctl",
            "--docker-host",
            "tcp://10.0.0.5:2375",
        ])
        .unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };

        let config = args.to_config();
        assert_eq!(config.bind_addr.port(), 7000);
        assert_eq!(config.ws_path, "/logs");
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.stop_timeout, Duration::from_secs(2));
        assert_eq!(args.journalctl, "/opt/bin/journalctl");
        assert_eq!(
            args.docker_host,
            Some(DockerEndpoint::Http("tcp://10.0.0.5:2375".to_string()))
        );
    }

    #[test]
    fn test_list_filter() {
        let cli = Cli::try_parse_from(["readlog", "list", "--unit-filter", "^nginx"]).unwrap();
        let Commands::List(args) = cli.command else {
            panic!("expected list");
        };
        assert_eq!(args.unit_filter.as_deref(), Some("^nginx"));
    }

    #[cfg(unix)]
    #[test]
    fn test_list_docker_socket() {
        let cli = Cli::try_parse_from([
            "readlog",
            "list",
            "--docker-host",
            "unix:///var/run/docker.sock",
        ])
        .unwrap();
        let Commands::List(args) = cli.command else {
            panic!("expected list");
        };
        assert_eq!(
            args.docker_host,
            Some(DockerEndpoint::Unix("/var/run/docker.sock".to_string()))
        );
    }

    #[test]
    fn test_bad_docker_host_rejected() {
        assert!(
            Cli::try_parse_from(["readlog", "serve", "--docker-host", "ssh://box"]).is_err()
        );
    }

    #[test]
    fn test_bad_address_rejected() {
        assert!(Cli::try_parse_from(["readlog", "serve", "--addr", "nowhere"]).is_err());
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["readlog"]).is_err());
    }
}
