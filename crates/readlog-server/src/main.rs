//! readlog server binary.
//!
//! Serves container and service logs to browsers over a WebSocket.

use clap::Parser;
use readlog_server::cli::{Cli, Commands, ListArgs, ServeArgs};
use readlog_proto::Catalog;
use readlog_server::{LogServer, ServerResult};
use readlog_sources::{CatalogProvider, DockerLogs, Journalctl, LogSources};
use regex::Regex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::List(args) => list(args).await,
    };
    std::process::exit(code);
}

async fn serve(args: ServeArgs) -> i32 {
    let config = args.to_config();
    let docker = DockerLogs::new(args.docker_host.clone().unwrap_or_default());
    let sources = LogSources::new(docker, Journalctl::with_program(&args.journalctl));
    let server = LogServer::new(config, sources);

    info!("Starting readlog on {}", server.config().bind_addr);
    info!(
        "  WebSocket endpoint: ws://{}{}",
        server.config().bind_addr,
        server.config().ws_path
    );

    let listener = match server.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            shutdown.cancel();
        }
    });

    match server.serve_on(listener).await {
        Ok(()) => 0,
        Err(e) => {
            error!("Server error: {}", e);
            1
        }
    }
}

async fn list(args: ListArgs) -> i32 {
    let mut provider = CatalogProvider::new()
        .with_docker(DockerLogs::new(args.docker_host.unwrap_or_default()));
    if let Some(pattern) = args.unit_filter {
        match Regex::new(&pattern) {
            Ok(filter) => provider = provider.with_unit_filter(filter),
            Err(e) => {
                error!("Invalid unit filter: {}", e);
                return 2;
            }
        }
    }

    let catalog = provider.collect().await;
    match render_catalog(&catalog) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(e) => {
            error!("Failed to encode catalog: {}", e);
            1
        }
    }
}

fn render_catalog(catalog: &Catalog) -> ServerResult<String> {
    Ok(serde_json::to_string_pretty(catalog)?)
}
