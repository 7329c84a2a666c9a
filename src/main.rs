use clap::Parser;
use tracing::{error, info};

use peerhub::cli::{self, Cli, Commands};
use peerhub::config::Config;
use peerhub::server::Server;

#[tokio::main]
async fn main() {
    // Default to info-level relay logs if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "peerhub=info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Some(Commands::Probe {
        url,
        message,
        to,
        listen_secs,
    }) = cli.command
    {
        if let Err(e) = cli::run_probe(url, message, to, listen_secs).await {
            error!("probe error: {e:#}");
            std::process::exit(1);
        }
        return;
    }

    let config = Config::from_env();
    let port = config.port;
    let mut server = Server::new(config);
    if let Err(e) = server.start(port).await {
        error!("failed to start: {e:#}");
        std::process::exit(1);
    }

    shutdown_signal().await;
    info!("shutdown signal received");
    server.stop().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
