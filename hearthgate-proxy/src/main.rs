//! hearthgate edge proxy binary.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use hearthgate_core::audit::AuditLogger;
use hearthgate_core::config::EdgeConfig;
use hearthgate_core::events::{EventNotifier, NotifierConfig};
use hearthgate_core::upstream::{UpstreamClient, UpstreamConfig};
use hearthgate_proxy::ports::edge_port;
use hearthgate_proxy::server::{AppState, build_app};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Command-line options. Everything else comes from `HEARTHGATE_*`
/// environment variables.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Bind address
    #[arg(short, long, env = "HEARTHGATE_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Listening port (falls back to HEARTHGATE_PORT, then 8081)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The guard flushes buffered log lines on exit and must outlive the server.
    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = EdgeConfig::from_env().unwrap_or_else(|e| {
        error!(error = %e, "Invalid configuration, refusing to start");
        std::process::exit(1);
    });

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let upstream = UpstreamClient::new(UpstreamConfig::with_base_url(config.upstream_url.clone()))
        .unwrap_or_else(|e| {
            error!(error = %e, "Failed to build upstream client");
            std::process::exit(1);
        });

    let notifier = EventNotifier::spawn(
        NotifierConfig {
            webhook_url: config.webhook_url.clone(),
            queue_capacity: config.event_queue_capacity,
            ..NotifierConfig::default()
        },
        shutdown.clone(),
    )
    .unwrap_or_else(|e| {
        error!(error = %e, "Failed to start event notifier");
        std::process::exit(1);
    });

    let (audit, _audit_guard) = AuditLogger::stdout(config.log_requests);

    info!(
        upstream = %config.upstream_url,
        enumeration_ttl_secs = config.enumeration_ttl.as_secs(),
        rate_limit_requests = config.rate_limit_requests,
        rate_limit_window_secs = config.rate_limit_window.as_secs(),
        webhook = notifier.is_enabled(),
        audit = audit.is_enabled(),
        admin_auth = config.admin_credentials.is_some(),
        "Edge proxy configured"
    );

    let state = AppState::new(config, Arc::new(upstream), notifier, Arc::new(audit));
    let app = build_app(state);

    let port = cli.port.unwrap_or_else(edge_port);
    let addr = format!("{}:{}", cli.bind, port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        error!(addr = %addr, error = %e, "Failed to bind listener");
        e
    })?;

    info!(addr = %addr, "hearthgate listening");

    let server_shutdown = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        server_shutdown.cancelled().await;
        info!("Draining in-flight requests");
    })
    .await?;

    info!("hearthgate stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGINT, or SIGTERM on Unix.
fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_sigint = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                shutdown_sigint.cancel();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
            }
        }
    });

    #[cfg(unix)]
    {
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, initiating graceful shutdown");
                    shutdown.cancel();
                }
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGTERM");
                }
            }
        });
    }
}
