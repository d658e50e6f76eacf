use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use monmix_server::api;
use monmix_server::client::ConsoleClient;
use monmix_server::config::{load_config, ServerConfig};
use monmix_server::fanout::{self, Fanout};
use monmix_server::state::AppState;
use monmix_server::watchdog::{self, Backoff, Watchdog};

#[derive(Parser, Debug)]
#[command(name = "monmix-server", about = "Monitor-mix control server for networked audio consoles")]
struct Args {
    /// Listen address for the HTTP API and telemetry stream
    #[arg(short, long, default_value = "0.0.0.0:8080", env = "MONMIX_LISTEN")]
    listen: String,

    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "monmix.toml", env = "MONMIX_CONFIG")]
    config: String,

    /// Use the built-in console simulator regardless of the config file
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!(listen = %args.listen, config = %args.config, "monmix server starting");

    let mut config = if std::path::Path::new(&args.config).exists() {
        match load_config(&args.config) {
            Ok(config) => {
                info!(path = %args.config, "Loaded configuration from disk");
                config
            }
            Err(e) => {
                warn!(
                    path = %args.config,
                    error = %e,
                    "Failed to load config file (starting with defaults)"
                );
                ServerConfig::default()
            }
        }
    } else {
        info!(path = %args.config, "No config file found, using defaults");
        ServerConfig::default()
    };
    if args.simulate {
        config.console.simulated = true;
    }

    let shutdown = CancellationToken::new();

    // Console client and the watchdog that keeps it connected
    let client = ConsoleClient::new(config.console.clone());
    let watchdog = Watchdog::new(Backoff {
        base: Duration::from_secs(config.watchdog.base_interval_secs.max(1)),
        max: Duration::from_secs(config.watchdog.max_interval_secs.max(1)),
    });
    watchdog.configure_client(&client);
    tokio::spawn(watchdog::follow_client(
        watchdog.clone(),
        client.subscribe(),
        shutdown.child_token(),
    ));

    // Telemetry fan-out
    let fanout = Arc::new(Fanout::new());
    tokio::spawn(fanout::relay(
        fanout.clone(),
        client.clone(),
        watchdog.clone(),
        shutdown.child_token(),
    ));
    tokio::spawn(fanout::poll_levels(
        fanout.clone(),
        client.clone(),
        config.telemetry.input_channels.clone(),
        config.telemetry.output_channels.clone(),
        Duration::from_millis(config.telemetry.poll_interval_ms.max(10)),
        shutdown.child_token(),
    ));
    tokio::spawn(fanout::prune_loop(
        fanout.clone(),
        Duration::from_secs(config.telemetry.liveness_interval_secs.max(1)),
        shutdown.child_token(),
    ));

    // Initial connect. On success the connected event hands the link to
    // the watchdog; on failure it starts retrying if allowed.
    if let Err(e) = client.connect().await {
        if config.watchdog.auto_start {
            warn!(error = %e, "Initial console connection failed, watchdog will retry");
            watchdog.start();
        } else {
            warn!(error = %e, "Initial console connection failed (watchdog auto-start disabled)");
        }
    }

    let state = AppState::new(config, args.config.clone(), client.clone(), watchdog.clone(), fanout);

    let app = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(addr = %args.listen, "monmix server listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    watchdog.stop();
    client.disconnect().await;
    info!("monmix server stopped");

    Ok(())
}
