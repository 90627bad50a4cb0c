//! Ride dispatch server: real-time channel on `/ws`, REST under `/api`.

mod config;
mod dispatcher;
mod hub;
mod routes;
mod state;
mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ride_core::routing::build_distance_provider;
use ride_core::runner::DispatchCore;
use ride_core::scoring::build_scorer;
use ride_core::store::InMemoryRecordStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Overrides, ServerConfig};
use crate::dispatcher::{now_ms, Dispatcher, Providers};
use crate::hub::Hub;
use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "ride-server")]
#[command(about = "Ride dispatch server with live tracking and ride sharing")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "ride-server.toml")]
    config: PathBuf,

    /// Listen address (overrides config)
    #[arg(long, env = "RIDE_BIND")]
    bind: Option<String>,

    /// OSRM base URL; enables road distances with a haversine fallback
    #[arg(long, env = "RIDE_OSRM_ENDPOINT")]
    osrm_endpoint: Option<String>,

    /// Sharing model base URL; enables remote scoring
    #[arg(long, env = "RIDE_SCORER_ENDPOINT")]
    scorer_endpoint: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ride_server=info,ride_core=info")),
        )
        .init();

    let mut config = ServerConfig::load(&cli.config)?;
    config.apply(Overrides {
        bind: cli.bind,
        osrm_endpoint: cli.osrm_endpoint,
        scorer_endpoint: cli.scorer_endpoint,
    })?;

    // Blocking HTTP clients are built and dropped outside the runtime.
    let providers = Arc::new(Providers {
        distances: build_distance_provider(&config.providers.distance)
            .context("building distance provider")?,
        scorer: build_scorer(&config.providers.scorer, &config.dispatch.sharing)
            .context("building sharing scorer")?,
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting tokio runtime")?;
    let result = runtime.block_on(serve(config, Arc::clone(&providers)));
    drop(runtime);
    drop(providers);
    result
}

async fn serve(config: ServerConfig, providers: Arc<Providers>) -> anyhow::Result<()> {
    info!(
        distance = ?config.providers.distance,
        scorer = ?config.providers.scorer,
        "providers ready"
    );
    let sharing = config.dispatch.sharing.clone();
    let core = DispatchCore::new(
        config.dispatch,
        Box::new(InMemoryRecordStore::default()),
        now_ms(),
    );
    let hub = Arc::new(Hub::new());
    let (dispatcher, dispatch) = Dispatcher::new(core, Arc::clone(&hub), Arc::clone(&providers));
    tokio::spawn(dispatcher.run());

    let app = routes::create_router(AppState {
        dispatch,
        hub,
        providers,
        sharing,
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!(addr = %config.server.bind, "ride server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
