use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warbler_common::snowflake::{ProcessId, WorkerId};
use warbler_common::util::FeedCapacity;
use warbler_db::client::DbClient;
use warbler_db::fanout::DEFAULT_FAN_OUT_CONCURRENCY;
use warbler_db::graph::PgSocialGraph;
use warbler_db::store::StoreError;
use warbler_db::timeline::{Timeline, TimelineConfig};

mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Error setting up the database: {0}")]
    Database(#[from] StoreError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

fn default_max_connections() -> u32 {
    10
}

fn default_fan_out_concurrency() -> NonZeroUsize {
    DEFAULT_FAN_OUT_CONCURRENCY
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    database_url: String,
    #[serde(default = "default_max_connections")]
    database_max_connections: u32,
    #[serde(default)]
    feed_capacity: FeedCapacity,
    #[serde(default = "default_fan_out_concurrency")]
    fan_out_concurrency: NonZeroUsize,
    #[serde(default)]
    worker_id: WorkerId,
    #[serde(default)]
    process_id: ProcessId,
}

impl Env {
    fn timeline_config(&self) -> TimelineConfig {
        TimelineConfig {
            feed_capacity: self.feed_capacity,
            fan_out_concurrency: self.fan_out_concurrency,
            worker_id: self.worker_id,
            process_id: self.process_id,
        }
    }
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "warbler_api=debug,warbler_db=debug,warbler_common=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Could not listen for ctrl-c, shutting down");
    } else {
        info!("Received ctrl-c, shutting down");
    }

    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let client = DbClient::connect(&env.database_url, env.database_max_connections).await?;
    client.run_migrations().await?;
    debug!("Migrations applied");

    let graph = PgSocialGraph::new(client.pool().clone());
    let shutdown = CancellationToken::new();
    let timeline = Timeline::new(
        Arc::new(client),
        Arc::new(graph),
        env.timeline_config(),
        shutdown.clone(),
    );
    let state = server::ServerState {
        timeline: Arc::new(timeline),
    };

    let tracing_layer = TraceLayer::new_for_http();
    let app = server::routes().with_state(state).layer(tracing_layer);

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}
