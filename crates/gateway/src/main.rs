use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use choir_domain::config::Config;
use choir_gateway::api;
use choir_gateway::bootstrap::{build_app_state, spawn_background_tasks};
use choir_gateway::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let (config, config_path) = choir_gateway::cli::load_config(cli.config.as_deref())?;

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => run_server(Arc::new(config)).await,
        Some(Command::Config(ConfigCommand::Validate)) => {
            if !choir_gateway::cli::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            choir_gateway::cli::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("choir {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let state = build_app_state(config.clone()).await?;
    spawn_background_tasks(state.clone());

    let app = api::router(state.clone())
        .layer(cors_layer(&config))
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "choir listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("serving")?;

    tracing::info!("shutdown complete");
    Ok(())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins = &config.server.cors.allowed_origins;
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new().allow_origin(AllowOrigin::list(parsed))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to install ctrl-c handler");
    }
    tracing::info!("shutdown signal received");
}
