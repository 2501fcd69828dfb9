use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use fileflow_runtime::PartRegistry;
use fileflow_server::{routes, AppState, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fileflow-server")]
#[command(about = "File flow processing host", long_about = None)]
struct Args {
    /// TOML config file; FILEFLOW_CONFIG is used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig::load(args.config.as_deref())?;

    info!("🚀 Starting FileFlow server");

    let mut registry = PartRegistry::new();
    fileflow_parts::register_all(&mut registry);
    let state = AppState::new(&config, Arc::new(registry));

    info!("✅ Runtime initialized with built-in parts");

    let shutdown = CancellationToken::new();
    let sweeper = state
        .liveness
        .clone()
        .spawn_sweeper(config.scheduler.sweep_interval(), shutdown.clone());

    let internal_node = if config.internal_node.enabled {
        Some(
            state
                .start_internal_node(&config.internal_node, shutdown.clone())
                .await?,
        )
    } else {
        None
    };

    let app_state = web::Data::new(state);
    let bind_address = config.server.bind_address.clone();

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    info!("Server stopped, waiting for runs to release their files");
    shutdown.cancel();
    if let Some(handle) = internal_node {
        let _ = handle.await;
    }
    let _ = sweeper.await;

    Ok(())
}
