use clap::Parser;
use tienda_core::TiendaConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "tienda.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience; production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match TiendaConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Connect the data backend
    let backend = match tienda_core::create_backend(&config).await {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Failed to initialise {:?} backend: {}", config.backend.kind, e);
            std::process::exit(1);
        }
    };

    if args.health {
        match backend.health().await {
            Ok(v) => println!("✅ {} backend reachable: {}", backend.name(), v),
            Err(e) => {
                println!("❌ {} backend check failed: {}", backend.name(), e);
                std::process::exit(1);
            }
        }
        println!("✅ Tienda health check passed");
        return Ok(());
    }

    let (shutdown_tx, mut shutdown) = broadcast::channel(1);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            // Keep the sender alive so the server is not shut down by accident.
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    tracing::info!(backend = backend.name(), "Tienda server starting");

    if config.http.enabled {
        tienda_server::http::start_http_server(backend, config, shutdown).await?;
    } else {
        tracing::warn!("HTTP API disabled in config; waiting for shutdown");
        let _ = shutdown.recv().await;
    }

    Ok(())
}
