use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feedback_triage::{
    api::{create_api_router, AppState},
    create_pool, run_migrations, Config, FeedbackPipeline, ImportRow, InferenceClient,
    OllamaClient, PgFeedbackStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "feedback-triage")]
#[command(about = "Turns banking customer feedback into de-duplicated pending issues and positive aspects")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Skip schema creation on startup
        #[arg(long)]
        skip_migrations: bool,
    },
    /// Create or update the database schema
    Migrate,
    /// Import a JSON array of feedback rows
    Import {
        /// Path to the JSON file
        file: PathBuf,
    },
    /// Check database and inference backend health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env()?;
    init_tracing(&config);
    config.validate()?;

    info!("Database: {}", config.safe_database_url());

    match cli.command {
        Some(Commands::Serve { skip_migrations }) => serve(&config, skip_migrations).await,
        Some(Commands::Migrate) => migrate(&config).await,
        Some(Commands::Import { file }) => import(&config, file).await,
        Some(Commands::Health) => health(&config).await,
        // Default to starting the server
        None => serve(&config, false).await,
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.operational.log_level.as_str().into());
    let json = config.operational.log_format == "json";

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer()))
        .init();
}

async fn build_pipeline(config: &Config) -> Result<FeedbackPipeline> {
    let pool = create_pool(&config.database_url, config.operational.max_db_connections).await?;
    let client = OllamaClient::new(config.ollama.clone())?;

    Ok(FeedbackPipeline::from_config(
        Arc::new(PgFeedbackStore::new(pool)),
        Arc::new(client),
        config,
    ))
}

async fn serve(config: &Config, skip_migrations: bool) -> Result<()> {
    if !skip_migrations {
        migrate(config).await?;
    }

    let pipeline = build_pipeline(config).await?;
    if !pipeline.detector().client().health_check().await.unwrap_or(false) {
        warn!(
            "⚠️ Ollama at {} is not reachable; issue extraction will rely on the keyword fallback",
            config.ollama.base_url
        );
    }

    let app = create_api_router(AppState::new(pipeline));
    let addr = format!("0.0.0.0:{}", config.http_port);

    info!("🚀 Feedback triage API starting on http://{}", addr);
    info!("Model: {} at {}", config.ollama.model, config.ollama.base_url);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn migrate(config: &Config) -> Result<()> {
    let pool = create_pool(&config.database_url, 1).await?;
    run_migrations(&pool).await?;
    pool.close().await;
    info!("✅ Schema ready");
    Ok(())
}

async fn import(config: &Config, file: PathBuf) -> Result<()> {
    let raw = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let rows: Vec<ImportRow> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of rows", file.display()))?;

    let pipeline = build_pipeline(config).await?;
    let summary = pipeline.import_batch(rows).await?;

    println!(
        "Imported {} records, detected {} issues. Failed: {}",
        summary.imported, summary.issues_detected, summary.failed
    );
    Ok(())
}

async fn health(config: &Config) -> Result<()> {
    let mut healthy = true;

    match create_pool(&config.database_url, 1).await {
        Ok(pool) => {
            println!("✅ Database: connected");
            pool.close().await;
        }
        Err(e) => {
            println!("❌ Database: {e}");
            healthy = false;
        }
    }

    let client = OllamaClient::new(config.ollama.clone())?;
    match client.health_check().await {
        Ok(true) => println!("✅ Ollama: reachable at {}", config.ollama.base_url),
        Ok(false) => {
            println!("❌ Ollama: unhealthy response from {}", config.ollama.base_url);
            healthy = false;
        }
        Err(e) => {
            println!("❌ Ollama: {e}");
            healthy = false;
        }
    }

    if healthy {
        Ok(())
    } else {
        error!("Health check failed");
        anyhow::bail!("One or more dependencies are unhealthy")
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("🛑 Shutdown signal received");
}
