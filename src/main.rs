use std::sync::Arc;

use tracing::{error, info};

use cumulus::object::LocalObjectStore;
use cumulus::{Config, Database, StorageEngine};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = cumulus::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        cumulus::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = run(config).await {
        error!("Cumulus failed to start: {e}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> cumulus::Result<()> {
    config.validate()?;

    let db = Database::open(&config.database.path).await?;
    let objects = Arc::new(LocalObjectStore::new(&config.objects.root)?);
    let engine = StorageEngine::new(db, objects, &config);

    info!("Cumulus - personal cloud storage engine");
    info!(
        "Database at {}, objects under {}, {} upload workers",
        config.database.path, config.objects.root, config.upload.workers
    );

    engine.database().close().await;
    Ok(())
}
