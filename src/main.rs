//! # Report Studio
//!
//! Serves the studio and its integration endpoints.
//!
//! ## Quick Start
//!
//! ```bash
//! # Serve with the default configuration
//! cargo run
//!
//! # Serve built assets from ./static with some seed entities
//! cargo run -- --static-path static --data entities.json -v
//!
//! # Write the default configuration file and exit
//! cargo run -- --init-config
//! ```

use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use studio_core::{Entity, StudioConfig};
use studio_server::{AppState, MemoryRepository, SharedRepository};

/// Report Studio - editor state core and HTTP integration layer
#[derive(Parser, Debug)]
#[command(name = "reportstudio")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    /// Directory holding favicon.ico and dist/
    #[arg(long, value_name = "DIR")]
    static_path: Option<PathBuf>,

    /// Path prefix the studio is mounted under
    #[arg(long, value_name = "PATH")]
    app_path: Option<String>,

    /// JSON array of entities to seed the repository with
    #[arg(short, long, value_name = "FILE")]
    data: Option<PathBuf>,

    /// Compress responses
    #[arg(long)]
    compress: bool,

    /// Write the configuration file and exit
    #[arg(long)]
    init_config: bool,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    /// Applies command line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut StudioConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(static_path) = &self.static_path {
            config.server.static_path = static_path.clone();
        }
        if let Some(app_path) = &self.app_path {
            config.editor.app_path = normalize_app_path(app_path);
        }
        if self.compress {
            config.server.use_compression = true;
        }
    }
}

/// Makes sure the app path starts and ends with `/`.
fn normalize_app_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<StudioConfig> {
    match path {
        Some(path) => Ok(StudioConfig::load_from(path)?),
        None => Ok(StudioConfig::load()),
    }
}

fn load_entities(path: &Path) -> anyhow::Result<Vec<Entity>> {
    let content = std::fs::read_to_string(path)?;
    let entities = serde_json::from_str(&content)?;
    Ok(entities)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true),
        )
        .with(tracing_subscriber::filter::LevelFilter::from_level(
            log_level,
        ))
        .init();

    if args.init_config {
        let path = match &args.config {
            Some(path) => path.clone(),
            None => StudioConfig::default_path()?,
        };
        StudioConfig::default().save_to(&path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);

    tracing::info!("Starting Report Studio v{}", env!("CARGO_PKG_VERSION"));

    let entities = match &args.data {
        Some(path) => load_entities(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?,
        None => Vec::new(),
    };
    tracing::info!("Seeding repository with {} entities", entities.len());

    let repository: SharedRepository = Arc::new(RwLock::new(MemoryRepository::with_entities(
        &config, entities,
    )));
    let state = AppState::new(Arc::new(config), repository);

    // Run the server
    studio_server::serve(state)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
