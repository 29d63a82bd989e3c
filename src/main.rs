use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use warden::application::registry::Registry;
use warden::application::services::Server;
use warden::application::settings::AppConfig;
use warden::domain::ports::broker::MessageBroker;
use warden::domain::ports::store::KeyValueStore;
use warden::infrastructure::broker::InMemoryBroker;
use warden::infrastructure::os::ShellRunner;
use warden::infrastructure::persistence::{InMemoryStore, SqliteStore};
use warden::infrastructure::sandbox::PredicateEvaluator;
use warden::presentation::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.general.log_level.clone()))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Some(Commands::Daemon { testing }) => run_daemon(&config, testing).await,
        Some(Commands::Validate) => validate(&config),
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

fn load_registry(config: &AppConfig) -> Result<Registry> {
    let path = shellexpand::tilde(&config.registry.path).into_owned();
    let path = Path::new(&path);
    if path.exists() {
        Registry::from_file(path)
    } else {
        warn!(path = %path.display(), "fichier de registre absent, registre vide");
        Ok(Registry::new())
    }
}

fn build_store(config: &AppConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config.store.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        "sqlite" => {
            let store =
                SqliteStore::new(&config.store.path).context("Failed to open sqlite store")?;
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unknown store backend: {other}"),
    }
}

fn build_broker(config: &AppConfig) -> Result<Arc<dyn MessageBroker>> {
    match config.broker.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryBroker::new())),
        other => anyhow::bail!("unknown broker backend: {other}"),
    }
}

async fn run_daemon(config: &AppConfig, testing: bool) -> Result<()> {
    let registry = Arc::new(load_registry(config)?);
    info!(
        checks = registry.check_count(),
        handlers = registry.handler_count(),
        "registre chargé"
    );

    let store = build_store(config)?;
    let broker = build_broker(config)?;
    let server = Server::new(
        registry,
        store,
        broker,
        Arc::new(ShellRunner::new()),
        Arc::new(PredicateEvaluator::new()),
        testing || config.general.testing,
    );

    let signals = Arc::clone(&server);
    tokio::spawn(async move {
        let sigterm = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(error) => warn!(%error, "SIGTERM handler unavailable"),
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            () = sigterm => {}
        }
        info!("signal reçu, arrêt en cours");
        signals.stop().await;
    });

    server.run().await;
    Ok(())
}

fn validate(config: &AppConfig) -> Result<()> {
    let registry = load_registry(config)?;
    println!(
        "configuration valide : {} checks, {} handlers",
        registry.check_count(),
        registry.handler_count()
    );
    Ok(())
}
