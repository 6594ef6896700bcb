use crate::config::parse::load_config;
use crate::config::types::Config;
use crate::pipeline::Coordinator;
use crate::processor::ProcessorRegistry;
use crate::source::{FileWatcher, LineParser};
use crate::storage::build_storage;
use crate::web::run_server;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("watch error: {0}")]
    Watch(#[from] crate::source::WatchError),

    #[error("parser error: {0}")]
    Parser(#[from] crate::source::ParserError),

    #[error("processor error: {0}")]
    Processor(#[from] crate::processor::ProcessorError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("web server error: {0}")]
    WebServer(String),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/logwell/config.yml");
            eprintln!("  /etc/logwell/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'logwell config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_pipeline(&config_path).await.map_err(|e| e.into())
}

/// Wire watcher, parser, processors and storage from a loaded config.
pub fn build_coordinator(
    config: &Config,
    registry: &ProcessorRegistry,
) -> Result<Coordinator, RunError> {
    let mut watcher = FileWatcher::new(config.watch.clone());
    for source in &config.sources {
        if source.path.is_dir() || source.pattern.is_some() {
            watcher.watch_directory(
                &source.path,
                source.pattern.as_deref(),
                source.poll_interval,
                source.start,
            )?;
        } else {
            watcher.watch_file(source.path.clone(), source.poll_interval, source.start);
        }
    }

    let parser = LineParser::from_config(&config.parser.patterns, config.parser.include_defaults)?;
    info!(patterns = parser.patterns().len(), "Parser initialized");

    let chain = registry.build_chain(&config.processors)?;
    info!(processors = ?chain.names(), "Processor chain initialized");

    let storage = build_storage(&config.storage)?;

    Ok(Coordinator::new(watcher, parser, chain, storage)
        .with_max_consecutive_failures(config.pipeline.max_consecutive_store_failures))
}

async fn run_pipeline(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let coordinator = build_coordinator(&config, &ProcessorRegistry::with_builtins())?;
    let handle = coordinator.handle();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!("Starting coordinator");
    let mut coordinator_handle = tokio::spawn(coordinator.run(shutdown_rx.clone()));

    let web_handle = match config.web.clone() {
        Some(web_config) => {
            info!("Starting web server on {}", web_config.listen);
            let web_shutdown = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                run_server(handle, web_config, web_shutdown)
                    .await
                    .map_err(|e| RunError::WebServer(e.to_string()))
            }))
        }
        None => None,
    };

    info!("Pipeline started, press Ctrl+C to shutdown");

    let mut coordinator_result = None;
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        result = &mut coordinator_handle => {
            coordinator_result = Some(result);
        }
    }
    let _ = shutdown_tx.send(true);

    // Wait for the in-flight cycle to finish
    let coordinator_result = match coordinator_result {
        Some(result) => result,
        None => coordinator_handle.await,
    };
    let outcome = match coordinator_result {
        Ok(Ok(())) => {
            info!("Coordinator stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Coordinator stopped with error");
            Err(RunError::Pipeline(e))
        }
        Err(e) => {
            error!(error = %e, "Coordinator task join error");
            Err(RunError::Join(e))
        }
    };

    if let Some(web_handle) = web_handle {
        match web_handle.await {
            Ok(Ok(())) => info!("Web server stopped"),
            Ok(Err(e)) => error!(error = %e, "Web server error"),
            Err(e) => error!(error = %e, "Web server join error"),
        }
    }

    info!("Pipeline shutdown complete");
    outcome
}
