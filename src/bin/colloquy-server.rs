// ABOUTME: Server binary for the Colloquy chat service
// ABOUTME: Loads configuration, connects storage and the LLM provider, then serves HTTP until shutdown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Colloquy Server Binary
//!
//! Starts the chat service with the provider selected by
//! `COLLOQUY_LLM_PROVIDER`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colloquy::{
    config::ServerConfig,
    database::ChatManager,
    llm::{ChatProvider, LlmProvider},
    logging,
    models::StaticModelCatalog,
    server::{self, ServerResources},
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "colloquy-server")]
#[command(about = "Colloquy - multi-turn LLM chat with server-held history")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override the database URL
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init_from_env()?;

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }

    info!(
        environment = %config.environment,
        provider = %config.llm_provider,
        http_port = config.http_port,
        "Starting Colloquy"
    );

    ensure_database_dir(&config.database_url).await?;
    let database = ChatManager::connect(&config.database_url).await?;

    let provider = ChatProvider::from_env()?;
    let default_model = config
        .default_model
        .clone()
        .unwrap_or_else(|| provider.default_model().to_owned());
    let catalog = StaticModelCatalog::new(config.models.clone(), Some(default_model));

    let resources = Arc::new(ServerResources::new(
        config,
        Arc::new(database),
        Arc::new(provider),
        Arc::new(catalog),
    ));

    server::serve(resources, shutdown_signal()).await?;
    info!("Colloquy stopped");
    Ok(())
}

/// Create the parent directory of a file-backed SQLite URL
async fn ensure_database_dir(database_url: &str) -> Result<()> {
    let Some(path) = database_url.strip_prefix("sqlite:") else {
        return Ok(());
    };
    let path = path.trim_start_matches("//");
    if path.contains(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
