// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Parses HTTP port, database URL, model catalog and provider selection from the environment
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! Environment-based server configuration

use std::env;

use anyhow::{Context, Result};
use tracing::info;

use super::{ChatConfig, Environment, LlmProviderType};

const HTTP_PORT_ENV: &str = "HTTP_PORT";
const DATABASE_URL_ENV: &str = "DATABASE_URL";
const ENVIRONMENT_ENV: &str = "ENVIRONMENT";
const MODELS_ENV: &str = "COLLOQUY_MODELS";
const DEFAULT_MODEL_ENV: &str = "COLLOQUY_DEFAULT_MODEL";

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 8081;

/// Default SQLite database location
pub const DEFAULT_DATABASE_URL: &str = "sqlite:./data/colloquy.db";

/// Top-level server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port the HTTP listener binds to
    pub http_port: u16,
    /// `sqlx` database URL
    pub database_url: String,
    /// Deployment environment
    pub environment: Environment,
    /// Which chat backend to use
    pub llm_provider: LlmProviderType,
    /// Model ids accepted by the catalog (empty = accept only the default)
    pub models: Vec<String>,
    /// Catalog default model
    pub default_model: Option<String>,
    /// Chat engine settings
    pub chat: ChatConfig,
}

impl ServerConfig {
    /// Load the full server configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but malformed.
    pub fn from_env() -> Result<Self> {
        let http_port = match env::var(HTTP_PORT_ENV) {
            Ok(port) => port
                .parse()
                .with_context(|| format!("Invalid {HTTP_PORT_ENV}: {port}"))?,
            Err(_) => DEFAULT_HTTP_PORT,
        };

        let database_url =
            env::var(DATABASE_URL_ENV).unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_owned());

        let environment = env::var(ENVIRONMENT_ENV)
            .map(|s| Environment::from_str_or_default(&s))
            .unwrap_or_default();

        let models = env::var(MODELS_ENV)
            .map(|raw| parse_model_list(&raw))
            .unwrap_or_default();

        let default_model = env::var(DEFAULT_MODEL_ENV)
            .ok()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| models.first().cloned());

        let chat = ChatConfig::from_env().context("Invalid chat configuration")?;

        let config = Self {
            http_port,
            database_url,
            environment,
            llm_provider: LlmProviderType::from_env(),
            models,
            default_model,
            chat,
        };
        config.log_summary();
        Ok(config)
    }

    fn log_summary(&self) {
        info!(
            http_port = self.http_port,
            environment = %self.environment,
            provider = %self.llm_provider,
            models = self.models.len(),
            default_model = self.default_model.as_deref().unwrap_or("<provider default>"),
            "Server configuration loaded"
        );
    }
}

/// Parse a comma-separated model list, dropping blanks and duplicates
#[must_use]
pub fn parse_model_list(raw: &str) -> Vec<String> {
    let mut models: Vec<String> = Vec::new();
    for model in raw.split(',').map(str::trim).filter(|m| !m.is_empty()) {
        if !models.iter().any(|m| m == model) {
            models.push(model.to_owned());
        }
    }
    models
}
