// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Centralized configuration management for the Ivory server.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Consistent environment variable naming (`IVORY_SERVER_*`)
//! - Loading of the master passphrase from `IVORY_SERVER_MASTER_SECRET` or
//!   `IVORY_SERVER_MASTER_SECRET_FILE`

pub mod error;
pub mod layer;
pub mod sections;
pub mod secret_env;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use secret_env::{load_secret_env, SecretEnvError};
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use ivory_common_secret::SecretString;
use tracing::{debug, info};

pub const MASTER_SECRET_ENV: &str = "IVORY_SERVER_MASTER_SECRET";

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub database: DatabaseConfig,
	pub paths: PathsConfig,
	pub sidecar: SidecarConfig,
	pub postgres: PostgresConfig,
	pub compaction: CompactionConfig,
	pub logging: LoggingConfig,
	/// Passphrase the master secret is derived from. When absent the server
	/// starts without an active secret and credential operations fail until
	/// one is set.
	pub master_secret: Option<SecretString>,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`IVORY_SERVER_*`)
/// 2. Config file (`/etc/ivory/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	let master_secret = load_secret_env(MASTER_SECRET_ENV)?;
	finalize(merged, master_secret)
}

fn finalize(
	layer: ServerConfigLayer,
	master_secret: Option<SecretString>,
) -> Result<ServerConfig, ConfigError> {
	let config = ServerConfig {
		database: layer.database.unwrap_or_default().finalize(),
		paths: layer.paths.unwrap_or_default().finalize(),
		sidecar: layer.sidecar.unwrap_or_default().finalize(),
		postgres: layer.postgres.unwrap_or_default().finalize(),
		compaction: layer.compaction.unwrap_or_default().finalize(),
		logging: layer.logging.unwrap_or_default().finalize(),
		master_secret,
	};

	validate_config(&config)?;

	info!(
		database = %config.database.url,
		data_dir = %config.paths.data_dir.display(),
		compaction_command = %config.compaction.command,
		master_secret_configured = config.master_secret.is_some(),
		"Server configuration loaded"
	);

	Ok(config)
}

fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
	if config.compaction.command.trim().is_empty() {
		return Err(ConfigError::Validation(
			"compaction.command must not be empty".to_string(),
		));
	}
	if config.sidecar.request_timeout.is_zero() {
		return Err(ConfigError::Validation(
			"sidecar.request_timeout_secs must be greater than zero".to_string(),
		));
	}
	if config.postgres.query_timeout.is_zero() {
		return Err(ConfigError::Validation(
			"postgres.query_timeout_secs must be greater than zero".to_string(),
		));
	}
	if let Some(secret) = &config.master_secret {
		if secret.expose().is_empty() {
			return Err(ConfigError::Validation(format!(
				"{MASTER_SECRET_ENV} is set but empty"
			)));
		}
	}
	Ok(())
}
