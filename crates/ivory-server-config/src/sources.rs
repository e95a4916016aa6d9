// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	CompactionConfigLayer, DatabaseConfigLayer, LoggingConfigLayer, PathsConfigLayer,
	PostgresConfigLayer, SidecarConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file is not an error.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/ivory/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: IVORY_SERVER_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			database: Some(DatabaseConfigLayer {
				url: env_var("IVORY_SERVER_DATABASE_URL"),
			}),
			paths: Some(PathsConfigLayer {
				data_dir: env_var("IVORY_SERVER_DATA_DIR"),
				cert_dir: env_var("IVORY_SERVER_CERT_DIR"),
				log_dir: env_var("IVORY_SERVER_LOG_DIR"),
			}),
			sidecar: Some(SidecarConfigLayer {
				request_timeout_secs: env_u64("IVORY_SERVER_SIDECAR_REQUEST_TIMEOUT_SECS")?,
				connect_timeout_secs: env_u64("IVORY_SERVER_SIDECAR_CONNECT_TIMEOUT_SECS")?,
			}),
			postgres: Some(PostgresConfigLayer {
				connect_timeout_secs: env_u64("IVORY_SERVER_POSTGRES_CONNECT_TIMEOUT_SECS")?,
				query_timeout_secs: env_u64("IVORY_SERVER_POSTGRES_QUERY_TIMEOUT_SECS")?,
				default_database: env_var("IVORY_SERVER_POSTGRES_DEFAULT_DATABASE"),
			}),
			compaction: Some(CompactionConfigLayer {
				command: env_var("IVORY_SERVER_COMPACTION_COMMAND"),
				args: env_var("IVORY_SERVER_COMPACTION_ARGS").map(|v| split_args(&v)),
				timeout_secs: env_u64("IVORY_SERVER_COMPACTION_TIMEOUT_SECS")?,
			}),
			logging: Some(LoggingConfigLayer {
				level: env_var("IVORY_SERVER_LOG_LEVEL"),
				format: env_var("IVORY_SERVER_LOG_FORMAT")
					.map(|v| {
						v.parse().map_err(|message| ConfigError::InvalidValue {
							key: "IVORY_SERVER_LOG_FORMAT".to_string(),
							message,
						})
					})
					.transpose()?,
			}),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	env_var(name).map(|v| parse_u64(name, &v)).transpose()
}

fn parse_u64(name: &str, value: &str) -> Result<u64, ConfigError> {
	value.parse().map_err(|_| ConfigError::InvalidValue {
		key: name.to_string(),
		message: format!("invalid u64 value '{value}'"),
	})
}

fn split_args(value: &str) -> Vec<String> {
	value.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn test_precedence_order() {
		assert!(Precedence::Defaults < Precedence::ConfigFile);
		assert!(Precedence::ConfigFile < Precedence::Environment);
	}

	#[test]
	fn test_missing_toml_is_empty_layer() {
		let dir = tempfile::tempdir().unwrap();
		let layer = TomlSource::new(dir.path().join("nope.toml")).load().unwrap();
		assert!(layer.database.is_none());
	}

	#[test]
	fn test_invalid_toml_reports_path() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[database\nurl = ").unwrap();

		let err = TomlSource::new(file.path()).load().unwrap_err();
		assert!(matches!(err, ConfigError::TomlParse { .. }));
	}

	#[test]
	fn test_parse_u64_rejects_garbage() {
		assert_eq!(parse_u64("X", "42").unwrap(), 42);
		assert!(matches!(
			parse_u64("X", "forty-two"),
			Err(ConfigError::InvalidValue { .. })
		));
	}

	#[test]
	fn test_split_args() {
		assert_eq!(
			split_args("  --verbose   --delay-ratio 2 "),
			vec!["--verbose", "--delay-ratio", "2"]
		);
	}
}
