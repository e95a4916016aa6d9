// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

/// Failure to assemble a [`crate::ServerConfig`] from its layers.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// An environment override could not be parsed.
	#[error("{key}: {message}")]
	InvalidValue { key: String, message: String },

	#[error("config file {path} is not valid TOML: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("cannot read config file {path}: {source}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// The merged configuration is unusable.
	#[error("invalid configuration: {0}")]
	Validation(String),

	#[error("master secret: {0}")]
	Secret(#[from] crate::secret_env::SecretEnvError),
}
