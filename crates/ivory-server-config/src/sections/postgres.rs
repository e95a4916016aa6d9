// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Direct Postgres connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PostgresConfigLayer {
	pub connect_timeout_secs: Option<u64>,
	pub query_timeout_secs: Option<u64>,
	pub default_database: Option<String>,
}

impl PostgresConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.connect_timeout_secs.is_some() {
			self.connect_timeout_secs = other.connect_timeout_secs;
		}
		if other.query_timeout_secs.is_some() {
			self.query_timeout_secs = other.query_timeout_secs;
		}
		if other.default_database.is_some() {
			self.default_database = other.default_database;
		}
	}

	pub fn finalize(self) -> PostgresConfig {
		PostgresConfig {
			connect_timeout: Duration::from_secs(self.connect_timeout_secs.unwrap_or(5)),
			query_timeout: Duration::from_secs(self.query_timeout_secs.unwrap_or(30)),
			default_database: self
				.default_database
				.unwrap_or_else(|| "postgres".to_string()),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostgresConfig {
	pub connect_timeout: Duration,
	/// Bound on each statement, enforced by the client and as `statement_timeout`.
	pub query_timeout: Duration,
	pub default_database: String,
}

impl Default for PostgresConfig {
	fn default() -> Self {
		PostgresConfigLayer::default().finalize()
	}
}
