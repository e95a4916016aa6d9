// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! External bloat/compaction tool invocation.
//!
//! The tool is treated as a pluggable command. Connection arguments
//! (`--host`, `--port`, `--user`, `--dbname`) are appended by the bloat
//! service; `args` are inserted before them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_command() -> String {
	"pgcompacttable".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompactionConfigLayer {
	pub command: Option<String>,
	pub args: Option<Vec<String>>,
	pub timeout_secs: Option<u64>,
}

impl CompactionConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.command.is_some() {
			self.command = other.command;
		}
		if other.args.is_some() {
			self.args = other.args;
		}
		if other.timeout_secs.is_some() {
			self.timeout_secs = other.timeout_secs;
		}
	}

	pub fn finalize(self) -> CompactionConfig {
		CompactionConfig {
			command: self.command.unwrap_or_else(default_command),
			args: self.args.unwrap_or_default(),
			timeout: self
				.timeout_secs
				.filter(|secs| *secs > 0)
				.map(Duration::from_secs),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompactionConfig {
	pub command: String,
	pub args: Vec<String>,
	/// `None` lets a run continue until it exits or is stopped.
	pub timeout: Option<Duration>,
}

impl Default for CompactionConfig {
	fn default() -> Self {
		CompactionConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = CompactionConfig::default();
		assert_eq!(config.command, "pgcompacttable");
		assert!(config.args.is_empty());
		assert!(config.timeout.is_none());
	}

	#[test]
	fn test_zero_timeout_means_unbounded() {
		let config = CompactionConfigLayer {
			timeout_secs: Some(0),
			..Default::default()
		}
		.finalize();
		assert!(config.timeout.is_none());
	}
}
