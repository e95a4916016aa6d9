// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! On-disk locations for certificate bytes and compaction logs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_data_dir() -> String {
	"./data".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PathsConfigLayer {
	pub data_dir: Option<String>,
	pub cert_dir: Option<String>,
	pub log_dir: Option<String>,
}

impl PathsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.data_dir.is_some() {
			self.data_dir = other.data_dir;
		}
		if other.cert_dir.is_some() {
			self.cert_dir = other.cert_dir;
		}
		if other.log_dir.is_some() {
			self.log_dir = other.log_dir;
		}
	}

	pub fn finalize(self) -> PathsConfig {
		let data_dir = PathBuf::from(self.data_dir.unwrap_or_else(default_data_dir));
		PathsConfig {
			cert_dir: self
				.cert_dir
				.map(PathBuf::from)
				.unwrap_or_else(|| data_dir.join("cert")),
			log_dir: self
				.log_dir
				.map(PathBuf::from)
				.unwrap_or_else(|| data_dir.join("pgcompacttable")),
			data_dir,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathsConfig {
	pub data_dir: PathBuf,
	pub cert_dir: PathBuf,
	pub log_dir: PathBuf,
}

impl Default for PathsConfig {
	fn default() -> Self {
		PathsConfigLayer::default().finalize()
	}
}
