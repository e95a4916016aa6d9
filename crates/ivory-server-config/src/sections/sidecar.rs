// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sidecar / Patroni HTTP client settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 3;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SidecarConfigLayer {
	pub request_timeout_secs: Option<u64>,
	pub connect_timeout_secs: Option<u64>,
}

impl SidecarConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.request_timeout_secs.is_some() {
			self.request_timeout_secs = other.request_timeout_secs;
		}
		if other.connect_timeout_secs.is_some() {
			self.connect_timeout_secs = other.connect_timeout_secs;
		}
	}

	pub fn finalize(self) -> SidecarConfig {
		SidecarConfig {
			request_timeout: Duration::from_secs(
				self
					.request_timeout_secs
					.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
			),
			connect_timeout: Duration::from_secs(
				self
					.connect_timeout_secs
					.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
			),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct SidecarConfig {
	/// Upper bound for a whole request, including the body read.
	pub request_timeout: Duration,
	pub connect_timeout: Duration,
}

impl Default for SidecarConfig {
	fn default() -> Self {
		SidecarConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = SidecarConfig::default();
		assert_eq!(config.request_timeout, Duration::from_secs(10));
		assert_eq!(config.connect_timeout, Duration::from_secs(3));
	}
}
