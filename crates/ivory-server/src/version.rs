// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Build information for `ivory-server version`.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PLATFORM: &str = env!("IVORY_PLATFORM");

pub fn format_version_info() -> String {
	format!(
		"ivory-server version: {VERSION}\n\
		 Platform:             {PLATFORM}"
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_version_info_names_binary_and_platform() {
		let info = format_version_info();
		assert!(info.starts_with("ivory-server version: "));
		assert!(info.contains(PLATFORM));
	}
}
