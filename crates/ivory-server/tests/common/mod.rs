// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use ivory_common_secret::SecretString;
use ivory_server::{create_app_state_with_kdf, AppState, ClusterSpec};
use ivory_server_config::{CompactionConfig, PathsConfig, ServerConfig};
use ivory_server_db::testing::create_test_pool;
use ivory_server_db::{ClusterTls, NodeAddress};
use ivory_server_secrets::KdfParams;
use tempfile::TempDir;

pub const MASTER: &str = "correct horse battery staple";

pub const TEST_PEM: &[u8] =
	b"-----BEGIN CERTIFICATE-----\nMIIBszCCAVmgAwIBAgIUW2Fr\n-----END CERTIFICATE-----\n";

pub struct TestApp {
	pub state: AppState,
	pub dir: TempDir,
}

pub async fn test_app() -> TestApp {
	test_app_with(CompactionConfig::default()).await
}

fn config_for(dir: &TempDir, compaction: CompactionConfig, master: &str) -> ServerConfig {
	ServerConfig {
		paths: PathsConfig {
			data_dir: dir.path().to_path_buf(),
			cert_dir: dir.path().join("cert"),
			log_dir: dir.path().join("logs"),
		},
		compaction,
		master_secret: Some(SecretString::from(master)),
		..Default::default()
	}
}

pub async fn test_app_with(compaction: CompactionConfig) -> TestApp {
	let dir = tempfile::tempdir().unwrap();
	let config = config_for(&dir, compaction, MASTER);

	let state = create_app_state_with_kdf(create_test_pool().await, &config, KdfParams::insecure_fast())
		.await
		.unwrap();
	TestApp { state, dir }
}

/// A fresh state over the same database and directories, started with
/// `master` as the configured passphrase.
pub async fn restart_with(app: &TestApp, master: &str) -> AppState {
	let config = config_for(&app.dir, CompactionConfig::default(), master);
	create_app_state_with_kdf(app.state.pool.clone(), &config, KdfParams::insecure_fast())
		.await
		.unwrap()
}

/// A compaction command running `script` under `sh -c`. The connection
/// arguments land in `"$@"`.
pub fn shell_compaction(script: &str) -> CompactionConfig {
	CompactionConfig {
		command: "sh".to_string(),
		args: vec!["-c".to_string(), script.to_string(), "ivory-compact".to_string()],
		timeout: None,
	}
}

/// Nothing listens on port 1.
pub fn dead_node() -> NodeAddress {
	NodeAddress::new("127.0.0.1", 1)
}

pub fn cluster_spec(name: &str, nodes: Vec<NodeAddress>, tags: &[&str]) -> ClusterSpec {
	ClusterSpec {
		name: name.to_string(),
		nodes,
		tags: tags.iter().map(|t| t.to_string()).collect(),
		tls: ClusterTls::default(),
	}
}
