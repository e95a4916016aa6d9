// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Composition root: stores, then gateways, then services.

use std::sync::Arc;

use ivory_server_certs::CertService;
use ivory_server_config::ServerConfig;
use ivory_server_db::{
	CertificateRepository, ClusterRepository, ClusterStore, CredentialRepository,
	MaintenanceLogRepository, MasterSecretRepository, QueryRepository, TagRepository, TagStore,
};
use ivory_server_files::{LocalFileGateway, CERT_SUFFIX, LOG_SUFFIX};
use ivory_server_postgres::{PostgresGateway, PostgresGatewayConfig};
use ivory_server_secrets::{KdfParams, PasswordService, SecretService};
use ivory_server_sidecar::{PatroniGateway, SidecarClient, SidecarClientConfig};
use sqlx::SqlitePool;
use tracing::info;

use crate::bloat::{BloatConfig, BloatService};
use crate::cluster::ClusterService;
use crate::erase::EraseService;
use crate::error::{ServerError, ServerResult};
use crate::query::QueryService;

#[derive(Clone)]
pub struct AppState {
	pub pool: SqlitePool,
	pub secrets: Arc<SecretService>,
	pub passwords: Arc<PasswordService>,
	pub certs: Arc<CertService>,
	pub patroni: Arc<PatroniGateway>,
	pub postgres: Arc<PostgresGateway>,
	pub clusters: Arc<ClusterService>,
	pub bloat: Arc<BloatService>,
	pub queries: Arc<QueryService>,
	pub erase: Arc<EraseService>,
}

/// Build the application state and activate the configured master secret.
pub async fn create_app_state(pool: SqlitePool, config: &ServerConfig) -> ServerResult<AppState> {
	create_app_state_with_kdf(pool, config, KdfParams::default()).await
}

/// As [`create_app_state`] with explicit key-derivation cost.
pub async fn create_app_state_with_kdf(
	pool: SqlitePool,
	config: &ServerConfig,
	kdf: KdfParams,
) -> ServerResult<AppState> {
	// Stores
	let cluster_store: Arc<dyn ClusterStore> = Arc::new(ClusterRepository::new(pool.clone()));
	let tag_store: Arc<dyn TagStore> = Arc::new(TagRepository::new(pool.clone()));
	let cert_files = Arc::new(LocalFileGateway::new(&config.paths.cert_dir, CERT_SUFFIX).await?);
	let log_files = Arc::new(LocalFileGateway::new(&config.paths.log_dir, LOG_SUFFIX).await?);

	// Secrets and certificates
	let secrets = Arc::new(SecretService::new(
		Arc::new(MasterSecretRepository::new(pool.clone())),
		kdf,
	));
	let passwords = Arc::new(PasswordService::new(
		Arc::new(CredentialRepository::new(pool.clone())),
		secrets.clone(),
	));
	let certs = Arc::new(CertService::new(
		Arc::new(CertificateRepository::new(pool.clone())),
		cert_files,
	));

	// Gateways
	let sidecar = SidecarClient::new(
		SidecarClientConfig {
			request_timeout: config.sidecar.request_timeout,
			connect_timeout: config.sidecar.connect_timeout,
		},
		passwords.clone(),
		certs.clone(),
	)
	.map_err(|e| ServerError::Internal(format!("failed to build sidecar client: {e}")))?;
	let patroni = Arc::new(PatroniGateway::new(Arc::new(sidecar)));
	let postgres = Arc::new(PostgresGateway::new(
		PostgresGatewayConfig {
			connect_timeout: config.postgres.connect_timeout,
			query_timeout: config.postgres.query_timeout,
			default_database: config.postgres.default_database.clone(),
		},
		passwords.clone(),
		certs.clone(),
	));

	// Services
	let clusters = Arc::new(ClusterService::new(
		cluster_store.clone(),
		tag_store.clone(),
		patroni.clone(),
	));
	let bloat = Arc::new(BloatService::new(
		cluster_store.clone(),
		Arc::new(MaintenanceLogRepository::new(pool.clone())),
		log_files,
		passwords.clone(),
		BloatConfig::from(&config.compaction),
	));
	let queries = Arc::new(QueryService::new(
		Arc::new(QueryRepository::new(pool.clone())),
		cluster_store,
		postgres.clone(),
	));
	let erase = Arc::new(EraseService::new(
		passwords.clone(),
		certs.clone(),
		tag_store,
		bloat.clone(),
		queries.clone(),
		clusters.clone(),
		secrets.clone(),
	));

	if let Some(passphrase) = &config.master_secret {
		let active = secrets.load(passphrase).await?;
		info!(version = active.version(), "master secret active");
	} else {
		info!("no master secret configured; credential operations are unavailable");
	}

	Ok(AppState {
		pool,
		secrets,
		passwords,
		certs,
		patroni,
		postgres,
		clusters,
		bloat,
		queries,
		erase,
	})
}
