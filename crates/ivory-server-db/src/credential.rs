// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Encrypted role passwords, one row per (cluster, role).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::Result;

/// Stored credential row. `ciphertext` is AES-GCM output under the master
/// secret identified by `secret_version`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CredentialRow {
	pub cluster: String,
	pub role: String,
	pub ciphertext: Vec<u8>,
	pub nonce: Vec<u8>,
	pub secret_version: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CredentialRepository {
	pool: SqlitePool,
}

impl CredentialRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, row), fields(cluster = %row.cluster, role = %row.role, secret_version = row.secret_version))]
	pub async fn upsert_credential(&self, row: &CredentialRow) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO credentials (cluster, role, ciphertext, nonce, secret_version, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(cluster, role) DO UPDATE SET
				ciphertext = excluded.ciphertext,
				nonce = excluded.nonce,
				secret_version = excluded.secret_version,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(&row.cluster)
		.bind(&row.role)
		.bind(&row.ciphertext)
		.bind(&row.nonce)
		.bind(row.secret_version)
		.bind(row.created_at)
		.bind(row.updated_at)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_credential(&self, cluster: &str, role: &str) -> Result<Option<CredentialRow>> {
		let row = sqlx::query_as::<_, CredentialRow>(
			r#"
			SELECT cluster, role, ciphertext, nonce, secret_version, created_at, updated_at
			FROM credentials WHERE cluster = ? AND role = ?
			"#,
		)
		.bind(cluster)
		.bind(role)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row)
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_credentials(&self, cluster: &str) -> Result<Vec<CredentialRow>> {
		let rows = sqlx::query_as::<_, CredentialRow>(
			r#"
			SELECT cluster, role, ciphertext, nonce, secret_version, created_at, updated_at
			FROM credentials WHERE cluster = ? ORDER BY role
			"#,
		)
		.bind(cluster)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows)
	}

	/// Every credential across clusters, used by re-encryption.
	#[tracing::instrument(skip(self))]
	pub async fn list_all_credentials(&self) -> Result<Vec<CredentialRow>> {
		let rows = sqlx::query_as::<_, CredentialRow>(
			r#"
			SELECT cluster, role, ciphertext, nonce, secret_version, created_at, updated_at
			FROM credentials ORDER BY cluster, role
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows)
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_credential(&self, cluster: &str, role: &str) -> Result<bool> {
		let result = sqlx::query("DELETE FROM credentials WHERE cluster = ? AND role = ?")
			.bind(cluster)
			.bind(role)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_credentials_for_cluster(&self, cluster: &str) -> Result<u64> {
		let result = sqlx::query("DELETE FROM credentials WHERE cluster = ?")
			.bind(cluster)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
	async fn upsert_credential(&self, row: &CredentialRow) -> Result<()>;
	async fn get_credential(&self, cluster: &str, role: &str) -> Result<Option<CredentialRow>>;
	async fn list_credentials(&self, cluster: &str) -> Result<Vec<CredentialRow>>;
	async fn list_all_credentials(&self) -> Result<Vec<CredentialRow>>;
	async fn delete_credential(&self, cluster: &str, role: &str) -> Result<bool>;
	async fn delete_credentials_for_cluster(&self, cluster: &str) -> Result<u64>;
}

#[async_trait]
impl CredentialStore for CredentialRepository {
	async fn upsert_credential(&self, row: &CredentialRow) -> Result<()> {
		self.upsert_credential(row).await
	}

	async fn get_credential(&self, cluster: &str, role: &str) -> Result<Option<CredentialRow>> {
		self.get_credential(cluster, role).await
	}

	async fn list_credentials(&self, cluster: &str) -> Result<Vec<CredentialRow>> {
		self.list_credentials(cluster).await
	}

	async fn list_all_credentials(&self) -> Result<Vec<CredentialRow>> {
		self.list_all_credentials().await
	}

	async fn delete_credential(&self, cluster: &str, role: &str) -> Result<bool> {
		self.delete_credential(cluster, role).await
	}

	async fn delete_credentials_for_cluster(&self, cluster: &str) -> Result<u64> {
		self.delete_credentials_for_cluster(cluster).await
	}
}
