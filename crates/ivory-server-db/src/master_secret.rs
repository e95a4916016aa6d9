// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted master secret versions.
//!
//! Only the salt and a check value are stored. The check value is a fixed
//! plaintext encrypted under the derived key, so a passphrase can be
//! verified at startup without ever writing it down.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MasterSecretRow {
	pub version: i64,
	pub salt: Vec<u8>,
	pub check_ciphertext: Vec<u8>,
	pub check_nonce: Vec<u8>,
	pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct MasterSecretRepository {
	pool: SqlitePool,
}

impl MasterSecretRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Versions are write-once; inserting an existing version is a conflict.
	#[tracing::instrument(skip(self, row), fields(version = row.version))]
	pub async fn insert_version(&self, row: &MasterSecretRow) -> Result<()> {
		let result = sqlx::query(
			r#"
			INSERT INTO master_secret_versions (version, salt, check_ciphertext, check_nonce, created_at)
			VALUES (?, ?, ?, ?, ?)
			"#,
		)
		.bind(row.version)
		.bind(&row.salt)
		.bind(&row.check_ciphertext)
		.bind(&row.check_nonce)
		.bind(row.created_at)
		.execute(&self.pool)
		.await;

		match result {
			Ok(_) => Ok(()),
			Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(DbError::Conflict(
				format!("master secret version {} already exists", row.version),
			)),
			Err(e) => Err(e.into()),
		}
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_latest(&self) -> Result<Option<MasterSecretRow>> {
		let row = sqlx::query_as::<_, MasterSecretRow>(
			r#"
			SELECT version, salt, check_ciphertext, check_nonce, created_at
			FROM master_secret_versions ORDER BY version DESC LIMIT 1
			"#,
		)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row)
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_version(&self, version: i64) -> Result<Option<MasterSecretRow>> {
		let row = sqlx::query_as::<_, MasterSecretRow>(
			r#"
			SELECT version, salt, check_ciphertext, check_nonce, created_at
			FROM master_secret_versions WHERE version = ?
			"#,
		)
		.bind(version)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row)
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_all_versions(&self) -> Result<u64> {
		let result = sqlx::query("DELETE FROM master_secret_versions")
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}
}

#[async_trait]
pub trait MasterSecretStore: Send + Sync {
	async fn insert_version(&self, row: &MasterSecretRow) -> Result<()>;
	async fn get_latest(&self) -> Result<Option<MasterSecretRow>>;
	async fn get_version(&self, version: i64) -> Result<Option<MasterSecretRow>>;
	async fn delete_all_versions(&self) -> Result<u64>;
}

#[async_trait]
impl MasterSecretStore for MasterSecretRepository {
	async fn insert_version(&self, row: &MasterSecretRow) -> Result<()> {
		self.insert_version(row).await
	}

	async fn get_latest(&self) -> Result<Option<MasterSecretRow>> {
		self.get_latest().await
	}

	async fn get_version(&self, version: i64) -> Result<Option<MasterSecretRow>> {
		self.get_version(version).await
	}

	async fn delete_all_versions(&self) -> Result<u64> {
		self.delete_all_versions().await
	}
}
