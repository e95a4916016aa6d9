// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Certificate metadata. The PEM bytes themselves live in file storage under
//! [`CertificateRecord::file_name`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertKind {
	ClientCa,
	ClientCert,
	ClientKey,
}

impl CertKind {
	pub const ALL: [CertKind; 3] = [CertKind::ClientCa, CertKind::ClientCert, CertKind::ClientKey];

	pub fn as_str(&self) -> &'static str {
		match self {
			CertKind::ClientCa => "client_ca",
			CertKind::ClientCert => "client_cert",
			CertKind::ClientKey => "client_key",
		}
	}
}

impl std::fmt::Display for CertKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for CertKind {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"client_ca" => Ok(CertKind::ClientCa),
			"client_cert" => Ok(CertKind::ClientCert),
			"client_key" => Ok(CertKind::ClientKey),
			_ => Err(format!("unknown certificate kind: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateRecord {
	pub cluster: String,
	pub kind: CertKind,
	pub file_name: String,
	/// Lowercase hex SHA-256 of the stored bytes.
	pub fingerprint: String,
	pub expires_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
}

type CertificateTuple = (
	String,
	String,
	String,
	String,
	Option<DateTime<Utc>>,
	DateTime<Utc>,
);

fn from_tuple(
	(cluster, kind, file_name, fingerprint, expires_at, created_at): CertificateTuple,
) -> Result<CertificateRecord> {
	Ok(CertificateRecord {
		kind: kind.parse().map_err(DbError::Internal)?,
		cluster,
		file_name,
		fingerprint,
		expires_at,
		created_at,
	})
}

#[derive(Clone)]
pub struct CertificateRepository {
	pool: SqlitePool,
}

impl CertificateRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, record), fields(cluster = %record.cluster, kind = %record.kind))]
	pub async fn upsert_certificate(&self, record: &CertificateRecord) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO certificates (cluster, kind, file_name, fingerprint, expires_at, created_at)
			VALUES (?, ?, ?, ?, ?, ?)
			ON CONFLICT(cluster, kind) DO UPDATE SET
				file_name = excluded.file_name,
				fingerprint = excluded.fingerprint,
				expires_at = excluded.expires_at,
				created_at = excluded.created_at
			"#,
		)
		.bind(&record.cluster)
		.bind(record.kind.as_str())
		.bind(&record.file_name)
		.bind(&record.fingerprint)
		.bind(record.expires_at)
		.bind(record.created_at)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_certificate(
		&self,
		cluster: &str,
		kind: CertKind,
	) -> Result<Option<CertificateRecord>> {
		let row = sqlx::query_as::<_, CertificateTuple>(
			r#"
			SELECT cluster, kind, file_name, fingerprint, expires_at, created_at
			FROM certificates WHERE cluster = ? AND kind = ?
			"#,
		)
		.bind(cluster)
		.bind(kind.as_str())
		.fetch_optional(&self.pool)
		.await?;

		row.map(from_tuple).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_certificates(&self, cluster: &str) -> Result<Vec<CertificateRecord>> {
		let rows = sqlx::query_as::<_, CertificateTuple>(
			r#"
			SELECT cluster, kind, file_name, fingerprint, expires_at, created_at
			FROM certificates WHERE cluster = ? ORDER BY kind
			"#,
		)
		.bind(cluster)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(from_tuple).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_all_certificates(&self) -> Result<Vec<CertificateRecord>> {
		let rows = sqlx::query_as::<_, CertificateTuple>(
			r#"
			SELECT cluster, kind, file_name, fingerprint, expires_at, created_at
			FROM certificates ORDER BY cluster, kind
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(from_tuple).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_certificate(&self, cluster: &str, kind: CertKind) -> Result<bool> {
		let result = sqlx::query("DELETE FROM certificates WHERE cluster = ? AND kind = ?")
			.bind(cluster)
			.bind(kind.as_str())
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}
}

#[async_trait]
pub trait CertificateStore: Send + Sync {
	async fn upsert_certificate(&self, record: &CertificateRecord) -> Result<()>;
	async fn get_certificate(&self, cluster: &str, kind: CertKind)
		-> Result<Option<CertificateRecord>>;
	async fn list_certificates(&self, cluster: &str) -> Result<Vec<CertificateRecord>>;
	async fn list_all_certificates(&self) -> Result<Vec<CertificateRecord>>;
	async fn delete_certificate(&self, cluster: &str, kind: CertKind) -> Result<bool>;
}

#[async_trait]
impl CertificateStore for CertificateRepository {
	async fn upsert_certificate(&self, record: &CertificateRecord) -> Result<()> {
		self.upsert_certificate(record).await
	}

	async fn get_certificate(
		&self,
		cluster: &str,
		kind: CertKind,
	) -> Result<Option<CertificateRecord>> {
		self.get_certificate(cluster, kind).await
	}

	async fn list_certificates(&self, cluster: &str) -> Result<Vec<CertificateRecord>> {
		self.list_certificates(cluster).await
	}

	async fn list_all_certificates(&self) -> Result<Vec<CertificateRecord>> {
		self.list_all_certificates().await
	}

	async fn delete_certificate(&self, cluster: &str, kind: CertKind) -> Result<bool> {
		self.delete_certificate(cluster, kind).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	fn make_record(cluster: &str, kind: CertKind) -> CertificateRecord {
		CertificateRecord {
			cluster: cluster.to_string(),
			kind,
			file_name: format!("{cluster}.{kind}.crt"),
			fingerprint: "ab".repeat(32),
			expires_at: None,
			created_at: Utc::now(),
		}
	}

	#[tokio::test]
	async fn test_kinds_are_independent() {
		let repo = CertificateRepository::new(create_test_pool().await);
		repo.upsert_certificate(&make_record("pg-prod", CertKind::ClientCa)).await.unwrap();
		repo.upsert_certificate(&make_record("pg-prod", CertKind::ClientKey)).await.unwrap();

		let kinds: Vec<CertKind> = repo
			.list_certificates("pg-prod")
			.await
			.unwrap()
			.into_iter()
			.map(|r| r.kind)
			.collect();
		assert_eq!(kinds, vec![CertKind::ClientCa, CertKind::ClientKey]);
		assert!(repo
			.get_certificate("pg-prod", CertKind::ClientCert)
			.await
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn test_delete_reports_whether_removed() {
		let repo = CertificateRepository::new(create_test_pool().await);
		repo.upsert_certificate(&make_record("pg-prod", CertKind::ClientCa)).await.unwrap();

		assert!(repo.delete_certificate("pg-prod", CertKind::ClientCa).await.unwrap());
		assert!(!repo.delete_certificate("pg-prod", CertKind::ClientCa).await.unwrap());
	}

	#[test]
	fn test_kind_roundtrips_through_str() {
		for kind in CertKind::ALL {
			assert_eq!(kind.as_str().parse::<CertKind>().unwrap(), kind);
		}
		assert!("server_cert".parse::<CertKind>().is_err());
	}
}
