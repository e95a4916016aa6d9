// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Append-only records of compaction runs. Output lives in file storage
//! keyed by the record id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceStatus {
	Finished,
	Failed,
	Stopped,
}

impl MaintenanceStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			MaintenanceStatus::Finished => "finished",
			MaintenanceStatus::Failed => "failed",
			MaintenanceStatus::Stopped => "stopped",
		}
	}
}

impl std::str::FromStr for MaintenanceStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"finished" => Ok(MaintenanceStatus::Finished),
			"failed" => Ok(MaintenanceStatus::Failed),
			"stopped" => Ok(MaintenanceStatus::Stopped),
			_ => Err(format!("unknown maintenance status: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceLogRecord {
	pub id: String,
	pub cluster: String,
	/// Command line as executed, without the password.
	pub command: String,
	pub status: MaintenanceStatus,
	pub exit_code: Option<i32>,
	pub started_at: DateTime<Utc>,
	pub finished_at: DateTime<Utc>,
}

type LogTuple = (
	String,
	String,
	String,
	String,
	Option<i32>,
	DateTime<Utc>,
	DateTime<Utc>,
);

fn from_tuple(
	(id, cluster, command, status, exit_code, started_at, finished_at): LogTuple,
) -> Result<MaintenanceLogRecord> {
	Ok(MaintenanceLogRecord {
		status: status.parse().map_err(DbError::Internal)?,
		id,
		cluster,
		command,
		exit_code,
		started_at,
		finished_at,
	})
}

#[derive(Clone)]
pub struct MaintenanceLogRepository {
	pool: SqlitePool,
}

impl MaintenanceLogRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, record), fields(log_id = %record.id, cluster = %record.cluster, status = record.status.as_str()))]
	pub async fn append_log(&self, record: &MaintenanceLogRecord) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO maintenance_logs (id, cluster, command, status, exit_code, started_at, finished_at)
			VALUES (?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&record.id)
		.bind(&record.cluster)
		.bind(&record.command)
		.bind(record.status.as_str())
		.bind(record.exit_code)
		.bind(record.started_at)
		.bind(record.finished_at)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_log(&self, id: &str) -> Result<Option<MaintenanceLogRecord>> {
		let row = sqlx::query_as::<_, LogTuple>(
			r#"
			SELECT id, cluster, command, status, exit_code, started_at, finished_at
			FROM maintenance_logs WHERE id = ?
			"#,
		)
		.bind(id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(from_tuple).transpose()
	}

	/// Newest first.
	#[tracing::instrument(skip(self))]
	pub async fn list_logs(&self, cluster: &str) -> Result<Vec<MaintenanceLogRecord>> {
		let rows = sqlx::query_as::<_, LogTuple>(
			r#"
			SELECT id, cluster, command, status, exit_code, started_at, finished_at
			FROM maintenance_logs WHERE cluster = ? ORDER BY started_at DESC
			"#,
		)
		.bind(cluster)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(from_tuple).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_log(&self, id: &str) -> Result<bool> {
		let result = sqlx::query("DELETE FROM maintenance_logs WHERE id = ?")
			.bind(id)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}
}

#[async_trait]
pub trait MaintenanceLogStore: Send + Sync {
	async fn append_log(&self, record: &MaintenanceLogRecord) -> Result<()>;
	async fn get_log(&self, id: &str) -> Result<Option<MaintenanceLogRecord>>;
	async fn list_logs(&self, cluster: &str) -> Result<Vec<MaintenanceLogRecord>>;
	async fn delete_log(&self, id: &str) -> Result<bool>;
}

#[async_trait]
impl MaintenanceLogStore for MaintenanceLogRepository {
	async fn append_log(&self, record: &MaintenanceLogRecord) -> Result<()> {
		self.append_log(record).await
	}

	async fn get_log(&self, id: &str) -> Result<Option<MaintenanceLogRecord>> {
		self.get_log(id).await
	}

	async fn list_logs(&self, cluster: &str) -> Result<Vec<MaintenanceLogRecord>> {
		self.list_logs(cluster).await
	}

	async fn delete_log(&self, id: &str) -> Result<bool> {
		self.delete_log(id).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	fn make_log(id: &str, cluster: &str, minutes_ago: i64, status: MaintenanceStatus) -> MaintenanceLogRecord {
		let started_at = Utc::now() - chrono::Duration::minutes(minutes_ago);
		MaintenanceLogRecord {
			id: id.to_string(),
			cluster: cluster.to_string(),
			command: "pgcompacttable --host 10.0.0.1".to_string(),
			status,
			exit_code: Some(0),
			started_at,
			finished_at: started_at + chrono::Duration::seconds(30),
		}
	}

	#[tokio::test]
	async fn test_list_newest_first() {
		let repo = MaintenanceLogRepository::new(create_test_pool().await);
		repo
			.append_log(&make_log("old", "pg-prod", 60, MaintenanceStatus::Finished))
			.await
			.unwrap();
		repo
			.append_log(&make_log("new", "pg-prod", 1, MaintenanceStatus::Failed))
			.await
			.unwrap();

		let logs = repo.list_logs("pg-prod").await.unwrap();
		assert_eq!(logs[0].id, "new");
		assert_eq!(logs[0].status, MaintenanceStatus::Failed);
		assert_eq!(logs[1].id, "old");
	}

	#[tokio::test]
	async fn test_append_is_not_an_upsert() {
		let repo = MaintenanceLogRepository::new(create_test_pool().await);
		let log = make_log("run-1", "pg-prod", 1, MaintenanceStatus::Finished);
		repo.append_log(&log).await.unwrap();

		assert!(repo.append_log(&log).await.is_err());
	}

	#[tokio::test]
	async fn test_delete_log() {
		let repo = MaintenanceLogRepository::new(create_test_pool().await);
		repo
			.append_log(&make_log("run-1", "pg-prod", 1, MaintenanceStatus::Stopped))
			.await
			.unwrap();

		assert!(repo.delete_log("run-1").await.unwrap());
		assert!(repo.get_log("run-1").await.unwrap().is_none());
		assert!(!repo.delete_log("run-1").await.unwrap());
	}
}
