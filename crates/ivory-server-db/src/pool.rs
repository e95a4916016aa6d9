// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::error::DbError;

const MAX_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the metadata database, creating the file if needed.
///
/// WAL journaling lets compaction-log appends proceed while other
/// connections read.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("invalid database url {database_url:?}: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(BUSY_TIMEOUT)
		.create_if_missing(true);

	if let Some(parent) = options.get_filename().parent() {
		if !parent.as_os_str().is_empty() {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|e| DbError::Internal(format!("cannot create {}: {e}", parent.display())))?;
		}
	}

	let pool = SqlitePoolOptions::new()
		.max_connections(MAX_CONNECTIONS)
		.connect_with(options)
		.await?;

	tracing::debug!(max_connections = MAX_CONNECTIONS, "metadata database opened");
	Ok(pool)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::migrations::run_migrations;

	#[tokio::test]
	async fn test_creates_missing_directories() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("state").join("ivory.db");
		let pool = create_pool(&format!("sqlite:{}", path.display())).await.unwrap();
		run_migrations(&pool).await.unwrap();
		assert!(path.exists());
	}
}
