// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::SqlitePool;

use crate::error::DbError;

const INITIAL: &str = include_str!("../migrations/001_initial.sql");

/// Create every metadata table. Safe to run on each start.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
	for stmt in INITIAL.split(';').filter(|s| !s.trim().is_empty()) {
		sqlx::query(stmt).execute(pool).await?;
	}
	tracing::debug!("migrations applied");
	Ok(())
}
