// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Saved SQL queries scoped to a cluster.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
	pub id: String,
	pub cluster: String,
	pub name: String,
	pub sql: String,
	/// Default positional parameters, bound as `$1`, `$2`, ...
	pub params: Vec<String>,
	pub description: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct QueryRow {
	id: String,
	cluster: String,
	name: String,
	sql_text: String,
	params: String,
	description: Option<String>,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

impl TryFrom<QueryRow> for QueryRecord {
	type Error = DbError;

	fn try_from(row: QueryRow) -> Result<Self> {
		Ok(QueryRecord {
			params: serde_json::from_str(&row.params)?,
			id: row.id,
			cluster: row.cluster,
			name: row.name,
			sql: row.sql_text,
			description: row.description,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}

const SELECT_COLUMNS: &str =
	"SELECT id, cluster, name, sql_text, params, description, created_at, updated_at FROM queries";

#[derive(Clone)]
pub struct QueryRepository {
	pool: SqlitePool,
}

impl QueryRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, query), fields(query_id = %query.id, cluster = %query.cluster))]
	pub async fn create_query(&self, query: &QueryRecord) -> Result<()> {
		let params = serde_json::to_string(&query.params)?;
		let result = sqlx::query(
			r#"
			INSERT INTO queries (id, cluster, name, sql_text, params, description, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&query.id)
		.bind(&query.cluster)
		.bind(&query.name)
		.bind(&query.sql)
		.bind(&params)
		.bind(&query.description)
		.bind(query.created_at)
		.bind(query.updated_at)
		.execute(&self.pool)
		.await;

		match result {
			Ok(_) => Ok(()),
			Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
				Err(DbError::Conflict(format!("query {} already exists", query.id)))
			}
			Err(e) => Err(e.into()),
		}
	}

	#[tracing::instrument(skip(self, query), fields(query_id = %query.id))]
	pub async fn update_query(&self, query: &QueryRecord) -> Result<()> {
		let params = serde_json::to_string(&query.params)?;
		let result = sqlx::query(
			r#"
			UPDATE queries
			SET name = ?, sql_text = ?, params = ?, description = ?, updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(&query.name)
		.bind(&query.sql)
		.bind(&params)
		.bind(&query.description)
		.bind(query.updated_at)
		.bind(&query.id)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(query.id.clone()));
		}
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_query(&self, id: &str) -> Result<Option<QueryRecord>> {
		let row = sqlx::query_as::<_, QueryRow>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
			.bind(id)
			.fetch_optional(&self.pool)
			.await?;

		row.map(QueryRecord::try_from).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_queries(&self, cluster: &str) -> Result<Vec<QueryRecord>> {
		let rows = sqlx::query_as::<_, QueryRow>(&format!(
			"{SELECT_COLUMNS} WHERE cluster = ? ORDER BY name, id"
		))
		.bind(cluster)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(QueryRecord::try_from).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_query(&self, id: &str) -> Result<bool> {
		let result = sqlx::query("DELETE FROM queries WHERE id = ?")
			.bind(id)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_queries_for_cluster(&self, cluster: &str) -> Result<u64> {
		let result = sqlx::query("DELETE FROM queries WHERE cluster = ?")
			.bind(cluster)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}
}

#[async_trait]
pub trait QueryStore: Send + Sync {
	async fn create_query(&self, query: &QueryRecord) -> Result<()>;
	async fn update_query(&self, query: &QueryRecord) -> Result<()>;
	async fn get_query(&self, id: &str) -> Result<Option<QueryRecord>>;
	async fn list_queries(&self, cluster: &str) -> Result<Vec<QueryRecord>>;
	async fn delete_query(&self, id: &str) -> Result<bool>;
	async fn delete_queries_for_cluster(&self, cluster: &str) -> Result<u64>;
}

#[async_trait]
impl QueryStore for QueryRepository {
	async fn create_query(&self, query: &QueryRecord) -> Result<()> {
		self.create_query(query).await
	}

	async fn update_query(&self, query: &QueryRecord) -> Result<()> {
		self.update_query(query).await
	}

	async fn get_query(&self, id: &str) -> Result<Option<QueryRecord>> {
		self.get_query(id).await
	}

	async fn list_queries(&self, cluster: &str) -> Result<Vec<QueryRecord>> {
		self.list_queries(cluster).await
	}

	async fn delete_query(&self, id: &str) -> Result<bool> {
		self.delete_query(id).await
	}

	async fn delete_queries_for_cluster(&self, cluster: &str) -> Result<u64> {
		self.delete_queries_for_cluster(cluster).await
	}
}
