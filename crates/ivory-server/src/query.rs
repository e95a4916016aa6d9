// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Saved queries and running them against a node.

use std::sync::Arc;

use chrono::Utc;
use ivory_server_db::{ClusterStore, QueryRecord, QueryStore};
use ivory_server_postgres::{DbTarget, PostgresGateway, QueryResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{ServerError, ServerResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQuery {
	pub cluster: String,
	pub name: String,
	pub sql: String,
	#[serde(default)]
	pub params: Vec<String>,
	#[serde(default)]
	pub description: Option<String>,
}

/// Fields left `None` keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryUpdate {
	pub name: Option<String>,
	pub sql: Option<String>,
	pub params: Option<Vec<String>>,
	pub description: Option<String>,
}

pub struct QueryService {
	queries: Arc<dyn QueryStore>,
	clusters: Arc<dyn ClusterStore>,
	postgres: Arc<PostgresGateway>,
}

impl QueryService {
	pub fn new(
		queries: Arc<dyn QueryStore>,
		clusters: Arc<dyn ClusterStore>,
		postgres: Arc<PostgresGateway>,
	) -> Self {
		Self {
			queries,
			clusters,
			postgres,
		}
	}

	#[instrument(skip(self, query), fields(cluster = %query.cluster, name = %query.name))]
	pub async fn create(&self, query: NewQuery) -> ServerResult<QueryRecord> {
		if self.clusters.get_cluster(&query.cluster).await?.is_none() {
			return Err(ServerError::ClusterNotFound(query.cluster));
		}
		validate(&query.name, &query.sql)?;

		let now = Utc::now();
		let record = QueryRecord {
			id: Uuid::new_v4().to_string(),
			cluster: query.cluster,
			name: query.name,
			sql: query.sql,
			params: query.params,
			description: query.description,
			created_at: now,
			updated_at: now,
		};
		self.queries.create_query(&record).await?;
		debug!(id = %record.id, "query saved");
		Ok(record)
	}

	#[instrument(skip(self, update))]
	pub async fn update(&self, id: &str, update: QueryUpdate) -> ServerResult<QueryRecord> {
		let mut record = self.get(id).await?;
		if let Some(name) = update.name {
			record.name = name;
		}
		if let Some(sql) = update.sql {
			record.sql = sql;
		}
		if let Some(params) = update.params {
			record.params = params;
		}
		if update.description.is_some() {
			record.description = update.description;
		}
		validate(&record.name, &record.sql)?;

		record.updated_at = Utc::now();
		self.queries.update_query(&record).await?;
		debug!("query updated");
		Ok(record)
	}

	pub async fn get(&self, id: &str) -> ServerResult<QueryRecord> {
		self.queries
			.get_query(id)
			.await?
			.ok_or_else(|| ServerError::QueryNotFound(id.to_string()))
	}

	pub async fn list(&self, cluster: &str) -> ServerResult<Vec<QueryRecord>> {
		Ok(self.queries.list_queries(cluster).await?)
	}

	pub async fn delete(&self, id: &str) -> ServerResult<bool> {
		Ok(self.queries.delete_query(id).await?)
	}

	#[instrument(skip(self))]
	pub async fn delete_all_for_cluster(&self, cluster: &str) -> ServerResult<u64> {
		let removed = self.queries.delete_queries_for_cluster(cluster).await?;
		debug!(removed, "queries deleted");
		Ok(removed)
	}

	/// Run saved query `id` on `target`. `params` replaces the saved
	/// defaults when given.
	#[instrument(skip(self, params), fields(target = %target))]
	pub async fn run(
		&self,
		id: &str,
		target: &DbTarget,
		params: Option<Vec<String>>,
	) -> ServerResult<QueryResult> {
		let query = self.get(id).await?;
		let cluster = self
			.clusters
			.get_cluster(&query.cluster)
			.await?
			.ok_or_else(|| ServerError::ClusterNotFound(query.cluster.clone()))?;

		let params = params.unwrap_or(query.params);
		Ok(self
			.postgres
			.execute(&cluster, target, &query.sql, &params)
			.await?)
	}
}

fn validate(name: &str, sql: &str) -> ServerResult<()> {
	if name.trim().is_empty() {
		return Err(ServerError::InvalidInput("query name must not be empty".to_string()));
	}
	if sql.trim().is_empty() {
		return Err(ServerError::InvalidInput("query sql must not be empty".to_string()));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_validate_rejects_blank() {
		assert!(validate("bloat", "SELECT 1").is_ok());
		assert!(matches!(validate(" ", "SELECT 1"), Err(ServerError::InvalidInput(_))));
		assert!(matches!(validate("bloat", "\n"), Err(ServerError::InvalidInput(_))));
	}
}
