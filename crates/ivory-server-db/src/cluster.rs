// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cluster definitions: name, sidecar node addresses and TLS flags.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};

/// Address of a node's sidecar agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
	pub host: String,
	pub port: u16,
}

impl NodeAddress {
	pub const DEFAULT_SIDECAR_PORT: u16 = 8008;

	pub fn new(host: impl Into<String>, port: u16) -> Self {
		Self {
			host: host.into(),
			port,
		}
	}
}

impl fmt::Display for NodeAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.host, self.port)
	}
}

impl FromStr for NodeAddress {
	type Err = String;

	/// Accepts `host:port` or a bare host, which gets the Patroni REST port.
	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err("empty node address".to_string());
		}
		match s.rsplit_once(':') {
			Some((host, port)) if !host.is_empty() => {
				let port = port
					.parse::<u16>()
					.map_err(|_| format!("invalid port in node address: {s}"))?;
				Ok(NodeAddress::new(host, port))
			}
			Some(_) => Err(format!("missing host in node address: {s}")),
			None => Ok(NodeAddress::new(s, Self::DEFAULT_SIDECAR_PORT)),
		}
	}
}

/// Whether sidecar and database connections use TLS with the cluster's certificates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTls {
	pub sidecar: bool,
	pub database: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
	pub name: String,
	pub nodes: Vec<NodeAddress>,
	pub tls: ClusterTls,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ClusterRow {
	name: String,
	nodes: String,
	sidecar_tls: bool,
	database_tls: bool,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

impl TryFrom<ClusterRow> for Cluster {
	type Error = DbError;

	fn try_from(row: ClusterRow) -> Result<Self> {
		Ok(Cluster {
			nodes: serde_json::from_str(&row.nodes)?,
			name: row.name,
			tls: ClusterTls {
				sidecar: row.sidecar_tls,
				database: row.database_tls,
			},
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}

#[derive(Clone)]
pub struct ClusterRepository {
	pool: SqlitePool,
}

impl ClusterRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Insert or replace a definition. `created_at` survives updates.
	#[tracing::instrument(skip(self, cluster), fields(cluster = %cluster.name))]
	pub async fn upsert_cluster(&self, cluster: &Cluster) -> Result<()> {
		let nodes = serde_json::to_string(&cluster.nodes)?;
		sqlx::query(
			r#"
			INSERT INTO clusters (name, nodes, sidecar_tls, database_tls, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?)
			ON CONFLICT(name) DO UPDATE SET
				nodes = excluded.nodes,
				sidecar_tls = excluded.sidecar_tls,
				database_tls = excluded.database_tls,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(&cluster.name)
		.bind(&nodes)
		.bind(cluster.tls.sidecar)
		.bind(cluster.tls.database)
		.bind(cluster.created_at)
		.bind(cluster.updated_at)
		.execute(&self.pool)
		.await?;

		tracing::debug!(nodes = cluster.nodes.len(), "cluster stored");
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>> {
		let row = sqlx::query_as::<_, ClusterRow>(
			"SELECT name, nodes, sidecar_tls, database_tls, created_at, updated_at FROM clusters WHERE name = ?",
		)
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;

		row.map(Cluster::try_from).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_clusters(&self) -> Result<Vec<Cluster>> {
		let rows = sqlx::query_as::<_, ClusterRow>(
			"SELECT name, nodes, sidecar_tls, database_tls, created_at, updated_at FROM clusters ORDER BY name",
		)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(Cluster::try_from).collect()
	}

	/// Returns true if a row was removed.
	#[tracing::instrument(skip(self))]
	pub async fn delete_cluster(&self, name: &str) -> Result<bool> {
		let result = sqlx::query("DELETE FROM clusters WHERE name = ?")
			.bind(name)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}
}

#[async_trait]
pub trait ClusterStore: Send + Sync {
	async fn upsert_cluster(&self, cluster: &Cluster) -> Result<()>;
	async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>>;
	async fn list_clusters(&self) -> Result<Vec<Cluster>>;
	async fn delete_cluster(&self, name: &str) -> Result<bool>;
}

#[async_trait]
impl ClusterStore for ClusterRepository {
	async fn upsert_cluster(&self, cluster: &Cluster) -> Result<()> {
		self.upsert_cluster(cluster).await
	}

	async fn get_cluster(&self, name: &str) -> Result<Option<Cluster>> {
		self.get_cluster(name).await
	}

	async fn list_clusters(&self) -> Result<Vec<Cluster>> {
		self.list_clusters().await
	}

	async fn delete_cluster(&self, name: &str) -> Result<bool> {
		self.delete_cluster(name).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	fn make_cluster(name: &str, hosts: &[&str]) -> Cluster {
		let now = Utc::now();
		Cluster {
			name: name.to_string(),
			nodes: hosts.iter().map(|h| NodeAddress::new(*h, 8008)).collect(),
			tls: ClusterTls::default(),
			created_at: now,
			updated_at: now,
		}
	}

	#[tokio::test]
	async fn test_upsert_and_get() {
		let repo = ClusterRepository::new(create_test_pool().await);
		let cluster = make_cluster("pg-prod", &["10.0.0.1", "10.0.0.2"]);
		repo.upsert_cluster(&cluster).await.unwrap();

		let fetched = repo.get_cluster("pg-prod").await.unwrap().unwrap();
		assert_eq!(fetched.nodes, cluster.nodes);
		assert!(!fetched.tls.sidecar);
	}

	#[tokio::test]
	async fn test_update_keeps_created_at() {
		let repo = ClusterRepository::new(create_test_pool().await);
		let original = make_cluster("pg-prod", &["10.0.0.1"]);
		repo.upsert_cluster(&original).await.unwrap();

		let updated = Cluster {
			nodes: vec![NodeAddress::new("10.0.0.9", 8009)],
			tls: ClusterTls {
				sidecar: true,
				database: false,
			},
			created_at: Utc::now() + chrono::Duration::hours(1),
			updated_at: Utc::now() + chrono::Duration::hours(1),
			..original.clone()
		};
		repo.upsert_cluster(&updated).await.unwrap();

		let fetched = repo.get_cluster("pg-prod").await.unwrap().unwrap();
		assert_eq!(fetched.nodes, vec![NodeAddress::new("10.0.0.9", 8009)]);
		assert!(fetched.tls.sidecar);
		assert_eq!(fetched.created_at, original.created_at);
	}

	#[tokio::test]
	async fn test_list_sorted_by_name() {
		let repo = ClusterRepository::new(create_test_pool().await);
		repo.upsert_cluster(&make_cluster("zeta", &["z"])).await.unwrap();
		repo.upsert_cluster(&make_cluster("alpha", &["a"])).await.unwrap();

		let names: Vec<String> = repo
			.list_clusters()
			.await
			.unwrap()
			.into_iter()
			.map(|c| c.name)
			.collect();
		assert_eq!(names, vec!["alpha", "zeta"]);
	}

	#[tokio::test]
	async fn test_delete_is_idempotent() {
		let repo = ClusterRepository::new(create_test_pool().await);
		repo.upsert_cluster(&make_cluster("pg-prod", &["a"])).await.unwrap();

		assert!(repo.delete_cluster("pg-prod").await.unwrap());
		assert!(!repo.delete_cluster("pg-prod").await.unwrap());
		assert!(repo.get_cluster("pg-prod").await.unwrap().is_none());
	}

	#[test]
	fn test_node_address_parsing() {
		assert_eq!(
			"10.0.0.1:8009".parse::<NodeAddress>().unwrap(),
			NodeAddress::new("10.0.0.1", 8009)
		);
		assert_eq!(
			"db-1.internal".parse::<NodeAddress>().unwrap(),
			NodeAddress::new("db-1.internal", 8008)
		);
		assert!(":8008".parse::<NodeAddress>().is_err());
		assert!("host:notaport".parse::<NodeAddress>().is_err());
		assert!("".parse::<NodeAddress>().is_err());
	}
}
