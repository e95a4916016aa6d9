// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cluster definitions and their live state.

use std::sync::Arc;

use chrono::Utc;
use ivory_server_db::{Cluster, ClusterStore, ClusterTls, NodeAddress, TagStore};
use ivory_server_sidecar::{PatroniGateway, Topology};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::{ServerError, ServerResult};

/// Input for creating or updating a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
	pub name: String,
	pub nodes: Vec<NodeAddress>,
	#[serde(default)]
	pub tags: Vec<String>,
	#[serde(default)]
	pub tls: ClusterTls,
}

/// A stored cluster with its tags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterDefinition {
	#[serde(flatten)]
	pub cluster: Cluster,
	pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ClusterState {
	Live(Topology),
	/// The live query failed. The definition is still returned.
	Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterWithState {
	#[serde(flatten)]
	pub definition: ClusterDefinition,
	pub state: ClusterState,
}

pub struct ClusterService {
	clusters: Arc<dyn ClusterStore>,
	tags: Arc<dyn TagStore>,
	patroni: Arc<PatroniGateway>,
}

impl ClusterService {
	pub fn new(
		clusters: Arc<dyn ClusterStore>,
		tags: Arc<dyn TagStore>,
		patroni: Arc<PatroniGateway>,
	) -> Self {
		Self {
			clusters,
			tags,
			patroni,
		}
	}

	/// Create or replace a cluster definition and its tag set.
	#[instrument(skip(self, spec), fields(cluster = %spec.name, nodes = spec.nodes.len()))]
	pub async fn upsert(&self, spec: ClusterSpec) -> ServerResult<ClusterDefinition> {
		validate_cluster_name(&spec.name)?;
		if spec.nodes.is_empty() {
			return Err(ServerError::InvalidInput(format!(
				"cluster {} needs at least one node",
				spec.name
			)));
		}

		let now = Utc::now();
		let cluster = Cluster {
			name: spec.name,
			nodes: spec.nodes,
			tls: spec.tls,
			created_at: now,
			updated_at: now,
		};
		self.clusters.upsert_cluster(&cluster).await?;
		self.tags.set_tags(&cluster.name, &spec.tags).await?;

		debug!("cluster saved");
		self.get_definition(&cluster.name).await
	}

	pub async fn get(&self, name: &str) -> ServerResult<Cluster> {
		self.clusters
			.get_cluster(name)
			.await?
			.ok_or_else(|| ServerError::ClusterNotFound(name.to_string()))
	}

	pub async fn get_definition(&self, name: &str) -> ServerResult<ClusterDefinition> {
		let cluster = self.get(name).await?;
		let tags = self.tags.get_tags(name).await?;
		Ok(ClusterDefinition { cluster, tags })
	}

	/// Definition plus live topology. A failed topology read degrades to
	/// [`ClusterState::Unavailable`] instead of failing the call.
	#[instrument(skip(self))]
	pub async fn get_with_state(&self, name: &str) -> ServerResult<ClusterWithState> {
		let definition = self.get_definition(name).await?;
		let state = match self.patroni.get_state(&definition.cluster).await {
			Ok(topology) => ClusterState::Live(topology),
			Err(e) => {
				warn!(error = %e, "cluster state unavailable");
				ClusterState::Unavailable {
					reason: e.to_string(),
				}
			}
		};
		Ok(ClusterWithState { definition, state })
	}

	/// All clusters, or only those carrying `tag`. Sorted by name.
	pub async fn list(&self, tag: Option<&str>) -> ServerResult<Vec<ClusterDefinition>> {
		let clusters = match tag {
			None => self.clusters.list_clusters().await?,
			Some(tag) => {
				let mut clusters = Vec::new();
				for name in self.tags.list_clusters_with_tag(tag).await? {
					if let Some(cluster) = self.clusters.get_cluster(&name).await? {
						clusters.push(cluster);
					}
				}
				clusters.sort_by(|a, b| a.name.cmp(&b.name));
				clusters
			}
		};

		let mut definitions = Vec::with_capacity(clusters.len());
		for cluster in clusters {
			let tags = self.tags.get_tags(&cluster.name).await?;
			definitions.push(ClusterDefinition { cluster, tags });
		}
		Ok(definitions)
	}

	pub async fn list_tags(&self) -> ServerResult<Vec<String>> {
		Ok(self.tags.list_tags().await?)
	}

	/// Only the erase saga removes cluster definitions.
	pub(crate) async fn delete(&self, name: &str) -> ServerResult<bool> {
		Ok(self.clusters.delete_cluster(name).await?)
	}
}

/// Cluster names become file names for certificates, so they are limited to
/// ASCII letters, digits, `-` and `_`.
pub fn validate_cluster_name(name: &str) -> ServerResult<()> {
	let valid = !name.is_empty()
		&& name.len() <= 128
		&& name
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
	if !valid {
		return Err(ServerError::InvalidInput(format!(
			"invalid cluster name {name:?}: use 1-128 ASCII letters, digits, '-' or '_'"
		)));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn test_cluster_name_validation() {
		assert!(validate_cluster_name("pg-prod").is_ok());
		assert!(validate_cluster_name("pg_prod_01").is_ok());
		for bad in ["", "pg.prod", "../etc", "pg prod", "pg/prod"] {
			assert!(validate_cluster_name(bad).is_err(), "accepted {bad:?}");
		}
	}

	proptest! {
		#[test]
		fn prop_valid_names_are_file_safe(name in "[A-Za-z0-9_-]{1,64}") {
			prop_assert!(validate_cluster_name(&name).is_ok());
			prop_assert!(!name.contains('.') && !name.contains('/'));
		}
	}
}
