// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Topology reads and control actions against the Patroni REST API.
//!
//! Reads fan out to every node and take the first answer. Failover and
//! switchover go to the current leader; restart and reinitialize go to the
//! node they act on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{join_all, select_ok};
use futures::FutureExt;
use ivory_server_db::{Cluster, NodeAddress};
use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, instrument, warn};

use crate::client::{SidecarClient, SidecarRequest, SidecarResponse};
use crate::error::{PatroniError, PatroniResult, SidecarError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
	#[serde(alias = "master")]
	Leader,
	StandbyLeader,
	SyncStandby,
	Replica,
	#[serde(other)]
	Unknown,
}

impl MemberRole {
	pub fn is_leader(&self) -> bool {
		matches!(self, MemberRole::Leader | MemberRole::StandbyLeader)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
	pub name: String,
	pub role: MemberRole,
	#[serde(default)]
	pub state: String,
	#[serde(default)]
	pub host: String,
	#[serde(default)]
	pub port: Option<u16>,
	#[serde(default)]
	pub api_url: Option<String>,
	#[serde(default)]
	pub timeline: Option<u64>,
	/// Replication lag in bytes. Patroni reports `"unknown"` for members it
	/// cannot measure.
	#[serde(default, deserialize_with = "lag_bytes")]
	pub lag: Option<u64>,
}

fn lag_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
	let value = Option::<serde_json::Value>::deserialize(deserializer)?;
	Ok(value.and_then(|v| v.as_u64()))
}

#[derive(Debug, Deserialize)]
struct ClusterResponse {
	#[serde(default)]
	scope: Option<String>,
	#[serde(default)]
	members: Vec<Member>,
}

/// Cluster topology as reported by one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Topology {
	pub scope: Option<String>,
	pub leader: Option<String>,
	pub replicas: Vec<String>,
	pub timeline: Option<u64>,
	pub members: Vec<Member>,
	/// The node whose answer this is.
	pub source: NodeAddress,
}

impl Topology {
	fn from_response(source: NodeAddress, response: ClusterResponse) -> Self {
		let leader = response.members.iter().find(|m| m.role.is_leader());
		let timeline = leader
			.and_then(|m| m.timeline)
			.or_else(|| response.members.iter().filter_map(|m| m.timeline).max());

		Self {
			scope: response.scope,
			leader: leader.map(|m| m.name.clone()),
			replicas: response
				.members
				.iter()
				.filter(|m| !m.role.is_leader())
				.map(|m| m.name.clone())
				.collect(),
			timeline,
			members: response.members,
			source,
		}
	}

	pub fn leader_member(&self) -> Option<&Member> {
		let leader = self.leader.as_deref()?;
		self.members.iter().find(|m| m.name == leader)
	}
}

/// Reachability of one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeOverview {
	pub node: NodeAddress,
	pub reachable: bool,
	pub role: Option<String>,
	pub state: Option<String>,
	pub error: Option<String>,
}

/// Result of an accepted control action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
	pub node: NodeAddress,
	pub status: u16,
	pub message: String,
}

impl From<SidecarResponse> for ActionOutcome {
	fn from(response: SidecarResponse) -> Self {
		Self {
			node: response.node,
			status: response.status,
			message: response.body.trim().to_string(),
		}
	}
}

pub struct PatroniGateway {
	client: Arc<SidecarClient>,
}

impl PatroniGateway {
	pub fn new(client: Arc<SidecarClient>) -> Self {
		Self { client }
	}

	/// Ask every node for `/cluster`; the first answer wins.
	#[instrument(skip(self, cluster), fields(cluster = %cluster.name))]
	pub async fn get_state(&self, cluster: &Cluster) -> PatroniResult<Topology> {
		if cluster.nodes.is_empty() {
			return Err(PatroniError::NoReachableNode {
				cluster: cluster.name.clone(),
				last_error: "cluster has no nodes".to_string(),
			});
		}

		let attempts = cluster.nodes.iter().map(|node| {
			async move {
				let result = self
					.client
					.call(cluster, node, SidecarRequest::get("/cluster"))
					.await
					.and_then(|response| response.json::<ClusterResponse>())
					.map(|parsed| Topology::from_response(node.clone(), parsed));
				if let Err(e) = &result {
					warn!(node = %node, error = %e, "node did not return topology");
				}
				result
			}
			.boxed()
		});

		match select_ok(attempts).await {
			Ok((topology, _pending)) => Ok(topology),
			Err(last) => Err(no_reachable(cluster, last)),
		}
	}

	/// Ask every node for its own status.
	#[instrument(skip(self, cluster), fields(cluster = %cluster.name))]
	pub async fn get_overview(&self, cluster: &Cluster) -> Vec<NodeOverview> {
		let calls = cluster.nodes.iter().map(|node| async move {
			match self
				.client
				.call(cluster, node, SidecarRequest::get("/patroni"))
				.await
				.and_then(|r| r.json::<serde_json::Value>())
			{
				Ok(status) => NodeOverview {
					node: node.clone(),
					reachable: true,
					role: status.get("role").and_then(|v| v.as_str()).map(String::from),
					state: status.get("state").and_then(|v| v.as_str()).map(String::from),
					error: None,
				},
				Err(e) => NodeOverview {
					node: node.clone(),
					reachable: false,
					role: None,
					state: None,
					error: Some(e.to_string()),
				},
			}
		});
		join_all(calls).await
	}

	/// Unplanned promotion of `candidate`.
	#[instrument(skip(self, cluster), fields(cluster = %cluster.name))]
	pub async fn failover(&self, cluster: &Cluster, candidate: &str) -> PatroniResult<ActionOutcome> {
		let (topology, leader_node) = self.leader_node(cluster).await?;
		let body = serde_json::json!({
			"leader": topology.leader,
			"candidate": candidate,
		});
		let outcome = self
			.client
			.call(cluster, &leader_node, SidecarRequest::post("/failover", body))
			.await?;
		info!(candidate, "failover accepted");
		Ok(outcome.into())
	}

	/// Planned handover from the leader, optionally at `scheduled_at`.
	#[instrument(skip(self, cluster), fields(cluster = %cluster.name))]
	pub async fn switchover(
		&self,
		cluster: &Cluster,
		candidate: Option<&str>,
		scheduled_at: Option<DateTime<Utc>>,
	) -> PatroniResult<ActionOutcome> {
		let (topology, leader_node) = self.leader_node(cluster).await?;
		let mut body = serde_json::json!({ "leader": topology.leader });
		if let Some(candidate) = candidate {
			body["candidate"] = candidate.into();
		}
		if let Some(at) = scheduled_at {
			body["scheduled_at"] = at.to_rfc3339().into();
		}
		let outcome = self
			.client
			.call(cluster, &leader_node, SidecarRequest::post("/switchover", body))
			.await?;
		info!(?candidate, ?scheduled_at, "switchover accepted");
		Ok(outcome.into())
	}

	#[instrument(skip(self, cluster), fields(cluster = %cluster.name))]
	pub async fn restart(&self, cluster: &Cluster, node: &NodeAddress) -> PatroniResult<ActionOutcome> {
		self.node_action(cluster, node, "/restart").await
	}

	#[instrument(skip(self, cluster), fields(cluster = %cluster.name))]
	pub async fn reinitialize(
		&self,
		cluster: &Cluster,
		node: &NodeAddress,
	) -> PatroniResult<ActionOutcome> {
		self.node_action(cluster, node, "/reinitialize").await
	}

	async fn node_action(
		&self,
		cluster: &Cluster,
		node: &NodeAddress,
		path: &str,
	) -> PatroniResult<ActionOutcome> {
		if !cluster.nodes.contains(node) {
			return Err(PatroniError::UnknownNode {
				cluster: cluster.name.clone(),
				node: node.clone(),
			});
		}
		let outcome = self
			.client
			.call(cluster, node, SidecarRequest::post(path, serde_json::json!({})))
			.await?;
		info!(node = %node, path, "node action accepted");
		Ok(outcome.into())
	}

	/// Current topology and the sidecar address of its leader.
	async fn leader_node(&self, cluster: &Cluster) -> PatroniResult<(Topology, NodeAddress)> {
		let topology = self.get_state(cluster).await?;
		let leader = topology.leader_member().ok_or_else(|| PatroniError::NoLeader {
			cluster: cluster.name.clone(),
		})?;
		let node = resolve_member_node(cluster, leader).ok_or_else(|| PatroniError::NoLeader {
			cluster: cluster.name.clone(),
		})?;
		Ok((topology, node))
	}
}

/// Match a member to one of the cluster's configured nodes, by REST API
/// address first and host second. Addresses that only appear in the remote
/// response are never returned.
fn resolve_member_node(cluster: &Cluster, member: &Member) -> Option<NodeAddress> {
	let from_api = member
		.api_url
		.as_deref()
		.and_then(|u| Url::parse(u).ok())
		.and_then(|url| {
			let host = url.host_str()?.to_string();
			let port = url.port_or_known_default()?;
			Some(NodeAddress::new(host, port))
		});

	if let Some(addr) = from_api {
		if cluster.nodes.contains(&addr) {
			return Some(addr);
		}
		warn!(member = %member.name, api = %addr, "member API address is not a configured node");
	}

	cluster
		.nodes
		.iter()
		.find(|n| n.host == member.host)
		.cloned()
}

fn no_reachable(cluster: &Cluster, last: SidecarError) -> PatroniError {
	PatroniError::NoReachableNode {
		cluster: cluster.name.clone(),
		last_error: last.to_string(),
	}
}
