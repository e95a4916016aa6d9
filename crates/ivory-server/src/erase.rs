// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Removal of everything stored for a cluster.
//!
//! Stores share no transaction, so erasing is an ordered sequence of
//! idempotent steps. A failure stops the sequence and reports where, and
//! [`EraseService::erase_from`] picks up at that step. Running a finished
//! erase again succeeds and removes nothing.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ivory_server_certs::CertService;
use ivory_server_db::TagStore;
use ivory_server_secrets::{PasswordService, SecretService};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::bloat::BloatService;
use crate::cluster::ClusterService;
use crate::error::{PartialEraseFailure, ServerResult};
use crate::query::QueryService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EraseStep {
	Credentials,
	Certificates,
	Tags,
	MaintenanceLogs,
	Queries,
	Cluster,
}

impl EraseStep {
	/// Execution order. The cluster definition goes last so an interrupted
	/// erase stays discoverable through it.
	pub const ORDER: [EraseStep; 6] = [
		EraseStep::Credentials,
		EraseStep::Certificates,
		EraseStep::Tags,
		EraseStep::MaintenanceLogs,
		EraseStep::Queries,
		EraseStep::Cluster,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			EraseStep::Credentials => "credentials",
			EraseStep::Certificates => "certificates",
			EraseStep::Tags => "tags",
			EraseStep::MaintenanceLogs => "maintenance_logs",
			EraseStep::Queries => "queries",
			EraseStep::Cluster => "cluster",
		}
	}
}

impl fmt::Display for EraseStep {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EraseStep {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		EraseStep::ORDER
			.into_iter()
			.find(|step| step.as_str() == s)
			.ok_or_else(|| format!("unknown erase step: {s}"))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepReport {
	pub step: EraseStep,
	pub removed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EraseReport {
	pub cluster: String,
	pub steps: Vec<StepReport>,
}

impl EraseReport {
	pub fn total_removed(&self) -> u64 {
		self.steps.iter().map(|s| s.removed).sum()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EraseAllReport {
	pub clusters: Vec<EraseReport>,
	pub secret_versions_removed: u64,
}

pub struct EraseService {
	passwords: Arc<PasswordService>,
	certs: Arc<CertService>,
	tags: Arc<dyn TagStore>,
	bloat: Arc<BloatService>,
	queries: Arc<QueryService>,
	clusters: Arc<ClusterService>,
	secrets: Arc<SecretService>,
}

impl EraseService {
	pub fn new(
		passwords: Arc<PasswordService>,
		certs: Arc<CertService>,
		tags: Arc<dyn TagStore>,
		bloat: Arc<BloatService>,
		queries: Arc<QueryService>,
		clusters: Arc<ClusterService>,
		secrets: Arc<SecretService>,
	) -> Self {
		Self {
			passwords,
			certs,
			tags,
			bloat,
			queries,
			clusters,
			secrets,
		}
	}

	/// Erase every record of `cluster`. An unknown cluster is not an error.
	pub async fn erase(&self, cluster: &str) -> ServerResult<EraseReport> {
		self.erase_from(cluster, EraseStep::Credentials).await
	}

	/// Run the steps from `from` onwards.
	///
	/// On failure the error is [`crate::ServerError::PartialErase`], naming the
	/// failed step to resume from.
	#[instrument(skip(self))]
	pub async fn erase_from(&self, cluster: &str, from: EraseStep) -> ServerResult<EraseReport> {
		let mut steps = Vec::new();

		for step in EraseStep::ORDER.into_iter().filter(|s| *s >= from) {
			match self.run_step(cluster, step).await {
				Ok(removed) => steps.push(StepReport { step, removed }),
				Err(cause) => {
					warn!(%step, error = %cause, "erase step failed");
					return Err(PartialEraseFailure {
						cluster: cluster.to_string(),
						completed_steps: steps,
						failed_step: step,
						cause: Box::new(cause),
					}
					.into());
				}
			}
		}

		let report = EraseReport {
			cluster: cluster.to_string(),
			steps,
		};
		info!(removed = report.total_removed(), "cluster erased");
		Ok(report)
	}

	/// Erase every cluster, then every master secret version.
	#[instrument(skip(self))]
	pub async fn erase_all(&self) -> ServerResult<EraseAllReport> {
		let mut clusters = Vec::new();
		for definition in self.clusters.list(None).await? {
			clusters.push(self.erase(&definition.cluster.name).await?);
		}

		let secret_versions_removed = self.secrets.clear().await?;
		info!(
			clusters = clusters.len(),
			secret_versions_removed, "all cluster state erased"
		);
		Ok(EraseAllReport {
			clusters,
			secret_versions_removed,
		})
	}

	async fn run_step(&self, cluster: &str, step: EraseStep) -> ServerResult<u64> {
		let removed = match step {
			EraseStep::Credentials => self.passwords.delete_all_for_cluster(cluster).await?,
			EraseStep::Certificates => self.certs.delete_all_for_cluster(cluster).await?,
			EraseStep::Tags => self.tags.delete_tags_for_cluster(cluster).await?,
			EraseStep::MaintenanceLogs => self.bloat.delete_all_for_cluster(cluster).await?,
			EraseStep::Queries => self.queries.delete_all_for_cluster(cluster).await?,
			EraseStep::Cluster => u64::from(self.clusters.delete(cluster).await?),
		};
		Ok(removed)
	}
}

/// Steps still to run after a failure, starting with the failed one.
pub fn remaining_steps(failure: &PartialEraseFailure) -> Vec<EraseStep> {
	EraseStep::ORDER
		.into_iter()
		.filter(|s| *s >= failure.failed_step)
		.collect()
}
