// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::{
	cluster_spec, dead_node, restart_with, shell_compaction, test_app, test_app_with, MASTER, TEST_PEM,
};
use ivory_common_secret::SecretString;
use ivory_server::{
	BloatOptions, ClusterState, EraseService, EraseStep, NewQuery, ServerError,
};
use ivory_server_db::{CertKind, DbError, NodeAddress, TagRepository, TagStore};
use ivory_server_postgres::DbTarget;
use ivory_server_secrets::SecretsError;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_pg_prod_lifecycle() {
	let app = test_app_with(shell_compaction("echo compacted")).await;
	let s = &app.state;

	s.clusters
		.upsert(cluster_spec("pg-prod", vec![dead_node()], &["prod", "eu"]))
		.await
		.unwrap();
	s.passwords
		.save("pg-prod", "admin", &SecretString::from("x"))
		.await
		.unwrap();
	assert_eq!(s.passwords.get("pg-prod", "admin").await.unwrap().expose(), "x");

	s.certs
		.save("pg-prod", CertKind::ClientCa, TEST_PEM, None)
		.await
		.unwrap();
	s.queries
		.create(NewQuery {
			cluster: "pg-prod".to_string(),
			name: "bloat".to_string(),
			sql: "SELECT 1".to_string(),
			params: Vec::new(),
			description: None,
		})
		.await
		.unwrap();
	let run = s
		.bloat
		.run(
			"pg-prod",
			BloatOptions {
				target: DbTarget::new("127.0.0.1", 5432, "admin"),
				extra_args: Vec::new(),
			},
		)
		.await
		.unwrap();

	let report = s.erase.erase("pg-prod").await.unwrap();
	let removed: Vec<_> = report.steps.iter().map(|r| (r.step, r.removed)).collect();
	assert_eq!(
		removed,
		vec![
			(EraseStep::Credentials, 1),
			(EraseStep::Certificates, 1),
			(EraseStep::Tags, 2),
			(EraseStep::MaintenanceLogs, 1),
			(EraseStep::Queries, 1),
			(EraseStep::Cluster, 1),
		]
	);

	let err = s.passwords.get("pg-prod", "admin").await.unwrap_err();
	assert!(matches!(err, SecretsError::CredentialNotFound { .. }));
	assert!(s.clusters.get("pg-prod").await.unwrap_err().is_not_found());
	assert!(s.bloat.log(&run.id).await.unwrap_err().is_not_found());
	assert!(s.certs.find_orphans().await.unwrap().is_empty());

	let again = s.erase.erase("pg-prod").await.unwrap();
	assert_eq!(again.steps.len(), EraseStep::ORDER.len());
	assert_eq!(again.total_removed(), 0);
}

#[tokio::test]
async fn test_erase_unknown_cluster_succeeds() {
	let app = test_app().await;
	let report = app.state.erase.erase("never-existed").await.unwrap();
	assert_eq!(report.total_removed(), 0);
}

#[tokio::test]
async fn test_erase_leaves_other_clusters_alone() {
	let app = test_app().await;
	let s = &app.state;
	for name in ["pg-prod", "pg-stage"] {
		s.clusters
			.upsert(cluster_spec(name, vec![dead_node()], &["shared"]))
			.await
			.unwrap();
		s.passwords
			.save(name, "admin", &SecretString::from(name))
			.await
			.unwrap();
	}

	s.erase.erase("pg-prod").await.unwrap();

	assert_eq!(s.passwords.get("pg-stage", "admin").await.unwrap().expose(), "pg-stage");
	let remaining = s.clusters.list(Some("shared")).await.unwrap();
	assert_eq!(remaining.len(), 1);
	assert_eq!(remaining[0].cluster.name, "pg-stage");
}

/// Fails `delete_tags_for_cluster` while `failing` is set.
struct FlakyTags {
	inner: TagRepository,
	failing: AtomicBool,
}

#[async_trait]
impl TagStore for FlakyTags {
	async fn set_tags(&self, cluster: &str, tags: &[String]) -> ivory_server_db::Result<()> {
		self.inner.set_tags(cluster, tags).await
	}

	async fn get_tags(&self, cluster: &str) -> ivory_server_db::Result<Vec<String>> {
		self.inner.get_tags(cluster).await
	}

	async fn list_tags(&self) -> ivory_server_db::Result<Vec<String>> {
		self.inner.list_tags().await
	}

	async fn list_clusters_with_tag(&self, tag: &str) -> ivory_server_db::Result<Vec<String>> {
		self.inner.list_clusters_with_tag(tag).await
	}

	async fn delete_tags_for_cluster(&self, cluster: &str) -> ivory_server_db::Result<u64> {
		if self.failing.load(Ordering::SeqCst) {
			return Err(DbError::Internal("tag table locked".to_string()));
		}
		self.inner.delete_tags_for_cluster(cluster).await
	}
}

#[tokio::test]
async fn test_partial_erase_resumes_from_failed_step() {
	let app = test_app().await;
	let s = &app.state;
	s.clusters
		.upsert(cluster_spec("pg-prod", vec![dead_node()], &["prod"]))
		.await
		.unwrap();
	s.passwords
		.save("pg-prod", "admin", &SecretString::from("x"))
		.await
		.unwrap();

	let tags = Arc::new(FlakyTags {
		inner: TagRepository::new(s.pool.clone()),
		failing: AtomicBool::new(true),
	});
	let erase = EraseService::new(
		s.passwords.clone(),
		s.certs.clone(),
		tags.clone(),
		s.bloat.clone(),
		s.queries.clone(),
		s.clusters.clone(),
		s.secrets.clone(),
	);

	let err = erase.erase("pg-prod").await.unwrap_err();
	let failure = err.as_partial_erase().expect("partial erase");
	assert_eq!(failure.failed_step, EraseStep::Tags);
	assert_eq!(failure.completed_steps.len(), 2);
	assert_eq!(failure.completed_steps[0].removed, 1);
	assert!(matches!(*failure.cause, ServerError::Database(_)));

	// Credentials are gone, the definition is still there to resume from.
	assert!(s.passwords.get("pg-prod", "admin").await.unwrap_err().is_not_found());
	assert!(s.clusters.get("pg-prod").await.is_ok());

	tags.failing.store(false, Ordering::SeqCst);
	let report = erase.erase_from("pg-prod", EraseStep::Tags).await.unwrap();
	assert_eq!(report.steps.first().map(|r| r.step), Some(EraseStep::Tags));
	assert_eq!(report.steps.len(), 4);
	assert!(s.clusters.get("pg-prod").await.unwrap_err().is_not_found());
	assert!(s.clusters.list_tags().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_erase_all_clears_clusters_and_secret() {
	let app = test_app().await;
	let s = &app.state;
	for name in ["a", "b"] {
		s.clusters
			.upsert(cluster_spec(name, vec![dead_node()], &[]))
			.await
			.unwrap();
		s.passwords
			.save(name, "admin", &SecretString::from("pw"))
			.await
			.unwrap();
	}

	let report = s.erase.erase_all().await.unwrap();
	assert_eq!(report.clusters.len(), 2);
	assert_eq!(report.secret_versions_removed, 1);

	assert!(s.clusters.list(None).await.unwrap().is_empty());
	let status = s.secrets.status().await.unwrap();
	assert!(!status.configured);
	assert_eq!(status.latest_version, None);
}

#[tokio::test]
async fn test_rotation_keeps_credentials_readable() {
	let app = test_app().await;
	let s = &app.state;
	s.passwords
		.save("pg-prod", "admin", &SecretString::from("x"))
		.await
		.unwrap();

	let report = s
		.passwords
		.rotate(&SecretString::from(MASTER), &SecretString::from("second passphrase"))
		.await
		.unwrap();
	assert_eq!(report.reencrypted, 1);
	assert!(report.failed.is_empty());

	assert_eq!(s.passwords.get("pg-prod", "admin").await.unwrap().expose(), "x");
	let status = s.secrets.status().await.unwrap();
	assert_eq!(status.active_version, Some(2));
	assert_eq!(s.passwords.list("pg-prod").await.unwrap()[0].secret_version, 2);
}

#[tokio::test]
async fn test_reencrypt_after_set_and_restart_recovers_credentials() {
	let app = test_app().await;
	app.state
		.passwords
		.save("pg-prod", "admin", &SecretString::from("x"))
		.await
		.unwrap();
	app.state
		.secrets
		.set_active(&SecretString::from("second passphrase"))
		.await
		.unwrap();

	let restarted = restart_with(&app, "second passphrase").await;
	let err = restarted.passwords.get("pg-prod", "admin").await.unwrap_err();
	assert!(err.is_decryption());

	let report = restarted
		.passwords
		.reencrypt_all(&SecretString::from(MASTER))
		.await
		.unwrap();
	assert_eq!(report.reencrypted, 1);
	assert!(report.failed.is_empty());
	assert_eq!(
		restarted.passwords.get("pg-prod", "admin").await.unwrap().expose(),
		"x"
	);

	let again = restarted
		.passwords
		.reencrypt_all(&SecretString::from(MASTER))
		.await
		.unwrap();
	assert_eq!((again.reencrypted, again.unchanged), (0, 1));
}

#[tokio::test]
async fn test_rotation_rejects_wrong_previous_passphrase() {
	let app = test_app().await;
	let err = app
		.state
		.passwords
		.rotate(&SecretString::from("guess"), &SecretString::from("next"))
		.await
		.unwrap_err();
	assert!(matches!(err, SecretsError::InvalidPassphrase(_)));
	assert_eq!(app.state.secrets.status().await.unwrap().active_version, Some(1));
}

#[tokio::test]
async fn test_state_unavailable_when_no_node_answers() {
	let app = test_app().await;
	app.state
		.clusters
		.upsert(cluster_spec("pg-prod", vec![dead_node()], &[]))
		.await
		.unwrap();

	let with_state = app.state.clusters.get_with_state("pg-prod").await.unwrap();
	assert_eq!(with_state.definition.cluster.name, "pg-prod");
	match with_state.state {
		ClusterState::Unavailable { reason } => assert!(reason.contains("pg-prod")),
		other => panic!("expected unavailable state, got {other:?}"),
	}
}

#[tokio::test]
async fn test_state_merges_live_topology() {
	let app = test_app().await;
	let server = MockServer::start().await;
	let node = NodeAddress::new(server.address().ip().to_string(), server.address().port());
	Mock::given(method("GET"))
		.and(path("/cluster"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"members": [
				{"name": "node1", "role": "leader", "state": "running", "host": "10.0.0.1", "timeline": 3},
				{"name": "node2", "role": "sync_standby", "state": "streaming", "host": "10.0.0.2", "timeline": 3, "lag": 0}
			]
		})))
		.mount(&server)
		.await;

	app.state
		.clusters
		.upsert(cluster_spec("pg-prod", vec![node], &["prod"]))
		.await
		.unwrap();

	let with_state = app.state.clusters.get_with_state("pg-prod").await.unwrap();
	assert_eq!(with_state.definition.tags, vec!["prod"]);
	match with_state.state {
		ClusterState::Live(topology) => {
			assert_eq!(topology.leader.as_deref(), Some("node1"));
			assert_eq!(topology.timeline, Some(3));
		}
		other => panic!("expected live state, got {other:?}"),
	}
}

#[tokio::test]
async fn test_cluster_validation() {
	let app = test_app().await;
	let err = app
		.state
		.clusters
		.upsert(cluster_spec("pg-prod", Vec::new(), &[]))
		.await
		.unwrap_err();
	assert!(matches!(err, ServerError::InvalidInput(_)));

	let err = app
		.state
		.clusters
		.upsert(cluster_spec("../pg", vec![dead_node()], &[]))
		.await
		.unwrap_err();
	assert!(matches!(err, ServerError::InvalidInput(_)));
}

#[tokio::test]
async fn test_upsert_replaces_tags() {
	let app = test_app().await;
	let clusters = &app.state.clusters;
	clusters
		.upsert(cluster_spec("pg-prod", vec![dead_node()], &["a", "b"]))
		.await
		.unwrap();
	let updated = clusters
		.upsert(cluster_spec("pg-prod", vec![dead_node()], &["c"]))
		.await
		.unwrap();
	assert_eq!(updated.tags, vec!["c"]);
	assert!(clusters.list(Some("a")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_query_crud_and_unknown_cluster() {
	let app = test_app().await;
	let queries = &app.state.queries;

	let err = queries
		.create(NewQuery {
			cluster: "missing".to_string(),
			name: "q".to_string(),
			sql: "SELECT 1".to_string(),
			params: Vec::new(),
			description: None,
		})
		.await
		.unwrap_err();
	assert!(matches!(err, ServerError::ClusterNotFound(_)));

	app.state
		.clusters
		.upsert(cluster_spec("pg-prod", vec![dead_node()], &[]))
		.await
		.unwrap();
	let saved = queries
		.create(NewQuery {
			cluster: "pg-prod".to_string(),
			name: "locks".to_string(),
			sql: "SELECT * FROM pg_locks WHERE pid = $1::int".to_string(),
			params: vec!["42".to_string()],
			description: Some("locks held by a backend".to_string()),
		})
		.await
		.unwrap();

	let updated = queries
		.update(
			&saved.id,
			ivory_server::QueryUpdate {
				params: Some(vec!["7".to_string()]),
				..Default::default()
			},
		)
		.await
		.unwrap();
	assert_eq!(updated.params, vec!["7"]);
	assert_eq!(updated.name, "locks");
	assert_eq!(queries.list("pg-prod").await.unwrap().len(), 1);

	assert!(queries.delete(&saved.id).await.unwrap());
	assert!(matches!(
		queries.get(&saved.id).await.unwrap_err(),
		ServerError::QueryNotFound(_)
	));
}

#[tokio::test]
async fn test_query_run_without_credential() {
	let app = test_app().await;
	app.state
		.clusters
		.upsert(cluster_spec("pg-prod", vec![dead_node()], &[]))
		.await
		.unwrap();
	let saved = app
		.state
		.queries
		.create(NewQuery {
			cluster: "pg-prod".to_string(),
			name: "one".to_string(),
			sql: "SELECT 1".to_string(),
			params: Vec::new(),
			description: None,
		})
		.await
		.unwrap();

	let err = app
		.state
		.queries
		.run(&saved.id, &DbTarget::new("127.0.0.1", 1, "admin"), None)
		.await
		.unwrap_err();
	assert!(err.is_not_found());
	assert!(!err.is_transient());
}
