// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cluster tags. The `(cluster, tag)` primary key collapses duplicates.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::error::Result;

#[derive(Clone)]
pub struct TagRepository {
	pool: SqlitePool,
}

impl TagRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Replace the cluster's tag set.
	#[tracing::instrument(skip(self, tags), fields(count = tags.len()))]
	pub async fn set_tags(&self, cluster: &str, tags: &[String]) -> Result<()> {
		let mut tx = self.pool.begin().await?;

		sqlx::query("DELETE FROM cluster_tags WHERE cluster = ?")
			.bind(cluster)
			.execute(&mut *tx)
			.await?;

		for tag in tags {
			sqlx::query("INSERT OR IGNORE INTO cluster_tags (cluster, tag) VALUES (?, ?)")
				.bind(cluster)
				.bind(tag)
				.execute(&mut *tx)
				.await?;
		}

		tx.commit().await?;
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_tags(&self, cluster: &str) -> Result<Vec<String>> {
		let tags = sqlx::query_scalar::<_, String>(
			"SELECT tag FROM cluster_tags WHERE cluster = ? ORDER BY tag",
		)
		.bind(cluster)
		.fetch_all(&self.pool)
		.await?;

		Ok(tags)
	}

	/// Every distinct tag in use.
	#[tracing::instrument(skip(self))]
	pub async fn list_tags(&self) -> Result<Vec<String>> {
		let tags = sqlx::query_scalar::<_, String>("SELECT DISTINCT tag FROM cluster_tags ORDER BY tag")
			.fetch_all(&self.pool)
			.await?;

		Ok(tags)
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_clusters_with_tag(&self, tag: &str) -> Result<Vec<String>> {
		let clusters = sqlx::query_scalar::<_, String>(
			"SELECT cluster FROM cluster_tags WHERE tag = ? ORDER BY cluster",
		)
		.bind(tag)
		.fetch_all(&self.pool)
		.await?;

		Ok(clusters)
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_tags_for_cluster(&self, cluster: &str) -> Result<u64> {
		let result = sqlx::query("DELETE FROM cluster_tags WHERE cluster = ?")
			.bind(cluster)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}
}

#[async_trait]
pub trait TagStore: Send + Sync {
	async fn set_tags(&self, cluster: &str, tags: &[String]) -> Result<()>;
	async fn get_tags(&self, cluster: &str) -> Result<Vec<String>>;
	async fn list_tags(&self) -> Result<Vec<String>>;
	async fn list_clusters_with_tag(&self, tag: &str) -> Result<Vec<String>>;
	async fn delete_tags_for_cluster(&self, cluster: &str) -> Result<u64>;
}

#[async_trait]
impl TagStore for TagRepository {
	async fn set_tags(&self, cluster: &str, tags: &[String]) -> Result<()> {
		self.set_tags(cluster, tags).await
	}

	async fn get_tags(&self, cluster: &str) -> Result<Vec<String>> {
		self.get_tags(cluster).await
	}

	async fn list_tags(&self) -> Result<Vec<String>> {
		self.list_tags().await
	}

	async fn list_clusters_with_tag(&self, tag: &str) -> Result<Vec<String>> {
		self.list_clusters_with_tag(tag).await
	}

	async fn delete_tags_for_cluster(&self, cluster: &str) -> Result<u64> {
		self.delete_tags_for_cluster(cluster).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;
	use proptest::prelude::*;

	fn tags(values: &[&str]) -> Vec<String> {
		values.iter().map(|s| s.to_string()).collect()
	}

	#[tokio::test]
	async fn test_duplicates_collapse() {
		let repo = TagRepository::new(create_test_pool().await);
		repo
			.set_tags("pg-prod", &tags(&["prod", "eu", "prod"]))
			.await
			.unwrap();

		assert_eq!(repo.get_tags("pg-prod").await.unwrap(), tags(&["eu", "prod"]));
	}

	#[tokio::test]
	async fn test_set_replaces_previous_tags() {
		let repo = TagRepository::new(create_test_pool().await);
		repo.set_tags("pg-prod", &tags(&["prod", "eu"])).await.unwrap();
		repo.set_tags("pg-prod", &tags(&["us"])).await.unwrap();

		assert_eq!(repo.get_tags("pg-prod").await.unwrap(), tags(&["us"]));
	}

	#[tokio::test]
	async fn test_clusters_with_tag_and_distinct_listing() {
		let repo = TagRepository::new(create_test_pool().await);
		repo.set_tags("pg-prod", &tags(&["prod", "eu"])).await.unwrap();
		repo.set_tags("pg-prod-2", &tags(&["prod"])).await.unwrap();

		assert_eq!(
			repo.list_clusters_with_tag("prod").await.unwrap(),
			tags(&["pg-prod", "pg-prod-2"])
		);
		assert_eq!(repo.list_tags().await.unwrap(), tags(&["eu", "prod"]));
	}

	#[tokio::test]
	async fn test_delete_for_cluster_counts_rows() {
		let repo = TagRepository::new(create_test_pool().await);
		repo.set_tags("pg-prod", &tags(&["a", "b"])).await.unwrap();

		assert_eq!(repo.delete_tags_for_cluster("pg-prod").await.unwrap(), 2);
		assert_eq!(repo.delete_tags_for_cluster("pg-prod").await.unwrap(), 0);
	}

	proptest! {
		#![proptest_config(ProptestConfig::with_cases(16))]

		#[test]
		fn prop_stored_set_equals_deduplicated_input(input in proptest::collection::vec("[a-z]{1,6}", 0..12)) {
			let rt = tokio::runtime::Runtime::new().unwrap();
			let stored = rt.block_on(async {
				let repo = TagRepository::new(create_test_pool().await);
				repo.set_tags("c", &input).await.unwrap();
				repo.get_tags("c").await.unwrap()
			});

			let mut expected = input.clone();
			expected.sort();
			expected.dedup();
			prop_assert_eq!(stored, expected);
		}
	}
}
