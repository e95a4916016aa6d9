// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-cluster role passwords, encrypted under the active master secret.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ivory_common_secret::SecretString;
use ivory_server_db::{CredentialRow, CredentialStore};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::encryption::EncryptedData;
use crate::error::{SecretsError, SecretsResult};
use crate::secret::{MasterSecret, SecretService};

/// Credential metadata. Never carries the password or its ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialInfo {
	pub cluster: String,
	pub role: String,
	pub secret_version: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl From<&CredentialRow> for CredentialInfo {
	fn from(row: &CredentialRow) -> Self {
		Self {
			cluster: row.cluster.clone(),
			role: row.role.clone(),
			secret_version: row.secret_version,
			created_at: row.created_at,
			updated_at: row.updated_at,
		}
	}
}

/// Outcome of a re-encryption pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReencryptReport {
	pub reencrypted: usize,
	/// Already under the active version.
	pub unchanged: usize,
	/// `cluster/role` of credentials the previous passphrase could not open.
	pub failed: Vec<String>,
}

pub struct PasswordService {
	store: Arc<dyn CredentialStore>,
	secrets: Arc<SecretService>,
}

impl PasswordService {
	pub fn new(store: Arc<dyn CredentialStore>, secrets: Arc<SecretService>) -> Self {
		Self { store, secrets }
	}

	pub fn secrets(&self) -> &Arc<SecretService> {
		&self.secrets
	}

	/// Create or replace the password for `role` in `cluster`.
	#[instrument(skip(self, password))]
	pub async fn save(&self, cluster: &str, role: &str, password: &SecretString) -> SecretsResult<()> {
		let secret = self.secrets.get_active()?;
		let encrypted = secret.encrypt(password.expose().as_bytes())?;
		let now = Utc::now();

		self.store
			.upsert_credential(&CredentialRow {
				cluster: cluster.to_string(),
				role: role.to_string(),
				ciphertext: encrypted.ciphertext,
				nonce: encrypted.nonce.to_vec(),
				secret_version: i64::from(secret.version()),
				created_at: now,
				updated_at: now,
			})
			.await?;

		debug!(secret_version = secret.version(), "credential saved");
		Ok(())
	}

	/// Decrypt the password for `role` in `cluster`.
	///
	/// A credential written under a different master secret version fails
	/// with [`SecretsError::Decryption`] until it is re-encrypted.
	#[instrument(skip(self))]
	pub async fn get(&self, cluster: &str, role: &str) -> SecretsResult<SecretString> {
		let row = self
			.store
			.get_credential(cluster, role)
			.await?
			.ok_or_else(|| SecretsError::CredentialNotFound {
				cluster: cluster.to_string(),
				role: role.to_string(),
			})?;

		let secret = self.secrets.get_active()?;
		if row.secret_version != i64::from(secret.version()) {
			return Err(SecretsError::Decryption(format!(
				"credential {cluster}/{role} is encrypted under master secret version {}, active is {}",
				row.secret_version,
				secret.version()
			)));
		}

		open(&secret, &row)
	}

	pub async fn list(&self, cluster: &str) -> SecretsResult<Vec<CredentialInfo>> {
		let rows = self.store.list_credentials(cluster).await?;
		Ok(rows.iter().map(CredentialInfo::from).collect())
	}

	#[instrument(skip(self))]
	pub async fn delete(&self, cluster: &str, role: &str) -> SecretsResult<bool> {
		Ok(self.store.delete_credential(cluster, role).await?)
	}

	/// Idempotent. Returns the number of credentials removed.
	#[instrument(skip(self))]
	pub async fn delete_all_for_cluster(&self, cluster: &str) -> SecretsResult<u64> {
		let removed = self.store.delete_credentials_for_cluster(cluster).await?;
		debug!(removed, "credentials deleted");
		Ok(removed)
	}

	/// Move every credential not under the active version onto it.
	///
	/// `previous` must open the version each credential was written under.
	/// Credentials it cannot open are reported in
	/// [`ReencryptReport::failed`] and left untouched.
	#[instrument(skip(self, previous))]
	pub async fn reencrypt_all(&self, previous: &SecretString) -> SecretsResult<ReencryptReport> {
		let active = self.secrets.get_active()?;
		let active_version = i64::from(active.version());
		let mut unlocked: HashMap<i64, Option<Arc<MasterSecret>>> = HashMap::new();
		let mut report = ReencryptReport::default();

		for row in self.store.list_all_credentials().await? {
			if row.secret_version == active_version {
				report.unchanged += 1;
				continue;
			}

			let old = match unlocked.get(&row.secret_version) {
				Some(old) => old.clone(),
				None => {
					let old = self.unlock_row_version(previous, row.secret_version).await?;
					unlocked.insert(row.secret_version, old.clone());
					old
				}
			};
			let Some(old) = old else {
				report.failed.push(format!("{}/{}", row.cluster, row.role));
				continue;
			};

			let password = match open(&old, &row) {
				Ok(password) => password,
				Err(e) => {
					warn!(cluster = %row.cluster, role = %row.role, error = %e, "credential could not be opened");
					report.failed.push(format!("{}/{}", row.cluster, row.role));
					continue;
				}
			};

			let encrypted = active.encrypt(password.expose().as_bytes())?;
			self.store
				.upsert_credential(&CredentialRow {
					ciphertext: encrypted.ciphertext,
					nonce: encrypted.nonce.to_vec(),
					secret_version: active_version,
					updated_at: Utc::now(),
					..row
				})
				.await?;
			report.reencrypted += 1;
		}

		info!(
			reencrypted = report.reencrypted,
			unchanged = report.unchanged,
			failed = report.failed.len(),
			"credential re-encryption finished"
		);
		Ok(report)
	}

	/// Replace the master secret and move every credential onto it.
	///
	/// `previous` must match the active secret. If re-encryption is
	/// interrupted, running [`Self::reencrypt_all`] with the same
	/// `previous` finishes the job.
	#[instrument(skip(self, previous, next))]
	pub async fn rotate(
		&self,
		previous: &SecretString,
		next: &SecretString,
	) -> SecretsResult<ReencryptReport> {
		let active = self.secrets.get_active()?;
		self.secrets
			.unlock_version(previous, active.version())
			.await
			.map_err(|e| match e {
				SecretsError::Decryption(_) => SecretsError::InvalidPassphrase(
					"previous passphrase does not match the active master secret".to_string(),
				),
				other => other,
			})?;

		self.secrets.set_active(next).await?;
		self.reencrypt_all(previous).await
	}

	/// `None` when `previous` does not open `version` or the version is gone.
	async fn unlock_row_version(
		&self,
		previous: &SecretString,
		version: i64,
	) -> SecretsResult<Option<Arc<MasterSecret>>> {
		let Ok(version_u32) = u32::try_from(version) else {
			return Ok(None);
		};
		match self.secrets.unlock_version(previous, version_u32).await {
			Ok(secret) => Ok(Some(Arc::new(secret))),
			Err(SecretsError::Decryption(_)) | Err(SecretsError::VersionNotFound(_)) => {
				warn!(version, "previous passphrase does not open master secret version");
				Ok(None)
			}
			Err(e) => Err(e),
		}
	}
}

fn open(secret: &MasterSecret, row: &CredentialRow) -> SecretsResult<SecretString> {
	let encrypted = EncryptedData::from_parts(row.ciphertext.clone(), &row.nonce)?;
	let plaintext = secret.decrypt(&encrypted)?;
	let password = String::from_utf8(plaintext.to_vec())
		.map_err(|_| SecretsError::Decryption("credential is not valid UTF-8".to_string()))?;
	Ok(SecretString::new(password))
}
