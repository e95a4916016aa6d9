// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The process-wide master secret.
//!
//! Exactly one [`MasterSecret`] is active at a time. It is held behind a
//! `RwLock<Option<Arc<_>>>`; callers take the `Arc` once per operation so a
//! concurrent [`SecretService::set_active`] never changes the key under an
//! in-flight encrypt or decrypt.
//!
//! Persisted per version: the Argon2id salt and a check value (a fixed
//! plaintext encrypted under the derived key). The passphrase itself is
//! never stored.

use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use ivory_common_secret::{SecretString, REDACTED};
use ivory_server_db::{MasterSecretRow, MasterSecretStore};
use serde::Serialize;
use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

use crate::encryption::{
	decrypt, derive_key, encrypt, generate_salt, EncryptedData, KdfParams, KEY_SIZE,
};
use crate::error::{SecretsError, SecretsResult};

const CHECK_PLAINTEXT: &[u8] = b"ivory-master-secret-check";

/// Derived key material for one master secret version.
pub struct MasterSecret {
	version: u32,
	key: Zeroizing<[u8; KEY_SIZE]>,
}

impl MasterSecret {
	pub fn version(&self) -> u32 {
		self.version
	}

	pub fn encrypt(&self, plaintext: &[u8]) -> SecretsResult<EncryptedData> {
		encrypt(&self.key, plaintext)
	}

	pub fn decrypt(&self, encrypted: &EncryptedData) -> SecretsResult<Zeroizing<Vec<u8>>> {
		decrypt(&self.key, encrypted)
	}
}

impl fmt::Debug for MasterSecret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MasterSecret")
			.field("version", &self.version)
			.field("key", &REDACTED)
			.finish()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretStatus {
	/// A secret is loaded in memory and credentials can be used.
	pub configured: bool,
	pub active_version: Option<u32>,
	/// Highest version on record, which may not be loaded yet.
	pub latest_version: Option<u32>,
}

pub struct SecretService {
	store: Arc<dyn MasterSecretStore>,
	kdf: KdfParams,
	active: RwLock<Option<Arc<MasterSecret>>>,
}

impl SecretService {
	pub fn new(store: Arc<dyn MasterSecretStore>, kdf: KdfParams) -> Self {
		Self {
			store,
			kdf,
			active: RwLock::new(None),
		}
	}

	/// The secret in effect right now.
	pub fn get_active(&self) -> SecretsResult<Arc<MasterSecret>> {
		let guard = self
			.active
			.read()
			.map_err(|_| SecretsError::Internal("master secret lock poisoned".to_string()))?;
		guard.clone().ok_or(SecretsError::NoSecretConfigured)
	}

	fn swap(&self, secret: Option<Arc<MasterSecret>>) -> SecretsResult<()> {
		let mut guard = self
			.active
			.write()
			.map_err(|_| SecretsError::Internal("master secret lock poisoned".to_string()))?;
		*guard = secret;
		Ok(())
	}

	/// Activate the persisted secret at startup.
	///
	/// The passphrase must match the latest version on record. With nothing
	/// on record, version 1 is created from it. A mismatch leaves the service
	/// without an active secret.
	#[instrument(skip(self, passphrase))]
	pub async fn load(&self, passphrase: &SecretString) -> SecretsResult<Arc<MasterSecret>> {
		validate_passphrase(passphrase)?;

		let secret = match self.store.get_latest().await? {
			Some(row) => self.unlock(passphrase, &row).await?,
			None => {
				info!("no master secret on record, creating version 1");
				self.create_version(passphrase, 1).await?
			}
		};

		let secret = Arc::new(secret);
		self.swap(Some(secret.clone()))?;
		info!(version = secret.version, "master secret loaded");
		Ok(secret)
	}

	/// Persist a new version derived from `passphrase` and make it active.
	///
	/// Existing credentials are left encrypted under their old version until
	/// re-encrypted.
	#[instrument(skip(self, passphrase))]
	pub async fn set_active(&self, passphrase: &SecretString) -> SecretsResult<Arc<MasterSecret>> {
		validate_passphrase(passphrase)?;

		let next = match self.store.get_latest().await? {
			Some(row) => row_version(row.version)?
				.checked_add(1)
				.ok_or_else(|| SecretsError::Internal("master secret version overflow".to_string()))?,
			None => 1,
		};

		let secret = Arc::new(self.create_version(passphrase, next).await?);
		self.swap(Some(secret.clone()))?;
		info!(version = next, "master secret activated");
		Ok(secret)
	}

	/// Whether `passphrase` matches the latest version on record.
	#[instrument(skip(self, passphrase))]
	pub async fn verify(&self, passphrase: &SecretString) -> SecretsResult<bool> {
		let Some(row) = self.store.get_latest().await? else {
			return Ok(false);
		};
		match self.unlock(passphrase, &row).await {
			Ok(_) => Ok(true),
			Err(SecretsError::Decryption(_)) => Ok(false),
			Err(e) => Err(e),
		}
	}

	/// Re-derive a historic version from its passphrase.
	#[instrument(skip(self, passphrase))]
	pub async fn unlock_version(
		&self,
		passphrase: &SecretString,
		version: u32,
	) -> SecretsResult<MasterSecret> {
		let row = self
			.store
			.get_version(i64::from(version))
			.await?
			.ok_or(SecretsError::VersionNotFound(version))?;
		self.unlock(passphrase, &row).await
	}

	pub async fn status(&self) -> SecretsResult<SecretStatus> {
		let active_version = match self.get_active() {
			Ok(secret) => Some(secret.version),
			Err(SecretsError::NoSecretConfigured) => None,
			Err(e) => return Err(e),
		};
		let latest_version = match self.store.get_latest().await? {
			Some(row) => Some(row_version(row.version)?),
			None => None,
		};

		Ok(SecretStatus {
			configured: active_version.is_some(),
			active_version,
			latest_version,
		})
	}

	/// Drop the active secret and every persisted version. Credentials
	/// encrypted under them become undecryptable.
	#[instrument(skip(self))]
	pub async fn clear(&self) -> SecretsResult<u64> {
		self.swap(None)?;
		let removed = self.store.delete_all_versions().await?;
		warn!(versions = removed, "master secret cleared");
		Ok(removed)
	}

	async fn derive(
		&self,
		passphrase: &SecretString,
		salt: Vec<u8>,
	) -> SecretsResult<Zeroizing<[u8; KEY_SIZE]>> {
		let passphrase = passphrase.clone();
		let kdf = self.kdf;
		tokio::task::spawn_blocking(move || derive_key(&passphrase, &salt, kdf))
			.await
			.map_err(|e| SecretsError::Internal(format!("key derivation task failed: {e}")))?
	}

	async fn unlock(
		&self,
		passphrase: &SecretString,
		row: &MasterSecretRow,
	) -> SecretsResult<MasterSecret> {
		let version = row_version(row.version)?;
		let key = self.derive(passphrase, row.salt.clone()).await?;

		let check = EncryptedData::from_parts(row.check_ciphertext.clone(), &row.check_nonce)?;
		let matches = decrypt(&key, &check)
			.map(|plaintext| plaintext.as_slice() == CHECK_PLAINTEXT)
			.unwrap_or(false);
		if !matches {
			return Err(SecretsError::Decryption(format!(
				"passphrase does not match master secret version {version}"
			)));
		}

		Ok(MasterSecret { version, key })
	}

	async fn create_version(
		&self,
		passphrase: &SecretString,
		version: u32,
	) -> SecretsResult<MasterSecret> {
		let salt = generate_salt();
		let key = self.derive(passphrase, salt.to_vec()).await?;
		let check = encrypt(&key, CHECK_PLAINTEXT)?;

		self.store
			.insert_version(&MasterSecretRow {
				version: i64::from(version),
				salt: salt.to_vec(),
				check_ciphertext: check.ciphertext,
				check_nonce: check.nonce.to_vec(),
				created_at: Utc::now(),
			})
			.await?;

		Ok(MasterSecret { version, key })
	}
}

fn validate_passphrase(passphrase: &SecretString) -> SecretsResult<()> {
	if passphrase.expose().trim().is_empty() {
		return Err(SecretsError::InvalidPassphrase(
			"passphrase must not be empty".to_string(),
		));
	}
	Ok(())
}

fn row_version(version: i64) -> SecretsResult<u32> {
	u32::try_from(version)
		.map_err(|_| SecretsError::Internal(format!("invalid master secret version {version}")))
}
