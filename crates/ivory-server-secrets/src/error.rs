// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for master secret and credential operations.

use ivory_server_db::DbError;
use thiserror::Error;

pub type SecretsResult<T> = Result<T, SecretsError>;

#[derive(Debug, Error)]
pub enum SecretsError {
	#[error("no master secret configured")]
	NoSecretConfigured,

	/// Wrong key, rotated key, or tampered ciphertext. Never an empty result.
	#[error("decryption failed: {0}")]
	Decryption(String),

	#[error("encryption failed: {0}")]
	Encryption(String),

	#[error("key derivation failed: {0}")]
	Derivation(String),

	#[error("credential not found: {cluster}/{role}")]
	CredentialNotFound { cluster: String, role: String },

	#[error("master secret version {0} not found")]
	VersionNotFound(u32),

	#[error("invalid passphrase: {0}")]
	InvalidPassphrase(String),

	#[error("database error: {0}")]
	Database(#[from] DbError),

	#[error("internal error: {0}")]
	Internal(String),
}

impl SecretsError {
	pub fn is_not_found(&self) -> bool {
		matches!(self, SecretsError::CredentialNotFound { .. })
	}

	pub fn is_decryption(&self) -> bool {
		matches!(self, SecretsError::Decryption(_))
	}
}
