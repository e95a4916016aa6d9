// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Server-level error types.

use ivory_server_certs::CertError;
use ivory_server_db::DbError;
use ivory_server_files::FileError;
use ivory_server_postgres::PostgresError;
use ivory_server_secrets::SecretsError;
use ivory_server_sidecar::PatroniError;
use thiserror::Error;

use crate::erase::{EraseStep, StepReport};

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
	// =========================================================================
	// Lookup errors
	// =========================================================================
	#[error("cluster not found: {0}")]
	ClusterNotFound(String),

	#[error("query not found: {0}")]
	QueryNotFound(String),

	#[error("maintenance log not found: {0}")]
	LogNotFound(String),

	/// The record exists but its captured output does not.
	#[error("output of maintenance log {0} is missing")]
	LogOutputMissing(String),

	#[error("invalid input: {0}")]
	InvalidInput(String),

	// =========================================================================
	// Component errors, surfaced unmodified
	// =========================================================================
	#[error(transparent)]
	Secrets(#[from] SecretsError),

	#[error(transparent)]
	Certificates(#[from] CertError),

	#[error(transparent)]
	Database(#[from] DbError),

	#[error(transparent)]
	Files(#[from] FileError),

	#[error(transparent)]
	Patroni(#[from] PatroniError),

	#[error(transparent)]
	Postgres(#[from] PostgresError),

	#[error(transparent)]
	PartialErase(#[from] PartialEraseFailure),

	#[error("internal error: {0}")]
	Internal(String),
}

impl ServerError {
	pub fn is_not_found(&self) -> bool {
		match self {
			ServerError::ClusterNotFound(_)
			| ServerError::QueryNotFound(_)
			| ServerError::LogNotFound(_) => true,
			ServerError::Secrets(e) => e.is_not_found(),
			ServerError::Certificates(e) => e.is_not_found(),
			ServerError::Postgres(PostgresError::Credential(e)) => e.is_not_found(),
			ServerError::Postgres(PostgresError::Certificate(e)) => e.is_not_found(),
			_ => false,
		}
	}

	pub fn as_partial_erase(&self) -> Option<&PartialEraseFailure> {
		match self {
			ServerError::PartialErase(failure) => Some(failure),
			_ => None,
		}
	}

	/// A retry later may succeed without anyone changing anything.
	pub fn is_transient(&self) -> bool {
		match self {
			ServerError::Patroni(e) => e.is_transient(),
			ServerError::Postgres(e) => e.is_transient(),
			_ => false,
		}
	}
}

/// An erase stopped partway. Steps in `completed_steps` are done; resume
/// with `erase_from(cluster, failed_step)`.
#[derive(Debug, Error)]
#[error("erase of {cluster} failed at step {failed_step} after {} completed steps: {cause}", completed_steps.len())]
pub struct PartialEraseFailure {
	pub cluster: String,
	pub completed_steps: Vec<StepReport>,
	pub failed_step: EraseStep,
	#[source]
	pub cause: Box<ServerError>,
}
