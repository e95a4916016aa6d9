// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use ivory_server_db::{CertKind, DbError};
use ivory_server_files::FileError;
use thiserror::Error;

pub type CertResult<T> = Result<T, CertError>;

#[derive(Debug, Error)]
pub enum CertError {
	#[error("certificate not found: {cluster}/{kind}")]
	NotFound { cluster: String, kind: CertKind },

	#[error("invalid certificate: {0}")]
	Invalid(String),

	#[error("database error: {0}")]
	Database(#[from] DbError),

	#[error("file storage error: {0}")]
	File(#[from] FileError),
}

impl CertError {
	pub fn is_not_found(&self) -> bool {
		matches!(self, CertError::NotFound { .. })
	}
}
