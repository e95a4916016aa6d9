// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use ivory_server_certs::CertError;
use ivory_server_secrets::SecretsError;
use thiserror::Error;

pub type PostgresResult<T> = Result<T, PostgresError>;

#[derive(Debug, Error)]
pub enum PostgresError {
	#[error("authentication failed for {target}: {message}")]
	Auth { target: String, message: String },

	#[error("cannot connect to {target}: {message}")]
	Connect { target: String, message: String },

	/// The server ran the statement and reported an error.
	#[error("query failed{}: {message}", code.as_ref().map(|c| format!(" ({c})")).unwrap_or_default())]
	Query {
		code: Option<String>,
		message: String,
	},

	#[error("credential error: {0}")]
	Credential(#[from] SecretsError),

	#[error("certificate error: {0}")]
	Certificate(#[from] CertError),
}

impl PostgresError {
	pub fn is_transient(&self) -> bool {
		matches!(self, PostgresError::Connect { .. })
	}
}
