// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for sidecar calls and Patroni actions.

use ivory_server_certs::CertError;
use ivory_server_db::NodeAddress;
use ivory_server_secrets::SecretsError;
use thiserror::Error;

pub type SidecarResult<T> = Result<T, SidecarError>;
pub type PatroniResult<T> = Result<T, PatroniError>;

#[derive(Debug, Error)]
pub enum SidecarError {
	/// The node refused our credential or client certificate.
	#[error("authentication rejected by {node} (HTTP {status})")]
	Auth { node: NodeAddress, status: u16 },

	/// Timeout, refused connection, TLS handshake failure.
	#[error("cannot reach {node}: {message}")]
	Connect { node: NodeAddress, message: String },

	#[error("{node} returned HTTP {status}: {body}")]
	Remote {
		node: NodeAddress,
		status: u16,
		body: String,
	},

	#[error("credential error: {0}")]
	Credential(#[from] SecretsError),

	#[error("certificate error: {0}")]
	Certificate(#[from] CertError),

	#[error("TLS configuration error: {0}")]
	Tls(String),

	#[error("invalid response from {node}: {message}")]
	InvalidResponse { node: NodeAddress, message: String },

	#[error("request failed: {0}")]
	Request(String),
}

impl SidecarError {
	/// Worth retrying later. Everything else will fail the same way again.
	pub fn is_transient(&self) -> bool {
		matches!(self, SidecarError::Connect { .. })
	}

	pub fn is_auth(&self) -> bool {
		matches!(self, SidecarError::Auth { .. })
	}
}

#[derive(Debug, Error)]
pub enum PatroniError {
	#[error("no node of cluster {cluster} answered: {last_error}")]
	NoReachableNode { cluster: String, last_error: String },

	#[error("cluster {cluster} has no leader")]
	NoLeader { cluster: String },

	#[error("{node} is not a node of cluster {cluster}")]
	UnknownNode { cluster: String, node: NodeAddress },

	/// Patroni answered and refused the action.
	#[error("{node} rejected the action (HTTP {status}): {message}")]
	ActionRejected {
		node: NodeAddress,
		status: u16,
		message: String,
	},

	#[error("authentication rejected by {node} (HTTP {status})")]
	Auth { node: NodeAddress, status: u16 },

	#[error(transparent)]
	Sidecar(SidecarError),
}

impl PatroniError {
	pub fn is_transient(&self) -> bool {
		match self {
			PatroniError::NoReachableNode { .. } => true,
			PatroniError::Sidecar(e) => e.is_transient(),
			_ => false,
		}
	}
}

impl From<SidecarError> for PatroniError {
	fn from(err: SidecarError) -> Self {
		match err {
			SidecarError::Auth { node, status } => PatroniError::Auth { node, status },
			SidecarError::Remote { node, status, body } => PatroniError::ActionRejected {
				node,
				status,
				message: body,
			},
			other => PatroniError::Sidecar(other),
		}
	}
}
