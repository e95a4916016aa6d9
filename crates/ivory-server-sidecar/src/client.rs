// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP(S) client for node-local sidecar agents.
//!
//! Every call resolves the cluster's `patroni` credential (sent as HTTP
//! Basic auth) and, for TLS clusters, its CA and client identity. There are
//! no retries here; callers decide using [`SidecarError::is_transient`].

use std::sync::Arc;
use std::time::Duration;

use ivory_common_secret::SecretString;
use ivory_server_certs::CertService;
use ivory_server_db::{Cluster, NodeAddress};
use ivory_server_secrets::PasswordService;
use reqwest::{Certificate, Client, Identity, Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::error::{SidecarError, SidecarResult};

/// Credential role used to authenticate against the Patroni REST API. The
/// role name doubles as the Basic auth username.
pub const PATRONI_ROLE: &str = "patroni";

const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Clone, Copy)]
pub struct SidecarClientConfig {
	pub request_timeout: Duration,
	pub connect_timeout: Duration,
}

impl Default for SidecarClientConfig {
	fn default() -> Self {
		Self {
			request_timeout: Duration::from_secs(10),
			connect_timeout: Duration::from_secs(3),
		}
	}
}

/// One call to a sidecar.
#[derive(Debug, Clone)]
pub struct SidecarRequest {
	pub method: Method,
	pub path: String,
	pub body: Option<serde_json::Value>,
	/// Overrides the configured request timeout.
	pub timeout: Option<Duration>,
}

impl SidecarRequest {
	pub fn get(path: impl Into<String>) -> Self {
		Self {
			method: Method::GET,
			path: path.into(),
			body: None,
			timeout: None,
		}
	}

	pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
		Self {
			method: Method::POST,
			path: path.into(),
			body: Some(body),
			timeout: None,
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}
}

/// A 2xx answer from a sidecar.
#[derive(Debug, Clone)]
pub struct SidecarResponse {
	pub node: NodeAddress,
	pub status: u16,
	pub body: String,
}

impl SidecarResponse {
	pub fn json<T: DeserializeOwned>(&self) -> SidecarResult<T> {
		serde_json::from_str(&self.body).map_err(|e| SidecarError::InvalidResponse {
			node: self.node.clone(),
			message: e.to_string(),
		})
	}
}

pub struct SidecarClient {
	plain: Client,
	config: SidecarClientConfig,
	passwords: Arc<PasswordService>,
	certs: Arc<CertService>,
}

impl SidecarClient {
	pub fn new(
		config: SidecarClientConfig,
		passwords: Arc<PasswordService>,
		certs: Arc<CertService>,
	) -> SidecarResult<Self> {
		let plain = builder(&config)
			.build()
			.map_err(|e| SidecarError::Tls(format!("failed to create HTTP client: {e}")))?;
		Ok(Self {
			plain,
			config,
			passwords,
			certs,
		})
	}

	pub fn config(&self) -> &SidecarClientConfig {
		&self.config
	}

	/// Send `request` to `node` of `cluster`. Non-2xx answers become errors.
	#[instrument(skip(self, cluster, request), fields(cluster = %cluster.name, node = %node, method = %request.method, path = %request.path))]
	pub async fn call(
		&self,
		cluster: &Cluster,
		node: &NodeAddress,
		request: SidecarRequest,
	) -> SidecarResult<SidecarResponse> {
		let credential = self.credential(&cluster.name).await?;
		let (client, scheme) = if cluster.tls.sidecar {
			(self.tls_client(&cluster.name).await?, "https")
		} else {
			(self.plain.clone(), "http")
		};

		let url = format!("{scheme}://{}:{}{}", node.host, node.port, request.path);
		let mut builder = client
			.request(request.method, &url)
			.timeout(request.timeout.unwrap_or(self.config.request_timeout));
		if let Some(password) = &credential {
			builder = builder.basic_auth(PATRONI_ROLE, Some(password.expose()));
		}
		if let Some(body) = &request.body {
			builder = builder.json(body);
		}

		let response = builder
			.send()
			.await
			.map_err(|e| classify_send_error(node, e))?;
		let status = response.status();
		let body = response
			.text()
			.await
			.map_err(|e| classify_send_error(node, e))?;

		if status.is_success() {
			debug!(status = status.as_u16(), "sidecar call succeeded");
			return Ok(SidecarResponse {
				node: node.clone(),
				status: status.as_u16(),
				body,
			});
		}

		if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
			return Err(SidecarError::Auth {
				node: node.clone(),
				status: status.as_u16(),
			});
		}

		Err(SidecarError::Remote {
			node: node.clone(),
			status: status.as_u16(),
			body: sanitize_body_for_error(&body, MAX_ERROR_BODY),
		})
	}

	/// `None` when the cluster has no `patroni` credential; the call goes out
	/// unauthenticated.
	async fn credential(&self, cluster: &str) -> SidecarResult<Option<SecretString>> {
		match self.passwords.get(cluster, PATRONI_ROLE).await {
			Ok(password) => Ok(Some(password)),
			Err(e) if e.is_not_found() => {
				debug!(cluster, "no patroni credential, calling without auth");
				Ok(None)
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn tls_client(&self, cluster: &str) -> SidecarResult<Client> {
		let bundle = self.certs.bundle(cluster).await?;
		let mut builder = builder(&self.config).use_rustls_tls();

		if let Some(ca) = &bundle.ca {
			let ca = Certificate::from_pem(ca)
				.map_err(|e| SidecarError::Tls(format!("invalid CA certificate for {cluster}: {e}")))?;
			builder = builder.add_root_certificate(ca);
		}
		if let Some(pem) = bundle.identity_pem() {
			let identity = Identity::from_pem(pem.expose())
				.map_err(|e| SidecarError::Tls(format!("invalid client identity for {cluster}: {e}")))?;
			builder = builder.identity(identity);
		}

		builder
			.build()
			.map_err(|e| SidecarError::Tls(format!("failed to create TLS client for {cluster}: {e}")))
	}
}

fn builder(config: &SidecarClientConfig) -> reqwest::ClientBuilder {
	Client::builder()
		.user_agent(concat!("ivory/", env!("CARGO_PKG_VERSION")))
		.connect_timeout(config.connect_timeout)
		.timeout(config.request_timeout)
		.redirect(reqwest::redirect::Policy::none())
}

fn classify_send_error(node: &NodeAddress, err: reqwest::Error) -> SidecarError {
	if err.is_timeout() || err.is_connect() {
		SidecarError::Connect {
			node: node.clone(),
			message: err.to_string(),
		}
	} else {
		SidecarError::Request(err.to_string())
	}
}

fn sanitize_body_for_error(body: &str, max_len: usize) -> String {
	let sanitized: String = body
		.chars()
		.filter(|c| !c.is_control() || *c == ' ')
		.take(max_len)
		.collect();
	if body.chars().count() > max_len {
		format!("{sanitized}...")
	} else {
		sanitized
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_sanitize_truncates_and_strips_control() {
		assert_eq!(sanitize_body_for_error("a\nb\tc", 10), "abc");
		let long = "x".repeat(300);
		let out = sanitize_body_for_error(&long, 200);
		assert_eq!(out.len(), 203);
		assert!(out.ends_with("..."));
	}

	#[test]
	fn test_request_builders() {
		let req = SidecarRequest::post("/restart", serde_json::json!({}))
			.with_timeout(Duration::from_secs(30));
		assert_eq!(req.method, Method::POST);
		assert_eq!(req.timeout, Some(Duration::from_secs(30)));
		assert!(SidecarRequest::get("/cluster").body.is_none());
	}
}
