// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! # ivory-server-postgres
//!
//! Direct SQL against cluster nodes.
//!
//! Every call opens its own connection with the role's decrypted password
//! and closes it afterwards; there is no pool. Parameters are sent as text,
//! so statements cast them where a typed value is needed (`$1::int`).
//!
//! Statements are bounded twice by the same limit: the server enforces it as
//! `statement_timeout`, and the client drops the connection once it passes.

mod error;
mod value;

pub use error::{PostgresError, PostgresResult};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ivory_server_certs::CertService;
use ivory_server_db::Cluster;
use ivory_server_secrets::PasswordService;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{Column, Connection, Executor, Statement, TypeInfo};
use tracing::{debug, instrument, warn};

/// SQLSTATE codes for rejected logins.
const AUTH_SQLSTATES: [&str; 2] = ["28P01", "28000"];
/// `query_canceled`, raised for `statement_timeout` as well as explicit cancels.
const QUERY_CANCELED: &str = "57014";

#[derive(Debug, Clone)]
pub struct PostgresGatewayConfig {
	pub connect_timeout: Duration,
	/// Limit for the statement phase of a call, unless the target overrides it.
	pub query_timeout: Duration,
	pub default_database: String,
}

impl Default for PostgresGatewayConfig {
	fn default() -> Self {
		Self {
			connect_timeout: Duration::from_secs(5),
			query_timeout: Duration::from_secs(30),
			default_database: "postgres".to_string(),
		}
	}
}

/// Where to connect and as whom. The password comes from the credential
/// store under `(cluster, role)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbTarget {
	pub host: String,
	pub port: u16,
	#[serde(default)]
	pub database: Option<String>,
	pub role: String,
	/// Replaces the gateway's query timeout for calls against this target.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub statement_timeout: Option<Duration>,
}

impl DbTarget {
	pub fn new(host: impl Into<String>, port: u16, role: impl Into<String>) -> Self {
		Self {
			host: host.into(),
			port,
			database: None,
			role: role.into(),
			statement_timeout: None,
		}
	}

	pub fn with_database(mut self, database: impl Into<String>) -> Self {
		self.database = Some(database.into());
		self
	}

	pub fn with_statement_timeout(mut self, limit: Duration) -> Self {
		self.statement_timeout = Some(limit);
		self
	}
}

impl fmt::Display for DbTarget {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}@{}:{}", self.role, self.host, self.port)?;
		if let Some(db) = &self.database {
			write!(f, "/{db}")?;
		}
		Ok(())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
	pub name: String,
	pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
	pub fields: Vec<Field>,
	pub rows: Vec<Vec<serde_json::Value>>,
	pub elapsed_ms: u64,
}

pub struct PostgresGateway {
	config: PostgresGatewayConfig,
	passwords: Arc<PasswordService>,
	certs: Arc<CertService>,
}

impl PostgresGateway {
	pub fn new(
		config: PostgresGatewayConfig,
		passwords: Arc<PasswordService>,
		certs: Arc<CertService>,
	) -> Self {
		Self {
			config,
			passwords,
			certs,
		}
	}

	/// Run one statement and return its result set.
	#[instrument(skip(self, cluster, sql, params), fields(cluster = %cluster.name, target = %target, params = params.len()))]
	pub async fn execute(
		&self,
		cluster: &Cluster,
		target: &DbTarget,
		sql: &str,
		params: &[String],
	) -> PostgresResult<QueryResult> {
		let limit = self.statement_limit(target);
		let mut conn = self.connect(cluster, target).await?;
		let started = Instant::now();

		let outcome = tokio::time::timeout(limit, async {
			let statement = conn.prepare(sql).await.map_err(|e| query_error(target, e))?;
			let fields = statement
				.columns()
				.iter()
				.map(|c| Field {
					name: c.name().to_string(),
					type_name: c.type_info().name().to_string(),
				})
				.collect::<Vec<_>>();

			let mut query = statement.query();
			for param in params {
				query = query.bind(param.as_str());
			}
			let rows = query.fetch_all(&mut conn).await.map_err(|e| query_error(target, e))?;

			Ok::<_, PostgresError>(QueryResult {
				fields,
				rows: rows.iter().map(value::decode_row).collect(),
				elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
			})
		})
		.await
		.ok();

		let result = finish(conn, outcome, target, limit).await;
		if let Ok(r) = &result {
			debug!(rows = r.rows.len(), elapsed_ms = r.elapsed_ms, "query finished");
		}
		result
	}

	/// Names of connectable databases, sorted.
	#[instrument(skip(self, cluster), fields(cluster = %cluster.name, target = %target))]
	pub async fn databases(&self, cluster: &Cluster, target: &DbTarget) -> PostgresResult<Vec<String>> {
		let limit = self.statement_limit(target);
		let mut conn = self.connect(cluster, target).await?;
		let outcome = tokio::time::timeout(
			limit,
			sqlx::query_scalar::<_, String>(
				"SELECT datname::text FROM pg_database WHERE NOT datistemplate AND datallowconn ORDER BY datname",
			)
			.fetch_all(&mut conn),
		)
		.await
		.ok()
		.map(|r| r.map_err(|e| query_error(target, e)));
		finish(conn, outcome, target, limit).await
	}

	/// Cancel the running query of backend `pid`. Returns whether a signal was sent.
	#[instrument(skip(self, cluster), fields(cluster = %cluster.name, target = %target))]
	pub async fn cancel(&self, cluster: &Cluster, target: &DbTarget, pid: i32) -> PostgresResult<bool> {
		self.signal_backend(cluster, target, "SELECT pg_cancel_backend($1)", pid)
			.await
	}

	/// Terminate backend `pid`. Returns whether a signal was sent.
	#[instrument(skip(self, cluster), fields(cluster = %cluster.name, target = %target))]
	pub async fn terminate(&self, cluster: &Cluster, target: &DbTarget, pid: i32) -> PostgresResult<bool> {
		self.signal_backend(cluster, target, "SELECT pg_terminate_backend($1)", pid)
			.await
	}

	async fn signal_backend(
		&self,
		cluster: &Cluster,
		target: &DbTarget,
		sql: &'static str,
		pid: i32,
	) -> PostgresResult<bool> {
		let limit = self.statement_limit(target);
		let mut conn = self.connect(cluster, target).await?;
		let outcome = tokio::time::timeout(
			limit,
			sqlx::query_scalar::<_, bool>(sql).bind(pid).fetch_one(&mut conn),
		)
		.await
		.ok()
		.map(|r| r.map_err(|e| query_error(target, e)));
		finish(conn, outcome, target, limit).await
	}

	fn statement_limit(&self, target: &DbTarget) -> Duration {
		target.statement_timeout.unwrap_or(self.config.query_timeout)
	}

	/// Connection options for `target`, with TLS material when the cluster
	/// requires database TLS.
	pub async fn connect_options(
		&self,
		cluster: &Cluster,
		target: &DbTarget,
	) -> PostgresResult<PgConnectOptions> {
		let password = self.passwords.get(&cluster.name, &target.role).await?;
		let database = target
			.database
			.as_deref()
			.unwrap_or(&self.config.default_database);

		let mut opts = PgConnectOptions::new()
			.host(&target.host)
			.port(target.port)
			.database(database)
			.username(&target.role)
			.password(password.expose())
			.application_name("ivory")
			.options([(
				"statement_timeout",
				format!("{}ms", self.statement_limit(target).as_millis()),
			)]);

		if cluster.tls.database {
			let bundle = self.certs.bundle(&cluster.name).await?;
			opts = match &bundle.ca {
				Some(ca) => opts
					.ssl_mode(PgSslMode::VerifyCa)
					.ssl_root_cert_from_pem(ca.clone()),
				None => opts.ssl_mode(PgSslMode::Require),
			};
			if let (Some(cert), Some(key)) = (&bundle.cert, &bundle.key) {
				opts = opts
					.ssl_client_cert_from_pem(cert)
					.ssl_client_key_from_pem(key.expose());
			}
		} else {
			opts = opts.ssl_mode(PgSslMode::Prefer);
		}

		Ok(opts)
	}

	async fn connect(&self, cluster: &Cluster, target: &DbTarget) -> PostgresResult<PgConnection> {
		let opts = self.connect_options(cluster, target).await?;

		match tokio::time::timeout(self.config.connect_timeout, PgConnection::connect_with(&opts)).await {
			Ok(Ok(conn)) => Ok(conn),
			Ok(Err(e)) => Err(connect_error(target, e)),
			Err(_) => Err(PostgresError::Connect {
				target: target.to_string(),
				message: format!(
					"timed out after {}ms",
					self.config.connect_timeout.as_millis()
				),
			}),
		}
	}
}

/// Close `conn` after a bounded statement. `None` means the limit passed;
/// the connection is then dropped rather than closed, since a graceful close
/// would wait behind the running statement.
async fn finish<T>(
	conn: PgConnection,
	outcome: Option<PostgresResult<T>>,
	target: &DbTarget,
	limit: Duration,
) -> PostgresResult<T> {
	match outcome {
		Some(result) => {
			close(conn).await;
			result
		}
		None => {
			drop(conn);
			warn!(target = %target, limit_ms = limit.as_millis() as u64, "statement timed out, connection dropped");
			Err(statement_timeout_error(target, limit))
		}
	}
}

fn statement_timeout_error(target: &DbTarget, limit: Duration) -> PostgresError {
	PostgresError::Connect {
		target: target.to_string(),
		message: format!("statement timed out after {}ms", limit.as_millis()),
	}
}

async fn close(conn: PgConnection) {
	if let Err(e) = conn.close().await {
		warn!(error = %e, "failed to close postgres connection cleanly");
	}
}

fn connect_error(target: &DbTarget, err: sqlx::Error) -> PostgresError {
	if let sqlx::Error::Database(db) = &err {
		if db
			.code()
			.is_some_and(|code| AUTH_SQLSTATES.iter().any(|s| *s == code))
		{
			return PostgresError::Auth {
				target: target.to_string(),
				message: db.message().to_string(),
			};
		}
	}
	PostgresError::Connect {
		target: target.to_string(),
		message: err.to_string(),
	}
}

fn query_error(target: &DbTarget, err: sqlx::Error) -> PostgresError {
	match err {
		sqlx::Error::Database(db)
			if db.code().as_deref() == Some(QUERY_CANCELED)
				&& db.message().contains("statement timeout") =>
		{
			PostgresError::Connect {
				target: target.to_string(),
				message: db.message().to_string(),
			}
		}
		sqlx::Error::Database(db) => PostgresError::Query {
			code: db.code().map(|c| c.into_owned()),
			message: db.message().to_string(),
		},
		other => PostgresError::Query {
			code: None,
			message: other.to_string(),
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_target_display_omits_password() {
		let target = DbTarget::new("10.0.0.1", 5432, "admin").with_database("app");
		assert_eq!(target.to_string(), "admin@10.0.0.1:5432/app");
		assert_eq!(DbTarget::new("h", 1, "r").to_string(), "r@h:1");
	}

	#[test]
	fn test_io_failure_is_a_transient_connect_error() {
		let target = DbTarget::new("10.0.0.1", 5432, "admin");
		let err = connect_error(
			&target,
			sqlx::Error::Io(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused")),
		);
		assert!(matches!(err, PostgresError::Connect { .. }));
		assert!(err.is_transient());
	}

	#[test]
	fn test_statement_timeout_is_transient() {
		let target = DbTarget::new("10.0.0.1", 5432, "admin");
		let err = statement_timeout_error(&target, Duration::from_millis(250));
		assert!(err.is_transient());
		assert!(err.to_string().contains("250ms"));
	}

	#[test]
	fn test_query_error_is_terminal() {
		let err = query_error(&DbTarget::new("h", 1, "r"), sqlx::Error::RowNotFound);
		assert!(matches!(err, PostgresError::Query { code: None, .. }));
		assert!(!err.is_transient());
	}
}
