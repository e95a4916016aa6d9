// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Compaction runs through an external command.
//!
//! Each run appends exactly one maintenance-log record and writes the
//! combined stdout/stderr to `<id>.log`. A tool that fails to start or exits
//! non-zero produces a `failed` record; the call itself still succeeds.
//!
//! The output file is written before the record and deleted after it, so a
//! record never outlives its output through anything this service does.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ivory_common_secret::SecretString;
use ivory_server_config::CompactionConfig;
use ivory_server_db::{ClusterStore, MaintenanceLogRecord, MaintenanceLogStore, MaintenanceStatus};
use ivory_server_files::{FileError, FileGateway};
use ivory_server_postgres::DbTarget;
use ivory_server_secrets::PasswordService;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{ServerError, ServerResult};

#[derive(Debug, Clone, PartialEq)]
pub struct BloatConfig {
	pub command: String,
	pub args: Vec<String>,
	pub timeout: Option<Duration>,
}

impl From<&CompactionConfig> for BloatConfig {
	fn from(config: &CompactionConfig) -> Self {
		Self {
			command: config.command.clone(),
			args: config.args.clone(),
			timeout: config.timeout,
		}
	}
}

/// What to compact and as whom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloatOptions {
	pub target: DbTarget,
	/// Appended after the connection arguments.
	#[serde(default)]
	pub extra_args: Vec<String>,
}

/// A run started in the background.
pub struct BloatHandle {
	pub id: String,
	pub join: JoinHandle<ServerResult<MaintenanceLogRecord>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningBloat {
	pub id: String,
	pub cluster: String,
	pub started_at: DateTime<Utc>,
}

struct RunEntry {
	info: RunningBloat,
	token: CancellationToken,
}

type RunRegistry = Arc<Mutex<HashMap<String, RunEntry>>>;

/// Deregisters a run when dropped, including when the run's future is.
struct RunGuard {
	id: String,
	running: RunRegistry,
}

impl Drop for RunGuard {
	fn drop(&mut self) {
		match self.running.lock() {
			Ok(mut running) => {
				running.remove(&self.id);
			}
			Err(_) => warn!(id = %self.id, "compaction registry lock poisoned, run not deregistered"),
		}
	}
}

enum Finish {
	Exited(std::io::Result<ExitStatus>),
	Stopped,
	TimedOut(Duration),
}

pub struct BloatService {
	clusters: Arc<dyn ClusterStore>,
	logs: Arc<dyn MaintenanceLogStore>,
	files: Arc<dyn FileGateway>,
	passwords: Arc<PasswordService>,
	config: BloatConfig,
	running: RunRegistry,
}

impl BloatService {
	pub fn new(
		clusters: Arc<dyn ClusterStore>,
		logs: Arc<dyn MaintenanceLogStore>,
		files: Arc<dyn FileGateway>,
		passwords: Arc<PasswordService>,
		config: BloatConfig,
	) -> Self {
		Self {
			clusters,
			logs,
			files,
			passwords,
			config,
			running: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	/// Run to completion and return the appended record.
	#[instrument(skip(self, options), fields(target = %options.target))]
	pub async fn run(&self, cluster: &str, options: BloatOptions) -> ServerResult<MaintenanceLogRecord> {
		let (guard, token) = self.prepare(cluster).await?;
		self.execute(guard, cluster, &options, token).await
	}

	/// Run in the background. The returned id can be passed to [`Self::stop`]
	/// right away.
	#[instrument(skip(self, options), fields(target = %options.target))]
	pub async fn start(self: &Arc<Self>, cluster: &str, options: BloatOptions) -> ServerResult<BloatHandle> {
		let (guard, token) = self.prepare(cluster).await?;
		let id = guard.id.clone();
		let service = Arc::clone(self);
		let cluster = cluster.to_string();
		let join = tokio::spawn(async move { service.execute(guard, &cluster, &options, token).await });
		Ok(BloatHandle { id, join })
	}

	/// Ask a running run to stop. Returns false if no run has that id.
	#[instrument(skip(self))]
	pub fn stop(&self, id: &str) -> ServerResult<bool> {
		let running = self.lock_running()?;
		match running.get(id) {
			Some(entry) => {
				entry.token.cancel();
				info!(cluster = %entry.info.cluster, "compaction stop requested");
				Ok(true)
			}
			None => Ok(false),
		}
	}

	/// Runs in progress, oldest first.
	pub fn running(&self) -> ServerResult<Vec<RunningBloat>> {
		let running = self.lock_running()?;
		let mut runs: Vec<_> = running.values().map(|e| e.info.clone()).collect();
		runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
		Ok(runs)
	}

	pub async fn list(&self, cluster: &str) -> ServerResult<Vec<MaintenanceLogRecord>> {
		Ok(self.logs.list_logs(cluster).await?)
	}

	/// The record and the captured output of run `id`.
	pub async fn log(&self, id: &str) -> ServerResult<(MaintenanceLogRecord, String)> {
		let record = self
			.logs
			.get_log(id)
			.await?
			.ok_or_else(|| ServerError::LogNotFound(id.to_string()))?;
		let output = match self.files.read(id).await {
			Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
			Err(FileError::NotFound(_)) => {
				warn!(id, "maintenance log record has no output file");
				return Err(ServerError::LogOutputMissing(id.to_string()));
			}
			Err(e) => return Err(e.into()),
		};
		Ok((record, output))
	}

	/// Remove every record of `cluster` and its output. Idempotent.
	#[instrument(skip(self))]
	pub async fn delete_all_for_cluster(&self, cluster: &str) -> ServerResult<u64> {
		let mut removed = 0;
		for record in self.logs.list_logs(cluster).await? {
			if self.logs.delete_log(&record.id).await? {
				removed += 1;
			}
			self.files.delete(&record.id).await?;
		}
		debug!(removed, "maintenance logs deleted");
		Ok(removed)
	}

	async fn prepare(&self, cluster: &str) -> ServerResult<(RunGuard, CancellationToken)> {
		if self.clusters.get_cluster(cluster).await?.is_none() {
			return Err(ServerError::ClusterNotFound(cluster.to_string()));
		}

		let id = Uuid::new_v4().to_string();
		let token = CancellationToken::new();
		self.lock_running()?.insert(
			id.clone(),
			RunEntry {
				info: RunningBloat {
					id: id.clone(),
					cluster: cluster.to_string(),
					started_at: Utc::now(),
				},
				token: token.clone(),
			},
		);
		let guard = RunGuard {
			id,
			running: Arc::clone(&self.running),
		};
		Ok((guard, token))
	}

	async fn execute(
		&self,
		guard: RunGuard,
		cluster: &str,
		options: &BloatOptions,
		token: CancellationToken,
	) -> ServerResult<MaintenanceLogRecord> {
		let result = self.execute_inner(&guard.id, cluster, options, token).await;
		drop(guard);
		result
	}

	async fn execute_inner(
		&self,
		id: &str,
		cluster: &str,
		options: &BloatOptions,
		token: CancellationToken,
	) -> ServerResult<MaintenanceLogRecord> {
		let password = self.passwords.get(cluster, &options.target.role).await?;
		let args = command_args(&self.config, options);
		let command_line = std::iter::once(self.config.command.as_str())
			.chain(args.iter().map(String::as_str))
			.collect::<Vec<_>>()
			.join(" ");

		let started_at = Utc::now();
		info!(id, %cluster, command = %command_line, "compaction started");

		let (status, exit_code, output) = match self.spawn(&args, &password) {
			Ok(child) => self.supervise(child, token).await,
			Err(e) => {
				warn!(id, error = %e, "compaction command failed to start");
				(
					MaintenanceStatus::Failed,
					None,
					format!("failed to start {}: {e}\n", self.config.command),
				)
			}
		};

		let record = MaintenanceLogRecord {
			id: id.to_string(),
			cluster: cluster.to_string(),
			command: command_line,
			status,
			exit_code,
			started_at,
			finished_at: Utc::now(),
		};

		self.files.write(id, output.as_bytes()).await?;
		self.logs.append_log(&record).await?;

		info!(id, status = record.status.as_str(), exit_code = ?record.exit_code, "compaction finished");
		Ok(record)
	}

	fn spawn(&self, args: &[String], password: &SecretString) -> std::io::Result<Child> {
		Command::new(&self.config.command)
			.args(args)
			.env("PGPASSWORD", password.expose())
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
	}

	/// Collect output until the process exits, is stopped, or times out.
	async fn supervise(
		&self,
		mut child: Child,
		token: CancellationToken,
	) -> (MaintenanceStatus, Option<i32>, String) {
		let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
		let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
		let mut output = String::new();

		let timeout = self.config.timeout;
		let deadline = async move {
			match timeout {
				Some(limit) => {
					tokio::time::sleep(limit).await;
					limit
				}
				None => std::future::pending().await,
			}
		};
		tokio::pin!(deadline);

		let finish = loop {
			tokio::select! {
				line = next_line(&mut stdout), if stdout.is_some() => {
					push_line(&mut output, &mut stdout, line);
				}
				line = next_line(&mut stderr), if stderr.is_some() => {
					push_line(&mut output, &mut stderr, line);
				}
				status = child.wait(), if stdout.is_none() && stderr.is_none() => {
					break Finish::Exited(status);
				}
				_ = token.cancelled() => break Finish::Stopped,
				limit = &mut deadline => break Finish::TimedOut(limit),
			}
		};

		match finish {
			Finish::Exited(Ok(status)) if status.success() => {
				(MaintenanceStatus::Finished, status.code(), output)
			}
			Finish::Exited(Ok(status)) => (MaintenanceStatus::Failed, status.code(), output),
			Finish::Exited(Err(e)) => {
				output.push_str(&format!("failed to wait for process: {e}\n"));
				(MaintenanceStatus::Failed, None, output)
			}
			Finish::Stopped => {
				let code = kill(&mut child).await;
				output.push_str("stopped by request\n");
				(MaintenanceStatus::Stopped, code, output)
			}
			Finish::TimedOut(limit) => {
				let code = kill(&mut child).await;
				output.push_str(&format!("timed out after {limit:?}\n"));
				(MaintenanceStatus::Failed, code, output)
			}
		}
	}

	fn lock_running(&self) -> ServerResult<std::sync::MutexGuard<'_, HashMap<String, RunEntry>>> {
		self.running
			.lock()
			.map_err(|_| ServerError::Internal("compaction registry lock poisoned".to_string()))
	}
}

/// Configured args, then connection arguments, then the caller's extras.
fn command_args(config: &BloatConfig, options: &BloatOptions) -> Vec<String> {
	let target = &options.target;
	let mut args = config.args.clone();
	args.extend([
		"--host".to_string(),
		target.host.clone(),
		"--port".to_string(),
		target.port.to_string(),
		"--user".to_string(),
		target.role.clone(),
	]);
	if let Some(db) = &target.database {
		args.extend(["--dbname".to_string(), db.clone()]);
	}
	args.extend(options.extra_args.iter().cloned());
	args
}

async fn next_line<R>(reader: &mut Option<Lines<BufReader<R>>>) -> std::io::Result<Option<String>>
where
	R: tokio::io::AsyncRead + Unpin,
{
	match reader {
		Some(lines) => lines.next_line().await,
		None => Ok(None),
	}
}

/// Append `line`, or retire the stream at EOF or on a read error.
fn push_line<R>(
	output: &mut String,
	reader: &mut Option<Lines<BufReader<R>>>,
	line: std::io::Result<Option<String>>,
) {
	match line {
		Ok(Some(line)) => {
			output.push_str(&line);
			output.push('\n');
		}
		Ok(None) => *reader = None,
		Err(e) => {
			output.push_str(&format!("output read error: {e}\n"));
			*reader = None;
		}
	}
}

async fn kill(child: &mut Child) -> Option<i32> {
	if let Err(e) = child.kill().await {
		warn!(error = %e, "failed to kill compaction process");
		return None;
	}
	child.wait().await.ok().and_then(|s| s.code())
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use ivory_server_db::testing::create_test_pool;
	use ivory_server_db::{
		ClusterRepository, CredentialRepository, MaintenanceLogRepository, MasterSecretRepository,
	};
	use ivory_server_files::FileResult;
	use ivory_server_secrets::{KdfParams, SecretService};

	/// Accepts writes and reads, refuses every delete.
	struct UndeletableFiles;

	#[async_trait]
	impl FileGateway for UndeletableFiles {
		async fn write(&self, _name: &str, _data: &[u8]) -> FileResult<()> {
			Ok(())
		}

		async fn read(&self, _name: &str) -> FileResult<Vec<u8>> {
			Ok(b"compacted\n".to_vec())
		}

		async fn exists(&self, _name: &str) -> FileResult<bool> {
			Ok(true)
		}

		async fn delete(&self, _name: &str) -> FileResult<bool> {
			Err(FileError::Io(std::io::Error::new(
				std::io::ErrorKind::PermissionDenied,
				"read-only log directory",
			)))
		}

		async fn list(&self) -> FileResult<Vec<String>> {
			Ok(Vec::new())
		}

		async fn modified(&self, name: &str) -> FileResult<std::time::SystemTime> {
			Err(FileError::NotFound(name.to_string()))
		}
	}

	fn service_config(args: &[&str]) -> BloatConfig {
		BloatConfig {
			command: "pgcompacttable".to_string(),
			args: args.iter().map(|s| s.to_string()).collect(),
			timeout: None,
		}
	}

	#[test]
	fn test_config_from_compaction_section() {
		let section = CompactionConfig {
			command: "pg_repack".to_string(),
			args: vec!["--no-order".to_string()],
			timeout: Some(Duration::from_secs(60)),
		};
		let config = BloatConfig::from(&section);
		assert_eq!(config.command, "pg_repack");
		assert_eq!(config.args, vec!["--no-order"]);
		assert_eq!(config.timeout, Some(Duration::from_secs(60)));
	}

	#[test]
	fn test_push_line_retires_stream_at_eof() {
		let mut output = String::new();
		let mut reader: Option<Lines<BufReader<tokio::io::Empty>>> =
			Some(BufReader::new(tokio::io::empty()).lines());

		push_line(&mut output, &mut reader, Ok(Some("vacuumed".to_string())));
		assert!(reader.is_some());
		push_line(&mut output, &mut reader, Ok(None));
		assert!(reader.is_none());
		assert_eq!(output, "vacuumed\n");
	}

	#[test]
	fn test_command_args_order() {
		let options = BloatOptions {
			target: DbTarget::new("10.0.0.1", 5432, "admin").with_database("app"),
			extra_args: vec!["--table".to_string(), "events".to_string()],
		};
		let args = command_args(&service_config(&["--verbose"]), &options);
		assert_eq!(
			args,
			vec![
				"--verbose", "--host", "10.0.0.1", "--port", "5432", "--user", "admin", "--dbname",
				"app", "--table", "events"
			]
		);
	}

	#[tokio::test]
	async fn test_failed_output_delete_leaves_no_record_behind() {
		let pool = create_test_pool().await;
		let logs = Arc::new(MaintenanceLogRepository::new(pool.clone()));
		let secrets = Arc::new(SecretService::new(
			Arc::new(MasterSecretRepository::new(pool.clone())),
			KdfParams::insecure_fast(),
		));
		let passwords = Arc::new(PasswordService::new(
			Arc::new(CredentialRepository::new(pool.clone())),
			secrets,
		));
		let bloat = BloatService::new(
			Arc::new(ClusterRepository::new(pool)),
			logs.clone(),
			Arc::new(UndeletableFiles),
			passwords,
			service_config(&[]),
		);

		let record = MaintenanceLogRecord {
			id: Uuid::new_v4().to_string(),
			cluster: "pg-prod".to_string(),
			command: "pgcompacttable".to_string(),
			status: MaintenanceStatus::Finished,
			exit_code: Some(0),
			started_at: Utc::now(),
			finished_at: Utc::now(),
		};
		logs.append_log(&record).await.unwrap();

		assert!(bloat.delete_all_for_cluster("pg-prod").await.is_err());
		assert!(logs.get_log(&record.id).await.unwrap().is_none());
	}

	#[test]
	fn test_command_args_without_database() {
		let options = BloatOptions {
			target: DbTarget::new("db1", 6432, "maint"),
			extra_args: Vec::new(),
		};
		let args = command_args(&service_config(&[]), &options);
		assert!(!args.iter().any(|a| a == "--dbname"));
		assert!(!args.iter().any(|a| a.contains("PGPASSWORD")));
	}
}
