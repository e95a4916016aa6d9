// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Ivory orchestration command line.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};
use ivory_common_secret::SecretString;
use ivory_server::{
	create_app_state, version, AppState, BloatOptions, ClusterSpec, EraseStep, NewQuery,
};
use ivory_server_config::LogFormat;
use ivory_server_db::{CertKind, ClusterTls, NodeAddress};
use ivory_server_postgres::DbTarget;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Ivory - orchestration for PostgreSQL HA clusters.
#[derive(Parser, Debug)]
#[command(name = "ivory-server", about = "Ivory PostgreSQL cluster orchestration", version)]
struct Args {
	/// Configuration file. Defaults to /etc/ivory/server.toml.
	#[arg(long, global = true, env = "IVORY_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Master secret lifecycle
	Secret {
		#[command(subcommand)]
		action: SecretCommand,
	},
	/// Cluster definitions and live state
	Cluster {
		#[command(subcommand)]
		action: ClusterCommand,
	},
	/// Stored role passwords
	Password {
		#[command(subcommand)]
		action: PasswordCommand,
	},
	/// Cluster TLS material
	Cert {
		#[command(subcommand)]
		action: CertCommand,
	},
	/// Patroni control actions
	Patroni {
		#[command(subcommand)]
		action: PatroniCommand,
	},
	/// Saved queries
	Query {
		#[command(subcommand)]
		action: QueryCommand,
	},
	/// Compaction runs
	Bloat {
		#[command(subcommand)]
		action: BloatCommand,
	},
	/// Remove stored state
	Erase {
		#[command(subcommand)]
		action: EraseCommand,
	},
	/// Show version and build information
	Version,
}

#[derive(Subcommand, Debug)]
enum SecretCommand {
	Status,
	/// Activate a new master secret version without re-encrypting credentials.
	/// Follow with `secret reencrypt` once the new passphrase is configured.
	Set {
		#[arg(long, env = "IVORY_SERVER_NEW_MASTER_SECRET", hide_env_values = true)]
		passphrase: String,
	},
	/// Re-encrypt credentials still sealed by an older version under the
	/// configured master secret
	Reencrypt {
		#[arg(long, env = "IVORY_SERVER_PREVIOUS_MASTER_SECRET", hide_env_values = true)]
		previous: String,
	},
	/// Replace the configured master secret and re-encrypt every credential
	Rotate {
		#[arg(long, env = "IVORY_SERVER_NEW_MASTER_SECRET", hide_env_values = true)]
		passphrase: String,
	},
}

#[derive(Subcommand, Debug)]
enum ClusterCommand {
	/// Create or replace a cluster definition
	Create {
		name: String,
		/// Sidecar address, `host:port` or `host`. Repeat per node.
		#[arg(long = "node", required = true)]
		nodes: Vec<NodeAddress>,
		#[arg(long = "tag")]
		tags: Vec<String>,
		#[arg(long)]
		tls_sidecar: bool,
		#[arg(long)]
		tls_database: bool,
	},
	Get {
		name: String,
	},
	List {
		#[arg(long)]
		tag: Option<String>,
	},
	/// Definition merged with live topology
	State {
		name: String,
	},
}

#[derive(Subcommand, Debug)]
enum PasswordCommand {
	Set {
		#[arg(long)]
		cluster: String,
		#[arg(long)]
		role: String,
		#[arg(long, env = "IVORY_SERVER_ROLE_PASSWORD", hide_env_values = true)]
		password: String,
	},
	List {
		#[arg(long)]
		cluster: String,
	},
}

#[derive(Subcommand, Debug)]
enum CertCommand {
	Add {
		#[arg(long)]
		cluster: String,
		/// client_ca, client_cert or client_key
		#[arg(long)]
		kind: CertKind,
		#[arg(long)]
		file: PathBuf,
		/// RFC 3339 expiry
		#[arg(long)]
		expires_at: Option<DateTime<Utc>>,
	},
	List {
		#[arg(long)]
		cluster: String,
	},
	/// Delete certificate files that have no metadata
	Gc,
}

#[derive(Subcommand, Debug)]
enum PatroniCommand {
	Failover {
		#[arg(long)]
		cluster: String,
		#[arg(long)]
		candidate: String,
	},
	Switchover {
		#[arg(long)]
		cluster: String,
		#[arg(long)]
		candidate: Option<String>,
		/// RFC 3339 time to schedule the switchover at
		#[arg(long)]
		at: Option<DateTime<Utc>>,
	},
	Restart {
		#[arg(long)]
		cluster: String,
		#[arg(long)]
		node: NodeAddress,
	},
	Reinit {
		#[arg(long)]
		cluster: String,
		#[arg(long)]
		node: NodeAddress,
	},
}

#[derive(ClapArgs, Debug)]
struct TargetArgs {
	#[arg(long)]
	host: String,
	#[arg(long, default_value_t = 5432)]
	port: u16,
	#[arg(long)]
	role: String,
	#[arg(long)]
	database: Option<String>,
	/// Overrides postgres.query_timeout_secs for this call.
	#[arg(long)]
	statement_timeout_secs: Option<u64>,
}

impl From<TargetArgs> for DbTarget {
	fn from(args: TargetArgs) -> Self {
		DbTarget {
			host: args.host,
			port: args.port,
			database: args.database,
			role: args.role,
			statement_timeout: args.statement_timeout_secs.map(Duration::from_secs),
		}
	}
}

#[derive(Subcommand, Debug)]
enum QueryCommand {
	Add {
		#[arg(long)]
		cluster: String,
		#[arg(long)]
		name: String,
		#[arg(long)]
		sql: String,
		/// Default positional parameter. Repeat in order.
		#[arg(long = "param")]
		params: Vec<String>,
		#[arg(long)]
		description: Option<String>,
	},
	List {
		#[arg(long)]
		cluster: String,
	},
	Run {
		id: String,
		#[command(flatten)]
		target: TargetArgs,
		/// Replaces the saved parameters when given.
		#[arg(long = "param")]
		params: Vec<String>,
	},
}

#[derive(Subcommand, Debug)]
enum BloatCommand {
	Run {
		#[arg(long)]
		cluster: String,
		#[command(flatten)]
		target: TargetArgs,
		/// Passed to the compaction command after the connection arguments.
		#[arg(last = true)]
		extra_args: Vec<String>,
	},
	List {
		#[arg(long)]
		cluster: String,
	},
	Log {
		id: String,
	},
}

#[derive(Subcommand, Debug)]
enum EraseCommand {
	/// Erase one cluster. Safe to repeat.
	Cluster {
		name: String,
		/// Resume from this step after a partial failure.
		#[arg(long)]
		from: Option<EraseStep>,
	},
	/// Erase every cluster and the master secret
	All {
		#[arg(long)]
		yes: bool,
	},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if let Command::Version = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => ivory_server_config::load_config_with_file(path),
		None => ivory_server_config::load_config(),
	}
	.context("failed to load configuration")?;

	let (text_layer, json_layer) = match config.logging.format {
		LogFormat::Text => (
			Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
			None,
		),
		LogFormat::Json => (
			None,
			Some(
				tracing_subscriber::fmt::layer()
					.json()
					.with_writer(std::io::stderr),
			),
		),
	};
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.logging.level.clone().into()),
		)
		.with(text_layer)
		.with(json_layer)
		.init();

	tracing::info!(database = %config.database.url, "starting ivory-server");

	let pool = ivory_server_db::create_pool(&config.database.url)
		.await
		.context("failed to open metadata database")?;
	ivory_server_db::run_migrations(&pool)
		.await
		.context("failed to run migrations")?;

	let state = create_app_state(pool, &config).await?;
	run(args.command, &state, config.master_secret.as_ref()).await
}

async fn run(
	command: Command,
	state: &AppState,
	configured_secret: Option<&SecretString>,
) -> anyhow::Result<()> {
	match command {
		Command::Version => println!("{}", version::format_version_info()),

		Command::Secret { action } => match action {
			SecretCommand::Status => print_json(&state.secrets.status().await?)?,
			SecretCommand::Set { passphrase } => {
				let secret = state.secrets.set_active(&SecretString::from(passphrase)).await?;
				print_json(&serde_json::json!({ "active_version": secret.version() }))?;
			}
			SecretCommand::Reencrypt { previous } => {
				let report = state
					.passwords
					.reencrypt_all(&SecretString::from(previous))
					.await?;
				print_json(&report)?;
			}
			SecretCommand::Rotate { passphrase } => {
				let Some(previous) = configured_secret else {
					bail!("rotation needs the current passphrase in {}", ivory_server_config::MASTER_SECRET_ENV);
				};
				let report = state
					.passwords
					.rotate(previous, &SecretString::from(passphrase))
					.await?;
				print_json(&report)?;
			}
		},

		Command::Cluster { action } => match action {
			ClusterCommand::Create {
				name,
				nodes,
				tags,
				tls_sidecar,
				tls_database,
			} => {
				let definition = state
					.clusters
					.upsert(ClusterSpec {
						name,
						nodes,
						tags,
						tls: ClusterTls {
							sidecar: tls_sidecar,
							database: tls_database,
						},
					})
					.await?;
				print_json(&definition)?;
			}
			ClusterCommand::Get { name } => print_json(&state.clusters.get_definition(&name).await?)?,
			ClusterCommand::List { tag } => print_json(&state.clusters.list(tag.as_deref()).await?)?,
			ClusterCommand::State { name } => print_json(&state.clusters.get_with_state(&name).await?)?,
		},

		Command::Password { action } => match action {
			PasswordCommand::Set {
				cluster,
				role,
				password,
			} => {
				state.clusters.get(&cluster).await?;
				state
					.passwords
					.save(&cluster, &role, &SecretString::from(password))
					.await?;
				print_json(&serde_json::json!({ "cluster": cluster, "role": role }))?;
			}
			PasswordCommand::List { cluster } => print_json(&state.passwords.list(&cluster).await?)?,
		},

		Command::Cert { action } => match action {
			CertCommand::Add {
				cluster,
				kind,
				file,
				expires_at,
			} => {
				state.clusters.get(&cluster).await?;
				let pem = tokio::fs::read(&file)
					.await
					.with_context(|| format!("failed to read {}", file.display()))?;
				print_json(&state.certs.save(&cluster, kind, &pem, expires_at).await?)?;
			}
			CertCommand::List { cluster } => print_json(&state.certs.list(&cluster).await?)?,
			CertCommand::Gc => print_json(&state.certs.gc_orphans().await?)?,
		},

		Command::Patroni { action } => {
			let outcome = match action {
				PatroniCommand::Failover { cluster, candidate } => {
					let cluster = state.clusters.get(&cluster).await?;
					state.patroni.failover(&cluster, &candidate).await?
				}
				PatroniCommand::Switchover {
					cluster,
					candidate,
					at,
				} => {
					let cluster = state.clusters.get(&cluster).await?;
					state
						.patroni
						.switchover(&cluster, candidate.as_deref(), at)
						.await?
				}
				PatroniCommand::Restart { cluster, node } => {
					let cluster = state.clusters.get(&cluster).await?;
					state.patroni.restart(&cluster, &node).await?
				}
				PatroniCommand::Reinit { cluster, node } => {
					let cluster = state.clusters.get(&cluster).await?;
					state.patroni.reinitialize(&cluster, &node).await?
				}
			};
			print_json(&outcome)?;
		}

		Command::Query { action } => match action {
			QueryCommand::Add {
				cluster,
				name,
				sql,
				params,
				description,
			} => {
				let record = state
					.queries
					.create(NewQuery {
						cluster,
						name,
						sql,
						params,
						description,
					})
					.await?;
				print_json(&record)?;
			}
			QueryCommand::List { cluster } => print_json(&state.queries.list(&cluster).await?)?,
			QueryCommand::Run { id, target, params } => {
				let params = (!params.is_empty()).then_some(params);
				let result = state.queries.run(&id, &target.into(), params).await?;
				print_json(&result)?;
			}
		},

		Command::Bloat { action } => match action {
			BloatCommand::Run {
				cluster,
				target,
				extra_args,
			} => {
				let record = state
					.bloat
					.run(
						&cluster,
						BloatOptions {
							target: target.into(),
							extra_args,
						},
					)
					.await?;
				print_json(&record)?;
			}
			BloatCommand::List { cluster } => print_json(&state.bloat.list(&cluster).await?)?,
			BloatCommand::Log { id } => {
				let (record, output) = state.bloat.log(&id).await?;
				eprintln!(
					"{} {} exit={:?}",
					record.id,
					record.status.as_str(),
					record.exit_code
				);
				print!("{output}");
			}
		},

		Command::Erase { action } => match action {
			EraseCommand::Cluster { name, from } => {
				let report = state
					.erase
					.erase_from(&name, from.unwrap_or(EraseStep::Credentials))
					.await;
				match report {
					Ok(report) => print_json(&report)?,
					Err(e) => {
						if let Some(failure) = e.as_partial_erase() {
							eprintln!(
								"resume with: ivory-server erase cluster {} --from {}",
								failure.cluster, failure.failed_step
							);
						}
						return Err(e.into());
					}
				}
			}
			EraseCommand::All { yes } => {
				if !yes {
					bail!("erase all removes every cluster and the master secret; pass --yes to confirm");
				}
				print_json(&state.erase.erase_all().await?)?;
			}
		},
	}

	Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
	println!("{}", serde_json::to_string_pretty(value)?);
	Ok(())
}
