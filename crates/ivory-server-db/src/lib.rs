// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! # ivory-server-db
//!
//! Metadata persistence for the Ivory server using SQLite via sqlx.
//!
//! Each entity kind has its own table and repository, and no repository
//! reads another's rows. Referential integrity between them (everything
//! keyed by cluster name) is maintained by the erase service, not by
//! foreign keys.
//!
//! ## Repository Pattern
//!
//! - **`*Store` trait**: the interface services depend on
//! - **`*Repository` struct**: sqlx implementation holding a `SqlitePool`
//!
//! ## Return Type Conventions
//!
//! | Operation | Return type |
//! |-----------|-------------|
//! | Get by key | `Result<Option<T>>` |
//! | List | `Result<Vec<T>>` |
//! | Delete one | `Result<bool>` (true if a row was removed) |
//! | Delete by cluster | `Result<u64>` (rows removed) |
//!
//! Deletes never fail because the target is already gone.

pub mod certificate;
pub mod cluster;
pub mod credential;
pub mod error;
pub mod maintenance_log;
pub mod master_secret;
pub mod migrations;
pub mod pool;
pub mod query;
pub mod tag;
pub mod testing;

pub use certificate::{CertKind, CertificateRecord, CertificateRepository, CertificateStore};
pub use cluster::{Cluster, ClusterRepository, ClusterStore, ClusterTls, NodeAddress};
pub use credential::{CredentialRepository, CredentialRow, CredentialStore};
pub use error::{DbError, Result};
pub use maintenance_log::{
	MaintenanceLogRecord, MaintenanceLogRepository, MaintenanceLogStore, MaintenanceStatus,
};
pub use master_secret::{MasterSecretRepository, MasterSecretRow, MasterSecretStore};
pub use migrations::run_migrations;
pub use pool::create_pool;
pub use query::{QueryRecord, QueryRepository, QueryStore};
pub use tag::{TagRepository, TagStore};
