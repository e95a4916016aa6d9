// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod compaction;
mod database;
mod logging;
mod paths;
mod postgres;
mod sidecar;

pub use compaction::{CompactionConfig, CompactionConfigLayer};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use paths::{PathsConfig, PathsConfigLayer};
pub use postgres::{PostgresConfig, PostgresConfigLayer};
pub use sidecar::{SidecarConfig, SidecarConfigLayer};
