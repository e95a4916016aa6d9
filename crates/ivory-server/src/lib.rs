// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! # ivory-server
//!
//! Orchestration services for Ivory-managed PostgreSQL clusters.
//!
//! | Service | Purpose |
//! |---------|---------|
//! | [`ClusterService`] | Cluster definitions, tags, live topology |
//! | [`BloatService`] | Compaction runs and their logs |
//! | [`QueryService`] | Saved queries and running them |
//! | [`EraseService`] | Ordered, resumable removal of a cluster's state |
//!
//! Everything is wired once by [`create_app_state`].

pub mod bloat;
pub mod cluster;
pub mod erase;
pub mod error;
pub mod query;
pub mod state;
pub mod version;

pub use bloat::{BloatConfig, BloatHandle, BloatOptions, BloatService, RunningBloat};
pub use cluster::{ClusterDefinition, ClusterService, ClusterSpec, ClusterState, ClusterWithState};
pub use erase::{EraseAllReport, EraseReport, EraseService, EraseStep, StepReport};
pub use error::{PartialEraseFailure, ServerError, ServerResult};
pub use query::{NewQuery, QueryService, QueryUpdate};
pub use state::{create_app_state, create_app_state_with_kdf, AppState};
