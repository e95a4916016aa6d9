// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! # ivory-server-sidecar
//!
//! Outbound calls to the agents running next to each PostgreSQL node.
//!
//! - [`SidecarClient`]: authenticated request/response with per-call timeout
//! - [`PatroniGateway`]: cluster topology and control actions on top of it

pub mod client;
pub mod error;
pub mod patroni;

pub use client::{
	SidecarClient, SidecarClientConfig, SidecarRequest, SidecarResponse, PATRONI_ROLE,
};
pub use error::{PatroniError, PatroniResult, SidecarError, SidecarResult};
pub use patroni::{ActionOutcome, Member, MemberRole, NodeOverview, PatroniGateway, Topology};
