// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("sqlite error: {0}")]
	Sqlx(#[from] sqlx::Error),

	/// An update targeted a row that does not exist.
	#[error("no such record: {0}")]
	NotFound(String),

	/// An insert collided with a write-once key.
	#[error("record already exists: {0}")]
	Conflict(String),

	#[error("corrupt or invalid stored data: {0}")]
	Internal(String),

	#[error("stored JSON could not be decoded: {0}")]
	Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;
