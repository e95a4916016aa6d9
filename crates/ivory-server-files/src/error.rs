// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
	#[error("file not found: {0}")]
	NotFound(String),

	#[error("invalid file name: {0}")]
	InvalidName(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

pub type FileResult<T> = Result<T, FileError>;
