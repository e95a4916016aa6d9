// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Named-blob storage with one directory and one fixed suffix per kind.
//!
//! Certificates are stored as `<name>.crt` and compaction output as
//! `<name>.log`. Names are flat: no separators, no leading dot, no `..`.
//! Writes go to a temp file that is renamed into place, so readers never
//! observe a partially written blob.

mod error;

pub use error::{FileError, FileResult};

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

pub const CERT_SUFFIX: &str = ".crt";
pub const LOG_SUFFIX: &str = ".log";

#[async_trait]
pub trait FileGateway: Send + Sync {
	/// Create or replace `name`.
	async fn write(&self, name: &str, data: &[u8]) -> FileResult<()>;

	/// Fails with [`FileError::NotFound`] if absent.
	async fn read(&self, name: &str) -> FileResult<Vec<u8>>;

	async fn exists(&self, name: &str) -> FileResult<bool>;

	/// Returns true if a file was removed. Missing files are not an error.
	async fn delete(&self, name: &str) -> FileResult<bool>;

	/// Names (without suffix) of every stored blob, sorted.
	async fn list(&self) -> FileResult<Vec<String>>;

	/// Last write time. Fails with [`FileError::NotFound`] if absent.
	async fn modified(&self, name: &str) -> FileResult<SystemTime>;
}

/// [`FileGateway`] over a local directory.
pub struct LocalFileGateway {
	root: PathBuf,
	suffix: &'static str,
}

impl LocalFileGateway {
	/// Creates `root` if needed.
	pub async fn new(root: impl AsRef<Path>, suffix: &'static str) -> FileResult<Self> {
		let root = root.as_ref().to_path_buf();
		fs::create_dir_all(&root).await?;
		Ok(Self { root, suffix })
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn path_for(&self, name: &str) -> FileResult<PathBuf> {
		validate_name(name)?;
		Ok(self.root.join(format!("{name}{}", self.suffix)))
	}
}

fn validate_name(name: &str) -> FileResult<()> {
	if name.is_empty()
		|| name.starts_with('.')
		|| name.contains("..")
		|| name.contains('/')
		|| name.contains('\\')
		|| name.contains('\0')
	{
		return Err(FileError::InvalidName(name.to_string()));
	}
	Ok(())
}

#[async_trait]
impl FileGateway for LocalFileGateway {
	#[instrument(skip(self, data), fields(root = %self.root.display(), size = data.len()))]
	async fn write(&self, name: &str, data: &[u8]) -> FileResult<()> {
		let path = self.path_for(name)?;
		let temp_path = self.root.join(format!(".tmp.{}.{name}", Uuid::new_v4()));

		let written = async {
			let mut file = fs::File::create(&temp_path).await?;
			file.write_all(data).await?;
			file.sync_all().await?;
			fs::rename(&temp_path, &path).await
		}
		.await;

		if let Err(e) = written {
			let _ = fs::remove_file(&temp_path).await;
			return Err(e.into());
		}
		Ok(())
	}

	#[instrument(skip(self), fields(root = %self.root.display()))]
	async fn read(&self, name: &str) -> FileResult<Vec<u8>> {
		let path = self.path_for(name)?;
		fs::read(&path).await.map_err(|e| not_found_or_io(name, e))
	}

	async fn exists(&self, name: &str) -> FileResult<bool> {
		let path = self.path_for(name)?;
		Ok(fs::try_exists(&path).await?)
	}

	#[instrument(skip(self), fields(root = %self.root.display()))]
	async fn delete(&self, name: &str) -> FileResult<bool> {
		let path = self.path_for(name)?;
		match fs::remove_file(&path).await {
			Ok(()) => Ok(true),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
			Err(e) => Err(e.into()),
		}
	}

	#[instrument(skip(self), fields(root = %self.root.display()))]
	async fn list(&self) -> FileResult<Vec<String>> {
		let mut names = Vec::new();
		let mut entries = fs::read_dir(&self.root).await?;
		while let Some(entry) = entries.next_entry().await? {
			if !entry.file_type().await?.is_file() {
				continue;
			}
			let file_name = entry.file_name().to_string_lossy().into_owned();
			if file_name.starts_with('.') {
				continue;
			}
			if let Some(name) = file_name.strip_suffix(self.suffix) {
				names.push(name.to_string());
			}
		}
		names.sort();
		Ok(names)
	}

	async fn modified(&self, name: &str) -> FileResult<SystemTime> {
		let path = self.path_for(name)?;
		let metadata = fs::metadata(&path)
			.await
			.map_err(|e| not_found_or_io(name, e))?;
		Ok(metadata.modified()?)
	}
}

fn not_found_or_io(name: &str, e: std::io::Error) -> FileError {
	if e.kind() == std::io::ErrorKind::NotFound {
		FileError::NotFound(name.to_string())
	} else {
		FileError::Io(e)
	}
}
