//! Keyed byte storage on the local filesystem.
//!
//! Keys are slash-separated paths (`uploads/<source>/chunk-000001`). Writes
//! go through a temp file + rename so readers never observe partial objects.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct BlobStore {
	root: PathBuf,
}
impl BlobStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn from_config(cfg: &maildex_config::Blobs) -> Self {
		Self::new(cfg.root.clone())
	}

	pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
		let path = self.path_for(key)?;

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).await?;
		}

		let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));

		fs::write(&tmp, bytes).await?;
		fs::rename(&tmp, &path).await?;

		Ok(())
	}

	pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
		let path = self.path_for(key)?;

		match fs::read(&path).await {
			Ok(bytes) => Ok(Some(bytes)),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(err) => Err(err.into()),
		}
	}

	pub async fn delete(&self, key: &str) -> Result<()> {
		let path = self.path_for(key)?;

		match fs::remove_file(&path).await {
			Ok(()) => Ok(()),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(err) => Err(err.into()),
		}
	}

	/// Lists stored keys under a prefix, in unspecified order.
	pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
		let mut out = Vec::new();
		let mut pending = vec![self.root.clone()];

		while let Some(dir) = pending.pop() {
			let mut entries = match fs::read_dir(&dir).await {
				Ok(entries) => entries,
				Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
				Err(err) => return Err(err.into()),
			};

			while let Some(entry) = entries.next_entry().await? {
				let path = entry.path();

				if entry.file_type().await?.is_dir() {
					pending.push(path);

					continue;
				}

				if let Some(key) = self.key_for(&path)
					&& key.starts_with(prefix)
				{
					out.push(key);
				}
			}
		}

		Ok(out)
	}

	pub async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
		let keys = self.list(prefix).await?;
		let count = keys.len();

		for key in keys {
			self.delete(&key).await?;
		}

		Ok(count)
	}

	fn path_for(&self, key: &str) -> Result<PathBuf> {
		if key.is_empty() {
			return Err(Error::InvalidArgument("Blob key must be non-empty.".to_string()));
		}

		let relative = Path::new(key);

		// Keys must stay inside the root; reject traversal and absolute keys.
		if relative.components().any(|part| !matches!(part, Component::Normal(_))) {
			return Err(Error::InvalidArgument(format!("Blob key {key:?} is not a plain path.")));
		}

		Ok(self.root.join(relative))
	}

	fn key_for(&self, path: &Path) -> Option<String> {
		let relative = path.strip_prefix(&self.root).ok()?;
		let parts: Vec<_> =
			relative.components().map(|part| part.as_os_str().to_string_lossy()).collect();

		Some(parts.join("/"))
	}
}
