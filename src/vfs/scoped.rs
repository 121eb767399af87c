//! Scope-confined backend.
//!
//! Wraps another facade and re-roots every path beneath a preopened subtree,
//! the way WASI confines a guest to its preopened directories. A handle built
//! on `/project/src` can never name anything outside `/project/src`, no
//! matter what paths it is given.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{
	canonical, join_virtual, split_segments, DirEntry, Stat, Vfs, VfsError, WatchEvent,
};

pub struct ScopedFs {
	inner: Arc<dyn Vfs>,
	scope: String,
}

impl ScopedFs {
	/// Confine `inner` to the subtree at `scope`.
	pub fn new(inner: Arc<dyn Vfs>, scope: &str) -> Result<Self, VfsError> {
		let segments = split_segments(scope)?;
		Ok(Self {
			inner,
			scope: canonical(&segments),
		})
	}

	fn full_path(&self, path: &str) -> Result<String, VfsError> {
		// Upward traversal is the only way split_segments fails, and from
		// inside a scope that is an escape attempt.
		let segments =
			split_segments(path).map_err(|_| VfsError::OutsideScope(path.to_owned()))?;
		let mut full = self.scope.clone();
		for segment in segments {
			full = join_virtual(&full, segment);
		}
		Ok(full)
	}
}

#[async_trait]
impl Vfs for ScopedFs {
	async fn read_file(&self, path: &str) -> Result<Vec<u8>, VfsError> {
		self.inner.read_file(&self.full_path(path)?).await
	}

	async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<(), VfsError> {
		self.inner.write_file(&self.full_path(path)?, bytes).await
	}

	async fn mkdir(&self, path: &str, recursive: bool) -> Result<(), VfsError> {
		self.inner.mkdir(&self.full_path(path)?, recursive).await
	}

	async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, VfsError> {
		self.inner.read_dir(&self.full_path(path)?).await
	}

	async fn remove(&self, path: &str) -> Result<(), VfsError> {
		self.inner.remove(&self.full_path(path)?).await
	}

	async fn rename(&self, from: &str, to: &str) -> Result<(), VfsError> {
		self.inner
			.rename(&self.full_path(from)?, &self.full_path(to)?)
			.await
	}

	async fn symlink(&self, target: &str, path: &str) -> Result<(), VfsError> {
		self.inner.symlink(target, &self.full_path(path)?).await
	}

	async fn read_link(&self, path: &str) -> Result<String, VfsError> {
		self.inner.read_link(&self.full_path(path)?).await
	}

	async fn stat(&self, path: &str) -> Option<Stat> {
		self.inner.stat(&self.full_path(path).ok()?).await
	}

	async fn exists(&self, path: &str) -> bool {
		match self.full_path(path) {
			Ok(full) => self.inner.exists(&full).await,
			Err(_) => false,
		}
	}

	fn watch(&self, path: &str, cancel: CancellationToken) -> BoxStream<'static, WatchEvent> {
		let full = match self.full_path(path) {
			Ok(full) => full,
			Err(_) => return futures::stream::empty().boxed(),
		};
		let scope = self.scope.clone();
		self.inner
			.watch(&full, cancel)
			.map(move |event| {
				let stripped = if scope == "/" {
					event.path.clone()
				} else {
					match event.path.strip_prefix(&scope) {
						Some("") => "/".to_owned(),
						Some(rest) => rest.to_owned(),
						None => event.path.clone(),
					}
				};
				WatchEvent {
					kind: event.kind,
					path: stripped,
				}
			})
			.boxed()
	}
}
