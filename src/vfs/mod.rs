//! Virtual filesystem facade and backends.
//!
//! Everything above this layer (snapshot capture and replay, the mount host,
//! the search index) talks to a [`Vfs`] trait object and never cares whether
//! bytes live in memory, on the host disk, or behind a preopened subtree.
//!
//! Paths are virtual: `/`-separated strings, with or without a leading
//! separator. Backends translate them to their own storage. `..` segments are
//! rejected everywhere so a handle can never climb out of what it was given.

pub mod host;
pub mod mem;
pub mod scoped;
pub mod walk;

pub use host::HostFs;
pub use mem::MemoryFs;
pub use scoped::ScopedFs;
pub use walk::walk;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum VfsError {
	#[error("no entry found at {0}")]
	NotFound(String),
	#[error("not a directory: {0}")]
	NotADirectory(String),
	#[error("not a file: {0}")]
	NotAFile(String),
	#[error("not a symlink: {0}")]
	NotASymlink(String),
	#[error("entry already exists at {0}")]
	AlreadyExists(String),
	#[error("invalid path: {0}")]
	InvalidPath(String),
	#[error("path escapes the mounted scope: {0}")]
	OutsideScope(String),
	#[error("operation not supported by this backend: {0}")]
	Unsupported(&'static str),
	#[error("I/O error at {path}: {source}")]
	Io {
		path: String,
		#[source]
		source: std::io::Error,
	},
}

/// What kind of entry a path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
	File,
	Dir,
	Symlink,
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
	pub name: String,
	pub kind: EntryKind,
}

/// Metadata for a single entry.
///
/// Reports the entry itself: symlinks are never followed, so the builder can
/// tell links apart from their targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stat {
	pub kind: EntryKind,
	pub size: u64,
	pub mode: u32,
	pub atime: DateTime<Utc>,
	pub mtime: DateTime<Utc>,
	pub ctime: DateTime<Utc>,
}

/// A change observed by a watch stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
	pub kind: WatchEventKind,
	/// Virtual path of the affected entry, rooted at the watched backend.
	pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
	/// An entry appeared, disappeared, or changed its name.
	Rename,
	/// File contents were updated in place.
	Change,
}

/// Async filesystem facade implemented by every backend.
#[async_trait]
pub trait Vfs: Send + Sync {
	async fn read_file(&self, path: &str) -> Result<Vec<u8>, VfsError>;

	/// Whole-file write, replacing any previous contents. The parent
	/// directory must already exist.
	async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<(), VfsError>;

	/// Create a directory. Recursive creation is idempotent; non-recursive
	/// creation of an existing directory is an error.
	async fn mkdir(&self, path: &str, recursive: bool) -> Result<(), VfsError>;

	/// List a directory, ordered by entry name.
	async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, VfsError>;

	/// Remove the entry at `path`, directories recursively.
	async fn remove(&self, path: &str) -> Result<(), VfsError>;

	async fn rename(&self, from: &str, to: &str) -> Result<(), VfsError>;

	async fn symlink(&self, target: &str, path: &str) -> Result<(), VfsError>;

	async fn read_link(&self, path: &str) -> Result<String, VfsError>;

	/// Metadata for `path`, or `None` on any failure. Callers treat `None`
	/// as "missing or inaccessible" and decide for themselves whether that
	/// matters.
	async fn stat(&self, path: &str) -> Option<Stat>;

	async fn exists(&self, path: &str) -> bool {
		self.stat(path).await.is_some()
	}

	/// Lazy stream of changes under `path`. The stream ends cleanly when
	/// `cancel` fires; it is not restartable. Backends that fail to set up
	/// a watcher log the failure and return an empty stream.
	fn watch(&self, path: &str, cancel: CancellationToken) -> BoxStream<'static, WatchEvent>;
}

/// Split a virtual path into its segments, rejecting traversal.
///
/// Empty segments (doubled or trailing separators) and `.` are dropped.
pub(crate) fn split_segments(path: &str) -> Result<Vec<&str>, VfsError> {
	let mut segments = Vec::new();
	for segment in path.split('/') {
		match segment {
			"" | "." => continue,
			".." => return Err(VfsError::InvalidPath(path.to_owned())),
			other => segments.push(other),
		}
	}
	Ok(segments)
}

/// Join a child name onto a parent path without doubling the separator.
pub(crate) fn join_virtual(parent: &str, name: &str) -> String {
	if parent.is_empty() || parent.ends_with('/') {
		format!("{parent}{name}")
	} else {
		format!("{parent}/{name}")
	}
}

/// Canonical display form: leading separator, no trailing separator.
pub(crate) fn canonical(segments: &[&str]) -> String {
	let mut out = String::with_capacity(segments.iter().map(|s| s.len() + 1).sum());
	for segment in segments {
		out.push('/');
		out.push_str(segment);
	}
	if out.is_empty() {
		out.push('/');
	}
	out
}

/// Whether `path` equals `base` or lies beneath it. Both canonical.
pub(crate) fn path_is_within(path: &str, base: &str) -> bool {
	if base == "/" {
		return true;
	}
	path == base || path.strip_prefix(base).is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn split_drops_empty_and_dot_segments() {
		assert_eq!(split_segments("/a//b/./c/").unwrap(), vec!["a", "b", "c"]);
		assert_eq!(split_segments("a/b").unwrap(), vec!["a", "b"]);
		assert!(split_segments("/").unwrap().is_empty());
	}

	#[test]
	fn split_rejects_traversal() {
		assert!(matches!(
			split_segments("/a/../b"),
			Err(VfsError::InvalidPath(_))
		));
	}

	#[test]
	fn join_handles_trailing_separator() {
		assert_eq!(join_virtual("/project", "src"), "/project/src");
		assert_eq!(join_virtual("/project/", "src"), "/project/src");
		assert_eq!(join_virtual("", "src"), "src");
	}

	#[test]
	fn within_checks_whole_segments() {
		assert!(path_is_within("/a/b/c", "/a/b"));
		assert!(path_is_within("/a/b", "/a/b"));
		assert!(!path_is_within("/a/bc", "/a/b"));
		assert!(path_is_within("/anything", "/"));
	}
}
