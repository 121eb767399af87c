//! Snapshot model: a serializable tree of folders, files, and symlinks.
//!
//! A snapshot captures a filesystem subtree as one self-contained value that
//! can be shipped over a channel or stored as a single buffer, then replayed
//! into any backend. File bytes are embedded verbatim; symlinks record their
//! target string and are never followed, so a link cycle in the source tree
//! cannot make capture diverge.

pub mod build;
pub mod codec;
pub mod mount;

pub use build::take;
pub use codec::{decode, encode};
pub use mount::{mount, mount_node};

use std::collections::BTreeMap;

use thiserror::Error;

use crate::vfs::VfsError;

#[derive(Error, Debug)]
pub enum SnapshotError {
	#[error("unknown snapshot node tag: {0}")]
	UnknownNodeTag(u64),
	#[error("malformed snapshot: {0}")]
	Malformed(String),
	#[error("snapshot encode error: {0}")]
	Encode(#[from] rmp_serde::encode::Error),
	#[error("snapshot decode error: {0}")]
	Decode(#[from] rmpv::decode::Error),
	#[error("snapshot I/O at {path}: {source}")]
	Io {
		path: String,
		#[source]
		source: VfsError,
	},
}

/// Reserved folder attributes. Encodes as an empty map today; decoding
/// ignores keys it does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FolderMetadata;

/// Stat captured for a file at snapshot time. Timestamps are Unix
/// milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileMetadata {
	pub mode: u32,
	pub size: u64,
	pub atime_ms: i64,
	pub mtime_ms: i64,
	pub ctime_ms: i64,
}

/// One node of a snapshot tree. The root of every snapshot is a folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotNode {
	Folder {
		meta: FolderMetadata,
		entries: BTreeMap<String, SnapshotNode>,
	},
	File {
		meta: FileMetadata,
		bytes: Vec<u8>,
	},
	Symlink {
		target: String,
	},
}

impl SnapshotNode {
	pub fn folder(entries: BTreeMap<String, SnapshotNode>) -> Self {
		Self::Folder {
			meta: FolderMetadata,
			entries,
		}
	}

	pub fn file(meta: FileMetadata, bytes: Vec<u8>) -> Self {
		Self::File { meta, bytes }
	}

	pub fn symlink(target: impl Into<String>) -> Self {
		Self::Symlink {
			target: target.into(),
		}
	}

	/// Look up a descendant by `/`-separated path. Empty segments are
	/// skipped, so `"a/b"`, `"/a/b"`, and `"a//b/"` name the same node.
	pub fn get(&self, path: &str) -> Option<&SnapshotNode> {
		let mut node = self;
		for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
			match node {
				Self::Folder { entries, .. } => node = entries.get(segment)?,
				_ => return None,
			}
		}
		Some(node)
	}

	/// Number of nodes in the tree, this one included.
	pub fn node_count(&self) -> usize {
		match self {
			Self::Folder { entries, .. } => {
				1 + entries.values().map(SnapshotNode::node_count).sum::<usize>()
			}
			_ => 1,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn sample() -> SnapshotNode {
		let mut src = BTreeMap::new();
		src.insert(
			"main.rs".to_owned(),
			SnapshotNode::file(FileMetadata::default(), b"fn main() {}".to_vec()),
		);
		let mut root = BTreeMap::new();
		root.insert("src".to_owned(), SnapshotNode::folder(src));
		root.insert("link".to_owned(), SnapshotNode::symlink("src/main.rs"));
		SnapshotNode::folder(root)
	}

	#[test]
	fn get_walks_nested_paths() {
		let tree = sample();
		assert!(matches!(
			tree.get("src/main.rs"),
			Some(SnapshotNode::File { .. })
		));
		assert!(matches!(tree.get("/src/"), Some(SnapshotNode::Folder { .. })));
		assert!(tree.get("src/missing.rs").is_none());
		assert!(tree.get("link/through").is_none());
	}

	#[test]
	fn node_count_includes_every_node() {
		assert_eq!(sample().node_count(), 4);
	}
}
