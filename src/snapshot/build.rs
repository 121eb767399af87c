//! Capture a live subtree into a snapshot value.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

use crate::filter::PathFilter;
use crate::vfs::{join_virtual, EntryKind, Stat, Vfs, VfsError};

use super::{FileMetadata, SnapshotError, SnapshotNode};

/// Capture the subtree rooted at `root` into a snapshot.
///
/// `filter` decides what gets captured; paths are matched relative to
/// `root`, so the same filter gives the same tree no matter where the root
/// sits. Symlinks are recorded by target string and never followed, which
/// also makes link cycles harmless.
pub async fn take(
	vfs: &dyn Vfs,
	root: &str,
	filter: &PathFilter,
) -> Result<SnapshotNode, SnapshotError> {
	let node = take_dir(vfs, root.to_owned(), String::new(), filter).await?;
	debug!(root = %root, nodes = node.node_count(), "captured snapshot");
	Ok(node)
}

fn take_dir<'a>(
	vfs: &'a dyn Vfs,
	path: String,
	rel: String,
	filter: &'a PathFilter,
) -> BoxFuture<'a, Result<SnapshotNode, SnapshotError>> {
	async move {
		let entries = vfs.read_dir(&path).await.map_err(|source| SnapshotError::Io {
			path: path.clone(),
			source,
		})?;

		let mut children = BTreeMap::new();
		for entry in entries {
			let child_path = join_virtual(&path, &entry.name);
			let child_rel = join_virtual(&rel, &entry.name);

			match entry.kind {
				EntryKind::Dir => {
					if !filter.matches_dir(&child_rel) {
						continue;
					}
					let node = take_dir(vfs, child_path, child_rel, filter).await?;
					children.insert(entry.name, node);
				}
				EntryKind::File => {
					if !filter.matches(&child_rel) {
						continue;
					}
					let stat = vfs.stat(&child_path).await.ok_or_else(|| {
						SnapshotError::Io {
							path: child_path.clone(),
							source: VfsError::NotFound(child_path.clone()),
						}
					})?;
					let bytes = vfs.read_file(&child_path).await.map_err(|source| {
						SnapshotError::Io {
							path: child_path.clone(),
							source,
						}
					})?;
					children.insert(
						entry.name,
						SnapshotNode::file(metadata_from_stat(&stat), bytes),
					);
				}
				EntryKind::Symlink => {
					if !filter.matches(&child_rel) {
						continue;
					}
					let target = vfs.read_link(&child_path).await.map_err(|source| {
						SnapshotError::Io {
							path: child_path.clone(),
							source,
						}
					})?;
					children.insert(entry.name, SnapshotNode::symlink(target));
				}
			}
		}

		Ok(SnapshotNode::folder(children))
	}
	.boxed()
}

fn metadata_from_stat(stat: &Stat) -> FileMetadata {
	FileMetadata {
		mode: stat.mode,
		size: stat.size,
		atime_ms: stat.atime.timestamp_millis(),
		mtime_ms: stat.mtime.timestamp_millis(),
		ctime_ms: stat.ctime.timestamp_millis(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::vfs::MemoryFs;
	use pretty_assertions::assert_eq;

	async fn project_fs() -> MemoryFs {
		let fs = MemoryFs::new();
		fs.mkdir("/project/src", true).await.unwrap();
		fs.mkdir("/project/target/debug", true).await.unwrap();
		fs.write_file("/project/src/main.rs", b"fn main() {}").await.unwrap();
		fs.write_file("/project/Cargo.toml", b"[package]").await.unwrap();
		fs.write_file("/project/target/debug/app", b"\x7fELF").await.unwrap();
		fs.write_file("/project/draft.md.crswap", b"swap").await.unwrap();
		fs.symlink("src/main.rs", "/project/entry").await.unwrap();
		fs
	}

	#[tokio::test]
	async fn captures_files_links_and_nested_dirs() {
		let fs = project_fs().await;
		let snap = take(&fs, "/project", &PathFilter::default()).await.unwrap();

		match snap.get("src/main.rs") {
			Some(SnapshotNode::File { meta, bytes }) => {
				assert_eq!(bytes, b"fn main() {}");
				assert_eq!(meta.size, 12);
				assert_eq!(meta.mode, 0o644);
			}
			other => panic!("expected a file node, got {other:?}"),
		}
		assert!(matches!(
			snap.get("entry"),
			Some(SnapshotNode::Symlink { target }) if target == "src/main.rs"
		));
		assert!(matches!(
			snap.get("target/debug"),
			Some(SnapshotNode::Folder { .. })
		));
	}

	#[tokio::test]
	async fn default_filter_drops_swap_files() {
		let fs = project_fs().await;
		let snap = take(&fs, "/project", &PathFilter::default()).await.unwrap();

		assert!(snap.get("draft.md.crswap").is_none());
		assert!(snap.get("Cargo.toml").is_some());
	}

	#[tokio::test]
	async fn excluded_directories_are_not_descended() {
		let fs = project_fs().await;
		let filter = PathFilter::new(std::iter::empty::<&str>(), ["target"]).unwrap();
		let snap = take(&fs, "/project", &filter).await.unwrap();

		assert!(snap.get("target").is_none());
		assert!(snap.get("src/main.rs").is_some());
	}

	#[tokio::test]
	async fn includes_keep_parent_folders_reachable() {
		let fs = project_fs().await;
		let filter = PathFilter::new(["src/**"], std::iter::empty::<&str>()).unwrap();
		let snap = take(&fs, "/project", &filter).await.unwrap();

		assert!(snap.get("src/main.rs").is_some());
		assert!(snap.get("Cargo.toml").is_none());
	}

	#[tokio::test]
	async fn link_cycles_do_not_loop_the_capture() {
		let fs = MemoryFs::new();
		fs.mkdir("/tree/sub", true).await.unwrap();
		fs.symlink("/tree", "/tree/sub/loop").await.unwrap();

		let snap = take(&fs, "/tree", &PathFilter::default()).await.unwrap();
		assert!(matches!(
			snap.get("sub/loop"),
			Some(SnapshotNode::Symlink { target }) if target == "/tree"
		));
		assert_eq!(snap.node_count(), 3);
	}

	#[tokio::test]
	async fn missing_root_is_an_error() {
		let fs = MemoryFs::new();
		let err = take(&fs, "/nowhere", &PathFilter::default())
			.await
			.unwrap_err();
		assert!(matches!(err, SnapshotError::Io { .. }));
	}
}
