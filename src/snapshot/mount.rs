//! Replay a snapshot into a target backend.

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

use crate::vfs::{join_virtual, Vfs};

use super::{codec, SnapshotError, SnapshotNode};

/// Decode `buffer` and replay it under `target`.
pub async fn mount(vfs: &dyn Vfs, buffer: &[u8], target: &str) -> Result<(), SnapshotError> {
	let node = codec::decode(buffer)?;
	mount_node(vfs, &node, target).await
}

/// Replay an already-decoded snapshot under `target`.
///
/// Missing directories on the way to `target` are created, existing files
/// are overwritten, and existing symlinks are replaced, so replaying the
/// same snapshot twice leaves the same tree as replaying it once. The
/// target may use either separator style; backslashes are normalized away
/// before any path is touched.
pub async fn mount_node(
	vfs: &dyn Vfs,
	node: &SnapshotNode,
	target: &str,
) -> Result<(), SnapshotError> {
	let target = target.replace('\\', "/");
	replay(vfs, node, target.clone()).await?;
	debug!(target = %target, nodes = node.node_count(), "mounted snapshot");
	Ok(())
}

fn replay<'a>(
	vfs: &'a dyn Vfs,
	node: &'a SnapshotNode,
	path: String,
) -> BoxFuture<'a, Result<(), SnapshotError>> {
	async move {
		match node {
			SnapshotNode::Folder { entries, .. } => {
				vfs.mkdir(&path, true).await.map_err(|source| SnapshotError::Io {
					path: path.clone(),
					source,
				})?;
				for (name, child) in entries {
					replay(vfs, child, join_virtual(&path, name)).await?;
				}
			}
			SnapshotNode::File { bytes, .. } => {
				vfs.write_file(&path, bytes).await.map_err(|source| {
					SnapshotError::Io {
						path: path.clone(),
						source,
					}
				})?;
			}
			SnapshotNode::Symlink { target } => {
				if vfs.exists(&path).await {
					vfs.remove(&path).await.map_err(|source| SnapshotError::Io {
						path: path.clone(),
						source,
					})?;
				}
				vfs.symlink(target, &path).await.map_err(|source| {
					SnapshotError::Io {
						path: path.clone(),
						source,
					}
				})?;
			}
		}
		Ok(())
	}
	.boxed()
}
