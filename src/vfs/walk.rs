//! Depth-first traversal over any backend.

use std::sync::Arc;

use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::StreamExt;

use super::{join_virtual, EntryKind, Vfs, VfsError};

/// Stream every non-directory descendant of `path`, depth first.
///
/// Directories are recursed in listing order and never yielded themselves;
/// files and symlinks come out as full virtual paths. A listing failure ends
/// the stream with that error.
pub fn walk(
	vfs: Arc<dyn Vfs>,
	path: impl Into<String>,
) -> BoxStream<'static, Result<String, VfsError>> {
	let path = path.into();
	let stream = try_stream! {
		let entries = vfs.read_dir(&path).await?;
		for entry in entries {
			let child = join_virtual(&path, &entry.name);
			if entry.kind == EntryKind::Dir {
				let mut nested = walk(Arc::clone(&vfs), child);
				while let Some(item) = nested.next().await {
					yield item?;
				}
			} else {
				yield child;
			}
		}
	};
	stream.boxed()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::vfs::MemoryFs;
	use pretty_assertions::assert_eq;

	#[tokio::test]
	async fn yields_files_depth_first_without_directories() {
		let fs = Arc::new(MemoryFs::new());
		fs.mkdir("/a/inner", true).await.unwrap();
		fs.mkdir("/b", true).await.unwrap();
		fs.write_file("/a/inner/deep.txt", b"").await.unwrap();
		fs.write_file("/a/one.txt", b"").await.unwrap();
		fs.write_file("/b/two.txt", b"").await.unwrap();
		fs.write_file("/top.txt", b"").await.unwrap();
		fs.symlink("/top.txt", "/b/link").await.unwrap();

		let paths: Vec<_> = walk(fs as Arc<dyn Vfs>, "/")
			.map(Result::unwrap)
			.collect()
			.await;

		assert_eq!(
			paths,
			vec![
				"/a/inner/deep.txt",
				"/a/one.txt",
				"/b/link",
				"/b/two.txt",
				"/top.txt",
			]
		);
	}

	#[tokio::test]
	async fn missing_root_surfaces_the_error() {
		let fs = Arc::new(MemoryFs::new());
		let results: Vec<_> = walk(fs as Arc<dyn Vfs>, "/nope").collect().await;
		assert_eq!(results.len(), 1);
		assert!(results[0].is_err());
	}
}
