//! End-to-end snapshot flows across backends.

use std::sync::Arc;

use codeblock_fs::{snapshot, walk, EntryKind, HostFs, MemoryFs, PathFilter, SnapshotNode, Vfs};
use futures::StreamExt;
use pretty_assertions::assert_eq;

async fn seed_project(fs: &dyn Vfs) {
	fs.mkdir("/src/util", true).await.unwrap();
	fs.mkdir("/assets", true).await.unwrap();
	fs.write_file("/src/main.rs", b"fn main() {}").await.unwrap();
	fs.write_file("/src/util/mod.rs", b"pub fn helper() {}")
		.await
		.unwrap();
	fs.write_file("/assets/logo.svg", b"<svg/>").await.unwrap();
	fs.write_file("/README.md", b"# demo").await.unwrap();
	fs.symlink("/src/main.rs", "/entry").await.unwrap();
}

async fn file_paths(fs: Arc<dyn Vfs>) -> Vec<String> {
	walk(fs, "/").map(Result::unwrap).collect().await
}

#[tokio::test]
async fn one_buffer_mounts_identically_into_fresh_targets() {
	let source = Arc::new(MemoryFs::new());
	seed_project(source.as_ref()).await;

	let tree = snapshot::take(source.as_ref(), "/", &PathFilter::default())
		.await
		.unwrap();
	let buffer = snapshot::encode(&tree).unwrap();

	let first = Arc::new(MemoryFs::new());
	let second = Arc::new(MemoryFs::new());
	snapshot::mount(first.as_ref(), &buffer, "/").await.unwrap();
	snapshot::mount(second.as_ref(), &buffer, "/")
		.await
		.unwrap();

	let first_paths = file_paths(first.clone() as Arc<dyn Vfs>).await;
	let second_paths = file_paths(second.clone() as Arc<dyn Vfs>).await;
	assert_eq!(first_paths, second_paths);
	assert!(first_paths.contains(&"/src/util/mod.rs".to_owned()));
	assert!(first_paths.contains(&"/entry".to_owned()));

	for path in &first_paths {
		let first_stat = first.stat(path).await.unwrap();
		let second_stat = second.stat(path).await.unwrap();
		assert_eq!(first_stat.kind, second_stat.kind);
		if first_stat.kind == EntryKind::Symlink {
			assert_eq!(
				first.read_link(path).await.unwrap(),
				second.read_link(path).await.unwrap()
			);
		} else {
			assert_eq!(
				first.read_file(path).await.unwrap(),
				second.read_file(path).await.unwrap()
			);
		}
	}
}

#[tokio::test]
async fn capture_honors_include_and_exclude_globs() {
	let fs = MemoryFs::new();
	fs.mkdir("/src", true).await.unwrap();
	fs.mkdir("/lib", true).await.unwrap();
	fs.write_file("/src/app.ts", b"export {}").await.unwrap();
	fs.write_file("/src/app.test.ts", b"test()").await.unwrap();
	fs.write_file("/lib/app.ts", b"export {}").await.unwrap();

	let filter = PathFilter::new(["src/**"], ["**/*.test.ts"]).unwrap();
	let tree = snapshot::take(&fs, "/", &filter).await.unwrap();

	assert!(tree.get("src/app.ts").is_some());
	assert!(tree.get("src/app.test.ts").is_none());
	assert!(tree.get("lib/app.ts").is_none());

	// Directories survive as containers; only their non-matching files drop.
	match tree.get("lib") {
		Some(SnapshotNode::Folder { entries, .. }) => assert!(entries.is_empty()),
		other => panic!("expected a folder at lib, got {other:?}"),
	}
}

#[tokio::test]
async fn host_capture_replays_into_memory() {
	let dir = tempfile::tempdir().unwrap();
	std::fs::create_dir_all(dir.path().join("docs")).unwrap();
	std::fs::write(dir.path().join("docs/guide.md"), b"# guide").unwrap();
	std::fs::write(dir.path().join("notes.txt"), b"notes").unwrap();

	let host = HostFs::new(dir.path());
	let tree = snapshot::take(&host, "/", &PathFilter::default())
		.await
		.unwrap();
	let buffer = snapshot::encode(&tree).unwrap();

	let target = MemoryFs::new();
	snapshot::mount(&target, &buffer, "/restore").await.unwrap();

	assert_eq!(
		target.read_file("/restore/docs/guide.md").await.unwrap(),
		b"# guide".to_vec()
	);
	assert_eq!(
		target.read_file("/restore/notes.txt").await.unwrap(),
		b"notes".to_vec()
	);
	let stat = target.stat("/restore/notes.txt").await.unwrap();
	assert_eq!(stat.size, 5);
}
