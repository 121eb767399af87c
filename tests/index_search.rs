//! Search index behavior over live filesystems.

use std::sync::Arc;

use codeblock_fs::index::DEFAULT_INDEX_PATH;
use codeblock_fs::{IndexOptions, MemoryFs, PathFilter, SearchIndex, Vfs};
use pretty_assertions::assert_eq;

async fn seed_workspace(fs: &dyn Vfs) {
	fs.mkdir("/x", true).await.unwrap();
	fs.mkdir("/foo/bar", true).await.unwrap();
	fs.write_file("/x/readme.md", b"short").await.unwrap();
	fs.write_file("/foo/readme.md", b"long").await.unwrap();
	fs.write_file("/foo/bar/main.rs", b"fn main() {}")
		.await
		.unwrap();
	fs.write_file("/notes.txt", b"n").await.unwrap();
}

fn hit_paths(index: &SearchIndex, query: &str) -> Vec<String> {
	index
		.search(query)
		.into_iter()
		.map(|hit| hit.path)
		.collect()
}

#[tokio::test]
async fn get_persists_once_and_loads_after() {
	let fs = Arc::new(MemoryFs::new());
	seed_workspace(fs.as_ref()).await;

	let vfs: Arc<dyn Vfs> = fs.clone();
	let options = IndexOptions::default();
	let built = SearchIndex::get(Arc::clone(&vfs), DEFAULT_INDEX_PATH, &options).await;
	assert!(built.contains("x/readme.md"));
	assert!(fs.exists(DEFAULT_INDEX_PATH).await);

	// A change the stored index has not seen proves the second get loads
	// instead of rebuilding.
	fs.write_file("/fresh.rs", b"").await.unwrap();
	let loaded = SearchIndex::get(Arc::clone(&vfs), DEFAULT_INDEX_PATH, &options).await;
	assert!(!loaded.contains("fresh.rs"));
	assert_eq!(hit_paths(&loaded, "readme"), hit_paths(&built, "readme"));
}

#[tokio::test]
async fn shorter_paths_rank_first() {
	let fs = Arc::new(MemoryFs::new());
	seed_workspace(fs.as_ref()).await;

	let index = SearchIndex::build(fs as Arc<dyn Vfs>, &PathFilter::default())
		.await
		.unwrap();

	let paths = hit_paths(&index, "readme");
	assert_eq!(paths, vec!["x/readme.md", "foo/readme.md"]);
}

#[tokio::test]
async fn incremental_updates_match_a_fresh_build() {
	let fs = Arc::new(MemoryFs::new());
	seed_workspace(fs.as_ref()).await;

	let filter = PathFilter::default();
	let mut index = SearchIndex::build(fs.clone() as Arc<dyn Vfs>, &filter)
		.await
		.unwrap();

	fs.write_file("/x/added.md", b"later").await.unwrap();
	fs.remove("/notes.txt").await.unwrap();
	index.add_path("x/added.md");
	index.remove_path("notes.txt");

	assert!(index.contains("x/added.md"));
	assert!(!index.contains("notes.txt"));

	let rebuilt = SearchIndex::build(fs.clone() as Arc<dyn Vfs>, &filter)
		.await
		.unwrap();
	assert_eq!(index.len(), rebuilt.len());
	// Directory listings keep insertion order, which differs between a
	// rebuilt and an incrementally grown index; compare as sets.
	for query in ["added", "readme", "main", ".md", "x/"] {
		let mut ours = hit_paths(&index, query);
		let mut fresh = hit_paths(&rebuilt, query);
		ours.sort();
		fresh.sort();
		assert_eq!(ours, fresh, "query {query:?}");
	}
}

#[test]
fn added_paths_are_searchable_until_removed() {
	let mut index = SearchIndex::new();
	index.add_path("a/b/c.ts");

	assert_eq!(hit_paths(&index, "c.ts"), vec!["a/b/c.ts"]);
	assert_eq!(hit_paths(&index, "a/b/"), vec!["a/b/c.ts"]);

	index.remove_path("a/b/c.ts");
	assert!(index.search("c.ts").is_empty());
	// The listing for a/b is pruned outright, not left behind empty.
	assert!(index.search("a/b/").is_empty());
}

#[tokio::test]
async fn extension_and_directory_queries_answer_from_the_same_index() {
	let fs = Arc::new(MemoryFs::new());
	seed_workspace(fs.as_ref()).await;

	let index = SearchIndex::build(fs as Arc<dyn Vfs>, &PathFilter::default())
		.await
		.unwrap();

	let extensions = hit_paths(&index, ".md");
	assert!(extensions.contains(&"x/readme.md".to_owned()));
	assert!(extensions.contains(&"foo/readme.md".to_owned()));
	assert!(!extensions.contains(&"foo/bar/main.rs".to_owned()));

	assert_eq!(hit_paths(&index, "foo/bar/"), vec!["foo/bar/main.rs"]);
}
