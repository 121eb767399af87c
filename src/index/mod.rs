//! Path search index.
//!
//! Every indexed path is a document; tokens drawn from its full text,
//! basename, dirname, and extension point back at it through a sorted term
//! map, and a separate directory map lists each directory's direct children
//! in insertion order. The index mutates incrementally as paths come and
//! go, answers fuzzy, extension, and directory-listing queries, and
//! serializes itself to JSON through the filesystem facade.

mod maintainer;
mod persist;
mod query;

pub use maintainer::{IndexMaintainer, MaintainerHandle};
pub use persist::DEFAULT_INDEX_PATH;
pub use query::{SearchHit, TextHighlight};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::filter::{FilterConfig, PathFilter};
use crate::vfs::{walk, Vfs, VfsError};

#[derive(Error, Debug)]
pub enum IndexError {
	#[error("could not read index file {path}: {source}")]
	Read {
		path: String,
		#[source]
		source: VfsError,
	},
	#[error("could not write index file {path}: {source}")]
	Write {
		path: String,
		#[source]
		source: VfsError,
	},
	#[error("index file parse error: {0}")]
	Parse(#[from] serde_json::Error),
	#[error("unsupported index format version: {0}")]
	Version(u32),
}

/// Fields tokens are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexField {
	Path,
	Basename,
	Dirname,
	Extension,
}

impl IndexField {
	pub const ALL: [Self; 4] = [Self::Path, Self::Basename, Self::Dirname, Self::Extension];

	fn bit(self) -> u8 {
		match self {
			Self::Path => 1,
			Self::Basename => 1 << 1,
			Self::Dirname => 1 << 2,
			Self::Extension => 1 << 3,
		}
	}
}

/// How [`SearchIndex::get`] builds an index when nothing usable is stored.
#[derive(Debug, Clone)]
pub struct IndexOptions {
	pub fields: Vec<IndexField>,
	pub filter: FilterConfig,
}

impl Default for IndexOptions {
	fn default() -> Self {
		Self {
			fields: IndexField::ALL.to_vec(),
			filter: FilterConfig::default(),
		}
	}
}

/// Per-document path split, kept so removal can retrace its tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Document {
	pub(crate) basename: String,
	pub(crate) dirname: String,
	pub(crate) extension: String,
}

impl Document {
	fn split(path: &str) -> Self {
		let (dirname, basename) = match path.rsplit_once('/') {
			Some((dir, base)) => (dir.to_owned(), base.to_owned()),
			None => (String::new(), path.to_owned()),
		};
		// A leading dot alone is a hidden-file marker, not an extension
		let extension = match basename.rfind('.') {
			Some(idx) if idx > 0 => basename[idx + 1..].to_owned(),
			_ => String::new(),
		};

		Self {
			basename,
			dirname,
			extension,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
	docs: HashMap<String, Document>,
	/// token -> path -> bitmask of the fields the token came from.
	/// Sorted so prefix queries are range scans.
	terms: BTreeMap<String, HashMap<String, u8>>,
	/// directory path -> direct child paths, in insertion order.
	dir_map: HashMap<String, Vec<String>>,
	fields: Vec<IndexField>,
}

impl SearchIndex {
	pub fn new() -> Self {
		Self::with_fields(IndexField::ALL.to_vec())
	}

	pub fn with_fields(fields: Vec<IndexField>) -> Self {
		Self {
			fields,
			..Self::default()
		}
	}

	/// Index every file reachable from the facade root that passes the
	/// filter. Documents are stored without their leading separator.
	pub async fn build(vfs: Arc<dyn Vfs>, filter: &PathFilter) -> Result<Self, VfsError> {
		Self::build_with(vfs, IndexField::ALL.to_vec(), filter).await
	}

	pub(crate) async fn build_with(
		vfs: Arc<dyn Vfs>,
		fields: Vec<IndexField>,
		filter: &PathFilter,
	) -> Result<Self, VfsError> {
		let mut index = Self::with_fields(fields);
		let mut entries = walk(vfs, "/");
		while let Some(path) = entries.next().await {
			let path = path?;
			let rel = path.trim_start_matches('/');
			if filter.matches(rel) {
				index.add_path(rel);
			}
		}
		debug!(documents = index.len(), "built search index");
		Ok(index)
	}

	/// Add one path. Already-indexed paths are left untouched, so callers
	/// can replay events without checking first.
	pub fn add_path(&mut self, path: &str) {
		let path = path.trim_matches('/');
		if path.is_empty() || self.docs.contains_key(path) {
			return;
		}

		let doc = Document::split(path);
		self.insert_tokens(path, &doc);
		self.dir_map
			.entry(doc.dirname.clone())
			.or_default()
			.push(path.to_owned());
		self.docs.insert(path.to_owned(), doc);
	}

	/// Drop one path, its tokens, and its row in the parent's child list.
	/// The parent's directory-map entry disappears once its list empties.
	pub fn remove_path(&mut self, path: &str) {
		let path = path.trim_matches('/');
		let Some(doc) = self.docs.remove(path) else {
			return;
		};

		for (token, _) in tokens_for(&self.fields, path, &doc) {
			if let Some(paths) = self.terms.get_mut(&token) {
				paths.remove(path);
				if paths.is_empty() {
					self.terms.remove(&token);
				}
			}
		}

		if let Some(children) = self.dir_map.get_mut(&doc.dirname) {
			children.retain(|child| child != path);
			if children.is_empty() {
				self.dir_map.remove(&doc.dirname);
			}
		}
	}

	/// Drop `prefix` and everything under it. Used when a rename event
	/// reports a path that no longer stats: the index cannot tell a gone
	/// file from a gone directory, so it sheds both.
	pub fn remove_subtree(&mut self, prefix: &str) {
		let prefix = prefix.trim_matches('/');
		if prefix.is_empty() {
			return;
		}

		let doomed = self
			.docs
			.keys()
			.filter(|path| {
				*path == prefix
					|| path
						.strip_prefix(prefix)
						.is_some_and(|rest| rest.starts_with('/'))
			})
			.cloned()
			.collect::<Vec<_>>();
		for path in doomed {
			self.remove_path(&path);
		}
	}

	pub fn len(&self) -> usize {
		self.docs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.docs.is_empty()
	}

	pub fn contains(&self, path: &str) -> bool {
		self.docs.contains_key(path.trim_matches('/'))
	}

	pub fn fields(&self) -> &[IndexField] {
		&self.fields
	}

	fn insert_tokens(&mut self, path: &str, doc: &Document) {
		for (token, bit) in tokens_for(&self.fields, path, doc) {
			*self
				.terms
				.entry(token)
				.or_default()
				.entry(path.to_owned())
				.or_insert(0) |= bit;
		}
	}
}

/// Lowercased alphanumeric runs. Applied to documents and queries alike so
/// the two always meet on the same terms.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
	text.to_lowercase()
		.split(|c: char| !c.is_alphanumeric())
		.filter(|token| !token.is_empty())
		.map(str::to_owned)
		.collect()
}

fn tokens_for(fields: &[IndexField], path: &str, doc: &Document) -> Vec<(String, u8)> {
	let mut out = Vec::new();
	for field in fields {
		let text = match field {
			IndexField::Path => path,
			IndexField::Basename => &doc.basename,
			IndexField::Dirname => &doc.dirname,
			IndexField::Extension => &doc.extension,
		};
		for token in tokenize(text) {
			out.push((token, field.bit()));
		}
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn split_separates_dirname_basename_extension() {
		let doc = Document::split("a/b/c.test.ts");
		assert_eq!(doc.dirname, "a/b");
		assert_eq!(doc.basename, "c.test.ts");
		assert_eq!(doc.extension, "ts");

		let top = Document::split("README");
		assert_eq!(top.dirname, "");
		assert_eq!(top.basename, "README");
		assert_eq!(top.extension, "");

		let hidden = Document::split(".gitignore");
		assert_eq!(hidden.extension, "");
	}

	#[test]
	fn add_is_idempotent_per_path() {
		let mut index = SearchIndex::new();
		index.add_path("a/b/c.ts");
		index.add_path("/a/b/c.ts");
		index.add_path("a/b/c.ts");

		assert_eq!(index.len(), 1);
		assert_eq!(index.dir_map.get("a/b").map(Vec::len), Some(1));
	}

	#[test]
	fn remove_prunes_empty_directory_entries() {
		let mut index = SearchIndex::new();
		index.add_path("a/b/c.ts");
		index.add_path("a/b/d.ts");

		index.remove_path("a/b/c.ts");
		assert!(index.dir_map.contains_key("a/b"));

		index.remove_path("a/b/d.ts");
		assert!(!index.dir_map.contains_key("a/b"));
		assert!(index.terms.is_empty());
		assert!(index.docs.is_empty());
	}

	#[test]
	fn remove_subtree_sheds_whole_directories() {
		let mut index = SearchIndex::new();
		index.add_path("src/app.ts");
		index.add_path("src/deep/util.ts");
		index.add_path("srctwo/other.ts");

		index.remove_subtree("src");

		assert!(!index.contains("src/app.ts"));
		assert!(!index.contains("src/deep/util.ts"));
		assert!(index.contains("srctwo/other.ts"));
	}

	#[test]
	fn tokens_carry_field_bits() {
		let mut index = SearchIndex::new();
		index.add_path("docs/readme.md");

		let readme = index.terms.get("readme").unwrap();
		let mask = readme.get("docs/readme.md").copied().unwrap();
		assert_ne!(mask & IndexField::Path.bit(), 0);
		assert_ne!(mask & IndexField::Basename.bit(), 0);
		assert_eq!(mask & IndexField::Dirname.bit(), 0);

		let md = index.terms.get("md").unwrap();
		let mask = md.get("docs/readme.md").copied().unwrap();
		assert_ne!(mask & IndexField::Extension.bit(), 0);
	}

	#[tokio::test]
	async fn build_walks_the_facade_and_applies_the_filter() {
		use crate::vfs::MemoryFs;

		let fs = Arc::new(MemoryFs::new());
		fs.mkdir("/src", true).await.unwrap();
		fs.write_file("/src/main.rs", b"").await.unwrap();
		fs.write_file("/draft.md.crswap", b"").await.unwrap();

		let index = SearchIndex::build(fs, &PathFilter::default()).await.unwrap();

		assert!(index.contains("src/main.rs"));
		assert!(!index.contains("draft.md.crswap"));
		assert_eq!(index.len(), 1);
	}
}
