//! JSON persistence for the search index.
//!
//! The stored document is `{ version, index: { fields, docs }, dirMap }`.
//! Only the document paths and the directory map are written; the term map
//! is cheap to re-derive, so loading replays every path through the
//! tokenizer instead of trusting a serialized copy of it.
//!
//! Saving never fails its caller. A lost index is only a cache miss: it
//! gets rebuilt on the next load, and failing an editing operation over it
//! would be a bad trade.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::filter::PathFilter;
use crate::vfs::Vfs;

use super::{Document, IndexError, IndexOptions, SearchIndex};

/// Where an index lives unless the caller picks another spot.
pub const DEFAULT_INDEX_PATH: &str = ".codeblock/index.json";

const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
	version: u32,
	index: PersistedDocs,
	#[serde(rename = "dirMap")]
	dir_map: Vec<(String, Vec<String>)>,
}

#[derive(Serialize, Deserialize)]
struct PersistedDocs {
	fields: Vec<super::IndexField>,
	docs: Vec<String>,
}

impl SearchIndex {
	/// Persist to `path`, creating parent directories first. Errors are
	/// logged and swallowed; the caller always continues with its index
	/// intact.
	pub async fn save(&self, vfs: &dyn Vfs, path: &str) {
		if let Err(err) = self.try_save(vfs, path).await {
			warn!(path = %path, "index save failed: {err}");
		}
	}

	async fn try_save(&self, vfs: &dyn Vfs, path: &str) -> Result<(), IndexError> {
		let mut docs = self.docs.keys().cloned().collect::<Vec<_>>();
		docs.sort();
		let mut dir_map = self
			.dir_map
			.iter()
			.map(|(dir, children)| (dir.clone(), children.clone()))
			.collect::<Vec<_>>();
		dir_map.sort_by(|(a, _), (b, _)| a.cmp(b));

		let persisted = PersistedIndex {
			version: INDEX_FORMAT_VERSION,
			index: PersistedDocs {
				fields: self.fields.clone(),
				docs,
			},
			dir_map,
		};
		let bytes = serde_json::to_vec(&persisted)?;

		if let Some((parent, _)) = path.rsplit_once('/') {
			if !parent.is_empty() {
				vfs.mkdir(parent, true).await.map_err(|source| IndexError::Write {
					path: parent.to_owned(),
					source,
				})?;
			}
		}
		vfs.write_file(path, &bytes)
			.await
			.map_err(|source| IndexError::Write {
				path: path.to_owned(),
				source,
			})?;

		debug!(path = %path, documents = self.len(), "saved search index");
		Ok(())
	}

	/// Load a previously saved index, re-deriving the term map.
	pub async fn load(vfs: &dyn Vfs, path: &str) -> Result<Self, IndexError> {
		let bytes = vfs.read_file(path).await.map_err(|source| IndexError::Read {
			path: path.to_owned(),
			source,
		})?;
		let persisted: PersistedIndex = serde_json::from_slice(&bytes)?;
		if persisted.version != INDEX_FORMAT_VERSION {
			return Err(IndexError::Version(persisted.version));
		}

		let mut index = Self::with_fields(persisted.index.fields);
		for path in &persisted.index.docs {
			let path = path.trim_matches('/');
			if path.is_empty() || index.docs.contains_key(path) {
				continue;
			}
			let doc = Document::split(path);
			index.insert_tokens(path, &doc);
			index.docs.insert(path.to_owned(), doc);
		}
		// The stored map keeps each directory's child order; rebuilding it
		// from the sorted doc list would lose that.
		index.dir_map = persisted.dir_map.into_iter().collect();

		debug!(path = %path, documents = index.len(), "loaded search index");
		Ok(index)
	}

	/// Load from `path` when something usable is stored there, otherwise
	/// build fresh per `options` and persist the result right away.
	pub async fn get(vfs: Arc<dyn Vfs>, path: &str, options: &IndexOptions) -> Self {
		if vfs.exists(path).await {
			match Self::load(vfs.as_ref(), path).await {
				Ok(index) => return index,
				Err(err) => {
					warn!(path = %path, "stored index unusable: {err}; rebuilding");
				}
			}
		}

		let filter = match PathFilter::load(&options.filter, vfs.as_ref()).await {
			Ok(filter) => filter,
			Err(err) => {
				warn!("filter config unusable: {err}; falling back to defaults");
				PathFilter::default()
			}
		};

		match Self::build_with(Arc::clone(&vfs), options.fields.clone(), &filter).await {
			Ok(index) => {
				index.save(vfs.as_ref(), path).await;
				index
			}
			Err(err) => {
				// Nothing is persisted here: an empty index must not shadow
				// the real tree on the next load.
				warn!("index build failed: {err}; starting empty");
				Self::with_fields(options.fields.clone())
			}
		}
	}
}
