//! Binary wire format for snapshot trees.
//!
//! Every node is a MessagePack array whose first element is an integer tag:
//!
//! - folder: `[0, {reserved attributes}, {name: node, ...}]`
//! - file: `[1, {mode, size, atime, mtime, ctime}, <bin bytes>]`
//! - symlink: `[2, {"target": path}]`
//!
//! Any other tag is corrupt input and decoding fails without producing a
//! partial tree. Unknown keys inside attribute maps are ignored and missing
//! stat keys default to zero, so the format can grow fields without breaking
//! old readers.

use std::collections::BTreeMap;

use rmpv::Value;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use super::{FileMetadata, FolderMetadata, SnapshotError, SnapshotNode};

const TAG_FOLDER: u64 = 0;
const TAG_FILE: u64 = 1;
const TAG_SYMLINK: u64 = 2;

/// Encode a snapshot tree into its wire form.
pub fn encode(node: &SnapshotNode) -> Result<Vec<u8>, SnapshotError> {
	rmp_serde::to_vec(node).map_err(Into::into)
}

/// Decode a wire buffer back into a snapshot tree.
///
/// The buffer must contain exactly one node; trailing bytes are rejected.
pub fn decode(buffer: &[u8]) -> Result<SnapshotNode, SnapshotError> {
	let mut cursor = buffer;
	let value = rmpv::decode::read_value(&mut cursor)?;
	if !cursor.is_empty() {
		return Err(SnapshotError::Malformed(format!(
			"{} trailing bytes after the root node",
			cursor.len()
		)));
	}
	node_from_value(value)
}

struct Bin<'a>(&'a [u8]);

impl Serialize for Bin<'_> {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_bytes(self.0)
	}
}

impl Serialize for FolderMetadata {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_map(Some(0))?.end()
	}
}

impl Serialize for FileMetadata {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(5))?;
		map.serialize_entry("mode", &self.mode)?;
		map.serialize_entry("size", &self.size)?;
		map.serialize_entry("atime", &self.atime_ms)?;
		map.serialize_entry("mtime", &self.mtime_ms)?;
		map.serialize_entry("ctime", &self.ctime_ms)?;
		map.end()
	}
}

struct SymlinkMeta<'a>(&'a str);

impl Serialize for SymlinkMeta<'_> {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(1))?;
		map.serialize_entry("target", self.0)?;
		map.end()
	}
}

impl Serialize for SnapshotNode {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		match self {
			Self::Folder { meta, entries } => {
				let mut seq = serializer.serialize_seq(Some(3))?;
				seq.serialize_element(&TAG_FOLDER)?;
				seq.serialize_element(meta)?;
				seq.serialize_element(entries)?;
				seq.end()
			}
			Self::File { meta, bytes } => {
				let mut seq = serializer.serialize_seq(Some(3))?;
				seq.serialize_element(&TAG_FILE)?;
				seq.serialize_element(meta)?;
				seq.serialize_element(&Bin(bytes))?;
				seq.end()
			}
			Self::Symlink { target } => {
				let mut seq = serializer.serialize_seq(Some(2))?;
				seq.serialize_element(&TAG_SYMLINK)?;
				seq.serialize_element(&SymlinkMeta(target))?;
				seq.end()
			}
		}
	}
}

fn node_from_value(value: Value) -> Result<SnapshotNode, SnapshotError> {
	let Value::Array(items) = value else {
		return Err(SnapshotError::Malformed(
			"node is not an array".to_owned(),
		));
	};
	let mut items = items.into_iter();
	let tag_value = items
		.next()
		.ok_or_else(|| SnapshotError::Malformed("empty node array".to_owned()))?;
	let Some(tag) = tag_value.as_u64() else {
		return Err(SnapshotError::Malformed(
			"node tag is not an unsigned integer".to_owned(),
		));
	};

	let node = match tag {
		TAG_FOLDER => {
			let _meta = expect_map(items.next(), "folder attributes")?;
			let entries_value = expect_map(items.next(), "folder entries")?;
			let mut entries = BTreeMap::new();
			for (key, child) in entries_value {
				let name = string_key(key, "folder entry name")?;
				entries.insert(name, node_from_value(child)?);
			}
			SnapshotNode::folder(entries)
		}
		TAG_FILE => {
			let meta = file_metadata_from(expect_map(items.next(), "file stat")?)?;
			let bytes = match items.next() {
				Some(Value::Binary(bytes)) => bytes,
				Some(_) => {
					return Err(SnapshotError::Malformed(
						"file bytes are not binary".to_owned(),
					))
				}
				None => {
					return Err(SnapshotError::Malformed(
						"file node missing bytes".to_owned(),
					))
				}
			};
			SnapshotNode::File { meta, bytes }
		}
		TAG_SYMLINK => {
			let meta = expect_map(items.next(), "symlink attributes")?;
			let mut target = None;
			for (key, value) in meta {
				if key.as_str() == Some("target") {
					target = value.as_str().map(str::to_owned);
				}
			}
			let target = target.ok_or_else(|| {
				SnapshotError::Malformed("symlink node missing target".to_owned())
			})?;
			SnapshotNode::symlink(target)
		}
		_ => return Err(SnapshotError::UnknownNodeTag(tag)),
	};

	if items.next().is_some() {
		return Err(SnapshotError::Malformed(
			"node array has trailing elements".to_owned(),
		));
	}
	Ok(node)
}

fn expect_map(
	value: Option<Value>,
	what: &str,
) -> Result<Vec<(Value, Value)>, SnapshotError> {
	match value {
		Some(Value::Map(pairs)) => Ok(pairs),
		Some(_) => Err(SnapshotError::Malformed(format!("{what} is not a map"))),
		None => Err(SnapshotError::Malformed(format!("{what} is missing"))),
	}
}

fn string_key(key: Value, what: &str) -> Result<String, SnapshotError> {
	match key {
		Value::String(s) => s
			.into_str()
			.ok_or_else(|| SnapshotError::Malformed(format!("{what} is not valid UTF-8"))),
		_ => Err(SnapshotError::Malformed(format!("{what} is not a string"))),
	}
}

fn file_metadata_from(pairs: Vec<(Value, Value)>) -> Result<FileMetadata, SnapshotError> {
	let mut meta = FileMetadata::default();
	for (key, value) in pairs {
		match key.as_str() {
			Some("mode") => {
				meta.mode = value.as_u64().and_then(|v| u32::try_from(v).ok()).ok_or_else(
					|| SnapshotError::Malformed("file mode is not an integer".to_owned()),
				)?;
			}
			Some("size") => {
				meta.size = value.as_u64().ok_or_else(|| {
					SnapshotError::Malformed("file size is not an integer".to_owned())
				})?;
			}
			Some("atime") => meta.atime_ms = int_time(&value, "atime")?,
			Some("mtime") => meta.mtime_ms = int_time(&value, "mtime")?,
			Some("ctime") => meta.ctime_ms = int_time(&value, "ctime")?,
			_ => {}
		}
	}
	Ok(meta)
}

fn int_time(value: &Value, what: &str) -> Result<i64, SnapshotError> {
	value
		.as_i64()
		.ok_or_else(|| SnapshotError::Malformed(format!("file {what} is not an integer")))
}
