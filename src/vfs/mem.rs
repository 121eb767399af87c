//! In-memory filesystem backend.
//!
//! Mounted snapshot instances live here: a segment-keyed node tree behind an
//! async lock, with a broadcast channel feeding watch streams. Instances are
//! fully independent; sharing happens by handing out `Arc<MemoryFs>` clones.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{
	canonical, path_is_within, split_segments, DirEntry, EntryKind, Stat, Vfs, VfsError,
	WatchEvent, WatchEventKind,
};

const WATCH_CHANNEL_CAPACITY: usize = 1024;
const MAX_LINK_HOPS: usize = 16;

const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;
const SYMLINK_MODE: u32 = 0o777;

#[derive(Debug, Clone)]
enum MemNode {
	Dir {
		children: BTreeMap<String, MemNode>,
		created: DateTime<Utc>,
		modified: DateTime<Utc>,
	},
	File {
		bytes: Vec<u8>,
		created: DateTime<Utc>,
		modified: DateTime<Utc>,
	},
	Symlink {
		target: String,
		created: DateTime<Utc>,
	},
}

impl MemNode {
	fn new_dir() -> Self {
		let now = Utc::now();
		Self::Dir {
			children: BTreeMap::new(),
			created: now,
			modified: now,
		}
	}

	fn new_file(bytes: Vec<u8>) -> Self {
		let now = Utc::now();
		Self::File {
			bytes,
			created: now,
			modified: now,
		}
	}

	fn new_symlink(target: String) -> Self {
		Self::Symlink {
			target,
			created: Utc::now(),
		}
	}

	fn kind(&self) -> EntryKind {
		match self {
			Self::Dir { .. } => EntryKind::Dir,
			Self::File { .. } => EntryKind::File,
			Self::Symlink { .. } => EntryKind::Symlink,
		}
	}

	fn stat(&self) -> Stat {
		// Access times are not tracked; atime mirrors mtime.
		match self {
			Self::Dir {
				created, modified, ..
			} => Stat {
				kind: EntryKind::Dir,
				size: 0,
				mode: DIR_MODE,
				atime: *modified,
				mtime: *modified,
				ctime: *created,
			},
			Self::File {
				bytes,
				created,
				modified,
			} => Stat {
				kind: EntryKind::File,
				size: bytes.len() as u64,
				mode: FILE_MODE,
				atime: *modified,
				mtime: *modified,
				ctime: *created,
			},
			Self::Symlink { target, created } => Stat {
				kind: EntryKind::Symlink,
				size: target.len() as u64,
				mode: SYMLINK_MODE,
				atime: *created,
				mtime: *created,
				ctime: *created,
			},
		}
	}
}

/// Walk an already-resolved segment path without following anything.
fn node_at<'a>(root: &'a MemNode, segments: &[String]) -> Option<&'a MemNode> {
	let mut node = root;
	for segment in segments {
		match node {
			MemNode::Dir { children, .. } => node = children.get(segment)?,
			_ => return None,
		}
	}
	Some(node)
}

/// Expand every symlink along `segments`, returning the link-free path.
///
/// Intermediate links are always followed; the final component only when
/// `follow_final` is set. Link targets may be absolute (restart from the
/// root) or relative to the link's parent, and may contain `..`.
fn resolve_segments(
	root: &MemNode,
	segments: &[&str],
	follow_final: bool,
	path: &str,
) -> Result<Vec<String>, VfsError> {
	let mut resolved: Vec<String> = Vec::new();
	let mut queue: VecDeque<String> = segments.iter().map(|s| (*s).to_owned()).collect();
	let mut hops = 0;

	while let Some(segment) = queue.pop_front() {
		if segment == ".." {
			resolved.pop();
			continue;
		}

		let node = node_at(root, &resolved)
			.ok_or_else(|| VfsError::NotFound(path.to_owned()))?;
		let MemNode::Dir { children, .. } = node else {
			return Err(VfsError::NotADirectory(path.to_owned()));
		};
		let child = children
			.get(&segment)
			.ok_or_else(|| VfsError::NotFound(path.to_owned()))?;

		let is_final = queue.is_empty();
		match child {
			MemNode::Symlink { target, .. } if !is_final || follow_final => {
				hops += 1;
				if hops > MAX_LINK_HOPS {
					return Err(VfsError::InvalidPath(format!(
						"too many levels of symbolic links: {path}"
					)));
				}
				if target.starts_with('/') {
					resolved.clear();
				}
				for part in target.split('/').rev() {
					if !part.is_empty() && part != "." {
						queue.push_front(part.to_owned());
					}
				}
			}
			_ => resolved.push(segment),
		}
	}

	Ok(resolved)
}

/// Mutable access to the children of the directory at `segments`.
fn dir_children_mut<'a>(
	root: &'a mut MemNode,
	segments: &[String],
	path: &str,
) -> Result<&'a mut BTreeMap<String, MemNode>, VfsError> {
	let mut node = root;
	for segment in segments {
		let MemNode::Dir { children, .. } = node else {
			return Err(VfsError::NotADirectory(path.to_owned()));
		};
		node = children
			.get_mut(segment)
			.ok_or_else(|| VfsError::NotFound(path.to_owned()))?;
	}
	match node {
		MemNode::Dir { children, .. } => Ok(children),
		_ => Err(VfsError::NotADirectory(path.to_owned())),
	}
}

fn mkdir_all(root: &mut MemNode, segments: &[&str], path: &str) -> Result<bool, VfsError> {
	let mut node = root;
	let mut created = false;
	for segment in segments {
		let MemNode::Dir { children, .. } = node else {
			return Err(VfsError::NotADirectory(path.to_owned()));
		};
		node = children.entry((*segment).to_owned()).or_insert_with(|| {
			created = true;
			MemNode::new_dir()
		});
	}
	match node {
		MemNode::Dir { .. } => Ok(created),
		_ => Err(VfsError::NotADirectory(path.to_owned())),
	}
}

/// A mutable filesystem held entirely in memory.
#[derive(Debug)]
pub struct MemoryFs {
	root: RwLock<MemNode>,
	events: broadcast::Sender<WatchEvent>,
}

impl MemoryFs {
	pub fn new() -> Self {
		let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
		Self {
			root: RwLock::new(MemNode::new_dir()),
			events,
		}
	}

	fn emit(&self, kind: WatchEventKind, path: String) {
		// Ignore send errors (no receivers)
		let _ = self.events.send(WatchEvent { kind, path });
	}
}

impl Default for MemoryFs {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Vfs for MemoryFs {
	async fn read_file(&self, path: &str) -> Result<Vec<u8>, VfsError> {
		let segments = split_segments(path)?;
		let guard = self.root.read().await;
		let resolved = resolve_segments(&guard, &segments, true, path)?;
		match node_at(&guard, &resolved) {
			Some(MemNode::File { bytes, .. }) => Ok(bytes.clone()),
			Some(_) => Err(VfsError::NotAFile(path.to_owned())),
			None => Err(VfsError::NotFound(path.to_owned())),
		}
	}

	async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), VfsError> {
		let segments = split_segments(path)?;
		if segments.is_empty() {
			return Err(VfsError::NotAFile(path.to_owned()));
		}

		let mut guard = self.root.write().await;
		let event = match resolve_segments(&guard, &segments, true, path) {
			Ok(resolved) => {
				if resolved.is_empty() {
					return Err(VfsError::NotAFile(path.to_owned()));
				}
				let (parent, name) = resolved.split_at(resolved.len() - 1);
				let children = dir_children_mut(&mut guard, parent, path)?;
				match children.get_mut(&name[0]) {
					Some(MemNode::File { bytes, modified, .. }) => {
						*bytes = data.to_vec();
						*modified = Utc::now();
						WatchEventKind::Change
					}
					Some(_) => return Err(VfsError::NotAFile(path.to_owned())),
					None => return Err(VfsError::NotFound(path.to_owned())),
				}
			}
			Err(VfsError::NotFound(_)) => {
				let (parent, name) = segments.split_at(segments.len() - 1);
				let resolved_parent = resolve_segments(&guard, parent, true, path)?;
				let children = dir_children_mut(&mut guard, &resolved_parent, path)?;
				children.insert(name[0].to_owned(), MemNode::new_file(data.to_vec()));
				WatchEventKind::Rename
			}
			Err(e) => return Err(e),
		};
		drop(guard);

		self.emit(event, canonical(&segments));
		Ok(())
	}

	async fn mkdir(&self, path: &str, recursive: bool) -> Result<(), VfsError> {
		let segments = split_segments(path)?;
		if segments.is_empty() {
			return if recursive {
				Ok(())
			} else {
				Err(VfsError::AlreadyExists(path.to_owned()))
			};
		}

		let mut guard = self.root.write().await;
		let created = if recursive {
			mkdir_all(&mut guard, &segments, path)?
		} else {
			let (parent, name) = segments.split_at(segments.len() - 1);
			let resolved_parent = resolve_segments(&guard, parent, true, path)?;
			let children = dir_children_mut(&mut guard, &resolved_parent, path)?;
			if children.contains_key(name[0]) {
				return Err(VfsError::AlreadyExists(path.to_owned()));
			}
			children.insert(name[0].to_owned(), MemNode::new_dir());
			true
		};
		drop(guard);

		if created {
			self.emit(WatchEventKind::Rename, canonical(&segments));
		}
		Ok(())
	}

	async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, VfsError> {
		let segments = split_segments(path)?;
		let guard = self.root.read().await;
		let resolved = resolve_segments(&guard, &segments, true, path)?;
		match node_at(&guard, &resolved) {
			Some(MemNode::Dir { children, .. }) => Ok(children
				.iter()
				.map(|(name, node)| DirEntry {
					name: name.clone(),
					kind: node.kind(),
				})
				.collect()),
			Some(_) => Err(VfsError::NotADirectory(path.to_owned())),
			None => Err(VfsError::NotFound(path.to_owned())),
		}
	}

	async fn remove(&self, path: &str) -> Result<(), VfsError> {
		let segments = split_segments(path)?;
		if segments.is_empty() {
			return Err(VfsError::InvalidPath(path.to_owned()));
		}

		let mut guard = self.root.write().await;
		let (parent, name) = segments.split_at(segments.len() - 1);
		let resolved_parent = resolve_segments(&guard, parent, true, path)?;
		let children = dir_children_mut(&mut guard, &resolved_parent, path)?;
		children
			.remove(name[0])
			.ok_or_else(|| VfsError::NotFound(path.to_owned()))?;
		drop(guard);

		self.emit(WatchEventKind::Rename, canonical(&segments));
		Ok(())
	}

	async fn rename(&self, from: &str, to: &str) -> Result<(), VfsError> {
		let from_segments = split_segments(from)?;
		let to_segments = split_segments(to)?;
		if from_segments.is_empty() || to_segments.is_empty() {
			return Err(VfsError::InvalidPath(from.to_owned()));
		}
		if to_segments.starts_with(&from_segments) {
			return Err(VfsError::InvalidPath(to.to_owned()));
		}

		let mut guard = self.root.write().await;
		let (to_parent, to_name) = to_segments.split_at(to_segments.len() - 1);
		let resolved_to_parent = resolve_segments(&guard, to_parent, true, to)?;
		match node_at(&guard, &resolved_to_parent) {
			Some(MemNode::Dir { children, .. }) => {
				if children.contains_key(to_name[0]) {
					return Err(VfsError::AlreadyExists(to.to_owned()));
				}
			}
			Some(_) => return Err(VfsError::NotADirectory(to.to_owned())),
			None => return Err(VfsError::NotFound(to.to_owned())),
		}

		let (from_parent, from_name) = from_segments.split_at(from_segments.len() - 1);
		let resolved_from_parent = resolve_segments(&guard, from_parent, true, from)?;
		let node = dir_children_mut(&mut guard, &resolved_from_parent, from)?
			.remove(from_name[0])
			.ok_or_else(|| VfsError::NotFound(from.to_owned()))?;
		dir_children_mut(&mut guard, &resolved_to_parent, to)?
			.insert(to_name[0].to_owned(), node);
		drop(guard);

		self.emit(WatchEventKind::Rename, canonical(&from_segments));
		self.emit(WatchEventKind::Rename, canonical(&to_segments));
		Ok(())
	}

	async fn symlink(&self, target: &str, path: &str) -> Result<(), VfsError> {
		let segments = split_segments(path)?;
		if segments.is_empty() {
			return Err(VfsError::InvalidPath(path.to_owned()));
		}

		let mut guard = self.root.write().await;
		let (parent, name) = segments.split_at(segments.len() - 1);
		let resolved_parent = resolve_segments(&guard, parent, true, path)?;
		let children = dir_children_mut(&mut guard, &resolved_parent, path)?;
		if children.contains_key(name[0]) {
			return Err(VfsError::AlreadyExists(path.to_owned()));
		}
		children.insert(name[0].to_owned(), MemNode::new_symlink(target.to_owned()));
		drop(guard);

		self.emit(WatchEventKind::Rename, canonical(&segments));
		Ok(())
	}

	async fn read_link(&self, path: &str) -> Result<String, VfsError> {
		let segments = split_segments(path)?;
		if segments.is_empty() {
			return Err(VfsError::NotASymlink(path.to_owned()));
		}

		let guard = self.root.read().await;
		let (parent, name) = segments.split_at(segments.len() - 1);
		let resolved_parent = resolve_segments(&guard, parent, true, path)?;
		let mut full = resolved_parent;
		full.push(name[0].to_owned());
		match node_at(&guard, &full) {
			Some(MemNode::Symlink { target, .. }) => Ok(target.clone()),
			Some(_) => Err(VfsError::NotASymlink(path.to_owned())),
			None => Err(VfsError::NotFound(path.to_owned())),
		}
	}

	async fn stat(&self, path: &str) -> Option<Stat> {
		let segments = split_segments(path).ok()?;
		let guard = self.root.read().await;
		if segments.is_empty() {
			return Some(guard.stat());
		}
		let (parent, name) = segments.split_at(segments.len() - 1);
		let resolved_parent = resolve_segments(&guard, parent, true, path).ok()?;
		let mut full = resolved_parent;
		full.push(name[0].to_owned());
		node_at(&guard, &full).map(MemNode::stat)
	}

	fn watch(&self, path: &str, cancel: CancellationToken) -> BoxStream<'static, WatchEvent> {
		let watched = match split_segments(path) {
			Ok(segments) => canonical(&segments),
			Err(e) => {
				warn!(path, %e, "Refusing to watch an invalid path");
				return futures::stream::empty().boxed();
			}
		};

		BroadcastStream::new(self.events.subscribe())
			.filter_map(move |received| {
				let keep = match received {
					Ok(event) if path_is_within(&event.path, &watched) => Some(event),
					Ok(_) => None,
					Err(BroadcastStreamRecvError::Lagged(skipped)) => {
						warn!(skipped, "Watch stream lagged, events dropped");
						None
					}
				};
				futures::future::ready(keep)
			})
			.take_until(cancel.cancelled_owned())
			.boxed()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[tokio::test]
	async fn write_then_read_round_trips() {
		let fs = MemoryFs::new();
		fs.mkdir("/project/src", true).await.unwrap();
		fs.write_file("/project/src/main.rs", b"fn main() {}")
			.await
			.unwrap();

		let bytes = fs.read_file("/project/src/main.rs").await.unwrap();
		assert_eq!(bytes, b"fn main() {}".to_vec());
	}

	#[tokio::test]
	async fn write_without_parent_fails() {
		let fs = MemoryFs::new();
		let err = fs.write_file("/missing/file.txt", b"x").await.unwrap_err();
		assert!(matches!(err, VfsError::NotFound(_)));
	}

	#[tokio::test]
	async fn write_overwrites_existing_contents() {
		let fs = MemoryFs::new();
		fs.write_file("/a.txt", b"old").await.unwrap();
		fs.write_file("/a.txt", b"new").await.unwrap();
		assert_eq!(fs.read_file("/a.txt").await.unwrap(), b"new".to_vec());
	}

	#[tokio::test]
	async fn mkdir_recursive_is_idempotent() {
		let fs = MemoryFs::new();
		fs.mkdir("/a/b/c", true).await.unwrap();
		fs.mkdir("/a/b/c", true).await.unwrap();
		assert!(fs.exists("/a/b/c").await);

		let err = fs.mkdir("/a/b/c", false).await.unwrap_err();
		assert!(matches!(err, VfsError::AlreadyExists(_)));
	}

	#[tokio::test]
	async fn read_dir_is_ordered_by_name() {
		let fs = MemoryFs::new();
		fs.mkdir("/d/zeta", true).await.unwrap();
		fs.write_file("/d/alpha.txt", b"").await.unwrap();
		fs.symlink("/d/alpha.txt", "/d/mid").await.unwrap();

		let entries = fs.read_dir("/d").await.unwrap();
		let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
		assert_eq!(names, vec!["alpha.txt", "mid", "zeta"]);
		assert_eq!(entries[0].kind, EntryKind::File);
		assert_eq!(entries[1].kind, EntryKind::Symlink);
		assert_eq!(entries[2].kind, EntryKind::Dir);
	}

	#[tokio::test]
	async fn symlinks_resolve_for_reads() {
		let fs = MemoryFs::new();
		fs.mkdir("/real", true).await.unwrap();
		fs.write_file("/real/data.txt", b"payload").await.unwrap();
		fs.symlink("/real/data.txt", "/absolute-link").await.unwrap();
		fs.symlink("real/data.txt", "/relative-link").await.unwrap();

		assert_eq!(
			fs.read_file("/absolute-link").await.unwrap(),
			b"payload".to_vec()
		);
		assert_eq!(
			fs.read_file("/relative-link").await.unwrap(),
			b"payload".to_vec()
		);
		assert_eq!(fs.read_link("/absolute-link").await.unwrap(), "/real/data.txt");
	}

	#[tokio::test]
	async fn symlink_cycles_are_detected() {
		let fs = MemoryFs::new();
		fs.symlink("/b", "/a").await.unwrap();
		fs.symlink("/a", "/b").await.unwrap();

		let err = fs.read_file("/a").await.unwrap_err();
		assert!(matches!(err, VfsError::InvalidPath(_)));
	}

	#[tokio::test]
	async fn stat_reports_the_link_itself() {
		let fs = MemoryFs::new();
		fs.write_file("/file.txt", b"12345").await.unwrap();
		fs.symlink("/file.txt", "/link").await.unwrap();

		let file_stat = fs.stat("/file.txt").await.unwrap();
		assert_eq!(file_stat.kind, EntryKind::File);
		assert_eq!(file_stat.size, 5);

		let link_stat = fs.stat("/link").await.unwrap();
		assert_eq!(link_stat.kind, EntryKind::Symlink);

		assert!(fs.stat("/nope").await.is_none());
	}

	#[tokio::test]
	async fn remove_drops_whole_subtrees() {
		let fs = MemoryFs::new();
		fs.mkdir("/a/b", true).await.unwrap();
		fs.write_file("/a/b/f.txt", b"x").await.unwrap();
		fs.remove("/a").await.unwrap();
		assert!(!fs.exists("/a").await);
		assert!(!fs.exists("/a/b/f.txt").await);
	}

	#[tokio::test]
	async fn rename_moves_and_refuses_self_nesting() {
		let fs = MemoryFs::new();
		fs.mkdir("/a", true).await.unwrap();
		fs.write_file("/a/f.txt", b"x").await.unwrap();
		fs.mkdir("/dest", true).await.unwrap();

		fs.rename("/a", "/dest/a").await.unwrap();
		assert!(fs.exists("/dest/a/f.txt").await);
		assert!(!fs.exists("/a").await);

		let err = fs.rename("/dest", "/dest/a/inner").await.unwrap_err();
		assert!(matches!(err, VfsError::InvalidPath(_)));
	}

	#[tokio::test]
	async fn watch_sees_changes_and_ends_on_cancel() {
		let fs = MemoryFs::new();
		fs.mkdir("/watched", true).await.unwrap();

		let cancel = CancellationToken::new();
		let mut stream = fs.watch("/watched", cancel.clone());

		fs.write_file("/watched/new.txt", b"1").await.unwrap();
		fs.write_file("/watched/new.txt", b"2").await.unwrap();
		fs.write_file("/elsewhere.txt", b"x").await.unwrap();

		let first = stream.next().await.unwrap();
		assert_eq!(first.kind, WatchEventKind::Rename);
		assert_eq!(first.path, "/watched/new.txt");

		let second = stream.next().await.unwrap();
		assert_eq!(second.kind, WatchEventKind::Change);
		assert_eq!(second.path, "/watched/new.txt");

		cancel.cancel();
		assert!(stream.next().await.is_none());
	}
}
