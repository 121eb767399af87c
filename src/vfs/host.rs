//! Host-native filesystem backend.
//!
//! Virtual paths are rooted at a real directory and served by `tokio::fs`.
//! Watching bridges a `notify` recursive watcher into the facade's stream
//! shape; the watcher lives inside the stream and is dropped with it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use notify::event::{EventKind, ModifyKind};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use super::{
	split_segments, DirEntry, EntryKind, Stat, Vfs, VfsError, WatchEvent, WatchEventKind,
};

/// Facade over a directory on the host disk.
#[derive(Debug, Clone)]
pub struct HostFs {
	root: PathBuf,
}

impl HostFs {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn real_path(&self, path: &str) -> Result<PathBuf, VfsError> {
		let segments = split_segments(path)?;
		let mut real = self.root.clone();
		for segment in segments {
			real.push(segment);
		}
		Ok(real)
	}

	fn virtual_path(&self, real: &Path) -> Option<String> {
		let rel = real.strip_prefix(&self.root).ok()?;
		let mut out = String::new();
		for component in rel.components() {
			out.push('/');
			out.push_str(&component.as_os_str().to_string_lossy());
		}
		if out.is_empty() {
			out.push('/');
		}
		Some(out)
	}
}

fn map_io(path: &str, source: std::io::Error) -> VfsError {
	match source.kind() {
		ErrorKind::NotFound => VfsError::NotFound(path.to_owned()),
		ErrorKind::AlreadyExists => VfsError::AlreadyExists(path.to_owned()),
		_ => VfsError::Io {
			path: path.to_owned(),
			source,
		},
	}
}

fn time_or_epoch(time: std::io::Result<std::time::SystemTime>) -> DateTime<Utc> {
	time.map(DateTime::<Utc>::from)
		.unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
}

#[cfg(unix)]
fn mode_of(metadata: &std::fs::Metadata) -> u32 {
	use std::os::unix::fs::PermissionsExt;
	metadata.permissions().mode()
}

#[cfg(not(unix))]
fn mode_of(metadata: &std::fs::Metadata) -> u32 {
	if metadata.is_dir() {
		0o755
	} else {
		0o644
	}
}

fn kind_of(file_type: std::fs::FileType) -> EntryKind {
	if file_type.is_symlink() {
		EntryKind::Symlink
	} else if file_type.is_dir() {
		EntryKind::Dir
	} else {
		EntryKind::File
	}
}

fn translate_kind(kind: &EventKind) -> Option<WatchEventKind> {
	match kind {
		EventKind::Access(_) => None,
		EventKind::Create(_) | EventKind::Remove(_) => Some(WatchEventKind::Rename),
		EventKind::Modify(ModifyKind::Name(_)) => Some(WatchEventKind::Rename),
		EventKind::Modify(_) => Some(WatchEventKind::Change),
		EventKind::Any | EventKind::Other => Some(WatchEventKind::Change),
	}
}

#[async_trait]
impl Vfs for HostFs {
	async fn read_file(&self, path: &str) -> Result<Vec<u8>, VfsError> {
		let real = self.real_path(path)?;
		fs::read(&real).await.map_err(|e| map_io(path, e))
	}

	async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<(), VfsError> {
		let real = self.real_path(path)?;
		fs::write(&real, bytes).await.map_err(|e| map_io(path, e))
	}

	async fn mkdir(&self, path: &str, recursive: bool) -> Result<(), VfsError> {
		let real = self.real_path(path)?;
		let result = if recursive {
			fs::create_dir_all(&real).await
		} else {
			fs::create_dir(&real).await
		};
		result.map_err(|e| map_io(path, e))
	}

	async fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, VfsError> {
		let real = self.real_path(path)?;
		let mut dir = fs::read_dir(&real).await.map_err(|e| map_io(path, e))?;
		let mut entries = Vec::new();
		while let Some(entry) = dir.next_entry().await.map_err(|e| map_io(path, e))? {
			let file_type = entry.file_type().await.map_err(|e| map_io(path, e))?;
			entries.push(DirEntry {
				name: entry.file_name().to_string_lossy().into_owned(),
				kind: kind_of(file_type),
			});
		}
		entries.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(entries)
	}

	async fn remove(&self, path: &str) -> Result<(), VfsError> {
		let real = self.real_path(path)?;
		let metadata = fs::symlink_metadata(&real)
			.await
			.map_err(|e| map_io(path, e))?;
		let result = if metadata.is_dir() {
			fs::remove_dir_all(&real).await
		} else {
			fs::remove_file(&real).await
		};
		result.map_err(|e| map_io(path, e))
	}

	async fn rename(&self, from: &str, to: &str) -> Result<(), VfsError> {
		let real_from = self.real_path(from)?;
		let real_to = self.real_path(to)?;
		fs::rename(&real_from, &real_to)
			.await
			.map_err(|e| map_io(from, e))
	}

	#[cfg(unix)]
	async fn symlink(&self, target: &str, path: &str) -> Result<(), VfsError> {
		let real = self.real_path(path)?;
		fs::symlink(target, &real).await.map_err(|e| map_io(path, e))
	}

	#[cfg(not(unix))]
	async fn symlink(&self, _target: &str, _path: &str) -> Result<(), VfsError> {
		Err(VfsError::Unsupported("symlink"))
	}

	async fn read_link(&self, path: &str) -> Result<String, VfsError> {
		let real = self.real_path(path)?;
		let target = fs::read_link(&real).await.map_err(|e| match e.kind() {
			ErrorKind::InvalidInput => VfsError::NotASymlink(path.to_owned()),
			_ => map_io(path, e),
		})?;
		Ok(target.to_string_lossy().into_owned())
	}

	async fn stat(&self, path: &str) -> Option<Stat> {
		let real = self.real_path(path).ok()?;
		let metadata = fs::symlink_metadata(&real).await.ok()?;
		Some(Stat {
			kind: kind_of(metadata.file_type()),
			size: metadata.len(),
			mode: mode_of(&metadata),
			atime: time_or_epoch(metadata.accessed()),
			mtime: time_or_epoch(metadata.modified()),
			ctime: time_or_epoch(metadata.created().or_else(|_| metadata.modified())),
		})
	}

	async fn exists(&self, path: &str) -> bool {
		match self.real_path(path) {
			Ok(real) => fs::try_exists(&real).await.unwrap_or(false),
			Err(_) => false,
		}
	}

	fn watch(&self, path: &str, cancel: CancellationToken) -> BoxStream<'static, WatchEvent> {
		let real = match self.real_path(path) {
			Ok(real) => real,
			Err(e) => {
				warn!(path, %e, "Refusing to watch an invalid path");
				return futures::stream::empty().boxed();
			}
		};

		let (tx, mut rx) = mpsc::unbounded_channel::<notify::Event>();
		let mut watcher = match RecommendedWatcher::new(
			move |result: notify::Result<notify::Event>| match result {
				Ok(event) => {
					let _ = tx.send(event);
				}
				Err(e) => error!(%e, "File watcher error"),
			},
			Config::default(),
		) {
			Ok(watcher) => watcher,
			Err(e) => {
				error!(path, %e, "Failed to create file watcher");
				return futures::stream::empty().boxed();
			}
		};
		if let Err(e) = watcher.watch(&real, RecursiveMode::Recursive) {
			error!(path, %e, "Failed to start watching");
			return futures::stream::empty().boxed();
		}

		let this = self.clone();
		let stream = async_stream::stream! {
			// The watcher must stay alive as long as the stream is polled.
			let _watcher = watcher;
			loop {
				let event = tokio::select! {
					_ = cancel.cancelled() => break,
					received = rx.recv() => match received {
						Some(event) => event,
						None => break,
					},
				};
				let Some(kind) = translate_kind(&event.kind) else {
					continue;
				};
				for event_path in &event.paths {
					if let Some(path) = this.virtual_path(event_path) {
						yield WatchEvent { kind, path };
					}
				}
			}
		};
		stream.boxed()
	}
}
