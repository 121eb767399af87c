//! Watch-driven index maintenance.
//!
//! One task owns one [`SearchIndex`] and keeps it in step with a facade by
//! consuming its watch stream: rename events re-stat the path and add or
//! shed documents, content changes pass through untouched, and the index is
//! persisted on a timer whenever something actually changed. Nothing else
//! may mutate the index while the maintainer holds it; callers get it back
//! when the task winds down.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::filter::PathFilter;
use crate::vfs::{walk, EntryKind, Vfs, WatchEvent, WatchEventKind};

use super::{SearchIndex, DEFAULT_INDEX_PATH};

const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(30);

pub struct IndexMaintainer {
	vfs: Arc<dyn Vfs>,
	index: SearchIndex,
	filter: PathFilter,
	index_path: String,
	save_interval: Duration,
}

impl IndexMaintainer {
	pub fn new(vfs: Arc<dyn Vfs>, index: SearchIndex) -> Self {
		Self {
			vfs,
			index,
			filter: PathFilter::default(),
			index_path: DEFAULT_INDEX_PATH.to_owned(),
			save_interval: DEFAULT_SAVE_INTERVAL,
		}
	}

	/// Take over the watch from a running maintainer. The predecessor is
	/// cancelled and drained before the new watch can start, so two
	/// maintainers never mutate the same stored index at once; one that
	/// already wound down hands its index over all the same.
	pub async fn resume(previous: MaintainerHandle, vfs: Arc<dyn Vfs>) -> Self {
		let index = previous.stop().await;
		Self::new(vfs, index)
	}

	/// Apply the same filter the index was built with, so maintenance and
	/// build agree on what belongs in it.
	pub fn with_filter(mut self, filter: PathFilter) -> Self {
		self.filter = filter;
		self
	}

	pub fn save_to(mut self, path: impl Into<String>) -> Self {
		self.index_path = path.into();
		self
	}

	pub fn save_every(mut self, interval: Duration) -> Self {
		self.save_interval = interval;
		self
	}

	pub fn spawn(self, cancel: CancellationToken) -> MaintainerHandle {
		let task = tokio::spawn(self.run(cancel.clone()));
		MaintainerHandle { cancel, task }
	}

	/// Consume watch events until `cancel` fires, then flush any unsaved
	/// changes and hand the index back.
	pub async fn run(mut self, cancel: CancellationToken) -> SearchIndex {
		let mut events = self.vfs.watch("/", cancel.child_token());
		let mut save_timer = time::interval(self.save_interval);
		save_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
		// An interval's first tick completes immediately; swallow it so the
		// first save waits a full period.
		save_timer.tick().await;

		debug!(index_path = %self.index_path, "index maintainer started");
		let mut dirty = false;
		loop {
			tokio::select! {
				() = cancel.cancelled() => break,
				event = events.next() => match event {
					Some(event) => {
						let before = self.index.len();
						self.apply(event).await;
						if self.index.len() != before {
							dirty = true;
						}
					}
					None => break,
				},
				_ = save_timer.tick() => {
					if dirty {
						self.index.save(self.vfs.as_ref(), &self.index_path).await;
						dirty = false;
					}
				}
			}
		}

		if dirty {
			self.index.save(self.vfs.as_ref(), &self.index_path).await;
		}
		debug!(documents = self.index.len(), "index maintainer stopped");
		self.index
	}

	async fn apply(&mut self, event: WatchEvent) {
		if event.kind == WatchEventKind::Change {
			// Content changed in place; the path set is untouched.
			return;
		}

		let rel = event.path.trim_matches('/').to_owned();
		if rel.is_empty() || rel == self.index_path {
			return;
		}

		match self.vfs.stat(&event.path).await {
			None => self.index.remove_subtree(&rel),
			Some(stat) if stat.kind == EntryKind::Dir => {
				if self.filter.matches_dir(&rel) {
					self.adopt_dir(&event.path).await;
				}
			}
			Some(_) => {
				if self.wants(&rel) {
					self.index.add_path(&rel);
				}
			}
		}
	}

	/// A directory appeared wholesale, created or renamed in; no per-child
	/// events preceded it, so pull in everything already underneath.
	async fn adopt_dir(&mut self, path: &str) {
		let mut entries = walk(Arc::clone(&self.vfs), path);
		while let Some(entry) = entries.next().await {
			match entry {
				Ok(child) => {
					let rel = child.trim_matches('/').to_owned();
					if self.wants(&rel) {
						self.index.add_path(&rel);
					}
				}
				Err(err) => {
					warn!(path = %path, "adopting directory failed: {err}");
					break;
				}
			}
		}
	}

	/// The save file itself never goes into the index it stores.
	fn wants(&self, rel: &str) -> bool {
		rel != self.index_path && self.filter.matches(rel)
	}
}

/// A running maintainer task. Dropping the handle leaves the task running;
/// cancelling the token passed to [`IndexMaintainer::spawn`] winds it down
/// without taking the index back.
pub struct MaintainerHandle {
	cancel: CancellationToken,
	task: JoinHandle<SearchIndex>,
}

impl MaintainerHandle {
	/// Cancel the watch and take the index back once the task drains.
	pub async fn stop(self) -> SearchIndex {
		self.cancel.cancel();
		match self.task.await {
			Ok(index) => index,
			Err(err) => {
				error!("index maintainer task failed: {err}");
				SearchIndex::new()
			}
		}
	}
}
