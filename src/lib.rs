//! Snapshotable virtual filesystems with path search.
//!
//! This crate carries the filesystem layer of the Codeblock editor:
//!
//! - a binary snapshot format for whole directory trees ([`snapshot`])
//! - glob-based include/exclude filtering with ignore-file support ([`filter`])
//! - a backend-agnostic async filesystem facade with in-memory, host, and
//!   scope-confined adapters ([`vfs`])
//! - a long-lived mount host that owns in-memory instances and hands out
//!   shared handles over a typed message channel ([`host`])
//! - an incrementally maintained path search index with JSON persistence
//!   ([`index`])

pub mod config;
pub mod filter;
pub mod host;
pub mod index;
pub mod snapshot;
pub mod vfs;

pub use config::AppConfig;
pub use filter::{FilterConfig, FilterError, PathFilter};
pub use host::{HostSession, MountHost, MountHostError, MountRequest, SessionId};
pub use index::{
	IndexError, IndexField, IndexMaintainer, IndexOptions, MaintainerHandle, SearchHit,
	SearchIndex, TextHighlight,
};
pub use snapshot::{
	decode, encode, mount, mount_node, take, FileMetadata, FolderMetadata, SnapshotError,
	SnapshotNode,
};
pub use vfs::{
	walk, DirEntry, EntryKind, HostFs, MemoryFs, ScopedFs, Stat, Vfs, VfsError, WatchEvent,
	WatchEventKind,
};
