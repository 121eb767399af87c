//! Long-lived mount host.
//!
//! One tokio task owns every mounted filesystem instance; the rest of the
//! program only reaches it through a typed command channel. Sessions are
//! rows in the host's table: each gets its own mount registry, and tearing
//! a session down drops its registrations without touching anyone else's.
//!
//! A failed mount is logged and reported to the caller; the host task keeps
//! serving. Only [`MountHost::shutdown`] or dropping every handle stops it.

pub mod protocol;

pub use protocol::{MountRequest, SessionId};

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::snapshot::{self, SnapshotError};
use crate::vfs::{MemoryFs, Vfs};

use protocol::HostCommand;

const COMMAND_BUFFER: usize = 64;

#[derive(Error, Debug)]
pub enum MountHostError {
	#[error("snapshot error: {0}")]
	Snapshot(#[from] SnapshotError),
	#[error("fetch failed for {url}: {source}")]
	Fetch {
		url: String,
		#[source]
		source: reqwest::Error,
	},
	#[error("unknown session: {0}")]
	UnknownSession(SessionId),
	#[error("mount host task is not running")]
	HostGone,
}

/// Handle to the host task. Dropping it (together with every session)
/// closes the command channel and the task winds down on its own.
pub struct MountHost {
	commands: mpsc::Sender<HostCommand>,
	task: JoinHandle<()>,
}

impl MountHost {
	/// Start the host task on the current runtime.
	pub fn spawn() -> Self {
		let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
		let task = tokio::spawn(host_loop(rx));
		Self { commands, task }
	}

	/// Register a new session and hand back its handle.
	pub async fn connect(&self) -> Result<HostSession, MountHostError> {
		let (reply, rx) = oneshot::channel();
		self.commands
			.send(HostCommand::Connect { reply })
			.await
			.map_err(|_| MountHostError::HostGone)?;
		let id = rx.await.map_err(|_| MountHostError::HostGone)?;

		Ok(HostSession {
			id,
			commands: self.commands.clone(),
			disconnected: false,
		})
	}

	/// Stop the host after the commands already queued have been served.
	pub async fn shutdown(self) {
		let _ = self.commands.send(HostCommand::Shutdown).await;
		let _ = self.task.await;
	}
}

/// One session's view of the host.
///
/// Sessions are isolated: mounts registered here are invisible to every
/// other session. Dropping the handle disconnects implicitly.
pub struct HostSession {
	id: SessionId,
	commands: mpsc::Sender<HostCommand>,
	disconnected: bool,
}

impl HostSession {
	pub fn id(&self) -> SessionId {
		self.id
	}

	/// Mount a snapshot buffer, or an empty filesystem when the request
	/// carries no buffer. Returns a live handle to the mounted instance.
	pub async fn mount(&self, request: MountRequest) -> Result<Arc<MemoryFs>, MountHostError> {
		let (reply, rx) = oneshot::channel();
		self.commands
			.send(HostCommand::Mount {
				session: self.id,
				request,
				reply,
			})
			.await
			.map_err(|_| MountHostError::HostGone)?;
		rx.await.map_err(|_| MountHostError::HostGone)?
	}

	/// Have the host fetch an encoded snapshot over HTTP and mount it.
	/// The bytes never pass through the caller.
	pub async fn mount_from_url(
		&self,
		url: impl Into<String>,
		mount_point: impl Into<String>,
	) -> Result<Arc<MemoryFs>, MountHostError> {
		let (reply, rx) = oneshot::channel();
		self.commands
			.send(HostCommand::MountFromUrl {
				session: self.id,
				url: url.into(),
				mount_point: mount_point.into(),
				reply,
			})
			.await
			.map_err(|_| MountHostError::HostGone)?;
		rx.await.map_err(|_| MountHostError::HostGone)?
	}

	/// Tear down this session's row in the host table, dropping its mount
	/// registrations. Later calls through this handle report
	/// [`MountHostError::UnknownSession`].
	pub async fn disconnect(&mut self) {
		if self.disconnected {
			return;
		}
		self.disconnected = true;
		let _ = self
			.commands
			.send(HostCommand::Disconnect { session: self.id })
			.await;
	}
}

impl Drop for HostSession {
	fn drop(&mut self) {
		if !self.disconnected {
			// Best effort; if the channel is full or closed the host table
			// entry lives until host shutdown.
			let _ = self
				.commands
				.try_send(HostCommand::Disconnect { session: self.id });
		}
	}
}

#[derive(Default)]
struct SessionState {
	mounts: HashMap<String, Arc<MemoryFs>>,
}

struct HostState {
	sessions: HashMap<SessionId, SessionState>,
	http: reqwest::Client,
}

impl HostState {
	fn new() -> Self {
		Self {
			sessions: HashMap::new(),
			http: reqwest::Client::new(),
		}
	}
}

async fn host_loop(mut commands: mpsc::Receiver<HostCommand>) {
	let mut state = HostState::new();
	debug!("mount host started");

	while let Some(command) = commands.recv().await {
		match command {
			HostCommand::Connect { reply } => {
				let id = SessionId::new_v4();
				state.sessions.insert(id, SessionState::default());
				info!(session = %id, "session connected");
				// Ignore send errors (no receivers)
				let _ = reply.send(id);
			}
			HostCommand::Mount {
				session,
				request,
				reply,
			} => {
				let result = handle_mount(&mut state, session, request).await;
				if let Err(err) = &result {
					error!(session = %session, "mount failed: {err}");
				}
				let _ = reply.send(result);
			}
			HostCommand::MountFromUrl {
				session,
				url,
				mount_point,
				reply,
			} => {
				let result = handle_mount_from_url(&mut state, session, url, mount_point).await;
				if let Err(err) = &result {
					error!(session = %session, "mount from url failed: {err}");
				}
				let _ = reply.send(result);
			}
			HostCommand::Disconnect { session } => {
				if let Some(removed) = state.sessions.remove(&session) {
					info!(
						session = %session,
						mounts = removed.mounts.len(),
						"session disconnected"
					);
				}
			}
			HostCommand::Shutdown => break,
		}
	}

	debug!("mount host stopped");
}

async fn handle_mount(
	state: &mut HostState,
	session: SessionId,
	request: MountRequest,
) -> Result<Arc<MemoryFs>, MountHostError> {
	let MountRequest { buffer, mount_point } = request;
	let session_state = state
		.sessions
		.get_mut(&session)
		.ok_or(MountHostError::UnknownSession(session))?;

	// A fresh instance per mount; nothing is registered until the replay
	// has fully succeeded.
	let fs = Arc::new(MemoryFs::new());
	match &buffer {
		Some(bytes) => snapshot::mount(fs.as_ref(), bytes, &mount_point).await?,
		None => {
			fs.mkdir(&mount_point, true)
				.await
				.map_err(|source| SnapshotError::Io {
					path: mount_point.clone(),
					source,
				})?;
		}
	}

	if session_state
		.mounts
		.insert(mount_point.clone(), Arc::clone(&fs))
		.is_some()
	{
		debug!(session = %session, mount_point = %mount_point, "replaced previous mount");
	}
	info!(
		session = %session,
		mount_point = %mount_point,
		from_buffer = buffer.is_some(),
		"mounted"
	);
	Ok(fs)
}

async fn handle_mount_from_url(
	state: &mut HostState,
	session: SessionId,
	url: String,
	mount_point: String,
) -> Result<Arc<MemoryFs>, MountHostError> {
	// Check the session before spending any network I/O on it.
	if !state.sessions.contains_key(&session) {
		return Err(MountHostError::UnknownSession(session));
	}

	let bytes = fetch_snapshot(&state.http, &url).await?;
	debug!(url = %url, bytes = bytes.len(), "fetched snapshot");

	handle_mount(
		state,
		session,
		MountRequest {
			buffer: Some(bytes),
			mount_point,
		},
	)
	.await
}

async fn fetch_snapshot(http: &reqwest::Client, url: &str) -> Result<Vec<u8>, MountHostError> {
	let response = http
		.get(url)
		.send()
		.await
		.and_then(reqwest::Response::error_for_status)
		.map_err(|source| MountHostError::Fetch {
			url: url.to_owned(),
			source,
		})?;
	let bytes = response
		.bytes()
		.await
		.map_err(|source| MountHostError::Fetch {
			url: url.to_owned(),
			source,
		})?;
	Ok(bytes.to_vec())
}
