//! Message schema between session handles and the host task.

use std::sync::Arc;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::vfs::MemoryFs;

use super::MountHostError;

pub type SessionId = Uuid;

/// What to mount and where.
///
/// The buffer is owned so a session hands its bytes to the host without
/// copying them. When the snapshot lives behind a URL, prefer
/// [`mount_from_url`](super::HostSession::mount_from_url) and let the host
/// fetch it directly.
#[derive(Debug, Clone, Default)]
pub struct MountRequest {
	/// Encoded snapshot to replay, or `None` for an empty filesystem.
	pub buffer: Option<Vec<u8>>,
	pub mount_point: String,
}

pub(crate) type MountReply = oneshot::Sender<Result<Arc<MemoryFs>, MountHostError>>;

pub(crate) enum HostCommand {
	Connect {
		reply: oneshot::Sender<SessionId>,
	},
	Mount {
		session: SessionId,
		request: MountRequest,
		reply: MountReply,
	},
	MountFromUrl {
		session: SessionId,
		url: String,
		mount_point: String,
		reply: MountReply,
	},
	Disconnect {
		session: SessionId,
	},
	Shutdown,
}
