use tokio::sync::oneshot;

use super::{error::ReadError, registry::CompletionToken, reply::Reply};

pub type ReadId = u64;

/// Tag attached to every command sent to the store and handed back with each of its replies,
/// so the dispatch layer always knows which stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchContext {
	/// Messages published on the shard's broadcast ack channel.
	AckStream,
	/// Reply to one send of a write, `attempt` counts resends of the same write.
	Write {
		token: CompletionToken,
		attempt: u32,
	},
	Read(ReadId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
	pub context: DispatchContext,
	pub reply: Reply,
}

#[derive(Debug)]
pub(crate) enum ConnectionMessage {
	Add {
		key: Vec<u8>,
		value: Vec<u8>,
		token: CompletionToken,
	},
	Get {
		key: Vec<u8>,
		done_tx: oneshot::Sender<Result<Option<Vec<u8>>, ReadError>>,
	},
	PendingCountRequest(oneshot::Sender<usize>),
	ShutdownRequest(oneshot::Sender<()>),
}
