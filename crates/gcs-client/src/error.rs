use std::fmt;

use thiserror::Error;

use super::{config::ConfigError, registry::CompletionToken, transport::ChannelRole};

#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Connection(#[from] ConnectionError),
	#[error("shard connection is not attached to an event loop")]
	NotAttached,
	#[error("shard connection is already attached to an event loop")]
	AlreadyAttached,
	#[error("shard connection is closed")]
	Closed,
	#[error("unknown completion token: {0}")]
	UnknownToken(CompletionToken),
	#[error("transport error: {0}")]
	Transport(#[from] TransportError),
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error(transparent)]
	Read(#[from] ReadError),

	#[error("failed to encode record: {0}")]
	Encode(#[from] rmp_serde::encode::Error),
	#[error("failed to decode record: {0}")]
	Decode(#[from] rmp_serde::decode::Error),
}

/// Failure to bring up a shard connection. Every channel that failed is listed,
/// channels that did open were closed again before this error was returned.
#[derive(Debug, Error)]
pub struct ConnectionError {
	pub failures: Vec<(ChannelRole, TransportError)>,
}

impl fmt::Display for ConnectionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "failed to connect shard channels")?;

		for (idx, (role, e)) in self.failures.iter().enumerate() {
			let sep = if idx == 0 { ": " } else { "; " };
			write!(f, "{sep}<channel='{role}'> {e}")?;
		}

		Ok(())
	}
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
	#[error("connection refused <addr='{0}'>")]
	Refused(String),
	#[error("channel disconnected")]
	Disconnected,
	#[error("{0}")]
	Other(String),
}

/// Why a frame was dropped by the dispatch layer. Never surfaced to callers,
/// a malformed frame can't be attributed to any pending write.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedReply {
	#[error("expected an integer sequence number, got {0}")]
	NotASequenceNumber(String),
	#[error("negative sequence number: {0}")]
	NegativeSequenceNumber(i64),
	#[error("pubsub frame has {0} elements, expected 3")]
	BadArity(usize),
	#[error("unexpected pubsub message kind: {0}")]
	UnknownKind(String),
	#[error("message for foreign channel: {0}")]
	ForeignChannel(String),
	#[error("ack payload is not a sequence number: {0}")]
	BadPayload(String),
	#[error("unexpected frame: {0}")]
	UnexpectedFrame(String),
}

/// Failure delivered to a completion callback, each accepted write receives
/// either its sequence number or exactly one of these.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WriteError {
	#[error("write timed out after {attempts} attempts")]
	TimedOut { attempts: u32 },
	#[error("connection closed before the write was acknowledged")]
	ConnectionClosed,
	#[error("store rejected the write: {0}")]
	Rejected(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadError {
	#[error("connection closed before the read was answered")]
	ConnectionClosed,
	#[error("store rejected the read: {0}")]
	Rejected(String),
}
