//! Seam between a shard connection and whatever actually talks to the store.

use std::fmt;

use async_channel as chan;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
	error::TransportError,
	message::{DispatchContext, Inbound},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardAddr {
	pub host: String,
	pub port: u16,
}

impl ShardAddr {
	pub fn new(host: impl Into<String>, port: u16) -> Self {
		Self {
			host: host.into(),
			port,
		}
	}
}

impl fmt::Display for ShardAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.host, self.port)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
	Write,
	Ack,
	Read,
}

impl fmt::Display for ChannelRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Write => "write",
			Self::Ack => "ack",
			Self::Read => "read",
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
	/// `MEMBER.PUT key value`, replied with the assigned sequence number.
	Put { key: Vec<u8>, value: Vec<u8> },
	/// `SUBSCRIBE channel`, every message published afterwards is replied to the same context.
	Subscribe { channel: String },
	/// `GET key`, replied with the value or nil.
	Get { key: Vec<u8> },
}

/// One established channel to a shard.
///
/// Sending never waits for the reply: replies are pushed to the sender given on [`Channel::register`],
/// tagged with the [`DispatchContext`] their command was sent with.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
	fn register(&mut self, inbound: chan::Sender<Inbound>) -> Result<(), TransportError>;

	async fn send(&self, command: Command, context: DispatchContext) -> Result<(), TransportError>;

	async fn close(&self);
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
	async fn open(
		&self,
		role: ChannelRole,
		addr: &ShardAddr,
	) -> Result<Box<dyn Channel>, TransportError>;
}
