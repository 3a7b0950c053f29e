use std::{
	fmt,
	future::Future,
	pin::Pin,
	sync::Arc,
	task::{Context, Poll},
};

use async_channel as chan;
use futures_concurrency::future::Join;
use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::oneshot, task::JoinHandle};
use tracing::{debug, error, instrument, warn, Instrument};

use super::{
	config::ClientConfig,
	error::{ConnectionError, Error, ReadError},
	message::{ConnectionMessage, DispatchContext},
	registry::{CallbackRegistry, CompletionToken, WriteOutcome},
	transport::{ChannelRole, Command, Connector, ShardAddr},
};

mod run;

use run::{run, Channels};

/// Addresses of the three channels of a logical shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardAddrs {
	pub write: ShardAddr,
	pub ack: ShardAddr,
	pub read: ShardAddr,
}

struct Detached {
	channels: Channels,
	msgs_rx: chan::Receiver<ConnectionMessage>,
}

/// Handle to a logical shard of the store, which may be backed by replicas behind the scenes.
///
/// Typical usage is to [`connect`](Self::connect), then [`attach_to_loop`](Self::attach_to_loop)
/// and only then [`add`](Self::add). Every API call returns immediately, results are delivered on the
/// connection's own loop.
pub struct ShardConnection {
	shard: ShardAddr,
	config: Arc<ClientConfig>,
	registry: Arc<CallbackRegistry>,
	msgs_tx: chan::Sender<ConnectionMessage>,
	detached: Mutex<Option<Detached>>,
	handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ShardConnection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ShardConnection")
			.field("shard", &self.shard)
			.field("attached", &self.detached.lock().is_none())
			.finish_non_exhaustive()
	}
}

impl ShardConnection {
	/// Opens the write, ack and read channels of a shard. Either all of them are established or none
	/// is kept open.
	#[instrument(skip(connector, config, registry), err)]
	pub async fn connect(
		connector: &impl Connector,
		addrs: &ShardAddrs,
		config: ClientConfig,
		registry: Arc<CallbackRegistry>,
	) -> Result<Self, Error> {
		config.validate()?;

		let (write, ack, read) = (
			connector.open(ChannelRole::Write, &addrs.write),
			connector.open(ChannelRole::Ack, &addrs.ack),
			connector.open(ChannelRole::Read, &addrs.read),
		)
			.join()
			.await;

		let (write, ack, read) = match (write, ack, read) {
			(Ok(write), Ok(ack), Ok(read)) => (write, ack, read),
			(write, ack, read) => {
				let mut failures = Vec::with_capacity(3);
				let mut opened = Vec::with_capacity(2);

				for (role, res) in [
					(ChannelRole::Write, write),
					(ChannelRole::Ack, ack),
					(ChannelRole::Read, read),
				] {
					match res {
						Ok(channel) => opened.push(channel),
						Err(e) => failures.push((role, e)),
					}
				}

				opened
					.iter()
					.map(|channel| channel.close())
					.collect::<Vec<_>>()
					.join()
					.await;

				return Err(ConnectionError { failures }.into());
			}
		};

		let (msgs_tx, msgs_rx) = chan::unbounded();

		debug!("Shard channels established;");

		Ok(Self {
			shard: addrs.write.clone(),
			config: Arc::new(config),
			registry,
			msgs_tx,
			detached: Mutex::new(Some(Detached {
				channels: Channels { write, ack, read },
				msgs_rx,
			})),
			handle: Mutex::new(None),
		})
	}

	/// Hands the channels to a loop running on `handle` and subscribes to the shard's ack channel.
	#[instrument(skip(self, handle), fields(shard = %self.shard), err)]
	pub async fn attach_to_loop(&self, handle: &Handle) -> Result<(), Error> {
		let Some(Detached {
			mut channels,
			msgs_rx,
		}) = self.detached.lock().take()
		else {
			return Err(if self.msgs_tx.is_closed() {
				Error::Closed
			} else {
				Error::AlreadyAttached
			});
		};

		let (inbound_tx, inbound_rx) = chan::unbounded();

		let registered = [
			channels.write.register(inbound_tx.clone()),
			channels.ack.register(inbound_tx.clone()),
			channels.read.register(inbound_tx),
		]
		.into_iter()
		.collect::<Result<Vec<()>, _>>();

		// Every frame published on the ack channel comes back tagged as part of the ack stream,
		// never with a write's token
		let subscribed = match registered {
			Ok(_) => {
				channels
					.ack
					.send(
						Command::Subscribe {
							channel: self.config.ack_channel.clone(),
						},
						DispatchContext::AckStream,
					)
					.await
			}
			Err(e) => Err(e),
		};

		if let Err(e) = subscribed {
			*self.detached.lock() = Some(Detached { channels, msgs_rx });
			return Err(e.into());
		}

		*self.handle.lock() = Some(
			handle.spawn(
				run(
					self.shard.clone(),
					channels,
					msgs_rx,
					inbound_rx,
					Arc::clone(&self.registry),
					Arc::clone(&self.config),
				)
				.in_current_span(),
			),
		);

		Ok(())
	}

	/// Sends a write tagged with an already allocated `token`. Returns immediately, the token's
	/// callback is resolved once the write is acknowledged or definitely failed.
	///
	/// If this returns an error the write was never sent and the token is left untouched.
	pub fn add(
		&self,
		key: impl Into<Vec<u8>>,
		value: impl Into<Vec<u8>>,
		token: CompletionToken,
	) -> Result<(), Error> {
		if self.detached.lock().is_some() {
			return Err(Error::NotAttached);
		}

		self.msgs_tx
			.try_send(ConnectionMessage::Add {
				key: key.into(),
				value: value.into(),
				token,
			})
			.map_err(|_| Error::Closed)
	}

	/// Allocates a token for `done` and sends the write. `done` is invoked exactly once if this
	/// returns `Ok`, and never if it returns an error.
	pub fn add_with_callback(
		&self,
		key: impl Into<Vec<u8>>,
		value: impl Into<Vec<u8>>,
		done: impl FnOnce(WriteOutcome) + Send + 'static,
	) -> Result<CompletionToken, Error> {
		let token = self.registry.allocate(done);

		if let Err(e) = self.add(key, value, token) {
			if let Err(release_err) = self.registry.release(token) {
				error!(%token, ?release_err, "Failed to release token of a refused write;");
			}

			return Err(e);
		}

		Ok(token)
	}

	/// Looks `key` up on the read channel.
	pub fn get(&self, key: impl Into<Vec<u8>>) -> Result<PendingRead, Error> {
		if self.detached.lock().is_some() {
			return Err(Error::NotAttached);
		}

		let (done_tx, done_rx) = oneshot::channel();

		self.msgs_tx
			.try_send(ConnectionMessage::Get {
				key: key.into(),
				done_tx,
			})
			.map_err(|_| Error::Closed)?;

		Ok(PendingRead { done_rx })
	}

	/// Number of writes not yet completed.
	pub async fn pending_count(&self) -> Result<usize, Error> {
		if self.detached.lock().is_some() {
			return Err(Error::NotAttached);
		}

		let (tx, rx) = oneshot::channel();

		self.msgs_tx
			.send(ConnectionMessage::PendingCountRequest(tx))
			.await
			.map_err(|_| Error::Closed)?;

		rx.await.map_err(|_| Error::Closed)
	}

	#[must_use]
	pub fn registry(&self) -> &Arc<CallbackRegistry> {
		&self.registry
	}

	#[must_use]
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Tears the connection down, every write still pending is completed with
	/// [`WriteError::ConnectionClosed`](crate::WriteError::ConnectionClosed).
	#[instrument(skip(self), fields(shard = %self.shard))]
	pub async fn close(&self) {
		let maybe_handle = self.handle.lock().take();
		let maybe_detached = self.detached.lock().take();

		if let Some(handle) = maybe_handle {
			let (tx, rx) = oneshot::channel();

			if self
				.msgs_tx
				.send(ConnectionMessage::ShutdownRequest(tx))
				.await
				.is_ok()
			{
				if rx.await.is_err() {
					warn!("Shard connection loop exited without acknowledging shutdown");
				}
			} else {
				warn!("Shard connection loop already gone while trying to shutdown");
			}

			if let Err(e) = handle.await {
				error!(?e, "Shard connection loop failed to shutdown;");
			}
		} else if let Some(Detached { channels, .. }) = maybe_detached {
			channels.close().await;
		} else {
			warn!("Trying to close a shard connection that was already closed");
		}

		self.msgs_tx.close();
	}
}

/// Result of [`ShardConnection::get`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct PendingRead {
	done_rx: oneshot::Receiver<Result<Option<Vec<u8>>, ReadError>>,
}

impl Future for PendingRead {
	type Output = Result<Option<Vec<u8>>, ReadError>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.done_rx)
			.poll(cx)
			.map(|res| res.unwrap_or(Err(ReadError::ConnectionClosed)))
	}
}

impl Channels {
	async fn close(&self) {
		(self.write.close(), self.ack.close(), self.read.close())
			.join()
			.await;
	}
}
