use std::{
	collections::HashMap,
	panic::{catch_unwind, AssertUnwindSafe},
	pin::pin,
	sync::Arc,
};

use async_channel as chan;
use futures::{future, stream, StreamExt};
use futures_concurrency::stream::Merge;
use tokio::{
	sync::oneshot,
	time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, instrument, trace, warn};

use super::super::{
	config::ClientConfig,
	engine::{AssignmentError, Reconciled, ReconciliationEngine, SequenceNumber},
	error::{ReadError, WriteError},
	message::{ConnectionMessage, DispatchContext, Inbound, ReadId},
	registry::{CallbackRegistry, CompletionToken, WriteOutcome},
	reply::{parse_ack_frame, parse_read_reply, parse_write_reply, AckFrame, WriteReply},
	retry::{RetryScheduler, SweepAction},
	transport::{Channel, Command, ShardAddr},
};

pub(super) struct Channels {
	pub(super) write: Box<dyn Channel>,
	pub(super) ack: Box<dyn Channel>,
	pub(super) read: Box<dyn Channel>,
}

type ReadDone = oneshot::Sender<Result<Option<Vec<u8>>, ReadError>>;

#[instrument(name = "shard_connection", skip_all, fields(shard = %shard))]
pub(super) async fn run(
	shard: ShardAddr,
	channels: Channels,
	msgs_rx: chan::Receiver<ConnectionMessage>,
	inbound_rx: chan::Receiver<Inbound>,
	registry: Arc<CallbackRegistry>,
	config: Arc<ClientConfig>,
) {
	enum StreamMessage {
		Commands(ConnectionMessage),
		HandlesDropped,
		Inbound(Inbound),
		Sweep,
	}

	let mut sweep_interval = interval_at(
		Instant::now() + config.sweep_interval(),
		config.sweep_interval(),
	);
	sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

	let mut state = LoopState {
		engine: ReconciliationEngine::new(),
		scheduler: RetryScheduler::new(Arc::clone(&config)),
		reads: HashMap::new(),
		next_read_id: 0,
		channels,
		registry,
		config,
	};

	// Kept aside so shutdown can close the mailbox and fail whatever is still queued in it
	let mailbox = msgs_rx.clone();

	let mut msg_stream = pin!((
		msgs_rx
			.map(StreamMessage::Commands)
			.chain(stream::once(future::ready(StreamMessage::HandlesDropped))),
		inbound_rx.map(StreamMessage::Inbound),
		IntervalStream::new(sweep_interval).map(|_| StreamMessage::Sweep),
	)
		.merge());

	trace!("Shard connection loop starting...");

	while let Some(msg) = msg_stream.next().await {
		match msg {
			StreamMessage::Commands(ConnectionMessage::Add { key, value, token }) => {
				state.add(key, value, token).await;
			}

			StreamMessage::Commands(ConnectionMessage::Get { key, done_tx }) => {
				state.get(key, done_tx).await;
			}

			StreamMessage::Commands(ConnectionMessage::PendingCountRequest(tx)) => {
				if tx.send(state.scheduler.len()).is_err() {
					warn!("Pending count requester dropped before receiving the answer");
				}
			}

			StreamMessage::Commands(ConnectionMessage::ShutdownRequest(tx)) => {
				mailbox.close();
				state.reject_queued(&mailbox);
				state.teardown().await;

				if tx.send(()).is_err() {
					warn!("Shutdown requester dropped before receiving the ack");
				}

				return;
			}

			StreamMessage::HandlesDropped => {
				debug!("Every handle to the shard connection was dropped");
				break;
			}

			StreamMessage::Inbound(inbound) => state.dispatch(inbound),

			StreamMessage::Sweep => state.sweep().await,
		}
	}

	state.teardown().await;
}

/// Feeds a write reply to the engine, the pending write only moves to
/// [`AssignedOnly`](super::super::retry::WriteState::AssignedOnly) once the engine accepted the
/// assignment.
fn assign(
	engine: &mut ReconciliationEngine,
	scheduler: &mut RetryScheduler,
	seq: SequenceNumber,
	token: CompletionToken,
) -> Result<Reconciled, AssignmentError> {
	let reconciled = engine.on_assigned(seq, token)?;

	if matches!(reconciled, Reconciled::Pending) {
		scheduler.mark_assigned(token, seq);
	}

	Ok(reconciled)
}

struct LoopState {
	engine: ReconciliationEngine,
	scheduler: RetryScheduler,
	reads: HashMap<ReadId, ReadDone>,
	next_read_id: ReadId,
	channels: Channels,
	registry: Arc<CallbackRegistry>,
	config: Arc<ClientConfig>,
}

impl LoopState {
	async fn add(&mut self, key: Vec<u8>, value: Vec<u8>, token: CompletionToken) {
		let command = self.scheduler.track(token, key, value);
		self.send_write(token, 0, command).await;
	}

	async fn send_write(&self, token: CompletionToken, attempt: u32, command: Command) {
		// A failed send is left to the sweep, it will be resent or timed out like a lost reply
		if let Err(e) = self
			.channels
			.write
			.send(command, DispatchContext::Write { token, attempt })
			.await
		{
			warn!(%token, attempt, %e, "Failed to send write;");
		}
	}

	async fn get(&mut self, key: Vec<u8>, done_tx: ReadDone) {
		let id = self.next_read_id;
		self.next_read_id += 1;

		match self
			.channels
			.read
			.send(Command::Get { key }, DispatchContext::Read(id))
			.await
		{
			Ok(()) => {
				self.reads.insert(id, done_tx);
			}
			Err(e) => {
				if done_tx.send(Err(ReadError::Rejected(e.to_string()))).is_err() {
					trace!("Read requester dropped before receiving the send error");
				}
			}
		}
	}

	fn dispatch(&mut self, Inbound { context, reply }: Inbound) {
		match context {
			DispatchContext::AckStream => match parse_ack_frame(reply, &self.config.ack_channel) {
				Ok(AckFrame::Confirmation) => trace!("Ack channel subscription confirmed"),

				Ok(AckFrame::Committed(seq)) => match self.engine.on_acked(seq) {
					Reconciled::Completed { seq, token } => self.complete(token, Ok(seq)),
					Reconciled::Pending => trace!(%seq, "Ack parked until its write reply arrives;"),
					Reconciled::Duplicate => trace!(%seq, "Ignored duplicated ack;"),
				},

				Err(e) => warn!(%e, "Dropping malformed ack frame;"),
			},

			DispatchContext::Write { token, attempt } => {
				if !self.scheduler.is_current(token, attempt) {
					debug!(%token, attempt, "Dropping reply to a superseded or finished write;");
					return;
				}

				match parse_write_reply(reply) {
					Ok(WriteReply::Assigned(seq)) => {
						match assign(&mut self.engine, &mut self.scheduler, seq, token) {
							Ok(Reconciled::Completed { seq, token }) => self.complete(token, Ok(seq)),
							Ok(Reconciled::Pending | Reconciled::Duplicate) => {
								trace!(%seq, %token, "Write assigned, waiting for its ack;");
							}
							Err(e) => error!(%e, "Inconsistent sequence number assignment;"),
						}
					}

					Ok(WriteReply::Rejected(message)) => {
						self.engine.forget(token);
						self.complete(token, Err(WriteError::Rejected(message)));
					}

					Err(e) => warn!(%token, %e, "Dropping malformed write reply;"),
				}
			}

			DispatchContext::Read(id) => {
				let Some(done_tx) = self.reads.remove(&id) else {
					warn!(id, "Received reply for an unknown read;");
					return;
				};

				let res = match parse_read_reply(reply) {
					Ok(res) => res.map_err(ReadError::Rejected),
					Err(e) => {
						warn!(id, %e, "Malformed read reply;");
						Err(ReadError::Rejected(e.to_string()))
					}
				};

				if done_tx.send(res).is_err() {
					trace!(id, "Read requester dropped before receiving the value");
				}
			}
		}
	}

	async fn sweep(&mut self) {
		for action in self.scheduler.sweep(Instant::now()) {
			match action {
				SweepAction::Resend {
					token,
					attempt,
					command,
				} => {
					// Only the newest send may complete the write
					self.engine.forget(token);
					self.send_write(token, attempt, command).await;
				}

				SweepAction::TimedOut { token, attempts } => {
					warn!(%token, attempts, "Write timed out for good;");
					self.engine.forget(token);
					self.resolve(token, Err(WriteError::TimedOut { attempts }));
				}
			}
		}

		let pruned = self.engine.prune(self.config.ack_retention());
		if pruned > 0 {
			trace!(pruned, "Pruned stale acks;");
		}
	}

	fn complete(&mut self, token: CompletionToken, outcome: WriteOutcome) {
		if self.scheduler.complete(token).is_none() {
			warn!(%token, "Completed a write that wasn't pending;");
		}

		self.resolve(token, outcome);
	}

	fn resolve(&self, token: CompletionToken, outcome: WriteOutcome) {
		match self.registry.resolve(token) {
			Ok(callback) => {
				if catch_unwind(AssertUnwindSafe(|| callback(outcome))).is_err() {
					error!(%token, "Completion callback panicked");
				}
			}
			Err(e) => error!(%e, "Tried to complete a write twice;"),
		}
	}

	/// Answers every message left in a closed mailbox without acting on it.
	fn reject_queued(&self, mailbox: &chan::Receiver<ConnectionMessage>) {
		let mut rejected_writes = 0;

		while let Ok(msg) = mailbox.try_recv() {
			match msg {
				ConnectionMessage::Add { token, .. } => {
					rejected_writes += 1;
					self.resolve(token, Err(WriteError::ConnectionClosed));
				}

				ConnectionMessage::Get { done_tx, .. } => {
					if done_tx.send(Err(ReadError::ConnectionClosed)).is_err() {
						trace!("Read requester dropped before receiving the close notice");
					}
				}

				ConnectionMessage::PendingCountRequest(tx) => {
					if tx.send(0).is_err() {
						trace!("Pending count requester dropped before receiving the answer");
					}
				}

				ConnectionMessage::ShutdownRequest(tx) => {
					if tx.send(()).is_err() {
						trace!("Shutdown requester dropped before receiving the ack");
					}
				}
			}
		}

		if rejected_writes > 0 {
			debug!(rejected_writes, "Failed writes queued behind the shutdown request;");
		}
	}

	async fn teardown(&mut self) {
		let tokens = self
			.scheduler
			.drain()
			.map(|write| write.token)
			.collect::<Vec<_>>();

		self.engine.clear();

		for &token in &tokens {
			self.resolve(token, Err(WriteError::ConnectionClosed));
		}

		let reads = self.reads.len();
		for (_, done_tx) in self.reads.drain() {
			if done_tx.send(Err(ReadError::ConnectionClosed)).is_err() {
				trace!("Read requester dropped before receiving the close notice");
			}
		}

		self.channels.close().await;

		info!(
			failed_writes = tokens.len(),
			failed_reads = reads,
			"Shard connection closed;"
		);
	}
}
