#![allow(dead_code)]

use gcs_client::{
	CallbackRegistry, Channel, ChannelRole, ClientConfig, Command, Connector, DispatchContext,
	Inbound, Reply, ShardAddr, ShardAddrs, ShardConnection, TransportError, WriteOutcome,
};

use std::{
	collections::{HashMap, HashSet, VecDeque},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use async_channel as chan;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;

#[derive(Default)]
struct StoreState {
	next_seq: u64,
	data: HashMap<Vec<u8>, Vec<u8>>,
	puts: Vec<(Vec<u8>, Vec<u8>)>,
	subscribers: Vec<(String, DispatchContext, chan::Sender<Inbound>)>,
	refused: HashSet<ChannelRole>,
	open_channels: usize,

	silent: bool,
	ack_first: bool,
	alternate_order: bool,
	reject_with: Option<String>,
	drop_replies: u32,
	drop_acks: u32,
	hold_replies: bool,
	held_replies: VecDeque<(chan::Sender<Inbound>, Inbound)>,
	hold_acks: bool,
	held_acks: VecDeque<u64>,
}

impl StoreState {
	fn publish(&mut self, seq: u64) {
		if self.drop_acks > 0 {
			self.drop_acks -= 1;
			return;
		}

		if self.hold_acks {
			self.held_acks.push_back(seq);
			return;
		}

		self.broadcast(|channel| Reply::message(channel, seq.to_string()));
	}

	fn broadcast(&self, reply: impl Fn(&str) -> Reply) {
		for (channel, context, tx) in &self.subscribers {
			tx.try_send(Inbound {
				context: *context,
				reply: reply(channel),
			})
			.ok();
		}
	}

	fn reply(&mut self, tx: &chan::Sender<Inbound>, inbound: Inbound) {
		if self.drop_replies > 0 {
			self.drop_replies -= 1;
			return;
		}

		if self.hold_replies {
			self.held_replies.push_back((tx.clone(), inbound));
			return;
		}

		tx.try_send(inbound).ok();
	}
}

/// In memory stand-in for one shard of the store: assigns sequence numbers to puts, replies on the
/// write channel and publishes an ack per put to every subscriber.
#[derive(Clone, Default)]
pub struct MockStore {
	state: Arc<Mutex<StoreState>>,
}

impl MockStore {
	pub fn new() -> Self {
		let store = Self::default();
		store.state.lock().next_seq = 1;
		store
	}

	pub fn set_next_seq(&self, seq: u64) {
		self.state.lock().next_seq = seq;
	}

	pub fn refuse(&self, role: ChannelRole) {
		self.state.lock().refused.insert(role);
	}

	/// Swallow puts without assigning them anything.
	pub fn set_silent(&self, silent: bool) {
		self.state.lock().silent = silent;
	}

	/// Publish the ack of a put before replying to it.
	pub fn set_ack_first(&self, ack_first: bool) {
		self.state.lock().ack_first = ack_first;
	}

	/// Flip the order of reply and ack after every put.
	pub fn set_alternate_order(&self, alternate: bool) {
		self.state.lock().alternate_order = alternate;
	}

	pub fn reject_with(&self, message: &str) {
		self.state.lock().reject_with = Some(message.to_string());
	}

	pub fn drop_next_replies(&self, count: u32) {
		self.state.lock().drop_replies = count;
	}

	pub fn drop_next_acks(&self, count: u32) {
		self.state.lock().drop_acks = count;
	}

	pub fn hold_replies(&self) {
		self.state.lock().hold_replies = true;
	}

	pub fn release_replies(&self) {
		let mut state = self.state.lock();
		state.hold_replies = false;

		for (tx, inbound) in state.held_replies.drain(..) {
			tx.try_send(inbound).ok();
		}
	}

	pub fn hold_acks(&self) {
		self.state.lock().hold_acks = true;
	}

	pub fn release_acks(&self) {
		let mut state = self.state.lock();
		state.hold_acks = false;

		let held = state.held_acks.drain(..).collect::<Vec<_>>();
		for seq in held {
			state.publish(seq);
		}
	}

	/// Pushes an arbitrary frame to every subscriber of the ack channel.
	pub fn publish_raw(&self, reply: Reply) {
		self.state.lock().broadcast(|_| reply.clone());
	}

	pub fn publish_ack(&self, seq: u64) {
		self.state
			.lock()
			.broadcast(|channel| Reply::message(channel, seq.to_string()));
	}

	pub fn puts(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
		self.state.lock().puts.clone()
	}

	pub fn open_channels(&self) -> usize {
		self.state.lock().open_channels
	}

	pub fn subscribers(&self) -> usize {
		self.state.lock().subscribers.len()
	}
}

#[async_trait]
impl Connector for MockStore {
	async fn open(
		&self,
		role: ChannelRole,
		addr: &ShardAddr,
	) -> Result<Box<dyn Channel>, TransportError> {
		let mut state = self.state.lock();

		if state.refused.contains(&role) {
			return Err(TransportError::Refused(addr.to_string()));
		}

		state.open_channels += 1;

		Ok(Box::new(MockChannel {
			state: Arc::clone(&self.state),
			inbound: None,
			closed: AtomicBool::new(false),
		}))
	}
}

struct MockChannel {
	state: Arc<Mutex<StoreState>>,
	inbound: Option<chan::Sender<Inbound>>,
	closed: AtomicBool,
}

#[async_trait]
impl Channel for MockChannel {
	fn register(&mut self, inbound: chan::Sender<Inbound>) -> Result<(), TransportError> {
		self.inbound = Some(inbound);
		Ok(())
	}

	async fn send(&self, command: Command, context: DispatchContext) -> Result<(), TransportError> {
		if self.closed.load(Ordering::Acquire) {
			return Err(TransportError::Disconnected);
		}

		let tx = self.inbound.as_ref().ok_or(TransportError::Disconnected)?;
		let mut state = self.state.lock();

		match command {
			Command::Put { key, value } => {
				state.puts.push((key.clone(), value.clone()));

				if state.silent {
					return Ok(());
				}

				if let Some(message) = state.reject_with.clone() {
					state.reply(
						tx,
						Inbound {
							context,
							reply: Reply::Error(message),
						},
					);
					return Ok(());
				}

				let seq = state.next_seq;
				state.next_seq += 1;
				state.data.insert(key, value);

				#[allow(clippy::cast_possible_wrap)]
				let reply = Inbound {
					context,
					reply: Reply::Integer(seq as i64),
				};

				if state.ack_first {
					state.publish(seq);
					state.reply(tx, reply);
				} else {
					state.reply(tx, reply);
					state.publish(seq);
				}

				if state.alternate_order {
					state.ack_first = !state.ack_first;
				}
			}

			Command::Subscribe { channel } => {
				tx.try_send(Inbound {
					context,
					reply: Reply::subscribed(&channel, 1),
				})
				.ok();
				state.subscribers.push((channel, context, tx.clone()));
			}

			Command::Get { key } => {
				let reply = state
					.data
					.get(&key)
					.cloned()
					.map_or(Reply::Nil, Reply::Data);

				tx.try_send(Inbound { context, reply }).ok();
			}
		}

		Ok(())
	}

	async fn close(&self) {
		if !self.closed.swap(true, Ordering::AcqRel) {
			let mut state = self.state.lock();
			state.open_channels -= 1;

			if let Some(tx) = &self.inbound {
				state.subscribers.retain(|(_, _, sub)| !sub.same_channel(tx));
			}
		}
	}
}

pub fn addrs() -> ShardAddrs {
	ShardAddrs {
		write: ShardAddr::new("shard-0", 6379),
		ack: ShardAddr::new("shard-0", 6380),
		read: ShardAddr::new("shard-0-replica", 6379),
	}
}

pub fn fast_config() -> ClientConfig {
	ClientConfig {
		write_timeout_ms: 100,
		max_write_timeout_ms: 1_000,
		max_retries: 2,
		backoff_multiplier: 1.0,
		sweep_interval_ms: 10,
		ack_retention_ms: 5_000,
		..Default::default()
	}
}

pub async fn attached(store: &MockStore, config: ClientConfig) -> Arc<ShardConnection> {
	let conn = ShardConnection::connect(store, &addrs(), config, Arc::new(CallbackRegistry::new()))
		.await
		.unwrap();

	conn.attach_to_loop(&Handle::current()).await.unwrap();

	Arc::new(conn)
}

/// Callback that forwards its outcome to the returned receiver, plus how many times it was called.
pub fn outcome_channel() -> (
	impl FnOnce(WriteOutcome) + Send + 'static,
	chan::Receiver<WriteOutcome>,
) {
	let (tx, rx) = chan::unbounded();

	(
		move |outcome| {
			tx.try_send(outcome).unwrap();
		},
		rx,
	)
}
