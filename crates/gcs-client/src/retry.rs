use std::{collections::HashMap, sync::Arc};

use tokio::time::Instant;
use tracing::debug;

use super::{
	config::ClientConfig, engine::SequenceNumber, registry::CompletionToken, transport::Command,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
	/// Sent, neither the reply nor the ack were attributed to it yet.
	Submitted,
	/// The store assigned a sequence number, waiting for it to be acked.
	AssignedOnly(SequenceNumber),
}

#[derive(Debug, Clone)]
pub struct PendingWrite {
	pub token: CompletionToken,
	pub key: Vec<u8>,
	pub value: Vec<u8>,
	pub submitted_at: Instant,
	/// Zero based count of sends, only replies to this attempt are accepted.
	pub attempt: u32,
	pub state: WriteState,
	pub deadline: Instant,
}

impl PendingWrite {
	fn command(&self) -> Command {
		Command::Put {
			key: self.key.clone(),
			value: self.value.clone(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepAction {
	Resend {
		token: CompletionToken,
		attempt: u32,
		command: Command,
	},
	TimedOut {
		token: CompletionToken,
		attempts: u32,
	},
}

/// Owner of every write that wasn't completed yet, swept on a fixed interval by the connection loop
/// instead of keeping one timer per write.
#[derive(Debug)]
pub struct RetryScheduler {
	config: Arc<ClientConfig>,
	pending: HashMap<CompletionToken, PendingWrite>,
}

impl RetryScheduler {
	#[must_use]
	pub fn new(config: Arc<ClientConfig>) -> Self {
		Self {
			config,
			pending: HashMap::new(),
		}
	}

	/// Starts tracking a freshly submitted write and returns the command to send for it.
	pub fn track(&mut self, token: CompletionToken, key: Vec<u8>, value: Vec<u8>) -> Command {
		let now = Instant::now();

		let write = PendingWrite {
			token,
			key,
			value,
			submitted_at: now,
			attempt: 0,
			state: WriteState::Submitted,
			deadline: now + self.config.attempt_timeout(0),
		};

		let command = write.command();
		self.pending.insert(token, write);

		command
	}

	#[must_use]
	pub fn get(&self, token: CompletionToken) -> Option<&PendingWrite> {
		self.pending.get(&token)
	}

	/// Whether a reply for `attempt` of `token` still matters, replies to superseded sends don't.
	#[must_use]
	pub fn is_current(&self, token: CompletionToken, attempt: u32) -> bool {
		self.pending
			.get(&token)
			.is_some_and(|write| write.attempt == attempt)
	}

	pub fn mark_assigned(&mut self, token: CompletionToken, seq: SequenceNumber) {
		if let Some(write) = self.pending.get_mut(&token) {
			write.state = WriteState::AssignedOnly(seq);
		}
	}

	pub fn complete(&mut self, token: CompletionToken) -> Option<PendingWrite> {
		self.pending.remove(&token)
	}

	/// Resends every write whose deadline passed and still has retries left, gives up on the rest.
	pub fn sweep(&mut self, now: Instant) -> Vec<SweepAction> {
		let mut actions = Vec::new();

		for write in self.pending.values_mut() {
			if now < write.deadline {
				continue;
			}

			if write.attempt < self.config.max_retries {
				write.attempt += 1;
				write.state = WriteState::Submitted;
				write.deadline = now + self.config.attempt_timeout(write.attempt);

				debug!(
					token = %write.token,
					attempt = write.attempt,
					elapsed = ?now.duration_since(write.submitted_at),
					"Write timed out, resending;",
				);

				actions.push(SweepAction::Resend {
					token: write.token,
					attempt: write.attempt,
					command: write.command(),
				});
			} else {
				actions.push(SweepAction::TimedOut {
					token: write.token,
					attempts: write.attempt + 1,
				});
			}
		}

		for action in &actions {
			if let SweepAction::TimedOut { token, .. } = action {
				self.pending.remove(token);
			}
		}

		actions
	}

	pub fn drain(&mut self) -> impl Iterator<Item = PendingWrite> + '_ {
		self.pending.drain().map(|(_, write)| write)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.pending.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.pending.is_empty()
	}
}
