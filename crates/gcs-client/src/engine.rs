//! Matching of the two acknowledgment streams of a shard.
//!
//! A write is only done once both of these have been observed for its sequence number:
//! - the write reply, which tells us which sequence number the store assigned to *our* token;
//! - the broadcast ack, which tells *every* subscriber that a sequence number was committed.
//!
//! The two streams are delivered on different channels and no ordering is assumed between them,
//! so whichever event arrives first is parked until its complement shows up.

use std::{
	collections::{hash_map::Entry, HashMap},
	fmt,
	time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;

use super::registry::CompletionToken;

/// Store assigned position of a write, the only correlation key between both streams.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(pub u64);

impl fmt::Display for SequenceNumber {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
	/// The write identified by `token` was assigned `seq`.
	Assigned {
		seq: SequenceNumber,
		token: CompletionToken,
	},
	/// `seq` was committed, reported to every subscriber of the shard.
	Acked(SequenceNumber),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Reconciled {
	/// Both events were seen, `token` must now be resolved.
	Completed {
		seq: SequenceNumber,
		token: CompletionToken,
	},
	/// Parked until the complementary event arrives.
	Pending,
	/// Repeated ack for a sequence number we already know about, nothing to do.
	Duplicate,
}

/// Assignment events that can't happen under a well behaved store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssignmentError {
	#[error("token {token} already waits on sequence number {previous}, got {seq}")]
	DuplicateAssignment {
		token: CompletionToken,
		seq: SequenceNumber,
		previous: SequenceNumber,
	},
	#[error("sequence number {seq} was already assigned, now claimed by token {token}")]
	SequenceReassigned {
		seq: SequenceNumber,
		token: CompletionToken,
	},
}

#[derive(Debug, Default)]
pub struct ReconciliationEngine {
	assigned: HashMap<SequenceNumber, CompletionToken>,
	assigned_by_token: HashMap<CompletionToken, SequenceNumber>,
	acked: HashMap<SequenceNumber, Instant>,
	recently_completed: HashMap<SequenceNumber, Instant>,
}

impl ReconciliationEngine {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn apply(&mut self, event: Event) -> Result<Reconciled, AssignmentError> {
		match event {
			Event::Assigned { seq, token } => self.on_assigned(seq, token),
			Event::Acked(seq) => Ok(self.on_acked(seq)),
		}
	}

	pub fn on_assigned(
		&mut self,
		seq: SequenceNumber,
		token: CompletionToken,
	) -> Result<Reconciled, AssignmentError> {
		if let Some(&previous) = self.assigned_by_token.get(&token) {
			return Err(AssignmentError::DuplicateAssignment {
				token,
				seq,
				previous,
			});
		}

		if self.assigned.contains_key(&seq) || self.recently_completed.contains_key(&seq) {
			return Err(AssignmentError::SequenceReassigned { seq, token });
		}

		if self.acked.remove(&seq).is_some() {
			trace!(%seq, %token, "Assigned sequence number was already acked;");
			self.recently_completed.insert(seq, Instant::now());

			return Ok(Reconciled::Completed { seq, token });
		}

		self.assigned.insert(seq, token);
		self.assigned_by_token.insert(token, seq);

		Ok(Reconciled::Pending)
	}

	pub fn on_acked(&mut self, seq: SequenceNumber) -> Reconciled {
		if self.recently_completed.contains_key(&seq) {
			return Reconciled::Duplicate;
		}

		if let Some(token) = self.assigned.remove(&seq) {
			self.assigned_by_token.remove(&token);
			self.recently_completed.insert(seq, Instant::now());

			return Reconciled::Completed { seq, token };
		}

		match self.acked.entry(seq) {
			Entry::Occupied(_) => Reconciled::Duplicate,
			Entry::Vacant(entry) => {
				entry.insert(Instant::now());
				Reconciled::Pending
			}
		}
	}

	/// Stops waiting on the sequence number assigned to `token`, if any.
	///
	/// Called before a write is sent again, only its newest sequence number may complete it.
	pub fn forget(&mut self, token: CompletionToken) -> Option<SequenceNumber> {
		let seq = self.assigned_by_token.remove(&token)?;
		self.assigned.remove(&seq);

		Some(seq)
	}

	/// Evicts acks nobody claimed and completed sequence numbers older than `retention`.
	///
	/// Acks are broadcast to every client of the shard, most of them belong to other clients'
	/// writes and will never be matched here.
	pub fn prune(&mut self, retention: Duration) -> usize {
		let now = Instant::now();
		let before = self.acked.len() + self.recently_completed.len();

		self.acked
			.retain(|_, seen_at| now.duration_since(*seen_at) < retention);
		self.recently_completed
			.retain(|_, seen_at| now.duration_since(*seen_at) < retention);

		before - (self.acked.len() + self.recently_completed.len())
	}

	/// Drops every waiting entry, returning the tokens that were still waiting for an ack.
	pub fn clear(&mut self) -> Vec<CompletionToken> {
		self.acked.clear();
		self.recently_completed.clear();
		self.assigned.clear();

		self.assigned_by_token.drain().map(|(token, _)| token).collect()
	}

	#[must_use]
	pub fn assigned_len(&self) -> usize {
		self.assigned.len()
	}

	#[must_use]
	pub fn acked_len(&self) -> usize {
		self.acked.len()
	}

	#[must_use]
	pub fn is_waiting_on(&self, seq: SequenceNumber) -> bool {
		self.assigned.contains_key(&seq) || self.acked.contains_key(&seq)
	}
}
