use std::{fmt, sync::Arc};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::trace;

use super::{
	engine::SequenceNumber,
	error::{Error, WriteError},
};

/// What a completion callback receives: the committed sequence number, or why the write failed.
pub type WriteOutcome = Result<SequenceNumber, WriteError>;

pub type Callback = Box<dyn FnOnce(WriteOutcome) + Send + 'static>;

static GLOBAL: Lazy<Arc<CallbackRegistry>> = Lazy::new(|| Arc::new(CallbackRegistry::new()));

/// Handle to a registered completion callback.
///
/// The generation is bumped every time a slot is freed, so a token that was already resolved
/// will never match the callback that later reuses its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompletionToken {
	index: u32,
	generation: u32,
}

impl fmt::Display for CompletionToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}v{}", self.index, self.generation)
	}
}

struct Slot {
	generation: u32,
	callback: Option<Callback>,
}

#[derive(Default)]
struct Slots {
	entries: Vec<Slot>,
	free: Vec<u32>,
	live: usize,
}

impl Slots {
	fn take(&mut self, token: CompletionToken) -> Option<Callback> {
		let slot = self.entries.get_mut(token.index as usize)?;

		if slot.generation != token.generation {
			return None;
		}

		let callback = slot.callback.take()?;
		slot.generation = slot.generation.wrapping_add(1);
		self.free.push(token.index);
		self.live -= 1;

		Some(callback)
	}
}

/// Arena of completion callbacks, shared by every connection that writes on behalf of a caller.
#[derive(Default)]
pub struct CallbackRegistry {
	slots: Mutex<Slots>,
}

impl fmt::Debug for CallbackRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CallbackRegistry")
			.field("live", &self.len())
			.finish()
	}
}

impl CallbackRegistry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// The process-wide registry.
	#[must_use]
	pub fn global() -> Arc<Self> {
		Arc::clone(&GLOBAL)
	}

	pub fn allocate(&self, callback: impl FnOnce(WriteOutcome) + Send + 'static) -> CompletionToken {
		let mut slots = self.slots.lock();
		slots.live += 1;

		let token = if let Some(index) = slots.free.pop() {
			let slot = &mut slots.entries[index as usize];
			slot.callback = Some(Box::new(callback));

			CompletionToken {
				index,
				generation: slot.generation,
			}
		} else {
			#[allow(clippy::cast_possible_truncation)]
			// More than u32::MAX writes in flight at once isn't a thing
			let index = slots.entries.len() as u32;

			slots.entries.push(Slot {
				generation: 0,
				callback: Some(Box::new(callback)),
			});

			CompletionToken {
				index,
				generation: 0,
			}
		};

		trace!(%token, "Allocated completion token;");

		token
	}

	/// Removes and returns the callback for `token`, it can only be done once per token.
	pub fn resolve(&self, token: CompletionToken) -> Result<Callback, Error> {
		self.slots.lock().take(token).ok_or(Error::UnknownToken(token))
	}

	/// Drops the callback without invoking it, for writes that were refused before being sent.
	pub fn release(&self, token: CompletionToken) -> Result<(), Error> {
		self.resolve(token).map(drop)
	}

	#[must_use]
	pub fn is_live(&self, token: CompletionToken) -> bool {
		let slots = self.slots.lock();

		slots
			.entries
			.get(token.index as usize)
			.is_some_and(|slot| slot.generation == token.generation && slot.callback.is_some())
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.slots.lock().live
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
