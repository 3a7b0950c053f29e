use std::{fmt, marker::PhantomData, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use super::{
	connection::ShardConnection,
	error::Error,
	registry::{CompletionToken, WriteOutcome},
};

pub type JobId = Uuid;
pub type RecordId = Uuid;

/// Typed view over one shard connection, records of type `T` are stored as MessagePack under
/// `{table}:{job_id}:{record_id}`.
pub struct Table<T> {
	name: String,
	conn: Arc<ShardConnection>,
	_marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Table<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Table")
			.field("name", &self.name)
			.field("conn", &self.conn)
			.finish()
	}
}

impl<T> Clone for Table<T> {
	fn clone(&self) -> Self {
		Self {
			name: self.name.clone(),
			conn: Arc::clone(&self.conn),
			_marker: PhantomData,
		}
	}
}

impl<T: Serialize + DeserializeOwned> Table<T> {
	pub fn new(name: impl Into<String>, conn: Arc<ShardConnection>) -> Self {
		Self {
			name: name.into(),
			conn,
			_marker: PhantomData,
		}
	}

	#[must_use]
	pub fn key(&self, job_id: JobId, id: RecordId) -> String {
		format!("{}:{job_id}:{id}", self.name)
	}

	/// Adds an entry asynchronously, returns right away and fires `done` once the write is final.
	pub fn add(
		&self,
		job_id: JobId,
		id: RecordId,
		data: &T,
		done: impl FnOnce(WriteOutcome) + Send + 'static,
	) -> Result<CompletionToken, Error> {
		let value = rmp_serde::to_vec_named(data)?;

		self.conn.add_with_callback(self.key(job_id, id), value, done)
	}

	pub async fn lookup(&self, job_id: JobId, id: RecordId) -> Result<Option<T>, Error> {
		self.conn
			.get(self.key(job_id, id))?
			.await?
			.map(|bytes| rmp_serde::from_slice(&bytes))
			.transpose()
			.map_err(Into::into)
	}

	#[must_use]
	pub fn connection(&self) -> &Arc<ShardConnection> {
		&self.conn
	}
}
