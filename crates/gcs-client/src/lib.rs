//!
//! # GCS Client
//!
//! Client side of the coordination store's write path. A write is final only once two independent
//! notifications were observed for it:
//! - the write reply, carrying the sequence number the store assigned to it;
//! - the broadcast ack for that sequence number, published to every client of the shard.
//!
//! They travel on different channels and may arrive in any order. A [`ShardConnection`] matches them
//! on its own loop and fires the write's completion callback exactly once, with the committed
//! sequence number or with a [`WriteError`]. Writes that never get both notifications are resent with
//! exponential backoff and eventually failed, and closing the connection fails every write still
//! pending, so no callback is ever silently dropped.
//!
//! ## Basic example
//!
//! ```no_run
//! use gcs_client::{
//!     CallbackRegistry, Channel, ChannelRole, ClientConfig, Connector, Error, ShardAddr,
//!     ShardAddrs, ShardConnection, TransportError,
//! };
//! use async_trait::async_trait;
//!
//! /// Brings up the actual sockets to the store, left out here.
//! pub struct TcpConnector;
//!
//! #[async_trait]
//! impl Connector for TcpConnector {
//!     async fn open(
//!         &self,
//!         _role: ChannelRole,
//!         addr: &ShardAddr,
//!     ) -> Result<Box<dyn Channel>, TransportError> {
//!         Err(TransportError::Refused(addr.to_string()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let addrs = ShardAddrs {
//!         write: ShardAddr::new("10.0.0.1", 6379),
//!         ack: ShardAddr::new("10.0.0.1", 6379),
//!         read: ShardAddr::new("10.0.0.2", 6379),
//!     };
//!
//!     let conn = ShardConnection::connect(
//!         &TcpConnector,
//!         &addrs,
//!         ClientConfig::default(),
//!         CallbackRegistry::global(),
//!     )
//!     .await?;
//!     conn.attach_to_loop(&tokio::runtime::Handle::current()).await?;
//!
//!     conn.add_with_callback("a", "1", |outcome| match outcome {
//!         Ok(seq) => println!("committed at {seq}"),
//!         Err(e) => eprintln!("write failed: {e}"),
//!     })?;
//!
//!     conn.close().await;
//!
//!     Ok(())
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod config;
mod connection;
mod engine;
mod error;
mod message;
mod registry;
mod reply;
mod retry;
mod table;
mod transport;

pub use config::{ClientConfig, ConfigError, DEFAULT_ACK_CHANNEL};
pub use connection::{PendingRead, ShardAddrs, ShardConnection};
pub use engine::{AssignmentError, Event, Reconciled, ReconciliationEngine, SequenceNumber};
pub use error::{ConnectionError, Error, MalformedReply, ReadError, TransportError, WriteError};
pub use message::{DispatchContext, Inbound, ReadId};
pub use registry::{Callback, CallbackRegistry, CompletionToken, WriteOutcome};
pub use reply::{
	parse_ack_frame, parse_read_reply, parse_write_reply, AckFrame, Reply, WriteReply,
};
pub use retry::{PendingWrite, RetryScheduler, SweepAction, WriteState};
pub use table::{JobId, RecordId, Table};
pub use transport::{Channel, ChannelRole, Command, Connector, ShardAddr};
