use std::{fmt, str};

use super::{engine::SequenceNumber, error::MalformedReply};

const MESSAGE_KIND: &[u8] = b"message";

/// Frame received from the store on any of the shard channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
	Integer(i64),
	Data(Vec<u8>),
	Status(String),
	Error(String),
	Nil,
	Array(Vec<Reply>),
}

impl fmt::Display for Reply {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Integer(n) => write!(f, "integer({n})"),
			Self::Data(bytes) => write!(f, "data({} bytes)", bytes.len()),
			Self::Status(status) => write!(f, "status({status})"),
			Self::Error(e) => write!(f, "error({e})"),
			Self::Nil => write!(f, "nil"),
			Self::Array(items) => write!(f, "array({} items)", items.len()),
		}
	}
}

impl Reply {
	/// Pubsub message as the store publishes it on `channel`.
	#[must_use]
	pub fn message(channel: &str, payload: impl Into<Vec<u8>>) -> Self {
		Self::Array(vec![
			Self::Data(MESSAGE_KIND.to_vec()),
			Self::Data(channel.as_bytes().to_vec()),
			Self::Data(payload.into()),
		])
	}

	/// Confirmation the store sends back once a subscription is active.
	#[must_use]
	pub fn subscribed(channel: &str, count: i64) -> Self {
		Self::Array(vec![
			Self::Data(b"subscribe".to_vec()),
			Self::Data(channel.as_bytes().to_vec()),
			Self::Integer(count),
		])
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteReply {
	Assigned(SequenceNumber),
	Rejected(String),
}

pub fn parse_write_reply(reply: Reply) -> Result<WriteReply, MalformedReply> {
	match reply {
		Reply::Integer(n) => u64::try_from(n)
			.map(|seq| WriteReply::Assigned(SequenceNumber(seq)))
			.map_err(|_| MalformedReply::NegativeSequenceNumber(n)),
		Reply::Error(e) => Ok(WriteReply::Rejected(e)),
		other => Err(MalformedReply::NotASequenceNumber(other.to_string())),
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckFrame {
	/// Subscription bookkeeping from the store, carries no sequence number.
	Confirmation,
	Committed(SequenceNumber),
}

pub fn parse_ack_frame(reply: Reply, channel: &str) -> Result<AckFrame, MalformedReply> {
	let items = match reply {
		Reply::Array(items) => items,
		other => return Err(MalformedReply::UnexpectedFrame(other.to_string())),
	};

	let [kind, from_channel, payload]: [Reply; 3] = items
		.try_into()
		.map_err(|items: Vec<_>| MalformedReply::BadArity(items.len()))?;

	let kind = match kind {
		Reply::Data(kind) => kind,
		other => return Err(MalformedReply::UnexpectedFrame(other.to_string())),
	};

	// Only data messages carry a payload, everything else is (un)subscribe chatter
	let Reply::Data(payload) = payload else {
		return Ok(AckFrame::Confirmation);
	};

	if kind != MESSAGE_KIND {
		return Err(MalformedReply::UnknownKind(
			String::from_utf8_lossy(&kind).into_owned(),
		));
	}

	match from_channel {
		Reply::Data(name) if name == channel.as_bytes() => {}
		other => {
			return Err(MalformedReply::ForeignChannel(match other {
				Reply::Data(name) => String::from_utf8_lossy(&name).into_owned(),
				other => other.to_string(),
			}))
		}
	}

	str::from_utf8(&payload)
		.ok()
		.and_then(|text| text.trim().parse::<u64>().ok())
		.map(|seq| AckFrame::Committed(SequenceNumber(seq)))
		.ok_or_else(|| MalformedReply::BadPayload(String::from_utf8_lossy(&payload).into_owned()))
}

/// Value for a key on the read channel, `Err` carries a store side error message.
pub fn parse_read_reply(reply: Reply) -> Result<Result<Option<Vec<u8>>, String>, MalformedReply> {
	match reply {
		Reply::Data(value) => Ok(Ok(Some(value))),
		Reply::Nil => Ok(Ok(None)),
		Reply::Error(e) => Ok(Err(e)),
		other => Err(MalformedReply::UnexpectedFrame(other.to_string())),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const CHANNEL: &str = "gcs:acks";

	#[test]
	fn write_reply_integer_is_assigned_seq() {
		assert_eq!(
			parse_write_reply(Reply::Integer(42)),
			Ok(WriteReply::Assigned(SequenceNumber(42)))
		);
		assert_eq!(
			parse_write_reply(Reply::Error("ERR out of memory".into())),
			Ok(WriteReply::Rejected("ERR out of memory".into()))
		);
		assert_eq!(
			parse_write_reply(Reply::Integer(-1)),
			Err(MalformedReply::NegativeSequenceNumber(-1))
		);
		assert!(matches!(
			parse_write_reply(Reply::Status("OK".into())),
			Err(MalformedReply::NotASequenceNumber(_))
		));
	}

	#[test]
	fn ack_message_carries_seq() {
		assert_eq!(
			parse_ack_frame(Reply::message(CHANNEL, "43"), CHANNEL),
			Ok(AckFrame::Committed(SequenceNumber(43)))
		);
	}

	#[test]
	fn subscribe_confirmation_is_ignored() {
		assert_eq!(
			parse_ack_frame(Reply::subscribed(CHANNEL, 1), CHANNEL),
			Ok(AckFrame::Confirmation)
		);
		assert_eq!(
			parse_ack_frame(
				Reply::Array(vec![
					Reply::Data(b"message".to_vec()),
					Reply::Data(CHANNEL.as_bytes().to_vec()),
					Reply::Nil,
				]),
				CHANNEL
			),
			Ok(AckFrame::Confirmation)
		);
	}

	#[test]
	fn malformed_ack_frames_are_rejected() {
		assert_eq!(
			parse_ack_frame(Reply::Integer(3), CHANNEL),
			Err(MalformedReply::UnexpectedFrame("integer(3)".into()))
		);
		assert_eq!(
			parse_ack_frame(Reply::Array(vec![Reply::Nil]), CHANNEL),
			Err(MalformedReply::BadArity(1))
		);
		assert_eq!(
			parse_ack_frame(Reply::message("other", "1"), CHANNEL),
			Err(MalformedReply::ForeignChannel("other".into()))
		);
		assert_eq!(
			parse_ack_frame(Reply::message(CHANNEL, "not-a-number"), CHANNEL),
			Err(MalformedReply::BadPayload("not-a-number".into()))
		);
		assert!(matches!(
			parse_ack_frame(
				Reply::Array(vec![
					Reply::Data(b"pmessage".to_vec()),
					Reply::Data(CHANNEL.as_bytes().to_vec()),
					Reply::Data(b"1".to_vec()),
				]),
				CHANNEL
			),
			Err(MalformedReply::UnknownKind(_))
		));
	}

	#[test]
	fn read_reply_shapes() {
		assert_eq!(
			parse_read_reply(Reply::Data(b"v".to_vec())),
			Ok(Ok(Some(b"v".to_vec())))
		);
		assert_eq!(parse_read_reply(Reply::Nil), Ok(Ok(None)));
		assert_eq!(
			parse_read_reply(Reply::Error("ERR".into())),
			Ok(Err("ERR".into()))
		);
		assert!(parse_read_reply(Reply::Integer(1)).is_err());
	}
}
