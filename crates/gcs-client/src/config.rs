use std::{io, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

pub const DEFAULT_ACK_CHANNEL: &str = "gcs:acks";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file <path='{}'>: {source}", .path.display())]
	Io {
		path: Box<Path>,
		#[source]
		source: io::Error,
	},
	#[error("failed to parse config: {0}")]
	Parse(#[from] serde_json::Error),
	#[error("invalid config: {0}")]
	Invalid(&'static str),
}

/// Knobs of a shard connection. Durations are kept in milliseconds so the file format stays flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
	/// Broadcast channel every client subscribes to for committed sequence numbers.
	pub ack_channel: String,
	/// How long the first send of a write may go unacknowledged.
	pub write_timeout_ms: u64,
	pub max_write_timeout_ms: u64,
	/// Resends after the first attempt, the write fails once all of them timed out.
	pub max_retries: u32,
	pub backoff_multiplier: f64,
	pub sweep_interval_ms: u64,
	/// How long an ack nobody claimed is kept around waiting for its write reply.
	pub ack_retention_ms: u64,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			ack_channel: DEFAULT_ACK_CHANNEL.to_string(),
			write_timeout_ms: 1_000,
			max_write_timeout_ms: 30_000,
			max_retries: 3,
			backoff_multiplier: 2.0,
			sweep_interval_ms: 100,
			ack_retention_ms: 60_000,
		}
	}
}

impl ClientConfig {
	pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		let bytes = fs::read(path).await.map_err(|source| ConfigError::Io {
			path: path.into(),
			source,
		})?;

		let config = serde_json::from_slice::<Self>(&bytes)?;
		config.validate()?;

		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.ack_channel.is_empty() {
			return Err(ConfigError::Invalid("ack channel name can't be empty"));
		}

		if self.write_timeout_ms == 0 {
			return Err(ConfigError::Invalid("write timeout must be greater than zero"));
		}

		if self.max_write_timeout_ms < self.write_timeout_ms {
			return Err(ConfigError::Invalid(
				"max write timeout can't be lower than the write timeout",
			));
		}

		if self.sweep_interval_ms == 0 {
			return Err(ConfigError::Invalid("sweep interval must be greater than zero"));
		}

		if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
			return Err(ConfigError::Invalid("backoff multiplier must be at least 1.0"));
		}

		// An ack may arrive before its write reply, it must outlive the slowest attempt
		if self.ack_retention_ms < self.max_write_timeout_ms {
			return Err(ConfigError::Invalid(
				"ack retention can't be lower than the max write timeout",
			));
		}

		Ok(())
	}

	#[must_use]
	pub const fn sweep_interval(&self) -> Duration {
		Duration::from_millis(self.sweep_interval_ms)
	}

	#[must_use]
	pub const fn ack_retention(&self) -> Duration {
		Duration::from_millis(self.ack_retention_ms)
	}

	/// Timeout of the given (zero based) send of a write, growing exponentially with each resend.
	#[must_use]
	pub fn attempt_timeout(&self, attempt: u32) -> Duration {
		let factor = self
			.backoff_multiplier
			.powi(i32::try_from(attempt).unwrap_or(i32::MAX));

		#[allow(
			clippy::cast_precision_loss,
			clippy::cast_possible_truncation,
			clippy::cast_sign_loss
		)]
		// Clamped to the max timeout before going back to integers
		let millis = (self.write_timeout_ms as f64 * factor)
			.round()
			.min(self.max_write_timeout_ms as f64) as u64;

		Duration::from_millis(millis)
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;

	#[test]
	fn default_is_valid() {
		ClientConfig::default().validate().unwrap();
	}

	#[test]
	fn backoff_grows_and_is_capped() {
		let config = ClientConfig {
			write_timeout_ms: 100,
			max_write_timeout_ms: 500,
			backoff_multiplier: 2.0,
			..Default::default()
		};

		assert_eq!(config.attempt_timeout(0), Duration::from_millis(100));
		assert_eq!(config.attempt_timeout(1), Duration::from_millis(200));
		assert_eq!(config.attempt_timeout(2), Duration::from_millis(400));
		assert_eq!(config.attempt_timeout(3), Duration::from_millis(500));
		assert_eq!(config.attempt_timeout(40), Duration::from_millis(500));
	}

	#[test]
	fn rejects_bad_values() {
		assert!(ClientConfig {
			backoff_multiplier: 0.5,
			..Default::default()
		}
		.validate()
		.is_err());

		assert!(ClientConfig {
			sweep_interval_ms: 0,
			..Default::default()
		}
		.validate()
		.is_err());

		assert!(ClientConfig {
			ack_channel: String::new(),
			..Default::default()
		}
		.validate()
		.is_err());

		assert!(ClientConfig {
			ack_retention_ms: 0,
			..Default::default()
		}
		.validate()
		.is_err());

		assert!(ClientConfig {
			max_write_timeout_ms: 10_000,
			ack_retention_ms: 9_999,
			..Default::default()
		}
		.validate()
		.is_err());

		assert!(ClientConfig {
			max_write_timeout_ms: 10_000,
			ack_retention_ms: 10_000,
			..Default::default()
		}
		.validate()
		.is_ok());
	}

	#[tokio::test]
	async fn load_fills_missing_fields_with_defaults() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, r#"{{ "max_retries": 7, "ack_channel": "shard-0:acks" }}"#).unwrap();

		let config = ClientConfig::load(file.path()).await.unwrap();

		assert_eq!(config.max_retries, 7);
		assert_eq!(config.ack_channel, "shard-0:acks");
		assert_eq!(config.write_timeout_ms, ClientConfig::default().write_timeout_ms);
	}

	#[tokio::test]
	async fn load_reports_missing_file() {
		let dir = tempfile::tempdir().unwrap();

		assert!(matches!(
			ClientConfig::load(dir.path().join("nope.json")).await,
			Err(ConfigError::Io { .. })
		));
	}
}
