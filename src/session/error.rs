use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Input validation failures. Nothing is applied when one is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArgumentError {
	/// Topic or topic filter is empty
	#[error("Topic cannot be empty")]
	EmptyTopic,

	/// QoS level outside 0..=2
	#[error("Invalid QoS level {level}: expected 0, 1 or 2")]
	InvalidQos {
		/// Rejected level
		level: i64,
	},

	/// Topic violates MQTT topic rules
	#[error("Invalid topic '{topic}': {reason}")]
	InvalidTopic {
		/// Offending topic
		topic: String,
		/// Rule it breaks
		reason: String,
	},

	/// Parallel batch arguments have different lengths
	#[error(
		"Batch length mismatch: {topics} topics but {values} QoS levels or \
		 handlers"
	)]
	LengthMismatch {
		/// Number of topics
		topics: usize,
		/// Number of QoS levels or handlers
		values: usize,
	},
}

impl ArgumentError {
	/// Creates a new InvalidTopic error
	pub fn invalid_topic(
		topic: impl Into<String>,
		reason: impl Into<String>,
	) -> Self {
		Self::InvalidTopic {
			topic: topic.into(),
			reason: reason.into(),
		}
	}
}

/// Per-topic transport failures of a batch subscribe or unsubscribe.
///
/// Registry changes for every topic in the batch are kept, including the
/// failed ones.
#[derive(Debug)]
pub struct BatchError {
	/// Topic and the transport error reported for it
	pub failures: Vec<(String, TransportError)>,
}

impl fmt::Display for BatchError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} topic(s) failed:", self.failures.len())?;
		for (topic, err) in &self.failures {
			write!(f, " [{topic}: {err}]")?;
		}
		Ok(())
	}
}

impl std::error::Error for BatchError {}

/// Errors returned by session controller operations
#[derive(Debug, Error)]
pub enum SessionError {
	/// Bad QoS value, empty or malformed topic
	#[error("Invalid argument: {0}")]
	InvalidArgument(#[from] ArgumentError),

	/// Operation needs a live connection and the transport does not buffer
	#[error("Not connected to the broker")]
	NotConnected,

	/// Failure reported by the transport adapter
	#[error("Transport error: {0}")]
	Transport(#[from] TransportError),

	/// Some entries of a batch operation failed at the transport
	#[error("Batch operation partially failed: {0}")]
	Batch(#[from] BatchError),

	/// Configuration could not be loaded
	#[error("Configuration error: {0}")]
	Configuration(#[from] ConfigError),
}

impl SessionError {
	/// True for validation errors, which never change session state
	pub fn is_invalid_argument(&self) -> bool {
		matches!(self, SessionError::InvalidArgument(_))
	}
}
