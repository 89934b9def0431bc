use rumqttc::{ClientError, ConnectReturnCode};
use thiserror::Error;

/// Failures reported by a transport adapter
#[derive(Debug, Error)]
pub enum TransportError {
	/// No live broker connection
	#[error("Transport is not connected")]
	NotConnected,

	/// `connect` called while connecting or connected
	#[error("Transport is already connecting or connected")]
	AlreadyConnected,

	/// Request could not be queued on the rumqttc client
	#[error("Client request failed: {0}")]
	Client(#[from] ClientError),

	/// Network failure while establishing or holding the connection
	#[error("Connection failed: {0}")]
	Connection(String),

	/// Broker refused the CONNECT packet
	#[error("Broker rejected connection: {code:?}")]
	Rejected {
		/// CONNACK return code
		code: ConnectReturnCode,
	},

	/// Broker did not acknowledge the connection in time
	#[error("Connection establishment timed out after {timeout_millis}ms")]
	Timeout {
		/// Configured wait
		timeout_millis: u64,
	},

	/// Any other adapter-specific failure
	#[error("{0}")]
	Failed(String),
}

impl TransportError {
	/// Creates a Connection error from any displayable cause
	pub fn connection(cause: impl std::fmt::Display) -> Self {
		Self::Connection(cause.to_string())
	}
}
