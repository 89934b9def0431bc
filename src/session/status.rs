//! Liveness status on `status/<client_id>`
//!
//! The online payload is published retained after every (re)connection. The
//! offline payload is installed once as the transport's last will so the
//! broker announces unclean drops on the client's behalf.

use bytes::Bytes;
use rumqttc::QoS;

use crate::config::SessionConfig;
use crate::transport::{Transport, TransportError, WillMessage};

/// Publishes connection status for one client.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
	topic: String,
	qos: QoS,
	online_payload: Bytes,
	offline_payload: Bytes,
}

impl StatusPublisher {
	/// Creates a publisher with the default `connected`/`disconnected`
	/// payloads.
	pub fn new(client_id: &str, qos: QoS) -> Self {
		Self {
			topic: format!("status/{client_id}"),
			qos,
			online_payload: Bytes::from_static(b"connected"),
			offline_payload: Bytes::from_static(b"disconnected"),
		}
	}

	/// Creates a publisher from session configuration
	pub fn from_config(config: &SessionConfig) -> Self {
		Self::new(&config.client_id, config.default_qos)
			.online_payload(config.settings.status_online_payload.clone())
			.offline_payload(config.settings.status_offline_payload.clone())
	}

	/// Sets the payload published after a connection
	pub fn online_payload(mut self, payload: impl Into<Bytes>) -> Self {
		self.online_payload = payload.into();
		self
	}

	/// Sets the payload used for the last will
	pub fn offline_payload(mut self, payload: impl Into<Bytes>) -> Self {
		self.offline_payload = payload.into();
		self
	}

	/// Status topic
	pub fn topic(&self) -> &str {
		&self.topic
	}

	/// QoS used for status messages
	pub fn qos(&self) -> QoS {
		self.qos
	}

	/// Last-will message to pass into the transport's connect call.
	pub fn last_will(&self) -> WillMessage {
		WillMessage {
			topic: self.topic.clone(),
			payload: self.offline_payload.clone(),
			qos: self.qos,
			retain: true,
		}
	}

	/// Publishes the retained online status.
	pub async fn publish_online<T: Transport + ?Sized>(
		&self,
		transport: &T,
	) -> Result<(), TransportError> {
		transport
			.publish(&self.topic, self.online_payload.clone(), self.qos, true)
			.await
	}

	/// Publishes the retained offline status ahead of a clean disconnect.
	pub async fn publish_offline<T: Transport + ?Sized>(
		&self,
		transport: &T,
	) -> Result<(), TransportError> {
		transport
			.publish(&self.topic, self.offline_payload.clone(), self.qos, true)
			.await
	}
}
