//! Transport adapter boundary
//!
//! The session controller never talks to the network directly. It drives a
//! [`Transport`] for connect, publish and (un)subscribe requests, and consumes
//! the [`TransportEvent`] stream the adapter produces for lifecycle changes and
//! inbound messages.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::QoS;
use tokio::sync::mpsc;

use crate::config::{Credentials, EndpointConfig};

/// Transport error types
pub mod error;
pub(crate) mod handlers;
/// Adapter over the `rumqttc` async client
pub mod rumqtt;

pub use error::TransportError;
pub use rumqtt::RumqttTransport;

/// Message delivered by the broker on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
	/// Concrete topic the message was published on
	pub topic: String,
	/// Raw payload
	pub payload: Bytes,
	/// Delivery QoS
	pub qos: QoS,
	/// Whether the broker delivered it from its retained store
	pub retain: bool,
}

impl InboundMessage {
	/// Creates a QoS 0, non-retained message
	pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
		Self {
			topic: topic.into(),
			payload: payload.into(),
			qos: QoS::AtMostOnce,
			retain: false,
		}
	}

	/// Payload as UTF-8 text, if valid
	pub fn payload_str(&self) -> Option<&str> {
		std::str::from_utf8(&self.payload).ok()
	}
}

/// Application callback for inbound messages.
pub type MessageHandler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Wraps a closure into a [`MessageHandler`].
pub fn message_handler<F>(f: F) -> MessageHandler
where F: Fn(&InboundMessage) + Send + Sync + 'static {
	Arc::new(f)
}

/// Lifecycle and message events raised by a transport.
#[derive(Clone)]
pub enum TransportEvent {
	/// Connection (re-)established
	Connected {
		/// True when produced by automatic reconnect
		reconnected: bool,
		/// Broker URI the connection was made to
		server_uri: String,
	},
	/// Connection dropped without a clean disconnect
	ConnectionLost {
		/// Human-readable cause
		cause: String,
	},
	/// Inbound message not claimed by a per-topic handler
	MessageArrived(InboundMessage),
	/// Outbound QoS 1/2 publish fully acknowledged
	DeliveryComplete {
		/// Packet identifier of the acknowledged publish
		message_id: u16,
	},
}

impl fmt::Debug for TransportEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			| TransportEvent::Connected {
				reconnected,
				server_uri,
			} => f
				.debug_struct("Connected")
				.field("reconnected", reconnected)
				.field("server_uri", server_uri)
				.finish(),
			| TransportEvent::ConnectionLost { cause } => f
				.debug_struct("ConnectionLost")
				.field("cause", cause)
				.finish(),
			| TransportEvent::MessageArrived(message) => f
				.debug_struct("MessageArrived")
				.field("topic", &message.topic)
				.field("payload_size", &message.payload.len())
				.finish(),
			| TransportEvent::DeliveryComplete { message_id } => f
				.debug_struct("DeliveryComplete")
				.field("message_id", message_id)
				.finish(),
		}
	}
}

/// Sending half of a transport's event stream
pub type EventSender = mpsc::Sender<TransportEvent>;
/// Receiving half of a transport's event stream
pub type EventReceiver = mpsc::Receiver<TransportEvent>;

/// Creates the bounded channel a transport reports events on.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
	mpsc::channel(capacity)
}

/// Message the broker publishes on the client's behalf after an unclean
/// disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillMessage {
	/// Topic the will is published on
	pub topic: String,
	/// Will payload
	pub payload: Bytes,
	/// QoS of the will publish
	pub qos: QoS,
	/// Whether the broker retains the will
	pub retain: bool,
}

/// Everything a transport needs to open a broker connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
	/// Broker host, port and TLS flag
	pub endpoint: EndpointConfig,
	/// Optional username/password
	pub credentials: Option<Credentials>,
	/// MQTT client identifier
	pub client_id: String,
	/// Reconnect automatically after a connection loss
	pub automatic_reconnect: bool,
	/// Start without a persisted broker session
	pub clean_session: bool,
	/// Keep-alive interval
	pub keep_alive: Duration,
	/// Last-will message, installed once at connect time
	pub will: Option<WillMessage>,
}

/// One entry of a batch subscribe call
#[derive(Clone)]
pub struct SubscribeRequest {
	/// Topic filter
	pub topic: String,
	/// Requested QoS
	pub qos: QoS,
	/// Optional per-topic handler
	pub handler: Option<MessageHandler>,
}

/// Operations a broker connection must provide to the session controller.
///
/// Methods take `&self`; adapters keep their connection state behind interior
/// mutability so one adapter can be shared by the controller and its event
/// worker.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
	/// Opens the broker connection. Fails with
	/// [`TransportError::AlreadyConnected`] when a connection is active.
	async fn connect(
		&self,
		options: &ConnectOptions,
	) -> Result<(), TransportError>;

	/// Closes the broker connection cleanly.
	async fn disconnect(&self) -> Result<(), TransportError>;

	/// Current socket-level connection flag.
	fn is_connected(&self) -> bool;

	/// Whether publishes made while disconnected are queued for later
	/// delivery instead of failing.
	fn buffers_offline(&self) -> bool {
		false
	}

	/// Subscribes to `topic`, routing its messages to `handler` when given.
	async fn subscribe(
		&self,
		topic: &str,
		qos: QoS,
		handler: Option<MessageHandler>,
	) -> Result<(), TransportError>;

	/// Subscribes to several topics, reporting one result per entry.
	async fn subscribe_batch(
		&self,
		requests: &[SubscribeRequest],
	) -> Result<Vec<Result<(), TransportError>>, TransportError> {
		let mut results = Vec::with_capacity(requests.len());
		for request in requests {
			results.push(
				self.subscribe(
					&request.topic,
					request.qos,
					request.handler.clone(),
				)
				.await,
			);
		}
		Ok(results)
	}

	/// Removes the subscription for `topic`.
	async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

	/// Unsubscribes several topics, reporting one result per entry.
	async fn unsubscribe_batch(
		&self,
		topics: &[String],
	) -> Result<Vec<Result<(), TransportError>>, TransportError> {
		let mut results = Vec::with_capacity(topics.len());
		for topic in topics {
			results.push(self.unsubscribe(topic).await);
		}
		Ok(results)
	}

	/// Publishes `payload` on `topic`.
	async fn publish(
		&self,
		topic: &str,
		payload: Bytes,
		qos: QoS,
		retain: bool,
	) -> Result<(), TransportError>;
}
