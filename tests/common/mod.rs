//! Recording transport used by the integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mqtt_session::transport::{EventSender, WillMessage};
use mqtt_session::{
	ConnectOptions, MessageHandler, QoS, SessionConfig, Transport,
	TransportError, TransportEvent,
};

/// One request the controller made
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
	Connect {
		client_id: String,
		will: Option<WillMessage>,
	},
	Disconnect,
	Subscribe {
		topic: String,
		qos: QoS,
		has_handler: bool,
	},
	Unsubscribe {
		topic: String,
	},
	Publish {
		topic: String,
		payload: Bytes,
		qos: QoS,
		retain: bool,
	},
}

#[derive(Default)]
struct MockState {
	connected: AtomicBool,
	buffers_offline: AtomicBool,
	fail_connect: AtomicBool,
	calls: Mutex<Vec<Call>>,
	failing_topics: Mutex<HashSet<String>>,
	subscribe_delay: Mutex<Option<Duration>>,
	in_flight: AtomicUsize,
	max_in_flight: AtomicUsize,
	events: Mutex<Option<EventSender>>,
}

/// Transport that records every call and never touches the network.
///
/// Clones share state, so a test keeps one clone for inspection and hands
/// the other to the controller.
#[derive(Clone, Default)]
pub struct MockTransport {
	state: Arc<MockState>,
}

impl MockTransport {
	pub fn new() -> Self {
		Self::default()
	}

	/// Mock that reports `Connected` on `events` from `connect`
	pub fn with_events(events: EventSender) -> Self {
		let mock = Self::default();
		*mock.state.events.lock().unwrap() = Some(events);
		mock
	}

	pub fn set_connected(&self, connected: bool) {
		self.state.connected.store(connected, Ordering::SeqCst);
	}

	pub fn set_buffers_offline(&self, buffers: bool) {
		self.state.buffers_offline.store(buffers, Ordering::SeqCst);
	}

	pub fn fail_connect(&self) {
		self.state.fail_connect.store(true, Ordering::SeqCst);
	}

	pub fn fail_topic(&self, topic: &str) {
		self.state
			.failing_topics
			.lock()
			.unwrap()
			.insert(topic.to_string());
	}

	pub fn heal_topic(&self, topic: &str) {
		self.state.failing_topics.lock().unwrap().remove(topic);
	}

	pub fn set_subscribe_delay(&self, delay: Duration) {
		*self.state.subscribe_delay.lock().unwrap() = Some(delay);
	}

	pub fn calls(&self) -> Vec<Call> {
		self.state.calls.lock().unwrap().clone()
	}

	pub fn clear_calls(&self) {
		self.state.calls.lock().unwrap().clear();
	}

	/// Topic and QoS of every subscribe call, in order
	pub fn subscribes(&self) -> Vec<(String, QoS)> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				| Call::Subscribe { topic, qos, .. } => Some((topic, qos)),
				| _ => None,
			})
			.collect()
	}

	pub fn unsubscribes(&self) -> Vec<String> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				| Call::Unsubscribe { topic } => Some(topic),
				| _ => None,
			})
			.collect()
	}

	/// Topic, payload and retain flag of every publish call, in order
	pub fn publishes(&self) -> Vec<(String, Bytes, bool)> {
		self.calls()
			.into_iter()
			.filter_map(|call| match call {
				| Call::Publish {
					topic,
					payload,
					retain,
					..
				} => Some((topic, payload, retain)),
				| _ => None,
			})
			.collect()
	}

	/// Highest number of subscribe calls that were in progress at once
	pub fn max_concurrent_subscribes(&self) -> usize {
		self.state.max_in_flight.load(Ordering::SeqCst)
	}

	fn record(&self, call: Call) {
		self.state.calls.lock().unwrap().push(call);
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn connect(
		&self,
		options: &ConnectOptions,
	) -> Result<(), TransportError> {
		if self.state.fail_connect.load(Ordering::SeqCst) {
			return Err(TransportError::connection("connection refused"));
		}
		if self.state.connected.swap(true, Ordering::SeqCst) {
			return Err(TransportError::AlreadyConnected);
		}
		self.record(Call::Connect {
			client_id: options.client_id.clone(),
			will: options.will.clone(),
		});
		let events = self.state.events.lock().unwrap().clone();
		if let Some(events) = events {
			let _ = events
				.send(TransportEvent::Connected {
					reconnected: false,
					server_uri: options.endpoint.server_uri(),
				})
				.await;
		}
		Ok(())
	}

	async fn disconnect(&self) -> Result<(), TransportError> {
		self.state.connected.store(false, Ordering::SeqCst);
		self.record(Call::Disconnect);
		Ok(())
	}

	fn is_connected(&self) -> bool {
		self.state.connected.load(Ordering::SeqCst)
	}

	fn buffers_offline(&self) -> bool {
		self.state.buffers_offline.load(Ordering::SeqCst)
	}

	async fn subscribe(
		&self,
		topic: &str,
		qos: QoS,
		handler: Option<MessageHandler>,
	) -> Result<(), TransportError> {
		let active = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.state.max_in_flight.fetch_max(active, Ordering::SeqCst);
		let delay = *self.state.subscribe_delay.lock().unwrap();
		match delay {
			| Some(delay) => tokio::time::sleep(delay).await,
			| None => tokio::task::yield_now().await,
		}
		self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

		self.record(Call::Subscribe {
			topic: topic.to_string(),
			qos,
			has_handler: handler.is_some(),
		});
		if !self.is_connected() {
			return Err(TransportError::NotConnected);
		}
		if self.state.failing_topics.lock().unwrap().contains(topic) {
			return Err(TransportError::Failed(format!(
				"subscribe to {topic} refused"
			)));
		}
		Ok(())
	}

	async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
		self.record(Call::Unsubscribe {
			topic: topic.to_string(),
		});
		if !self.is_connected() {
			return Err(TransportError::NotConnected);
		}
		Ok(())
	}

	async fn publish(
		&self,
		topic: &str,
		payload: Bytes,
		qos: QoS,
		retain: bool,
	) -> Result<(), TransportError> {
		if !self.is_connected() && !self.buffers_offline() {
			return Err(TransportError::NotConnected);
		}
		self.record(Call::Publish {
			topic: topic.to_string(),
			payload,
			qos,
			retain,
		});
		Ok(())
	}
}

pub fn config(client_id: &str) -> SessionConfig {
	SessionConfig::localhost(client_id)
}

pub fn connected(reconnected: bool) -> TransportEvent {
	TransportEvent::Connected {
		reconnected,
		server_uri: "tcp://localhost:1883".to_string(),
	}
}

pub fn connection_lost() -> TransportEvent {
	TransportEvent::ConnectionLost {
		cause: "network unreachable".to_string(),
	}
}
