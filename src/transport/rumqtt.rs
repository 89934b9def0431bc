use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::Packet::{self, Disconnect, Publish};
use rumqttc::{
	AsyncClient, ConnAck, ConnectReturnCode, ConnectionError, EventLoop,
	LastWill, MqttOptions, QoS,
};
use rumqttc::{Event::Incoming, Event::Outgoing};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use super::handlers::{HandlerTable, dispatch};
use super::{
	ConnectOptions, EventSender, InboundMessage, MessageHandler, Transport,
	TransportError, TransportEvent,
};
use crate::config::SessionSettings;

/// Live rumqttc client and the task polling its event loop
struct LiveConnection {
	client: AsyncClient,
	event_loop_handle: JoinHandle<()>,
}

/// State shared between the adapter and its event loop task
#[derive(Clone)]
struct EventLoopContext {
	events: EventSender,
	connected: Arc<AtomicBool>,
	handlers: Arc<RwLock<HandlerTable>>,
	server_uri: String,
	automatic_reconnect: bool,
}

impl EventLoopContext {
	async fn emit(&self, event: TransportEvent) {
		if self.events.send(event).await.is_err() {
			debug!("Transport event dropped, session worker is gone");
		}
	}
}

/// [`Transport`] backed by the `rumqttc` async client.
///
/// Lifecycle changes and unclaimed messages are reported on the event channel
/// given at construction. With automatic reconnect enabled, rumqttc keeps its
/// request queue across outages, so publishes made while offline are delivered
/// after the next CONNACK.
pub struct RumqttTransport {
	events: EventSender,
	request_channel_capacity: usize,
	connection_timeout_millis: u64,
	live: Mutex<Option<LiveConnection>>,
	connected: Arc<AtomicBool>,
	automatic_reconnect: AtomicBool,
	handlers: Arc<RwLock<HandlerTable>>,
}

impl RumqttTransport {
	/// Creates an adapter reporting on `events` with default settings
	pub fn new(events: EventSender) -> Self {
		Self::with_settings(events, &SessionSettings::default())
	}

	/// Creates an adapter sized by `settings`
	pub fn with_settings(events: EventSender, settings: &SessionSettings) -> Self {
		Self {
			events,
			request_channel_capacity: settings.request_channel_capacity,
			connection_timeout_millis: settings.connection_timeout_millis,
			live: Mutex::new(None),
			connected: Arc::new(AtomicBool::new(false)),
			automatic_reconnect: AtomicBool::new(false),
			handlers: Arc::new(RwLock::new(HandlerTable::new())),
		}
	}

	fn mqtt_options(options: &ConnectOptions) -> MqttOptions {
		let endpoint = &options.endpoint;
		let mut mqtt_options = MqttOptions::new(
			options.client_id.clone(),
			endpoint.host.clone(),
			endpoint.port,
		);
		mqtt_options
			.set_keep_alive(options.keep_alive)
			.set_clean_session(options.clean_session);
		if let Some(credentials) = &options.credentials {
			mqtt_options.set_credentials(
				credentials.username.clone(),
				credentials.password.clone(),
			);
		}
		if let Some(will) = &options.will {
			mqtt_options.set_last_will(LastWill::new(
				will.topic.clone(),
				will.payload.to_vec(),
				will.qos,
				will.retain,
			));
		}
		if endpoint.tls {
			mqtt_options
				.set_transport(rumqttc::Transport::tls_with_default_config());
		}
		mqtt_options
	}

	async fn client(&self) -> Result<AsyncClient, TransportError> {
		self.live
			.lock()
			.await
			.as_ref()
			.map(|live| live.client.clone())
			.ok_or(TransportError::NotConnected)
	}

	async fn establish_connection(
		mut event_loop: EventLoop,
	) -> Result<EventLoop, TransportError> {
		loop {
			match event_loop.poll().await {
				| Ok(Incoming(Packet::ConnAck(ConnAck { code, .. }))) => {
					if code == ConnectReturnCode::Success {
						debug!("MQTT connection established successfully");
						return Ok(event_loop);
					}
					debug!(code = ?code, "MQTT connection rejected by broker");
					return Err(TransportError::Rejected { code });
				}
				| Ok(notification) => {
					debug!(notification = ?notification, "Bootstrap phase notification");
				}
				| Err(ConnectionError::ConnectionRefused(code)) => {
					debug!(code = ?code, "MQTT connection refused by broker");
					return Err(TransportError::Rejected { code });
				}
				| Err(connection_err) => {
					debug!(error = %connection_err, "MQTT connection error during bootstrap phase");
					return Err(TransportError::connection(connection_err));
				}
			}
		}
	}

	/// Polls the event loop until a clean disconnect, or until the first
	/// connection error when automatic reconnect is off.
	async fn run(mut event_loop: EventLoop, context: EventLoopContext) {
		let mut error_count = 0;
		const MAX_CONSECUTIVE_ERRORS: u32 = 10;
		const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);
		const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

		loop {
			match event_loop.poll().await {
				| Ok(Incoming(Packet::ConnAck(ConnAck {
					session_present,
					code: ConnectReturnCode::Success,
				}))) => {
					error_count = 0;
					context.connected.store(true, Ordering::SeqCst);
					info!(
						session_present = session_present,
						"MQTT reconnected"
					);
					context
						.emit(TransportEvent::Connected {
							reconnected: true,
							server_uri: context.server_uri.clone(),
						})
						.await;
				}
				| Ok(Incoming(Publish(p))) => {
					error_count = 0;
					debug!(topic = %p.topic, payload_size = p.payload.len(), "Received MQTT message");

					let message = InboundMessage {
						topic: p.topic,
						payload: p.payload,
						qos: p.qos,
						retain: p.retain,
					};
					let handlers =
						context.handlers.read().await.matching(&message.topic);
					if !dispatch(&handlers, &message) {
						context
							.emit(TransportEvent::MessageArrived(message))
							.await;
					}
				}
				| Ok(Incoming(Packet::PubAck(ack))) => {
					context
						.emit(TransportEvent::DeliveryComplete {
							message_id: ack.pkid,
						})
						.await;
				}
				| Ok(Incoming(Packet::PubComp(comp))) => {
					context
						.emit(TransportEvent::DeliveryComplete {
							message_id: comp.pkid,
						})
						.await;
				}
				| Ok(Incoming(Disconnect)) => {
					info!("Received MQTT Disconnect packet from server");
					context.connected.store(false, Ordering::SeqCst);
					context
						.emit(TransportEvent::ConnectionLost {
							cause: "broker closed the connection".to_string(),
						})
						.await;
					if !context.automatic_reconnect {
						break;
					}
				}
				| Ok(Outgoing(rumqttc::Outgoing::Disconnect)) => {
					info!("Sent MQTT Disconnect packet to server");
					context.connected.store(false, Ordering::SeqCst);
					break;
				}
				| Ok(notification) => {
					error_count = 0;
					debug!(notification = ?notification, "Received other MQTT notification");
				}
				| Err(err) => {
					if context.connected.swap(false, Ordering::SeqCst) {
						context
							.emit(TransportEvent::ConnectionLost {
								cause: err.to_string(),
							})
							.await;
					}
					if !context.automatic_reconnect {
						warn!(error = %err, "MQTT connection lost, automatic reconnect disabled");
						break;
					}

					error_count += 1;
					if error_count >= MAX_CONSECUTIVE_ERRORS {
						error!(error_count = error_count, error = %err, "MQTT broker still unreachable");
					} else {
						warn!(error_count = error_count, error = %err, "MQTT event loop error");
					}

					let delay = INITIAL_RETRY_DELAY
						* 2_u32.pow((error_count - 1).min(10));
					let delay = delay.min(MAX_RETRY_DELAY);

					debug!(delay = ?delay, error_count = error_count, "Retrying MQTT connection");
					time::sleep(delay).await;
				}
			}
		}
		info!("MQTT event loop terminated");
	}
}

#[async_trait]
impl Transport for RumqttTransport {
	async fn connect(
		&self,
		options: &ConnectOptions,
	) -> Result<(), TransportError> {
		let server_uri = options.endpoint.server_uri();
		{
			let mut live = self.live.lock().await;
			if let Some(existing) = live.as_ref() {
				if !existing.event_loop_handle.is_finished() {
					return Err(TransportError::AlreadyConnected);
				}
				*live = None;
			}

			let (client, event_loop) = AsyncClient::new(
				Self::mqtt_options(options),
				self.request_channel_capacity,
			);
			let timeout_millis = self.connection_timeout_millis;
			let event_loop = time::timeout(
				Duration::from_millis(timeout_millis),
				Self::establish_connection(event_loop),
			)
			.await
			.map_err(|_| TransportError::Timeout { timeout_millis })??;

			self.connected.store(true, Ordering::SeqCst);
			self.automatic_reconnect
				.store(options.automatic_reconnect, Ordering::SeqCst);
			let context = EventLoopContext {
				events: self.events.clone(),
				connected: self.connected.clone(),
				handlers: self.handlers.clone(),
				server_uri: server_uri.clone(),
				automatic_reconnect: options.automatic_reconnect,
			};
			let event_loop_handle = tokio::spawn(async move {
				Self::run(event_loop, context).await;
			});
			*live = Some(LiveConnection {
				client,
				event_loop_handle,
			});
		}

		info!(server_uri = %server_uri, client_id = %options.client_id, "MQTT connected");
		if self
			.events
			.send(TransportEvent::Connected {
				reconnected: false,
				server_uri,
			})
			.await
			.is_err()
		{
			warn!("Connected event dropped, session worker is gone");
		}
		Ok(())
	}

	async fn disconnect(&self) -> Result<(), TransportError> {
		let Some(live) = self.live.lock().await.take() else {
			debug!("Disconnect requested without a live connection");
			return Ok(());
		};
		self.handlers.write().await.clear();
		if live.event_loop_handle.is_finished() {
			self.connected.store(false, Ordering::SeqCst);
			return Ok(());
		}

		let result = live.client.disconnect().await;
		let mut event_loop_handle = live.event_loop_handle;
		let wait = Duration::from_millis(self.connection_timeout_millis);
		match time::timeout(wait, &mut event_loop_handle).await {
			| Ok(Ok(())) => {}
			| Ok(Err(err)) => {
				warn!(error = %err, "Event loop task failed");
			}
			| Err(_) => {
				warn!("Event loop did not stop after Disconnect, aborting it");
				event_loop_handle.abort();
			}
		}
		self.connected.store(false, Ordering::SeqCst);
		result.map_err(TransportError::from)
	}

	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}

	fn buffers_offline(&self) -> bool {
		self.automatic_reconnect.load(Ordering::SeqCst)
	}

	async fn subscribe(
		&self,
		topic: &str,
		qos: QoS,
		handler: Option<MessageHandler>,
	) -> Result<(), TransportError> {
		if !self.is_connected() {
			return Err(TransportError::NotConnected);
		}
		let client = self.client().await?;
		client.subscribe(topic, qos).await?;
		let mut handlers = self.handlers.write().await;
		handlers.set(topic, handler);
		debug!(topic = %topic, handlers = handlers.len(), "Handler table updated");
		Ok(())
	}

	async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
		if !self.is_connected() {
			return Err(TransportError::NotConnected);
		}
		let client = self.client().await?;
		self.handlers.write().await.remove(topic);
		client.unsubscribe(topic).await?;
		Ok(())
	}

	async fn publish(
		&self,
		topic: &str,
		payload: Bytes,
		qos: QoS,
		retain: bool,
	) -> Result<(), TransportError> {
		let client = self.client().await?;
		client.publish_bytes(topic, qos, retain, payload).await?;
		Ok(())
	}
}
