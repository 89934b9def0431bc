use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::{Mutex, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::connection::SessionConnection;
use super::error::{ArgumentError, BatchError, SessionError};
use super::hooks::{HookId, HookKind, LifecycleHook, LifecycleHooks};
use super::status::StatusPublisher;
use crate::config::SessionConfig;
use crate::qos::IntoQos;
use crate::registry::{RegistrySnapshot, SubscriptionRegistry};
use crate::topic::{validate_publish_topic, validate_topic_filter};
use crate::transport::{
	ConnectOptions, EventReceiver, InboundMessage, MessageHandler,
	SubscribeRequest, Transport, TransportError, TransportEvent,
};

/// Controller's view of the broker connection.
///
/// May lag the transport's own flag by the time it takes to process an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
	/// No connection, or the last one was lost
	#[default]
	Disconnected,
	/// `connect` issued, waiting for the transport to report it
	Connecting,
	/// Transport reported a (re)connection and replay has started
	Connected,
}

struct Shared<T> {
	transport: T,
	config: SessionConfig,
	status: StatusPublisher,
	/// Registry lock; also serialises live (un)subscribe calls and replay
	registry: Mutex<SubscriptionRegistry>,
	state: watch::Sender<ConnectionState>,
	/// Set by `disconnect`, cleared by `connect`; stale `Connected` events
	/// are dropped while set
	detached: AtomicBool,
	default_handler: Option<MessageHandler>,
	hooks: LifecycleHooks,
}

/// Keeps subscriptions alive across reconnects.
///
/// Remembers every subscription intent, replays all of them whenever the
/// transport reports a (re)connection and publishes the client's status.
/// Cloning is cheap; every clone drives the same session.
pub struct SessionController<T> {
	shared: Arc<Shared<T>>,
}

impl<T> Clone for SessionController<T> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<T> fmt::Debug for SessionController<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionController")
			.field("client_id", &self.shared.config.client_id)
			.field("state", &*self.shared.state.borrow())
			.finish()
	}
}

/// Assembles a [`SessionController`] around a transport.
pub struct SessionBuilder<T> {
	transport: T,
	config: SessionConfig,
	default_handler: Option<MessageHandler>,
	on_connect: Vec<LifecycleHook>,
	on_disconnect: Vec<LifecycleHook>,
}

impl<T: Transport> SessionBuilder<T> {
	/// Handler for messages whose topic has no per-topic handler
	pub fn default_handler(mut self, handler: MessageHandler) -> Self {
		self.default_handler = Some(handler);
		self
	}

	/// Hook run after every (re)connection
	pub fn on_connect(mut self, hook: LifecycleHook) -> Self {
		self.on_connect.push(hook);
		self
	}

	/// Hook run after every connection loss
	pub fn on_disconnect(mut self, hook: LifecycleHook) -> Self {
		self.on_disconnect.push(hook);
		self
	}

	/// Builds the controller without an event worker.
	///
	/// Events must then be fed through [`SessionController::handle_event`].
	pub fn build(self) -> SessionController<T> {
		let hooks = LifecycleHooks::default();
		for hook in self.on_connect {
			hooks.add(HookKind::Connect, hook);
		}
		for hook in self.on_disconnect {
			hooks.add(HookKind::Disconnect, hook);
		}
		let (state, _) = watch::channel(ConnectionState::Disconnected);
		SessionController {
			shared: Arc::new(Shared {
				status: StatusPublisher::from_config(&self.config),
				transport: self.transport,
				config: self.config,
				registry: Mutex::new(SubscriptionRegistry::new()),
				state,
				detached: AtomicBool::new(false),
				default_handler: self.default_handler,
				hooks,
			}),
		}
	}

	/// Builds the controller and spawns the worker that drains `events`.
	///
	/// Must be called within a tokio runtime.
	pub fn start(
		self,
		events: EventReceiver,
	) -> (SessionController<T>, SessionConnection<T>) {
		let controller = self.build();
		let (shutdown_tx, shutdown_rx) = oneshot::channel();
		let worker = controller.clone();
		let worker_handle = tokio::spawn(async move {
			worker.run(events, shutdown_rx).await;
		});
		let connection =
			SessionConnection::new(controller.clone(), shutdown_tx, worker_handle);
		(controller, connection)
	}
}

impl<T: Transport> SessionController<T> {
	/// Starts building a controller for `transport`
	pub fn builder(transport: T, config: SessionConfig) -> SessionBuilder<T> {
		SessionBuilder {
			transport,
			config,
			default_handler: None,
			on_connect: Vec::new(),
			on_disconnect: Vec::new(),
		}
	}

	/// Drains transport events until shutdown or until the stream closes.
	///
	/// Running here instead of on the transport's delivery task keeps replay
	/// from stalling acknowledgement processing; one event at a time means one
	/// replay pass at a time.
	async fn run(
		self,
		mut events: EventReceiver,
		mut shutdown_rx: oneshot::Receiver<()>,
	) {
		loop {
			tokio::select! {
				_ = &mut shutdown_rx => {
					info!("Session worker: shutdown signal received");
					break;
				}
				event = events.recv() => {
					match event {
						| Some(event) => self.handle_event(event).await,
						| None => {
							info!("Session worker: transport event stream closed");
							break;
						}
					}
				}
			}
		}
		info!("Session worker exiting");
	}

	/// Applies one transport event to the session.
	pub async fn handle_event(&self, event: TransportEvent) {
		match event {
			| TransportEvent::Connected {
				reconnected,
				server_uri,
			} => {
				if self.reconcile(reconnected, &server_uri).await {
					self.shared.hooks.spawn_all(HookKind::Connect);
				}
			}
			| TransportEvent::ConnectionLost { cause } => {
				self.set_state(ConnectionState::Disconnected);
				warn!(
					client_id = %self.shared.config.client_id,
					cause = %cause,
					"Connection lost, subscriptions kept for replay"
				);
				self.shared.hooks.spawn_all(HookKind::Disconnect);
			}
			| TransportEvent::MessageArrived(message) => {
				self.deliver_default(&message);
			}
			| TransportEvent::DeliveryComplete { message_id } => {
				debug!(message_id = message_id, "Delivery complete");
			}
		}
	}

	/// Marks the session connected, publishes the online status and replays
	/// every registered subscription.
	///
	/// Runs entirely under the registry lock so a concurrent `subscribe` is
	/// either in this pass's snapshot or applied live after it. Returns false
	/// when the event arrived after an explicit `disconnect`.
	async fn reconcile(&self, reconnected: bool, server_uri: &str) -> bool {
		let registry = self.shared.registry.lock().await;
		if self.shared.detached.load(Ordering::SeqCst) {
			debug!(
				server_uri = %server_uri,
				reconnected = reconnected,
				"Ignoring connection event queued before disconnect"
			);
			return false;
		}
		self.set_state(ConnectionState::Connected);
		info!(
			client_id = %self.shared.config.client_id,
			server_uri = %server_uri,
			reconnected = reconnected,
			"Connection established"
		);

		if let Err(err) = self
			.shared
			.status
			.publish_online(&self.shared.transport)
			.await
		{
			error!(
				topic = %self.shared.status.topic(),
				error = %err,
				"Failed to publish online status"
			);
		}

		let snapshot = registry.snapshot();
		let mut failed = 0usize;
		for intent in &snapshot {
			let result = self
				.shared
				.transport
				.subscribe(intent.topic(), intent.qos(), intent.handler().cloned())
				.await;
			match result {
				| Ok(()) => {
					debug!(topic = %intent.topic(), qos = ?intent.qos(), "Replayed subscription");
				}
				| Err(err) => {
					failed += 1;
					warn!(
						topic = %intent.topic(),
						error = %err,
						"Failed to replay subscription, retrying on next connection"
					);
				}
			}
		}
		info!(
			replayed = snapshot.len() - failed,
			failed = failed,
			"Subscription replay finished"
		);
		true
	}

	fn deliver_default(&self, message: &InboundMessage) {
		match &self.shared.default_handler {
			| Some(handler) => handler(message),
			| None => {
				debug!(
					topic = %message.topic,
					payload_size = message.payload.len(),
					"Message arrived without a handler"
				);
			}
		}
	}

	fn set_state(&self, state: ConnectionState) {
		let previous = self.shared.state.send_replace(state);
		if previous != state {
			debug!(from = ?previous, to = ?state, "Connection state changed");
		}
	}

	/// Opens the broker connection with the status last will installed.
	///
	/// The session becomes `Connected` once the transport reports it.
	pub async fn connect(&self) -> Result<(), SessionError> {
		let claimed = self.shared.state.send_if_modified(|state| {
			if *state == ConnectionState::Disconnected {
				*state = ConnectionState::Connecting;
				true
			} else {
				false
			}
		});
		if !claimed {
			return Err(TransportError::AlreadyConnected.into());
		}
		self.shared.detached.store(false, Ordering::SeqCst);

		let options = self.connect_options();
		info!(
			client_id = %options.client_id,
			server_uri = %options.endpoint.server_uri(),
			"Connecting to broker"
		);
		if let Err(err) = self.shared.transport.connect(&options).await {
			self.shared.state.send_if_modified(|state| {
				if *state == ConnectionState::Connecting {
					*state = ConnectionState::Disconnected;
					true
				} else {
					false
				}
			});
			error!(error = %err, "Failed to connect to broker");
			return Err(err.into());
		}
		Ok(())
	}

	/// Transport options derived from the session configuration
	pub fn connect_options(&self) -> ConnectOptions {
		let config = &self.shared.config;
		ConnectOptions {
			endpoint: config.endpoint.clone(),
			credentials: config.credentials.clone(),
			client_id: config.client_id.clone(),
			automatic_reconnect: config.automatic_reconnect,
			clean_session: config.clean_session,
			keep_alive: config.keep_alive,
			will: Some(self.shared.status.last_will()),
		}
	}

	/// Disconnects from the broker. Registered subscriptions are kept and
	/// replayed on the next connection.
	pub async fn disconnect(&self) -> Result<(), SessionError> {
		self.shared.detached.store(true, Ordering::SeqCst);
		if self.shared.config.settings.publish_offline_on_disconnect
			&& self.is_connected()
		{
			if let Err(err) = self
				.shared
				.status
				.publish_offline(&self.shared.transport)
				.await
			{
				warn!(error = %err, "Failed to publish offline status");
			}
		}
		let result = self.shared.transport.disconnect().await;
		{
			// Waits out a replay pass already in progress
			let _registry = self.shared.registry.lock().await;
			self.set_state(ConnectionState::Disconnected);
		}
		info!(client_id = %self.shared.config.client_id, "Disconnected from broker");
		result.map_err(SessionError::from)
	}

	/// Registers a subscription and, when connected, applies it immediately.
	///
	/// While disconnected the intent is stored and applied on the next
	/// connection. A failed live call is returned to the caller but the intent
	/// stays registered for the next replay.
	pub async fn subscribe(
		&self,
		topic: &str,
		qos: impl IntoQos,
		handler: Option<MessageHandler>,
	) -> Result<(), SessionError> {
		let qos = qos.into_qos()?;
		let mut registry = self.shared.registry.lock().await;
		registry.put(topic, qos, handler.clone())?;

		if !self.is_connected() {
			debug!(topic = %topic, qos = ?qos, "Subscription stored until next connection");
			return Ok(());
		}
		self.shared
			.transport
			.subscribe(topic, qos, handler)
			.await
			.inspect_err(|err| {
				warn!(topic = %topic, error = %err, "Live subscribe failed, kept for replay");
			})?;
		debug!(topic = %topic, qos = ?qos, "Subscribed");
		Ok(())
	}

	/// Subscribes with the configured default QoS
	pub async fn subscribe_default(
		&self,
		topic: &str,
		handler: Option<MessageHandler>,
	) -> Result<(), SessionError> {
		self.subscribe(topic, self.shared.config.default_qos, handler)
			.await
	}

	/// Registers several subscriptions as one batch.
	///
	/// All arguments are validated before anything is registered. Each
	/// topic's intent is independent: transport failures for some topics are
	/// reported in [`SessionError::Batch`] without touching the others.
	pub async fn subscribe_many<S, Q>(
		&self,
		topics: &[S],
		qos: &[Q],
		handlers: Option<Vec<Option<MessageHandler>>>,
	) -> Result<(), SessionError>
	where
		S: AsRef<str>,
		Q: IntoQos + Copy,
	{
		if qos.len() != topics.len() {
			return Err(ArgumentError::LengthMismatch {
				topics: topics.len(),
				values: qos.len(),
			}
			.into());
		}
		let mut handlers = match handlers {
			| Some(handlers) if handlers.len() != topics.len() => {
				return Err(ArgumentError::LengthMismatch {
					topics: topics.len(),
					values: handlers.len(),
				}
				.into());
			}
			| Some(handlers) => handlers,
			| None => vec![None; topics.len()],
		};

		let mut requests = Vec::with_capacity(topics.len());
		for ((topic, &level), handler) in
			topics.iter().zip(qos).zip(handlers.drain(..))
		{
			let topic = topic.as_ref();
			validate_topic_filter(topic)?;
			requests.push(SubscribeRequest {
				topic: topic.to_string(),
				qos: level.into_qos()?,
				handler,
			});
		}

		let mut registry = self.shared.registry.lock().await;
		for request in &requests {
			registry.put(&request.topic, request.qos, request.handler.clone())?;
		}
		if !self.is_connected() || requests.is_empty() {
			debug!(count = requests.len(), "Subscriptions stored until next connection");
			return Ok(());
		}

		let results = self.shared.transport.subscribe_batch(&requests).await?;
		let failures: Vec<(String, TransportError)> = requests
			.into_iter()
			.zip(results)
			.filter_map(|(request, result)| {
				result.err().map(|err| (request.topic, err))
			})
			.collect();
		if failures.is_empty() {
			return Ok(());
		}
		warn!(failed = failures.len(), "Live batch subscribe partially failed, kept for replay");
		Err(BatchError { failures }.into())
	}

	/// Removes a subscription. Unknown topics are a no-op.
	///
	/// The removal holds across reconnects even when the live unsubscribe
	/// fails.
	pub async fn unsubscribe(&self, topic: &str) -> Result<(), SessionError> {
		validate_topic_filter(topic)?;
		let mut registry = self.shared.registry.lock().await;
		if registry.remove(topic).is_none() {
			debug!(topic = %topic, "Unsubscribe for unknown topic ignored");
			return Ok(());
		}
		if !self.is_connected() {
			return Ok(());
		}
		self.shared
			.transport
			.unsubscribe(topic)
			.await
			.inspect_err(|err| {
				warn!(topic = %topic, error = %err, "Live unsubscribe failed");
			})?;
		debug!(topic = %topic, "Unsubscribed");
		Ok(())
	}

	/// Removes several subscriptions as one batch.
	pub async fn unsubscribe_many<S: AsRef<str>>(
		&self,
		topics: &[S],
	) -> Result<(), SessionError> {
		for topic in topics {
			validate_topic_filter(topic.as_ref())?;
		}
		let mut registry = self.shared.registry.lock().await;
		let present: Vec<String> = topics
			.iter()
			.map(|topic| topic.as_ref().to_string())
			.filter(|topic| registry.contains(topic))
			.collect();
		registry.remove_all(&present);
		if !self.is_connected() || present.is_empty() {
			return Ok(());
		}

		let results = self.shared.transport.unsubscribe_batch(&present).await?;
		let failures: Vec<(String, TransportError)> = present
			.into_iter()
			.zip(results)
			.filter_map(|(topic, result)| result.err().map(|err| (topic, err)))
			.collect();
		if failures.is_empty() {
			return Ok(());
		}
		Err(BatchError { failures }.into())
	}

	/// Publishes directly through the transport.
	///
	/// Fails with [`SessionError::NotConnected`] while the transport is down
	/// unless it queues offline publishes.
	pub async fn publish(
		&self,
		topic: &str,
		payload: impl Into<Bytes>,
		qos: impl IntoQos,
		retain: bool,
	) -> Result<(), SessionError> {
		validate_publish_topic(topic)?;
		let qos = qos.into_qos()?;
		let transport = &self.shared.transport;
		if !transport.is_connected() && !transport.buffers_offline() {
			return Err(SessionError::NotConnected);
		}
		transport
			.publish(topic, payload.into(), qos, retain)
			.await
			.map_err(SessionError::from)
	}

	/// Publishes a non-retained message with the configured default QoS
	pub async fn publish_default(
		&self,
		topic: &str,
		payload: impl Into<Bytes>,
	) -> Result<(), SessionError> {
		self.publish(topic, payload, self.shared.config.default_qos, false)
			.await
	}

	/// Last-known state is `Connected`. Never blocks.
	pub fn is_connected(&self) -> bool {
		*self.shared.state.borrow() == ConnectionState::Connected
	}

	/// Last-known connection state
	pub fn connection_state(&self) -> ConnectionState {
		*self.shared.state.borrow()
	}

	/// Waits until the session reaches `Connected`.
	pub async fn wait_connected(&self) {
		let mut state = self.shared.state.subscribe();
		// The sender lives in `self`, so the channel cannot close here.
		let _ = state
			.wait_for(|state| *state == ConnectionState::Connected)
			.await;
	}

	/// Copy of the registered subscriptions
	pub async fn subscriptions(&self) -> RegistrySnapshot {
		self.shared.registry.lock().await.snapshot()
	}

	/// Registers a hook run after every (re)connection
	pub fn add_on_connect_hook(&self, hook: LifecycleHook) -> HookId {
		self.shared.hooks.add(HookKind::Connect, hook)
	}

	/// Removes an on-connect hook. Returns false if it was not registered.
	pub fn remove_on_connect_hook(&self, id: HookId) -> bool {
		self.shared.hooks.remove(HookKind::Connect, id)
	}

	/// Registers a hook run after every connection loss
	pub fn add_on_disconnect_hook(&self, hook: LifecycleHook) -> HookId {
		self.shared.hooks.add(HookKind::Disconnect, hook)
	}

	/// Removes an on-disconnect hook. Returns false if it was not registered.
	pub fn remove_on_disconnect_hook(&self, id: HookId) -> bool {
		self.shared.hooks.remove(HookKind::Disconnect, id)
	}

	/// Session configuration
	pub fn config(&self) -> &SessionConfig {
		&self.shared.config
	}

	/// Status topic of this client
	pub fn status_topic(&self) -> &str {
		self.shared.status.topic()
	}
}
