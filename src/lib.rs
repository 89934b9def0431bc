//! # MQTT Session
//!
//! Keeps an MQTT client's subscriptions alive across reconnects and publishes
//! its liveness on `status/<client_id>`.
//!
//! ## Features
//!
//! - **Subscription Registry**: Remembers every subscription the application asked for
//! - **Replay on Reconnect**: Re-applies all of them after every (re)connection
//! - **Status Topic**: Retained `connected` after connect, `disconnected` as last will
//! - **Pluggable Transport**: `rumqttc` adapter included, any [`Transport`] works
//! - **Graceful Shutdown**: Offline status, clean disconnect and worker teardown
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mqtt_session::{SessionConfig, message_handler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::from_url("mqtt://localhost:1883?client_id=sensor-1")?;
//!     let (session, connection) = mqtt_session::connect(config).await?;
//!
//!     // Replayed automatically after every reconnect
//!     session
//!         .subscribe(
//!             "sensors/+/temperature",
//!             1u8,
//!             Some(message_handler(|msg| {
//!                 println!("{}: {:?}", msg.topic, msg.payload_str());
//!             })),
//!         )
//!         .await?;
//!
//!     session.publish("sensors/1/temperature", "21.5", 1u8, false).await?;
//!
//!     connection.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod qos;
pub mod registry;
pub mod session;
pub mod topic;
pub mod transport;

pub use config::{
	ConfigError, Credentials, EndpointConfig, SessionConfig, SessionSettings,
};
pub use qos::IntoQos;
pub use registry::{RegistrySnapshot, SubscriptionIntent, SubscriptionRegistry};
// Essential external types
pub use rumqttc::QoS;
pub use session::{
	ArgumentError, BatchError, ConnectionState, HookId, LifecycleHook,
	SessionBuilder, SessionConnection, SessionController, SessionError,
	StatusPublisher, lifecycle_hook,
};
use tracing::info;
pub use transport::{
	ConnectOptions, InboundMessage, MessageHandler, RumqttTransport,
	Transport, TransportError, TransportEvent, event_channel, message_handler,
};

/// Result type alias for operations that may fail with SessionError
pub type Result<T> = std::result::Result<T, SessionError>;

/// Connects a session over the bundled `rumqttc` transport.
///
/// Returns the controller and the connection handle. Keep the handle alive
/// for the session duration, call `connection.shutdown()` when done.
pub async fn connect(
	config: SessionConfig,
) -> Result<(
	SessionController<RumqttTransport>,
	SessionConnection<RumqttTransport>,
)> {
	let (events, event_rx) =
		event_channel(config.settings.event_channel_capacity);
	let transport = RumqttTransport::with_settings(events, &config.settings);
	info!(client_id = %config.client_id, "Starting MQTT session");
	let (controller, connection) =
		SessionController::builder(transport, config).start(event_rx);
	if let Err(err) = controller.connect().await {
		let _ = connection.shutdown().await;
		return Err(err);
	}
	Ok((controller, connection))
}

/// Prelude module for convenient imports
///
/// ```rust
/// use mqtt_session::prelude::*;
/// ```
pub mod prelude {
	//! Essential types for most applications

	pub use crate::{
		InboundMessage, MessageHandler, QoS, Result, SessionConfig,
		SessionConnection, SessionController, SessionError, message_handler,
	};
}

/// Error types used throughout the library
///
/// ```rust
/// use mqtt_session::errors::*;
/// ```
pub mod errors {
	//! All error types used in the library

	pub use crate::{
		ArgumentError, BatchError, ConfigError, SessionError, TransportError,
	};
}
