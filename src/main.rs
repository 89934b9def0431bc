use mqtt_session::{SessionConfig, lifecycle_hook, message_handler};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

async fn run() -> Result<(), Box<dyn std::error::Error>> {
	// Reads MQTT_BROKER_URL, MQTT_CLIENT_ID, ... (and .env)
	let config = SessionConfig::from_env()?;
	let topic = std::env::var("DEMO_TOPIC")
		.unwrap_or_else(|_| "demo/#".to_string());
	info!(
		client_id = %config.client_id,
		server_uri = %config.endpoint.server_uri(),
		status_topic = %config.status_topic(),
		"Starting MQTT session demo"
	);

	let (session, connection) = mqtt_session::connect(config).await?;
	session.add_on_disconnect_hook(lifecycle_hook(|| async {
		warn!("Broker connection lost, waiting for automatic reconnect");
	}));

	session
		.subscribe(
			&topic,
			1u8,
			Some(message_handler(|message| {
				info!(
					topic = %message.topic,
					payload = message.payload_str().unwrap_or("<binary>"),
					retain = message.retain,
					"Message received"
				);
			})),
		)
		.await?;
	session.wait_connected().await;
	info!(topic = %topic, "Subscribed, press Ctrl+C to exit");

	tokio::signal::ctrl_c().await?;
	info!("Shutting down");
	connection.shutdown().await?;
	Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	dotenv::dotenv().ok();
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "info".into()),
		)
		.with(
			tracing_subscriber::fmt::layer()
				.with_target(true)
				.with_thread_ids(false)
				.compact(),
		)
		.init();

	let result = run().await;
	if let Err(err) = &result {
		error!(error = %err, "Demo failed");
	}
	result
}
