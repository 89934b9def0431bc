//! Configuration for session initialization
//!
//! Values come from a configuration collaborator as plain key/value pairs,
//! from `MQTT_*` environment variables (with `.env` support), or from a single
//! broker URL.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use rumqttc::QoS;
use thiserror::Error;

use crate::qos::IntoQos;

/// Prefix of the generated client identifier
const CLIENT_ID_PREFIX: &str = "mqtt-session";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;

/// Errors raised while loading configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
	/// A required value is absent
	#[error("Missing configuration key '{0}'")]
	MissingKey(String),

	/// A value could not be parsed
	#[error("Invalid value '{value}' for '{key}': {reason}")]
	InvalidValue {
		/// Configuration key
		key: String,
		/// Value as given
		value: String,
		/// Parse failure
		reason: String,
	},

	/// Broker URL is malformed
	#[error("Invalid broker URL '{url}': {reason}")]
	InvalidUrl {
		/// URL as given
		url: String,
		/// What is wrong with it
		reason: String,
	},
}

impl ConfigError {
	fn invalid_value(
		key: &str,
		value: &str,
		reason: impl Into<String>,
	) -> Self {
		Self::InvalidValue {
			key: key.to_string(),
			value: value.to_string(),
			reason: reason.into(),
		}
	}

	fn invalid_url(url: &str, reason: impl Into<String>) -> Self {
		Self::InvalidUrl {
			url: url.to_string(),
			reason: reason.into(),
		}
	}
}

/// Broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
	/// Broker host name or address
	pub host: String,
	/// Broker port
	pub port: u16,
	/// Connect over TLS
	pub tls: bool,
}

impl EndpointConfig {
	/// Creates a plain TCP endpoint
	pub fn new(host: impl Into<String>, port: u16) -> Self {
		Self {
			host: host.into(),
			port,
			tls: false,
		}
	}

	/// URI of the broker, `tcp://host:port` or `ssl://host:port`
	pub fn server_uri(&self) -> String {
		let scheme = if self.tls { "ssl" } else { "tcp" };
		format!("{scheme}://{}:{}", self.host, self.port)
	}
}

impl Default for EndpointConfig {
	fn default() -> Self {
		Self::new(DEFAULT_HOST, DEFAULT_PORT)
	}
}

/// Username/password pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
	/// Broker username, never blank
	pub username: String,
	/// Broker password
	pub password: String,
}

impl Credentials {
	/// Returns `None` when the username is blank
	pub fn new(
		username: impl Into<String>,
		password: impl Into<String>,
	) -> Option<Self> {
		let username = username.into();
		if username.trim().is_empty() {
			return None;
		}
		Some(Self {
			username,
			password: password.into(),
		})
	}
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials")
			.field("username", &self.username)
			.field("password", &"<redacted>")
			.finish()
	}
}

/// Session-level behavior and sizing settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
	/// Capacity of the transport event channel
	pub event_channel_capacity: usize,
	/// Capacity of the rumqttc request channel
	pub request_channel_capacity: usize,
	/// How long `connect` waits for the broker's CONNACK
	pub connection_timeout_millis: u64,
	/// Status payload published after every (re)connection
	pub status_online_payload: String,
	/// Status payload used for the last will
	pub status_offline_payload: String,
	/// Publish the offline status before an explicit disconnect
	pub publish_offline_on_disconnect: bool,
}

impl Default for SessionSettings {
	fn default() -> Self {
		Self {
			event_channel_capacity: 100,
			request_channel_capacity: 10,
			connection_timeout_millis: 5000,
			status_online_payload: "connected".to_string(),
			status_offline_payload: "disconnected".to_string(),
			publish_offline_on_disconnect: true,
		}
	}
}

/// Complete session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
	/// Broker address
	pub endpoint: EndpointConfig,
	/// Optional credentials
	pub credentials: Option<Credentials>,
	/// MQTT client identifier, also names the status topic
	pub client_id: String,
	/// QoS for status messages and default-QoS operations
	pub default_qos: QoS,
	/// Let the transport reconnect after a connection loss
	pub automatic_reconnect: bool,
	/// Start each connection without a broker-side session
	pub clean_session: bool,
	/// Keep-alive interval
	pub keep_alive: Duration,
	/// Session behavior settings
	pub settings: SessionSettings,
}

impl SessionConfig {
	/// Creates config with default settings. A blank `client_id` is replaced
	/// by a generated one.
	pub fn new(client_id: &str, host: &str, port: u16) -> Self {
		Self {
			endpoint: EndpointConfig::new(host, port),
			credentials: None,
			client_id: client_id_or_generated(client_id),
			default_qos: QoS::AtLeastOnce,
			automatic_reconnect: true,
			clean_session: true,
			keep_alive: Duration::from_secs(30),
			settings: SessionSettings::default(),
		}
	}

	/// Creates config for localhost:1883
	pub fn localhost(client_id: &str) -> Self {
		Self::new(client_id, "localhost", DEFAULT_PORT)
	}

	/// Parses configuration from a broker URL
	///
	/// Supports `tcp://`, `mqtt://`, `ssl://` and `mqtts://` with an optional
	/// `client_id` query parameter.
	pub fn from_url(url: &str) -> Result<Self, ConfigError> {
		let parsed = parse_broker_url(url)?;
		let tls = parsed
			.tls
			.ok_or_else(|| ConfigError::invalid_url(url, "missing scheme"))?;
		let port = parsed.port.unwrap_or(if tls {
			DEFAULT_TLS_PORT
		} else {
			DEFAULT_PORT
		});
		let mut config = Self::new(
			parsed.client_id.as_deref().unwrap_or(""),
			&parsed.host,
			port,
		);
		config.endpoint.tls = tls;
		Ok(config)
	}

	/// Builds configuration from key/value pairs.
	///
	/// Recognised keys: `broker_url`, `port`, `username`, `password`, `tls`,
	/// `client_id`, `default_qos`, `automatic_reconnect`, `clean_session`,
	/// `keep_alive_secs`. Unknown keys are ignored.
	pub fn from_properties<I, K, V>(pairs: I) -> Result<Self, ConfigError>
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		let props: HashMap<String, String> = pairs
			.into_iter()
			.map(|(k, v)| (k.into(), v.into()))
			.collect();
		let get = |key: &str| props.get(key).map(|v| v.trim());

		let broker_url = get("broker_url").unwrap_or(DEFAULT_HOST);
		let parsed = parse_broker_url(broker_url)?;

		let tls = match get("tls") {
			| Some(value) => parse_bool("tls", value)?,
			| None => parsed.tls.unwrap_or(false),
		};
		let port = match get("port") {
			| Some(value) => value.parse::<u16>().map_err(|e| {
				ConfigError::invalid_value("port", value, e.to_string())
			})?,
			| None => parsed.port.unwrap_or(if tls {
				DEFAULT_TLS_PORT
			} else {
				DEFAULT_PORT
			}),
		};
		let client_id = get("client_id")
			.map(str::to_string)
			.or(parsed.client_id)
			.unwrap_or_default();

		let mut config = Self::new(&client_id, &parsed.host, port);
		config.endpoint.tls = tls;
		config.credentials = Credentials::new(
			get("username").unwrap_or_default(),
			get("password").unwrap_or_default(),
		);
		if let Some(value) = get("default_qos") {
			config.default_qos = value
				.parse::<i32>()
				.map_err(|e| e.to_string())
				.and_then(|level| level.into_qos().map_err(|e| e.to_string()))
				.map_err(|reason| {
					ConfigError::invalid_value("default_qos", value, reason)
				})?;
		}
		if let Some(value) = get("automatic_reconnect") {
			config.automatic_reconnect =
				parse_bool("automatic_reconnect", value)?;
		}
		if let Some(value) = get("clean_session") {
			config.clean_session = parse_bool("clean_session", value)?;
		}
		if let Some(value) = get("keep_alive_secs") {
			let secs = value.parse::<u64>().map_err(|e| {
				ConfigError::invalid_value("keep_alive_secs", value, e.to_string())
			})?;
			config.keep_alive = Duration::from_secs(secs);
		}
		Ok(config)
	}

	/// Builds configuration from `MQTT_*` environment variables.
	///
	/// `.env` is loaded first; `MQTT_BROKER_URL` maps to `broker_url`,
	/// `MQTT_CLIENT_ID` to `client_id` and so on.
	pub fn from_env() -> Result<Self, ConfigError> {
		dotenv::dotenv().ok();
		Self::from_env_vars(std::env::vars())
	}

	/// Same as [`from_env`](Self::from_env) over an explicit variable list
	pub fn from_env_vars<I>(vars: I) -> Result<Self, ConfigError>
	where I: IntoIterator<Item = (String, String)> {
		Self::from_properties(vars.into_iter().filter_map(|(key, value)| {
			key.strip_prefix("MQTT_")
				.map(|rest| (rest.to_ascii_lowercase(), value))
		}))
	}

	/// Topic the status publisher and last will use
	pub fn status_topic(&self) -> String {
		format!("status/{}", self.client_id)
	}
}

fn client_id_or_generated(client_id: &str) -> String {
	let trimmed = client_id.trim();
	if trimmed.is_empty() {
		generate_client_id()
	} else {
		trimmed.to_string()
	}
}

/// Generates a unique client identifier
pub fn generate_client_id() -> String {
	let uuid = uuid::Uuid::new_v4().simple().to_string();
	format!("{CLIENT_ID_PREFIX}_{}", &uuid[.. 8])
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
	match value.to_ascii_lowercase().as_str() {
		| "true" | "1" | "yes" | "on" => Ok(true),
		| "false" | "0" | "no" | "off" | "" => Ok(false),
		| _ => Err(ConfigError::invalid_value(key, value, "expected a boolean")),
	}
}

#[derive(Debug, Default)]
struct ParsedUrl {
	/// `None` when no scheme was given
	tls: Option<bool>,
	host: String,
	port: Option<u16>,
	client_id: Option<String>,
}

fn parse_broker_url(url: &str) -> Result<ParsedUrl, ConfigError> {
	let mut parsed = ParsedUrl::default();

	let rest = match url.split_once("://") {
		| Some((scheme, rest)) => {
			parsed.tls = Some(match scheme.to_ascii_lowercase().as_str() {
				| "tcp" | "mqtt" => false,
				| "ssl" | "mqtts" | "tls" => true,
				| other => {
					return Err(ConfigError::invalid_url(
						url,
						format!("unsupported scheme '{other}'"),
					));
				}
			});
			rest
		}
		| None => url,
	};

	let (authority, query) = match rest.split_once('?') {
		| Some((authority, query)) => (authority, Some(query)),
		| None => (rest, None),
	};
	let authority = authority.trim_end_matches('/');

	match authority.rsplit_once(':') {
		| Some((host, port)) => {
			parsed.host = host.to_string();
			parsed.port = Some(port.parse::<u16>().map_err(|_| {
				ConfigError::invalid_url(url, format!("invalid port '{port}'"))
			})?);
		}
		| None => parsed.host = authority.to_string(),
	}
	if parsed.host.is_empty() {
		return Err(ConfigError::invalid_url(url, "missing host"));
	}

	if let Some(query) = query {
		parsed.client_id = query
			.split('&')
			.filter_map(|pair| pair.split_once('='))
			.find(|(key, _)| *key == "client_id")
			.map(|(_, value)| value.to_string());
	}
	Ok(parsed)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults_from_empty_properties() {
		let config =
			SessionConfig::from_properties(Vec::<(String, String)>::new())
				.unwrap();
		assert_eq!(config.endpoint, EndpointConfig::new("127.0.0.1", 1883));
		assert_eq!(config.endpoint.server_uri(), "tcp://127.0.0.1:1883");
		assert!(config.credentials.is_none());
		assert!(config.client_id.starts_with("mqtt-session_"));
		assert_eq!(config.default_qos, QoS::AtLeastOnce);
		assert!(config.automatic_reconnect);
		assert!(config.clean_session);
	}

	#[test]
	fn test_full_properties() {
		let config = SessionConfig::from_properties([
			("broker_url", "broker.local"),
			("port", "8883"),
			("username", "device"),
			("password", "secret"),
			("tls", "true"),
			("client_id", "sensor-7"),
			("default_qos", "2"),
			("clean_session", "false"),
			("keep_alive_secs", "10"),
			("unrelated", "ignored"),
		])
		.unwrap();
		assert_eq!(config.endpoint.server_uri(), "ssl://broker.local:8883");
		assert_eq!(
			config.credentials,
			Credentials::new("device", "secret")
		);
		assert_eq!(config.client_id, "sensor-7");
		assert_eq!(config.status_topic(), "status/sensor-7");
		assert_eq!(config.default_qos, QoS::ExactlyOnce);
		assert!(!config.clean_session);
		assert_eq!(config.keep_alive, Duration::from_secs(10));
	}

	#[test]
	fn test_blank_username_means_no_credentials() {
		let config = SessionConfig::from_properties([
			("username", "   "),
			("password", "secret"),
		])
		.unwrap();
		assert!(config.credentials.is_none());
	}

	#[test]
	fn test_broker_url_with_scheme_and_port() {
		let config =
			SessionConfig::from_properties([("broker_url", "ssl://example.com:9000")])
				.unwrap();
		assert!(config.endpoint.tls);
		assert_eq!(config.endpoint.port, 9000);
		assert_eq!(config.endpoint.host, "example.com");
	}

	#[test]
	fn test_explicit_port_wins_over_url_port() {
		let config = SessionConfig::from_properties([
			("broker_url", "tcp://example.com:9000"),
			("port", "1884"),
		])
		.unwrap();
		assert_eq!(config.endpoint.port, 1884);
	}

	#[test]
	fn test_invalid_values_rejected() {
		assert!(matches!(
			SessionConfig::from_properties([("port", "70000")]),
			Err(ConfigError::InvalidValue { .. })
		));
		assert!(matches!(
			SessionConfig::from_properties([("default_qos", "5")]),
			Err(ConfigError::InvalidValue { .. })
		));
		assert!(matches!(
			SessionConfig::from_properties([("tls", "maybe")]),
			Err(ConfigError::InvalidValue { .. })
		));
		assert!(matches!(
			SessionConfig::from_properties([("broker_url", "ws://host")]),
			Err(ConfigError::InvalidUrl { .. })
		));
	}

	#[test]
	fn test_from_url() {
		let config =
			SessionConfig::from_url("mqtts://broker.hivemq.com?client_id=abc")
				.unwrap();
		assert!(config.endpoint.tls);
		assert_eq!(config.endpoint.port, 8883);
		assert_eq!(config.client_id, "abc");

		assert!(SessionConfig::from_url("broker.hivemq.com:1883").is_err());
	}

	#[test]
	fn test_from_env_vars() {
		let vars = vec![
			("MQTT_BROKER_URL".to_string(), "tcp://10.0.0.5".to_string()),
			("MQTT_CLIENT_ID".to_string(), "gateway".to_string()),
			("MQTT_DEFAULT_QOS".to_string(), "0".to_string()),
			("HOME".to_string(), "/root".to_string()),
		];
		let config = SessionConfig::from_env_vars(vars).unwrap();
		assert_eq!(config.endpoint.server_uri(), "tcp://10.0.0.5:1883");
		assert_eq!(config.client_id, "gateway");
		assert_eq!(config.default_qos, QoS::AtMostOnce);
	}

	#[test]
	fn test_credentials_debug_redacts_password() {
		let credentials = Credentials::new("user", "hunter2").unwrap();
		let rendered = format!("{credentials:?}");
		assert!(rendered.contains("user"));
		assert!(!rendered.contains("hunter2"));
	}
}
