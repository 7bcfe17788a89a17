//! Client configuration.
//!
//! One `ClientConfig` carries every address and timing knob the client needs. Defaults match a
//! local development stack (API on port 8000, broker WebSocket listener on port 9001) and each
//! field can be overridden through the environment.

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Storage key under which the bearer token is persisted.
pub const DEFAULT_STORAGE_KEY: &str = "token";
/// Topic pattern carrying per-account bank events.
pub const DEFAULT_EVENT_TOPIC: &str = "banco/+/events";

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_BROKER_URL: &str = "ws://localhost:9001";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("Invalid URL in {name}: {source}")]
	InvalidUrl {
		name: &'static str,
		#[source]
		source: url::ParseError,
	},

	#[error("Invalid value for {name}: {value}")]
	InvalidNumber { name: &'static str, value: String },

	#[error("Unsupported scheme for {name}: {scheme}")]
	UnsupportedScheme { name: &'static str, scheme: String },
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// Base address every REST path is resolved against.
	pub api_base_url: Url,
	/// WebSocket URL of the MQTT broker.
	pub broker_url: Url,
	/// Topic pattern whose messages trigger a refresh.
	pub event_topic: String,
	/// File holding the persisted session.
	pub session_file: PathBuf,
	/// Key of the token entry inside the session file.
	pub storage_key: String,
	/// Timeout applied to each HTTP request.
	pub request_timeout: Duration,
	/// MQTT keepalive interval.
	pub keepalive: Duration,
	/// Fixed delay between broker reconnect attempts.
	pub reconnect_period: Duration,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			api_base_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
			broker_url: Url::parse(DEFAULT_BROKER_URL).expect("default broker URL is valid"),
			event_topic: DEFAULT_EVENT_TOPIC.to_string(),
			session_file: default_session_file(),
			storage_key: DEFAULT_STORAGE_KEY.to_string(),
			request_timeout: Duration::from_secs(30),
			keepalive: Duration::from_secs(30),
			reconnect_period: Duration::from_millis(1000),
		}
	}
}

impl ClientConfig {
	/// Build a configuration from the process environment, falling back to defaults.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Build a configuration from an arbitrary variable lookup.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let mut config = Self::default();

		if let Some(value) = lookup("BANK_API_URL") {
			config = config.with_api_base_url(&value)?;
		}
		if let Some(value) = lookup("BANK_MQTT_WS_URL") {
			config = config.with_broker_url(&value)?;
		}
		if let Some(value) = lookup("BANK_EVENT_TOPIC") {
			config.event_topic = value;
		}
		if let Some(value) = lookup("BANK_SESSION_FILE") {
			config.session_file = PathBuf::from(value);
		}
		if let Some(value) = lookup("BANK_REQUEST_TIMEOUT_SECS") {
			config.request_timeout =
				Duration::from_secs(parse_number("BANK_REQUEST_TIMEOUT_SECS", &value)?);
		}
		if let Some(value) = lookup("BANK_MQTT_KEEPALIVE_SECS") {
			config.keepalive = Duration::from_secs(parse_number("BANK_MQTT_KEEPALIVE_SECS", &value)?);
		}
		if let Some(value) = lookup("BANK_MQTT_RECONNECT_MS") {
			config.reconnect_period =
				Duration::from_millis(parse_number("BANK_MQTT_RECONNECT_MS", &value)?);
		}

		Ok(config)
	}

	pub fn with_api_base_url(mut self, value: &str) -> Result<Self, ConfigError> {
		let mut url = parse_url("BANK_API_URL", value, &["http", "https"])?;
		// Url::join drops the last path segment unless the base ends with a slash
		if !url.path().ends_with('/') {
			let path = format!("{}/", url.path());
			url.set_path(&path);
		}
		self.api_base_url = url;
		Ok(self)
	}

	pub fn with_broker_url(mut self, value: &str) -> Result<Self, ConfigError> {
		let url = parse_url("BANK_MQTT_WS_URL", value, &["ws", "wss"])?;
		self.broker_url = url;
		Ok(self)
	}
}

fn parse_url(name: &'static str, value: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
	let url = Url::parse(value.trim()).map_err(|source| ConfigError::InvalidUrl { name, source })?;
	if !schemes.contains(&url.scheme()) {
		return Err(ConfigError::UnsupportedScheme {
			name,
			scheme: url.scheme().to_string(),
		});
	}
	Ok(url)
}

fn parse_number(name: &'static str, value: &str) -> Result<u64, ConfigError> {
	value
		.trim()
		.parse::<u64>()
		.ok()
		.filter(|n| *n > 0)
		.ok_or_else(|| ConfigError::InvalidNumber {
			name,
			value: value.to_string(),
		})
}

fn default_session_file() -> PathBuf {
	session_file_under(dirs::home_dir())
}

/// `<home>/.bank-twin/session.json`, or a file in the working directory without a home.
fn session_file_under(home: Option<PathBuf>) -> PathBuf {
	match home {
		Some(home) => home.join(".bank-twin").join("session.json"),
		None => {
			warn!(
				"Could not determine home directory; persisting the session in the working directory"
			);
			PathBuf::from(".bank-twin-session.json")
		}
	}
}
