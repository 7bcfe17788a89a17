use super::packet::{Packet, PacketBuffer, SUBACK_FAILURE};
use super::registry::{SubscriptionId, SubscriptionRegistry, dispatch};
use super::topic::validate_pattern;
use super::{EventError, EventHandler};
use crate::config::ClientConfig;
use backoff::backoff::Constant;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use rand::Rng;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{
	MaybeTlsStream, WebSocketStream, connect_async,
	tungstenite::{Message, client::IntoClientRequest},
};
use tracing::{debug, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// QoS requested for every subscription.
const SUBSCRIBE_QOS: u8 = 1;

/// Connection settings for the broker.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
	/// WebSocket URL of the broker, `ws://` or `wss://`.
	pub url: Url,
	/// Interval between PINGREQs. The broker is considered gone after 1.5x this without traffic.
	pub keepalive: Duration,
	/// Fixed delay between reconnect attempts.
	pub reconnect_period: Duration,
	pub client_id: String,
}

impl ChannelConfig {
	pub fn new(url: Url) -> Self {
		Self {
			url,
			keepalive: Duration::from_secs(30),
			reconnect_period: Duration::from_millis(1000),
			client_id: generate_client_id(),
		}
	}

	pub fn from_client_config(config: &ClientConfig) -> Self {
		Self {
			url: config.broker_url.clone(),
			keepalive: config.keepalive,
			reconnect_period: config.reconnect_period,
			client_id: generate_client_id(),
		}
	}
}

fn generate_client_id() -> String {
	let mut bytes = [0u8; 4];
	rand::rng().fill(&mut bytes);
	format!("bank-twin-{}", hex::encode(bytes))
}

/// Observable state of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
	Connecting,
	Connected,
	/// Connection lost, waiting before the next attempt.
	Disconnected,
	/// `shutdown` was called; the channel will not reconnect.
	Closed,
}

enum Command {
	Subscribe(String),
	Unsubscribe(String),
	Shutdown,
}

struct Shared {
	registry: Mutex<SubscriptionRegistry>,
	status: watch::Sender<ChannelStatus>,
}

impl Shared {
	fn registry(&self) -> MutexGuard<'_, SubscriptionRegistry> {
		self.registry.lock().unwrap_or_else(|e| e.into_inner())
	}

	fn set_status(&self, status: ChannelStatus) {
		let previous = self.status.send_replace(status);
		if previous != status {
			debug!("Event channel status {:?} -> {:?}", previous, status);
		}
	}
}

/// Persistent subscription to the broker.
///
/// `spawn` starts a background task that connects, keeps the connection alive and reconnects
/// at a fixed interval whenever it drops. Subscriptions live in a registry owned by the channel,
/// not by the connection, so they are re-issued on every reconnect and each handler stays
/// registered exactly once.
#[derive(Clone)]
pub struct EventChannel {
	shared: Arc<Shared>,
	commands: mpsc::UnboundedSender<Command>,
	task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EventChannel {
	/// Start the connection task. Must be called inside a Tokio runtime.
	pub fn spawn(config: ChannelConfig) -> Self {
		let (commands, receiver) = mpsc::unbounded_channel();
		let (status, _) = watch::channel(ChannelStatus::Connecting);
		let shared = Arc::new(Shared {
			registry: Mutex::new(SubscriptionRegistry::new()),
			status,
		});

		info!(
			"Starting event channel to {} as {}",
			config.url, config.client_id
		);
		let task = tokio::spawn(run(config, shared.clone(), receiver));

		Self {
			shared,
			commands,
			task: Arc::new(Mutex::new(Some(task))),
		}
	}

	/// Register `handler` for every topic matching `pattern`.
	///
	/// Works whether or not the broker is currently reachable; the subscription is sent on the
	/// next (re)connect.
	pub fn subscribe(
		&self,
		pattern: &str,
		handler: Arc<dyn EventHandler>,
	) -> Result<SubscriptionId, EventError> {
		validate_pattern(pattern)?;
		if self.status() == ChannelStatus::Closed {
			return Err(EventError::Closed);
		}

		let (id, first_for_pattern) = self.shared.registry().add(pattern, handler);
		if first_for_pattern
			&& self
				.commands
				.send(Command::Subscribe(pattern.to_string()))
				.is_err()
		{
			self.shared.registry().remove(id);
			return Err(EventError::Closed);
		}
		Ok(id)
	}

	/// Remove a handler. Returns `false` if `id` was not registered.
	pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
		let Some((pattern, last_for_pattern)) = self.shared.registry().remove(id) else {
			return false;
		};
		if last_for_pattern {
			// A closed channel has no broker subscription left to remove.
			let _ = self.commands.send(Command::Unsubscribe(pattern));
		}
		true
	}

	pub fn subscription_count(&self) -> usize {
		self.shared.registry().len()
	}

	pub fn status(&self) -> ChannelStatus {
		*self.shared.status.borrow()
	}

	pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
		self.shared.status.subscribe()
	}

	/// Disconnect from the broker and stop reconnecting.
	pub async fn shutdown(&self) {
		let _ = self.commands.send(Command::Shutdown);
		let task = self
			.task
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.take();
		if let Some(task) = task {
			if let Err(e) = task.await {
				warn!("Event channel task ended abnormally: {}", e);
			}
		}
		self.shared.set_status(ChannelStatus::Closed);
	}
}

/// Connection task: connect, serve, wait, repeat until shut down.
async fn run(
	config: ChannelConfig,
	shared: Arc<Shared>,
	mut commands: mpsc::UnboundedReceiver<Command>,
) {
	loop {
		shared.set_status(ChannelStatus::Connecting);

		let config_ref = &config;
		let connect = backoff::future::retry_notify(
			Constant::new(config.reconnect_period),
			move || async move { open(config_ref).await.map_err(backoff::Error::transient) },
			|e: EventError, next: Duration| {
				warn!(
					"Broker connection to {} failed: {}; retrying in {:?}",
					config_ref.url, e, next
				);
			},
		);
		tokio::pin!(connect);

		let opened = loop {
			tokio::select! {
				result = &mut connect => break result,
				command = commands.recv() => match command {
					Some(Command::Shutdown) | None => {
						info!("Event channel shut down before connecting");
						shared.set_status(ChannelStatus::Closed);
						return;
					}
					// Covered by the registry once the connection is up.
					Some(_) => continue,
				},
			}
		};

		let mut connection = match opened {
			Ok(connection) => connection,
			Err(e) => {
				warn!("Giving up on connection attempt: {}", e);
				if wait_or_shutdown(config.reconnect_period, &mut commands).await {
					shared.set_status(ChannelStatus::Closed);
					return;
				}
				continue;
			}
		};

		info!("Connected to broker at {}", config.url);
		shared.set_status(ChannelStatus::Connected);

		match serve(&mut connection, &config, &shared, &mut commands).await {
			Ok(()) => {
				info!("Event channel shut down");
				shared.set_status(ChannelStatus::Closed);
				return;
			}
			Err(e) => {
				warn!("Broker connection lost: {}", e);
				shared.set_status(ChannelStatus::Disconnected);
				if wait_or_shutdown(config.reconnect_period, &mut commands).await {
					shared.set_status(ChannelStatus::Closed);
					return;
				}
			}
		}
	}
}

/// Sleep for `period`, returning `true` early if a shutdown arrives meanwhile.
async fn wait_or_shutdown(
	period: Duration,
	commands: &mut mpsc::UnboundedReceiver<Command>,
) -> bool {
	let sleep = tokio::time::sleep(period);
	tokio::pin!(sleep);
	loop {
		tokio::select! {
			_ = &mut sleep => return false,
			command = commands.recv() => match command {
				Some(Command::Shutdown) | None => return true,
				Some(_) => continue,
			},
		}
	}
}

struct Connection {
	sink: SplitSink<WsStream, Message>,
	stream: SplitStream<WsStream>,
	buffer: PacketBuffer,
	last_packet_id: u16,
}

impl Connection {
	async fn send(&mut self, packet: Packet) -> Result<(), EventError> {
		self.sink.send(Message::Binary(packet.encode())).await?;
		Ok(())
	}

	/// Next packet id, skipping zero on wrap.
	fn next_packet_id(&mut self) -> u16 {
		self.last_packet_id = self.last_packet_id.wrapping_add(1);
		if self.last_packet_id == 0 {
			self.last_packet_id = 1;
		}
		self.last_packet_id
	}

	async fn subscribe(&mut self, patterns: Vec<String>) -> Result<(), EventError> {
		if patterns.is_empty() {
			return Ok(());
		}
		let packet_id = self.next_packet_id();
		debug!("Subscribing to {:?} (packet {})", patterns, packet_id);
		self.send(Packet::Subscribe {
			packet_id,
			filters: patterns
				.into_iter()
				.map(|pattern| (pattern, SUBSCRIBE_QOS))
				.collect(),
		})
		.await
	}

	async fn unsubscribe(&mut self, pattern: String) -> Result<(), EventError> {
		let packet_id = self.next_packet_id();
		debug!("Unsubscribing from {} (packet {})", pattern, packet_id);
		self.send(Packet::Unsubscribe {
			packet_id,
			filters: vec![pattern],
		})
		.await
	}
}

/// Open the WebSocket and complete the MQTT handshake.
async fn open(config: &ChannelConfig) -> Result<Connection, EventError> {
	debug!("Attempting broker connection to: {}", config.url);

	let mut request = config.url.as_str().into_client_request()?;
	request.headers_mut().insert(
		"Sec-WebSocket-Protocol",
		"mqtt".parse().map_err(|_| {
			EventError::Protocol("Invalid WebSocket subprotocol header value".to_string())
		})?,
	);

	let (ws_stream, response) = connect_async(request).await?;
	debug!(
		"WebSocket connection established, response status: {}",
		response.status()
	);
	let (sink, stream) = ws_stream.split();
	let mut connection = Connection {
		sink,
		stream,
		buffer: PacketBuffer::new(),
		last_packet_id: 0,
	};

	let keep_alive = config.keepalive.as_secs().clamp(1, u16::MAX as u64) as u16;
	connection
		.send(Packet::Connect {
			client_id: config.client_id.clone(),
			keep_alive,
			clean_session: true,
		})
		.await?;

	let ack = tokio::time::timeout(
		config.keepalive,
		read_packet(&mut connection.stream, &mut connection.buffer),
	)
	.await
	.map_err(|_| EventError::KeepaliveTimeout(config.keepalive))??;

	match ack {
		Packet::ConnAck { return_code: 0, .. } => Ok(connection),
		Packet::ConnAck { return_code, .. } => Err(EventError::ConnectionRefused(return_code)),
		other => Err(EventError::Protocol(format!(
			"expected CONNACK, got {:?}",
			other
		))),
	}
}

/// Serve one live connection. `Ok` means shutdown was requested; any error means the connection
/// is gone and the caller should reconnect.
async fn serve(
	connection: &mut Connection,
	config: &ChannelConfig,
	shared: &Shared,
	commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Result<(), EventError> {
	// Subscribe/unsubscribe requests queued while offline are already reflected in the registry.
	while let Ok(command) = commands.try_recv() {
		if let Command::Shutdown = command {
			return disconnect(connection).await;
		}
	}

	let patterns = shared.registry().patterns();
	connection.subscribe(patterns).await?;

	let deadline = config.keepalive.mul_f32(1.5);
	let mut last_inbound = Instant::now();
	let mut ping = tokio::time::interval_at(Instant::now() + config.keepalive, config.keepalive);

	loop {
		tokio::select! {
			packet = read_packet(&mut connection.stream, &mut connection.buffer) => {
				let packet = packet?;
				last_inbound = Instant::now();
				handle_packet(connection, shared, packet).await?;
			}
			_ = ping.tick() => {
				if last_inbound.elapsed() > deadline {
					return Err(EventError::KeepaliveTimeout(deadline));
				}
				connection.send(Packet::PingReq).await?;
			}
			command = commands.recv() => match command {
				Some(Command::Subscribe(pattern)) => connection.subscribe(vec![pattern]).await?,
				Some(Command::Unsubscribe(pattern)) => connection.unsubscribe(pattern).await?,
				Some(Command::Shutdown) | None => return disconnect(connection).await,
			},
		}
	}
}

async fn disconnect(connection: &mut Connection) -> Result<(), EventError> {
	if let Err(e) = connection.send(Packet::Disconnect).await {
		debug!("Failed to send DISCONNECT: {}", e);
	}
	if let Err(e) = connection.sink.close().await {
		debug!("Failed to close WebSocket: {}", e);
	}
	Ok(())
}

async fn handle_packet(
	connection: &mut Connection,
	shared: &Shared,
	packet: Packet,
) -> Result<(), EventError> {
	match packet {
		Packet::Publish {
			topic,
			qos,
			packet_id,
			payload,
			..
		} => {
			if qos == 1 {
				if let Some(packet_id) = packet_id {
					connection.send(Packet::PubAck { packet_id }).await?;
				}
			}
			let handlers = shared.registry().matching(&topic);
			let invoked = dispatch(handlers, &topic, &payload).await;
			debug!("Message on {} delivered to {} handler(s)", topic, invoked);
		}
		Packet::SubAck {
			packet_id,
			return_codes,
		} => {
			if return_codes.contains(&SUBACK_FAILURE) {
				warn!(
					"Broker rejected subscription (packet {}): {:?}",
					packet_id, return_codes
				);
			} else {
				debug!("Subscription acknowledged (packet {})", packet_id);
			}
		}
		Packet::UnsubAck { .. } | Packet::PingResp => {}
		other => debug!("Ignoring unexpected packet {:?}", other),
	}
	Ok(())
}

/// Read the next complete packet. Cancel-safe: bytes already received stay in `buffer`.
async fn read_packet<S>(stream: &mut S, buffer: &mut PacketBuffer) -> Result<Packet, EventError>
where
	S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
	loop {
		if let Some(packet) = buffer.next_packet()? {
			return Ok(packet);
		}
		match stream.next().await {
			Some(Ok(Message::Binary(bytes))) => buffer.extend(&bytes),
			Some(Ok(Message::Close(_))) | None => return Err(EventError::ConnectionClosed),
			Some(Ok(_)) => continue,
			Some(Err(e)) => return Err(e.into()),
		}
	}
}
