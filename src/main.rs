//! `bank-twin`: command line front end for the bank simulator client.

use bank_twin_client::utils::{format_amount, format_summary};
use bank_twin_client::{
	AccountApi, ApiError, AuthService, CacheSnapshot, ChannelConfig, ChannelStatus, ClientConfig,
	ConfigError, EventChannel, EventError, FileTokenStorage, RequestClient, SessionStore,
	SyncOrchestrator, TransactionError, TransactionService,
};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Client for the bank simulator and its digital twin
#[derive(Parser)]
#[command(name = "bank-twin", version, about, long_about = None)]
struct Cli {
	/// REST API base URL (overrides BANK_API_URL)
	#[arg(long, global = true)]
	api_url: Option<String>,

	/// Broker WebSocket URL (overrides BANK_MQTT_WS_URL)
	#[arg(long, global = true)]
	broker_url: Option<String>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Create a new user
	Register { username: String, password: String },

	/// Log in and persist the session token
	Login { username: String, password: String },

	/// Forget the persisted session token
	Logout,

	/// Show the current balance
	Balance,

	/// Deposit into your account
	Deposit { amount: Decimal },

	/// Transfer to another user via pix
	Pix { to_user: String, amount: Decimal },

	/// Show the digital twin summary
	Summary,

	/// Show your recorded account activity
	Activity,

	/// Check that the API is reachable
	Ping,

	/// Keep the cached view fresh from broker events until Ctrl-C
	Watch,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
	#[error("Configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("{0}")]
	Api(#[from] ApiError),

	#[error("{0}")]
	Transaction(#[from] TransactionError),

	#[error("Event channel error: {0}")]
	Event(#[from] EventError),

	#[error("Not logged in")]
	NotLoggedIn,
}

impl CliError {
	/// Message shown to the user; the full error goes to the log.
	fn user_message(&self) -> String {
		match self {
			CliError::Api(e) => e.user_message("Request failed, please try again"),
			CliError::Transaction(e) => e.user_message("Transaction failed, please try again"),
			CliError::NotLoggedIn => "Not logged in, run `bank-twin login` first".to_string(),
			other => other.to_string(),
		}
	}
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,bank_twin_client=info")),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_writer(std::io::stderr)
		.init();

	let cli = Cli::parse();
	match run(cli).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!("{}", e);
			eprintln!("{}", e.user_message());
			ExitCode::FAILURE
		}
	}
}

fn load_config(cli: &Cli) -> Result<ClientConfig, ConfigError> {
	let mut config = ClientConfig::from_env()?;
	if let Some(url) = &cli.api_url {
		config = config.with_api_base_url(url)?;
	}
	if let Some(url) = &cli.broker_url {
		config = config.with_broker_url(url)?;
	}
	Ok(config)
}

async fn run(cli: Cli) -> Result<(), CliError> {
	let config = load_config(&cli)?;
	let storage = FileTokenStorage::new(config.session_file.clone(), config.storage_key.clone());
	let session = SessionStore::load(Arc::new(storage)).await;
	let client = RequestClient::from_config(&config, session.clone())?;

	match cli.command {
		Commands::Register { username, password } => {
			let response = AuthService::new(client).register(&username, &password).await?;
			info!("Registered {}", username);
			println!("{}", response);
		}
		Commands::Login { username, password } => {
			AuthService::new(client).login(&username, &password).await?;
			println!("Logged in as {}", username);
		}
		Commands::Logout => {
			if AuthService::new(client).logout().await {
				println!("Logged out");
			} else {
				println!("No active session");
			}
		}
		Commands::Balance => {
			require_session(&session)?;
			let balance = AccountApi::new(client).balance().await?;
			println!("{}", format_amount(balance));
		}
		Commands::Deposit { amount } => {
			require_session(&session)?;
			let result = TransactionService::new(client)
				.deposit(amount)
				.await?;
			println!("New balance: {}", format_amount(result.new_balance));
		}
		Commands::Pix { to_user, amount } => {
			require_session(&session)?;
			let result = TransactionService::new(client)
				.transfer(&to_user, amount)
				.await?;
			println!("New balance: {}", format_amount(result.new_balance));
		}
		Commands::Summary => {
			require_session(&session)?;
			let summary = AccountApi::new(client).summary().await?;
			println!("{}", format_summary(&summary));
		}
		Commands::Activity => {
			require_session(&session)?;
			for entry in AccountApi::new(client).activity().await? {
				println!("{}  {}  {}", entry.timestamp, entry.user, entry.action);
			}
		}
		Commands::Ping => {
			let pong = AccountApi::new(client).ping().await?;
			println!("{}", if pong { "pong" } else { "no pong" });
		}
		Commands::Watch => {
			require_session(&session)?;
			watch(&config, client).await?;
		}
	}
	Ok(())
}

fn require_session(session: &SessionStore) -> Result<(), CliError> {
	if session.is_authenticated() {
		Ok(())
	} else {
		Err(CliError::NotLoggedIn)
	}
}

/// Follow broker events and print every refreshed snapshot until Ctrl-C.
async fn watch(config: &ClientConfig, client: RequestClient) -> Result<(), CliError> {
	let orchestrator = SyncOrchestrator::from_api(AccountApi::new(client), config.event_topic.clone());
	let channel = EventChannel::spawn(ChannelConfig::from_client_config(config));
	orchestrator.attach(&channel)?;
	orchestrator.start();

	let mut snapshots = orchestrator.watch();
	let mut status = channel.watch_status();
	let ctrl_c = tokio::signal::ctrl_c();
	tokio::pin!(ctrl_c);
	loop {
		tokio::select! {
			changed = snapshots.changed() => {
				if changed.is_err() {
					break;
				}
				let snapshot = snapshots.borrow_and_update().clone();
				print_snapshot(&snapshot);
			}
			changed = status.changed() => {
				if changed.is_err() {
					break;
				}
				let current = *status.borrow_and_update();
				match current {
					ChannelStatus::Connected => info!("Listening on {}", orchestrator.topic()),
					ChannelStatus::Disconnected => warn!("Broker connection lost, reconnecting"),
					ChannelStatus::Connecting | ChannelStatus::Closed => {}
				}
			}
			signal = &mut ctrl_c => {
				if let Err(e) = signal {
					error!("Failed to listen for Ctrl-C: {}", e);
				}
				break;
			}
		}
	}

	channel.shutdown().await;
	Ok(())
}

fn print_snapshot(snapshot: &CacheSnapshot) {
	let balance = snapshot
		.balance
		.map(format_amount)
		.unwrap_or_else(|| "-".to_string());
	let when = snapshot
		.last_refresh_at
		.map(|t| t.format("%H:%M:%S").to_string())
		.unwrap_or_else(|| "never".to_string());
	let marker = if snapshot.stale { " (stale)" } else { "" };
	println!("[{}] balance {}{}", when, balance, marker);
	if let Some(e) = &snapshot.last_error {
		if snapshot.stale {
			println!("  last refresh failed: {}", e);
		}
	}
	if let Some(summary) = &snapshot.summary {
		for line in format_summary(summary).lines() {
			println!("  {}", line);
		}
	}
}
