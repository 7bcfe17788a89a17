use crate::session::SessionError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};

/// Durable home of the bearer token.
///
/// Implementations keep a single string under a well-known key so a restarted process picks up
/// the session it left behind.
#[async_trait::async_trait]
pub trait TokenStorage: Send + Sync {
	async fn load(&self) -> Result<Option<String>, SessionError>;
	async fn save(&self, token: &str) -> Result<(), SessionError>;
	async fn remove(&self) -> Result<(), SessionError>;
}

/// File-based implementation of `TokenStorage`.
///
/// The file is a flat JSON object; only the entry under `key` is touched so other keys written
/// by other tools survive.
pub struct FileTokenStorage {
	path: PathBuf,
	key: String,
}

impl FileTokenStorage {
	pub fn new(path: PathBuf, key: impl Into<String>) -> Self {
		Self {
			path,
			key: key.into(),
		}
	}

	async fn read_entries(&self) -> Result<serde_json::Map<String, serde_json::Value>, SessionError> {
		if !self.path.exists() {
			return Ok(serde_json::Map::new());
		}

		let content = tokio::fs::read_to_string(&self.path).await?;
		if content.trim().is_empty() {
			return Ok(serde_json::Map::new());
		}

		match serde_json::from_str::<serde_json::Value>(&content)? {
			serde_json::Value::Object(entries) => Ok(entries),
			_ => Err(SessionError::Corrupt(format!(
				"{:?} does not contain a JSON object",
				self.path
			))),
		}
	}

	async fn write_entries(
		&self,
		entries: &serde_json::Map<String, serde_json::Value>,
	) -> Result<(), SessionError> {
		if let Some(parent) = self.path.parent() {
			if !parent.as_os_str().is_empty() {
				tokio::fs::create_dir_all(parent).await?;
			}
		}
		let content = serde_json::to_string_pretty(entries)?;
		tokio::fs::write(&self.path, content).await?;
		Ok(())
	}
}

#[async_trait::async_trait]
impl TokenStorage for FileTokenStorage {
	async fn load(&self) -> Result<Option<String>, SessionError> {
		let entries = self.read_entries().await?;
		let token = entries
			.get(&self.key)
			.and_then(|v| v.as_str())
			.map(|s| s.trim().to_string())
			.filter(|s| !s.is_empty());

		debug!(
			"Loaded session file {:?} (token present: {})",
			self.path,
			token.is_some()
		);
		Ok(token)
	}

	async fn save(&self, token: &str) -> Result<(), SessionError> {
		let mut entries = self.read_entries().await?;
		entries.insert(
			self.key.clone(),
			serde_json::Value::String(token.to_string()),
		);
		self.write_entries(&entries).await?;
		info!("Persisted session to {:?}", self.path);
		Ok(())
	}

	async fn remove(&self) -> Result<(), SessionError> {
		let mut entries = self.read_entries().await?;
		if entries.remove(&self.key).is_some() {
			self.write_entries(&entries).await?;
			info!("Removed persisted session from {:?}", self.path);
		}
		Ok(())
	}
}

/// In-memory implementation of `TokenStorage`, shared between clones of the same store.
#[derive(Default)]
pub struct MemoryTokenStorage {
	entries: Mutex<HashMap<String, String>>,
}

const MEMORY_KEY: &str = "token";

impl MemoryTokenStorage {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_token(token: &str) -> Self {
		let storage = Self::default();
		if let Ok(mut guard) = storage.entries.lock() {
			guard.insert(MEMORY_KEY.to_string(), token.to_string());
		}
		storage
	}

	pub fn stored(&self) -> Option<String> {
		self.entries
			.lock()
			.ok()
			.and_then(|guard| guard.get(MEMORY_KEY).cloned())
	}
}

#[async_trait::async_trait]
impl TokenStorage for MemoryTokenStorage {
	async fn load(&self) -> Result<Option<String>, SessionError> {
		Ok(self.stored())
	}

	async fn save(&self, token: &str) -> Result<(), SessionError> {
		let mut guard = self.entries.lock().map_err(|_| SessionError::Poisoned)?;
		guard.insert(MEMORY_KEY.to_string(), token.to_string());
		Ok(())
	}

	async fn remove(&self) -> Result<(), SessionError> {
		let mut guard = self.entries.lock().map_err(|_| SessionError::Poisoned)?;
		guard.remove(MEMORY_KEY);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn file_storage_round_trips_and_keeps_other_keys() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("session.json");
		tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
		tokio::fs::write(&path, r#"{"theme": "dark"}"#).await.unwrap();

		let storage = FileTokenStorage::new(path.clone(), "token");
		assert_eq!(storage.load().await.unwrap(), None);

		storage.save("abc").await.unwrap();
		assert_eq!(storage.load().await.unwrap(), Some("abc".to_string()));

		storage.remove().await.unwrap();
		assert_eq!(storage.load().await.unwrap(), None);

		let raw: serde_json::Value =
			serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
		assert_eq!(raw["theme"], "dark");
		assert!(raw.get("token").is_none());
	}

	#[tokio::test]
	async fn file_storage_creates_missing_directories() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("a").join("b").join("session.json");
		let storage = FileTokenStorage::new(path.clone(), "jwt");

		storage.save("t-1").await.unwrap();
		assert!(path.exists());
		assert_eq!(storage.load().await.unwrap(), Some("t-1".to_string()));
	}

	#[tokio::test]
	async fn corrupt_file_is_reported() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("session.json");
		tokio::fs::write(&path, "[1, 2]").await.unwrap();

		let storage = FileTokenStorage::new(path, "token");
		assert!(matches!(storage.load().await, Err(SessionError::Corrupt(_))));
	}
}
