//!
//! HTTP gateway for the bank backend.
//!
//! Every call to the REST API goes through `RequestClient`. It resolves paths against the single
//! configured base address, attaches the bearer token held by the `SessionStore`, and folds every
//! outcome into the `ApiError` taxonomy. Nothing here retries: callers that mutate money must see
//! each failure exactly once.

use super::types::{ApiError, ErrorBody};
use crate::config::ClientConfig;
use crate::session::SessionStore;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

/// Whether a request carries the session's bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Auth {
	/// Attach the current token, and treat a 401 as the session expiring.
	Bearer,
	/// Send no token; a 401 reflects the request itself (e.g. bad credentials).
	Anonymous,
}

/// Bank REST client bound to one base address and one session.
#[derive(Clone)]
pub struct RequestClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base address every path is resolved against.
	base_url: Url,
	/// Source of the bearer token, cleared on 401.
	session: SessionStore,
}

impl RequestClient {
	/// Create a new request client.
	///
	/// # Arguments
	/// * `base_url` - The API root. Paths are joined onto it, so it should end with `/`.
	/// * `session` - The session store providing the bearer token.
	/// * `timeout` - Per-request timeout.
	pub fn new(base_url: Url, session: SessionStore, timeout: Duration) -> Result<Self, ApiError> {
		let http_client = Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| ApiError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

		Ok(Self {
			http_client,
			base_url,
			session,
		})
	}

	pub fn from_config(config: &ClientConfig, session: SessionStore) -> Result<Self, ApiError> {
		Self::new(
			config.api_base_url.clone(),
			session,
			config.request_timeout,
		)
	}

	pub fn session(&self) -> &SessionStore {
		&self.session
	}

	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Resolve an API path such as `/balance` against the base address.
	pub fn resolve(&self, path: &str) -> Result<Url, ApiError> {
		self.base_url
			.join(path.trim_start_matches('/'))
			.map_err(|e| ApiError::NetworkError(format!("Invalid request path {}: {}", path, e)))
	}

	/// `GET` an authenticated resource.
	pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
		let url = self.resolve(path)?;
		self.execute(self.http_client.get(url), "GET", path, Auth::Bearer)
			.await
	}

	/// `POST` a JSON body to an authenticated resource.
	pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
	where
		B: Serialize + ?Sized,
		T: DeserializeOwned,
	{
		let url = self.resolve(path)?;
		self.execute(
			self.http_client.post(url).json(body),
			"POST",
			path,
			Auth::Bearer,
		)
		.await
	}

	/// `POST` a JSON body without credentials.
	pub(crate) async fn post_json_anonymous<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
	where
		B: Serialize + ?Sized,
		T: DeserializeOwned,
	{
		let url = self.resolve(path)?;
		self.execute(
			self.http_client.post(url).json(body),
			"POST",
			path,
			Auth::Anonymous,
		)
		.await
	}

	/// `POST` a form-encoded body without credentials.
	pub(crate) async fn post_form_anonymous<T: DeserializeOwned>(
		&self,
		path: &str,
		form: &[(&str, &str)],
	) -> Result<T, ApiError> {
		let url = self.resolve(path)?;
		self.execute(
			self.http_client.post(url).form(form),
			"POST",
			path,
			Auth::Anonymous,
		)
		.await
	}

	async fn execute<T: DeserializeOwned>(
		&self,
		request: RequestBuilder,
		method: &str,
		path: &str,
		auth: Auth,
	) -> Result<T, ApiError> {
		let token = match auth {
			Auth::Bearer => self.session.current_token(),
			Auth::Anonymous => None,
		};

		let request = match token.as_deref() {
			Some(token) => request.bearer_auth(token),
			None => request,
		};

		let response = request.send().await.map_err(|e| {
			warn!("{} {} failed before a response: {}", method, path, e);
			ApiError::NetworkError(e.to_string())
		})?;

		let status = response.status();
		debug!("{} {} -> {}", method, path, status.as_u16());

		let body = response.bytes().await.map_err(|e| {
			warn!("{} {} response body could not be read: {}", method, path, e);
			ApiError::NetworkError(e.to_string())
		})?;

		if status.is_success() {
			return serde_json::from_slice::<T>(&body).map_err(|e| {
				error!("{} {} returned an invalid body: {}", method, path, e);
				ApiError::ServerError {
					status: status.as_u16(),
					detail: Some("invalid response body".to_string()),
				}
			});
		}

		let detail = ErrorBody::parse_detail(&body);

		if status == StatusCode::UNAUTHORIZED {
			if let Some(token) = token.as_deref() {
				if let Err(e) = self.session.expire(token).await {
					error!("Failed to clear persisted session after 401: {}", e);
				}
			}
			return Err(ApiError::AuthError { detail });
		}

		if status.is_client_error() {
			return Err(ApiError::ValidationError {
				status: status.as_u16(),
				detail,
			});
		}

		Err(ApiError::ServerError {
			status: status.as_u16(),
			detail,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::api::types::BalanceResponse;
	use crate::session::MemoryTokenStorage;
	use rust_decimal::Decimal;
	use std::sync::Arc;
	use wiremock::matchers::{header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	async fn client_for(server: &MockServer, token: Option<&str>) -> RequestClient {
		let storage = Arc::new(match token {
			Some(t) => MemoryTokenStorage::with_token(t),
			None => MemoryTokenStorage::new(),
		});
		let session = SessionStore::load(storage).await;
		let base = Url::parse(&format!("{}/", server.uri())).unwrap();
		RequestClient::new(base, session, Duration::from_secs(5)).unwrap()
	}

	#[tokio::test]
	async fn attaches_bearer_header() {
		let server = MockServer::start().await;
		Mock::given(method("GET"))
			.and(path("/balance"))
			.and(header("Authorization", "Bearer T"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"balance": 12.5})))
			.expect(1)
			.mount(&server)
			.await;

		let client = client_for(&server, Some("T")).await;
		let res: BalanceResponse = client.get("/balance").await.unwrap();
		assert_eq!(res.balance, Decimal::new(125, 1));
	}

	#[tokio::test]
	async fn maps_status_codes() {
		let server = MockServer::start().await;
		Mock::given(path("/bad"))
			.respond_with(
				ResponseTemplate::new(400).set_body_json(serde_json::json!({"detail": "Saldo insuficiente"})),
			)
			.mount(&server)
			.await;
		Mock::given(path("/boom"))
			.respond_with(ResponseTemplate::new(503))
			.mount(&server)
			.await;
		Mock::given(path("/garbage"))
			.respond_with(ResponseTemplate::new(200).set_body_string("not json"))
			.mount(&server)
			.await;

		let client = client_for(&server, Some("T")).await;

		let err = client.get::<BalanceResponse>("/bad").await.unwrap_err();
		assert_eq!(
			err,
			ApiError::ValidationError {
				status: 400,
				detail: Some("Saldo insuficiente".to_string())
			}
		);

		let err = client.get::<BalanceResponse>("/boom").await.unwrap_err();
		assert_eq!(
			err,
			ApiError::ServerError {
				status: 503,
				detail: None
			}
		);

		let err = client.get::<BalanceResponse>("/garbage").await.unwrap_err();
		assert!(matches!(err, ApiError::ServerError { status: 200, .. }));

		// the session survives every non-401 failure
		assert!(client.session().is_authenticated());
	}

	#[tokio::test]
	async fn unauthorized_clears_session() {
		let server = MockServer::start().await;
		Mock::given(path("/balance"))
			.respond_with(
				ResponseTemplate::new(401).set_body_json(serde_json::json!({"detail": "Credenciais inválidas"})),
			)
			.mount(&server)
			.await;

		let client = client_for(&server, Some("expired")).await;
		let err = client.get::<BalanceResponse>("/balance").await.unwrap_err();

		assert!(err.is_auth());
		assert_eq!(err.detail(), Some("Credenciais inválidas"));
		assert!(!client.session().is_authenticated());
	}

	#[tokio::test]
	async fn concurrent_unauthorized_calls_log_out_once() {
		let server = MockServer::start().await;
		Mock::given(path("/balance"))
			.respond_with(ResponseTemplate::new(401))
			.mount(&server)
			.await;

		let client = client_for(&server, Some("expired")).await;
		let mut rx = client.session().watch();
		rx.borrow_and_update();

		let (a, b, c) = tokio::join!(
			client.get::<BalanceResponse>("/balance"),
			client.get::<BalanceResponse>("/balance"),
			client.get::<BalanceResponse>("/balance"),
		);
		assert!(a.unwrap_err().is_auth());
		assert!(b.unwrap_err().is_auth());
		assert!(c.unwrap_err().is_auth());

		assert!(rx.has_changed().unwrap());
		assert!(!rx.borrow_and_update().is_authenticated());
		assert!(!rx.has_changed().unwrap());
	}

	#[tokio::test]
	async fn network_failure_is_reported() {
		// Nothing listens on a port whose listener was just closed.
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		drop(listener);

		let session = SessionStore::new(Arc::new(MemoryTokenStorage::new()));
		let client = RequestClient::new(
			Url::parse(&format!("http://{}/", addr)).unwrap(),
			session,
			Duration::from_secs(5),
		)
		.unwrap();

		let err = client.get::<BalanceResponse>("/balance").await.unwrap_err();
		assert!(matches!(err, ApiError::NetworkError(_)));
	}

	#[test]
	fn resolves_paths_under_base_path() {
		let session = SessionStore::new(Arc::new(MemoryTokenStorage::new()));
		let client = RequestClient::new(
			Url::parse("https://bank.example.com/api/").unwrap(),
			session,
			Duration::from_secs(1),
		)
		.unwrap();
		assert_eq!(
			client.resolve("/digital-twin/summary").unwrap().as_str(),
			"https://bank.example.com/api/digital-twin/summary"
		);
	}
}
