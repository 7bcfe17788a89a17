use super::client::RequestClient;
use super::types::{ApiError, Credentials, TokenResponse};
use crate::session::SessionStore;
use tracing::{error, info};

/// Login, registration and logout.
///
/// This is the only place a fresh token enters the `SessionStore`.
#[derive(Clone)]
pub struct AuthService {
    client: RequestClient,
}

impl AuthService {
    pub fn new(client: RequestClient) -> Self {
        Self { client }
    }

    fn session(&self) -> &SessionStore {
        self.client.session()
    }

    /// Exchange credentials for a bearer token and make it the current session.
    ///
    /// The token endpoint expects an OAuth2 password form, not JSON.
    pub async fn login(&self, username: &str, password: &str) -> Result<String, ApiError> {
        let response: TokenResponse = self
            .client
            .post_form_anonymous("/token", &[("username", username), ("password", password)])
            .await?;

        if let Err(e) = self.session().set_token(&response.access_token).await {
            // the in-memory session is already updated; only durability is lost
            error!("Failed to persist session for {}: {}", username, e);
        }
        info!("Logged in as {}", username);
        Ok(response.access_token)
    }

    /// Create a new account. Does not log in.
    pub async fn register(&self, username: &str, password: &str) -> Result<serde_json::Value, ApiError> {
        let body = Credentials::new(username, password);
        let response = self.client.post_json_anonymous("/register", &body).await?;
        info!("Registered user {}", username);
        Ok(response)
    }

    /// Forget the current session, locally and on disk.
    pub async fn logout(&self) -> bool {
        match self.session().clear().await {
            Ok(changed) => changed,
            Err(e) => {
                error!("Failed to remove persisted session: {}", e);
                true
            }
        }
    }
}
