//! Types for the bank REST API

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Server-computed digital twin summary. Opaque beyond display.
pub type TwinSummary = serde_json::Map<String, serde_json::Value>;

/// Login and registration credentials.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Response of `POST /token`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Response of `GET /balance`, `POST /deposit` and `POST /pix`.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    pub balance: Decimal,
}

/// One entry of `GET /logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: String,
    pub user: String,
    pub action: String,
}

/// Response of `GET /ping`.
#[derive(Debug, Clone, Deserialize)]
pub struct PingResponse {
    #[serde(default)]
    pub pong: bool,
}

/// Error body returned by the server on 4xx and 5xx.
///
/// `detail` is usually a string, but validation failures carry a list of field errors.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Human-readable detail: strings verbatim, anything structured as compact JSON.
    pub(crate) fn parse_detail(body: &[u8]) -> Option<String> {
        let parsed: ErrorBody = serde_json::from_slice(body).ok()?;
        match parsed.detail? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.trim().is_empty() => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }
}

/// Error taxonomy for every backend call.
///
/// Each failed call maps to exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// HTTP 401: the token is missing, expired or invalid.
    #[error("Authentication required{}", .detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    AuthError { detail: Option<String> },

    /// Any other 4xx, with the server's explanation when it sent one.
    #[error("Request rejected ({status}){}", .detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    ValidationError { status: u16, detail: Option<String> },

    /// 5xx, or a success status whose body could not be understood.
    #[error("Server error ({status}){}", .detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    ServerError { status: u16, detail: Option<String> },

    /// The request never produced a response.
    #[error("Network error: {0}")]
    NetworkError(String),
}

impl ApiError {
    /// Server-provided detail, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::AuthError { detail }
            | ApiError::ValidationError { detail, .. }
            | ApiError::ServerError { detail, .. } => detail.as_deref(),
            ApiError::NetworkError(_) => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::AuthError { .. })
    }

    /// Message fit for the user: validation details verbatim, a generic fallback otherwise.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ApiError::AuthError { .. } => "Session expired, please log in again".to_string(),
            ApiError::ValidationError { detail: Some(d), .. } => d.clone(),
            _ => fallback.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_is_extracted_verbatim_or_as_json() {
        assert_eq!(
            ErrorBody::parse_detail(br#"{"detail": "Saldo insuficiente"}"#).as_deref(),
            Some("Saldo insuficiente")
        );
        assert_eq!(
            ErrorBody::parse_detail(br#"{"detail": [{"loc": ["body", "amount"]}]}"#).as_deref(),
            Some(r#"[{"loc":["body","amount"]}]"#)
        );
        assert_eq!(ErrorBody::parse_detail(br#"{"other": 1}"#), None);
        assert_eq!(ErrorBody::parse_detail(b"<html>oops</html>"), None);
    }

    #[test]
    fn user_message_prefers_validation_detail() {
        let validation = ApiError::ValidationError {
            status: 400,
            detail: Some("Valor deve ser positivo".to_string()),
        };
        assert_eq!(validation.user_message("Deposit failed"), "Valor deve ser positivo");

        let server = ApiError::ServerError {
            status: 500,
            detail: Some("Erro interno ao processar transferência".to_string()),
        };
        assert_eq!(server.user_message("Transfer failed"), "Transfer failed");

        let auth = ApiError::AuthError { detail: None };
        assert_eq!(auth.user_message("x"), "Session expired, please log in again");
    }

    #[test]
    fn balance_accepts_float_and_integer_json() {
        let a: BalanceResponse = serde_json::from_str(r#"{"balance": 70.0}"#).unwrap();
        let b: BalanceResponse = serde_json::from_str(r#"{"balance": 70}"#).unwrap();
        assert_eq!(a.balance, Decimal::from(70));
        assert_eq!(a.balance, b.balance);
    }

    #[test]
    fn display_includes_detail() {
        let err = ApiError::ValidationError {
            status: 404,
            detail: Some("Usuário destinatário não encontrado".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Request rejected (404): Usuário destinatário não encontrado"
        );
        assert_eq!(
            ApiError::AuthError { detail: None }.to_string(),
            "Authentication required"
        );
    }
}
