use super::client::RequestClient;
use super::types::{ActivityEntry, ApiError, BalanceResponse, PingResponse, TwinSummary};
use rust_decimal::Decimal;

/// Read-side account calls.
#[derive(Clone)]
pub struct AccountApi {
    client: RequestClient,
}

impl AccountApi {
    pub fn new(client: RequestClient) -> Self {
        Self { client }
    }

    /// Current balance as reported by the server.
    pub async fn balance(&self) -> Result<Decimal, ApiError> {
        let response: BalanceResponse = self.client.get("/balance").await?;
        Ok(response.balance)
    }

    /// Digital twin summary. Sent with the bearer token; treated as account-scoped.
    pub async fn summary(&self) -> Result<TwinSummary, ApiError> {
        let value: serde_json::Value = self.client.get("/digital-twin/summary").await?;
        match value {
            serde_json::Value::Object(fields) => Ok(fields),
            other => Err(ApiError::ServerError {
                status: 200,
                detail: Some(format!("summary is not a JSON object: {}", other)),
            }),
        }
    }

    /// Actions recorded for the logged-in user.
    pub async fn activity(&self) -> Result<Vec<ActivityEntry>, ApiError> {
        self.client.get("/logs").await
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<bool, ApiError> {
        let response: PingResponse = self.client.get("/ping").await?;
        Ok(response.pong)
    }
}
