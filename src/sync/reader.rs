use crate::api::{AccountApi, ApiError, TwinSummary};
use rust_decimal::Decimal;

/// Server reads a refresh cycle needs.
///
/// `AccountApi` is the production implementation; tests substitute slow or failing readers.
#[async_trait::async_trait]
pub trait AccountReader: Send + Sync {
    async fn balance(&self) -> Result<Decimal, ApiError>;

    async fn summary(&self) -> Result<TwinSummary, ApiError>;
}

#[async_trait::async_trait]
impl AccountReader for AccountApi {
    async fn balance(&self) -> Result<Decimal, ApiError> {
        AccountApi::balance(self).await
    }

    async fn summary(&self) -> Result<TwinSummary, ApiError> {
        AccountApi::summary(self).await
    }
}
