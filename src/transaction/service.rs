use crate::api::{BalanceResponse, RequestClient};
use crate::transaction::{TransactionError, TransactionRequest, TransactionResult};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// Notified after a mutation has been confirmed by the server.
///
/// Observers run after the HTTP response arrived, so anything they trigger observes server
/// state at or after the transaction.
pub trait TransactionObserver: Send + Sync {
	fn transaction_completed(&self, request: &TransactionRequest, result: &TransactionResult);

	/// Get the name of this observer for logging.
	fn name(&self) -> &'static str;
}

/// Submits deposits and transfers.
///
/// Each operation issues exactly one request. Failures are never retried: a blind retry of a
/// financial mutation could apply it twice.
#[derive(Clone)]
pub struct TransactionService {
	client: RequestClient,
	observers: Vec<Arc<dyn TransactionObserver>>,
}

impl TransactionService {
	pub fn new(client: RequestClient) -> Self {
		Self {
			client,
			observers: Vec::new(),
		}
	}

	/// Register an observer. Observers are called in registration order.
	pub fn with_observer(mut self, observer: Arc<dyn TransactionObserver>) -> Self {
		self.observers.push(observer);
		self
	}

	/// Deposit `amount` into the authenticated account.
	pub async fn deposit(&self, amount: Decimal) -> Result<TransactionResult, TransactionError> {
		self.submit(TransactionRequest::Deposit { amount }).await
	}

	/// Send `amount` to `to_user` via pix. Returns the sender's new balance.
	pub async fn transfer(
		&self,
		to_user: &str,
		amount: Decimal,
	) -> Result<TransactionResult, TransactionError> {
		self.submit(TransactionRequest::Transfer {
			to_user: to_user.to_string(),
			amount,
		})
		.await
	}

	/// Validate and submit a request, then notify observers on success.
	pub async fn submit(
		&self,
		request: TransactionRequest,
	) -> Result<TransactionResult, TransactionError> {
		request.validate()?;

		let response: BalanceResponse = self
			.client
			.post_json(request.path(), &request.body())
			.await
			.map_err(|e| {
				warn!("{} failed: {}", request, e);
				TransactionError::Api(e)
			})?;

		let result = TransactionResult {
			new_balance: response.balance,
		};
		info!("{} completed, new balance {}", request, result.new_balance);

		for observer in &self.observers {
			observer.transaction_completed(&request, &result);
		}

		Ok(result)
	}
}
