use crate::api::ApiError;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// A money movement submitted by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRequest {
	/// Credit the authenticated account.
	Deposit { amount: Decimal },
	/// Instant transfer ("pix") from the authenticated account to `to_user`.
	Transfer { to_user: String, amount: Decimal },
}

#[derive(Serialize)]
struct DepositBody {
	#[serde(serialize_with = "rust_decimal::serde::float::serialize")]
	amount: Decimal,
}

#[derive(Serialize)]
struct PixBody<'a> {
	to_user: &'a str,
	#[serde(serialize_with = "rust_decimal::serde::float::serialize")]
	amount: Decimal,
}

impl TransactionRequest {
	pub fn amount(&self) -> Decimal {
		match self {
			TransactionRequest::Deposit { amount } | TransactionRequest::Transfer { amount, .. } => {
				*amount
			}
		}
	}

	/// Check the local preconditions: a positive amount and, for transfers, a recipient.
	pub fn validate(&self) -> Result<(), TransactionError> {
		if self.amount() <= Decimal::ZERO {
			return Err(TransactionError::InvalidRequest(
				"amount must be greater than zero".to_string(),
			));
		}
		if let TransactionRequest::Transfer { to_user, .. } = self {
			if to_user.trim().is_empty() {
				return Err(TransactionError::InvalidRequest(
					"recipient must not be empty".to_string(),
				));
			}
		}
		Ok(())
	}

	pub(crate) fn path(&self) -> &'static str {
		match self {
			TransactionRequest::Deposit { .. } => "/deposit",
			TransactionRequest::Transfer { .. } => "/pix",
		}
	}

	pub(crate) fn body(&self) -> serde_json::Value {
		let body = match self {
			TransactionRequest::Deposit { amount } => {
				serde_json::to_value(DepositBody { amount: *amount })
			}
			TransactionRequest::Transfer { to_user, amount } => serde_json::to_value(PixBody {
				to_user: to_user.trim(),
				amount: *amount,
			}),
		};
		body.unwrap_or(serde_json::Value::Null)
	}

	/// Message shown when the server gives no explanation.
	pub fn fallback_message(&self) -> &'static str {
		match self {
			TransactionRequest::Deposit { .. } => "Deposit failed",
			TransactionRequest::Transfer { .. } => "Transfer failed",
		}
	}
}

impl fmt::Display for TransactionRequest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransactionRequest::Deposit { amount } => write!(f, "deposit of {}", amount),
			TransactionRequest::Transfer { to_user, amount } => {
				write!(f, "pix of {} to {}", amount, to_user)
			}
		}
	}
}

/// The authoritative effect of a completed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionResult {
	/// Balance of the authenticated account after the operation, as reported by the server.
	pub new_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
	#[error("Transaction validation error: {0}")]
	InvalidRequest(String),

	#[error(transparent)]
	Api(#[from] ApiError),
}

impl TransactionError {
	/// Message fit for the user, falling back to `fallback` when the server said nothing useful.
	pub fn user_message(&self, fallback: &str) -> String {
		match self {
			TransactionError::InvalidRequest(reason) => reason.clone(),
			TransactionError::Api(e) => e.user_message(fallback),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn validates_preconditions() {
		assert!(TransactionRequest::Deposit { amount: Decimal::ONE }.validate().is_ok());
		assert!(matches!(
			TransactionRequest::Deposit { amount: Decimal::ZERO }.validate(),
			Err(TransactionError::InvalidRequest(_))
		));
		assert!(matches!(
			TransactionRequest::Deposit { amount: Decimal::NEGATIVE_ONE }.validate(),
			Err(TransactionError::InvalidRequest(_))
		));
		assert!(matches!(
			TransactionRequest::Transfer {
				to_user: "  ".to_string(),
				amount: Decimal::ONE
			}
			.validate(),
			Err(TransactionError::InvalidRequest(_))
		));
	}

	#[test]
	fn bodies_match_the_wire_format() {
		let deposit = TransactionRequest::Deposit {
			amount: Decimal::new(10050, 2),
		};
		assert_eq!(deposit.path(), "/deposit");
		assert_eq!(deposit.body(), serde_json::json!({"amount": 100.5}));

		let pix = TransactionRequest::Transfer {
			to_user: " bob ".to_string(),
			amount: Decimal::from(30),
		};
		assert_eq!(pix.path(), "/pix");
		assert_eq!(pix.body(), serde_json::json!({"to_user": "bob", "amount": 30.0}));
	}
}
