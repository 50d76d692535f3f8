//! Error types for engine operations.

use thiserror::Error;

use crate::amount::AmountError;
use crate::ledger::LedgerError;
use crate::pin::PinError;

/// Top-level error returned by every [`Engine`](super::Engine) operation.
///
/// Nothing is committed when one of these is returned. Displays never carry
/// internal account ids.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    #[error("invalid PIN")]
    AuthenticationFailure,

    #[error("{0} not found")]
    NotFound(Resource),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("account is restricted: IMF verification required")]
    RestrictedAccount,

    #[error("cannot transfer to the same account")]
    SelfTransferNotAllowed,

    #[error("could not generate a unique {what} after {attempts} attempts")]
    GenerationExhausted { what: &'static str, attempts: u32 },

    #[error("conflicting concurrent operation, retry")]
    ConcurrencyConflict,

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Message safe to show an end user.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Internal(_) => "something went wrong, please try again later".to_string(),
            EngineError::GenerationExhausted { .. } => {
                "could not complete the request, please try again".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether replaying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrencyConflict)
    }
}

/// Why a request was rejected before touching any state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0}")]
    Amount(#[from] AmountError),

    #[error("amount must be greater than zero")]
    NonPositiveAmount,

    #[error("account number must be 8 digits")]
    AccountNumber,

    #[error("{0}")]
    Pin(#[from] PinError),

    #[error("account holder name is required")]
    Name,

    #[error("idempotency key must be 1 to 128 characters")]
    IdempotencyKey,

    #[error("idempotency key was already used for a different request")]
    IdempotencyKeyReused,

    #[error("page size must be at least 1")]
    Limit,

    #[error("{0}")]
    Ledger(#[from] LedgerError),

    #[error("loan amount {amount} is below the {tier} minimum of {minimum}")]
    LoanBelowMinimum {
        tier: &'static str,
        amount: crate::Amount,
        minimum: crate::Amount,
    },

    #[error("loan {0} is not {1}")]
    LoanState(String, &'static str),

    #[error("a rejection needs a reason")]
    MissingReason,
}

/// Kind of record a `NotFound` refers to.
#[derive(Debug, PartialEq, Eq)]
pub enum Resource {
    Account,
    AccountNumber(String),
    Transaction(String),
    Loan,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::Account => write!(f, "account"),
            Resource::AccountNumber(number) => write!(f, "account {number}"),
            Resource::Transaction(reference) => write!(f, "transaction {reference}"),
            Resource::Loan => write!(f, "loan application"),
        }
    }
}

impl From<AmountError> for EngineError {
    fn from(e: AmountError) -> Self {
        EngineError::InvalidInput(ValidationError::Amount(e))
    }
}

impl From<PinError> for EngineError {
    fn from(e: PinError) -> Self {
        EngineError::InvalidInput(ValidationError::Pin(e))
    }
}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::UnknownReference(reference) => {
                EngineError::NotFound(Resource::Transaction(reference))
            }
            LedgerError::DuplicateReference(reference) => {
                EngineError::Internal(format!("duplicate ledger reference {reference}"))
            }
            other => EngineError::InvalidInput(ValidationError::Ledger(other)),
        }
    }
}
