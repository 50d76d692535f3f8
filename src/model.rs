//! Core domain types shared by the engine and its callers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Amount;
use crate::idempotency::IdempotencyKey;

/// Account identifier.
pub type AccountId = uuid::Uuid;

/// Ledger entry identifier.
pub type TransactionId = uuid::Uuid;

/// Loan application identifier.
pub type LoanId = uuid::Uuid;

/// Identifier of the administrator acting on an account.
pub type AdminId = uuid::Uuid;

pub type Time = DateTime<Utc>;

/// How a deposit or transfer settles once submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMode {
    /// Balances move synchronously and the entry is `COMPLETED`.
    Immediate,
    /// The entry stays `PENDING` until an administrator approves or rejects it.
    #[default]
    Pending,
}

/// Funding rail named by a self-service deposit. Rails are simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositMethod {
    Card,
    BankTransfer,
}

impl fmt::Display for DepositMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepositMethod::Card => write!(f, "card"),
            DepositMethod::BankTransfer => write!(f, "bank transfer"),
        }
    }
}

/// Direction of an administrator balance adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustAction {
    Add,
    Subtract,
}

impl fmt::Display for AdjustAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdjustAction::Add => write!(f, "add"),
            AdjustAction::Subtract => write!(f, "subtract"),
        }
    }
}

/// Self-service credit of an account.
#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub account_id: AccountId,
    pub amount: Amount,
    pub method: DepositMethod,
    /// Free-form rail details (masked card number, bank name); becomes the
    /// entry description.
    pub details: String,
    pub idempotency_key: Option<IdempotencyKey>,
}

/// Self-service debit of an account.
#[derive(Debug, Clone)]
pub struct WithdrawalRequest {
    pub account_id: AccountId,
    pub amount: Amount,
    pub idempotency_key: Option<IdempotencyKey>,
}

/// Move funds from the caller's account to another local account.
#[derive(Clone)]
pub struct TransferRequest {
    pub sender_id: AccountId,
    pub receiver_account_number: String,
    pub amount: Amount,
    pub pin: String,
    pub description: Option<String>,
    /// IMF code obtained out of band; required when the sender is restricted.
    pub imf_code: Option<String>,
    pub idempotency_key: Option<IdempotencyKey>,
}

impl fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferRequest")
            .field("sender_id", &self.sender_id)
            .field("receiver_account_number", &self.receiver_account_number)
            .field("amount", &self.amount)
            .field("pin", &"<redacted>")
            .field("description", &self.description)
            .field("imf_code", &self.imf_code.as_ref().map(|_| "<redacted>"))
            .field("idempotency_key", &self.idempotency_key)
            .finish()
    }
}

/// Administrator credit or debit of any account.
#[derive(Debug, Clone)]
pub struct AdjustmentRequest {
    pub admin_id: AdminId,
    pub target_account_id: AccountId,
    pub action: AdjustAction,
    pub amount: Amount,
    pub description: Option<String>,
    pub idempotency_key: Option<IdempotencyKey>,
}

/// A mutating request accepted by [`Engine::apply`](crate::Engine::apply).
#[derive(Debug, Clone)]
pub enum Request {
    Deposit(DepositRequest),
    Withdrawal(WithdrawalRequest),
    Transfer(TransferRequest),
    Adjustment(AdjustmentRequest),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Deposit(_) => "deposit",
            Request::Withdrawal(_) => "withdrawal",
            Request::Transfer(_) => "transfer",
            Request::Adjustment(_) => "adjustment",
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            Request::Deposit(r) => r.amount,
            Request::Withdrawal(r) => r.amount,
            Request::Transfer(r) => r.amount,
            Request::Adjustment(r) => r.amount,
        }
    }

    /// The account whose balance the request acts on.
    pub fn account(&self) -> AccountId {
        match self {
            Request::Deposit(r) => r.account_id,
            Request::Withdrawal(r) => r.account_id,
            Request::Transfer(r) => r.sender_id,
            Request::Adjustment(r) => r.target_account_id,
        }
    }
}

/// What a caller gets back from a committed (or replayed) operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub reference: String,
    pub status: crate::ledger::TransactionStatus,
    /// Balance of the acting account right after the operation.
    pub balance_after: Amount,
}

/// Aggregate figures for the admin dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_accounts: usize,
    pub total_balance: Amount,
    pub total_transactions: usize,
}
