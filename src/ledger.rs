//! Append-only transaction ledger.
//!
//! Entries are never removed or edited. The single sanctioned change is the
//! one-time settlement of a `PENDING` entry, which records its outcome in a
//! write-once [`Settlement`].

use std::collections::HashMap;
use std::fmt;

use parking_lot::{RwLock, RwLockWriteGuard};
use serde::Serialize;
use thiserror::Error;

use crate::Amount;
use crate::model::{AccountId, AdminId, DepositMethod, LoanId, Time, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Deposit => write!(f, "DEPOSIT"),
            TransactionType::Withdrawal => write!(f, "WITHDRAWAL"),
            TransactionType::Transfer => write!(f, "TRANSFER"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "PENDING"),
            TransactionStatus::Completed => write!(f, "COMPLETED"),
            TransactionStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Who or what originated an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntrySource {
    SelfDeposit { method: DepositMethod },
    Withdrawal,
    Transfer,
    AdminCredit { admin: AdminId },
    AdminDebit { admin: AdminId },
    LoanDisbursement { loan: LoanId },
}

/// One side of an entry, denormalized at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Party {
    #[serde(skip)]
    pub id: AccountId,
    pub name: String,
    pub account_number: String,
}

/// Outcome of settling a `PENDING` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settlement {
    pub status: TransactionStatus,
    /// Account whose balance the settlement moved (or would have moved).
    #[serde(skip)]
    pub account: AccountId,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub reason: Option<String>,
    pub settled_at: Time,
}

/// A ledger entry.
///
/// `balance_before`/`balance_after` snapshot the acting party's account at
/// commit time: the sender for transfers and withdrawals, the receiver for
/// deposits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub reference: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub status: TransactionStatus,
    pub source: EntrySource,
    pub amount: Amount,
    pub sender: Option<Party>,
    pub receiver: Option<Party>,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub description: String,
    pub created_at: Time,
    pub settlement: Option<Settlement>,
}

impl Transaction {
    pub fn involves(&self, account: AccountId) -> bool {
        self.sender.as_ref().is_some_and(|p| p.id == account)
            || self.receiver.as_ref().is_some_and(|p| p.id == account)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("reference {0} already exists")]
    DuplicateReference(String),
    #[error("transaction {0} not found")]
    UnknownReference(String),
    #[error("transaction {0} is not pending")]
    NotPending(String),
    #[error("settlement status must be COMPLETED or FAILED")]
    InvalidSettlement,
}

#[derive(Default)]
struct Entries {
    rows: Vec<Transaction>,
    by_reference: HashMap<String, usize>,
    by_account: HashMap<AccountId, Vec<usize>>,
}

#[derive(Default)]
pub struct Ledger {
    entries: RwLock<Entries>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive writer; hold it across the balance update of a commit.
    pub fn writer(&self) -> LedgerWriter<'_> {
        LedgerWriter {
            entries: self.entries.write(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.entries.read().by_reference.contains_key(reference)
    }

    pub fn get(&self, reference: &str) -> Option<Transaction> {
        let entries = self.entries.read();
        entries
            .by_reference
            .get(reference)
            .map(|idx| entries.rows[*idx].clone())
    }

    /// Entries naming `account` as sender or receiver, newest first.
    pub fn for_account(&self, account: AccountId, limit: usize) -> Vec<Transaction> {
        let entries = self.entries.read();
        entries
            .by_account
            .get(&account)
            .map(|indices| {
                indices
                    .iter()
                    .rev()
                    .take(limit)
                    .map(|idx| entries.rows[*idx].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All entries matching the filters, newest first.
    pub fn list(
        &self,
        kind: Option<TransactionType>,
        status: Option<TransactionStatus>,
        limit: usize,
    ) -> Vec<Transaction> {
        self.entries
            .read()
            .rows
            .iter()
            .rev()
            .filter(|tx| kind.is_none_or(|k| tx.kind == k))
            .filter(|tx| status.is_none_or(|s| tx.status == s))
            .take(limit)
            .cloned()
            .collect()
    }
}

pub struct LedgerWriter<'a> {
    entries: RwLockWriteGuard<'a, Entries>,
}

impl LedgerWriter<'_> {
    pub fn contains(&self, reference: &str) -> bool {
        self.entries.by_reference.contains_key(reference)
    }

    pub fn append(&mut self, entry: Transaction) -> Result<(), LedgerError> {
        if self.contains(&entry.reference) {
            return Err(LedgerError::DuplicateReference(entry.reference));
        }
        let idx = self.entries.rows.len();
        let mut parties: Vec<AccountId> = entry
            .sender
            .iter()
            .chain(entry.receiver.iter())
            .map(|p| p.id)
            .collect();
        parties.dedup();
        for account in parties {
            self.entries.by_account.entry(account).or_default().push(idx);
        }
        self.entries
            .by_reference
            .insert(entry.reference.clone(), idx);
        self.entries.rows.push(entry);
        Ok(())
    }

    /// Move a `PENDING` entry to its final status.
    pub fn settle(
        &mut self,
        reference: &str,
        settlement: Settlement,
    ) -> Result<Transaction, LedgerError> {
        if settlement.status == TransactionStatus::Pending {
            return Err(LedgerError::InvalidSettlement);
        }
        let idx = *self
            .entries
            .by_reference
            .get(reference)
            .ok_or_else(|| LedgerError::UnknownReference(reference.to_string()))?;
        let entry = &mut self.entries.rows[idx];
        if entry.status != TransactionStatus::Pending || entry.settlement.is_some() {
            return Err(LedgerError::NotPending(reference.to_string()));
        }
        entry.status = settlement.status;
        entry.settlement = Some(settlement);
        Ok(entry.clone())
    }
}
