//! Admin settlement of `PENDING` deposits and transfers.

use super::{Engine, EngineError, Subject, ValidationError};
use crate::account::Posting;
use crate::ledger::{Transaction, TransactionStatus, TransactionType};

impl Engine {
    /// The approval queue, newest first.
    pub fn pending_transactions(&self, limit: usize) -> Result<Vec<Transaction>, EngineError> {
        let limit = self.page_size(limit)?;
        Ok(self
            .ledger
            .list(None, Some(TransactionStatus::Pending), limit))
    }

    /// Complete a pending entry.
    ///
    /// A deposit credits its account; a transfer credits its receiver (the
    /// sender was debited on submission).
    pub fn approve_transaction(&self, reference: &str) -> Result<Transaction, EngineError> {
        let result = self.apply_approval(reference);
        self.log_result("approval", Subject::Entry(reference.trim()), None, &result);
        result
    }

    /// Fail a pending entry.
    ///
    /// A transfer refunds its sender; a deposit moves nothing.
    pub fn reject_transaction(&self, reference: &str, reason: &str) -> Result<Transaction, EngineError> {
        let result = self.apply_rejection(reference, reason);
        self.log_result("rejection", Subject::Entry(reference.trim()), None, &result);
        result
    }

    fn apply_approval(&self, reference: &str) -> Result<Transaction, EngineError> {
        let entry = self.pending_entry(reference)?;
        let account = credited_party(&entry)?;
        let unit = self.begin(&[account])?;
        unit.settle(
            &entry.reference,
            &[Posting::Credit(account, entry.amount)],
            TransactionStatus::Completed,
            account,
            None,
        )
    }

    fn apply_rejection(&self, reference: &str, reason: &str) -> Result<Transaction, EngineError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::MissingReason.into());
        }
        let entry = self.pending_entry(reference)?;
        let (account, postings) = match entry.kind {
            TransactionType::Transfer => {
                let sender = entry
                    .sender
                    .as_ref()
                    .map(|p| p.id)
                    .ok_or_else(|| missing_party(&entry))?;
                (sender, vec![Posting::Credit(sender, entry.amount)])
            }
            _ => (credited_party(&entry)?, Vec::new()),
        };
        let unit = self.begin(&[account])?;
        unit.settle(
            &entry.reference,
            &postings,
            TransactionStatus::Failed,
            account,
            Some(reason.to_string()),
        )
    }

    fn pending_entry(&self, reference: &str) -> Result<Transaction, EngineError> {
        let entry = self.transaction(reference)?;
        if entry.status != TransactionStatus::Pending {
            return Err(crate::ledger::LedgerError::NotPending(entry.reference).into());
        }
        Ok(entry)
    }
}

/// The account a completed settlement credits.
fn credited_party(entry: &Transaction) -> Result<crate::model::AccountId, EngineError> {
    entry
        .receiver
        .as_ref()
        .map(|p| p.id)
        .ok_or_else(|| missing_party(entry))
}

fn missing_party(entry: &Transaction) -> EngineError {
    EngineError::Internal(format!(
        "pending {} {} has no party to settle",
        entry.kind, entry.reference
    ))
}
