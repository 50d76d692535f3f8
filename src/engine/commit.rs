//! The atomic unit behind every balance-moving operation.
//!
//! A [`CommitUnit`] owns the row locks of every account an operation touches.
//! Committing stages the postings, takes the ledger writer, generates the
//! reference, writes the entry and only then the balances. Any failure before
//! the last step leaves both the accounts and the ledger untouched.

use chrono::Utc;
use tracing::error;

use super::{Engine, EngineError};
use crate::account::{BalanceChange, LockedAccounts, Posting};
use crate::ledger::{EntrySource, Party, Settlement, Transaction, TransactionStatus, TransactionType};
use crate::model::{AccountId, Receipt, TransactionId};
use crate::{Account, Amount};

/// Everything about a new ledger entry except what the commit computes.
pub(super) struct EntryDraft {
    pub kind: TransactionType,
    pub status: TransactionStatus,
    pub source: EntrySource,
    pub amount: Amount,
    pub sender: Option<AccountId>,
    pub receiver: Option<AccountId>,
    /// Account whose balance the entry snapshots.
    pub actor: AccountId,
    pub description: String,
}

pub(super) struct CommitUnit<'e> {
    engine: &'e Engine,
    accounts: LockedAccounts,
}

impl Engine {
    /// Lock the rows of `ids` for one commit.
    pub(super) fn begin(&self, ids: &[AccountId]) -> Result<CommitUnit<'_>, EngineError> {
        Ok(CommitUnit {
            engine: self,
            accounts: self.accounts.lock(ids)?,
        })
    }
}

impl CommitUnit<'_> {
    pub fn account(&self, id: AccountId) -> Result<&Account, EngineError> {
        self.accounts.get(id)
    }

    /// Apply `postings` and append one entry built from `draft`.
    pub fn commit(
        mut self,
        postings: &[Posting],
        draft: EntryDraft,
    ) -> Result<Transaction, EngineError> {
        let changes = self.accounts.stage(postings)?;
        let (balance_before, balance_after) = self.snapshot(draft.actor, &changes)?;
        let sender = draft.sender.map(|id| self.party(id)).transpose()?;
        let receiver = draft.receiver.map(|id| self.party(id)).transpose()?;

        let mut writer = self.engine.ledger.writer();
        let reference = self
            .engine
            .references
            .new_transaction_reference(self.engine.config.reference_attempts, |r| {
                writer.contains(r)
            })?;
        let entry = Transaction {
            id: TransactionId::new_v4(),
            reference,
            kind: draft.kind,
            status: draft.status,
            source: draft.source,
            amount: draft.amount,
            sender,
            receiver,
            balance_before,
            balance_after,
            description: draft.description,
            created_at: Utc::now(),
            settlement: None,
        };
        writer.append(entry.clone()).map_err(|e| {
            let e = EngineError::from(e);
            error!(reference = %entry.reference, reason = %e, "ledger append failed");
            e
        })?;
        self.accounts.write(&changes);
        Ok(entry)
    }

    /// Move the `PENDING` entry `reference` to `status`, applying `postings`.
    ///
    /// `account` is the account the settlement snapshots.
    pub fn settle(
        mut self,
        reference: &str,
        postings: &[Posting],
        status: TransactionStatus,
        account: AccountId,
        reason: Option<String>,
    ) -> Result<Transaction, EngineError> {
        let changes = self.accounts.stage(postings)?;
        let (balance_before, balance_after) = self.snapshot(account, &changes)?;

        let mut writer = self.engine.ledger.writer();
        let settled = writer.settle(
            reference,
            Settlement {
                status,
                account,
                balance_before,
                balance_after,
                reason,
                settled_at: Utc::now(),
            },
        )?;
        self.accounts.write(&changes);
        Ok(settled)
    }

    fn snapshot(
        &self,
        account: AccountId,
        changes: &[BalanceChange],
    ) -> Result<(Amount, Amount), EngineError> {
        let current = self.accounts.get(account)?.balance();
        let before = changes
            .iter()
            .find(|c| c.account == account)
            .map_or(current, |c| c.before);
        let after = changes
            .iter()
            .rev()
            .find(|c| c.account == account)
            .map_or(current, |c| c.after);
        Ok((before, after))
    }

    fn party(&self, id: AccountId) -> Result<Party, EngineError> {
        let account = self.accounts.get(id)?;
        Ok(Party {
            id,
            name: account.name().to_string(),
            account_number: account.account_number().to_string(),
        })
    }
}

impl From<&Transaction> for Receipt {
    fn from(entry: &Transaction) -> Self {
        Receipt {
            reference: entry.reference.clone(),
            status: entry.status,
            balance_after: entry.balance_after,
        }
    }
}
