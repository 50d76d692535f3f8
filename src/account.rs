//! Account store.
//!
//! Every account row sits behind its own mutex. Operations that move money
//! lock all rows they touch through [`AccountStore::lock`], which acquires
//! them in ascending id order, and apply a whole set of postings at once.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RawMutex, RwLock};
use parking_lot::lock_api::ArcMutexGuard;
use serde::Serialize;
use tracing::error;

use crate::engine::{EngineError, Resource};
use crate::model::{AccountId, Time};
use crate::pin::PinHash;
use crate::reference::ReferenceGenerator;
use crate::Amount;

/// A customer account as held by the store.
#[derive(Clone)]
pub struct Account {
    id: AccountId,
    account_number: String,
    name: String,
    balance: Amount,
    /// Encoded [`PinHash`].
    pin_hash: String,
    is_restricted: bool,
    created_at: Time,
}

impl Account {
    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn account_number(&self) -> &str {
        &self.account_number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn is_restricted(&self) -> bool {
        self.is_restricted
    }

    pub fn verify_pin(&self, pin: &str) -> bool {
        match self.pin_hash.parse::<PinHash>() {
            Ok(hash) => hash.verify(pin),
            Err(e) => {
                error!(account = %self.account_number, reason = %e, "stored PIN hash unreadable");
                false
            }
        }
    }

    /// Snapshot safe to hand out of the core.
    pub fn view(&self) -> AccountView {
        AccountView {
            id: self.id,
            account_number: self.account_number.clone(),
            name: self.name.clone(),
            balance: self.balance,
            is_restricted: self.is_restricted,
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("account_number", &self.account_number)
            .field("balance", &self.balance)
            .field("is_restricted", &self.is_restricted)
            .finish_non_exhaustive()
    }
}

/// Read-only account snapshot without credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountView {
    pub id: AccountId,
    pub account_number: String,
    pub name: String,
    pub balance: Amount,
    pub is_restricted: bool,
    pub created_at: Time,
}

/// Signed balance change applied to one locked account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Posting {
    Credit(AccountId, Amount),
    Debit(AccountId, Amount),
}

impl Posting {
    fn account(&self) -> AccountId {
        match self {
            Posting::Credit(id, _) | Posting::Debit(id, _) => *id,
        }
    }
}

/// Balance of one account around a committed set of postings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub account: AccountId,
    pub before: Amount,
    pub after: Amount,
}

type Row = Arc<Mutex<Account>>;

#[derive(Default)]
struct Index {
    rows: HashMap<AccountId, Row>,
    by_number: HashMap<String, AccountId>,
}

#[derive(Default)]
pub struct AccountStore {
    index: RwLock<Index>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an account with a zero balance and a fresh account number.
    pub fn open(
        &self,
        name: String,
        pin_hash: PinHash,
        generator: &ReferenceGenerator,
        attempts: u32,
    ) -> Result<AccountView, EngineError> {
        // write lock held across generation: the number is unique at insert time
        let mut index = self.index.write();
        let account_number =
            generator.new_account_number(attempts, |n| index.by_number.contains_key(n))?;
        let account = Account {
            id: AccountId::new_v4(),
            account_number: account_number.clone(),
            name,
            balance: Amount::default(),
            pin_hash: pin_hash.to_string(),
            is_restricted: false,
            created_at: Utc::now(),
        };
        let view = account.view();
        index.by_number.insert(account_number, account.id);
        index.rows.insert(account.id, Arc::new(Mutex::new(account)));
        Ok(view)
    }

    pub fn len(&self) -> usize {
        self.index.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current state of an account.
    pub fn get(&self, id: AccountId) -> Result<Account, EngineError> {
        let row = self.row(id)?;
        let account = row.lock().clone();
        Ok(account)
    }

    pub fn get_by_number(&self, account_number: &str) -> Result<Account, EngineError> {
        let id = self.resolve(account_number)?;
        self.get(id)
    }

    pub fn resolve(&self, account_number: &str) -> Result<AccountId, EngineError> {
        self.index
            .read()
            .by_number
            .get(account_number)
            .copied()
            .ok_or_else(|| EngineError::NotFound(Resource::AccountNumber(account_number.to_string())))
    }

    /// Snapshots of every account, in no particular order.
    pub fn all(&self) -> Vec<AccountView> {
        let rows: Vec<Row> = self.index.read().rows.values().cloned().collect();
        rows.iter().map(|row| row.lock().view()).collect()
    }

    pub fn set_restricted(&self, id: AccountId, restricted: bool) -> Result<AccountView, EngineError> {
        let row = self.row(id)?;
        let mut account = row.lock();
        account.is_restricted = restricted;
        Ok(account.view())
    }

    /// Lock the given accounts in ascending id order.
    ///
    /// Duplicate ids are locked once. The returned guard set is the only way
    /// to change a balance.
    pub fn lock(&self, ids: &[AccountId]) -> Result<LockedAccounts, EngineError> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let rows = {
            let index = self.index.read();
            ids.iter()
                .map(|id| {
                    index
                        .rows
                        .get(id)
                        .cloned()
                        .ok_or(EngineError::NotFound(Resource::Account))
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        let guards = rows.iter().map(|row| row.lock_arc()).collect();
        Ok(LockedAccounts { guards })
    }

    /// Adjust one balance by a signed delta on its own.
    ///
    /// Fails with `InsufficientFunds` when the result would drop below
    /// `min_balance`.
    pub fn apply_delta(
        &self,
        posting: Posting,
        min_balance: Amount,
    ) -> Result<BalanceChange, EngineError> {
        let mut locked = self.lock(&[posting.account()])?;
        if let Posting::Debit(id, amount) = posting {
            let balance = locked.get(id)?.balance;
            let remaining = balance.checked_sub(amount).unwrap_or_default();
            if balance < amount || remaining < min_balance {
                return Err(EngineError::InsufficientFunds);
            }
        }
        let mut changes = locked.apply(&[posting])?;
        changes.pop().ok_or(EngineError::Internal("posting produced no balance change".into()))
    }

    fn row(&self, id: AccountId) -> Result<Row, EngineError> {
        self.index
            .read()
            .rows
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(Resource::Account))
    }
}

/// Exclusive hold on a set of account rows.
pub struct LockedAccounts {
    guards: Vec<ArcMutexGuard<RawMutex, Account>>,
}

impl LockedAccounts {
    pub fn get(&self, id: AccountId) -> Result<&Account, EngineError> {
        self.guards
            .iter()
            .map(|guard| &**guard)
            .find(|account| account.id == id)
            .ok_or(EngineError::NotFound(Resource::Account))
    }

    /// Compute the balance changes of `postings` without writing anything.
    ///
    /// Returns one change per posting, in posting order; postings on the same
    /// account chain off each other.
    pub fn stage(&self, postings: &[Posting]) -> Result<Vec<BalanceChange>, EngineError> {
        let mut staged: HashMap<AccountId, Amount> = HashMap::new();
        let mut changes = Vec::with_capacity(postings.len());

        for posting in postings {
            let id = posting.account();
            let before = match staged.get(&id) {
                Some(balance) => *balance,
                None => self.get(id)?.balance,
            };
            let after = match *posting {
                Posting::Credit(_, amount) => before
                    .checked_add(amount)
                    .ok_or(EngineError::Internal("balance overflow".into()))?,
                Posting::Debit(_, amount) => before
                    .checked_sub(amount)
                    .ok_or(EngineError::InsufficientFunds)?,
            };
            staged.insert(id, after);
            changes.push(BalanceChange {
                account: id,
                before,
                after,
            });
        }
        Ok(changes)
    }

    /// Write staged changes. Cannot fail.
    pub fn write(&mut self, changes: &[BalanceChange]) {
        for change in changes {
            if let Some(guard) = self.guards.iter_mut().find(|g| g.id == change.account) {
                guard.balance = change.after;
            }
        }
    }

    /// Apply every posting or none of them.
    pub fn apply(&mut self, postings: &[Posting]) -> Result<Vec<BalanceChange>, EngineError> {
        let changes = self.stage(postings)?;
        self.write(&changes);
        Ok(changes)
    }
}
