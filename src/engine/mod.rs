//! Transaction processing engine.
//!
//! The engine owns the account store, the ledger and the restriction gate,
//! and is the only way to move money. Deposits, withdrawals, transfers and
//! admin adjustments each commit their balance changes and exactly one ledger
//! entry as a single unit. All operations take `&self` and are safe to call
//! from many threads at once.

use tracing::field::display;
use tracing::{error, info, warn};

use crate::account::{AccountStore, AccountView, Posting};
use crate::config::EngineConfig;
use crate::gate::{CodeStatus, IssuedCode, RestrictionGate};
use crate::idempotency::{Claim, IdempotencyTable};
use crate::ledger::{EntrySource, Ledger, Transaction, TransactionStatus, TransactionType};
use crate::loan::{LoanApplication, LoanBook};
use crate::model::{
    AccountId, AdjustAction, AdjustmentRequest, DepositRequest, LoanId, Receipt, Request,
    SettlementMode, Summary, TransferRequest, WithdrawalRequest,
};
use crate::pin::PinHash;
use crate::reference::ReferenceGenerator;
use crate::Amount;

mod commit;
mod loans;
mod settlement;

use commit::EntryDraft;

mod error;
pub use error::{EngineError, Resource, ValidationError};

/// The transaction processing engine.
pub struct Engine {
    config: EngineConfig,
    accounts: AccountStore,
    ledger: Ledger,
    references: ReferenceGenerator,
    gate: RestrictionGate,
    loans: LoanBook,
    idempotency: IdempotencyTable,
}

/// Public API
impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            idempotency: IdempotencyTable::new(config.idempotency_retention),
            config,
            accounts: AccountStore::new(),
            ledger: Ledger::new(),
            references: ReferenceGenerator::new(),
            gate: RestrictionGate::new(),
            loans: LoanBook::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open an account with a zero balance.
    pub fn open_account(&self, name: &str, pin: &str) -> Result<AccountView, EngineError> {
        let result = self.apply_open(name, pin);
        self.log_result("account opening", Subject::NewAccount, None, &result);
        result
    }

    /// Set or clear the restriction flag of an account.
    pub fn set_restricted(&self, id: AccountId, restricted: bool) -> Result<AccountView, EngineError> {
        let result = self.accounts.set_restricted(id, restricted);
        let op = if restricted { "restriction" } else { "restriction lift" };
        self.log_result(op, Subject::Account(id), None, &result);
        result
    }

    pub fn get_account(&self, id: AccountId) -> Result<AccountView, EngineError> {
        Ok(self.accounts.get(id)?.view())
    }

    pub fn find_account(&self, account_number: &str) -> Result<AccountView, EngineError> {
        let account_number = parse_account_number(account_number)?;
        Ok(self.accounts.get_by_number(account_number)?.view())
    }

    /// Snapshots of all accounts, in no particular order.
    pub fn accounts(&self) -> Vec<AccountView> {
        self.accounts.all()
    }

    pub fn get_balance(&self, id: AccountId) -> Result<Amount, EngineError> {
        Ok(self.accounts.get(id)?.balance())
    }

    /// Entries naming `id` as sender or receiver, newest first.
    pub fn list_ledger(&self, id: AccountId, limit: usize) -> Result<Vec<Transaction>, EngineError> {
        let limit = self.page_size(limit)?;
        self.accounts.get(id)?;
        Ok(self.ledger.for_account(id, limit))
    }

    /// Look an entry up by its reference.
    pub fn transaction(&self, reference: &str) -> Result<Transaction, EngineError> {
        self.ledger
            .get(reference.trim())
            .ok_or_else(|| EngineError::NotFound(Resource::Transaction(reference.trim().to_string())))
    }

    /// All entries, optionally of one type, newest first.
    pub fn list_transactions(
        &self,
        kind: Option<TransactionType>,
        limit: usize,
    ) -> Result<Vec<Transaction>, EngineError> {
        let limit = self.page_size(limit)?;
        Ok(self.ledger.list(kind, None, limit))
    }

    pub fn summary(&self) -> Summary {
        let accounts = self.accounts.all();
        Summary {
            total_accounts: accounts.len(),
            total_balance: accounts.iter().map(|a| a.balance).sum(),
            total_transactions: self.ledger.len(),
        }
    }

    /// Apply a single mutating request.
    pub fn apply(&self, request: Request) -> Result<Receipt, EngineError> {
        let (op, account, amount) = (request.kind(), request.account(), request.amount());
        let result = match request {
            Request::Deposit(r) => self.apply_deposit(r),
            Request::Withdrawal(r) => self.apply_withdrawal(r),
            Request::Transfer(r) => self.apply_transfer(r),
            Request::Adjustment(r) => self.apply_adjustment(r),
        };
        self.log_result(op, Subject::Account(account), Some(amount), &result);
        result
    }

    pub fn deposit(&self, request: DepositRequest) -> Result<Receipt, EngineError> {
        self.apply(Request::Deposit(request))
    }

    pub fn withdraw(&self, request: WithdrawalRequest) -> Result<Receipt, EngineError> {
        self.apply(Request::Withdrawal(request))
    }

    pub fn transfer(&self, request: TransferRequest) -> Result<Receipt, EngineError> {
        self.apply(Request::Transfer(request))
    }

    pub fn adjust_balance(&self, request: AdjustmentRequest) -> Result<Receipt, EngineError> {
        self.apply(Request::Adjustment(request))
    }

    /// Check a caller-supplied IMF code against the current setting.
    pub fn verify_restriction_code(&self, code: &str) -> bool {
        self.gate.verify(code)
    }

    /// Replace the IMF code unconditionally. Admin only.
    pub fn regenerate_restriction_code(&self) -> IssuedCode {
        self.gate.regenerate()
    }

    /// Replace the IMF code if it is still at `expected_version`. Admin only.
    pub fn regenerate_restriction_code_if(&self, expected_version: u64) -> Result<IssuedCode, EngineError> {
        self.gate.regenerate_if(expected_version)
    }

    /// Version and last update of the IMF code. Never exposes the code.
    pub fn restriction_code_status(&self) -> CodeStatus {
        self.gate.status()
    }
}

/// Private API
impl Engine {
    /// Small helper to log the outcome of every mutating operation
    fn log_result<T: Outcome>(
        &self,
        op: &str,
        subject: Subject<'_>,
        amount: Option<Amount>,
        result: &Result<T, EngineError>,
    ) {
        let subject = self.describe(subject);
        let amount = amount.map(display);
        match result {
            Ok(outcome) => {
                let id = outcome.logged_id();
                info!(subject = %subject, amount, id = id.as_deref(), "{op} applied");
            }
            Err(e @ EngineError::Internal(_)) => {
                error!(subject = %subject, amount, reason = %e, "{op} failed");
            }
            Err(e) => {
                info!(subject = %subject, amount, reason = %e, "{op} skipped");
            }
        }
    }

    /// How a subject is named in logs. Accounts appear by number only.
    fn describe(&self, subject: Subject<'_>) -> String {
        match subject {
            Subject::Account(id) => self
                .accounts
                .get(id)
                .map(|a| a.account_number().to_string())
                .unwrap_or_else(|_| "unknown account".to_string()),
            Subject::NewAccount => "new account".to_string(),
            Subject::Entry(reference) => reference.to_string(),
            Subject::Loan(id) => format!("loan {id}"),
        }
    }

    fn apply_open(&self, name: &str, pin: &str) -> Result<AccountView, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::Name.into());
        }
        let pin_hash = PinHash::new(pin, self.config.pin_hash_rounds)?;
        self.accounts.open(
            name.to_string(),
            pin_hash,
            &self.references,
            self.config.account_number_attempts,
        )
    }

    fn page_size(&self, limit: usize) -> Result<usize, EngineError> {
        if limit == 0 {
            return Err(ValidationError::Limit.into());
        }
        Ok(limit.min(self.config.max_page_size))
    }

    /// Apply a `DepositRequest`:
    /// - Ensure the amount is positive
    /// - Credit the account now, or record a `PENDING` entry for approval
    fn apply_deposit(&self, request: DepositRequest) -> Result<Receipt, EngineError> {
        ensure_positive(request.amount)?;
        let fingerprint = format!(
            "deposit:{}:{}:{}",
            request.account_id, request.amount, request.method
        );
        let guard = match self
            .idempotency
            .claim(request.account_id, request.idempotency_key.as_ref(), fingerprint)?
        {
            Claim::Replay(receipt) => return Ok(receipt),
            Claim::Fresh(guard) => guard,
        };

        let details = request.details.trim();
        let description = if details.is_empty() {
            format!("Deposit via {}", request.method)
        } else {
            details.to_string()
        };
        let entry = self.credit_deposit(
            request.account_id,
            request.amount,
            EntrySource::SelfDeposit {
                method: request.method,
            },
            self.config.deposit_settlement,
            description,
        )?;

        let receipt = Receipt::from(&entry);
        guard.complete(&receipt);
        Ok(receipt)
    }

    /// Deposit path shared by self-service deposits and loan disbursement.
    fn credit_deposit(
        &self,
        account: AccountId,
        amount: Amount,
        source: EntrySource,
        mode: SettlementMode,
        description: String,
    ) -> Result<Transaction, EngineError> {
        let unit = self.begin(&[account])?;
        let (postings, status) = match mode {
            SettlementMode::Immediate => (
                vec![Posting::Credit(account, amount)],
                TransactionStatus::Completed,
            ),
            SettlementMode::Pending => (Vec::new(), TransactionStatus::Pending),
        };
        unit.commit(
            &postings,
            EntryDraft {
                kind: TransactionType::Deposit,
                status,
                source,
                amount,
                sender: None,
                receiver: Some(account),
                actor: account,
                description,
            },
        )
    }

    /// Apply a `WithdrawalRequest`:
    /// - Ensure the amount is positive
    /// - Ensure the account has enough balance
    /// - Debit the account
    fn apply_withdrawal(&self, request: WithdrawalRequest) -> Result<Receipt, EngineError> {
        ensure_positive(request.amount)?;
        let fingerprint = format!("withdrawal:{}:{}", request.account_id, request.amount);
        let guard = match self
            .idempotency
            .claim(request.account_id, request.idempotency_key.as_ref(), fingerprint)?
        {
            Claim::Replay(receipt) => return Ok(receipt),
            Claim::Fresh(guard) => guard,
        };

        let unit = self.begin(&[request.account_id])?;
        let entry = unit.commit(
            &[Posting::Debit(request.account_id, request.amount)],
            EntryDraft {
                kind: TransactionType::Withdrawal,
                status: TransactionStatus::Completed,
                source: EntrySource::Withdrawal,
                amount: request.amount,
                sender: Some(request.account_id),
                receiver: None,
                actor: request.account_id,
                description: "Withdrawal".to_string(),
            },
        )?;

        let receipt = Receipt::from(&entry);
        guard.complete(&receipt);
        Ok(receipt)
    }

    /// Apply a `TransferRequest`:
    /// - Look up the sender and verify the PIN before anything else
    /// - Block restricted senders unless a valid IMF code is attached
    /// - Resolve the receiver and refuse self-transfers
    /// - Debit the sender and credit the receiver now, or on approval
    fn apply_transfer(&self, request: TransferRequest) -> Result<Receipt, EngineError> {
        ensure_positive(request.amount)?;
        let receiver_number = parse_account_number(&request.receiver_account_number)?;

        let sender = self.accounts.get(request.sender_id)?;
        if !sender.verify_pin(&request.pin) {
            warn!(account = %sender.account_number(), "transfer with invalid PIN");
            return Err(EngineError::AuthenticationFailure);
        }

        let fingerprint = format!(
            "transfer:{}:{}:{}",
            request.sender_id, receiver_number, request.amount
        );
        let guard = match self
            .idempotency
            .claim(request.sender_id, request.idempotency_key.as_ref(), fingerprint)?
        {
            Claim::Replay(receipt) => return Ok(receipt),
            Claim::Fresh(guard) => guard,
        };

        if self.gate.is_blocked(&sender) {
            let verified = request
                .imf_code
                .as_deref()
                .is_some_and(|code| self.gate.verify(code));
            if !verified {
                if request.imf_code.is_some() {
                    warn!(account = %sender.account_number(), "restricted transfer with invalid IMF code");
                }
                return Err(EngineError::RestrictedAccount);
            }
        }

        let receiver_id = self.accounts.resolve(receiver_number)?;
        if receiver_id == sender.id() {
            return Err(EngineError::SelfTransferNotAllowed);
        }

        let unit = self.begin(&[sender.id(), receiver_id])?;
        let (postings, status) = match self.config.transfer_settlement {
            SettlementMode::Immediate => (
                vec![
                    Posting::Debit(sender.id(), request.amount),
                    Posting::Credit(receiver_id, request.amount),
                ],
                TransactionStatus::Completed,
            ),
            SettlementMode::Pending => (
                vec![Posting::Debit(sender.id(), request.amount)],
                TransactionStatus::Pending,
            ),
        };
        let description = match request.description.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => format!("Transfer to {}", unit.account(receiver_id)?.name()),
        };
        let entry = unit.commit(
            &postings,
            EntryDraft {
                kind: TransactionType::Transfer,
                status,
                source: EntrySource::Transfer,
                amount: request.amount,
                sender: Some(sender.id()),
                receiver: Some(receiver_id),
                actor: sender.id(),
                description,
            },
        )?;

        let receipt = Receipt::from(&entry);
        guard.complete(&receipt);
        Ok(receipt)
    }

    /// Apply an `AdjustmentRequest`:
    /// - Ensure the amount is positive
    /// - Credit or debit the target; a debit may not overdraw it
    fn apply_adjustment(&self, request: AdjustmentRequest) -> Result<Receipt, EngineError> {
        ensure_positive(request.amount)?;
        let fingerprint = format!(
            "adjustment:{}:{}:{}:{}",
            request.admin_id, request.target_account_id, request.action, request.amount
        );
        let guard = match self
            .idempotency
            .claim(request.admin_id, request.idempotency_key.as_ref(), fingerprint)?
        {
            Claim::Replay(receipt) => return Ok(receipt),
            Claim::Fresh(guard) => guard,
        };

        let target = request.target_account_id;
        let admin = request.admin_id;
        let (posting, kind, source, sender, receiver) = match request.action {
            AdjustAction::Add => (
                Posting::Credit(target, request.amount),
                TransactionType::Deposit,
                EntrySource::AdminCredit { admin },
                None,
                Some(target),
            ),
            AdjustAction::Subtract => (
                Posting::Debit(target, request.amount),
                TransactionType::Withdrawal,
                EntrySource::AdminDebit { admin },
                Some(target),
                None,
            ),
        };
        let description = match request.description.as_deref().map(str::trim) {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => format!("Admin {}", request.action),
        };

        let unit = self.begin(&[target])?;
        let entry = unit.commit(
            &[posting],
            EntryDraft {
                kind,
                status: TransactionStatus::Completed,
                source,
                amount: request.amount,
                sender,
                receiver,
                actor: target,
                description,
            },
        )?;

        let receipt = Receipt::from(&entry);
        guard.complete(&receipt);
        Ok(receipt)
    }
}

/// What an operation acts on, as named in logs.
enum Subject<'a> {
    Account(AccountId),
    NewAccount,
    Entry(&'a str),
    Loan(LoanId),
}

/// The identifier a successful operation is logged with.
trait Outcome {
    fn logged_id(&self) -> Option<String>;
}

impl Outcome for Receipt {
    fn logged_id(&self) -> Option<String> {
        Some(self.reference.clone())
    }
}

impl Outcome for Transaction {
    fn logged_id(&self) -> Option<String> {
        Some(self.reference.clone())
    }
}

impl Outcome for AccountView {
    fn logged_id(&self) -> Option<String> {
        Some(self.account_number.clone())
    }
}

impl Outcome for LoanApplication {
    fn logged_id(&self) -> Option<String> {
        Some(self.id.to_string())
    }
}

impl Outcome for (LoanApplication, Receipt) {
    fn logged_id(&self) -> Option<String> {
        self.1.logged_id()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_positive(amount: Amount) -> Result<(), ValidationError> {
    if amount.is_zero() {
        return Err(ValidationError::NonPositiveAmount);
    }
    Ok(())
}

/// Trimmed account number, if it is exactly 8 ASCII digits.
fn parse_account_number(raw: &str) -> Result<&str, ValidationError> {
    let number = raw.trim();
    if number.len() == 8 && number.bytes().all(|b| b.is_ascii_digit()) {
        Ok(number)
    } else {
        Err(ValidationError::AccountNumber)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::IdempotencyKey;
    use crate::model::DepositMethod;

    // test utils

    const PIN: &str = "1234";

    fn immediate() -> Engine {
        Engine::with_config(EngineConfig {
            pin_hash_rounds: 1,
            ..EngineConfig::immediate()
        })
    }

    fn pending() -> Engine {
        Engine::with_config(EngineConfig {
            pin_hash_rounds: 1,
            ..EngineConfig::default()
        })
    }

    fn cents(c: u64) -> Amount {
        Amount::from_cents(c)
    }

    fn deposit(account: AccountId, amount: u64) -> DepositRequest {
        DepositRequest {
            account_id: account,
            amount: cents(amount),
            method: DepositMethod::Card,
            details: String::new(),
            idempotency_key: None,
        }
    }

    fn withdrawal(account: AccountId, amount: u64) -> WithdrawalRequest {
        WithdrawalRequest {
            account_id: account,
            amount: cents(amount),
            idempotency_key: None,
        }
    }

    fn transfer(sender: AccountId, receiver: &AccountView, amount: u64) -> TransferRequest {
        TransferRequest {
            sender_id: sender,
            receiver_account_number: receiver.account_number.clone(),
            amount: cents(amount),
            pin: PIN.to_string(),
            description: None,
            imf_code: None,
            idempotency_key: None,
        }
    }

    fn adjustment(target: AccountId, action: AdjustAction, amount: u64) -> AdjustmentRequest {
        AdjustmentRequest {
            admin_id: AccountId::new_v4(),
            target_account_id: target,
            action,
            amount: cents(amount),
            description: None,
            idempotency_key: None,
        }
    }

    /// Open an account holding `balance` cents.
    fn funded(engine: &Engine, name: &str, balance: u64) -> AccountView {
        let view = engine.open_account(name, PIN).unwrap();
        if balance > 0 {
            engine
                .adjust_balance(adjustment(view.id, AdjustAction::Add, balance))
                .unwrap();
        }
        engine.get_account(view.id).unwrap()
    }

    // Accounts

    #[test]
    fn open_account_starts_empty() {
        let engine = immediate();
        let view = engine.open_account("  Alice  ", PIN).unwrap();
        assert_eq!(view.name, "Alice");
        assert_eq!(view.balance, Amount::default());
        assert_eq!(engine.find_account(&view.account_number).unwrap().id, view.id);
    }

    #[test]
    fn open_account_validates_input() {
        let engine = immediate();
        assert!(matches!(
            engine.open_account(" ", PIN),
            Err(EngineError::InvalidInput(ValidationError::Name))
        ));
        assert!(matches!(
            engine.open_account("Alice", "12ab"),
            Err(EngineError::InvalidInput(ValidationError::Pin(_)))
        ));
    }

    #[test]
    fn find_account_rejects_malformed_number() {
        let engine = immediate();
        assert!(matches!(
            engine.find_account("1234"),
            Err(EngineError::InvalidInput(ValidationError::AccountNumber))
        ));
    }

    // Deposit

    #[test]
    fn immediate_deposit_credits_account() {
        let engine = immediate();
        let a = funded(&engine, "a", 0);
        let receipt = engine.deposit(deposit(a.id, 10_000)).unwrap();

        assert_eq!(receipt.status, TransactionStatus::Completed);
        assert_eq!(receipt.balance_after, cents(10_000));
        assert!(receipt.reference.starts_with("TXN-"));
        assert_eq!(engine.get_balance(a.id).unwrap(), cents(10_000));

        let entry = engine.transaction(&receipt.reference).unwrap();
        assert_eq!(entry.kind, TransactionType::Deposit);
        assert_eq!(entry.description, "Deposit via card");
        assert_eq!(entry.receiver.unwrap().account_number, a.account_number);
    }

    #[test]
    fn pending_deposit_moves_nothing() {
        let engine = pending();
        let a = funded(&engine, "a", 5_000);
        let receipt = engine.deposit(deposit(a.id, 10_000)).unwrap();

        assert_eq!(receipt.status, TransactionStatus::Pending);
        assert_eq!(receipt.balance_after, cents(5_000));
        assert_eq!(engine.get_balance(a.id).unwrap(), cents(5_000));

        let entry = engine.transaction(&receipt.reference).unwrap();
        assert_eq!(entry.balance_before, entry.balance_after);
    }

    #[test]
    fn zero_amount_is_rejected() {
        let engine = immediate();
        let a = funded(&engine, "a", 0);
        assert!(matches!(
            engine.deposit(deposit(a.id, 0)),
            Err(EngineError::InvalidInput(ValidationError::NonPositiveAmount))
        ));
        assert!(engine.ledger.is_empty());
    }

    #[test]
    fn deposit_to_unknown_account_fails() {
        let engine = immediate();
        assert!(matches!(
            engine.deposit(deposit(AccountId::new_v4(), 100)),
            Err(EngineError::NotFound(Resource::Account))
        ));
    }

    // Withdrawal

    #[test]
    fn withdrawal_decreases_balance() {
        let engine = immediate();
        let a = funded(&engine, "a", 10_000);
        let receipt = engine.withdraw(withdrawal(a.id, 3_000)).unwrap();
        assert_eq!(receipt.balance_after, cents(7_000));
        assert_eq!(receipt.status, TransactionStatus::Completed);
    }

    #[test]
    fn withdrawal_exact_amount_succeeds() {
        let engine = immediate();
        let a = funded(&engine, "a", 10_000);
        engine.withdraw(withdrawal(a.id, 10_000)).unwrap();
        assert_eq!(engine.get_balance(a.id).unwrap(), Amount::default());
    }

    #[test]
    fn withdrawal_insufficient_funds_fails() {
        let engine = immediate();
        let a = funded(&engine, "a", 10_000);
        let before = engine.ledger.len();

        assert!(matches!(
            engine.withdraw(withdrawal(a.id, 10_001)),
            Err(EngineError::InsufficientFunds)
        ));
        assert_eq!(engine.get_balance(a.id).unwrap(), cents(10_000));
        assert_eq!(engine.ledger.len(), before);
    }

    // Transfer

    #[test]
    fn immediate_transfer_moves_funds() {
        let engine = immediate();
        let a = funded(&engine, "alice", 100_000);
        let b = funded(&engine, "bob", 50_000);

        let receipt = engine.transfer(transfer(a.id, &b, 20_000)).unwrap();
        assert_eq!(receipt.status, TransactionStatus::Completed);
        assert_eq!(receipt.balance_after, cents(80_000));
        assert_eq!(engine.get_balance(a.id).unwrap(), cents(80_000));
        assert_eq!(engine.get_balance(b.id).unwrap(), cents(70_000));

        let entry = engine.transaction(&receipt.reference).unwrap();
        assert_eq!(entry.balance_before, cents(100_000));
        assert_eq!(entry.balance_after, cents(80_000));
        assert_eq!(entry.description, "Transfer to bob");
    }

    #[test]
    fn pending_transfer_debits_sender_only() {
        let engine = pending();
        let a = funded(&engine, "alice", 100_000);
        let b = funded(&engine, "bob", 50_000);

        let receipt = engine.transfer(transfer(a.id, &b, 20_000)).unwrap();
        assert_eq!(receipt.status, TransactionStatus::Pending);
        assert_eq!(engine.get_balance(a.id).unwrap(), cents(80_000));
        assert_eq!(engine.get_balance(b.id).unwrap(), cents(50_000));
    }

    #[test]
    fn transfer_with_wrong_pin_fails_first() {
        let engine = immediate();
        let a = funded(&engine, "alice", 0);
        let b = funded(&engine, "bob", 0);
        engine.set_restricted(a.id, true).unwrap();

        let mut request = transfer(a.id, &b, 1_000_000);
        request.pin = "9999".into();
        assert!(matches!(
            engine.transfer(request),
            Err(EngineError::AuthenticationFailure)
        ));
    }

    #[test]
    fn transfer_to_unknown_number_fails() {
        let engine = immediate();
        let a = funded(&engine, "alice", 10_000);
        let mut request = transfer(a.id, &a, 100);
        request.receiver_account_number = if a.account_number == "99999999" {
            "10000000".into()
        } else {
            "99999999".into()
        };
        assert!(matches!(
            engine.transfer(request),
            Err(EngineError::NotFound(Resource::AccountNumber(_)))
        ));
    }

    #[test]
    fn self_transfer_is_rejected() {
        let engine = immediate();
        let a = funded(&engine, "alice", 10_000);
        assert!(matches!(
            engine.transfer(transfer(a.id, &a, 100)),
            Err(EngineError::SelfTransferNotAllowed)
        ));
        assert_eq!(engine.get_balance(a.id).unwrap(), cents(10_000));
    }

    #[test]
    fn transfer_insufficient_funds_changes_nothing() {
        let engine = immediate();
        let a = funded(&engine, "alice", 10_000);
        let b = funded(&engine, "bob", 0);
        let before = engine.ledger.len();

        assert!(matches!(
            engine.transfer(transfer(a.id, &b, 10_001)),
            Err(EngineError::InsufficientFunds)
        ));
        assert_eq!(engine.get_balance(a.id).unwrap(), cents(10_000));
        assert_eq!(engine.get_balance(b.id).unwrap(), Amount::default());
        assert_eq!(engine.ledger.len(), before);
    }

    #[test]
    fn restricted_sender_needs_imf_code() {
        let engine = immediate();
        let a = funded(&engine, "alice", 10_000);
        let b = funded(&engine, "bob", 0);
        engine.set_restricted(a.id, true).unwrap();

        assert!(matches!(
            engine.transfer(transfer(a.id, &b, 1_000)),
            Err(EngineError::RestrictedAccount)
        ));

        let issued = engine.regenerate_restriction_code();
        let mut wrong = transfer(a.id, &b, 1_000);
        wrong.imf_code = Some("IMF-0000x".into());
        assert!(matches!(
            engine.transfer(wrong),
            Err(EngineError::RestrictedAccount)
        ));

        let mut verified = transfer(a.id, &b, 1_000);
        verified.imf_code = Some(issued.code.to_lowercase());
        engine.transfer(verified).unwrap();
        assert_eq!(engine.get_balance(b.id).unwrap(), cents(1_000));
    }

    #[test]
    fn custom_description_is_kept() {
        let engine = immediate();
        let a = funded(&engine, "alice", 10_000);
        let b = funded(&engine, "bob", 0);
        let mut request = transfer(a.id, &b, 100);
        request.description = Some("rent".into());
        let receipt = engine.transfer(request).unwrap();
        assert_eq!(engine.transaction(&receipt.reference).unwrap().description, "rent");
    }

    // Admin adjustment

    #[test]
    fn admin_subtract_cannot_overdraw() {
        let engine = immediate();
        let a = funded(&engine, "alice", 3_000);
        assert!(matches!(
            engine.adjust_balance(adjustment(a.id, AdjustAction::Subtract, 5_000)),
            Err(EngineError::InsufficientFunds)
        ));
        assert_eq!(engine.get_balance(a.id).unwrap(), cents(3_000));
    }

    #[test]
    fn admin_adjustments_are_tagged() {
        let engine = pending();
        let a = funded(&engine, "alice", 3_000);
        let receipt = engine
            .adjust_balance(adjustment(a.id, AdjustAction::Subtract, 1_000))
            .unwrap();
        assert_eq!(receipt.status, TransactionStatus::Completed);

        let entry = engine.transaction(&receipt.reference).unwrap();
        assert_eq!(entry.kind, TransactionType::Withdrawal);
        assert!(matches!(entry.source, EntrySource::AdminDebit { .. }));
        assert_eq!(entry.description, "Admin subtract");

        let credits = engine
            .list_transactions(Some(TransactionType::Deposit), 10)
            .unwrap();
        assert_eq!(credits.len(), 1);
        assert!(matches!(credits[0].source, EntrySource::AdminCredit { .. }));
    }

    // Idempotency

    #[test]
    fn retried_request_is_applied_once() {
        let engine = immediate();
        let a = funded(&engine, "alice", 10_000);
        let b = funded(&engine, "bob", 0);
        let mut request = transfer(a.id, &b, 1_000);
        request.idempotency_key = Some(IdempotencyKey::new("retry-1").unwrap());

        let first = engine.transfer(request.clone()).unwrap();
        let second = engine.transfer(request.clone()).unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.get_balance(a.id).unwrap(), cents(9_000));

        request.amount = cents(2_000);
        assert!(matches!(
            engine.transfer(request),
            Err(EngineError::InvalidInput(ValidationError::IdempotencyKeyReused))
        ));
    }

    #[test]
    fn same_key_from_two_holders_applies_twice() {
        let engine = immediate();
        let a = funded(&engine, "alice", 0);
        let b = funded(&engine, "bob", 0);
        let key = IdempotencyKey::new("deposit-1").unwrap();

        for id in [a.id, b.id] {
            let mut request = deposit(id, 500);
            request.idempotency_key = Some(key.clone());
            engine.deposit(request).unwrap();
        }
        assert_eq!(engine.get_balance(a.id).unwrap(), cents(500));
        assert_eq!(engine.get_balance(b.id).unwrap(), cents(500));
    }

    #[test]
    fn failed_request_releases_key() {
        let engine = immediate();
        let a = funded(&engine, "alice", 0);
        let mut request = withdrawal(a.id, 1_000);
        request.idempotency_key = Some(IdempotencyKey::new("w-1").unwrap());

        assert!(engine.withdraw(request.clone()).is_err());
        engine
            .adjust_balance(adjustment(a.id, AdjustAction::Add, 1_000))
            .unwrap();
        assert_eq!(engine.withdraw(request).unwrap().balance_after, Amount::default());
    }

    // Reads

    #[test]
    fn list_ledger_is_newest_first_and_bounded() {
        let engine = immediate();
        let a = funded(&engine, "alice", 10_000);
        engine.withdraw(withdrawal(a.id, 100)).unwrap();
        let last = engine.withdraw(withdrawal(a.id, 200)).unwrap();

        let history = engine.list_ledger(a.id, 2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].reference, last.reference);

        assert_eq!(engine.list_ledger(a.id, 1_000).unwrap().len(), 3);
        assert!(matches!(
            engine.list_ledger(a.id, 0),
            Err(EngineError::InvalidInput(ValidationError::Limit))
        ));
        assert!(matches!(
            engine.list_ledger(AccountId::new_v4(), 10),
            Err(EngineError::NotFound(Resource::Account))
        ));
    }

    #[test]
    fn unknown_reference_is_not_found() {
        let engine = immediate();
        assert!(matches!(
            engine.transaction("TXN-NOPE"),
            Err(EngineError::NotFound(Resource::Transaction(_)))
        ));
    }

    #[test]
    fn summary_totals() {
        let engine = immediate();
        funded(&engine, "alice", 10_000);
        funded(&engine, "bob", 2_550);
        let summary = engine.summary();
        assert_eq!(summary.total_accounts, 2);
        assert_eq!(summary.total_balance, cents(12_550));
        assert_eq!(summary.total_transactions, 2);
    }

    #[test]
    fn apply_dispatches_requests() {
        let engine = immediate();
        let a = funded(&engine, "alice", 0);
        engine.apply(Request::Deposit(deposit(a.id, 500))).unwrap();
        engine.apply(Request::Withdrawal(withdrawal(a.id, 200))).unwrap();
        assert_eq!(engine.get_balance(a.id).unwrap(), cents(300));
    }

    // Logging

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn captured_logs(f: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = captured.0.lock().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn failed_operations_are_logged() {
        let engine = pending();
        let logs = captured_logs(|| {
            assert!(engine.open_account("bob", "12ab").is_err());
            assert!(engine.approve_transaction("TXN-NOPE").is_err());
            assert!(engine.reject_transaction("TXN-NOPE", "fraud").is_err());
            assert!(engine.set_restricted(AccountId::new_v4(), true).is_err());
            assert!(engine
                .review_loan(LoanId::new_v4(), crate::loan::LoanDecision::Approve)
                .is_err());
            assert!(engine.disburse_loan(LoanId::new_v4()).is_err());
        });

        assert!(logs.contains("account opening skipped"), "{logs}");
        assert!(logs.contains("PIN must be 4 to 6 digits"), "{logs}");
        assert!(!logs.contains("12ab"), "{logs}");
        assert!(logs.contains("approval skipped"), "{logs}");
        assert!(logs.contains("rejection skipped"), "{logs}");
        assert!(logs.contains("TXN-NOPE"), "{logs}");
        assert!(logs.contains("restriction skipped"), "{logs}");
        assert!(logs.contains("loan review skipped"), "{logs}");
        assert!(logs.contains("loan disbursement skipped"), "{logs}");
    }

    #[test]
    fn successful_operations_log_their_identifier() {
        let engine = pending();
        let a = funded(&engine, "alice", 0);
        let logs = captured_logs(|| {
            let receipt = engine.deposit(deposit(a.id, 500)).unwrap();
            engine.approve_transaction(&receipt.reference).unwrap();
        });

        assert!(logs.contains("deposit applied"), "{logs}");
        assert!(logs.contains("approval applied"), "{logs}");
        assert!(logs.contains(&a.account_number), "{logs}");
        assert!(!logs.contains(&a.id.to_string()), "{logs}");
    }

    #[test]
    fn internal_failures_are_logged_as_errors() {
        let engine = immediate();
        let logs = captured_logs(|| {
            let result: Result<Receipt, EngineError> =
                Err(EngineError::Internal("balance overflow".into()));
            engine.log_result("approval", Subject::Entry("TXN-1"), None, &result);
        });

        assert!(logs.contains("ERROR"), "{logs}");
        assert!(logs.contains("approval failed"), "{logs}");
        assert!(logs.contains("balance overflow"), "{logs}");
    }
}
