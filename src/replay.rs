//! Scenario replay: drives an [`Engine`] from a stream of named operations.

use std::collections::HashMap;

use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::csv::Operation;
use crate::model::{
    AccountId, AdjustAction, AdjustmentRequest, AdminId, DepositMethod, DepositRequest,
    TransferRequest, WithdrawalRequest,
};
use crate::{AccountView, Amount, Engine, EngineError};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("unknown account holder '{0}'")]
    UnknownHolder(String),

    #[error("account holder '{0}' already exists")]
    DuplicateHolder(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// An engine plus the holder names used by a scenario.
pub struct Replay {
    engine: Engine,
    holders: HashMap<String, AccountId>,
    admin: AdminId,
}

impl Replay {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            holders: HashMap::new(),
            admin: AdminId::new_v4(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run the replay over the given operation stream
    pub async fn run(&mut self, mut stream: impl Stream<Item = Operation> + Unpin) {
        while let Some(op) = stream.next().await {
            // a rejected operation must not stop the replay
            match self.apply(op) {
                Ok(()) => {}
                Err(e @ (ReplayError::UnknownHolder(_) | ReplayError::DuplicateHolder(_))) => {
                    warn!(reason = %e, "operation skipped: bad account holder");
                }
                Err(ReplayError::Engine(e)) => {
                    warn!(reason = %e.user_message(), "operation skipped");
                }
            }
        }
    }

    /// Apply one operation.
    pub fn apply(&mut self, op: Operation) -> Result<(), ReplayError> {
        match op {
            Operation::Open { name, pin } => {
                if self.holders.contains_key(&name) {
                    return Err(ReplayError::DuplicateHolder(name));
                }
                let view = self.engine.open_account(&name, &pin)?;
                self.holders.insert(name, view.id);
            }
            Operation::Deposit { name, amount } => {
                self.engine.deposit(DepositRequest {
                    account_id: self.holder(&name)?,
                    amount,
                    method: DepositMethod::BankTransfer,
                    details: String::new(),
                    idempotency_key: None,
                })?;
            }
            Operation::Withdraw { name, amount } => {
                self.engine.withdraw(WithdrawalRequest {
                    account_id: self.holder(&name)?,
                    amount,
                    idempotency_key: None,
                })?;
            }
            Operation::Transfer {
                name,
                counterparty,
                amount,
                pin,
            } => {
                let receiver = self.engine.get_account(self.holder(&counterparty)?)?;
                self.engine.transfer(TransferRequest {
                    sender_id: self.holder(&name)?,
                    receiver_account_number: receiver.account_number,
                    amount,
                    pin,
                    description: None,
                    imf_code: None,
                    idempotency_key: None,
                })?;
            }
            Operation::Credit { name, amount } => self.adjust(&name, AdjustAction::Add, amount)?,
            Operation::Debit { name, amount } => {
                self.adjust(&name, AdjustAction::Subtract, amount)?
            }
            Operation::Restrict { name } => {
                self.engine.set_restricted(self.holder(&name)?, true)?;
            }
            Operation::Settle => self.settle(),
        }
        Ok(())
    }

    /// Holder names with their accounts, sorted by name.
    pub fn accounts(&self) -> Vec<(String, AccountView)> {
        let mut accounts: Vec<_> = self
            .holders
            .iter()
            .filter_map(|(name, id)| Some((name.clone(), self.engine.get_account(*id).ok()?)))
            .collect();
        accounts.sort_by(|a, b| a.0.cmp(&b.0));
        accounts
    }

    fn holder(&self, name: &str) -> Result<AccountId, ReplayError> {
        self.holders
            .get(name)
            .copied()
            .ok_or_else(|| ReplayError::UnknownHolder(name.to_string()))
    }

    fn adjust(&self, name: &str, action: AdjustAction, amount: Amount) -> Result<(), ReplayError> {
        self.engine.adjust_balance(AdjustmentRequest {
            admin_id: self.admin,
            target_account_id: self.holder(name)?,
            action,
            amount,
            description: None,
            idempotency_key: None,
        })?;
        Ok(())
    }

    /// Approve the whole pending queue.
    fn settle(&self) {
        let page = self.engine.config().max_page_size;
        let mut approved = 0usize;
        loop {
            let Ok(pending) = self.engine.pending_transactions(page) else {
                break;
            };
            if pending.is_empty() {
                break;
            }
            let before = approved;
            for entry in pending {
                if self.engine.approve_transaction(&entry.reference).is_ok() {
                    approved += 1;
                }
            }
            // every approval in the page failed: stop instead of spinning
            if approved == before {
                break;
            }
        }
        info!(approved, "pending queue settled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::SettlementMode;

    fn replay(mode: SettlementMode) -> Replay {
        Replay::new(Engine::with_config(EngineConfig {
            deposit_settlement: mode,
            transfer_settlement: mode,
            pin_hash_rounds: 1,
            ..EngineConfig::default()
        }))
    }

    fn cents(c: u64) -> Amount {
        Amount::from_cents(c)
    }

    fn open(name: &str) -> Operation {
        Operation::Open {
            name: name.into(),
            pin: "1234".into(),
        }
    }

    fn balances(replay: &Replay) -> Vec<(String, Amount)> {
        replay
            .accounts()
            .into_iter()
            .map(|(name, view)| (name, view.balance))
            .collect()
    }

    #[tokio::test]
    async fn run_processes_all_operations() {
        let mut replay = replay(SettlementMode::Immediate);
        let ops = vec![
            open("bob"),
            open("alice"),
            Operation::Deposit { name: "alice".into(), amount: cents(100_000) },
            Operation::Deposit { name: "bob".into(), amount: cents(50_000) },
            Operation::Transfer {
                name: "alice".into(),
                counterparty: "bob".into(),
                amount: cents(20_000),
                pin: "1234".into(),
            },
        ];

        replay.run(tokio_stream::iter(ops)).await;

        assert_eq!(
            balances(&replay),
            vec![("alice".to_string(), cents(80_000)), ("bob".to_string(), cents(70_000))]
        );
    }

    #[tokio::test]
    async fn run_skips_failed_operations_and_continues() {
        let mut replay = replay(SettlementMode::Immediate);
        let ops = vec![
            open("alice"),
            Operation::Deposit { name: "alice".into(), amount: cents(10_000) },
            Operation::Withdraw { name: "alice".into(), amount: cents(20_000) },
            Operation::Deposit { name: "carol".into(), amount: cents(10_000) },
            open("alice"),
            Operation::Deposit { name: "alice".into(), amount: cents(5_000) },
        ];

        replay.run(tokio_stream::iter(ops)).await;

        assert_eq!(balances(&replay), vec![("alice".to_string(), cents(15_000))]);
    }

    #[test]
    fn settle_approves_pending_queue() {
        let mut replay = replay(SettlementMode::Pending);
        replay.apply(open("alice")).unwrap();
        replay
            .apply(Operation::Deposit { name: "alice".into(), amount: cents(10_000) })
            .unwrap();
        assert_eq!(balances(&replay)[0].1, Amount::default());

        replay.apply(Operation::Settle).unwrap();
        assert_eq!(balances(&replay)[0].1, cents(10_000));
        assert!(replay.engine().pending_transactions(10).unwrap().is_empty());
    }

    #[test]
    fn credit_debit_and_restrict() {
        let mut replay = replay(SettlementMode::Pending);
        replay.apply(open("alice")).unwrap();
        replay
            .apply(Operation::Credit { name: "alice".into(), amount: cents(3_000) })
            .unwrap();
        assert!(matches!(
            replay.apply(Operation::Debit { name: "alice".into(), amount: cents(5_000) }),
            Err(ReplayError::Engine(EngineError::InsufficientFunds))
        ));
        replay
            .apply(Operation::Restrict { name: "alice".into() })
            .unwrap();

        let (_, view) = &replay.accounts()[0];
        assert_eq!(view.balance, cents(3_000));
        assert!(view.is_restricted);
    }
}
