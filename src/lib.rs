pub mod account;
pub mod amount;
pub mod config;
pub mod csv;
pub mod engine;
pub mod gate;
pub mod idempotency;
pub mod ledger;
pub mod loan;
pub mod model;
pub mod pin;
pub mod reference;
pub mod replay;

pub use account::{Account, AccountView};
pub use amount::Amount;
pub use config::EngineConfig;
pub use engine::{Engine, EngineError, Resource, ValidationError};
pub use idempotency::IdempotencyKey;
pub use ledger::{Transaction, TransactionStatus, TransactionType};
pub use model::{AccountId, Receipt, Request};
