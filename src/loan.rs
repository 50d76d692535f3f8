//! Loan applications.
//!
//! Applications move `PENDING -> APPROVED | REJECTED` on admin review and
//! `APPROVED -> DISBURSED` once the engine has credited the applicant.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RawMutex, RwLock};
use parking_lot::lock_api::ArcMutexGuard;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Amount;
use crate::engine::{EngineError, Resource, ValidationError};
use crate::model::{AccountId, LoanId, Time};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanTier {
    Personal,
    Standard,
    Executive,
}

impl LoanTier {
    /// Annual percentage rate, in percent.
    pub fn apr(&self) -> Decimal {
        match self {
            LoanTier::Personal => Decimal::new(45, 1),
            LoanTier::Standard => Decimal::new(72, 1),
            LoanTier::Executive => Decimal::new(92, 1),
        }
    }

    pub fn minimum(&self) -> Amount {
        match self {
            LoanTier::Personal => Amount::from_cents(100_000),
            LoanTier::Standard => Amount::from_cents(1_000_000),
            LoanTier::Executive => Amount::from_cents(5_000_000),
        }
    }

    pub fn payment_type(&self) -> &'static str {
        match self {
            LoanTier::Personal => "Partial",
            LoanTier::Standard => "Flexible",
            LoanTier::Executive => "Customized",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LoanTier::Personal => "PERSONAL",
            LoanTier::Standard => "STANDARD",
            LoanTier::Executive => "EXECUTIVE",
        }
    }
}

impl fmt::Display for LoanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
    Disbursed,
}

impl LoanStatus {
    fn label(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Disbursed => "disbursed",
        }
    }
}

/// Admin verdict on a pending application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoanDecision {
    Approve,
    Reject { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoanApplication {
    pub id: LoanId,
    pub user_id: AccountId,
    pub tier: LoanTier,
    pub apr: Decimal,
    pub loan_amount: Amount,
    pub payment_type: &'static str,
    pub status: LoanStatus,
    pub rejection_reason: Option<String>,
    pub transaction_ref: Option<String>,
    pub created_at: Time,
    pub reviewed_at: Option<Time>,
    pub disbursed_at: Option<Time>,
}

impl LoanApplication {
    pub(crate) fn new(user_id: AccountId, tier: LoanTier, loan_amount: Amount) -> Result<Self, ValidationError> {
        if loan_amount < tier.minimum() {
            return Err(ValidationError::LoanBelowMinimum {
                tier: tier.name(),
                amount: loan_amount,
                minimum: tier.minimum(),
            });
        }
        Ok(Self {
            id: LoanId::new_v4(),
            user_id,
            tier,
            apr: tier.apr(),
            loan_amount,
            payment_type: tier.payment_type(),
            status: LoanStatus::Pending,
            rejection_reason: None,
            transaction_ref: None,
            created_at: Utc::now(),
            reviewed_at: None,
            disbursed_at: None,
        })
    }

    pub(crate) fn review(&mut self, decision: LoanDecision) -> Result<(), ValidationError> {
        self.ensure_status(LoanStatus::Pending)?;
        match decision {
            LoanDecision::Approve => self.status = LoanStatus::Approved,
            LoanDecision::Reject { reason } => {
                let reason = reason.trim();
                if reason.is_empty() {
                    return Err(ValidationError::MissingReason);
                }
                self.status = LoanStatus::Rejected;
                self.rejection_reason = Some(reason.to_string());
            }
        }
        self.reviewed_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn mark_disbursed(&mut self, reference: String) -> Result<(), ValidationError> {
        self.ensure_status(LoanStatus::Approved)?;
        self.status = LoanStatus::Disbursed;
        self.transaction_ref = Some(reference);
        self.disbursed_at = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn ensure_status(&self, status: LoanStatus) -> Result<(), ValidationError> {
        if self.status == status {
            Ok(())
        } else {
            Err(ValidationError::LoanState(self.id.to_string(), status.label()))
        }
    }
}

/// Storage for loan applications, one lock per application.
#[derive(Default)]
pub struct LoanBook {
    applications: RwLock<HashMap<LoanId, Arc<Mutex<LoanApplication>>>>,
}

impl LoanBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, application: LoanApplication) -> LoanApplication {
        let snapshot = application.clone();
        self.applications
            .write()
            .insert(application.id, Arc::new(Mutex::new(application)));
        snapshot
    }

    pub fn get(&self, id: LoanId) -> Result<LoanApplication, EngineError> {
        let row = self.row(id)?;
        let application = row.lock().clone();
        Ok(application)
    }

    /// Exclusive hold on one application, for multi-step transitions.
    pub fn lock(&self, id: LoanId) -> Result<ArcMutexGuard<RawMutex, LoanApplication>, EngineError> {
        Ok(self.row(id)?.lock_arc())
    }

    /// Applications of one user, newest first.
    pub fn for_user(&self, user_id: AccountId) -> Vec<LoanApplication> {
        let rows: Vec<_> = self.applications.read().values().cloned().collect();
        let mut applications: Vec<_> = rows
            .iter()
            .map(|row| row.lock().clone())
            .filter(|application| application.user_id == user_id)
            .collect();
        applications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        applications
    }

    fn row(&self, id: LoanId) -> Result<Arc<Mutex<LoanApplication>>, EngineError> {
        self.applications
            .read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(Resource::Loan))
    }
}
