//! Loan application workflow.

use super::{ensure_positive, Engine, EngineError, Subject};
use crate::ledger::EntrySource;
use crate::loan::{LoanApplication, LoanDecision, LoanStatus, LoanTier};
use crate::model::{AccountId, LoanId, Receipt, SettlementMode};
use crate::Amount;

impl Engine {
    /// Record a `PENDING` application for an existing account.
    pub fn submit_loan(
        &self,
        user_id: AccountId,
        tier: LoanTier,
        amount: Amount,
    ) -> Result<LoanApplication, EngineError> {
        let result = self.apply_loan_submission(user_id, tier, amount);
        self.log_result("loan submission", Subject::Account(user_id), Some(amount), &result);
        result
    }

    /// Approve or reject a `PENDING` application. Admin only.
    pub fn review_loan(&self, id: LoanId, decision: LoanDecision) -> Result<LoanApplication, EngineError> {
        let result = self.loans.lock(id).and_then(|mut application| {
            application.review(decision)?;
            Ok(application.clone())
        });
        self.log_result("loan review", Subject::Loan(id), None, &result);
        result
    }

    /// Credit an `APPROVED` loan to its applicant.
    ///
    /// The credit is a `COMPLETED` deposit whatever the deposit settlement
    /// mode. If it fails the application stays `APPROVED`.
    pub fn disburse_loan(&self, id: LoanId) -> Result<(LoanApplication, Receipt), EngineError> {
        let result = self.apply_disbursement(id);
        self.log_result("loan disbursement", Subject::Loan(id), None, &result);
        result
    }

    pub fn loan(&self, id: LoanId) -> Result<LoanApplication, EngineError> {
        self.loans.get(id)
    }

    /// Applications of one user, newest first.
    pub fn loans_for(&self, user_id: AccountId) -> Result<Vec<LoanApplication>, EngineError> {
        self.accounts.get(user_id)?;
        Ok(self.loans.for_user(user_id))
    }

    fn apply_disbursement(&self, id: LoanId) -> Result<(LoanApplication, Receipt), EngineError> {
        let mut application = self.loans.lock(id)?;
        application.ensure_status(LoanStatus::Approved)?;

        let entry = self.credit_deposit(
            application.user_id,
            application.loan_amount,
            EntrySource::LoanDisbursement { loan: id },
            SettlementMode::Immediate,
            format!("{} loan disbursement", application.tier),
        )?;
        application.mark_disbursed(entry.reference.clone())?;
        Ok((application.clone(), Receipt::from(&entry)))
    }

    fn apply_loan_submission(
        &self,
        user_id: AccountId,
        tier: LoanTier,
        amount: Amount,
    ) -> Result<LoanApplication, EngineError> {
        ensure_positive(amount)?;
        self.accounts.get(user_id)?;
        Ok(self
            .loans
            .insert(LoanApplication::new(user_id, tier, amount)?))
    }
}
