pub mod lifecycle;
pub mod summary;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::LoanPolicy;
use crate::decimal::{Money, Rate};
use crate::errors::{LendingError, Result};
use crate::events::Event;
use crate::payments::amortization::{amortize, calculate_emi, Amortization};
use crate::state::{Loan, Repayment};
use crate::store::{LoanEntry, Store};
use crate::types::{LoanId, LoanStatus, RepaymentId, RepaymentStatus, UserId};

pub use summary::LoanSummary;

/// loan applications, decisions, disbursement and schedule upkeep
#[derive(Clone)]
pub struct LoanService {
    store: Arc<Store>,
    policy: LoanPolicy,
}

impl LoanService {
    pub fn new(store: Arc<Store>, policy: LoanPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &LoanPolicy {
        &self.policy
    }

    /// record a pending application; terms are checked against policy here
    pub fn apply(
        &self,
        borrower_id: UserId,
        principal: Money,
        annual_rate: Rate,
        tenure_months: u32,
        purpose: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Loan> {
        self.check_terms(principal, annual_rate, tenure_months)?;

        let admin_fee = principal.apply(self.policy.admin_fee_rate).round_cents();
        let loan = Loan {
            id: Uuid::new_v4(),
            borrower_id,
            principal,
            annual_rate,
            tenure_months,
            purpose,
            admin_fee,
            admin_fee_paid: admin_fee.is_zero(),
            status: LoanStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejection_reason: None,
            disbursed_by: None,
            disbursed_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_loan(LoanEntry {
            loan: loan.clone(),
            repayments: Vec::new(),
        });

        tracing::info!(
            loan_id = %loan.id,
            borrower_id = %borrower_id,
            principal = %principal,
            rate = %annual_rate,
            tenure_months,
            "loan application received"
        );
        self.store.emit(Event::LoanApplied {
            loan_id: loan.id,
            borrower_id,
            amount: principal,
            timestamp: now,
        });

        Ok(loan)
    }

    pub async fn approve(&self, loan_id: &LoanId, approver: UserId, now: DateTime<Utc>) -> Result<Loan> {
        let mut entry = self.store.lock_loan(loan_id).await?;
        let old_status = lifecycle::approve(&mut entry.loan, approver, now)?;

        tracing::info!(loan_id = %loan_id, approver = %approver, "loan approved");
        self.status_changed(&entry.loan, old_status, Some(approver), now);
        Ok(entry.loan.clone())
    }

    pub async fn reject(&self, loan_id: &LoanId, actor: UserId, reason: &str, now: DateTime<Utc>) -> Result<Loan> {
        let mut entry = self.store.lock_loan(loan_id).await?;
        let old_status = lifecycle::reject(&mut entry.loan, actor, reason, now)?;

        tracing::info!(loan_id = %loan_id, actor = %actor, reason, "loan rejected");
        self.status_changed(&entry.loan, old_status, Some(actor), now);
        Ok(entry.loan.clone())
    }

    /// approved -> disbursed -> active, generating the schedule exactly once
    ///
    /// Concurrent calls serialize on the loan row; the loser sees a non-approved
    /// loan and gets `InvalidTransition` without touching the schedule.
    pub async fn disburse(&self, loan_id: &LoanId, actor: UserId, now: DateTime<Utc>) -> Result<LoanEntry> {
        let mut entry = self.store.lock_loan(loan_id).await?;

        if entry.loan.status != LoanStatus::Approved || !entry.repayments.is_empty() {
            tracing::warn!(loan_id = %loan_id, status = ?entry.loan.status, "disbursement refused");
            return Err(LendingError::InvalidTransition {
                from: entry.loan.status,
                action: "disburse",
            });
        }
        if self.policy.require_admin_fee_before_disbursement && !entry.loan.admin_fee_paid {
            return Err(LendingError::AdminFeeUnpaid {
                fee: entry.loan.admin_fee,
            });
        }

        let plan = amortize(entry.loan.principal, entry.loan.annual_rate, entry.loan.tenure_months, now)?;

        let old_status = lifecycle::begin_disbursement(&mut entry.loan, actor, now)?;
        self.status_changed(&entry.loan, old_status, Some(actor), now);

        entry.repayments = build_repayments(entry.loan.id, &plan);
        self.store.emit(Event::ScheduleGenerated {
            loan_id: *loan_id,
            installments: entry.loan.tenure_months,
            emi: plan.emi,
            timestamp: now,
        });

        let old_status = lifecycle::activate(&mut entry.loan, now)?;
        self.status_changed(&entry.loan, old_status, None, now);

        tracing::info!(
            loan_id = %loan_id,
            actor = %actor,
            emi = %plan.emi,
            installments = entry.repayments.len(),
            "loan disbursed"
        );
        Ok(entry.clone())
    }

    /// regenerate the schedule of an active loan nobody has paid into yet
    pub async fn reset_schedule(&self, loan_id: &LoanId, actor: UserId, now: DateTime<Utc>) -> Result<LoanEntry> {
        let mut entry = self.store.lock_loan(loan_id).await?;

        let any_paid = entry.repayments.iter().any(|r| r.status == RepaymentStatus::Paid);
        if entry.loan.status != LoanStatus::Active || any_paid {
            return Err(LendingError::InvalidTransition {
                from: entry.loan.status,
                action: "reset schedule",
            });
        }

        let anchor = entry.loan.disbursed_at.unwrap_or(now);
        let plan = amortize(entry.loan.principal, entry.loan.annual_rate, entry.loan.tenure_months, anchor)?;

        entry.repayments = build_repayments(entry.loan.id, &plan);
        entry.loan.updated_at = now;

        tracing::warn!(loan_id = %loan_id, actor = %actor, "repayment schedule reset");
        self.store.emit(Event::ScheduleReset {
            loan_id: *loan_id,
            actor_id: actor,
            timestamp: now,
        });
        Ok(entry.clone())
    }

    /// flag pending installments whose due date has passed
    pub async fn refresh_overdue(&self, loan_id: &LoanId, now: DateTime<Utc>) -> Result<Vec<RepaymentId>> {
        let mut entry = self.store.lock_loan(loan_id).await?;
        if entry.loan.status != LoanStatus::Active {
            return Ok(Vec::new());
        }

        let mut flagged = Vec::new();
        for repayment in entry.repayments.iter_mut() {
            if repayment.status == RepaymentStatus::Pending && repayment.due_date < now {
                repayment.status = RepaymentStatus::Overdue;
                flagged.push(repayment.id);
                self.store.emit(Event::RepaymentOverdue {
                    loan_id: *loan_id,
                    repayment_id: repayment.id,
                    timestamp: now,
                });
            }
        }

        if !flagged.is_empty() {
            tracing::warn!(loan_id = %loan_id, count = flagged.len(), "installments overdue");
        }
        Ok(flagged)
    }

    pub async fn loan(&self, loan_id: &LoanId) -> Result<LoanEntry> {
        self.store.loan(loan_id).await
    }

    pub async fn summary(&self, loan_id: &LoanId) -> Result<LoanSummary> {
        let entry = self.store.loan(loan_id).await?;
        LoanSummary::compute(&entry.loan, &entry.repayments)
    }

    fn check_terms(&self, principal: Money, annual_rate: Rate, tenure_months: u32) -> Result<()> {
        let policy = &self.policy;
        if principal < policy.minimum_principal {
            return Err(LendingError::BelowMinimum {
                minimum: policy.minimum_principal,
                provided: principal,
            });
        }
        if principal > policy.maximum_principal {
            return Err(LendingError::AboveMaximum {
                maximum: policy.maximum_principal,
                provided: principal,
            });
        }
        if tenure_months == 0 || tenure_months > policy.maximum_tenure_months {
            return Err(LendingError::InvalidLoanTerms {
                message: format!(
                    "tenure must be between 1 and {} months, got {}",
                    policy.maximum_tenure_months, tenure_months
                ),
            });
        }
        if annual_rate.is_negative() || annual_rate > policy.maximum_annual_rate {
            return Err(LendingError::InvalidLoanTerms {
                message: format!(
                    "rate must be between 0% and {}, got {}",
                    policy.maximum_annual_rate, annual_rate
                ),
            });
        }
        // terms the schedule cannot be computed for are refused up front
        calculate_emi(principal, annual_rate, tenure_months)?;
        Ok(())
    }

    fn status_changed(&self, loan: &Loan, old_status: LoanStatus, actor_id: Option<UserId>, now: DateTime<Utc>) {
        self.store.emit(Event::LoanStatusChanged {
            loan_id: loan.id,
            old_status,
            new_status: loan.status,
            actor_id,
            timestamp: now,
        });
    }
}

fn build_repayments(loan_id: LoanId, plan: &Amortization) -> Vec<Repayment> {
    plan.schedule
        .iter()
        .map(|installment| Repayment {
            id: Uuid::new_v4(),
            loan_id,
            installment_number: installment.installment_number,
            amount: installment.amount,
            principal_component: installment.principal_component,
            interest_component: installment.interest_component,
            due_date: installment.due_date,
            status: RepaymentStatus::Pending,
            paid_at: None,
            payment_reference: None,
        })
        .collect()
}
