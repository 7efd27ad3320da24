//! Loan state machine.
//!
//! pending -> approved -> disbursed -> active -> completed, and pending -> rejected.
//! Every guard failure is `InvalidTransition` and leaves the loan untouched.

use chrono::{DateTime, Utc};

use crate::decimal::Money;
use crate::errors::{LendingError, Result};
use crate::state::Loan;
use crate::types::{LoanStatus, UserId};

fn ensure(loan: &Loan, expected: LoanStatus, action: &'static str) -> Result<()> {
    if loan.status != expected {
        tracing::warn!(loan_id = %loan.id, status = ?loan.status, action, "loan transition refused");
        return Err(LendingError::InvalidTransition {
            from: loan.status,
            action,
        });
    }
    Ok(())
}

fn transition(loan: &mut Loan, to: LoanStatus, now: DateTime<Utc>) -> LoanStatus {
    let from = loan.status;
    loan.status = to;
    loan.updated_at = now;
    from
}

pub fn approve(loan: &mut Loan, approver: UserId, now: DateTime<Utc>) -> Result<LoanStatus> {
    ensure(loan, LoanStatus::Pending, "approve")?;
    loan.approved_by = Some(approver);
    loan.approved_at = Some(now);
    Ok(transition(loan, LoanStatus::Approved, now))
}

pub fn reject(loan: &mut Loan, actor: UserId, reason: &str, now: DateTime<Utc>) -> Result<LoanStatus> {
    ensure(loan, LoanStatus::Pending, "reject")?;
    if reason.trim().is_empty() {
        return Err(LendingError::InvalidLoanTerms {
            message: "a rejection reason is required".to_string(),
        });
    }
    loan.rejected_by = Some(actor);
    loan.rejection_reason = Some(reason.trim().to_string());
    Ok(transition(loan, LoanStatus::Rejected, now))
}

/// approved -> disbursed; the schedule must be generated before `activate`
pub fn begin_disbursement(loan: &mut Loan, actor: UserId, now: DateTime<Utc>) -> Result<LoanStatus> {
    ensure(loan, LoanStatus::Approved, "disburse")?;
    loan.disbursed_by = Some(actor);
    loan.disbursed_at = Some(now);
    Ok(transition(loan, LoanStatus::Disbursed, now))
}

pub fn activate(loan: &mut Loan, now: DateTime<Utc>) -> Result<LoanStatus> {
    ensure(loan, LoanStatus::Disbursed, "activate")?;
    Ok(transition(loan, LoanStatus::Active, now))
}

/// only reachable from the repayment processor
pub(crate) fn complete(loan: &mut Loan, now: DateTime<Utc>) -> Result<LoanStatus> {
    ensure(loan, LoanStatus::Active, "complete")?;
    loan.completed_at = Some(now);
    Ok(transition(loan, LoanStatus::Completed, now))
}

/// mark the admin fee collected; only before disbursement, and only once
pub(crate) fn record_admin_fee(loan: &mut Loan, amount_paid: Money, now: DateTime<Utc>) -> Result<()> {
    if loan.admin_fee_paid || !matches!(loan.status, LoanStatus::Pending | LoanStatus::Approved) {
        return Err(LendingError::InvalidTransition {
            from: loan.status,
            action: "pay admin fee",
        });
    }
    if amount_paid < loan.admin_fee {
        return Err(LendingError::InsufficientPayment {
            required: loan.admin_fee,
            provided: amount_paid,
        });
    }
    loan.admin_fee_paid = true;
    loan.updated_at = now;
    Ok(())
}
