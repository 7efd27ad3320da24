use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::Result;
use crate::payments::amortization;
use crate::payments::repayment::next_outstanding;
use crate::state::{Loan, Repayment};
use crate::types::{LoanId, LoanStatus, RepaymentStatus};

/// derived loan figures, recomputed on every read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanSummary {
    pub loan_id: LoanId,
    pub status: LoanStatus,
    pub principal: Money,
    pub emi: Money,
    pub total_payable: Money,
    pub total_interest: Money,
    pub total_paid: Money,
    pub remaining_balance: Money,
    pub installments_paid: u32,
    pub installments_outstanding: u32,
    pub installments_overdue: u32,
    pub next_due_date: Option<DateTime<Utc>>,
    pub next_due_amount: Option<Money>,
}

impl LoanSummary {
    pub fn compute(loan: &Loan, repayments: &[Repayment]) -> Result<Self> {
        let emi = amortization::calculate_emi(loan.principal, loan.annual_rate, loan.tenure_months)?;
        let total_payable = emi * rust_decimal::Decimal::from(loan.tenure_months);

        let total_paid: Money = repayments
            .iter()
            .filter(|r| r.status == RepaymentStatus::Paid)
            .map(|r| r.amount)
            .sum();

        // once scheduled, what is owed is what the installments still say
        let remaining_balance = if repayments.is_empty() {
            total_payable
        } else {
            repayments
                .iter()
                .filter(|r| r.status.is_outstanding())
                .map(|r| r.amount)
                .sum()
        };

        let count = |status: RepaymentStatus| repayments.iter().filter(|r| r.status == status).count() as u32;
        let next = next_outstanding(repayments).map(|i| &repayments[i]);

        Ok(Self {
            loan_id: loan.id,
            status: loan.status,
            principal: loan.principal,
            emi,
            total_payable,
            total_interest: total_payable - loan.principal,
            total_paid,
            remaining_balance,
            installments_paid: count(RepaymentStatus::Paid),
            installments_outstanding: count(RepaymentStatus::Pending) + count(RepaymentStatus::Overdue),
            installments_overdue: count(RepaymentStatus::Overdue),
            next_due_date: next.map(|r| r.due_date),
            next_due_amount: next.map(|r| r.amount),
        })
    }
}
