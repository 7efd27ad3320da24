use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::decimal::Money;
use crate::errors::{LendingError, Result};
use crate::events::Event;
use crate::loans::lifecycle;
use crate::state::Repayment;
use crate::store::{LoanEntry, Store};
use crate::types::{LoanId, LoanStatus, RepaymentId, RepaymentStatus};

/// result of applying one payment to a loan
#[derive(Debug, Clone, PartialEq)]
pub struct RepaymentOutcome {
    pub repayment: Repayment,
    pub loan_completed: bool,
}

/// validate and apply a payment against a locked loan entry
///
/// Nothing is written unless every check passes. Applying to a paid
/// installment, or reusing a payment reference, is rejected with `AlreadyPaid`.
pub fn apply_payment(
    entry: &mut LoanEntry,
    repayment_id: Option<RepaymentId>,
    amount_paid: Money,
    payment_reference: &str,
    now: DateTime<Utc>,
) -> Result<RepaymentOutcome> {
    let loan_id = entry.loan.id;

    // an installment of another loan is refused whatever state this one is in
    let target = match repayment_id {
        Some(id) => Some(
            entry
                .repayments
                .iter()
                .position(|r| r.id == id && r.loan_id == loan_id)
                .ok_or(LendingError::MismatchedLoan {
                    loan_id,
                    repayment_id: id,
                })?,
        ),
        None => None,
    };

    if entry.loan.status != LoanStatus::Active {
        return Err(LendingError::InvalidTransition {
            from: entry.loan.status,
            action: "repay",
        });
    }

    if let Some(previous) = entry
        .repayments
        .iter()
        .find(|r| r.payment_reference.as_deref() == Some(payment_reference))
    {
        return Err(LendingError::AlreadyPaid {
            repayment_id: previous.id,
        });
    }

    let index = match target {
        Some(index) => {
            if !entry.repayments[index].status.is_outstanding() {
                return Err(LendingError::AlreadyPaid {
                    repayment_id: entry.repayments[index].id,
                });
            }
            index
        }
        None => next_outstanding(&entry.repayments)
            .ok_or(LendingError::NoPendingRepayment { loan_id })?,
    };

    let required = entry.repayments[index].amount;
    if amount_paid < required {
        return Err(LendingError::InsufficientPayment {
            required,
            provided: amount_paid,
        });
    }

    let repayment = &mut entry.repayments[index];
    repayment.status = RepaymentStatus::Paid;
    repayment.paid_at = Some(now);
    repayment.payment_reference = Some(payment_reference.to_string());
    let repayment = repayment.clone();

    let outstanding = entry
        .repayments
        .iter()
        .filter(|r| r.status.is_outstanding())
        .count();

    let loan_completed = outstanding == 0;
    if loan_completed {
        lifecycle::complete(&mut entry.loan, now)?;
    }

    Ok(RepaymentOutcome {
        repayment,
        loan_completed,
    })
}

/// earliest unpaid installment
pub fn next_outstanding(repayments: &[Repayment]) -> Option<usize> {
    repayments
        .iter()
        .enumerate()
        .filter(|(_, r)| r.status.is_outstanding())
        .min_by_key(|(_, r)| (r.due_date, r.installment_number))
        .map(|(i, _)| i)
}

/// applies payments to scheduled repayments and closes fully paid loans
#[derive(Clone)]
pub struct RepaymentProcessor {
    store: Arc<Store>,
}

impl RepaymentProcessor {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn apply(
        &self,
        loan_id: &LoanId,
        repayment_id: Option<RepaymentId>,
        amount_paid: Money,
        payment_reference: &str,
        now: DateTime<Utc>,
    ) -> Result<RepaymentOutcome> {
        let mut entry = self.store.lock_loan(loan_id).await?;
        match apply_payment(&mut entry, repayment_id, amount_paid, payment_reference, now) {
            Ok(outcome) => {
                self.record(&outcome, *loan_id, payment_reference, now);
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!(loan_id = %loan_id, reference = payment_reference, error = %e, "repayment rejected");
                Err(e)
            }
        }
    }

    /// log and emit for an applied payment
    pub(crate) fn record(&self, outcome: &RepaymentOutcome, loan_id: LoanId, reference: &str, now: DateTime<Utc>) {
        tracing::info!(
            loan_id = %loan_id,
            repayment_id = %outcome.repayment.id,
            installment = outcome.repayment.installment_number,
            reference,
            "repayment applied"
        );
        self.store.emit(Event::RepaymentPaid {
            loan_id,
            repayment_id: outcome.repayment.id,
            amount: outcome.repayment.amount,
            reference: reference.to_string(),
            timestamp: now,
        });

        if outcome.loan_completed {
            tracing::info!(loan_id = %loan_id, "loan completed");
            self.store.emit(Event::LoanStatusChanged {
                loan_id,
                old_status: LoanStatus::Active,
                new_status: LoanStatus::Completed,
                actor_id: None,
                timestamp: now,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::payments::amortization::amortize;
    use crate::state::Loan;
    use chrono::Duration;
    use uuid::Uuid;

    fn active_entry(tenure: u32) -> LoanEntry {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let principal = Money::from_major(30_000);
        let rate = Rate::from_percentage(12);
        let plan = amortize(principal, rate, tenure, now).unwrap();

        let repayments = plan
            .schedule
            .iter()
            .map(|i| Repayment {
                id: Uuid::new_v4(),
                loan_id: id,
                installment_number: i.installment_number,
                amount: i.amount,
                principal_component: i.principal_component,
                interest_component: i.interest_component,
                due_date: i.due_date,
                status: RepaymentStatus::Pending,
                paid_at: None,
                payment_reference: None,
            })
            .collect();

        LoanEntry {
            loan: Loan {
                id,
                borrower_id: Uuid::new_v4(),
                principal,
                annual_rate: rate,
                tenure_months: tenure,
                purpose: None,
                admin_fee: Money::ZERO,
                admin_fee_paid: true,
                status: LoanStatus::Active,
                approved_by: Some(Uuid::new_v4()),
                approved_at: Some(now),
                rejected_by: None,
                rejection_reason: None,
                disbursed_by: Some(Uuid::new_v4()),
                disbursed_at: Some(now),
                completed_at: None,
                created_at: now,
                updated_at: now,
            },
            repayments,
        }
    }

    #[test]
    fn test_untargeted_payment_hits_earliest_installment() {
        let mut entry = active_entry(3);
        let emi = entry.repayments[0].amount;

        let outcome = apply_payment(&mut entry, None, emi, "LRP-A", Utc::now()).unwrap();
        assert_eq!(outcome.repayment.installment_number, 1);
        assert!(!outcome.loan_completed);

        let outcome = apply_payment(&mut entry, None, emi, "LRP-B", Utc::now()).unwrap();
        assert_eq!(outcome.repayment.installment_number, 2);
    }

    #[test]
    fn test_last_payment_completes_loan() {
        let mut entry = active_entry(3);
        let ids: Vec<_> = entry.repayments.iter().map(|r| (r.id, r.amount)).collect();

        for (i, (id, amount)) in ids.iter().enumerate() {
            let outcome =
                apply_payment(&mut entry, Some(*id), *amount, &format!("LRP-{}", i), Utc::now()).unwrap();
            assert_eq!(outcome.loan_completed, i == 2);
        }
        assert_eq!(entry.loan.status, LoanStatus::Completed);
        assert!(entry.repayments.iter().all(|r| r.status == RepaymentStatus::Paid));

        // there is no fourth installment
        let stranger = Uuid::new_v4();
        let err = apply_payment(&mut entry, Some(stranger), Money::from_major(1), "LRP-X", Utc::now())
            .unwrap_err();
        assert!(matches!(err, LendingError::MismatchedLoan { .. }));

        // a completed loan takes no further payments
        let first = entry.repayments[0].id;
        let err = apply_payment(&mut entry, Some(first), Money::from_major(1), "LRP-Y", Utc::now())
            .unwrap_err();
        assert!(matches!(err, LendingError::InvalidTransition { .. }));

        let err = apply_payment(&mut entry, None, Money::from_major(1), "LRP-Z", Utc::now()).unwrap_err();
        assert!(matches!(err, LendingError::InvalidTransition { .. }));
    }

    #[test]
    fn test_foreign_repayment_is_mismatched() {
        let mut entry = active_entry(3);
        let other = active_entry(3);
        let foreign = other.repayments[0].id;

        let err = apply_payment(&mut entry, Some(foreign), Money::from_major(50_000), "LRP-1", Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            LendingError::MismatchedLoan {
                loan_id: entry.loan.id,
                repayment_id: foreign,
            }
        );
    }

    #[test]
    fn test_double_application_rejected() {
        let mut entry = active_entry(2);
        let first = entry.repayments[0].clone();

        apply_payment(&mut entry, Some(first.id), first.amount, "LRP-1", Utc::now()).unwrap();

        let err = apply_payment(&mut entry, Some(first.id), first.amount, "LRP-2", Utc::now()).unwrap_err();
        assert_eq!(err, LendingError::AlreadyPaid { repayment_id: first.id });

        // same reference replayed without a target
        let err = apply_payment(&mut entry, None, first.amount, "LRP-1", Utc::now()).unwrap_err();
        assert_eq!(err, LendingError::AlreadyPaid { repayment_id: first.id });
        assert_eq!(entry.repayments[1].status, RepaymentStatus::Pending);
    }

    #[test]
    fn test_underpayment_rejected_without_mutation() {
        let mut entry = active_entry(2);
        let before = entry.clone();
        let short = entry.repayments[0].amount - Money::ONE;

        let err = apply_payment(&mut entry, None, short, "LRP-1", Utc::now()).unwrap_err();
        assert!(matches!(err, LendingError::InsufficientPayment { .. }));
        assert_eq!(entry, before);
    }

    #[test]
    fn test_overdue_installment_is_payable() {
        let mut entry = active_entry(2);
        entry.repayments[0].status = RepaymentStatus::Overdue;
        let amount = entry.repayments[0].amount;

        let outcome = apply_payment(&mut entry, None, amount, "LRP-1", Utc::now() + Duration::days(40)).unwrap();
        assert_eq!(outcome.repayment.installment_number, 1);
        assert_eq!(outcome.repayment.status, RepaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_processor_emits_events() {
        let store = Arc::new(Store::new());
        let entry = active_entry(1);
        let loan_id = entry.loan.id;
        let amount = entry.repayments[0].amount;
        store.insert_loan(entry);

        let processor = RepaymentProcessor::new(Arc::clone(&store));
        let outcome = processor.apply(&loan_id, None, amount, "LRP-1", Utc::now()).await.unwrap();
        assert!(outcome.loan_completed);

        let events = store.take_events();
        assert!(matches!(events[0], Event::RepaymentPaid { .. }));
        assert!(matches!(
            events[1],
            Event::LoanStatusChanged {
                new_status: LoanStatus::Completed,
                ..
            }
        ));
        assert_eq!(store.loan(&loan_id).await.unwrap().loan.status, LoanStatus::Completed);
    }
}
