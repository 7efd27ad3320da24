use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;

use crate::decimal::{Money, Rate};
use crate::errors::{LendingError, Result};

/// one generated installment, rounded to cents
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledInstallment {
    pub installment_number: u32,
    pub due_date: DateTime<Utc>,
    pub beginning_balance: Money,
    pub amount: Money,
    pub principal_component: Money,
    pub interest_component: Money,
    pub ending_balance: Money,
}

/// result of amortising a loan
#[derive(Debug, Clone, PartialEq)]
pub struct Amortization {
    pub emi: Money,
    pub schedule: Vec<ScheduledInstallment>,
}

impl Amortization {
    /// sum of scheduled amounts; differs from emi * n by the final rounding residual
    pub fn total_payable(&self) -> Money {
        self.schedule.iter().map(|i| i.amount).sum()
    }

    pub fn total_principal(&self) -> Money {
        self.schedule.iter().map(|i| i.principal_component).sum()
    }

    pub fn total_interest(&self) -> Money {
        self.schedule.iter().map(|i| i.interest_component).sum()
    }
}

/// equal monthly installment, rounded to cents
///
/// EMI = P * r * (1 + r)^n / ((1 + r)^n - 1), or P / n when r is zero
pub fn calculate_emi(principal: Money, annual_rate: Rate, tenure_months: u32) -> Result<Money> {
    validate_terms(principal, annual_rate, tenure_months)?;

    let r = annual_rate.monthly_rate().as_decimal();
    if r.is_zero() {
        return Ok((principal / Decimal::from(tenure_months)).round_cents());
    }

    let overflow = || LendingError::InvalidLoanTerms {
        message: format!(
            "installment for {} at {} over {} months is out of range",
            principal, annual_rate, tenure_months
        ),
    };

    let base = Decimal::ONE + r;
    let mut compound = Decimal::ONE;
    for _ in 0..tenure_months {
        compound = compound.checked_mul(base).ok_or_else(overflow)?;
    }

    let numerator = principal
        .as_decimal()
        .checked_mul(r)
        .and_then(|n| n.checked_mul(compound))
        .ok_or_else(overflow)?;
    let denominator = compound - Decimal::ONE;
    let emi = numerator.checked_div(denominator).ok_or_else(overflow)?;

    Ok(Money::from_decimal(emi).round_cents())
}

/// total repaid over the loan; derived, never stored
pub fn total_payable(principal: Money, annual_rate: Rate, tenure_months: u32) -> Result<Money> {
    Ok(calculate_emi(principal, annual_rate, tenure_months)? * Decimal::from(tenure_months))
}

/// interest over the loan; derived, never stored
pub fn total_interest(principal: Money, annual_rate: Rate, tenure_months: u32) -> Result<Money> {
    Ok(total_payable(principal, annual_rate, tenure_months)? - principal)
}

/// generate the full schedule; components are rounded here, once, because
/// installments are persisted and must read back identically
///
/// Every installment pays `emi` except the last, which pays off the exact
/// remaining balance, so principal components always sum to the principal.
pub fn amortize(
    principal: Money,
    annual_rate: Rate,
    tenure_months: u32,
    disbursed_at: DateTime<Utc>,
) -> Result<Amortization> {
    let emi = calculate_emi(principal, annual_rate, tenure_months)?;
    let monthly_rate = annual_rate.monthly_rate().as_decimal();

    let mut schedule = Vec::with_capacity(tenure_months as usize);
    let mut balance = principal;

    for i in 1..=tenure_months {
        let due_date = disbursed_at
            .checked_add_months(Months::new(i))
            .ok_or_else(|| LendingError::InvalidLoanTerms {
                message: format!("due date of installment {} is out of range", i),
            })?;

        let interest_component = (balance * monthly_rate).round_cents();
        let principal_component = emi - interest_component;
        let ending_balance = balance - principal_component;

        schedule.push(ScheduledInstallment {
            installment_number: i,
            due_date,
            beginning_balance: balance,
            amount: emi,
            principal_component,
            interest_component,
            ending_balance,
        });

        balance = ending_balance;
    }

    // the last installment settles whatever rounding left on the balance
    if let Some(last) = schedule.last_mut() {
        if !last.ending_balance.is_zero() {
            last.principal_component += last.ending_balance;
            last.amount += last.ending_balance;
            last.ending_balance = Money::ZERO;
        }
    }

    Ok(Amortization { emi, schedule })
}

fn validate_terms(principal: Money, annual_rate: Rate, tenure_months: u32) -> Result<()> {
    if !principal.is_positive() {
        return Err(LendingError::InvalidLoanTerms {
            message: format!("principal must be positive, got {}", principal),
        });
    }
    if tenure_months == 0 {
        return Err(LendingError::InvalidLoanTerms {
            message: "tenure must be at least one month".to_string(),
        });
    }
    if annual_rate.is_negative() {
        return Err(LendingError::InvalidLoanTerms {
            message: format!("interest rate cannot be negative, got {}", annual_rate),
        });
    }
    Ok(())
}
