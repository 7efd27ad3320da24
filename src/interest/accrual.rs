use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::state::{SavingsDeposit, SavingsPlan, UserSaving};

/// point-in-time figures for a savings position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsQuote {
    pub principal: Money,
    pub interest: Money,
    pub penalty: Money,
    pub payout: Money,
    pub can_withdraw: bool,
    pub maturity_date: Option<DateTime<Utc>>,
    pub days_elapsed: u32,
    pub as_of: DateTime<Utc>,
}

/// simple daily accrual, never compounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualEngine {
    pub year_basis: u32,
}

impl Default for AccrualEngine {
    fn default() -> Self {
        Self { year_basis: 365 }
    }
}

impl AccrualEngine {
    pub fn new(year_basis: u32) -> Self {
        Self { year_basis }
    }

    /// whole days between two instants, zero if `now` is earlier
    pub fn days_elapsed(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
        let days = (now - start).num_days();
        u32::try_from(days.max(0)).unwrap_or(u32::MAX)
    }

    /// interest on one lot, accruing from its own deposit date
    pub fn lot_interest(&self, deposit: &SavingsDeposit, annual_rate: Rate, now: DateTime<Utc>) -> Money {
        let days = self.days_elapsed(deposit.deposited_at, now);
        deposit.amount.simple_interest(annual_rate, days, self.year_basis)
    }

    /// interest accrued so far; frozen value once withdrawn
    pub fn accrued_interest(&self, saving: &UserSaving, plan: &SavingsPlan, now: DateTime<Utc>) -> Money {
        if saving.withdrawn_at.is_some() {
            return saving.accrued_interest;
        }
        saving
            .deposits
            .iter()
            .map(|lot| self.lot_interest(lot, plan.interest_rate, now))
            .sum()
    }

    pub fn maturity_date(plan: &SavingsPlan, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if plan.is_flexible() {
            return None;
        }
        Some(created_at + Duration::days(i64::from(plan.lock_period_days)))
    }

    pub fn can_withdraw(saving: &UserSaving, plan: &SavingsPlan, now: DateTime<Utc>) -> bool {
        if plan.is_flexible() {
            return true;
        }
        match saving.maturity_date {
            Some(maturity) => now >= maturity,
            None => true,
        }
    }

    pub fn withdrawal_penalty(saving: &UserSaving, plan: &SavingsPlan, now: DateTime<Utc>) -> Money {
        if Self::can_withdraw(saving, plan, now) {
            return Money::ZERO;
        }
        saving.amount.apply(plan.early_withdrawal_penalty)
    }

    pub fn quote(&self, saving: &UserSaving, plan: &SavingsPlan, now: DateTime<Utc>) -> SavingsQuote {
        let interest = self.accrued_interest(saving, plan, now);
        let penalty = Self::withdrawal_penalty(saving, plan, now);
        SavingsQuote {
            principal: saving.amount,
            interest,
            penalty,
            payout: (saving.amount + interest - penalty).max(Money::ZERO),
            can_withdraw: Self::can_withdraw(saving, plan, now),
            maturity_date: saving.maturity_date,
            days_elapsed: self.days_elapsed(saving.created_at, now),
            as_of: now,
        }
    }
}
