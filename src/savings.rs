//! Savings plans and customer positions.
//!
//! Interest is never stored while a position is active; it is derived from
//! the deposit lots on every read and frozen once, at withdrawal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::errors::{LendingError, Result};
use crate::events::Event;
use crate::interest::{AccrualEngine, SavingsQuote};
use crate::ledger::{Ledger, Posting};
use crate::state::{SavingsDeposit, SavingsPlan, Transaction, UserSaving};
use crate::store::Store;
use crate::types::{PlanId, SavingId, SavingStatus, TransactionCategory, TransactionSource, WalletId};

/// admin input for a new plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTerms {
    pub name: String,
    pub interest_rate: Rate,
    pub minimum_deposit: Money,
    pub maximum_deposit: Option<Money>,
    pub lock_period_days: u32,
    pub early_withdrawal_penalty: Rate,
}

impl PlanTerms {
    fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(LendingError::InvalidConfiguration { message });

        if self.name.trim().is_empty() {
            return invalid("plan name is required".to_string());
        }
        if self.interest_rate.is_negative() || self.early_withdrawal_penalty.is_negative() {
            return invalid("plan rates cannot be negative".to_string());
        }
        if self.early_withdrawal_penalty > Rate::ONE {
            return invalid(format!("penalty {} exceeds 100%", self.early_withdrawal_penalty));
        }
        if self.minimum_deposit.is_negative() {
            return invalid("minimum deposit cannot be negative".to_string());
        }
        if let Some(maximum) = self.maximum_deposit {
            if maximum < self.minimum_deposit {
                return invalid(format!(
                    "maximum deposit {} is below minimum {}",
                    maximum, self.minimum_deposit
                ));
            }
        }
        Ok(())
    }
}

/// what a withdrawal paid out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub saving_id: SavingId,
    pub amount_paid: Money,
    pub interest: Money,
    pub penalty: Money,
    /// none when the payout rounds to zero
    pub transaction: Option<Transaction>,
}

#[derive(Clone)]
pub struct SavingsService {
    store: Arc<Store>,
    ledger: Ledger,
    engine: AccrualEngine,
}

impl SavingsService {
    pub fn new(store: Arc<Store>, ledger: Ledger, engine: AccrualEngine) -> Self {
        Self { store, ledger, engine }
    }

    pub fn create_plan(&self, terms: PlanTerms, now: DateTime<Utc>) -> Result<SavingsPlan> {
        terms.validate()?;
        let plan = SavingsPlan {
            id: Uuid::new_v4(),
            name: terms.name,
            interest_rate: terms.interest_rate,
            minimum_deposit: terms.minimum_deposit,
            maximum_deposit: terms.maximum_deposit,
            lock_period_days: terms.lock_period_days,
            early_withdrawal_penalty: terms.early_withdrawal_penalty,
            is_active: true,
            created_at: now,
        };
        self.store.insert_plan(plan.clone());
        tracing::info!(plan_id = %plan.id, name = %plan.name, rate = %plan.interest_rate, "savings plan created");
        Ok(plan)
    }

    pub async fn set_plan_active(&self, plan_id: &PlanId, active: bool) -> Result<SavingsPlan> {
        let mut plan = self.store.lock_plan(plan_id).await?;
        plan.is_active = active;
        tracing::info!(plan_id = %plan_id, active, "savings plan toggled");
        Ok(plan.clone())
    }

    pub async fn plan(&self, plan_id: &PlanId) -> Result<SavingsPlan> {
        self.store.plan(plan_id).await
    }

    pub async fn saving(&self, saving_id: &SavingId) -> Result<UserSaving> {
        self.store.saving(saving_id).await
    }

    /// open a position funded from the wallet
    pub async fn subscribe(
        &self,
        wallet_id: &WalletId,
        plan_id: &PlanId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<UserSaving> {
        let plan = self.store.plan(plan_id).await?;
        if !plan.is_active {
            return Err(LendingError::PlanInactive { plan_id: *plan_id });
        }
        Ledger::check_amount(amount)?;
        check_limits(&plan, amount)?;

        let mut wallet = self.store.lock_wallet(wallet_id).await?;
        let saving_id = Uuid::new_v4();
        let posting = Posting::new(amount, TransactionCategory::SavingsDeposit, TransactionSource::Savings)
            .description(format!("savings deposit: {}", plan.name))
            .source_reference(saving_id.to_string());
        self.ledger.apply_debit(&mut wallet, posting, now)?;

        let saving = UserSaving {
            id: saving_id,
            owner_id: wallet.owner_id,
            plan_id: plan.id,
            wallet_id: wallet.id,
            amount,
            deposits: vec![SavingsDeposit {
                amount,
                deposited_at: now,
            }],
            accrued_interest: Money::ZERO,
            penalty_charged: Money::ZERO,
            maturity_date: AccrualEngine::maturity_date(&plan, now),
            status: SavingStatus::Active,
            created_at: now,
            withdrawn_at: None,
        };
        self.store.insert_saving(saving.clone());

        tracing::info!(saving_id = %saving.id, plan_id = %plan.id, amount = %amount, "savings subscribed");
        self.store.emit(Event::SavingsSubscribed {
            saving_id: saving.id,
            owner_id: saving.owner_id,
            amount,
            timestamp: now,
        });
        Ok(saving)
    }

    /// top up a flexible position; the new lot accrues from `now`
    pub async fn add_funds(&self, saving_id: &SavingId, amount: Money, now: DateTime<Utc>) -> Result<UserSaving> {
        let mut saving = self.store.lock_saving(saving_id).await?;
        if saving.status == SavingStatus::Withdrawn {
            return Err(LendingError::AlreadyWithdrawn { saving_id: *saving_id });
        }

        let plan = self.store.plan(&saving.plan_id).await?;
        if !plan.is_flexible() {
            return Err(LendingError::PlanLocked { plan_id: plan.id });
        }
        if !plan.is_active {
            return Err(LendingError::PlanInactive { plan_id: plan.id });
        }
        Ledger::check_amount(amount)?;
        if let Some(maximum) = plan.maximum_deposit {
            if amount > maximum {
                return Err(LendingError::AboveMaximum {
                    maximum,
                    provided: amount,
                });
            }
        }

        let mut wallet = self.store.lock_wallet(&saving.wallet_id).await?;
        let posting = Posting::new(amount, TransactionCategory::SavingsDeposit, TransactionSource::Savings)
            .description(format!("savings top-up: {}", plan.name))
            .source_reference(saving_id.to_string());
        self.ledger.apply_debit(&mut wallet, posting, now)?;

        saving.amount += amount;
        saving.deposits.push(SavingsDeposit {
            amount,
            deposited_at: now,
        });

        tracing::info!(saving_id = %saving_id, amount = %amount, total = %saving.amount, "savings topped up");
        self.store.emit(Event::SavingsTopUp {
            saving_id: *saving_id,
            amount,
            timestamp: now,
        });
        Ok(saving.clone())
    }

    /// interest and penalty as of `now`, without side effects
    pub async fn quote(&self, saving_id: &SavingId, now: DateTime<Utc>) -> Result<SavingsQuote> {
        let saving = self.store.saving(saving_id).await?;
        let plan = self.store.plan(&saving.plan_id).await?;
        Ok(self.engine.quote(&saving, &plan, now))
    }

    /// close the position and pay it out, once
    ///
    /// The position row and the wallet row are both held while the payout is
    /// credited and the status flips, so the two cannot diverge.
    pub async fn withdraw(&self, saving_id: &SavingId, now: DateTime<Utc>) -> Result<Withdrawal> {
        let mut saving = self.store.lock_saving(saving_id).await?;
        if saving.status == SavingStatus::Withdrawn {
            tracing::warn!(saving_id = %saving_id, "repeat withdrawal refused");
            return Err(LendingError::AlreadyWithdrawn { saving_id: *saving_id });
        }

        let plan = self.store.plan(&saving.plan_id).await?;
        let interest = self.engine.accrued_interest(&saving, &plan, now).round_cents();
        let penalty = AccrualEngine::withdrawal_penalty(&saving, &plan, now).round_cents();
        let amount_paid = (saving.amount + interest - penalty).max(Money::ZERO);

        let mut wallet = self.store.lock_wallet(&saving.wallet_id).await?;
        let transaction = if amount_paid.is_positive() {
            let posting = Posting::new(amount_paid, TransactionCategory::SavingsWithdrawal, TransactionSource::Savings)
                .description(format!("savings withdrawal: {}", plan.name))
                .source_reference(saving_id.to_string())
                .metadata(serde_json::json!({
                    "principal": saving.amount.to_string(),
                    "interest": interest.to_string(),
                    "penalty": penalty.to_string(),
                }));
            Some(self.ledger.apply_credit(&mut wallet, posting, now)?)
        } else {
            None
        };

        saving.accrued_interest = interest;
        saving.penalty_charged = penalty;
        saving.status = SavingStatus::Withdrawn;
        saving.withdrawn_at = Some(now);

        tracing::info!(
            saving_id = %saving_id,
            payout = %amount_paid,
            interest = %interest,
            penalty = %penalty,
            "savings withdrawn"
        );
        self.store.emit(Event::SavingsWithdrawn {
            saving_id: *saving_id,
            payout: amount_paid,
            interest,
            penalty,
            timestamp: now,
        });

        Ok(Withdrawal {
            saving_id: *saving_id,
            amount_paid,
            interest,
            penalty,
            transaction,
        })
    }
}

fn check_limits(plan: &SavingsPlan, amount: Money) -> Result<()> {
    if amount < plan.minimum_deposit {
        return Err(LendingError::BelowMinimum {
            minimum: plan.minimum_deposit,
            provided: amount,
        });
    }
    if let Some(maximum) = plan.maximum_deposit {
        if amount > maximum {
            return Err(LendingError::AboveMaximum {
                maximum,
                provided: amount,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Currency;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    struct Fixture {
        store: Arc<Store>,
        ledger: Ledger,
        savings: SavingsService,
        wallet_id: WalletId,
    }

    async fn fixture(opening_balance: i64) -> Fixture {
        let store = Arc::new(Store::new());
        let ledger = Ledger::new(Arc::clone(&store));
        let savings = SavingsService::new(Arc::clone(&store), ledger.clone(), AccrualEngine::default());

        let wallet = ledger
            .get_or_create_wallet(Uuid::new_v4(), Currency::Ngn, start())
            .await
            .unwrap();
        if opening_balance > 0 {
            ledger
                .credit(
                    &wallet.id,
                    Posting::new(
                        Money::from_major(opening_balance),
                        TransactionCategory::Funding,
                        TransactionSource::Admin,
                    ),
                    start(),
                )
                .await
                .unwrap();
        }

        Fixture {
            store,
            ledger,
            savings,
            wallet_id: wallet.id,
        }
    }

    fn terms(lock_period_days: u32) -> PlanTerms {
        PlanTerms {
            name: if lock_period_days == 0 { "flex" } else { "fixed" }.to_string(),
            interest_rate: Rate::from_percentage(10),
            minimum_deposit: Money::from_major(1_000),
            maximum_deposit: Some(Money::from_major(100_000)),
            lock_period_days,
            early_withdrawal_penalty: Rate::from_percentage(10),
        }
    }

    #[tokio::test]
    async fn test_subscribe_limits() {
        let f = fixture(50_000).await;
        let plan = f.savings.create_plan(terms(30), start()).unwrap();

        let err = f
            .savings
            .subscribe(&f.wallet_id, &plan.id, Money::from_major(500), start())
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::BelowMinimum { .. }));

        let err = f
            .savings
            .subscribe(&f.wallet_id, &plan.id, Money::from_major(200_000), start())
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::AboveMaximum { .. }));

        let err = f
            .savings
            .subscribe(&f.wallet_id, &plan.id, Money::from_major(60_000), start())
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::InsufficientFunds { .. }));

        assert_eq!(f.ledger.wallet(&f.wallet_id).await.unwrap().balance, Money::from_major(50_000));
        assert_eq!(f.ledger.history(&f.wallet_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_plan_refuses_subscription() {
        let f = fixture(50_000).await;
        let plan = f.savings.create_plan(terms(0), start()).unwrap();
        f.savings.set_plan_active(&plan.id, false).await.unwrap();

        let err = f
            .savings
            .subscribe(&f.wallet_id, &plan.id, Money::from_major(5_000), start())
            .await
            .unwrap_err();
        assert_eq!(err, LendingError::PlanInactive { plan_id: plan.id });
    }

    #[tokio::test]
    async fn test_early_withdrawal_pays_penalty() {
        let f = fixture(50_000).await;
        let plan = f.savings.create_plan(terms(30), start()).unwrap();
        let saving = f
            .savings
            .subscribe(&f.wallet_id, &plan.id, Money::from_major(10_000), start())
            .await
            .unwrap();
        assert_eq!(saving.maturity_date, Some(start() + Duration::days(30)));
        assert_eq!(f.ledger.wallet(&f.wallet_id).await.unwrap().balance, Money::from_major(40_000));

        let withdrawal = f.savings.withdraw(&saving.id, start() + Duration::days(10)).await.unwrap();
        assert_eq!(withdrawal.penalty, Money::from_major(1_000));
        // 10,000 * 10% / 365 * 10 = 27.397..., rounded once at withdrawal
        assert_eq!(withdrawal.interest, Money::from_str_exact("27.40").unwrap());
        assert_eq!(withdrawal.amount_paid, Money::from_str_exact("9027.40").unwrap());

        let wallet = f.ledger.wallet(&f.wallet_id).await.unwrap();
        assert_eq!(wallet.balance, Money::from_str_exact("49027.40").unwrap());
        f.ledger.verify_balance(&f.wallet_id).await.unwrap();

        let stored = f.savings.saving(&saving.id).await.unwrap();
        assert_eq!(stored.status, SavingStatus::Withdrawn);
        assert_eq!(stored.accrued_interest, withdrawal.interest);
        assert_eq!(stored.penalty_charged, withdrawal.penalty);
    }

    #[tokio::test]
    async fn test_matured_withdrawal_has_no_penalty() {
        let f = fixture(50_000).await;
        let plan = f.savings.create_plan(terms(30), start()).unwrap();
        let saving = f
            .savings
            .subscribe(&f.wallet_id, &plan.id, Money::from_major(36_500), start())
            .await
            .unwrap();

        let withdrawal = f.savings.withdraw(&saving.id, start() + Duration::days(31)).await.unwrap();
        assert_eq!(withdrawal.penalty, Money::ZERO);
        assert_eq!(withdrawal.interest, Money::from_major(310));
        assert_eq!(withdrawal.amount_paid, Money::from_major(36_810));
    }

    #[tokio::test]
    async fn test_concurrent_withdrawal_pays_once() {
        let f = fixture(50_000).await;
        let plan = f.savings.create_plan(terms(0), start()).unwrap();
        let saving = f
            .savings
            .subscribe(&f.wallet_id, &plan.id, Money::from_major(20_000), start())
            .await
            .unwrap();

        let attempts = (0..10).map(|_| {
            let savings = f.savings.clone();
            let saving_id = saving.id;
            tokio::spawn(async move { savings.withdraw(&saving_id, start() + Duration::days(1)).await })
        });
        let results = futures::future::join_all(attempts).await;

        let paid = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Ok(Err(LendingError::AlreadyWithdrawn { .. }))))
            .count();
        assert_eq!(paid, 1);
        assert_eq!(refused, 9);

        let credits = f
            .store
            .wallet_transactions(&f.wallet_id)
            .into_iter()
            .filter(|tx| tx.category == TransactionCategory::SavingsWithdrawal)
            .count();
        assert_eq!(credits, 1);
        f.ledger.verify_balance(&f.wallet_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_funds_only_on_flexible_plans() {
        let f = fixture(100_000).await;
        let locked = f.savings.create_plan(terms(90), start()).unwrap();
        let flexible = f.savings.create_plan(terms(0), start()).unwrap();

        let fixed = f
            .savings
            .subscribe(&f.wallet_id, &locked.id, Money::from_major(5_000), start())
            .await
            .unwrap();
        let err = f
            .savings
            .add_funds(&fixed.id, Money::from_major(1_000), start() + Duration::days(1))
            .await
            .unwrap_err();
        assert_eq!(err, LendingError::PlanLocked { plan_id: locked.id });

        let flex = f
            .savings
            .subscribe(&f.wallet_id, &flexible.id, Money::from_major(36_500), start())
            .await
            .unwrap();
        let topped = f
            .savings
            .add_funds(&flex.id, Money::from_major(36_500), start() + Duration::days(20))
            .await
            .unwrap();
        assert_eq!(topped.amount, Money::from_major(73_000));
        assert_eq!(topped.deposits.len(), 2);

        let quote = f.savings.quote(&flex.id, start() + Duration::days(30)).await.unwrap();
        assert_eq!(quote.interest, Money::from_major(400));
        assert!(quote.can_withdraw);

        assert_eq!(f.ledger.wallet(&f.wallet_id).await.unwrap().balance, Money::from_major(22_000));
        f.ledger.verify_balance(&f.wallet_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_withdrawn_position_refuses_everything() {
        let f = fixture(50_000).await;
        let plan = f.savings.create_plan(terms(0), start()).unwrap();
        let saving = f
            .savings
            .subscribe(&f.wallet_id, &plan.id, Money::from_major(2_000), start())
            .await
            .unwrap();
        f.savings.withdraw(&saving.id, start()).await.unwrap();

        assert!(matches!(
            f.savings.withdraw(&saving.id, start()).await,
            Err(LendingError::AlreadyWithdrawn { .. })
        ));
        assert!(matches!(
            f.savings.add_funds(&saving.id, Money::from_major(1_000), start()).await,
            Err(LendingError::AlreadyWithdrawn { .. })
        ));
    }

    #[test]
    fn test_plan_terms_validation() {
        let mut bad = terms(0);
        bad.maximum_deposit = Some(Money::from_major(10));
        assert!(matches!(bad.validate(), Err(LendingError::InvalidConfiguration { .. })));

        let mut bad = terms(0);
        bad.interest_rate = Rate::from_decimal(rust_decimal_macros::dec!(-0.05));
        assert!(bad.validate().is_err());

        assert!(terms(30).validate().is_ok());
    }
}
