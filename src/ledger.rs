use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{LendingError, Result};
use crate::events::Event;
use crate::state::{Transaction, Wallet};
use crate::store::{PendingRecord, Store};
use crate::types::{
    new_reference, Currency, GatewayName, PaymentStatus, TransactionCategory, TransactionSource,
    TransactionStatus, TransactionType, UserId, WalletId,
};

/// what a single ledger mutation records besides its amount
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub amount: Money,
    pub description: String,
    pub category: TransactionCategory,
    pub source: TransactionSource,
    pub source_reference: Option<String>,
    pub metadata: serde_json::Value,
}

impl Posting {
    pub fn new(amount: Money, category: TransactionCategory, source: TransactionSource) -> Self {
        Self {
            amount,
            description: String::new(),
            category,
            source,
            source_reference: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn source_reference(mut self, reference: impl Into<String>) -> Self {
        self.source_reference = Some(reference.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// sole owner of wallet balances and their transaction history
#[derive(Clone)]
pub struct Ledger {
    store: Arc<Store>,
}

impl Ledger {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// idempotent: one wallet per owner no matter how many callers race
    pub async fn get_or_create_wallet(
        &self,
        owner_id: UserId,
        currency: Currency,
        now: DateTime<Utc>,
    ) -> Result<Wallet> {
        let (wallet_id, created) = self
            .store
            .insert_wallet_if_absent(owner_id, || Wallet::new(Uuid::new_v4(), owner_id, currency, now));

        if created {
            tracing::info!(wallet_id = %wallet_id, owner_id = %owner_id, "wallet created");
            self.store.emit(Event::WalletCreated {
                wallet_id,
                owner_id,
                timestamp: now,
            });
        }

        self.store.wallet(&wallet_id).await
    }

    pub async fn wallet(&self, wallet_id: &WalletId) -> Result<Wallet> {
        self.store.wallet(wallet_id).await
    }

    /// increment balance; succeeds for any existing wallet
    pub async fn credit(
        &self,
        wallet_id: &WalletId,
        posting: Posting,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let mut wallet = self.store.lock_wallet(wallet_id).await?;
        self.apply_credit(&mut wallet, posting, now)
    }

    /// decrement balance; refuses unusable wallets and overdrafts without mutating
    pub async fn debit(
        &self,
        wallet_id: &WalletId,
        posting: Posting,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let mut wallet = self.store.lock_wallet(wallet_id).await?;
        self.apply_debit(&mut wallet, posting, now)
    }

    /// move funds between two wallets in one unit
    pub async fn transfer(
        &self,
        from: &WalletId,
        to: &WalletId,
        amount: Money,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<(Transaction, Transaction)> {
        if from == to {
            return Err(LendingError::WalletUnusable {
                wallet_id: *from,
                reason: "cannot transfer to the same wallet".to_string(),
            });
        }

        let (mut source, mut target) = self.store.lock_wallet_pair(from, to).await?;
        if source.currency != target.currency {
            return Err(LendingError::WalletUnusable {
                wallet_id: *to,
                reason: format!(
                    "currency mismatch: {} to {}",
                    source.currency, target.currency
                ),
            });
        }
        Self::check_debit(&source, amount)?;

        let reference = new_reference("TRF");
        let debit = self.apply_debit(
            &mut source,
            Posting::new(amount, TransactionCategory::Transfer, TransactionSource::Transfer)
                .description(description)
                .source_reference(reference.clone()),
            now,
        )?;
        let credit = self.apply_credit(
            &mut target,
            Posting::new(amount, TransactionCategory::Transfer, TransactionSource::Transfer)
                .description(description)
                .source_reference(reference),
            now,
        )?;

        Ok((debit, credit))
    }

    /// register a gateway funding that has not been confirmed yet
    pub async fn open_pending_funding(
        &self,
        wallet_id: &WalletId,
        amount: Money,
        reference: &str,
        gateway: GatewayName,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        Self::check_amount(amount)?;
        let wallet = self.store.lock_wallet(wallet_id).await?;

        let tx = Transaction {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            owner_id: wallet.owner_id,
            reference: reference.to_string(),
            kind: TransactionType::Credit,
            amount,
            balance_before: wallet.balance,
            balance_after: wallet.balance,
            category: TransactionCategory::Funding,
            description: "wallet funding".to_string(),
            source: TransactionSource::Gateway,
            source_reference: None,
            status: TransactionStatus::Pending,
            metadata: serde_json::json!({ "gateway": gateway }),
            created_at: now,
            settled_at: None,
        };

        self.store.register_reference(
            reference,
            PendingRecord::Funding {
                transaction_id: tx.id,
                wallet_id: wallet.id,
            },
        )?;
        self.store.insert_transaction(tx.clone());

        tracing::info!(wallet_id = %wallet.id, reference, amount = %amount, "pending funding opened");
        Ok(tx)
    }

    /// finalise the pending funding registered under `reference`
    pub async fn settle_pending(
        &self,
        reference: &str,
        success: bool,
        gateway_reference: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let record = self.store.lock_reference(reference).await?;
        let PendingRecord::Funding {
            transaction_id,
            wallet_id,
        } = *record
        else {
            return Err(LendingError::PaymentNotFound {
                reference: reference.to_string(),
            });
        };

        let mut wallet = self.store.lock_wallet(&wallet_id).await?;
        self.settle_pending_funding(&mut wallet, &transaction_id, success, gateway_reference, now)
    }

    pub async fn lock_wallet(&self, wallet_id: &WalletId, reason: &str, now: DateTime<Utc>) -> Result<Wallet> {
        let mut wallet = self.store.lock_wallet(wallet_id).await?;
        wallet.is_locked = true;
        wallet.lock_reason = Some(reason.to_string());
        wallet.updated_at = now;

        tracing::warn!(wallet_id = %wallet_id, reason, "wallet locked");
        self.store.emit(Event::WalletLocked {
            wallet_id: *wallet_id,
            reason: reason.to_string(),
            timestamp: now,
        });
        Ok(wallet.clone())
    }

    pub async fn unlock_wallet(&self, wallet_id: &WalletId, now: DateTime<Utc>) -> Result<Wallet> {
        let mut wallet = self.store.lock_wallet(wallet_id).await?;
        wallet.is_locked = false;
        wallet.lock_reason = None;
        wallet.updated_at = now;

        tracing::info!(wallet_id = %wallet_id, "wallet unlocked");
        self.store.emit(Event::WalletUnlocked {
            wallet_id: *wallet_id,
            timestamp: now,
        });
        Ok(wallet.clone())
    }

    pub async fn set_active(&self, wallet_id: &WalletId, active: bool, now: DateTime<Utc>) -> Result<Wallet> {
        let mut wallet = self.store.lock_wallet(wallet_id).await?;
        wallet.is_active = active;
        wallet.updated_at = now;
        tracing::info!(wallet_id = %wallet_id, active, "wallet activation changed");
        Ok(wallet.clone())
    }

    /// entries in commit order, read under the wallet lock
    pub async fn history(&self, wallet_id: &WalletId) -> Result<Vec<Transaction>> {
        let _wallet = self.store.lock_wallet(wallet_id).await?;
        Ok(self.store.wallet_transactions(wallet_id))
    }

    /// recompute the balance from completed entries and compare with the stored one
    pub async fn verify_balance(&self, wallet_id: &WalletId) -> Result<Money> {
        let wallet = self.store.lock_wallet(wallet_id).await?;
        let computed: Money = self
            .store
            .wallet_transactions(wallet_id)
            .iter()
            .map(Transaction::signed_amount)
            .sum();

        if computed != wallet.balance {
            tracing::error!(wallet_id = %wallet_id, stored = %wallet.balance, computed = %computed, "balance invariant violated");
            return Err(LendingError::BalanceMismatch {
                wallet_id: *wallet_id,
                stored: wallet.balance,
                computed,
            });
        }
        Ok(computed)
    }

    // in-lock primitives, used by components that already hold the wallet row

    pub(crate) fn check_amount(amount: Money) -> Result<()> {
        if !amount.is_positive() {
            return Err(LendingError::InvalidAmount { amount });
        }
        Ok(())
    }

    pub(crate) fn check_debit(wallet: &Wallet, amount: Money) -> Result<()> {
        Self::check_amount(amount)?;
        if let Some(reason) = wallet.unusable_reason() {
            return Err(LendingError::WalletUnusable {
                wallet_id: wallet.id,
                reason,
            });
        }
        if wallet.balance < amount {
            return Err(LendingError::InsufficientFunds {
                available: wallet.balance,
                requested: amount,
            });
        }
        Ok(())
    }

    pub(crate) fn apply_credit(
        &self,
        wallet: &mut Wallet,
        posting: Posting,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        Self::check_amount(posting.amount)?;
        let balance_after = wallet.balance + posting.amount;
        let tx = self.post(wallet, TransactionType::Credit, balance_after, posting, now);

        tracing::info!(
            wallet_id = %wallet.id,
            amount = %tx.amount,
            balance_after = %tx.balance_after,
            category = ?tx.category,
            reference = %tx.reference,
            "wallet credited"
        );
        self.store.emit(Event::WalletCredited {
            wallet_id: wallet.id,
            amount: tx.amount,
            balance_after: tx.balance_after,
            category: tx.category,
            reference: tx.reference.clone(),
            timestamp: now,
        });
        Ok(tx)
    }

    pub(crate) fn apply_debit(
        &self,
        wallet: &mut Wallet,
        posting: Posting,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        if let Err(e) = Self::check_debit(wallet, posting.amount) {
            tracing::warn!(wallet_id = %wallet.id, amount = %posting.amount, error = %e, "debit rejected");
            return Err(e);
        }
        let balance_after = wallet
            .balance
            .checked_sub_non_negative(posting.amount)
            .ok_or(LendingError::InsufficientFunds {
                available: wallet.balance,
                requested: posting.amount,
            })?;
        let tx = self.post(wallet, TransactionType::Debit, balance_after, posting, now);

        tracing::info!(
            wallet_id = %wallet.id,
            amount = %tx.amount,
            balance_after = %tx.balance_after,
            category = ?tx.category,
            reference = %tx.reference,
            "wallet debited"
        );
        self.store.emit(Event::WalletDebited {
            wallet_id: wallet.id,
            amount: tx.amount,
            balance_after: tx.balance_after,
            category: tx.category,
            reference: tx.reference.clone(),
            timestamp: now,
        });
        Ok(tx)
    }

    /// finalise a pending funding entry exactly once
    pub(crate) fn settle_pending_funding(
        &self,
        wallet: &mut Wallet,
        transaction_id: &Uuid,
        success: bool,
        gateway_reference: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let mut tx = self
            .store
            .transaction(transaction_id)
            .filter(|tx| tx.wallet_id == wallet.id)
            .ok_or_else(|| LendingError::PaymentNotFound {
                reference: transaction_id.to_string(),
            })?;

        if tx.status != TransactionStatus::Pending {
            return Err(LendingError::PaymentAlreadyFinal {
                reference: tx.reference,
                status: match tx.status {
                    TransactionStatus::Completed => PaymentStatus::Success,
                    _ => PaymentStatus::Failed,
                },
            });
        }

        tx.source_reference = gateway_reference;
        tx.settled_at = Some(now);

        if success {
            tx.balance_before = wallet.balance;
            tx.balance_after = wallet.balance + tx.amount;
            tx.status = TransactionStatus::Completed;
            wallet.balance = tx.balance_after;
            wallet.updated_at = now;

            tracing::info!(wallet_id = %wallet.id, reference = %tx.reference, amount = %tx.amount, "pending funding completed");
            self.store.emit(Event::WalletCredited {
                wallet_id: wallet.id,
                amount: tx.amount,
                balance_after: tx.balance_after,
                category: tx.category,
                reference: tx.reference.clone(),
                timestamp: now,
            });
        } else {
            tx.status = TransactionStatus::Failed;
            tracing::warn!(wallet_id = %wallet.id, reference = %tx.reference, "pending funding failed");
        }

        self.store.replace_transaction(tx.clone());
        // a completed funding commits at settlement, so its snapshots chain from the entry before it
        if tx.status == TransactionStatus::Completed {
            self.store.recommit_transaction(&wallet.id, &tx.id);
        }
        Ok(tx)
    }

    fn post(
        &self,
        wallet: &mut Wallet,
        kind: TransactionType,
        balance_after: Money,
        posting: Posting,
        now: DateTime<Utc>,
    ) -> Transaction {
        let tx = Transaction {
            id: Uuid::new_v4(),
            wallet_id: wallet.id,
            owner_id: wallet.owner_id,
            reference: new_reference("TXN"),
            kind,
            amount: posting.amount,
            balance_before: wallet.balance,
            balance_after,
            category: posting.category,
            description: posting.description,
            source: posting.source,
            source_reference: posting.source_reference,
            status: TransactionStatus::Completed,
            metadata: posting.metadata,
            created_at: now,
            settled_at: Some(now),
        };

        self.store.insert_transaction(tx.clone());
        wallet.balance = balance_after;
        wallet.updated_at = now;
        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    fn funding(amount: i64) -> Posting {
        Posting::new(
            Money::from_major(amount),
            TransactionCategory::Funding,
            TransactionSource::Gateway,
        )
        .description("top up")
    }

    fn bill(amount: i64) -> Posting {
        Posting::new(
            Money::from_major(amount),
            TransactionCategory::BillPayment,
            TransactionSource::Biller,
        )
    }

    async fn funded_wallet(ledger: &Ledger, amount: i64) -> Wallet {
        let now = Utc::now();
        let wallet = ledger
            .get_or_create_wallet(Uuid::new_v4(), Currency::Ngn, now)
            .await
            .unwrap();
        if amount > 0 {
            ledger.credit(&wallet.id, funding(amount), now).await.unwrap();
        }
        ledger.wallet(&wallet.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let ledger = Ledger::new(Arc::new(Store::new()));
        let owner = Uuid::new_v4();
        let now = Utc::now();

        let calls = (0..8).map(|_| ledger.get_or_create_wallet(owner, Currency::Ngn, now));
        let wallets = join_all(calls).await;

        let first = wallets[0].as_ref().unwrap().id;
        assert!(wallets.iter().all(|w| w.as_ref().unwrap().id == first));
    }

    #[tokio::test]
    async fn test_credit_and_debit_snapshots() {
        let ledger = Ledger::new(Arc::new(Store::new()));
        let wallet = funded_wallet(&ledger, 0).await;
        let now = Utc::now();

        let credit = ledger.credit(&wallet.id, funding(500), now).await.unwrap();
        assert_eq!(credit.balance_before, Money::ZERO);
        assert_eq!(credit.balance_after, Money::from_major(500));
        assert_eq!(credit.status, TransactionStatus::Completed);

        let debit = ledger.debit(&wallet.id, bill(120), now).await.unwrap();
        assert_eq!(debit.balance_before, Money::from_major(500));
        assert_eq!(debit.balance_after, Money::from_major(380));

        assert_eq!(ledger.verify_balance(&wallet.id).await.unwrap(), Money::from_major(380));
        assert_eq!(ledger.history(&wallet.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_debit_refusals_leave_state_untouched() {
        let ledger = Ledger::new(Arc::new(Store::new()));
        let wallet = funded_wallet(&ledger, 100).await;
        let now = Utc::now();

        let err = ledger.debit(&wallet.id, bill(101), now).await.unwrap_err();
        assert_eq!(
            err,
            LendingError::InsufficientFunds {
                available: Money::from_major(100),
                requested: Money::from_major(101),
            }
        );

        ledger.lock_wallet(&wallet.id, "fraud review", now).await.unwrap();
        let err = ledger.debit(&wallet.id, bill(10), now).await.unwrap_err();
        assert!(matches!(err, LendingError::WalletUnusable { .. }));

        // credits still land on a locked wallet
        ledger.credit(&wallet.id, funding(5), now).await.unwrap();

        ledger.unlock_wallet(&wallet.id, now).await.unwrap();
        ledger.set_active(&wallet.id, false, now).await.unwrap();
        let err = ledger.debit(&wallet.id, bill(10), now).await.unwrap_err();
        assert!(matches!(err, LendingError::WalletUnusable { .. }));

        let wallet = ledger.wallet(&wallet.id).await.unwrap();
        assert_eq!(wallet.balance, Money::from_major(105));
        assert_eq!(ledger.history(&wallet.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_non_positive_amounts_rejected() {
        let ledger = Ledger::new(Arc::new(Store::new()));
        let wallet = funded_wallet(&ledger, 10).await;

        let err = ledger.credit(&wallet.id, funding(0), Utc::now()).await.unwrap_err();
        assert!(matches!(err, LendingError::InvalidAmount { .. }));
        let err = ledger.debit(&wallet.id, bill(-5), Utc::now()).await.unwrap_err();
        assert!(matches!(err, LendingError::InvalidAmount { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_debit_storm_never_overdraws() {
        let ledger = Ledger::new(Arc::new(Store::new()));
        let wallet = funded_wallet(&ledger, 1_000).await;

        let mut handles = Vec::new();
        for _ in 0..50 {
            let ledger = ledger.clone();
            let wallet_id = wallet.id;
            handles.push(tokio::spawn(async move {
                ledger.debit(&wallet_id, bill(30), Utc::now()).await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(LendingError::InsufficientFunds { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        // 1000 / 30 = 33 debits fit
        assert_eq!(succeeded, 33);
        let wallet = ledger.wallet(&wallet.id).await.unwrap();
        assert_eq!(wallet.balance, Money::from_major(10));
        assert_eq!(ledger.verify_balance(&wallet.id).await.unwrap(), Money::from_major(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mixed_concurrent_operations_keep_invariant() {
        let ledger = Ledger::new(Arc::new(Store::new()));
        let wallet = funded_wallet(&ledger, 200).await;

        let mut handles = Vec::new();
        for i in 0..40 {
            let ledger = ledger.clone();
            let wallet_id = wallet.id;
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    ledger.credit(&wallet_id, funding(15), Utc::now()).await
                } else {
                    ledger.debit(&wallet_id, bill(25), Utc::now()).await
                }
            }));
        }
        for handle in handles {
            let _ = handle.await.unwrap();
        }

        let balance = ledger.verify_balance(&wallet.id).await.unwrap();
        assert!(!balance.is_negative());
    }

    #[tokio::test]
    async fn test_transfer_moves_funds_atomically() {
        let ledger = Ledger::new(Arc::new(Store::new()));
        let sender = funded_wallet(&ledger, 300).await;
        let receiver = funded_wallet(&ledger, 0).await;
        let now = Utc::now();

        let (debit, credit) = ledger
            .transfer(&sender.id, &receiver.id, Money::from_major(120), "rent share", now)
            .await
            .unwrap();
        assert_eq!(debit.category, TransactionCategory::Transfer);
        assert_eq!(debit.source_reference, credit.source_reference);

        assert_eq!(ledger.wallet(&sender.id).await.unwrap().balance, Money::from_major(180));
        assert_eq!(ledger.wallet(&receiver.id).await.unwrap().balance, Money::from_major(120));

        let err = ledger
            .transfer(&sender.id, &receiver.id, Money::from_major(500), "too much", now)
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::InsufficientFunds { .. }));
        assert_eq!(ledger.history(&receiver.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pending_funding_settles_once() {
        let store = Arc::new(Store::new());
        let ledger = Ledger::new(Arc::clone(&store));
        let wallet = funded_wallet(&ledger, 0).await;
        let now = Utc::now();

        let pending = ledger
            .open_pending_funding(&wallet.id, Money::from_major(5_000), "WFD-TEST", GatewayName::Paystack, now)
            .await
            .unwrap();
        assert_eq!(pending.status, TransactionStatus::Pending);
        assert_eq!(ledger.verify_balance(&wallet.id).await.unwrap(), Money::ZERO);

        let settled = ledger
            .settle_pending("WFD-TEST", true, Some("gw-1".to_string()), now)
            .await
            .unwrap();
        assert_eq!(settled.balance_after, Money::from_major(5_000));
        assert_eq!(settled.source_reference.as_deref(), Some("gw-1"));

        let again = ledger.settle_pending("WFD-TEST", false, None, now).await;
        assert!(matches!(again, Err(LendingError::PaymentAlreadyFinal { .. })));

        assert_eq!(ledger.verify_balance(&wallet.id).await.unwrap(), Money::from_major(5_000));

        let duplicate = ledger
            .open_pending_funding(&wallet.id, Money::from_major(1), "WFD-TEST", GatewayName::Paystack, now)
            .await;
        assert!(matches!(duplicate, Err(LendingError::DuplicateReference { .. })));
    }

    #[tokio::test]
    async fn test_settled_funding_keeps_history_chained() {
        let ledger = Ledger::new(Arc::new(Store::new()));
        let wallet = funded_wallet(&ledger, 1_000).await;
        let now = Utc::now();

        let pending = ledger
            .open_pending_funding(&wallet.id, Money::from_major(5_000), "WFD-CHAIN", GatewayName::Paystack, now)
            .await
            .unwrap();
        ledger
            .open_pending_funding(&wallet.id, Money::from_major(50), "WFD-LOST", GatewayName::Paystack, now)
            .await
            .unwrap();

        // other entries commit while the gateway has not answered yet
        ledger.credit(&wallet.id, funding(300), now).await.unwrap();
        ledger.debit(&wallet.id, bill(200), now).await.unwrap();

        ledger.settle_pending("WFD-LOST", false, None, now).await.unwrap();
        ledger.settle_pending("WFD-CHAIN", true, None, now).await.unwrap();

        let completed: Vec<_> = ledger
            .history(&wallet.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|tx| tx.status == TransactionStatus::Completed)
            .collect();
        assert_eq!(completed.len(), 4);
        assert_eq!(completed[0].balance_before, Money::ZERO);
        for pair in completed.windows(2) {
            assert_eq!(pair[1].balance_before, pair[0].balance_after);
        }

        let last = completed.last().unwrap();
        assert_eq!(last.id, pending.id);
        assert_eq!(last.balance_before, Money::from_major(1_100));
        assert_eq!(last.balance_after, Money::from_major(6_100));
        assert_eq!(ledger.verify_balance(&wallet.id).await.unwrap(), Money::from_major(6_100));
    }
}
