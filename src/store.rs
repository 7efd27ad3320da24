//! Shared store with row-level locks.
//!
//! Every mutable row lives behind its own `tokio::sync::Mutex`; holding the
//! guard is holding the row lock. Multi-row units always lock in this order:
//! gateway reference -> payment -> savings position -> loan -> wallets
//! (ascending id).
//! Ledger entries are written only while the owning wallet row is locked, so
//! history reads taken under the wallet lock are consistent with its balance.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::errors::{LendingError, Result};
use crate::events::{Event, EventStore};
use crate::state::{Loan, Payment, Repayment, SavingsPlan, Transaction, UserSaving, Wallet};
use crate::types::{
    LoanId, PaymentId, PlanId, SavingId, TransactionId, UserId, WalletId,
};

/// exclusive handle on one row
pub type RowGuard<T> = OwnedMutexGuard<T>;

/// a loan row together with its installment rows
#[derive(Debug, Clone, PartialEq)]
pub struct LoanEntry {
    pub loan: Loan,
    /// ordered by installment number
    pub repayments: Vec<Repayment>,
}

/// what a gateway reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingRecord {
    /// pending wallet funding entry
    Funding {
        transaction_id: TransactionId,
        wallet_id: WalletId,
    },
    Payment(PaymentId),
}

struct Table<K, V> {
    rows: RwLock<HashMap<K, Arc<Mutex<V>>>>,
}

impl<K: Eq + Hash + Copy, V: Clone> Table<K, V> {
    fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }

    fn insert(&self, key: K, value: V) {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        rows.insert(key, Arc::new(Mutex::new(value)));
    }

    fn row(&self, key: &K) -> Option<Arc<Mutex<V>>> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        rows.get(key).cloned()
    }

    async fn lock(&self, key: &K) -> Option<RowGuard<V>> {
        // the map guard is released before awaiting the row
        let row = self.row(key)?;
        Some(row.lock_owned().await)
    }

    async fn get(&self, key: &K) -> Option<V> {
        let row = self.row(key)?;
        let guard = row.lock().await;
        Some(guard.clone())
    }

    fn keys(&self) -> Vec<K> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        rows.keys().copied().collect()
    }
}

/// in-process store; the single source of truth for every component
pub struct Store {
    wallets: Table<WalletId, Wallet>,
    wallet_owners: StdMutex<HashMap<UserId, WalletId>>,
    transactions: RwLock<HashMap<TransactionId, Transaction>>,
    wallet_transactions: RwLock<HashMap<WalletId, Vec<TransactionId>>>,
    loans: Table<LoanId, LoanEntry>,
    borrower_loans: StdMutex<HashMap<UserId, Vec<LoanId>>>,
    plans: Table<PlanId, SavingsPlan>,
    savings: Table<SavingId, UserSaving>,
    payments: Table<PaymentId, Payment>,
    references: RwLock<HashMap<String, Arc<Mutex<PendingRecord>>>>,
    events: StdMutex<EventStore>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            wallets: Table::new(),
            wallet_owners: StdMutex::new(HashMap::new()),
            transactions: RwLock::new(HashMap::new()),
            wallet_transactions: RwLock::new(HashMap::new()),
            loans: Table::new(),
            borrower_loans: StdMutex::new(HashMap::new()),
            plans: Table::new(),
            savings: Table::new(),
            payments: Table::new(),
            references: RwLock::new(HashMap::new()),
            events: StdMutex::new(EventStore::new()),
        }
    }

    // wallets

    /// insert the wallet built by `make` unless the owner already has one;
    /// returns the owner's wallet id and whether it was created now
    pub(crate) fn insert_wallet_if_absent(
        &self,
        owner_id: UserId,
        make: impl FnOnce() -> Wallet,
    ) -> (WalletId, bool) {
        let mut owners = self.wallet_owners.lock().unwrap_or_else(|e| e.into_inner());
        match owners.entry(owner_id) {
            Entry::Occupied(e) => (*e.get(), false),
            Entry::Vacant(e) => {
                let wallet = make();
                let id = wallet.id;
                self.wallets.insert(id, wallet);
                e.insert(id);
                (id, true)
            }
        }
    }

    pub fn wallet_id_for_owner(&self, owner_id: &UserId) -> Option<WalletId> {
        let owners = self.wallet_owners.lock().unwrap_or_else(|e| e.into_inner());
        owners.get(owner_id).copied()
    }

    pub(crate) async fn lock_wallet(&self, id: &WalletId) -> Result<RowGuard<Wallet>> {
        self.wallets
            .lock(id)
            .await
            .ok_or(LendingError::WalletNotFound { id: *id })
    }

    /// lock two distinct wallets in ascending id order; guards returned as (first, second) of the arguments
    pub(crate) async fn lock_wallet_pair(
        &self,
        first: &WalletId,
        second: &WalletId,
    ) -> Result<(RowGuard<Wallet>, RowGuard<Wallet>)> {
        if first < second {
            let a = self.lock_wallet(first).await?;
            let b = self.lock_wallet(second).await?;
            Ok((a, b))
        } else {
            let b = self.lock_wallet(second).await?;
            let a = self.lock_wallet(first).await?;
            Ok((a, b))
        }
    }

    pub async fn wallet(&self, id: &WalletId) -> Result<Wallet> {
        self.wallets
            .get(id)
            .await
            .ok_or(LendingError::WalletNotFound { id: *id })
    }

    pub fn wallet_ids(&self) -> Vec<WalletId> {
        self.wallets.keys()
    }

    // ledger entries; callers hold the wallet row lock

    pub(crate) fn insert_transaction(&self, tx: Transaction) {
        let mut by_wallet = self
            .wallet_transactions
            .write()
            .unwrap_or_else(|e| e.into_inner());
        by_wallet.entry(tx.wallet_id).or_default().push(tx.id);
        drop(by_wallet);

        let mut transactions = self.transactions.write().unwrap_or_else(|e| e.into_inner());
        transactions.insert(tx.id, tx);
    }

    /// move a settled entry to the end of its wallet's commit order
    pub(crate) fn recommit_transaction(&self, wallet_id: &WalletId, id: &TransactionId) {
        let mut by_wallet = self
            .wallet_transactions
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(ids) = by_wallet.get_mut(wallet_id) {
            ids.retain(|existing| existing != id);
            ids.push(*id);
        }
    }

    pub(crate) fn replace_transaction(&self, tx: Transaction) {
        let mut transactions = self.transactions.write().unwrap_or_else(|e| e.into_inner());
        transactions.insert(tx.id, tx);
    }

    pub fn transaction(&self, id: &TransactionId) -> Option<Transaction> {
        let transactions = self.transactions.read().unwrap_or_else(|e| e.into_inner());
        transactions.get(id).cloned()
    }

    /// entries of a wallet in commit order
    pub fn wallet_transactions(&self, wallet_id: &WalletId) -> Vec<Transaction> {
        let ids = {
            let by_wallet = self
                .wallet_transactions
                .read()
                .unwrap_or_else(|e| e.into_inner());
            by_wallet.get(wallet_id).cloned().unwrap_or_default()
        };
        let transactions = self.transactions.read().unwrap_or_else(|e| e.into_inner());
        ids.iter()
            .filter_map(|id| transactions.get(id).cloned())
            .collect()
    }

    // loans

    pub(crate) fn insert_loan(&self, entry: LoanEntry) {
        let id = entry.loan.id;
        let borrower = entry.loan.borrower_id;
        self.loans.insert(id, entry);
        let mut by_borrower = self.borrower_loans.lock().unwrap_or_else(|e| e.into_inner());
        by_borrower.entry(borrower).or_default().push(id);
    }

    pub(crate) async fn lock_loan(&self, id: &LoanId) -> Result<RowGuard<LoanEntry>> {
        self.loans
            .lock(id)
            .await
            .ok_or(LendingError::LoanNotFound { id: *id })
    }

    pub async fn loan(&self, id: &LoanId) -> Result<LoanEntry> {
        self.loans
            .get(id)
            .await
            .ok_or(LendingError::LoanNotFound { id: *id })
    }

    pub fn loans_for_borrower(&self, borrower_id: &UserId) -> Vec<LoanId> {
        let by_borrower = self.borrower_loans.lock().unwrap_or_else(|e| e.into_inner());
        by_borrower.get(borrower_id).cloned().unwrap_or_default()
    }

    // savings

    pub(crate) fn insert_plan(&self, plan: SavingsPlan) {
        self.plans.insert(plan.id, plan);
    }

    pub(crate) async fn lock_plan(&self, id: &PlanId) -> Result<RowGuard<SavingsPlan>> {
        self.plans
            .lock(id)
            .await
            .ok_or(LendingError::PlanNotFound { id: *id })
    }

    pub async fn plan(&self, id: &PlanId) -> Result<SavingsPlan> {
        self.plans
            .get(id)
            .await
            .ok_or(LendingError::PlanNotFound { id: *id })
    }

    pub(crate) fn insert_saving(&self, saving: UserSaving) {
        self.savings.insert(saving.id, saving);
    }

    pub(crate) async fn lock_saving(&self, id: &SavingId) -> Result<RowGuard<UserSaving>> {
        self.savings
            .lock(id)
            .await
            .ok_or(LendingError::SavingNotFound { id: *id })
    }

    pub async fn saving(&self, id: &SavingId) -> Result<UserSaving> {
        self.savings
            .get(id)
            .await
            .ok_or(LendingError::SavingNotFound { id: *id })
    }

    // gateway records

    pub(crate) fn insert_payment(&self, payment: Payment) {
        self.payments.insert(payment.id, payment);
    }

    pub(crate) async fn lock_payment(&self, id: &PaymentId, reference: &str) -> Result<RowGuard<Payment>> {
        self.payments
            .lock(id)
            .await
            .ok_or_else(|| LendingError::PaymentNotFound {
                reference: reference.to_string(),
            })
    }

    pub async fn payment(&self, id: &PaymentId) -> Option<Payment> {
        self.payments.get(id).await
    }

    /// claim a reference; fails if it was ever registered before
    pub(crate) fn register_reference(&self, reference: &str, record: PendingRecord) -> Result<()> {
        let mut references = self.references.write().unwrap_or_else(|e| e.into_inner());
        match references.entry(reference.to_string()) {
            Entry::Occupied(_) => Err(LendingError::DuplicateReference {
                reference: reference.to_string(),
            }),
            Entry::Vacant(e) => {
                e.insert(Arc::new(Mutex::new(record)));
                Ok(())
            }
        }
    }

    /// serialises every terminal transition for one reference
    pub(crate) async fn lock_reference(&self, reference: &str) -> Result<RowGuard<PendingRecord>> {
        let row = {
            let references = self.references.read().unwrap_or_else(|e| e.into_inner());
            references.get(reference).cloned()
        };
        match row {
            Some(row) => Ok(row.lock_owned().await),
            None => Err(LendingError::PaymentNotFound {
                reference: reference.to_string(),
            }),
        }
    }

    pub fn reference_exists(&self, reference: &str) -> bool {
        let references = self.references.read().unwrap_or_else(|e| e.into_inner());
        references.contains_key(reference)
    }

    // events

    pub(crate) fn emit(&self, event: Event) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.emit(event);
    }

    pub fn take_events(&self) -> Vec<Event> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.take_events()
    }

    pub fn events(&self) -> Vec<Event> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.events().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Currency;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_wallet_owner_index_is_unique() {
        let store = Store::new();
        let owner = Uuid::new_v4();
        let now = Utc::now();

        let (first, created) =
            store.insert_wallet_if_absent(owner, || Wallet::new(Uuid::new_v4(), owner, Currency::Ngn, now));
        assert!(created);

        let (second, created) =
            store.insert_wallet_if_absent(owner, || Wallet::new(Uuid::new_v4(), owner, Currency::Ngn, now));
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(store.wallet_ids().len(), 1);
    }

    #[test]
    fn test_reference_registration() {
        let store = Store::new();
        let record = PendingRecord::Payment(Uuid::new_v4());

        store.register_reference("LRP-1", record).unwrap();
        assert!(store.reference_exists("LRP-1"));
        assert!(matches!(
            store.register_reference("LRP-1", record),
            Err(LendingError::DuplicateReference { .. })
        ));
    }

    #[tokio::test]
    async fn test_row_lock_excludes_second_holder() {
        let store = Arc::new(Store::new());
        let owner = Uuid::new_v4();
        let (wallet_id, _) = store.insert_wallet_if_absent(owner, || {
            Wallet::new(Uuid::new_v4(), owner, Currency::Ngn, Utc::now())
        });

        let guard = store.lock_wallet(&wallet_id).await.unwrap();
        let contender = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.lock_wallet(&wallet_id).await.map(|_| ()) })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_missing_rows() {
        let store = Store::new();
        let id = Uuid::new_v4();
        assert_eq!(
            store.wallet(&id).await.unwrap_err(),
            LendingError::WalletNotFound { id }
        );
        assert!(matches!(
            store.lock_reference("nope").await,
            Err(LendingError::PaymentNotFound { .. })
        ));
    }
}
