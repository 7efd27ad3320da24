//! Upward-facing facade.
//!
//! Wires the store, configuration, clock and gateways, and reads `now` from
//! the time provider so callers never pass timestamps themselves.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hourglass_rs::SafeTimeProvider;

use crate::config::CoreConfig;
use crate::decimal::{Money, Rate};
use crate::errors::{LendingError, Result};
use crate::events::Event;
use crate::gateway::{PaymentGateway, PaymentInit, Reconciler, VerifyOutcome};
use crate::interest::AccrualEngine;
use crate::ledger::{Ledger, Posting};
use crate::loans::{LoanService, LoanSummary};
use crate::payments::repayment::RepaymentProcessor;
use crate::savings::{PlanTerms, SavingsService, Withdrawal};
use crate::state::{Loan, Repayment, SavingsPlan, Transaction, UserSaving, Wallet};
use crate::store::{PendingRecord, Store};
use crate::types::{
    GatewayName, LoanId, PaymentPurpose, PaymentStatus, PlanId, RepaymentId, SavingId,
    TransactionCategory, TransactionSource, UserId, WalletId,
};
use crate::views::{LoanView, PaymentView, SavingView, WalletView};

pub struct Platform {
    store: Arc<Store>,
    config: CoreConfig,
    time: SafeTimeProvider,
    ledger: Ledger,
    loans: LoanService,
    repayments: RepaymentProcessor,
    savings: SavingsService,
    reconciler: Reconciler,
}

impl Platform {
    pub fn new(config: CoreConfig, time: SafeTimeProvider) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(Store::new());
        let ledger = Ledger::new(Arc::clone(&store));
        let engine = AccrualEngine::new(config.savings.year_basis);

        tracing::info!(
            currency = %config.currency,
            gateway = %config.gateway.default_gateway,
            timeout_ms = config.gateway.timeout_ms,
            "platform started"
        );

        Ok(Self {
            loans: LoanService::new(Arc::clone(&store), config.loan_policy.clone()),
            repayments: RepaymentProcessor::new(Arc::clone(&store)),
            savings: SavingsService::new(Arc::clone(&store), ledger.clone(), engine),
            reconciler: Reconciler::new(Arc::clone(&store), config.gateway.clone(), config.currency),
            ledger,
            store,
            config,
            time,
        })
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.reconciler.register(gateway);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.time.now()
    }

    pub fn time(&self) -> &SafeTimeProvider {
        &self.time
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    // wallets

    pub async fn get_or_create_wallet(&self, user_id: UserId) -> Result<Wallet> {
        self.ledger
            .get_or_create_wallet(user_id, self.config.currency, self.now())
            .await
    }

    pub async fn credit(
        &self,
        wallet_id: &WalletId,
        amount: Money,
        description: &str,
        category: TransactionCategory,
        source: TransactionSource,
        source_reference: Option<&str>,
    ) -> Result<Transaction> {
        let posting = posting(amount, description, category, source, source_reference);
        self.ledger.credit(wallet_id, posting, self.now()).await
    }

    pub async fn debit(
        &self,
        wallet_id: &WalletId,
        amount: Money,
        description: &str,
        category: TransactionCategory,
        source: TransactionSource,
        source_reference: Option<&str>,
    ) -> Result<Transaction> {
        let posting = posting(amount, description, category, source, source_reference);
        self.ledger.debit(wallet_id, posting, self.now()).await
    }

    pub async fn transfer(
        &self,
        from: &WalletId,
        to: &WalletId,
        amount: Money,
        description: &str,
    ) -> Result<(Transaction, Transaction)> {
        self.ledger.transfer(from, to, amount, description, self.now()).await
    }

    pub async fn lock_wallet(&self, wallet_id: &WalletId, reason: &str) -> Result<Wallet> {
        self.ledger.lock_wallet(wallet_id, reason, self.now()).await
    }

    pub async fn unlock_wallet(&self, wallet_id: &WalletId) -> Result<Wallet> {
        self.ledger.unlock_wallet(wallet_id, self.now()).await
    }

    pub async fn set_wallet_active(&self, wallet_id: &WalletId, active: bool) -> Result<Wallet> {
        self.ledger.set_active(wallet_id, active, self.now()).await
    }

    pub async fn wallet_history(&self, wallet_id: &WalletId) -> Result<Vec<Transaction>> {
        self.ledger.history(wallet_id).await
    }

    pub async fn verify_wallet_balance(&self, wallet_id: &WalletId) -> Result<Money> {
        self.ledger.verify_balance(wallet_id).await
    }

    pub async fn wallet_view(&self, wallet_id: &WalletId, recent: usize) -> Result<WalletView> {
        let wallet = self.ledger.wallet(wallet_id).await?;
        let history = self.ledger.history(wallet_id).await?;
        Ok(WalletView::from_wallet(&wallet, &history, recent))
    }

    // loans

    pub fn apply_for_loan(
        &self,
        borrower_id: UserId,
        amount: Money,
        annual_rate: Rate,
        tenure_months: u32,
        purpose: Option<String>,
    ) -> Result<Loan> {
        self.loans
            .apply(borrower_id, amount, annual_rate, tenure_months, purpose, self.now())
    }

    pub async fn approve_loan(&self, loan_id: &LoanId, actor_id: UserId) -> Result<Loan> {
        self.loans.approve(loan_id, actor_id, self.now()).await
    }

    pub async fn reject_loan(&self, loan_id: &LoanId, actor_id: UserId, reason: &str) -> Result<Loan> {
        self.loans.reject(loan_id, actor_id, reason, self.now()).await
    }

    pub async fn disburse_loan(&self, loan_id: &LoanId, actor_id: UserId) -> Result<Loan> {
        Ok(self.loans.disburse(loan_id, actor_id, self.now()).await?.loan)
    }

    pub async fn reset_schedule(&self, loan_id: &LoanId, actor_id: UserId) -> Result<Vec<Repayment>> {
        Ok(self.loans.reset_schedule(loan_id, actor_id, self.now()).await?.repayments)
    }

    pub async fn refresh_overdue(&self, loan_id: &LoanId) -> Result<Vec<RepaymentId>> {
        self.loans.refresh_overdue(loan_id, self.now()).await
    }

    pub async fn apply_repayment(
        &self,
        loan_id: &LoanId,
        repayment_id: Option<RepaymentId>,
        amount: Money,
        reference: &str,
    ) -> Result<Repayment> {
        let outcome = self
            .repayments
            .apply(loan_id, repayment_id, amount, reference, self.now())
            .await?;
        Ok(outcome.repayment)
    }

    pub async fn loan_summary(&self, loan_id: &LoanId) -> Result<LoanSummary> {
        self.loans.summary(loan_id).await
    }

    pub async fn loan_view(&self, loan_id: &LoanId) -> Result<LoanView> {
        let entry = self.loans.loan(loan_id).await?;
        let summary = LoanSummary::compute(&entry.loan, &entry.repayments)?;
        Ok(LoanView::from_loan(&entry.loan, &entry.repayments, summary))
    }

    // savings

    pub fn create_savings_plan(&self, terms: PlanTerms) -> Result<SavingsPlan> {
        self.savings.create_plan(terms, self.now())
    }

    pub async fn set_plan_active(&self, plan_id: &PlanId, active: bool) -> Result<SavingsPlan> {
        self.savings.set_plan_active(plan_id, active).await
    }

    /// funds come from the user's wallet, created empty if missing
    pub async fn subscribe_savings(&self, user_id: UserId, plan_id: &PlanId, amount: Money) -> Result<UserSaving> {
        let wallet = self.get_or_create_wallet(user_id).await?;
        self.savings.subscribe(&wallet.id, plan_id, amount, self.now()).await
    }

    pub async fn add_savings_funds(&self, saving_id: &SavingId, amount: Money) -> Result<UserSaving> {
        self.savings.add_funds(saving_id, amount, self.now()).await
    }

    pub async fn withdraw_savings(&self, saving_id: &SavingId) -> Result<Withdrawal> {
        self.savings.withdraw(saving_id, self.now()).await
    }

    pub async fn saving_view(&self, saving_id: &SavingId) -> Result<SavingView> {
        let saving = self.savings.saving(saving_id).await?;
        let plan = self.savings.plan(&saving.plan_id).await?;
        let quote = self.savings.quote(saving_id, self.now()).await?;
        Ok(SavingView::from_saving(&saving, &plan, quote))
    }

    // gateway

    pub async fn initialize_payment(
        &self,
        purpose: PaymentPurpose,
        amount: Money,
        payer_id: UserId,
        gateway: Option<GatewayName>,
    ) -> Result<PaymentInit> {
        self.reconciler
            .initialize(payer_id, purpose, amount, gateway, self.now())
            .await
    }

    pub async fn verify_payment(&self, reference: &str, gateway_tx_id: Option<&str>) -> Result<VerifyOutcome> {
        self.reconciler.verify(reference, gateway_tx_id, self.now()).await
    }

    pub async fn payment_status(&self, reference: &str) -> Result<PaymentStatus> {
        self.reconciler.status(reference).await
    }

    pub async fn payment_view(&self, reference: &str) -> Result<PaymentView> {
        let not_found = || LendingError::PaymentNotFound {
            reference: reference.to_string(),
        };
        let record = *self.store.lock_reference(reference).await?;
        match record {
            PendingRecord::Funding { transaction_id, .. } => {
                let tx = self.store.transaction(&transaction_id).ok_or_else(not_found)?;
                Ok(PaymentView::from_funding(&tx))
            }
            PendingRecord::Payment(id) => {
                let payment = self.store.payment(&id).await.ok_or_else(not_found)?;
                Ok(PaymentView::from_payment(&payment))
            }
        }
    }

    // audit

    pub fn events(&self) -> Vec<Event> {
        self.store.events()
    }

    pub fn take_events(&self) -> Vec<Event> {
        self.store.take_events()
    }
}

fn posting(
    amount: Money,
    description: &str,
    category: TransactionCategory,
    source: TransactionSource,
    source_reference: Option<&str>,
) -> Posting {
    let posting = Posting::new(amount, category, source).description(description);
    match source_reference {
        Some(reference) => posting.source_reference(reference),
        None => posting,
    }
}
