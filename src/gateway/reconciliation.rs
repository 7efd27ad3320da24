//! Exactly-once application of gateway verdicts.
//!
//! A reference is generated and persisted as pending before the gateway is
//! contacted. `verify` holds the reference row lock for its whole duration,
//! so one terminal transition per reference is the most that can ever happen;
//! every later call reads the stored verdict without calling the gateway.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::decimal::Money;
use crate::errors::{LendingError, Result};
use crate::events::Event;
use crate::gateway::{GatewayStatus, InitializeRequest, PaymentGateway};
use crate::ledger::{Ledger, Posting};
use crate::loans::lifecycle;
use crate::payments::repayment::{apply_payment, RepaymentProcessor};
use crate::state::Payment;
use crate::store::{PendingRecord, RowGuard, Store};
use crate::types::{
    new_reference, Currency, GatewayName, PaymentPurpose, PaymentStatus, TransactionCategory,
    TransactionSource, TransactionStatus, UserId,
};

/// handed back to the caller, who redirects the customer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInit {
    pub reference: String,
    pub redirect_url: String,
    pub gateway: GatewayName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub reference: String,
    pub status: PaymentStatus,
    /// the record was already final; nothing was called or changed
    pub already_terminal: bool,
}

/// what is still expected for a pending reference
struct Expected {
    gateway: GatewayName,
    amount: Money,
}

enum Loaded {
    Terminal(PaymentStatus),
    Pending(Expected),
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<Store>,
    ledger: Ledger,
    repayments: RepaymentProcessor,
    gateways: HashMap<GatewayName, Arc<dyn PaymentGateway>>,
    config: GatewayConfig,
    currency: Currency,
}

impl Reconciler {
    pub fn new(store: Arc<Store>, config: GatewayConfig, currency: Currency) -> Self {
        Self {
            ledger: Ledger::new(Arc::clone(&store)),
            repayments: RepaymentProcessor::new(Arc::clone(&store)),
            store,
            gateways: HashMap::new(),
            config,
            currency,
        }
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        tracing::debug!(gateway = %gateway.name(), "gateway registered");
        self.gateways.insert(gateway.name(), gateway);
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    fn gateway(&self, name: GatewayName) -> Result<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&name)
            .cloned()
            .ok_or_else(|| LendingError::GatewayNotConfigured {
                gateway: name.to_string(),
            })
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// persist a pending record under a fresh reference, then open checkout
    ///
    /// On a gateway error the record is failed at once (a bill payment is
    /// refunded). On a timeout it stays pending and can still be verified.
    pub async fn initialize(
        &self,
        payer_id: UserId,
        purpose: PaymentPurpose,
        amount: Money,
        gateway: Option<GatewayName>,
        now: DateTime<Utc>,
    ) -> Result<PaymentInit> {
        let gateway_name = gateway.unwrap_or(self.config.default_gateway);
        let client = self.gateway(gateway_name)?;
        Ledger::check_amount(amount)?;

        let reference = new_reference(purpose.reference_prefix());
        self.open_record(payer_id, &purpose, amount, gateway_name, &reference, now)
            .await?;

        tracing::info!(reference = %reference, gateway = %gateway_name, amount = %amount, purpose = ?purpose, "payment initialized");
        self.store.emit(Event::PaymentInitialized {
            reference: reference.clone(),
            purpose: purpose.clone(),
            amount,
            timestamp: now,
        });

        let request = InitializeRequest {
            customer: payer_id.to_string(),
            amount,
            reference: reference.clone(),
            callback_url: self.config.callback_url.clone(),
            metadata: serde_json::json!({ "purpose": purpose }),
        };

        match tokio::time::timeout(self.timeout(), client.initialize_transaction(&request)).await {
            Ok(Ok(response)) => Ok(PaymentInit {
                reference,
                redirect_url: response.authorization_url,
                gateway: gateway_name,
            }),
            Ok(Err(e)) => {
                tracing::error!(reference = %reference, gateway = %gateway_name, error = %e, "gateway refused initialization");
                let record = self.store.lock_reference(&reference).await?;
                let raw = serde_json::json!({ "error": e.to_string() });
                self.settle(&record, &reference, false, None, raw, now).await?;
                Err(e)
            }
            Err(_) => {
                tracing::warn!(reference = %reference, gateway = %gateway_name, "gateway initialization timed out");
                Err(LendingError::GatewayTimeout { reference })
            }
        }
    }

    async fn open_record(
        &self,
        payer_id: UserId,
        purpose: &PaymentPurpose,
        amount: Money,
        gateway: GatewayName,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut payment = Payment {
            id: Uuid::new_v4(),
            payer_id,
            purpose: purpose.clone(),
            amount,
            gateway,
            reference: reference.to_string(),
            gateway_reference: None,
            status: PaymentStatus::Pending,
            gateway_response: None,
            wallet_transaction_id: None,
            created_at: now,
            paid_at: None,
        };

        match purpose {
            PaymentPurpose::WalletFunding => {
                let wallet = self.ledger.get_or_create_wallet(payer_id, self.currency, now).await?;
                self.ledger
                    .open_pending_funding(&wallet.id, amount, reference, gateway, now)
                    .await?;
                return Ok(());
            }
            PaymentPurpose::AdminFee { loan_id } => {
                let mut scratch = self.store.loan(loan_id).await?.loan;
                lifecycle::record_admin_fee(&mut scratch, amount, now)?;
            }
            PaymentPurpose::LoanRepayment { loan_id, repayment_id } => {
                let mut scratch = self.store.loan(loan_id).await?;
                apply_payment(&mut scratch, *repayment_id, amount, reference, now)?;
            }
            PaymentPurpose::BillPayment { biller, customer_ref } => {
                let wallet_id = self
                    .ledger
                    .get_or_create_wallet(payer_id, self.currency, now)
                    .await?
                    .id;
                let mut wallet = self.store.lock_wallet(&wallet_id).await?;
                Ledger::check_debit(&wallet, amount)?;

                self.store.register_reference(reference, PendingRecord::Payment(payment.id))?;
                let posting = Posting::new(amount, TransactionCategory::BillPayment, TransactionSource::Biller)
                    .description(format!("bill payment: {}", biller))
                    .source_reference(reference)
                    .metadata(serde_json::json!({ "biller": biller, "customer_ref": customer_ref }));
                let tx = self.ledger.apply_debit(&mut wallet, posting, now)?;

                payment.wallet_transaction_id = Some(tx.id);
                self.store.insert_payment(payment);
                return Ok(());
            }
        }

        self.store.register_reference(reference, PendingRecord::Payment(payment.id))?;
        self.store.insert_payment(payment);
        Ok(())
    }

    /// apply the gateway verdict for `reference`, at most once
    ///
    /// `callback_id` is whatever transaction id the callback carried; it is
    /// kept for audit but the gateway is always queried by our own reference.
    pub async fn verify(
        &self,
        reference: &str,
        callback_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<VerifyOutcome> {
        let record = self.store.lock_reference(reference).await?;

        let expected = match self.load(&record, reference).await? {
            Loaded::Terminal(status) => {
                tracing::debug!(reference, status = ?status, "verify replay");
                return Ok(VerifyOutcome {
                    reference: reference.to_string(),
                    status,
                    already_terminal: true,
                });
            }
            Loaded::Pending(expected) => expected,
        };

        let client = self.gateway(expected.gateway)?;
        let verification = match tokio::time::timeout(self.timeout(), client.verify_transaction(reference)).await {
            Ok(Ok(verification)) => verification,
            Ok(Err(e)) => {
                tracing::error!(reference, gateway = %expected.gateway, error = %e, "gateway verification failed");
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(reference, gateway = %expected.gateway, "gateway verification timed out");
                return Err(LendingError::GatewayTimeout {
                    reference: reference.to_string(),
                });
            }
        };

        if verification.reference != reference {
            tracing::error!(reference, returned = %verification.reference, "gateway echoed a different reference");
            return Err(LendingError::ReferenceMismatch {
                expected: reference.to_string(),
                returned: verification.reference,
            });
        }

        let success = match verification.status {
            GatewayStatus::Pending => {
                tracing::debug!(reference, "gateway still pending");
                return Ok(VerifyOutcome {
                    reference: reference.to_string(),
                    status: PaymentStatus::Pending,
                    already_terminal: false,
                });
            }
            GatewayStatus::Success if verification.amount < expected.amount => {
                tracing::warn!(
                    reference,
                    expected = %expected.amount,
                    collected = %verification.amount,
                    "gateway collected less than expected"
                );
                false
            }
            GatewayStatus::Success => true,
            GatewayStatus::Failed => false,
        };

        let mut raw = verification.raw;
        if let (Some(id), Some(object)) = (callback_id, raw.as_object_mut()) {
            object.insert("callback_transaction_id".to_string(), serde_json::json!(id));
        }

        let status = self
            .settle(&record, reference, success, Some(verification.gateway_reference), raw, now)
            .await?;

        Ok(VerifyOutcome {
            reference: reference.to_string(),
            status,
            already_terminal: false,
        })
    }

    /// current status of a reference; waits for an in-flight verify
    pub async fn status(&self, reference: &str) -> Result<PaymentStatus> {
        let record = self.store.lock_reference(reference).await?;
        Ok(match self.load(&record, reference).await? {
            Loaded::Terminal(status) => status,
            Loaded::Pending(_) => PaymentStatus::Pending,
        })
    }

    async fn load(&self, record: &RowGuard<PendingRecord>, reference: &str) -> Result<Loaded> {
        let not_found = || LendingError::PaymentNotFound {
            reference: reference.to_string(),
        };

        match **record {
            PendingRecord::Funding { transaction_id, .. } => {
                let tx = self.store.transaction(&transaction_id).ok_or_else(not_found)?;
                Ok(match tx.status {
                    TransactionStatus::Completed => Loaded::Terminal(PaymentStatus::Success),
                    TransactionStatus::Failed => Loaded::Terminal(PaymentStatus::Failed),
                    TransactionStatus::Pending => Loaded::Pending(Expected {
                        gateway: tx
                            .metadata
                            .get("gateway")
                            .cloned()
                            .and_then(|v| serde_json::from_value(v).ok())
                            .unwrap_or(self.config.default_gateway),
                        amount: tx.amount,
                    }),
                })
            }
            PendingRecord::Payment(id) => {
                let payment = self.store.payment(&id).await.ok_or_else(not_found)?;
                Ok(if payment.status.is_terminal() {
                    Loaded::Terminal(payment.status)
                } else {
                    Loaded::Pending(Expected {
                        gateway: payment.gateway,
                        amount: payment.amount,
                    })
                })
            }
        }
    }

    /// one terminal transition; the downstream effect is validated and
    /// committed before the record flips, so a refused effect leaves both as they were
    async fn settle(
        &self,
        record: &RowGuard<PendingRecord>,
        reference: &str,
        success: bool,
        gateway_reference: Option<String>,
        raw: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<PaymentStatus> {
        let status = if success { PaymentStatus::Success } else { PaymentStatus::Failed };

        match **record {
            PendingRecord::Funding {
                transaction_id,
                wallet_id,
            } => {
                let mut wallet = self.store.lock_wallet(&wallet_id).await?;
                self.ledger
                    .settle_pending_funding(&mut wallet, &transaction_id, success, gateway_reference, now)?;
            }
            PendingRecord::Payment(id) => {
                let mut payment = self.store.lock_payment(&id, reference).await?;
                if payment.status.is_terminal() {
                    return Err(LendingError::PaymentAlreadyFinal {
                        reference: reference.to_string(),
                        status: payment.status,
                    });
                }

                if success {
                    self.apply_effect(&payment, now).await?;
                } else {
                    self.reverse_effect(&payment, now).await?;
                }

                payment.status = status;
                payment.gateway_reference = gateway_reference;
                payment.gateway_response = Some(raw);
                payment.paid_at = success.then_some(now);
            }
        }

        tracing::info!(reference, status = ?status, "payment settled");
        self.store.emit(Event::PaymentSettled {
            reference: reference.to_string(),
            status,
            timestamp: now,
        });
        Ok(status)
    }

    async fn apply_effect(&self, payment: &Payment, now: DateTime<Utc>) -> Result<()> {
        match &payment.purpose {
            PaymentPurpose::AdminFee { loan_id } => {
                let mut entry = self.store.lock_loan(loan_id).await?;
                lifecycle::record_admin_fee(&mut entry.loan, payment.amount, now)?;

                tracing::info!(loan_id = %loan_id, reference = %payment.reference, "admin fee paid");
                self.store.emit(Event::AdminFeePaid {
                    loan_id: *loan_id,
                    amount: payment.amount,
                    reference: payment.reference.clone(),
                    timestamp: now,
                });
            }
            // funding settles through its pending ledger entry, never a payment row;
            // a bill payment was debited at initialization
            PaymentPurpose::WalletFunding | PaymentPurpose::BillPayment { .. } => {}
            PaymentPurpose::LoanRepayment { loan_id, repayment_id } => {
                let mut entry = self.store.lock_loan(loan_id).await?;
                let outcome = apply_payment(&mut entry, *repayment_id, payment.amount, &payment.reference, now)?;
                self.repayments.record(&outcome, *loan_id, &payment.reference, now);
            }
        }
        Ok(())
    }

    async fn reverse_effect(&self, payment: &Payment, now: DateTime<Utc>) -> Result<()> {
        let PaymentPurpose::BillPayment { biller, .. } = &payment.purpose else {
            return Ok(());
        };
        let Some(tx) = payment
            .wallet_transaction_id
            .and_then(|id| self.store.transaction(&id))
        else {
            return Ok(());
        };

        let mut wallet = self.store.lock_wallet(&tx.wallet_id).await?;
        let posting = Posting::new(tx.amount, TransactionCategory::Refund, TransactionSource::Biller)
            .description(format!("refund: {}", biller))
            .source_reference(payment.reference.as_str());
        self.ledger.apply_credit(&mut wallet, posting, now)?;

        tracing::info!(reference = %payment.reference, amount = %tx.amount, "bill payment refunded");
        Ok(())
    }
}
