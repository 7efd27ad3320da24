/// serializable read models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::interest::SavingsQuote;
use crate::loans::LoanSummary;
use crate::state::{Loan, Payment, Repayment, SavingsPlan, Transaction, UserSaving, Wallet};
use crate::types::{
    Currency, GatewayName, LoanId, LoanStatus, PaymentPurpose, PaymentStatus, PlanId, SavingId,
    SavingStatus, TransactionStatus, UserId, WalletId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletView {
    pub wallet_id: WalletId,
    pub owner_id: UserId,
    pub balance: Money,
    pub currency: Currency,
    pub is_active: bool,
    pub is_locked: bool,
    pub lock_reason: Option<String>,
    pub transaction_count: usize,
    /// newest first
    pub recent_transactions: Vec<Transaction>,
}

impl WalletView {
    pub fn from_wallet(wallet: &Wallet, history: &[Transaction], recent: usize) -> Self {
        WalletView {
            wallet_id: wallet.id,
            owner_id: wallet.owner_id,
            balance: wallet.balance,
            currency: wallet.currency,
            is_active: wallet.is_active,
            is_locked: wallet.is_locked,
            lock_reason: wallet.lock_reason.clone(),
            transaction_count: history.len(),
            recent_transactions: history.iter().rev().take(recent).cloned().collect(),
        }
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("JSON error: {}", e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanView {
    pub loan_id: LoanId,
    pub borrower_id: UserId,
    pub status: LoanStatus,
    pub principal: Money,
    pub annual_rate: Rate,
    pub tenure_months: u32,
    pub admin_fee: Money,
    pub admin_fee_paid: bool,
    pub disbursed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub summary: LoanSummary,
    pub repayments: Vec<Repayment>,
}

impl LoanView {
    pub fn from_loan(loan: &Loan, repayments: &[Repayment], summary: LoanSummary) -> Self {
        LoanView {
            loan_id: loan.id,
            borrower_id: loan.borrower_id,
            status: loan.status,
            principal: loan.principal,
            annual_rate: loan.annual_rate,
            tenure_months: loan.tenure_months,
            admin_fee: loan.admin_fee,
            admin_fee_paid: loan.admin_fee_paid,
            disbursed_at: loan.disbursed_at,
            rejection_reason: loan.rejection_reason.clone(),
            summary,
            repayments: repayments.to_vec(),
        }
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("JSON error: {}", e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavingView {
    pub saving_id: SavingId,
    pub plan_id: PlanId,
    pub plan_name: String,
    pub interest_rate: Rate,
    pub status: SavingStatus,
    pub principal: Money,
    pub deposits: usize,
    pub created_at: DateTime<Utc>,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub quote: SavingsQuote,
}

impl SavingView {
    pub fn from_saving(saving: &UserSaving, plan: &SavingsPlan, quote: SavingsQuote) -> Self {
        SavingView {
            saving_id: saving.id,
            plan_id: plan.id,
            plan_name: plan.name.clone(),
            interest_rate: plan.interest_rate,
            status: saving.status,
            principal: saving.amount,
            deposits: saving.deposits.len(),
            created_at: saving.created_at,
            withdrawn_at: saving.withdrawn_at,
            quote,
        }
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("JSON error: {}", e))
    }
}

/// a gateway collection, whichever record backs it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentView {
    pub reference: String,
    pub purpose: PaymentPurpose,
    /// loan the collection is linked to, if any
    pub loan_id: Option<LoanId>,
    pub amount: Money,
    pub gateway: Option<GatewayName>,
    pub gateway_reference: Option<String>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl PaymentView {
    pub fn from_payment(payment: &Payment) -> Self {
        PaymentView {
            reference: payment.reference.clone(),
            purpose: payment.purpose.clone(),
            loan_id: payment.purpose.loan_id(),
            amount: payment.amount,
            gateway: Some(payment.gateway),
            gateway_reference: payment.gateway_reference.clone(),
            status: payment.status,
            created_at: payment.created_at,
            settled_at: payment.paid_at,
        }
    }

    /// pending wallet funding entries stand in for a payment row
    pub fn from_funding(tx: &Transaction) -> Self {
        PaymentView {
            reference: tx.reference.clone(),
            purpose: PaymentPurpose::WalletFunding,
            loan_id: None,
            amount: tx.amount,
            gateway: tx
                .metadata
                .get("gateway")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok()),
            gateway_reference: tx.source_reference.clone(),
            status: match tx.status {
                TransactionStatus::Pending => PaymentStatus::Pending,
                TransactionStatus::Completed => PaymentStatus::Success,
                TransactionStatus::Failed => PaymentStatus::Failed,
            },
            created_at: tx.created_at,
            settled_at: tx.settled_at,
        }
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("JSON error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TransactionCategory, TransactionSource, TransactionType};
    use uuid::Uuid;

    fn funding(status: TransactionStatus) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            wallet_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            reference: "WFD-ABC".to_string(),
            kind: TransactionType::Credit,
            amount: Money::from_major(5_000),
            balance_before: Money::ZERO,
            balance_after: Money::ZERO,
            category: TransactionCategory::Funding,
            description: "wallet funding".to_string(),
            source: TransactionSource::Gateway,
            source_reference: None,
            status,
            metadata: serde_json::json!({ "gateway": GatewayName::Flutterwave }),
            created_at: now,
            settled_at: None,
        }
    }

    #[test]
    fn test_wallet_view_lists_newest_first() {
        let wallet = Wallet::new(Uuid::new_v4(), Uuid::new_v4(), Currency::Ngn, Utc::now());
        let mut first = funding(TransactionStatus::Completed);
        first.reference = "FIRST".to_string();
        let mut second = funding(TransactionStatus::Completed);
        second.reference = "SECOND".to_string();

        let view = WalletView::from_wallet(&wallet, &[first, second], 1);
        assert_eq!(view.transaction_count, 2);
        assert_eq!(view.recent_transactions.len(), 1);
        assert_eq!(view.recent_transactions[0].reference, "SECOND");

        let json = view.to_json_pretty();
        assert!(json.contains("\"currency\": \"NGN\""));
    }

    #[test]
    fn test_funding_maps_to_payment_view() {
        let view = PaymentView::from_funding(&funding(TransactionStatus::Pending));
        assert_eq!(view.status, PaymentStatus::Pending);
        assert_eq!(view.gateway, Some(GatewayName::Flutterwave));
        assert_eq!(view.purpose, PaymentPurpose::WalletFunding);

        let view = PaymentView::from_funding(&funding(TransactionStatus::Completed));
        assert_eq!(view.status, PaymentStatus::Success);
        assert!(view.to_json_pretty().contains("wallet_funding"));
        assert_eq!(view.loan_id, None);
    }

    #[test]
    fn test_loan_payment_view_carries_loan_link() {
        let loan_id = Uuid::new_v4();
        let payment = Payment {
            id: Uuid::new_v4(),
            payer_id: Uuid::new_v4(),
            purpose: PaymentPurpose::LoanRepayment {
                loan_id,
                repayment_id: None,
            },
            amount: Money::from_major(10_000),
            gateway: GatewayName::Paystack,
            reference: "LRP-ABC".to_string(),
            gateway_reference: Some("paystack_1".to_string()),
            status: PaymentStatus::Success,
            gateway_response: None,
            wallet_transaction_id: None,
            created_at: Utc::now(),
            paid_at: Some(Utc::now()),
        };

        let view = PaymentView::from_payment(&payment);
        assert_eq!(view.loan_id, Some(loan_id));
        assert_eq!(view.gateway, Some(GatewayName::Paystack));

        let fee = Payment {
            purpose: PaymentPurpose::AdminFee { loan_id },
            ..payment.clone()
        };
        assert_eq!(PaymentView::from_payment(&fee).loan_id, Some(loan_id));

        let bill = Payment {
            purpose: PaymentPurpose::BillPayment {
                biller: "ikeja-electric".to_string(),
                customer_ref: "0101".to_string(),
            },
            ..payment
        };
        assert_eq!(PaymentView::from_payment(&bill).loan_id, None);
    }
}
