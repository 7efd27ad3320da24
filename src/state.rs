use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};
use crate::types::{
    Currency, GatewayName, LoanId, LoanStatus, PaymentId, PaymentPurpose, PaymentStatus, PlanId,
    RepaymentId, RepaymentStatus, SavingId, SavingStatus, TransactionCategory, TransactionId,
    TransactionSource, TransactionStatus, TransactionType, UserId, WalletId,
};

/// customer wallet; `balance` is only ever written by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub owner_id: UserId,
    pub balance: Money,
    pub currency: Currency,
    pub is_active: bool,
    pub is_locked: bool,
    pub lock_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(id: WalletId, owner_id: UserId, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            id,
            owner_id,
            balance: Money::ZERO,
            currency,
            is_active: true,
            is_locked: false,
            lock_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// reason the wallet cannot be debited, if any
    pub fn unusable_reason(&self) -> Option<String> {
        if !self.is_active {
            return Some("wallet is inactive".to_string());
        }
        if self.is_locked {
            let reason = self.lock_reason.as_deref().unwrap_or("no reason given");
            return Some(format!("wallet is locked: {}", reason));
        }
        None
    }
}

/// wallet ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    pub owner_id: UserId,
    pub reference: String,
    pub kind: TransactionType,
    pub amount: Money,
    /// finalised when the entry completes
    pub balance_before: Money,
    pub balance_after: Money,
    pub category: TransactionCategory,
    pub description: String,
    pub source: TransactionSource,
    pub source_reference: Option<String>,
    pub status: TransactionStatus,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// contribution of this entry to the wallet balance
    pub fn signed_amount(&self) -> Money {
        if self.status != TransactionStatus::Completed {
            return Money::ZERO;
        }
        match self.kind {
            TransactionType::Credit => self.amount,
            TransactionType::Debit => Money::ZERO - self.amount,
        }
    }
}

/// loan application and its lifecycle fields; money figures are derived elsewhere
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub borrower_id: UserId,
    pub principal: Money,
    pub annual_rate: Rate,
    pub tenure_months: u32,
    pub purpose: Option<String>,
    pub admin_fee: Money,
    pub admin_fee_paid: bool,
    pub status: LoanStatus,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<UserId>,
    pub rejection_reason: Option<String>,
    pub disbursed_by: Option<UserId>,
    pub disbursed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// one scheduled installment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repayment {
    pub id: RepaymentId,
    pub loan_id: LoanId,
    pub installment_number: u32,
    pub amount: Money,
    pub principal_component: Money,
    pub interest_component: Money,
    pub due_date: DateTime<Utc>,
    pub status: RepaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
}

/// savings product template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsPlan {
    pub id: PlanId,
    pub name: String,
    pub interest_rate: Rate,
    pub minimum_deposit: Money,
    pub maximum_deposit: Option<Money>,
    /// 0 means flexible
    pub lock_period_days: u32,
    pub early_withdrawal_penalty: Rate,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl SavingsPlan {
    pub fn is_flexible(&self) -> bool {
        self.lock_period_days == 0
    }
}

/// money placed into a position at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsDeposit {
    pub amount: Money,
    pub deposited_at: DateTime<Utc>,
}

/// customer position against a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSaving {
    pub id: SavingId,
    pub owner_id: UserId,
    pub plan_id: PlanId,
    pub wallet_id: WalletId,
    /// total principal across deposits
    pub amount: Money,
    pub deposits: Vec<SavingsDeposit>,
    /// zero while active, frozen at withdrawal
    pub accrued_interest: Money,
    pub penalty_charged: Money,
    pub maturity_date: Option<DateTime<Utc>>,
    pub status: SavingStatus,
    pub created_at: DateTime<Utc>,
    pub withdrawn_at: Option<DateTime<Utc>>,
}

/// gateway collection record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub payer_id: UserId,
    pub purpose: PaymentPurpose,
    pub amount: Money,
    pub gateway: GatewayName,
    pub reference: String,
    pub gateway_reference: Option<String>,
    pub status: PaymentStatus,
    pub gateway_response: Option<serde_json::Value>,
    /// ledger entry already committed for this payment (bill payments)
    pub wallet_transaction_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(kind: TransactionType, status: TransactionStatus) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            wallet_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            reference: "TXN-1".to_string(),
            kind,
            amount: Money::from_major(40),
            balance_before: Money::ZERO,
            balance_after: Money::ZERO,
            category: TransactionCategory::Funding,
            description: String::new(),
            source: TransactionSource::Gateway,
            source_reference: None,
            status,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    #[test]
    fn test_signed_amount() {
        let credit = entry(TransactionType::Credit, TransactionStatus::Completed);
        let debit = entry(TransactionType::Debit, TransactionStatus::Completed);
        let pending = entry(TransactionType::Credit, TransactionStatus::Pending);

        assert_eq!(credit.signed_amount(), Money::from_major(40));
        assert_eq!(debit.signed_amount(), Money::from_major(-40));
        assert_eq!(pending.signed_amount(), Money::ZERO);
    }

    #[test]
    fn test_wallet_usability() {
        let mut wallet = Wallet::new(Uuid::new_v4(), Uuid::new_v4(), Currency::Ngn, Utc::now());
        assert!(wallet.unusable_reason().is_none());

        wallet.is_locked = true;
        wallet.lock_reason = Some("chargeback".to_string());
        assert_eq!(
            wallet.unusable_reason().as_deref(),
            Some("wallet is locked: chargeback")
        );

        wallet.is_active = false;
        assert_eq!(wallet.unusable_reason().as_deref(), Some("wallet is inactive"));
    }
}
