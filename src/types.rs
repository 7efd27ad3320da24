use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// customer / staff identity supplied by the auth layer
pub type UserId = Uuid;
pub type WalletId = Uuid;
pub type TransactionId = Uuid;
pub type LoanId = Uuid;
pub type RepaymentId = Uuid;
pub type PlanId = Uuid;
pub type SavingId = Uuid;
pub type PaymentId = Uuid;

/// wallet currency; one currency per wallet, no conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Ngn,
    Usd,
    Ghs,
    Kes,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Currency::Ngn => "NGN",
            Currency::Usd => "USD",
            Currency::Ghs => "GHS",
            Currency::Kes => "KES",
        };
        f.write_str(code)
    }
}

/// direction of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Credit,
    Debit,
}

/// business reason for a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionCategory {
    Funding,
    BillPayment,
    CardFunding,
    SavingsDeposit,
    SavingsWithdrawal,
    Refund,
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// what caused a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    Gateway,
    Savings,
    Biller,
    Card,
    Transfer,
    Admin,
}

/// loan lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    /// application received, awaiting decision
    Pending,
    /// approved, awaiting disbursement
    Approved,
    /// declined, terminal
    Rejected,
    /// funds released, schedule being generated
    Disbursed,
    /// schedule exists, repayments running
    Active,
    /// every repayment paid, terminal
    Completed,
}

impl LoanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Rejected | LoanStatus::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepaymentStatus {
    Pending,
    Paid,
    Overdue,
}

impl RepaymentStatus {
    /// pending and overdue installments are both still owed
    pub fn is_outstanding(&self) -> bool {
        matches!(self, RepaymentStatus::Pending | RepaymentStatus::Overdue)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SavingStatus {
    Active,
    Withdrawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// supported payment gateways
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GatewayName {
    #[default]
    Paystack,
    Flutterwave,
}

impl fmt::Display for GatewayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayName::Paystack => f.write_str("paystack"),
            GatewayName::Flutterwave => f.write_str("flutterwave"),
        }
    }
}

/// why money is being collected through a gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentPurpose {
    /// top up the payer's wallet
    WalletFunding,
    /// loan administration fee
    AdminFee { loan_id: LoanId },
    /// utility / airtime bill paid out of the wallet
    BillPayment { biller: String, customer_ref: String },
    /// scheduled loan installment; `None` targets the next one due
    LoanRepayment {
        loan_id: LoanId,
        repayment_id: Option<RepaymentId>,
    },
}

impl PaymentPurpose {
    /// reference prefix, makes references readable in gateway dashboards
    pub fn reference_prefix(&self) -> &'static str {
        match self {
            PaymentPurpose::WalletFunding => "WFD",
            PaymentPurpose::AdminFee { .. } => "ADF",
            PaymentPurpose::BillPayment { .. } => "BIL",
            PaymentPurpose::LoanRepayment { .. } => "LRP",
        }
    }

    pub fn loan_id(&self) -> Option<LoanId> {
        match self {
            PaymentPurpose::AdminFee { loan_id } => Some(*loan_id),
            PaymentPurpose::LoanRepayment { loan_id, .. } => Some(*loan_id),
            PaymentPurpose::WalletFunding | PaymentPurpose::BillPayment { .. } => None,
        }
    }
}

/// generate a globally unique gateway reference
pub fn new_reference(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple().to_string().to_uppercase())
}
