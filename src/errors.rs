use thiserror::Error;
use uuid::Uuid;

use crate::decimal::Money;
use crate::types::{LoanStatus, PaymentStatus};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LendingError {
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Money,
        requested: Money,
    },

    #[error("wallet {wallet_id} cannot be debited: {reason}")]
    WalletUnusable {
        wallet_id: Uuid,
        reason: String,
    },

    #[error("invalid loan transition: cannot {action} a loan in status {from:?}")]
    InvalidTransition {
        from: LoanStatus,
        action: &'static str,
    },

    #[error("repayment {repayment_id} does not belong to loan {loan_id}")]
    MismatchedLoan {
        loan_id: Uuid,
        repayment_id: Uuid,
    },

    #[error("repayment {repayment_id} is already paid")]
    AlreadyPaid {
        repayment_id: Uuid,
    },

    #[error("amount below plan minimum: minimum {minimum}, provided {provided}")]
    BelowMinimum {
        minimum: Money,
        provided: Money,
    },

    #[error("amount above plan maximum: maximum {maximum}, provided {provided}")]
    AboveMaximum {
        maximum: Money,
        provided: Money,
    },

    #[error("savings plan {plan_id} is locked; funds cannot be added after subscription")]
    PlanLocked {
        plan_id: Uuid,
    },

    #[error("gateway timed out while processing {reference}; safe to retry")]
    GatewayTimeout {
        reference: String,
    },

    #[error("reference {reference} already exists")]
    DuplicateReference {
        reference: String,
    },

    #[error("gateway error: {message}")]
    GatewayFailure {
        message: String,
    },

    #[error("no gateway client registered for {gateway}")]
    GatewayNotConfigured {
        gateway: String,
    },

    #[error("gateway returned reference {returned}, expected {expected}")]
    ReferenceMismatch {
        expected: String,
        returned: String,
    },

    #[error("payment {reference} is {status:?} and cannot be changed")]
    PaymentAlreadyFinal {
        reference: String,
        status: PaymentStatus,
    },

    #[error("wallet not found: {id}")]
    WalletNotFound {
        id: Uuid,
    },

    #[error("loan not found: {id}")]
    LoanNotFound {
        id: Uuid,
    },

    #[error("savings plan not found: {id}")]
    PlanNotFound {
        id: Uuid,
    },

    #[error("savings position not found: {id}")]
    SavingNotFound {
        id: Uuid,
    },

    #[error("payment reference not found: {reference}")]
    PaymentNotFound {
        reference: String,
    },

    #[error("savings plan {plan_id} is not accepting subscriptions")]
    PlanInactive {
        plan_id: Uuid,
    },

    #[error("savings position {saving_id} is already withdrawn")]
    AlreadyWithdrawn {
        saving_id: Uuid,
    },

    #[error("invalid amount: {amount}")]
    InvalidAmount {
        amount: Money,
    },

    #[error("invalid loan terms: {message}")]
    InvalidLoanTerms {
        message: String,
    },

    #[error("admin fee of {fee} must be paid before disbursement")]
    AdminFeeUnpaid {
        fee: Money,
    },

    #[error("loan {loan_id} has no outstanding repayment")]
    NoPendingRepayment {
        loan_id: Uuid,
    },

    #[error("payment does not cover installment: required {required}, provided {provided}")]
    InsufficientPayment {
        required: Money,
        provided: Money,
    },

    #[error("balance mismatch on wallet {wallet_id}: stored {stored}, ledger {computed}")]
    BalanceMismatch {
        wallet_id: Uuid,
        stored: Money,
        computed: Money,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
    },
}

impl LendingError {
    /// only a gateway timeout leaves state untouched with an unresolved outcome
    pub fn is_retryable(&self) -> bool {
        matches!(self, LendingError::GatewayTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, LendingError>;
