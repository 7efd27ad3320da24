pub mod config;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod interest;
pub mod ledger;
pub mod loans;
pub mod logging;
pub mod payments;
pub mod platform;
pub mod savings;
pub mod state;
pub mod store;
pub mod types;
pub mod views;

// re-export key types
pub use config::{CoreConfig, GatewayConfig, LoanPolicy, SavingsConfig};
pub use decimal::{Money, Rate};
pub use errors::{LendingError, Result};
pub use events::{Event, EventStore};
pub use gateway::{
    GatewayStatus, GatewayVerification, InitializeRequest, InitializeResponse, PaymentGateway,
    PaymentInit, Reconciler, SandboxGateway, SandboxOutcome, VerifyOutcome,
};
pub use interest::{AccrualEngine, SavingsQuote};
pub use ledger::{Ledger, Posting};
pub use loans::{LoanService, LoanSummary};
pub use payments::{amortize, calculate_emi, Amortization, RepaymentOutcome, RepaymentProcessor, ScheduledInstallment};
pub use platform::Platform;
pub use savings::{PlanTerms, SavingsService, Withdrawal};
pub use state::{Loan, Payment, Repayment, SavingsDeposit, SavingsPlan, Transaction, UserSaving, Wallet};
pub use store::Store;
pub use types::{
    Currency, GatewayName, LoanId, LoanStatus, PaymentPurpose, PaymentStatus, PlanId, RepaymentId,
    RepaymentStatus, SavingId, SavingStatus, TransactionCategory, TransactionSource, TransactionStatus,
    TransactionType, UserId, WalletId,
};
pub use views::{LoanView, PaymentView, SavingView, WalletView};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
