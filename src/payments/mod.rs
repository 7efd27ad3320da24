pub mod amortization;
pub mod repayment;

pub use amortization::{amortize, calculate_emi, total_interest, total_payable, Amortization, ScheduledInstallment};
pub use repayment::{apply_payment, RepaymentOutcome, RepaymentProcessor};
