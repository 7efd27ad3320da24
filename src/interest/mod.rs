pub mod accrual;

pub use accrual::{AccrualEngine, SavingsQuote};
