use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{
    LoanId, LoanStatus, PaymentPurpose, PaymentStatus, RepaymentId, SavingId, TransactionCategory,
    UserId, WalletId,
};

/// every committed mutation of the core, in commit order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // wallet events
    WalletCreated {
        wallet_id: WalletId,
        owner_id: UserId,
        timestamp: DateTime<Utc>,
    },
    WalletCredited {
        wallet_id: WalletId,
        amount: Money,
        balance_after: Money,
        category: TransactionCategory,
        reference: String,
        timestamp: DateTime<Utc>,
    },
    WalletDebited {
        wallet_id: WalletId,
        amount: Money,
        balance_after: Money,
        category: TransactionCategory,
        reference: String,
        timestamp: DateTime<Utc>,
    },
    WalletLocked {
        wallet_id: WalletId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    WalletUnlocked {
        wallet_id: WalletId,
        timestamp: DateTime<Utc>,
    },

    // loan events
    LoanApplied {
        loan_id: LoanId,
        borrower_id: UserId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    LoanStatusChanged {
        loan_id: LoanId,
        old_status: LoanStatus,
        new_status: LoanStatus,
        actor_id: Option<UserId>,
        timestamp: DateTime<Utc>,
    },
    ScheduleGenerated {
        loan_id: LoanId,
        installments: u32,
        emi: Money,
        timestamp: DateTime<Utc>,
    },
    ScheduleReset {
        loan_id: LoanId,
        actor_id: UserId,
        timestamp: DateTime<Utc>,
    },
    AdminFeePaid {
        loan_id: LoanId,
        amount: Money,
        reference: String,
        timestamp: DateTime<Utc>,
    },
    RepaymentPaid {
        loan_id: LoanId,
        repayment_id: RepaymentId,
        amount: Money,
        reference: String,
        timestamp: DateTime<Utc>,
    },
    RepaymentOverdue {
        loan_id: LoanId,
        repayment_id: RepaymentId,
        timestamp: DateTime<Utc>,
    },

    // savings events
    SavingsSubscribed {
        saving_id: SavingId,
        owner_id: UserId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    SavingsTopUp {
        saving_id: SavingId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    SavingsWithdrawn {
        saving_id: SavingId,
        payout: Money,
        interest: Money,
        penalty: Money,
        timestamp: DateTime<Utc>,
    },

    // gateway events
    PaymentInitialized {
        reference: String,
        purpose: PaymentPurpose,
        amount: Money,
        timestamp: DateTime<Utc>,
    },
    PaymentSettled {
        reference: String,
        status: PaymentStatus,
        timestamp: DateTime<Utc>,
    },
}

/// append-only event log
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
