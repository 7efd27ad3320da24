use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::decimal::{Money, Rate};
use crate::errors::{LendingError, Result};
use crate::types::{Currency, GatewayName};

/// core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub currency: Currency,
    pub loan_policy: LoanPolicy,
    pub gateway: GatewayConfig,
    pub savings: SavingsConfig,
}

/// limits applied when a loan application is received
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanPolicy {
    pub minimum_principal: Money,
    pub maximum_principal: Money,
    pub maximum_tenure_months: u32,
    pub maximum_annual_rate: Rate,
    /// admin fee as a fraction of principal, charged once per loan
    pub admin_fee_rate: Rate,
    pub require_admin_fee_before_disbursement: bool,
}

/// payment gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub default_gateway: GatewayName,
    pub callback_url: String,
    /// upper bound for any single outbound gateway call
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavingsConfig {
    /// days per year used for daily accrual
    pub year_basis: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            currency: Currency::Ngn,
            loan_policy: LoanPolicy {
                minimum_principal: Money::from_major(1_000),
                maximum_principal: Money::from_major(50_000_000),
                maximum_tenure_months: 60,
                maximum_annual_rate: Rate::from_percentage(100),
                admin_fee_rate: Rate::ZERO,
                require_admin_fee_before_disbursement: true,
            },
            gateway: GatewayConfig {
                default_gateway: GatewayName::Paystack,
                callback_url: "http://localhost:8000/payments/callback".to_string(),
                timeout_ms: 10_000,
            },
            savings: SavingsConfig { year_basis: 365 },
        }
    }
}

impl CoreConfig {
    /// production-like preset: admin fee charged up front, short gateway timeout
    pub fn strict() -> Self {
        let mut config = Self::default();
        config.loan_policy.admin_fee_rate = Rate::from_decimal(dec!(0.01));
        config.loan_policy.maximum_tenure_months = 24;
        config.gateway.timeout_ms = 5_000;
        config
    }

    /// parse from json and validate
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CoreConfig =
            serde_json::from_str(json).map_err(|e| LendingError::InvalidConfiguration {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway.timeout_ms)
    }

    /// reject incoherent settings
    pub fn validate(&self) -> Result<()> {
        let policy = &self.loan_policy;

        if !policy.minimum_principal.is_positive() {
            return Err(LendingError::InvalidConfiguration {
                message: "minimum principal must be positive".to_string(),
            });
        }
        if policy.minimum_principal > policy.maximum_principal {
            return Err(LendingError::InvalidConfiguration {
                message: format!(
                    "minimum principal {} exceeds maximum {}",
                    policy.minimum_principal, policy.maximum_principal
                ),
            });
        }
        if policy.maximum_tenure_months == 0 {
            return Err(LendingError::InvalidConfiguration {
                message: "maximum tenure must be at least one month".to_string(),
            });
        }
        if policy.admin_fee_rate.is_negative() || policy.admin_fee_rate > Rate::ONE {
            return Err(LendingError::InvalidConfiguration {
                message: format!("admin fee rate {} out of range", policy.admin_fee_rate),
            });
        }
        if self.gateway.timeout_ms == 0 {
            return Err(LendingError::InvalidConfiguration {
                message: "gateway timeout must be non-zero".to_string(),
            });
        }
        if self.savings.year_basis == 0 {
            return Err(LendingError::InvalidConfiguration {
                message: "savings year basis must be non-zero".to_string(),
            });
        }

        Ok(())
    }
}
