//! Payment gateway seam.
//!
//! The core only consumes status, amount and reference from a gateway; the
//! rest of the provider response is kept verbatim for audit.

pub mod reconciliation;
pub mod sandbox;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::Result;
use crate::types::GatewayName;

pub use reconciliation::{PaymentInit, Reconciler, VerifyOutcome};
pub use sandbox::{SandboxGateway, SandboxOutcome};

/// outbound request to start a hosted checkout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeRequest {
    /// payer identifier forwarded to the provider (email in production)
    pub customer: String,
    pub amount: Money,
    pub reference: String,
    pub callback_url: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub authorization_url: String,
    pub access_code: Option<String>,
}

/// provider verdict on a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Success,
    Failed,
    /// customer has not completed checkout yet
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayVerification {
    pub status: GatewayStatus,
    /// amount the provider actually collected
    pub amount: Money,
    /// our reference, echoed back
    pub reference: String,
    pub gateway_reference: String,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> GatewayName;

    async fn initialize_transaction(&self, request: &InitializeRequest) -> Result<InitializeResponse>;

    /// look a transaction up by our reference or by the provider's own id
    async fn verify_transaction(&self, reference_or_id: &str) -> Result<GatewayVerification>;
}
