use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::decimal::Money;
use crate::errors::{LendingError, Result};
use crate::gateway::{GatewayStatus, GatewayVerification, InitializeRequest, InitializeResponse, PaymentGateway};
use crate::types::GatewayName;

/// scripted verdict for one reference
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxOutcome {
    Success,
    Failed,
    Pending,
    /// success, but for a different amount than was initialised
    Collected(Money),
    /// success, echoing someone else's reference
    WrongReference(String),
    /// provider returned an error
    Error(String),
    /// provider never answers within any sane timeout
    Hang,
}

/// in-process stand-in for a hosted checkout provider
pub struct SandboxGateway {
    name: GatewayName,
    latency: Duration,
    default_outcome: SandboxOutcome,
    fail_initialize: Option<String>,
    scripted: Mutex<HashMap<String, SandboxOutcome>>,
    initialized: Mutex<HashMap<String, Money>>,
    verify_calls: AtomicUsize,
}

impl SandboxGateway {
    pub fn new(name: GatewayName) -> Self {
        Self {
            name,
            latency: Duration::ZERO,
            default_outcome: SandboxOutcome::Success,
            fail_initialize: None,
            scripted: Mutex::new(HashMap::new()),
            initialized: Mutex::new(HashMap::new()),
            verify_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_default_outcome(mut self, outcome: SandboxOutcome) -> Self {
        self.default_outcome = outcome;
        self
    }

    /// every initialize call fails with this message
    pub fn failing_initialize(mut self, message: impl Into<String>) -> Self {
        self.fail_initialize = Some(message.into());
        self
    }

    pub fn script(&self, reference: &str, outcome: SandboxOutcome) {
        let mut scripted = self.scripted.lock().unwrap_or_else(|e| e.into_inner());
        scripted.insert(reference.to_string(), outcome);
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    fn outcome_for(&self, reference: &str) -> SandboxOutcome {
        let scripted = self.scripted.lock().unwrap_or_else(|e| e.into_inner());
        scripted
            .get(reference)
            .cloned()
            .unwrap_or_else(|| self.default_outcome.clone())
    }

    fn amount_for(&self, reference: &str) -> Option<Money> {
        let initialized = self.initialized.lock().unwrap_or_else(|e| e.into_inner());
        initialized.get(reference).copied()
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn name(&self) -> GatewayName {
        self.name
    }

    async fn initialize_transaction(&self, request: &InitializeRequest) -> Result<InitializeResponse> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(message) = &self.fail_initialize {
            return Err(LendingError::GatewayFailure {
                message: message.clone(),
            });
        }

        {
            let mut initialized = self.initialized.lock().unwrap_or_else(|e| e.into_inner());
            initialized.insert(request.reference.clone(), request.amount);
        }

        Ok(InitializeResponse {
            authorization_url: format!("https://checkout.sandbox.{}/pay/{}", self.name, request.reference),
            access_code: Some(request.reference.to_lowercase()),
        })
    }

    async fn verify_transaction(&self, reference_or_id: &str) -> Result<GatewayVerification> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);

        let outcome = self.outcome_for(reference_or_id);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let amount = self.amount_for(reference_or_id).unwrap_or(Money::ZERO);
        let (status, amount, reference) = match outcome {
            SandboxOutcome::Success => (GatewayStatus::Success, amount, reference_or_id.to_string()),
            SandboxOutcome::Failed => (GatewayStatus::Failed, amount, reference_or_id.to_string()),
            SandboxOutcome::Pending => (GatewayStatus::Pending, amount, reference_or_id.to_string()),
            SandboxOutcome::Collected(collected) => (GatewayStatus::Success, collected, reference_or_id.to_string()),
            SandboxOutcome::WrongReference(other) => (GatewayStatus::Success, amount, other),
            SandboxOutcome::Error(message) => return Err(LendingError::GatewayFailure { message }),
            SandboxOutcome::Hang => {
                std::future::pending::<()>().await;
                return Err(LendingError::GatewayTimeout {
                    reference: reference_or_id.to_string(),
                });
            }
        };

        let gateway_reference = format!("{}_{}", self.name, self.verify_calls());
        Ok(GatewayVerification {
            status,
            amount,
            raw: serde_json::json!({
                "status": status,
                "amount": amount.to_string(),
                "reference": reference,
                "id": gateway_reference,
            }),
            reference,
            gateway_reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(reference: &str) -> InitializeRequest {
        InitializeRequest {
            customer: "ada@example.com".to_string(),
            amount: Money::from_major(5_000),
            reference: reference.to_string(),
            callback_url: "http://localhost/callback".to_string(),
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_echoes_initialized_amount() {
        let gateway = SandboxGateway::new(GatewayName::Paystack);
        let response = gateway.initialize_transaction(&request("WFD-1")).await.unwrap();
        assert!(response.authorization_url.ends_with("WFD-1"));

        let verification = gateway.verify_transaction("WFD-1").await.unwrap();
        assert_eq!(verification.status, GatewayStatus::Success);
        assert_eq!(verification.amount, Money::from_major(5_000));
        assert_eq!(verification.reference, "WFD-1");
        assert_eq!(gateway.verify_calls(), 1);
    }

    #[tokio::test]
    async fn test_scripted_outcomes() {
        let gateway = SandboxGateway::new(GatewayName::Flutterwave);
        gateway.initialize_transaction(&request("A")).await.unwrap();
        gateway.script("A", SandboxOutcome::Collected(Money::from_major(10)));
        gateway.script("B", SandboxOutcome::Error("upstream 502".to_string()));

        let verification = gateway.verify_transaction("A").await.unwrap();
        assert_eq!(verification.amount, Money::from_major(10));

        let err = gateway.verify_transaction("B").await.unwrap_err();
        assert!(matches!(err, LendingError::GatewayFailure { .. }));
    }

    #[tokio::test]
    async fn test_hang_never_returns() {
        let gateway = SandboxGateway::new(GatewayName::Paystack);
        gateway.script("H", SandboxOutcome::Hang);

        let result = tokio::time::timeout(Duration::from_millis(20), gateway.verify_transaction("H")).await;
        assert!(result.is_err());
    }
}
