/// gateway replay - duplicate callbacks, concurrent verifies and a slow provider
use std::sync::Arc;
use std::time::Duration;

use lending_ledger_rs::{
    logging, CoreConfig, GatewayName, LendingError, Money, PaymentPurpose, Platform,
    SafeTimeProvider, SandboxGateway, SandboxOutcome, TimeSource, Uuid,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    println!("=== gateway replay ===\n");

    let mut config = CoreConfig::default();
    config.gateway.timeout_ms = 200;

    let sandbox = Arc::new(SandboxGateway::new(GatewayName::Paystack));
    let platform = Platform::new(config, SafeTimeProvider::new(TimeSource::System))?.with_gateway(sandbox.clone());

    let user = Uuid::new_v4();
    let init = platform
        .initialize_payment(PaymentPurpose::WalletFunding, Money::from_major(5_000), user, None)
        .await?;

    // the browser redirect and the webhook race each other
    let (redirect, webhook) = tokio::join!(
        platform.verify_payment(&init.reference, None),
        platform.verify_payment(&init.reference, Some("4099260516")),
    );
    for outcome in [redirect?, webhook?] {
        println!("verify -> {:?} (replay: {})", outcome.status, outcome.already_terminal);
    }

    let wallet = platform.get_or_create_wallet(user).await?;
    println!("balance after two callbacks: {}", wallet.balance);
    println!("gateway queried {} time(s)\n", sandbox.verify_calls());

    // a provider that never answers leaves the payment pending
    let slow = platform
        .initialize_payment(PaymentPurpose::WalletFunding, Money::from_major(2_500), user, None)
        .await?;
    sandbox.script(&slow.reference, SandboxOutcome::Hang);
    match platform.verify_payment(&slow.reference, None).await {
        Err(LendingError::GatewayTimeout { reference }) => println!("{} timed out, still pending", reference),
        other => println!("unexpected: {:?}", other),
    }

    // once the provider recovers the retry settles it
    sandbox.script(&slow.reference, SandboxOutcome::Success);
    tokio::time::sleep(Duration::from_millis(10)).await;
    let retry = platform.verify_payment(&slow.reference, None).await?;
    println!("retry -> {:?}", retry.status);

    println!("{}", platform.payment_view(&slow.reference).await?.to_json_pretty());
    println!("final balance: {}", platform.get_or_create_wallet(user).await?.balance);

    Ok(())
}
