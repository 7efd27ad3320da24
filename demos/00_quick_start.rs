/// quick start - fund a wallet through the sandbox gateway and print it
use std::sync::Arc;

use lending_ledger_rs::{
    logging, CoreConfig, GatewayName, Money, PaymentPurpose, Platform, SafeTimeProvider,
    SandboxGateway, TimeSource, Uuid,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    let platform = Platform::new(CoreConfig::default(), SafeTimeProvider::new(TimeSource::System))?
        .with_gateway(Arc::new(SandboxGateway::new(GatewayName::Paystack)));

    let user = Uuid::new_v4();

    // open checkout, then confirm the way a callback would
    let init = platform
        .initialize_payment(PaymentPurpose::WalletFunding, Money::from_major(5_000), user, None)
        .await?;
    println!("checkout at {}", init.redirect_url);

    let outcome = platform.verify_payment(&init.reference, None).await?;
    println!("{} -> {:?}", outcome.reference, outcome.status);

    let wallet = platform.get_or_create_wallet(user).await?;
    println!("{}", platform.wallet_view(&wallet.id, 5).await?.to_json_pretty());

    Ok(())
}
