/// savings - locked plan, daily accrual and an early withdrawal penalty
use chrono::{Duration, TimeZone, Utc};
use lending_ledger_rs::{
    logging, CoreConfig, Money, PlanTerms, Platform, Rate, SafeTimeProvider, TimeSource,
    TransactionCategory, TransactionSource, Uuid,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    println!("=== savings ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
    let platform = Platform::new(CoreConfig::default(), time)?;
    let controller = platform.time().test_control().unwrap();

    let user = Uuid::new_v4();
    let wallet = platform.get_or_create_wallet(user).await?;
    platform
        .credit(
            &wallet.id,
            Money::from_major(50_000),
            "opening balance",
            TransactionCategory::Funding,
            TransactionSource::Admin,
            None,
        )
        .await?;

    let plan = platform.create_savings_plan(PlanTerms {
        name: "90 day target".to_string(),
        interest_rate: Rate::from_percentage(12),
        minimum_deposit: Money::from_major(5_000),
        maximum_deposit: None,
        lock_period_days: 90,
        early_withdrawal_penalty: Rate::from_percentage(5),
    })?;

    let saving = platform.subscribe_savings(user, &plan.id, Money::from_major(20_000)).await?;
    println!("subscribed 20,000 on {}", platform.now().format("%Y-%m-%d"));

    for days in [30, 30] {
        controller.advance(Duration::days(days));
        let view = platform.saving_view(&saving.id).await?;
        println!(
            "{}: interest {}, penalty {}, payout {}",
            platform.now().format("%Y-%m-%d"),
            view.quote.interest,
            view.quote.penalty,
            view.quote.payout
        );
    }

    // leave before maturity and pay the penalty
    let withdrawal = platform.withdraw_savings(&saving.id).await?;
    println!(
        "\nwithdrew {} (interest {}, penalty {})",
        withdrawal.amount_paid, withdrawal.interest, withdrawal.penalty
    );
    println!("wallet balance: {}", platform.get_or_create_wallet(user).await?.balance);

    Ok(())
}
