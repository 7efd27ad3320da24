/// loan lifecycle - apply, approve, disburse and repay on a controlled clock
use chrono::{Duration, TimeZone, Utc};
use lending_ledger_rs::{logging, CoreConfig, Money, Platform, Rate, SafeTimeProvider, TimeSource, Uuid};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    println!("=== loan lifecycle ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    let platform = Platform::new(CoreConfig::default(), time)?;
    let controller = platform.time().test_control().unwrap();

    let borrower = Uuid::new_v4();
    let officer = Uuid::new_v4();

    // 1,000,000 at 15% over a year
    let loan = platform.apply_for_loan(
        borrower,
        Money::from_major(1_000_000),
        Rate::from_percentage(15),
        12,
        Some("equipment".to_string()),
    )?;
    platform.approve_loan(&loan.id, officer).await?;
    platform.disburse_loan(&loan.id, officer).await?;

    let summary = platform.loan_summary(&loan.id).await?;
    println!("emi:            {}", summary.emi);
    println!("total payable:  {}", summary.total_payable);
    println!("total interest: {}", summary.total_interest);

    // pay three installments on time
    for month in 1..=3 {
        controller.advance(Duration::days(30));
        let reference = format!("LRP-DEMO-{}", month);
        let paid = platform.apply_repayment(&loan.id, None, summary.emi, &reference).await?;
        println!("installment {} paid on {}", paid.installment_number, platform.now().format("%Y-%m-%d"));
    }

    // then fall behind
    controller.advance(Duration::days(75));
    let overdue = platform.refresh_overdue(&loan.id).await?;
    println!("\n{} installments overdue on {}", overdue.len(), platform.now().format("%Y-%m-%d"));

    let summary = platform.loan_summary(&loan.id).await?;
    println!("remaining balance: {}", summary.remaining_balance);
    if let (Some(due), Some(amount)) = (summary.next_due_date, summary.next_due_amount) {
        println!("next due: {} on {}", amount, due.format("%Y-%m-%d"));
    }

    Ok(())
}
