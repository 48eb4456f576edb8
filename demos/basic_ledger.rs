//! Basic ledger usage example

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use ledger_core::patterns::{self, JournalHeader};
use ledger_core::{chart, EntityRef, Ledger, LedgerStorage, MemoryStorage, Settings};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("🧾 Ledger Core - Basic Ledger Example\n");

    let settings = Settings::new()?;
    let ledger = Ledger::with_settings(MemoryStorage::new(), &settings);
    let tenant_id = ledger.require_tenant(&Some("acme-trading".to_string()))?;

    // 1. Install the shared chart
    println!("📊 Setting up the system chart...");
    let mut scope = ledger.begin_scope().await?;
    let system = ledger.setup_system_chart(&mut scope).await?;
    scope.commit().await?;
    for account in &system {
        println!("  ✓ {:<8} {}", account.code, account.path_name);
    }
    println!();

    // 2. Register a customer and a bank with opening balances
    println!("👥 Opening entities...");
    let customer = EntityRef::customer("1");
    let bank = EntityRef::bank("1");
    let customer_code = ledger.next_code(&tenant_id, "customers").await?;
    let bank_code = ledger.next_code(&tenant_id, "banks").await?;

    let mut scope = ledger.begin_scope().await?;
    let customer_accounts = ledger
        .open_entity(&mut scope, &tenant_id, &customer, &customer_code, "Blue Kite Stores", BigDecimal::from(2500))
        .await?;
    let bank_accounts = ledger
        .open_entity(&mut scope, &tenant_id, &bank, &bank_code, "City Bank Current", BigDecimal::from(10000))
        .await?;
    scope.commit().await?;
    println!("  ✓ {} -> {}", customer, customer_accounts.regular.path);
    println!("  ✓ {} -> {}", bank, bank_accounts.regular.path);
    println!();

    // 3. A sale followed by a receipt, each in its own scope
    println!("💰 Posting journals...");
    let sales = ledger
        .storage()
        .list_accounts(&tenant_id, None)
        .await?
        .into_iter()
        .find(|a| a.code == chart::SALES)
        .ok_or("sales account missing")?;
    let invoice_date = NaiveDate::from_ymd_opt(2024, 2, 1).ok_or("invalid date")?;
    let receipt_date = NaiveDate::from_ymd_opt(2024, 2, 20).ok_or("invalid date")?;

    let sale = patterns::sale(
        JournalHeader::new(ledger.next_code(&tenant_id, "journals").await?, invoice_date, "Invoice for 40 kites"),
        &customer_accounts.regular.id,
        &sales.id,
        BigDecimal::from(4000),
    )?;
    let receipt = patterns::receipt(
        JournalHeader::new(ledger.next_code(&tenant_id, "journals").await?, receipt_date, "Part payment"),
        &bank_accounts.regular.id,
        &customer_accounts.regular.id,
        BigDecimal::from(3000),
    )?;

    for journal in [sale, receipt] {
        let mut scope = ledger.begin_scope().await?;
        let posted = ledger.post_journal(&mut scope, &tenant_id, journal).await?;
        scope.commit().await?;
        println!(
            "  ✓ {} {} ({} lines, {} each side)",
            posted.reference,
            posted.description,
            posted.details.len(),
            posted.total_debits()
        );
    }
    println!();

    // 4. Balances
    println!("📈 Balances:");
    println!(
        "  Customer opening balance: {}",
        ledger.entity_balance(&tenant_id, &customer).await?
    );
    println!(
        "  Bank current balance:     {}",
        ledger.entity_balance(&tenant_id, &bank).await?
    );
    for node in ledger.account_forest(&tenant_id).await? {
        println!("  {:<12} {:>10}", node.account.name, node.account.amount());
    }
    println!();

    // 5. Integrity
    let report = ledger.validate_integrity(&tenant_id).await?;
    println!(
        "🔍 Integrity: {} ({} accounts, {} journals checked)",
        if report.is_valid { "valid" } else { "INVALID" },
        report.accounts_checked,
        report.journals_checked
    );
    for issue in &report.issues {
        println!("  ⚠ {}", issue);
    }

    Ok(())
}
