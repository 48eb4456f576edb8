//! Integration tests for ledger-core

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use ledger_core::{
    chart,
    patterns::{self, JournalHeader},
    Account, AccountKind, AccountPatch, EntityRef, JournalBuilder, Ledger, LedgerError,
    LedgerStorage, MemoryStorage, NewAccount, ShadowSide,
};
use std::collections::HashSet;

const T1: &str = "tenant-1";

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

async fn seeded_ledger() -> Ledger<MemoryStorage> {
    let ledger = Ledger::new(MemoryStorage::new());
    let mut scope = ledger.begin_scope().await.unwrap();
    ledger.setup_system_chart(&mut scope).await.unwrap();
    scope.commit().await.unwrap();
    ledger
}

async fn system_account(ledger: &Ledger<MemoryStorage>, code: &str) -> Account {
    ledger
        .storage()
        .list_accounts(T1, None)
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.system_generated && a.code == code)
        .unwrap()
}

async fn account(ledger: &Ledger<MemoryStorage>, id: &str) -> Account {
    ledger.get_account(T1, id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_complete_trading_workflow() {
    let ledger = seeded_ledger().await;
    let sales = system_account(&ledger, chart::SALES).await;
    let cost_of_sales = system_account(&ledger, chart::COST_OF_SALES).await;

    let customer = EntityRef::customer("c-1");
    let vendor = EntityRef::vendor("v-1");
    let bank = EntityRef::bank("b-1");

    // Opening balances for three entities, each with codes from the sequence
    let mut scope = ledger.begin_scope().await.unwrap();
    let customer_code = ledger.next_code(T1, "customers").await.unwrap();
    let vendor_code = ledger.next_code(T1, "vendors").await.unwrap();
    let bank_code = ledger.next_code(T1, "banks").await.unwrap();
    let customer_accounts = ledger
        .open_entity(&mut scope, T1, &customer, &customer_code, "Acme Retail", BigDecimal::from(1000))
        .await
        .unwrap();
    let vendor_accounts = ledger
        .open_entity(&mut scope, T1, &vendor, &vendor_code, "Paper Mill", BigDecimal::from(0))
        .await
        .unwrap();
    let bank_accounts = ledger
        .open_entity(&mut scope, T1, &bank, &bank_code, "Main Bank", BigDecimal::from(5000))
        .await
        .unwrap();
    scope.commit().await.unwrap();
    assert_eq!(customer_accounts.regular.code, "CUS-1-dr");

    // One business operation per scope
    let operations = vec![
        patterns::sale(
            JournalHeader::new("SAL-1", date(3), "Invoice 1"),
            &customer_accounts.regular.id,
            &sales.id,
            BigDecimal::from(400),
        ),
        patterns::purchase(
            JournalHeader::new("PUR-1", date(4), "Bill 1"),
            &cost_of_sales.id,
            &vendor_accounts.regular.id,
            BigDecimal::from(300),
        ),
        patterns::receipt(
            JournalHeader::new("REC-1", date(5), "Receipt 1"),
            &bank_accounts.regular.id,
            &customer_accounts.regular.id,
            BigDecimal::from(900),
        ),
        patterns::payment(
            JournalHeader::new("PAY-1", date(6), "Payment 1"),
            &vendor_accounts.regular.id,
            &bank_accounts.regular.id,
            BigDecimal::from(100),
        ),
    ];
    for journal in operations {
        let mut scope = ledger.begin_scope().await.unwrap();
        ledger
            .post_journal(&mut scope, T1, journal.unwrap())
            .await
            .unwrap();
        scope.commit().await.unwrap();
    }

    assert_eq!(
        ledger.entity_balance(T1, &customer).await.unwrap(),
        BigDecimal::from(500)
    );
    assert_eq!(
        ledger.entity_balance(T1, &vendor).await.unwrap(),
        BigDecimal::from(-200)
    );
    assert_eq!(
        ledger.entity_balance(T1, &bank).await.unwrap(),
        BigDecimal::from(5800)
    );

    let receivables = system_account(&ledger, chart::TRADE_RECEIVABLES).await;
    assert_eq!(receivables.amount(), BigDecimal::from(500));
    let reserves = system_account(&ledger, chart::GENERAL_RESERVES_CODE).await;
    assert_eq!(reserves.amount(), BigDecimal::from(-6000));

    let journals = ledger.list_journals(T1, Some(date(4)), Some(date(5))).await.unwrap();
    let references: Vec<&str> = journals.iter().map(|j| j.reference.as_str()).collect();
    assert_eq!(references, vec!["PUR-1", "REC-1"]);

    let report = ledger.validate_integrity(T1).await.unwrap();
    assert!(report.is_valid, "{:?}", report.issues);
    assert_eq!(report.journals_checked, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_next_code_is_unique() {
    let ledger = Ledger::new(MemoryStorage::new());

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.next_code(T1, "inventory").await })
        })
        .collect();

    let mut values = HashSet::new();
    for handle in handles {
        let code = handle.await.unwrap().unwrap();
        let n: i64 = code.trim_start_matches("INV-").parse().unwrap();
        values.insert(n);
    }

    assert_eq!(values.len(), 100);
    assert_eq!(values.iter().min(), Some(&1));
    assert_eq!(values.iter().max(), Some(&100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_postings_lose_no_updates() {
    let ledger = seeded_ledger().await;
    let sales = system_account(&ledger, chart::SALES).await;
    let bank = system_account(&ledger, chart::CASH_AT_BANK).await;

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let ledger = ledger.clone();
            let bank_id = bank.id.clone();
            let sales_id = sales.id.clone();
            tokio::spawn(async move {
                let journal = patterns::sale(
                    JournalHeader::new(format!("SAL-{}", i), date(10), "Cash sale"),
                    &bank_id,
                    &sales_id,
                    BigDecimal::from(10),
                )?;
                let mut scope = ledger.begin_scope().await?;
                ledger.post_journal(&mut scope, T1, journal).await?;
                scope.commit().await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(
        system_account(&ledger, chart::CASH_AT_BANK).await.debit_amount,
        BigDecimal::from(200)
    );
    assert_eq!(
        system_account(&ledger, chart::ASSETS).await.amount(),
        BigDecimal::from(200)
    );
    assert_eq!(
        system_account(&ledger, chart::INCOME).await.amount(),
        BigDecimal::from(-200)
    );
}

#[tokio::test]
async fn test_failed_operation_rolls_back_every_write() {
    let ledger = seeded_ledger().await;
    let sales = system_account(&ledger, chart::SALES).await;
    let customer = EntityRef::customer("c-9");

    let mut scope = ledger.begin_scope().await.unwrap();
    let shadows = ledger
        .open_entity(&mut scope, T1, &customer, "CUS-9", "Walk-in", BigDecimal::from(50))
        .await
        .unwrap();
    let sale = patterns::sale(
        JournalHeader::new("SAL-9", date(2), "Invoice"),
        &shadows.regular.id,
        &sales.id,
        BigDecimal::from(25),
    )
    .unwrap();
    ledger.post_journal(&mut scope, T1, sale).await.unwrap();

    let broken = JournalBuilder::new("SAL-10", date(2), "Broken")
        .debit(shadows.regular.id.as_str(), BigDecimal::from(5), None)
        .credit(sales.id.as_str(), BigDecimal::from(3), None)
        .credit("no-such-account", BigDecimal::from(2), None)
        .build()
        .unwrap();
    let result = ledger.post_journal(&mut scope, T1, broken).await;
    assert!(matches!(result, Err(LedgerError::AccountNotFound(_))));
    drop(scope);

    assert!(ledger
        .get_account(T1, &shadows.regular.id)
        .await
        .unwrap()
        .is_none());
    assert!(matches!(
        ledger.entity_balance(T1, &customer).await,
        Err(LedgerError::EntityNotFound(_))
    ));
    assert!(ledger.list_journals(T1, None, None).await.unwrap().is_empty());
    assert_eq!(
        system_account(&ledger, chart::TRADE_RECEIVABLES).await.amount(),
        BigDecimal::from(0)
    );
    // Shadows staged by the aborted scope never reach the cache
    assert!(ledger.cache().is_empty().unwrap());
}

#[tokio::test]
async fn test_crediting_customer_account_moves_opening_balance() {
    let ledger = seeded_ledger().await;
    let bank = system_account(&ledger, chart::CASH_AT_BANK).await;
    let customer = EntityRef::customer("c-2");

    let mut scope = ledger.begin_scope().await.unwrap();
    let shadows = ledger
        .open_entity(&mut scope, T1, &customer, "CUS-2", "Corner Shop", BigDecimal::from(120))
        .await
        .unwrap();
    scope.commit().await.unwrap();

    let delta = BigDecimal::from(45);
    let mut scope = ledger.begin_scope().await.unwrap();
    let receipt = patterns::receipt(
        JournalHeader::new("REC-2", date(8), "Settlement"),
        &bank.id,
        &shadows.regular.id,
        delta.clone(),
    )
    .unwrap();
    ledger.post_journal(&mut scope, T1, receipt).await.unwrap();
    scope.commit().await.unwrap();

    let balance = ledger.entity_balance(T1, &customer).await.unwrap();
    assert_eq!(balance, BigDecimal::from(120) - &delta);
    assert_eq!(
        account(&ledger, &shadows.regular.id).await.amount(),
        balance
    );
}

#[tokio::test]
async fn test_receivables_take_postings_only_through_customers() {
    let ledger = seeded_ledger().await;
    let sales = system_account(&ledger, chart::SALES).await;
    let receivables = system_account(&ledger, chart::TRADE_RECEIVABLES).await;
    let customer = EntityRef::customer("c-3");

    let mut scope = ledger.begin_scope().await.unwrap();
    let shadows = ledger
        .open_entity(&mut scope, T1, &customer, "CUS-3", "Market Stall", BigDecimal::from(0))
        .await
        .unwrap();
    scope.commit().await.unwrap();

    let mut scope = ledger.begin_scope().await.unwrap();
    let direct = patterns::sale(
        JournalHeader::new("SAL-1", date(4), "Unassigned invoice"),
        &receivables.id,
        &sales.id,
        BigDecimal::from(100),
    )
    .unwrap();
    let result = ledger.post_journal(&mut scope, T1, direct).await;
    assert!(matches!(result, Err(LedgerError::InvalidOperation(_))));
    scope.rollback().await.unwrap();

    let mut scope = ledger.begin_scope().await.unwrap();
    let sale = patterns::sale(
        JournalHeader::new("SAL-2", date(4), "Invoice"),
        &shadows.regular.id,
        &sales.id,
        BigDecimal::from(10),
    )
    .unwrap();
    ledger.post_journal(&mut scope, T1, sale).await.unwrap();
    scope.commit().await.unwrap();

    assert_eq!(
        system_account(&ledger, chart::TRADE_RECEIVABLES).await.amount(),
        BigDecimal::from(10)
    );
    let report = ledger.validate_integrity(T1).await.unwrap();
    assert!(report.is_valid, "{:?}", report.issues);
}

#[tokio::test]
async fn test_partially_posted_journal_cannot_be_committed() {
    let ledger = seeded_ledger().await;
    let sales = system_account(&ledger, chart::SALES).await;
    let bank = system_account(&ledger, chart::CASH_AT_BANK).await;

    let mut scope = ledger.begin_scope().await.unwrap();
    let broken = JournalBuilder::new("SAL-1", date(6), "Broken")
        .debit(bank.id.as_str(), BigDecimal::from(5), None)
        .credit(sales.id.as_str(), BigDecimal::from(3), None)
        .credit("no-such-account", BigDecimal::from(2), None)
        .build()
        .unwrap();
    let result = ledger.post_journal(&mut scope, T1, broken).await;
    assert!(matches!(result, Err(LedgerError::AccountNotFound(_))));
    assert!(scope.is_failed());
    assert!(matches!(
        scope.commit().await,
        Err(LedgerError::InvalidOperation(_))
    ));

    assert_eq!(
        system_account(&ledger, chart::CASH_AT_BANK).await.amount(),
        BigDecimal::from(0)
    );
    assert_eq!(
        system_account(&ledger, chart::SALES).await.amount(),
        BigDecimal::from(0)
    );
    assert!(ledger.storage().account_details(&bank.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reads_inside_an_open_scope() {
    let ledger = seeded_ledger().await;
    let bank = system_account(&ledger, chart::CASH_AT_BANK).await;
    let customer = EntityRef::customer("c-4");

    let mut scope = ledger.begin_scope().await.unwrap();
    let shadows = ledger
        .open_entity(&mut scope, T1, &customer, "CUS-4", "Kiosk", BigDecimal::from(60))
        .await
        .unwrap();
    let receipt = patterns::receipt(
        JournalHeader::new("REC-1", date(7), "Cash in"),
        &bank.id,
        &shadows.regular.id,
        BigDecimal::from(20),
    )
    .unwrap();
    ledger.post_journal(&mut scope, T1, receipt).await.unwrap();

    let pending = ledger
        .get_account_in(&mut scope, T1, &shadows.regular.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.amount(), BigDecimal::from(40));
    assert_eq!(
        ledger.entity_balance_in(&mut scope, T1, &customer).await.unwrap(),
        BigDecimal::from(40)
    );
    assert!(ledger
        .get_account_in(&mut scope, "tenant-2", &shadows.regular.id)
        .await
        .unwrap()
        .is_none());
    scope.rollback().await.unwrap();

    assert!(ledger
        .get_account(T1, &shadows.regular.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_structural_changes_invalidate_cached_shadows() {
    let ledger = seeded_ledger().await;
    let inventory = EntityRef::inventory("sku-7");

    let mut scope = ledger.begin_scope().await.unwrap();
    let shadows = ledger
        .open_entity(&mut scope, T1, &inventory, "INV-7", "Bolts", BigDecimal::from(0))
        .await
        .unwrap();
    let other = ledger
        .create_account(
            &mut scope,
            NewAccount::new(T1, "Warehouse B", AccountKind::Account, "WH-B"),
        )
        .await
        .unwrap();
    scope.commit().await.unwrap();
    assert_eq!(ledger.cache().len().unwrap(), 2);

    let mut scope = ledger.begin_scope().await.unwrap();
    let moved = ledger
        .update_account(
            &mut scope,
            T1,
            &shadows.regular.id,
            AccountPatch::default().reparent(Some(other.id.clone())),
        )
        .await
        .unwrap();
    assert!(ledger.cache().is_empty().unwrap());

    let resolved = ledger
        .resolve_shadow_account(&mut scope, T1, &inventory, ShadowSide::Regular)
        .await
        .unwrap();
    assert_eq!(resolved.path, "WH-B/INV-7-dr");
    assert_eq!(resolved, moved);
    scope.commit().await.unwrap();
    assert_eq!(ledger.cache().len().unwrap(), 1);

    let mut scope = ledger.begin_scope().await.unwrap();
    let removed = ledger
        .delete_account(&mut scope, T1, &other.id)
        .await
        .unwrap();
    assert_eq!(removed.len(), 2);
    assert!(ledger.cache().is_empty().unwrap());
    let missing = ledger
        .resolve_shadow_account(&mut scope, T1, &inventory, ShadowSide::Regular)
        .await;
    assert!(matches!(missing, Err(LedgerError::AccountNotFound(_))));
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let ledger = seeded_ledger().await;
    let assets = system_account(&ledger, chart::ASSETS).await;

    let mut scope = ledger.begin_scope().await.unwrap();
    let private = ledger
        .create_account(
            &mut scope,
            NewAccount::new(T1, "Petty Cash", AccountKind::Account, "PC"),
        )
        .await
        .unwrap();
    let foreign_update = ledger
        .update_account(
            &mut scope,
            "tenant-2",
            &private.id,
            AccountPatch::default().name("Mine now"),
        )
        .await;
    assert!(matches!(foreign_update, Err(LedgerError::AccountNotFound(_))));

    // System nodes are shared, never owned
    let system_delete = ledger.delete_account(&mut scope, T1, &assets.id).await;
    assert!(matches!(system_delete, Err(LedgerError::AccountNotFound(_))));
    scope.commit().await.unwrap();

    assert!(ledger
        .get_account("tenant-2", &private.id)
        .await
        .unwrap()
        .is_none());
    let forest = ledger.account_forest("tenant-2").await.unwrap();
    assert!(forest.iter().all(|node| node.account.system_generated));
    assert_eq!(ledger.account_forest(T1).await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_journal_serializes_to_json() {
    let ledger = seeded_ledger().await;
    let bank = system_account(&ledger, chart::CASH_AT_BANK).await;
    let sales = system_account(&ledger, chart::SALES).await;

    let mut scope = ledger.begin_scope().await.unwrap();
    let journal = ledger
        .post_journal(
            &mut scope,
            T1,
            patterns::sale(
                JournalHeader::new("SAL-1", date(1), "Cash sale"),
                &bank.id,
                &sales.id,
                BigDecimal::from(12),
            )
            .unwrap(),
        )
        .await
        .unwrap();
    scope.commit().await.unwrap();

    let json = serde_json::to_value(&journal).unwrap();
    assert_eq!(json["reference"], "SAL-1");
    assert_eq!(json["details"].as_array().unwrap().len(), 2);

    let restored: ledger_core::Journal = serde_json::from_value(json).unwrap();
    assert_eq!(restored, journal);
}
