//! Main ledger facade that wires the account tree, posting engine, entity sync
//! and code sequences onto one storage backend

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

use crate::ledger::{
    AccountManager, EntityAccountCache, EntityBalanceSync, JournalManager, SequenceGenerator,
    ShadowAccounts, TransactionScope,
};
use crate::settings::Settings;
use crate::traits::*;
use crate::types::*;

/// Main ledger system that orchestrates all accounting operations
pub struct Ledger<S: LedgerStorage> {
    storage: S,
    accounts: AccountManager<S>,
    entities: EntityBalanceSync<S>,
    journals: JournalManager<S>,
    sequence: SequenceGenerator<S>,
    cache: EntityAccountCache,
}

impl<S: LedgerStorage + Clone> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            accounts: self.accounts.clone(),
            entities: self.entities.clone(),
            journals: self.journals.clone(),
            sequence: self.sequence.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<S: LedgerStorage + Clone> Ledger<S> {
    /// Create a new ledger with default settings
    pub fn new(storage: S) -> Self {
        Self::with_settings(storage, &Settings::default())
    }

    pub fn with_settings(storage: S, settings: &Settings) -> Self {
        let journal_validator: Arc<dyn JournalValidator> = if settings.posting.enforce_balance {
            Arc::new(BalancedJournalValidator)
        } else {
            Arc::new(LenientJournalValidator)
        };
        Self::with_validators(
            storage,
            settings,
            Arc::new(DefaultAccountValidator),
            journal_validator,
        )
    }

    /// Create a new ledger with custom validators
    pub fn with_validators(
        storage: S,
        settings: &Settings,
        account_validator: Arc<dyn AccountValidator>,
        journal_validator: Arc<dyn JournalValidator>,
    ) -> Self {
        let accounts = AccountManager::with_validator(storage.clone(), account_validator);
        let entities = EntityBalanceSync::new(storage.clone(), accounts.clone());
        let journals = JournalManager::with_validator(
            storage.clone(),
            accounts.clone(),
            entities.clone(),
            journal_validator,
        );

        Self {
            sequence: SequenceGenerator::new(storage.clone()),
            cache: EntityAccountCache::new(settings.cache.capacity, settings.cache.ttl_secs),
            storage,
            accounts,
            entities,
            journals,
        }
    }
}

impl<S: LedgerStorage> Ledger<S> {
    /// Open the scope one business operation runs in
    ///
    /// While a scope is open, reads that bypass it may wait for it to finish.
    /// Inside an operation, read through `get_account_in` and
    /// `entity_balance_in` instead.
    #[instrument(name = "ledger.scope.begin", skip(self), err)]
    pub async fn begin_scope(&self) -> LedgerResult<TransactionScope<S::Transaction>> {
        let tx = self.storage.begin().await?;
        Ok(TransactionScope::new(tx, self.cache.clone()))
    }

    /// Tenant of the current request, which every mutation needs
    pub fn require_tenant(&self, context: &dyn TenantContext) -> LedgerResult<String> {
        context.current_tenant_id().ok_or_else(|| {
            LedgerError::InvalidOperation("No tenant in the current context".to_string())
        })
    }

    pub fn accounts(&self) -> &AccountManager<S> {
        &self.accounts
    }

    pub fn journals(&self) -> &JournalManager<S> {
        &self.journals
    }

    pub fn entities(&self) -> &EntityBalanceSync<S> {
        &self.entities
    }

    pub fn sequence(&self) -> &SequenceGenerator<S> {
        &self.sequence
    }

    pub fn cache(&self) -> &EntityAccountCache {
        &self.cache
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    // Account operations
    /// Install the shared system chart, a no-op once it exists
    pub async fn setup_system_chart(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
    ) -> LedgerResult<Vec<Account>> {
        self.accounts.seed_system_chart(scope).await
    }

    pub async fn create_account(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        new_account: NewAccount,
    ) -> LedgerResult<Account> {
        self.accounts.create(scope, new_account).await
    }

    pub async fn update_account(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        account_id: &str,
        patch: AccountPatch,
    ) -> LedgerResult<Account> {
        self.accounts.update(scope, tenant_id, account_id, patch).await
    }

    /// Delete an account and its subtree, returning the removed ids
    pub async fn delete_account(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        account_id: &str,
    ) -> LedgerResult<Vec<String>> {
        self.accounts.delete(scope, tenant_id, account_id).await
    }

    pub async fn get_account(
        &self,
        tenant_id: &str,
        account_id: &str,
    ) -> LedgerResult<Option<Account>> {
        self.accounts.find(tenant_id, account_id).await
    }

    /// Read an account through an open scope
    pub async fn get_account_in(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        account_id: &str,
    ) -> LedgerResult<Option<Account>> {
        self.accounts.find_in(scope, tenant_id, account_id).await
    }

    pub async fn list_accounts_by_type(
        &self,
        tenant_id: &str,
        kind: AccountKind,
    ) -> LedgerResult<Vec<Account>> {
        self.accounts.find_by_type(tenant_id, kind).await
    }

    pub async fn account_forest(&self, tenant_id: &str) -> LedgerResult<Vec<AccountNode>> {
        self.accounts.find_all(tenant_id).await
    }

    pub async fn account_tree(&self, tenant_id: &str, account_id: &str) -> LedgerResult<AccountNode> {
        self.accounts.find_trees(tenant_id, account_id).await
    }

    // Journal operations
    /// Post a journal in the given scope
    pub async fn post_journal(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        journal: NewJournal,
    ) -> LedgerResult<Journal> {
        self.journals.post(scope, tenant_id, journal).await
    }

    pub async fn void_journal(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        journal_id: &str,
    ) -> LedgerResult<Journal> {
        self.journals.void(scope, tenant_id, journal_id).await
    }

    pub async fn get_journal(&self, tenant_id: &str, journal_id: &str) -> LedgerResult<Option<Journal>> {
        self.journals.find(tenant_id, journal_id).await
    }

    pub async fn list_journals(
        &self,
        tenant_id: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Journal>> {
        self.journals.list(tenant_id, start_date, end_date).await
    }

    // Entity operations
    pub async fn open_entity(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        entity: &EntityRef,
        code: &str,
        name: &str,
        opening_balance: BigDecimal,
    ) -> LedgerResult<ShadowAccounts> {
        self.entities
            .open_entity(scope, tenant_id, entity, code, name, opening_balance)
            .await
    }

    pub async fn resolve_shadow_account(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        entity: &EntityRef,
        side: ShadowSide,
    ) -> LedgerResult<Account> {
        self.entities
            .resolve_shadow_account(scope, tenant_id, entity, side)
            .await
    }

    pub async fn entity_balance(&self, tenant_id: &str, entity: &EntityRef) -> LedgerResult<BigDecimal> {
        self.entities.entity_balance(tenant_id, entity).await
    }

    /// Read an entity's balance column through an open scope
    pub async fn entity_balance_in(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        entity: &EntityRef,
    ) -> LedgerResult<BigDecimal> {
        self.entities.entity_balance_in(scope, tenant_id, entity).await
    }

    /// Next human-readable code for a tenant's table
    pub async fn next_code(&self, tenant_id: &str, table_name: &str) -> LedgerResult<String> {
        self.sequence.next_code(tenant_id, table_name).await
    }

    /// Check the stored tree and journals of a tenant against the ledger rules
    ///
    /// Every node with children must carry the sums of its children, every
    /// path must extend its parent's path and every live journal must balance.
    #[instrument(name = "ledger.integrity.validate", skip(self), err)]
    pub async fn validate_integrity(&self, tenant_id: &str) -> LedgerResult<LedgerIntegrityReport> {
        let accounts = self.storage.list_accounts(tenant_id, None).await?;
        let mut issues = Vec::new();

        for account in &accounts {
            let children = self.storage.child_accounts(&account.id).await?;
            if !children.is_empty() {
                let debit: BigDecimal = children.iter().map(|c| &c.debit_amount).sum();
                let credit: BigDecimal = children.iter().map(|c| &c.credit_amount).sum();
                if debit != account.debit_amount || credit != account.credit_amount {
                    issues.push(format!(
                        "Account '{}' totals {}/{} differ from its children {}/{}",
                        account.path, account.debit_amount, account.credit_amount, debit, credit
                    ));
                }
            }

            if let Some(parent_id) = &account.parent_id {
                match self.storage.get_account(parent_id).await? {
                    Some(parent) => {
                        let expected = format!("{}/{}", parent.path, account.code);
                        if account.path != expected {
                            issues.push(format!(
                                "Account '{}' path should be '{}'",
                                account.path, expected
                            ));
                        }
                    }
                    None => issues.push(format!(
                        "Account '{}' references missing parent '{}'",
                        account.path, parent_id
                    )),
                }
            }
        }

        let journals = self.journals.list(tenant_id, None, None).await?;
        for journal in &journals {
            if !journal.is_balanced() {
                issues.push(format!(
                    "Journal '{}' is not balanced: debits = {}, credits = {}",
                    journal.reference,
                    journal.total_debits(),
                    journal.total_credits()
                ));
            }
        }

        if !issues.is_empty() {
            tracing::warn!(issues = issues.len(), "ledger integrity issues found");
        }

        Ok(LedgerIntegrityReport {
            tenant_id: tenant_id.to_string(),
            is_valid: issues.is_empty(),
            issues,
            accounts_checked: accounts.len(),
            journals_checked: journals.len(),
        })
    }
}

/// Report on ledger integrity and validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerIntegrityReport {
    pub tenant_id: String,
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub accounts_checked: usize,
    pub journals_checked: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::account::chart;
    use crate::utils::memory_storage::MemoryStorage;

    #[test]
    fn test_require_tenant() {
        let ledger = Ledger::new(MemoryStorage::new());

        let tenant = ledger.require_tenant(&Some("t1".to_string())).unwrap();
        assert_eq!(tenant, "t1");

        let missing = ledger.require_tenant(&None::<String>);
        assert!(matches!(missing, Err(LedgerError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_settings_select_journal_validator() {
        let mut settings = Settings::default();
        settings.posting.enforce_balance = false;
        let ledger = Ledger::with_settings(MemoryStorage::new(), &settings);

        let mut scope = ledger.begin_scope().await.unwrap();
        ledger.setup_system_chart(&mut scope).await.unwrap();
        let cash = scope
            .tx()
            .find_account_by_code(None, chart::CASH_AT_BANK)
            .await
            .unwrap()
            .unwrap();
        let one_sided = NewJournal {
            reference: "ADJ-1".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            description: "Adjustment".to_string(),
            lines: vec![JournalLine::debit(cash.id, BigDecimal::from(5), None)],
        };
        ledger.post_journal(&mut scope, "t1", one_sided).await.unwrap();
        scope.commit().await.unwrap();

        let report = ledger.validate_integrity("t1").await.unwrap();
        assert!(!report.is_valid);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].contains("ADJ-1"));
    }

    #[tokio::test]
    async fn test_integrity_detects_stale_rollup() {
        let ledger = Ledger::new(MemoryStorage::new());

        let mut scope = ledger.begin_scope().await.unwrap();
        ledger.setup_system_chart(&mut scope).await.unwrap();
        scope.commit().await.unwrap();

        let report = ledger.validate_integrity("t1").await.unwrap();
        assert!(report.is_valid, "{:?}", report.issues);
        assert_eq!(report.accounts_checked, chart::SYSTEM_CHART.len());

        let mut scope = ledger.begin_scope().await.unwrap();
        let assets = scope
            .tx()
            .find_account_by_code(None, chart::ASSETS)
            .await
            .unwrap()
            .unwrap();
        scope
            .tx()
            .set_account_totals(&assets.id, &BigDecimal::from(9), &BigDecimal::from(0))
            .await
            .unwrap();
        scope.commit().await.unwrap();

        let report = ledger.validate_integrity("t1").await.unwrap();
        assert!(!report.is_valid);
        assert!(report.issues[0].starts_with("Account '1000'"));
    }
}
