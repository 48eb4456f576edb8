//! Traits for storage abstraction and extensibility

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;

use crate::types::*;
use crate::utils::validation::*;

/// Storage abstraction for the ledger system
///
/// This trait allows the ledger to work with any storage backend by implementing
/// these methods. Every mutation goes through a [`StorageTransaction`] obtained
/// from [`LedgerStorage::begin`]; the methods here are plain reads plus the code
/// counters, which live outside any transaction.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    type Transaction: StorageTransaction;

    /// Open an atomic unit of work
    async fn begin(&self) -> LedgerResult<Self::Transaction>;

    /// Upsert the `(tenant_id, table_name)` counter at zero and increment it in
    /// one indivisible step, returning the new value
    async fn next_counter_value(&self, tenant_id: &str, table_name: &str) -> LedgerResult<i64>;

    /// Last value handed out for a counter, if it exists
    async fn counter_value(&self, tenant_id: &str, table_name: &str) -> LedgerResult<Option<i64>>;

    /// Get an account by ID
    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>>;

    /// List the accounts a tenant can see (its own plus system accounts)
    async fn list_accounts(
        &self,
        tenant_id: &str,
        kind: Option<AccountKind>,
    ) -> LedgerResult<Vec<Account>>;

    /// Immediate children of an account across all tenants
    async fn child_accounts(&self, parent_id: &str) -> LedgerResult<Vec<Account>>;

    /// Get a journal with its details
    async fn get_journal(&self, journal_id: &str) -> LedgerResult<Option<Journal>>;

    /// List a tenant's journals within a date range
    async fn list_journals(
        &self,
        tenant_id: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Journal>>;

    /// Posted lines touching an account
    async fn account_details(&self, account_id: &str) -> LedgerResult<Vec<JournalDetail>>;

    /// Get an entity row
    async fn get_entity(
        &self,
        tenant_id: &str,
        entity: &EntityRef,
    ) -> LedgerResult<Option<EntityRecord>>;
}

/// One atomic unit of work against the storage backend
///
/// Either `commit` persists every write made through the transaction or none of
/// them survive. Dropping a transaction without committing must roll it back.
#[async_trait]
pub trait StorageTransaction: Send {
    async fn insert_account(&mut self, account: &Account) -> LedgerResult<()>;

    async fn get_account(&mut self, account_id: &str) -> LedgerResult<Option<Account>>;

    /// Overwrite the structural fields of an account
    async fn update_account(&mut self, account: &Account) -> LedgerResult<()>;

    async fn find_account_by_code(
        &mut self,
        tenant_id: Option<&str>,
        code: &str,
    ) -> LedgerResult<Option<Account>>;

    async fn child_accounts(&mut self, parent_id: &str) -> LedgerResult<Vec<Account>>;

    /// Accounts of a tenant linked to an external entity
    async fn accounts_for_entity(
        &mut self,
        tenant_id: &str,
        entity: &EntityRef,
    ) -> LedgerResult<Vec<Account>>;

    /// Remove a batch of accounts
    async fn delete_accounts(&mut self, account_ids: &[String]) -> LedgerResult<()>;

    /// Atomically add to an account's running totals, returning the updated row
    async fn increment_account(
        &mut self,
        account_id: &str,
        debit: &BigDecimal,
        credit: &BigDecimal,
    ) -> LedgerResult<Account>;

    /// Overwrite an account's running totals, returning the updated row
    async fn set_account_totals(
        &mut self,
        account_id: &str,
        debit: &BigDecimal,
        credit: &BigDecimal,
    ) -> LedgerResult<Account>;

    async fn insert_journal_detail(&mut self, detail: &JournalDetail) -> LedgerResult<()>;

    /// Persist a journal header
    async fn insert_journal(&mut self, journal: &Journal) -> LedgerResult<()>;

    async fn get_journal(&mut self, journal_id: &str) -> LedgerResult<Option<Journal>>;

    async fn update_journal(&mut self, journal: &Journal) -> LedgerResult<()>;

    async fn find_journal_by_reference(
        &mut self,
        tenant_id: &str,
        reference: &str,
    ) -> LedgerResult<Option<Journal>>;

    async fn insert_entity(&mut self, record: &EntityRecord) -> LedgerResult<()>;

    async fn get_entity(
        &mut self,
        tenant_id: &str,
        entity: &EntityRef,
    ) -> LedgerResult<Option<EntityRecord>>;

    /// Atomically add `delta` to the entity's balance column, returning the new balance
    async fn increment_entity_balance(
        &mut self,
        tenant_id: &str,
        entity: &EntityRef,
        column: BalanceColumn,
        delta: &BigDecimal,
    ) -> LedgerResult<BigDecimal>;

    async fn commit(self) -> LedgerResult<()>;

    async fn rollback(self) -> LedgerResult<()>;
}

/// Supplies the tenant of the current request
pub trait TenantContext: Send + Sync {
    fn current_tenant_id(&self) -> Option<String>;
}

impl TenantContext for Option<String> {
    fn current_tenant_id(&self) -> Option<String> {
        self.clone()
    }
}

/// Trait for implementing custom account validation rules
pub trait AccountValidator: Send + Sync {
    /// Validate an account before it is created
    fn validate_account(&self, account: &NewAccount) -> LedgerResult<()>;

    /// Validate a patch before it is applied
    fn validate_patch(&self, patch: &AccountPatch) -> LedgerResult<()>;
}

/// Trait for implementing custom journal validation rules
pub trait JournalValidator: Send + Sync {
    /// Validate a journal before any of its lines are posted
    fn validate_journal(&self, journal: &NewJournal) -> LedgerResult<()>;
}

/// Default account validator with basic rules
pub struct DefaultAccountValidator;

impl AccountValidator for DefaultAccountValidator {
    fn validate_account(&self, account: &NewAccount) -> LedgerResult<()> {
        validate_account_code(&account.code)?;
        validate_account_name(&account.name)?;

        if let Some(debit) = &account.opening_debit {
            validate_non_negative_amount(debit)?;
        }
        if let Some(credit) = &account.opening_credit {
            validate_non_negative_amount(credit)?;
        }

        if account.system_generated != account.tenant_id.is_none() {
            return Err(LedgerError::Validation(
                "System accounts must not belong to a tenant".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_patch(&self, patch: &AccountPatch) -> LedgerResult<()> {
        if let Some(name) = &patch.name {
            validate_account_name(name)?;
        }
        if let Some(debit) = &patch.debit_amount {
            validate_non_negative_amount(debit)?;
        }
        if let Some(credit) = &patch.credit_amount {
            validate_non_negative_amount(credit)?;
        }
        Ok(())
    }
}

/// Default journal validator: debits must equal credits
pub struct BalancedJournalValidator;

impl JournalValidator for BalancedJournalValidator {
    fn validate_journal(&self, journal: &NewJournal) -> LedgerResult<()> {
        validate_reference(&journal.reference)?;
        journal.validate_lines()?;

        if !journal.is_balanced() {
            return Err(LedgerError::Validation(format!(
                "Journal is not balanced: debits = {}, credits = {}",
                journal.total_debits(),
                journal.total_credits()
            )));
        }

        Ok(())
    }
}

/// Accepts unbalanced journals, leaving balance to the caller
pub struct LenientJournalValidator;

impl JournalValidator for LenientJournalValidator {
    fn validate_journal(&self, journal: &NewJournal) -> LedgerResult<()> {
        validate_reference(&journal.reference)?;
        journal.validate_lines()
    }
}
