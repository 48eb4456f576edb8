//! In-memory storage implementation for testing and embedding

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    /// Journal headers, details live in `journal_details`
    journals: HashMap<String, Journal>,
    journal_details: Vec<JournalDetail>,
    entities: HashMap<(String, EntityRef), EntityRecord>,
}

impl MemoryState {
    fn assemble(&self, header: &Journal) -> Journal {
        let mut journal = header.clone();
        journal.details = self
            .journal_details
            .iter()
            .filter(|d| d.journal_id == header.id)
            .cloned()
            .collect();
        journal
    }

    fn account_mut(&mut self, account_id: &str) -> LedgerResult<&mut Account> {
        self.accounts
            .get_mut(account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    fn children(&self, parent_id: &str) -> Vec<Account> {
        let mut children: Vec<Account> = self
            .accounts
            .values()
            .filter(|a| a.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.code.cmp(&b.code));
        children
    }
}

/// In-memory storage implementation for testing and development
///
/// Transactions take an exclusive lock on the whole state and keep a snapshot
/// to restore on rollback, so scopes are fully serialized. Reads through
/// [`LedgerStorage`] wait for any open transaction to finish.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
    counters: Arc<StdMutex<HashMap<(String, String), CodeCounter>>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            counters: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Clear all data (useful for testing)
    pub async fn clear(&self) -> LedgerResult<()> {
        *self.state.lock().await = MemoryState::default();
        self.counters
            .lock()
            .map_err(|_| LedgerError::Unavailable("code counters lock poisoned".to_string()))?
            .clear();
        Ok(())
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> LedgerResult<MemoryTransaction> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(MemoryTransaction {
            guard,
            snapshot: Some(snapshot),
        })
    }

    async fn next_counter_value(&self, tenant_id: &str, table_name: &str) -> LedgerResult<i64> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|_| LedgerError::Unavailable("code counters lock poisoned".to_string()))?;
        let counter = counters
            .entry((tenant_id.to_string(), table_name.to_string()))
            .or_insert_with(|| CodeCounter {
                tenant_id: tenant_id.to_string(),
                table_name: table_name.to_string(),
                last_value: 0,
            });
        counter.last_value += 1;
        Ok(counter.last_value)
    }

    async fn counter_value(&self, tenant_id: &str, table_name: &str) -> LedgerResult<Option<i64>> {
        let counters = self
            .counters
            .lock()
            .map_err(|_| LedgerError::Unavailable("code counters lock poisoned".to_string()))?;
        Ok(counters
            .get(&(tenant_id.to_string(), table_name.to_string()))
            .map(|c| c.last_value))
    }

    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        Ok(self.state.lock().await.accounts.get(account_id).cloned())
    }

    async fn list_accounts(
        &self,
        tenant_id: &str,
        kind: Option<AccountKind>,
    ) -> LedgerResult<Vec<Account>> {
        let state = self.state.lock().await;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|account| account.is_visible_to(tenant_id))
            .filter(|account| kind.is_none_or(|k| account.kind == k))
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(accounts)
    }

    async fn child_accounts(&self, parent_id: &str) -> LedgerResult<Vec<Account>> {
        Ok(self.state.lock().await.children(parent_id))
    }

    async fn get_journal(&self, journal_id: &str) -> LedgerResult<Option<Journal>> {
        let state = self.state.lock().await;
        Ok(state
            .journals
            .get(journal_id)
            .map(|header| state.assemble(header)))
    }

    async fn list_journals(
        &self,
        tenant_id: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Journal>> {
        let state = self.state.lock().await;
        let mut journals: Vec<Journal> = state
            .journals
            .values()
            .filter(|journal| {
                if journal.tenant_id != tenant_id {
                    return false;
                }

                // Check date range
                if let Some(start) = start_date {
                    if journal.date < start {
                        return false;
                    }
                }
                if let Some(end) = end_date {
                    if journal.date > end {
                        return false;
                    }
                }

                true
            })
            .map(|header| state.assemble(header))
            .collect();
        journals.sort_by(|a, b| a.date.cmp(&b.date).then(a.created_at.cmp(&b.created_at)));
        Ok(journals)
    }

    async fn account_details(&self, account_id: &str) -> LedgerResult<Vec<JournalDetail>> {
        Ok(self
            .state
            .lock()
            .await
            .journal_details
            .iter()
            .filter(|d| d.nominal_account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_entity(
        &self,
        tenant_id: &str,
        entity: &EntityRef,
    ) -> LedgerResult<Option<EntityRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .entities
            .get(&(tenant_id.to_string(), entity.clone()))
            .cloned())
    }
}

/// Exclusive transaction over [`MemoryStorage`]
///
/// Holds the state lock until committed or dropped; dropping it uncommitted
/// restores the snapshot taken at `begin`.
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    snapshot: Option<MemoryState>,
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl StorageTransaction for MemoryTransaction {
    async fn insert_account(&mut self, account: &Account) -> LedgerResult<()> {
        if self.guard.accounts.contains_key(&account.id) {
            return Err(LedgerError::Conflict(format!(
                "Account with ID '{}' already exists",
                account.id
            )));
        }

        let duplicate_code = self
            .guard
            .accounts
            .values()
            .any(|a| a.tenant_id == account.tenant_id && a.code == account.code);
        if duplicate_code {
            return Err(LedgerError::Conflict(format!(
                "Account code '{}' already exists",
                account.code
            )));
        }

        self.guard
            .accounts
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get_account(&mut self, account_id: &str) -> LedgerResult<Option<Account>> {
        Ok(self.guard.accounts.get(account_id).cloned())
    }

    async fn update_account(&mut self, account: &Account) -> LedgerResult<()> {
        let stored = self.guard.account_mut(&account.id)?;
        *stored = account.clone();
        Ok(())
    }

    async fn find_account_by_code(
        &mut self,
        tenant_id: Option<&str>,
        code: &str,
    ) -> LedgerResult<Option<Account>> {
        Ok(self
            .guard
            .accounts
            .values()
            .find(|a| a.tenant_id.as_deref() == tenant_id && a.code == code)
            .cloned())
    }

    async fn child_accounts(&mut self, parent_id: &str) -> LedgerResult<Vec<Account>> {
        Ok(self.guard.children(parent_id))
    }

    async fn accounts_for_entity(
        &mut self,
        tenant_id: &str,
        entity: &EntityRef,
    ) -> LedgerResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .guard
            .accounts
            .values()
            .filter(|a| a.is_owned_by(tenant_id) && a.entity.as_ref() == Some(entity))
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(accounts)
    }

    async fn delete_accounts(&mut self, account_ids: &[String]) -> LedgerResult<()> {
        for account_id in account_ids {
            if self.guard.accounts.remove(account_id).is_none() {
                return Err(LedgerError::AccountNotFound(account_id.clone()));
            }
        }
        Ok(())
    }

    async fn increment_account(
        &mut self,
        account_id: &str,
        debit: &BigDecimal,
        credit: &BigDecimal,
    ) -> LedgerResult<Account> {
        let account = self.guard.account_mut(account_id)?;
        account.debit_amount += debit;
        account.credit_amount += credit;
        account.updated_at = chrono::Utc::now().naive_utc();
        Ok(account.clone())
    }

    async fn set_account_totals(
        &mut self,
        account_id: &str,
        debit: &BigDecimal,
        credit: &BigDecimal,
    ) -> LedgerResult<Account> {
        let account = self.guard.account_mut(account_id)?;
        account.debit_amount = debit.clone();
        account.credit_amount = credit.clone();
        account.updated_at = chrono::Utc::now().naive_utc();
        Ok(account.clone())
    }

    async fn insert_journal_detail(&mut self, detail: &JournalDetail) -> LedgerResult<()> {
        self.guard.journal_details.push(detail.clone());
        Ok(())
    }

    async fn insert_journal(&mut self, journal: &Journal) -> LedgerResult<()> {
        let duplicate = self.guard.journals.values().any(|j| {
            j.id == journal.id
                || (j.tenant_id == journal.tenant_id && j.reference == journal.reference)
        });
        if duplicate {
            return Err(LedgerError::Conflict(format!(
                "Journal reference '{}' already exists",
                journal.reference
            )));
        }

        let mut header = journal.clone();
        header.details.clear();
        self.guard.journals.insert(header.id.clone(), header);
        Ok(())
    }

    async fn get_journal(&mut self, journal_id: &str) -> LedgerResult<Option<Journal>> {
        Ok(self
            .guard
            .journals
            .get(journal_id)
            .map(|header| self.guard.assemble(header)))
    }

    async fn update_journal(&mut self, journal: &Journal) -> LedgerResult<()> {
        let stored = self
            .guard
            .journals
            .get_mut(&journal.id)
            .ok_or_else(|| LedgerError::JournalNotFound(journal.id.clone()))?;
        let mut header = journal.clone();
        header.details.clear();
        *stored = header;
        Ok(())
    }

    async fn find_journal_by_reference(
        &mut self,
        tenant_id: &str,
        reference: &str,
    ) -> LedgerResult<Option<Journal>> {
        Ok(self
            .guard
            .journals
            .values()
            .find(|j| j.tenant_id == tenant_id && j.reference == reference)
            .map(|header| self.guard.assemble(header)))
    }

    async fn insert_entity(&mut self, record: &EntityRecord) -> LedgerResult<()> {
        let key = (record.tenant_id.clone(), record.entity.clone());
        if self.guard.entities.contains_key(&key) {
            return Err(LedgerError::Conflict(format!(
                "Entity '{}' already exists",
                record.entity
            )));
        }
        self.guard.entities.insert(key, record.clone());
        Ok(())
    }

    async fn get_entity(
        &mut self,
        tenant_id: &str,
        entity: &EntityRef,
    ) -> LedgerResult<Option<EntityRecord>> {
        Ok(self
            .guard
            .entities
            .get(&(tenant_id.to_string(), entity.clone()))
            .cloned())
    }

    async fn increment_entity_balance(
        &mut self,
        tenant_id: &str,
        entity: &EntityRef,
        column: BalanceColumn,
        delta: &BigDecimal,
    ) -> LedgerResult<BigDecimal> {
        let record = self
            .guard
            .entities
            .get_mut(&(tenant_id.to_string(), entity.clone()))
            .ok_or_else(|| LedgerError::EntityNotFound(entity.to_string()))?;

        if record.column() != column {
            return Err(LedgerError::InvalidOperation(format!(
                "Entity '{}' has no '{}' column",
                entity,
                column.as_str()
            )));
        }

        record.balance += delta;
        Ok(record.balance.clone())
    }

    async fn commit(mut self) -> LedgerResult<()> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(mut self) -> LedgerResult<()> {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
        Ok(())
    }
}
