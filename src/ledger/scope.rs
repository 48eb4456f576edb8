//! Transaction scope shared by every mutation of one business operation

use tracing::instrument;

use crate::ledger::entity::EntityAccountCache;
use crate::traits::*;
use crate::types::*;

/// One atomic business operation (sale, purchase, receipt, payment, production
/// run or direct journal).
///
/// All account, journal and entity writes of the operation run against the same
/// scope. `commit` persists them together; `rollback`, or dropping the scope,
/// discards them together. Shadow account lookups made inside the scope are
/// staged and only reach the shared cache on commit. Once an operation fails
/// after it started writing, the scope is marked failed and can only be
/// rolled back.
pub struct TransactionScope<T: StorageTransaction> {
    tx: T,
    cache: EntityAccountCache,
    staged: Vec<(String, Account)>,
    failed: bool,
}

impl<T: StorageTransaction> TransactionScope<T> {
    pub(crate) fn new(tx: T, cache: EntityAccountCache) -> Self {
        Self {
            tx,
            cache,
            staged: Vec::new(),
            failed: false,
        }
    }

    /// Whether an operation failed part-way through its writes
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Pass a write phase's result through, marking the scope failed on error
    pub(crate) fn track<R>(&mut self, result: LedgerResult<R>) -> LedgerResult<R> {
        if let Err(err) = &result {
            tracing::warn!(error = %err, "write phase failed, scope can only be rolled back");
            self.failed = true;
        }
        result
    }

    pub(crate) fn tx(&mut self) -> &mut T {
        &mut self.tx
    }

    /// Look a shadow account up, preferring what this scope has staged
    pub(crate) fn cached(&self, key: &str) -> LedgerResult<Option<Account>> {
        if let Some((_, account)) = self.staged.iter().rev().find(|(k, _)| k == key) {
            return Ok(Some(account.clone()));
        }
        self.cache.get(key)
    }

    pub(crate) fn stage(&mut self, key: String, account: Account) {
        self.staged.retain(|(k, _)| *k != key);
        self.staged.push((key, account));
    }

    /// Drop every cached and staged snapshot for an entity
    pub(crate) fn invalidate(&mut self, tenant_id: &str, entity: &EntityRef) -> LedgerResult<()> {
        let prefix = EntityAccountCache::entity_prefix(tenant_id, entity);
        self.staged.retain(|(k, _)| !k.starts_with(&prefix));
        self.cache.invalidate_entity(tenant_id, entity)
    }

    /// Persist every write made in this scope
    ///
    /// A failed scope is rolled back instead and reported as
    /// `InvalidOperation`.
    #[instrument(name = "ledger.scope.commit", skip(self), fields(staged = self.staged.len()), err)]
    pub async fn commit(self) -> LedgerResult<()> {
        if self.failed {
            self.tx.rollback().await?;
            return Err(LedgerError::InvalidOperation(
                "Cannot commit a scope whose operation failed".to_string(),
            ));
        }

        let keys: Vec<String> = self.staged.iter().map(|(k, _)| k.clone()).collect();
        for (key, account) in self.staged {
            self.cache.insert(key, account)?;
        }

        if let Err(err) = self.tx.commit().await {
            for key in &keys {
                self.cache.remove(key)?;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Discard every write made in this scope
    #[instrument(name = "ledger.scope.rollback", skip(self), err)]
    pub async fn rollback(self) -> LedgerResult<()> {
        tracing::warn!(staged = self.staged.len(), "rolling back transaction scope");
        self.tx.rollback().await
    }
}
