//! Entity shadow accounts and the balance columns that mirror them

use bigdecimal::BigDecimal;
use cached::{Cached, TimedSizedCache};
use std::sync::{Arc, Mutex};
use tracing::instrument;

use crate::ledger::account::{chart, AccountManager};
use crate::ledger::scope::TransactionScope;
use crate::traits::*;
use crate::types::*;

/// Time-bounded snapshots of resolved shadow accounts
///
/// Keys read `tenant:entityType:entityId:side`. Entries are a projection of
/// the account rows and are never consulted for balances.
#[derive(Clone)]
pub struct EntityAccountCache {
    inner: Arc<Mutex<TimedSizedCache<String, Account>>>,
}

impl EntityAccountCache {
    pub fn new(capacity: usize, ttl_secs: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TimedSizedCache::with_size_and_lifespan(
                capacity.max(1),
                ttl_secs,
            ))),
        }
    }

    pub fn key(tenant_id: &str, entity: &EntityRef, side: ShadowSide) -> String {
        format!("{}{}", Self::entity_prefix(tenant_id, entity), side)
    }

    pub(crate) fn entity_prefix(tenant_id: &str, entity: &EntityRef) -> String {
        format!(
            "{}:{}:{}:",
            tenant_id, entity.entity_type, entity.entity_id
        )
    }

    fn lock(&self) -> LedgerResult<std::sync::MutexGuard<'_, TimedSizedCache<String, Account>>> {
        self.inner
            .lock()
            .map_err(|_| LedgerError::Unavailable("entity account cache lock poisoned".to_string()))
    }

    pub fn get(&self, key: &str) -> LedgerResult<Option<Account>> {
        Ok(self.lock()?.cache_get(key).cloned())
    }

    pub fn insert(&self, key: String, account: Account) -> LedgerResult<()> {
        self.lock()?.cache_set(key, account);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> LedgerResult<()> {
        self.lock()?.cache_remove(key);
        Ok(())
    }

    /// Forget both shadow sides of an entity
    pub fn invalidate_entity(&self, tenant_id: &str, entity: &EntityRef) -> LedgerResult<()> {
        let mut cache = self.lock()?;
        for side in [ShadowSide::Regular, ShadowSide::Reserves] {
            cache.cache_remove(&Self::key(tenant_id, entity, side));
        }
        tracing::debug!(%entity, tenant_id, "entity cache invalidated");
        Ok(())
    }

    pub fn len(&self) -> LedgerResult<usize> {
        Ok(self.lock()?.cache_size())
    }

    pub fn is_empty(&self) -> LedgerResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// The pair of accounts opened for an entity
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowAccounts {
    pub regular: Account,
    pub reserves: Account,
}

/// Keeps entity balance columns in step with their shadow accounts
pub struct EntityBalanceSync<S: LedgerStorage> {
    storage: S,
    accounts: AccountManager<S>,
}

impl<S: LedgerStorage + Clone> Clone for EntityBalanceSync<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            accounts: self.accounts.clone(),
        }
    }
}

impl<S: LedgerStorage> EntityBalanceSync<S> {
    pub fn new(storage: S, accounts: AccountManager<S>) -> Self {
        Self { storage, accounts }
    }

    /// Register an entity and open its two shadow accounts
    ///
    /// The regular account `{code}-dr` hangs under the entity type's working
    /// account and carries the opening balance on the type's natural side. The
    /// reserves account `{code}-cr` hangs under General Reserves and carries
    /// the mirror entry, so the opening nets to zero across the chart. The
    /// balance column starts at the regular shadow's signed amount, so a
    /// vendor opened with 80 stores -80 and later postings keep both in step.
    #[instrument(
        name = "ledger.entities.open",
        skip(self, scope, entity, name, opening_balance),
        fields(entity = %entity),
        err
    )]
    pub async fn open_entity(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        entity: &EntityRef,
        code: &str,
        name: &str,
        opening_balance: BigDecimal,
    ) -> LedgerResult<ShadowAccounts> {
        validate_opening(&opening_balance)?;

        let entity_type = entity.entity_type;
        let regular_parent = system_parent(scope, chart::regular_parent_code(entity_type)).await?;
        let reserves_parent = system_parent(scope, chart::reserves_parent_code(entity_type)).await?;

        let side = entity_type.opening_side();
        let mut regular = NewAccount::new(
            tenant_id,
            name,
            AccountKind::SubAccount,
            shadow_code(code, ShadowSide::Regular),
        )
        .parent(regular_parent.id)
        .entity(entity.clone());
        let mut reserves = NewAccount::new(
            tenant_id,
            name,
            AccountKind::SubAccount,
            shadow_code(code, ShadowSide::Reserves),
        )
        .parent(reserves_parent.id)
        .entity(entity.clone());
        if opening_balance != BigDecimal::from(0) {
            regular = regular.opening(side, opening_balance.clone());
            reserves = reserves.opening(side.opposite(), opening_balance.clone());
        }

        let record = EntityRecord::new(
            tenant_id.to_string(),
            entity.clone(),
            name.to_string(),
            signed_opening(side, &opening_balance),
        );
        scope.tx().insert_entity(&record).await?;

        let opened = self.create_shadows(scope, regular, reserves).await;
        let shadows = scope.track(opened)?;

        scope.stage(
            EntityAccountCache::key(tenant_id, entity, ShadowSide::Regular),
            shadows.regular.clone(),
        );
        scope.stage(
            EntityAccountCache::key(tenant_id, entity, ShadowSide::Reserves),
            shadows.reserves.clone(),
        );

        Ok(shadows)
    }

    async fn create_shadows(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        regular: NewAccount,
        reserves: NewAccount,
    ) -> LedgerResult<ShadowAccounts> {
        let regular = self.accounts.create(scope, regular).await?;
        let reserves = self.accounts.create(scope, reserves).await?;
        Ok(ShadowAccounts { regular, reserves })
    }

    /// Find the shadow account of an entity on one side, cache first
    #[instrument(
        name = "ledger.entities.resolve_shadow_account",
        skip(self, scope, entity),
        fields(entity = %entity),
        err
    )]
    pub async fn resolve_shadow_account(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        entity: &EntityRef,
        side: ShadowSide,
    ) -> LedgerResult<Account> {
        let key = EntityAccountCache::key(tenant_id, entity, side);
        if let Some(account) = scope.cached(&key)? {
            tracing::debug!(%key, "shadow account cache hit");
            return Ok(account);
        }

        let account = scope
            .tx()
            .accounts_for_entity(tenant_id, entity)
            .await?
            .into_iter()
            .find(|a| a.shadow_side() == side)
            .ok_or_else(|| {
                LedgerError::AccountNotFound(format!("{} ({} side)", entity, side))
            })?;

        scope.stage(key, account.clone());
        Ok(account)
    }

    /// Apply a signed ledger movement to the entity's balance column
    ///
    /// Only the posting engine calls this, inside the scope of the journal
    /// that caused the movement.
    #[instrument(
        name = "ledger.entities.sync_balance",
        skip(self, scope, entity, delta),
        fields(entity = %entity, delta = %delta),
        err
    )]
    pub(crate) async fn sync_entity_balance(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        entity: &EntityRef,
        delta: &BigDecimal,
    ) -> LedgerResult<BigDecimal> {
        let column = entity.entity_type.balance_column();
        let balance = scope
            .tx()
            .increment_entity_balance(tenant_id, entity, column, delta)
            .await?;
        scope.invalidate(tenant_id, entity)?;
        tracing::debug!(column = column.as_str(), %balance, "entity balance synced");
        Ok(balance)
    }

    /// Current value of an entity's balance column
    pub async fn entity_balance(
        &self,
        tenant_id: &str,
        entity: &EntityRef,
    ) -> LedgerResult<BigDecimal> {
        self.storage
            .get_entity(tenant_id, entity)
            .await?
            .map(|record| record.balance)
            .ok_or_else(|| LedgerError::EntityNotFound(entity.to_string()))
    }

    /// Balance column as seen by an open scope, uncommitted writes included
    pub async fn entity_balance_in(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        entity: &EntityRef,
    ) -> LedgerResult<BigDecimal> {
        scope
            .tx()
            .get_entity(tenant_id, entity)
            .await?
            .map(|record| record.balance)
            .ok_or_else(|| LedgerError::EntityNotFound(entity.to_string()))
    }
}

fn shadow_code(code: &str, side: ShadowSide) -> String {
    format!("{}-{}", code, side.code_suffix())
}

/// Opening balance as it reads on the regular shadow (debit minus credit)
fn signed_opening(side: EntryType, amount: &BigDecimal) -> BigDecimal {
    match side {
        EntryType::Debit => amount.clone(),
        EntryType::Credit => -amount.clone(),
    }
}

fn validate_opening(amount: &BigDecimal) -> LedgerResult<()> {
    crate::utils::validation::validate_non_negative_amount(amount)
}

async fn system_parent<T: StorageTransaction>(
    scope: &mut TransactionScope<T>,
    code: &str,
) -> LedgerResult<Account> {
    scope
        .tx()
        .find_account_by_code(None, code)
        .await?
        .ok_or_else(|| {
            LedgerError::InvalidOperation(format!(
                "System account '{}' is missing, seed the system chart first",
                code
            ))
        })
}
