//! Account tree management: creation, reparenting, deletion and upward rollup

use bigdecimal::BigDecimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::instrument;

use crate::ledger::scope::TransactionScope;
use crate::traits::*;
use crate::types::*;

/// Account manager for handling chart of accounts operations
pub struct AccountManager<S: LedgerStorage> {
    storage: S,
    validator: Arc<dyn AccountValidator>,
}

impl<S: LedgerStorage + Clone> Clone for AccountManager<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            validator: Arc::clone(&self.validator),
        }
    }
}

impl<S: LedgerStorage> AccountManager<S> {
    /// Create a new account manager
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Arc::new(DefaultAccountValidator),
        }
    }

    /// Create a new account manager with custom validator
    pub fn with_validator(storage: S, validator: Arc<dyn AccountValidator>) -> Self {
        Self { storage, validator }
    }

    /// Create a new account below an optional parent
    ///
    /// The parent must belong to the same tenant or be a system account. Any
    /// opening amounts are rolled up the parent chain before returning.
    #[instrument(
        name = "ledger.accounts.create",
        skip_all,
        fields(code = %new_account.code, tenant_id = ?new_account.tenant_id),
        err
    )]
    pub async fn create(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        new_account: NewAccount,
    ) -> LedgerResult<Account> {
        self.validator.validate_account(&new_account)?;

        let tx = scope.tx();
        let parent = match &new_account.parent_id {
            Some(parent_id) => {
                let parent = visible_parent(tx, new_account.tenant_id.as_deref(), parent_id).await?;
                ensure_can_take_children(tx, &parent).await?;
                Some(parent)
            }
            None => None,
        };

        if tx
            .find_account_by_code(new_account.tenant_id.as_deref(), &new_account.code)
            .await?
            .is_some()
        {
            return Err(LedgerError::Conflict(format!(
                "Account code '{}' already exists",
                new_account.code
            )));
        }

        let has_opening = new_account.has_opening();
        let account = Account::from_new(new_account, parent.as_ref())?;
        tx.insert_account(&account).await?;
        tracing::debug!(account_id = %account.id, path = %account.path, "account created");

        if has_opening {
            if let Some(parent) = &parent {
                let rolled_up = self.propagate_upward(scope, &parent.id).await;
                scope.track(rolled_up)?;
            }
        }

        if let (Some(tenant_id), Some(entity)) = (&account.tenant_id, &account.entity) {
            scope.invalidate(tenant_id, entity)?;
        }

        Ok(account)
    }

    /// Apply a patch to an account owned by `tenant_id`
    ///
    /// Moving an account rewrites the paths of its whole subtree and rolls up
    /// both the old and the new parent chains. An account can never be moved
    /// below itself or one of its descendants.
    #[instrument(name = "ledger.accounts.update", skip(self, scope, patch), err)]
    pub async fn update(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        account_id: &str,
        patch: AccountPatch,
    ) -> LedgerResult<Account> {
        self.validator.validate_patch(&patch)?;

        if let Some(Some(parent_id)) = &patch.parent_id {
            if parent_id == account_id {
                return Err(LedgerError::InvalidOperation(format!(
                    "Account '{}' cannot be its own parent",
                    account_id
                )));
            }
        }

        let tx = scope.tx();
        let mut account = owned_account(tx, tenant_id, account_id).await?;
        let old_parent_id = account.parent_id.clone();
        let amounts_changed = patch.changes_amounts();
        if amounts_changed && !tx.child_accounts(&account.id).await?.is_empty() {
            return Err(LedgerError::InvalidOperation(format!(
                "Account '{}' has child accounts, its totals are rolled up",
                account.code
            )));
        }

        let mut moved = false;
        let mut new_parent = None;
        if let Some(parent_id) = patch.parent_id {
            if parent_id != account.parent_id {
                moved = true;
                if let Some(parent_id) = parent_id {
                    let parent = visible_parent(tx, Some(tenant_id), &parent_id).await?;
                    ensure_not_descendant(tx, &account.id, &parent).await?;
                    ensure_can_take_children(tx, &parent).await?;
                    new_parent = Some(parent);
                }
            }
        }

        let renamed = match patch.name {
            Some(name) if name != account.name => {
                account.name = name;
                true
            }
            _ => false,
        };

        if let Some(debit) = patch.debit_amount {
            account.debit_amount = debit;
        }
        if let Some(credit) = patch.credit_amount {
            account.credit_amount = credit;
        }
        account.updated_at = chrono::Utc::now().naive_utc();

        let written = async {
            let tx = scope.tx();
            let mut touched = vec![];
            if moved || renamed {
                let parent = if moved {
                    new_parent
                } else {
                    match &account.parent_id {
                        Some(parent_id) => tx.get_account(parent_id).await?,
                        None => None,
                    }
                };
                account.rebase(parent.as_ref())?;
                tx.update_account(&account).await?;
                touched = rebase_subtree(tx, &account).await?;
            } else {
                tx.update_account(&account).await?;
            }

            for linked in std::iter::once(&account).chain(touched.iter()) {
                if let (Some(owner), Some(entity)) = (&linked.tenant_id, &linked.entity) {
                    scope.invalidate(owner, entity)?;
                }
            }

            if amounts_changed || moved {
                if let Some(old_parent_id) = &old_parent_id {
                    self.propagate_upward(scope, old_parent_id).await?;
                }
            }
            if moved {
                if let Some(new_parent_id) = &account.parent_id {
                    self.propagate_upward(scope, new_parent_id).await?;
                }
            }

            Ok::<_, LedgerError>(account)
        }
        .await;
        scope.track(written)
    }

    /// Delete an account together with all of its descendants
    ///
    /// Returns the ids of every removed account, the target first.
    #[instrument(name = "ledger.accounts.delete", skip(self, scope), err)]
    pub async fn delete(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        account_id: &str,
    ) -> LedgerResult<Vec<String>> {
        let tx = scope.tx();
        let account = owned_account(tx, tenant_id, account_id).await?;
        let descendants = collect_descendants(tx, &account.id).await?;

        let removed: Vec<Account> = std::iter::once(account).chain(descendants).collect();
        let ids: Vec<String> = removed.iter().map(|a| a.id.clone()).collect();
        tx.delete_accounts(&ids).await?;
        tracing::debug!(removed = ids.len(), "account subtree deleted");

        let resummed = async {
            for linked in &removed {
                if let (Some(owner), Some(entity)) = (&linked.tenant_id, &linked.entity) {
                    scope.invalidate(owner, entity)?;
                }
            }
            if let Some(parent_id) = &removed[0].parent_id {
                self.propagate_upward(scope, parent_id).await?;
            }
            Ok::<_, LedgerError>(())
        }
        .await;
        scope.track(resummed)?;

        Ok(ids)
    }

    /// Recompute totals from `account_id` up to its root
    ///
    /// Each hop sets the node's debit and credit totals to the sums over its
    /// immediate children, so re-running it always converges to the same values.
    #[instrument(name = "ledger.accounts.propagate_upward", skip(self, scope), err)]
    pub async fn propagate_upward(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        account_id: &str,
    ) -> LedgerResult<()> {
        let tx = scope.tx();
        let mut visited = HashSet::new();
        let mut current = Some(account_id.to_string());

        while let Some(id) = current {
            if !visited.insert(id.clone()) {
                return Err(LedgerError::InvalidOperation(format!(
                    "Cycle detected at account '{}'",
                    id
                )));
            }

            let node = tx
                .get_account(&id)
                .await?
                .ok_or_else(|| LedgerError::AccountNotFound(id.clone()))?;
            let children = tx.child_accounts(&id).await?;

            let debit: BigDecimal = children.iter().map(|c| &c.debit_amount).sum();
            let credit: BigDecimal = children.iter().map(|c| &c.credit_amount).sum();
            let updated = tx.set_account_totals(&id, &debit, &credit).await?;
            tracing::debug!(account_id = %id, amount = %updated.amount(), "rolled up");

            current = node.parent_id;
        }

        Ok(())
    }

    /// Create the shared chart skeleton, skipping nodes that already exist
    #[instrument(name = "ledger.accounts.seed_system_chart", skip_all, err)]
    pub async fn seed_system_chart(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
    ) -> LedgerResult<Vec<Account>> {
        let mut accounts = Vec::with_capacity(chart::SYSTEM_CHART.len());

        for (code, name, kind, parent_code) in chart::SYSTEM_CHART {
            if let Some(existing) = scope.tx().find_account_by_code(None, code).await? {
                accounts.push(existing);
                continue;
            }

            let mut new_account = NewAccount::system(*name, *kind, *code);
            if let Some(parent_code) = parent_code {
                let parent = scope
                    .tx()
                    .find_account_by_code(None, parent_code)
                    .await?
                    .ok_or_else(|| LedgerError::AccountNotFound(parent_code.to_string()))?;
                new_account = new_account.parent(parent.id);
            }
            accounts.push(self.create(scope, new_account).await?);
        }

        Ok(accounts)
    }

    /// Get an account visible to `tenant_id`
    pub async fn find(&self, tenant_id: &str, account_id: &str) -> LedgerResult<Option<Account>> {
        Ok(self
            .storage
            .get_account(account_id)
            .await?
            .filter(|a| a.is_visible_to(tenant_id)))
    }

    /// Get an account visible to `tenant_id` through an open scope
    ///
    /// Sees the scope's own uncommitted writes and never waits on the scope.
    pub async fn find_in(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        account_id: &str,
    ) -> LedgerResult<Option<Account>> {
        Ok(scope
            .tx()
            .get_account(account_id)
            .await?
            .filter(|a| a.is_visible_to(tenant_id)))
    }

    /// Get an account visible to `tenant_id`, returning an error if not found
    pub async fn find_required(&self, tenant_id: &str, account_id: &str) -> LedgerResult<Account> {
        self.find(tenant_id, account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    /// List accounts of one hierarchy level
    ///
    /// Shared system accounts are included, and their totals roll up the
    /// accounts of every tenant below them, not just `tenant_id`'s.
    pub async fn find_by_type(
        &self,
        tenant_id: &str,
        kind: AccountKind,
    ) -> LedgerResult<Vec<Account>> {
        self.storage.list_accounts(tenant_id, Some(kind)).await
    }

    /// Accounts of a tenant shadowing an external entity
    pub async fn find_by_entity(
        &self,
        tenant_id: &str,
        entity: &EntityRef,
    ) -> LedgerResult<Vec<Account>> {
        Ok(self
            .storage
            .list_accounts(tenant_id, None)
            .await?
            .into_iter()
            .filter(|a| a.is_owned_by(tenant_id) && a.entity.as_ref() == Some(entity))
            .collect())
    }

    /// The whole forest visible to a tenant, children nested under parents
    ///
    /// Other tenants' accounts are left out of the tree, but the totals of the
    /// shared system nodes still include them.
    pub async fn find_all(&self, tenant_id: &str) -> LedgerResult<Vec<AccountNode>> {
        let accounts = self.storage.list_accounts(tenant_id, None).await?;
        let visible: HashSet<String> = accounts.iter().map(|a| a.id.clone()).collect();

        let mut roots = Vec::new();
        let mut by_parent: HashMap<String, Vec<Account>> = HashMap::new();
        for account in accounts {
            match account.parent_id.clone().filter(|p| visible.contains(p)) {
                Some(parent_id) => by_parent.entry(parent_id).or_default().push(account),
                None => roots.push(account),
            }
        }

        roots.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(roots
            .into_iter()
            .map(|root| build_node(root, &mut by_parent))
            .collect())
    }

    /// The subtree rooted at one account
    pub async fn find_trees(&self, tenant_id: &str, account_id: &str) -> LedgerResult<AccountNode> {
        let root = self.find_required(tenant_id, account_id).await?;

        let mut by_parent: HashMap<String, Vec<Account>> = HashMap::new();
        let mut queue = VecDeque::from([root.id.clone()]);
        while let Some(id) = queue.pop_front() {
            let children: Vec<Account> = self
                .storage
                .child_accounts(&id)
                .await?
                .into_iter()
                .filter(|c| c.is_visible_to(tenant_id))
                .collect();
            queue.extend(children.iter().map(|c| c.id.clone()));
            by_parent.insert(id, children);
        }

        Ok(build_node(root, &mut by_parent))
    }
}

fn build_node(account: Account, by_parent: &mut HashMap<String, Vec<Account>>) -> AccountNode {
    let mut children = by_parent.remove(&account.id).unwrap_or_default();
    children.sort_by(|a, b| a.code.cmp(&b.code));
    AccountNode {
        children: children
            .into_iter()
            .map(|child| build_node(child, by_parent))
            .collect(),
        account,
    }
}

/// Parent lookup for a new or moved account owned by `tenant_id`
async fn visible_parent<T: StorageTransaction>(
    tx: &mut T,
    tenant_id: Option<&str>,
    parent_id: &str,
) -> LedgerResult<Account> {
    tx.get_account(parent_id)
        .await?
        .filter(|parent| match tenant_id {
            Some(tenant_id) => parent.is_visible_to(tenant_id),
            None => parent.system_generated,
        })
        .ok_or_else(|| LedgerError::AccountNotFound(parent_id.to_string()))
}

async fn owned_account<T: StorageTransaction>(
    tx: &mut T,
    tenant_id: &str,
    account_id: &str,
) -> LedgerResult<Account> {
    tx.get_account(account_id)
        .await?
        .filter(|a| a.is_owned_by(tenant_id))
        .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
}

/// A leaf that carries its own balance cannot become a parent, since rollups
/// would overwrite its totals with the sum of its children
async fn ensure_can_take_children<T: StorageTransaction>(
    tx: &mut T,
    parent: &Account,
) -> LedgerResult<()> {
    let zero = BigDecimal::from(0);
    if (parent.debit_amount != zero || parent.credit_amount != zero)
        && tx.child_accounts(&parent.id).await?.is_empty()
    {
        return Err(LedgerError::InvalidOperation(format!(
            "Account '{}' carries its own balance and cannot take child accounts",
            parent.code
        )));
    }
    Ok(())
}

/// Reject moving `account_id` below `new_parent` when that parent sits in its subtree
async fn ensure_not_descendant<T: StorageTransaction>(
    tx: &mut T,
    account_id: &str,
    new_parent: &Account,
) -> LedgerResult<()> {
    let mut visited = HashSet::new();
    let mut current = Some(new_parent.clone());

    while let Some(node) = current {
        if node.id == account_id {
            return Err(LedgerError::InvalidOperation(format!(
                "Moving account '{}' below '{}' would create a cycle",
                account_id, new_parent.id
            )));
        }
        if !visited.insert(node.id.clone()) {
            break;
        }
        current = match &node.parent_id {
            Some(parent_id) => tx.get_account(parent_id).await?,
            None => None,
        };
    }

    Ok(())
}

/// All descendants of an account, parents before children
async fn collect_descendants<T: StorageTransaction>(
    tx: &mut T,
    account_id: &str,
) -> LedgerResult<Vec<Account>> {
    let mut descendants = Vec::new();
    let mut queue = VecDeque::from([account_id.to_string()]);

    while let Some(id) = queue.pop_front() {
        for child in tx.child_accounts(&id).await? {
            queue.push_back(child.id.clone());
            descendants.push(child);
        }
    }

    Ok(descendants)
}

/// Rewrite the paths of every descendant of an already rebased account
async fn rebase_subtree<T: StorageTransaction>(
    tx: &mut T,
    root: &Account,
) -> LedgerResult<Vec<Account>> {
    let mut rebased: HashMap<String, Account> = HashMap::from([(root.id.clone(), root.clone())]);
    let mut touched = Vec::new();

    for mut descendant in collect_descendants(tx, &root.id).await? {
        let parent = descendant
            .parent_id
            .as_ref()
            .and_then(|parent_id| rebased.get(parent_id))
            .cloned();
        descendant.rebase(parent.as_ref())?;
        tx.update_account(&descendant).await?;
        rebased.insert(descendant.id.clone(), descendant.clone());
        touched.push(descendant);
    }

    Ok(touched)
}

/// The shared skeleton every tenant's chart hangs off
pub mod chart {
    use super::*;

    pub const ASSETS: &str = "1000";
    pub const CURRENT_ASSETS: &str = "1100";
    pub const TRADE_RECEIVABLES: &str = "1110";
    pub const CASH_AT_BANK: &str = "1120";
    pub const STOCK_IN_HAND: &str = "1130";
    pub const LIABILITIES: &str = "2000";
    pub const CURRENT_LIABILITIES: &str = "2100";
    pub const TRADE_PAYABLES: &str = "2110";
    pub const EQUITY: &str = "3000";
    pub const GENERAL_RESERVES_CODE: &str = "3100";
    pub const CUSTOMER_OPENINGS: &str = "3110";
    pub const VENDOR_OPENINGS: &str = "3120";
    pub const BANK_OPENINGS: &str = "3130";
    pub const INVENTORY_OPENINGS: &str = "3140";
    pub const INCOME: &str = "4000";
    pub const OPERATING_INCOME: &str = "4100";
    pub const SALES: &str = "4110";
    pub const EXPENSES: &str = "5000";
    pub const OPERATING_EXPENSES: &str = "5100";
    pub const COST_OF_SALES: &str = "5110";
    pub const GENERAL_EXPENSES: &str = "5120";

    /// `(code, name, kind, parent code)`, parents listed before children
    pub const SYSTEM_CHART: &[(&str, &str, AccountKind, Option<&str>)] = &[
        (ASSETS, "Assets", AccountKind::AccountGroup, None),
        (CURRENT_ASSETS, "Current Assets", AccountKind::AccountType, Some(ASSETS)),
        (TRADE_RECEIVABLES, "Trade Receivables", AccountKind::Account, Some(CURRENT_ASSETS)),
        (CASH_AT_BANK, "Cash at Bank", AccountKind::Account, Some(CURRENT_ASSETS)),
        (STOCK_IN_HAND, "Stock in Hand", AccountKind::Account, Some(CURRENT_ASSETS)),
        (LIABILITIES, "Liabilities", AccountKind::AccountGroup, None),
        (CURRENT_LIABILITIES, "Current Liabilities", AccountKind::AccountType, Some(LIABILITIES)),
        (TRADE_PAYABLES, "Trade Payables", AccountKind::Account, Some(CURRENT_LIABILITIES)),
        (EQUITY, "Equity", AccountKind::AccountGroup, None),
        (GENERAL_RESERVES_CODE, GENERAL_RESERVES, AccountKind::AccountType, Some(EQUITY)),
        (CUSTOMER_OPENINGS, "Customer Openings", AccountKind::Account, Some(GENERAL_RESERVES_CODE)),
        (VENDOR_OPENINGS, "Vendor Openings", AccountKind::Account, Some(GENERAL_RESERVES_CODE)),
        (BANK_OPENINGS, "Bank Openings", AccountKind::Account, Some(GENERAL_RESERVES_CODE)),
        (INVENTORY_OPENINGS, "Inventory Openings", AccountKind::Account, Some(GENERAL_RESERVES_CODE)),
        (INCOME, "Income", AccountKind::AccountGroup, None),
        (OPERATING_INCOME, "Operating Income", AccountKind::AccountType, Some(INCOME)),
        (SALES, "Sales", AccountKind::Account, Some(OPERATING_INCOME)),
        (EXPENSES, "Expenses", AccountKind::AccountGroup, None),
        (OPERATING_EXPENSES, "Operating Expenses", AccountKind::AccountType, Some(EXPENSES)),
        (COST_OF_SALES, "Cost of Sales", AccountKind::Account, Some(OPERATING_EXPENSES)),
        (GENERAL_EXPENSES, "General Expenses", AccountKind::Account, Some(OPERATING_EXPENSES)),
    ];

    /// System parent of an entity's regular shadow account
    pub fn regular_parent_code(entity_type: EntityType) -> &'static str {
        match entity_type {
            EntityType::Customer => TRADE_RECEIVABLES,
            EntityType::Vendor => TRADE_PAYABLES,
            EntityType::Bank => CASH_AT_BANK,
            EntityType::Inventory => STOCK_IN_HAND,
        }
    }

    /// System parent of an entity's reserves shadow account
    pub fn reserves_parent_code(entity_type: EntityType) -> &'static str {
        match entity_type {
            EntityType::Customer => CUSTOMER_OPENINGS,
            EntityType::Vendor => VENDOR_OPENINGS,
            EntityType::Bank => BANK_OPENINGS,
            EntityType::Inventory => INVENTORY_OPENINGS,
        }
    }
}
