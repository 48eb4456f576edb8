//! Core types and data structures for the ledger

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the equity subtree that holds the opening counter-entries of every entity
pub const GENERAL_RESERVES: &str = "General Reserves";

/// The four fixed levels of the chart of accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountKind {
    /// Top level grouping (Assets, Liabilities, Equity, Income, Expenses)
    AccountGroup,
    /// Second level classification (Current Assets, General Reserves, ...)
    AccountType,
    /// Postable ledger account
    Account,
    /// Leaf below an account, typically the shadow of an external entity
    SubAccount,
}

impl AccountKind {
    /// Depth of this level in the chart, zero for groups
    pub fn level(&self) -> usize {
        match self {
            AccountKind::AccountGroup => 0,
            AccountKind::AccountType => 1,
            AccountKind::Account => 2,
            AccountKind::SubAccount => 3,
        }
    }
}

/// Types of entries in double-entry bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn opposite(&self) -> Self {
        match self {
            EntryType::Debit => EntryType::Credit,
            EntryType::Credit => EntryType::Debit,
        }
    }
}

/// External business records that carry a ledger shadow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Customer,
    Vendor,
    Bank,
    Inventory,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Customer => "customer",
            EntityType::Vendor => "vendor",
            EntityType::Bank => "bank",
            EntityType::Inventory => "inventory",
        }
    }

    /// Denormalized balance column owned by the entity's table
    pub fn balance_column(&self) -> BalanceColumn {
        match self {
            EntityType::Customer | EntityType::Vendor => BalanceColumn::OpeningBalance,
            EntityType::Bank => BalanceColumn::CurrentBalance,
            EntityType::Inventory => BalanceColumn::Amount,
        }
    }

    /// Side on which the regular shadow account carries the opening balance.
    /// The reserves shadow always takes the opposite side.
    pub fn opening_side(&self) -> EntryType {
        match self {
            EntityType::Customer | EntityType::Bank | EntityType::Inventory => EntryType::Debit,
            EntityType::Vendor => EntryType::Credit,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Balance columns on entity tables that mirror ledger movements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BalanceColumn {
    OpeningBalance,
    CurrentBalance,
    Amount,
}

impl BalanceColumn {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceColumn::OpeningBalance => "opening_balance",
            BalanceColumn::CurrentBalance => "current_balance",
            BalanceColumn::Amount => "amount",
        }
    }
}

/// Back-reference from an account to the business record it shadows
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
        }
    }

    pub fn customer(entity_id: impl Into<String>) -> Self {
        Self::new(EntityType::Customer, entity_id)
    }

    pub fn vendor(entity_id: impl Into<String>) -> Self {
        Self::new(EntityType::Vendor, entity_id)
    }

    pub fn bank(entity_id: impl Into<String>) -> Self {
        Self::new(EntityType::Bank, entity_id)
    }

    pub fn inventory(entity_id: impl Into<String>) -> Self {
        Self::new(EntityType::Inventory, entity_id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

/// Which of an entity's two shadow accounts is meant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShadowSide {
    /// Working account under receivables/payables/bank/stock
    Regular,
    /// Opening counter-entry under General Reserves
    Reserves,
}

impl ShadowSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShadowSide::Regular => "regular",
            ShadowSide::Reserves => "reserves",
        }
    }

    /// Code suffix given to the shadow account on this side
    pub fn code_suffix(&self) -> &'static str {
        match self {
            ShadowSide::Regular => "dr",
            ShadowSide::Reserves => "cr",
        }
    }
}

impl fmt::Display for ShadowSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of the chart of accounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    /// Owning tenant, `None` for shared system accounts
    pub tenant_id: Option<String>,
    pub name: String,
    pub kind: AccountKind,
    /// Business key, unique within the tenant namespace
    pub code: String,
    pub parent_id: Option<String>,
    /// Materialized code chain, `parent.path/code`
    pub path: String,
    /// Materialized name chain, `parent.path_name/name`
    pub path_name: String,
    pub debit_amount: BigDecimal,
    pub credit_amount: BigDecimal,
    pub entity: Option<EntityRef>,
    pub system_generated: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Account {
    /// Build an account from its creation request below `parent`
    pub fn from_new(new_account: NewAccount, parent: Option<&Account>) -> LedgerResult<Self> {
        let (path, path_name) = derive_path(parent, &new_account.code, &new_account.name)?;
        let now = chrono::Utc::now().naive_utc();
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: new_account.tenant_id,
            name: new_account.name,
            kind: new_account.kind,
            code: new_account.code,
            parent_id: parent.map(|p| p.id.clone()),
            path,
            path_name,
            debit_amount: new_account
                .opening_debit
                .unwrap_or_else(|| BigDecimal::from(0)),
            credit_amount: new_account
                .opening_credit
                .unwrap_or_else(|| BigDecimal::from(0)),
            entity: new_account.entity,
            system_generated: new_account.system_generated,
            created_at: now,
            updated_at: now,
        })
    }

    /// Net balance, debits minus credits
    pub fn amount(&self) -> BigDecimal {
        &self.debit_amount - &self.credit_amount
    }

    /// Whether a tenant may read or post to this account
    pub fn is_visible_to(&self, tenant_id: &str) -> bool {
        self.system_generated || self.is_owned_by(tenant_id)
    }

    pub fn is_owned_by(&self, tenant_id: &str) -> bool {
        self.tenant_id.as_deref() == Some(tenant_id)
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Classify a shadow account: codes ending in `cr` and anything below
    /// General Reserves are the reserves side.
    pub fn shadow_side(&self) -> ShadowSide {
        if self.code.ends_with(ShadowSide::Reserves.code_suffix())
            || self.path_name.contains(GENERAL_RESERVES)
        {
            ShadowSide::Reserves
        } else {
            ShadowSide::Regular
        }
    }

    /// Recompute the materialized paths against a (possibly new) parent
    pub(crate) fn rebase(&mut self, parent: Option<&Account>) -> LedgerResult<()> {
        let (path, path_name) = derive_path(parent, &self.code, &self.name)?;
        self.parent_id = parent.map(|p| p.id.clone());
        self.path = path;
        self.path_name = path_name;
        Ok(())
    }
}

fn derive_path(parent: Option<&Account>, code: &str, name: &str) -> LedgerResult<(String, String)> {
    match parent {
        None => Ok((code.to_string(), name.to_string())),
        Some(parent) => {
            if parent.path.trim().is_empty() {
                return Err(LedgerError::InvalidOperation(format!(
                    "Parent account '{}' has no path",
                    parent.id
                )));
            }
            Ok((
                format!("{}/{}", parent.path, code),
                format!("{}/{}", parent.path_name, name),
            ))
        }
    }
}

/// Request to create an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccount {
    pub tenant_id: Option<String>,
    pub name: String,
    pub kind: AccountKind,
    pub code: String,
    pub parent_id: Option<String>,
    pub entity: Option<EntityRef>,
    pub opening_debit: Option<BigDecimal>,
    pub opening_credit: Option<BigDecimal>,
    pub system_generated: bool,
}

impl NewAccount {
    /// A tenant-owned account
    pub fn new(
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        kind: AccountKind,
        code: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            name: name.into(),
            kind,
            code: code.into(),
            parent_id: None,
            entity: None,
            opening_debit: None,
            opening_credit: None,
            system_generated: false,
        }
    }

    /// A shared account visible to every tenant
    pub fn system(name: impl Into<String>, kind: AccountKind, code: impl Into<String>) -> Self {
        Self {
            tenant_id: None,
            name: name.into(),
            kind,
            code: code.into(),
            parent_id: None,
            entity: None,
            opening_debit: None,
            opening_credit: None,
            system_generated: true,
        }
    }

    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn entity(mut self, entity: EntityRef) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn opening_debit(mut self, amount: BigDecimal) -> Self {
        self.opening_debit = Some(amount);
        self
    }

    pub fn opening_credit(mut self, amount: BigDecimal) -> Self {
        self.opening_credit = Some(amount);
        self
    }

    /// Set the opening on one side
    pub fn opening(self, side: EntryType, amount: BigDecimal) -> Self {
        match side {
            EntryType::Debit => self.opening_debit(amount),
            EntryType::Credit => self.opening_credit(amount),
        }
    }

    pub fn has_opening(&self) -> bool {
        let zero = BigDecimal::from(0);
        self.opening_debit.as_ref().is_some_and(|d| *d != zero)
            || self.opening_credit.as_ref().is_some_and(|c| *c != zero)
    }
}

/// Partial update of an account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountPatch {
    pub name: Option<String>,
    /// `Some(None)` moves the account to the root
    pub parent_id: Option<Option<String>>,
    pub debit_amount: Option<BigDecimal>,
    pub credit_amount: Option<BigDecimal>,
}

impl AccountPatch {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn reparent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn amounts(mut self, debit_amount: BigDecimal, credit_amount: BigDecimal) -> Self {
        self.debit_amount = Some(debit_amount);
        self.credit_amount = Some(credit_amount);
        self
    }

    pub fn changes_amounts(&self) -> bool {
        self.debit_amount.is_some() || self.credit_amount.is_some()
    }
}

/// An account with its nested children, for tree views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountNode {
    pub account: Account,
    pub children: Vec<AccountNode>,
}

impl AccountNode {
    /// Number of accounts in this subtree, the root included
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(AccountNode::size).sum::<usize>()
    }

    pub fn find(&self, account_id: &str) -> Option<&AccountNode> {
        if self.account.id == account_id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(account_id))
    }
}

/// One requested line of a journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_id: String,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    pub description: Option<String>,
}

impl JournalLine {
    pub fn new(
        account_id: String,
        debit: BigDecimal,
        credit: BigDecimal,
        description: Option<String>,
    ) -> Self {
        Self {
            account_id,
            debit,
            credit,
            description,
        }
    }

    pub fn debit(account_id: String, amount: BigDecimal, description: Option<String>) -> Self {
        Self::new(account_id, amount, BigDecimal::from(0), description)
    }

    pub fn credit(account_id: String, amount: BigDecimal, description: Option<String>) -> Self {
        Self::new(account_id, BigDecimal::from(0), amount, description)
    }
}

/// A journal waiting to be posted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJournal {
    pub reference: String,
    pub date: NaiveDate,
    pub description: String,
    pub lines: Vec<JournalLine>,
}

impl NewJournal {
    pub fn total_debits(&self) -> BigDecimal {
        self.lines.iter().map(|l| &l.debit).sum()
    }

    pub fn total_credits(&self) -> BigDecimal {
        self.lines.iter().map(|l| &l.credit).sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.total_debits() == self.total_credits()
    }

    /// Structural checks that hold whether or not balance is enforced
    pub fn validate_lines(&self) -> LedgerResult<()> {
        if self.lines.is_empty() {
            return Err(LedgerError::Validation(
                "Journal must have at least one line".to_string(),
            ));
        }

        let zero = BigDecimal::from(0);
        for line in &self.lines {
            if line.debit < zero || line.credit < zero {
                return Err(LedgerError::Validation(format!(
                    "Line amounts for account '{}' must not be negative",
                    line.account_id
                )));
            }
        }

        Ok(())
    }
}

/// A posted journal header with its lines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    pub id: String,
    pub tenant_id: String,
    pub reference: String,
    pub date: NaiveDate,
    pub description: String,
    pub details: Vec<JournalDetail>,
    pub created_at: NaiveDateTime,
    /// Set when the journal has been voided
    pub deleted_at: Option<NaiveDateTime>,
}

impl Journal {
    pub fn new(tenant_id: String, reference: String, date: NaiveDate, description: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id,
            reference,
            date,
            description,
            details: Vec::new(),
            created_at: chrono::Utc::now().naive_utc(),
            deleted_at: None,
        }
    }

    pub fn total_debits(&self) -> BigDecimal {
        self.details.iter().map(|d| &d.debit).sum()
    }

    pub fn total_credits(&self) -> BigDecimal {
        self.details.iter().map(|d| &d.credit).sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.total_debits() == self.total_credits()
    }

    pub fn is_voided(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A single posted line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalDetail {
    pub id: String,
    pub journal_id: String,
    pub nominal_account_id: String,
    pub debit: BigDecimal,
    pub credit: BigDecimal,
    pub description: Option<String>,
}

impl JournalDetail {
    pub fn new(journal_id: &str, line: JournalLine) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            journal_id: journal_id.to_string(),
            nominal_account_id: line.account_id,
            debit: line.debit,
            credit: line.credit,
            description: line.description,
        }
    }
}

/// Per-tenant counter behind generated codes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeCounter {
    pub tenant_id: String,
    pub table_name: String,
    pub last_value: i64,
}

/// The collaborator-owned row whose balance column mirrors the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub tenant_id: String,
    pub entity: EntityRef,
    pub name: String,
    pub balance: BigDecimal,
}

impl EntityRecord {
    pub fn new(tenant_id: String, entity: EntityRef, name: String, balance: BigDecimal) -> Self {
        Self {
            tenant_id,
            entity,
            name,
            balance,
        }
    }

    pub fn column(&self) -> BalanceColumn {
        self.entity.entity_type.balance_column()
    }
}

/// Errors that can occur in the ledger system
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Journal not found: {0}")]
    JournalNotFound(String),
    #[error("Entity not found: {0}")]
    EntityNotFound(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::AccountNotFound(_)
                | LedgerError::JournalNotFound(_)
                | LedgerError::EntityNotFound(_)
        )
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
