//! Journal posting and the standard business operation patterns

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;

use crate::ledger::account::AccountManager;
use crate::ledger::entity::EntityBalanceSync;
use crate::ledger::scope::TransactionScope;
use crate::traits::*;
use crate::types::*;

/// Journal manager: the only path that moves account and entity balances
pub struct JournalManager<S: LedgerStorage> {
    storage: S,
    accounts: AccountManager<S>,
    entities: EntityBalanceSync<S>,
    validator: Arc<dyn JournalValidator>,
}

impl<S: LedgerStorage + Clone> Clone for JournalManager<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            accounts: self.accounts.clone(),
            entities: self.entities.clone(),
            validator: Arc::clone(&self.validator),
        }
    }
}

impl<S: LedgerStorage> JournalManager<S> {
    /// Create a journal manager that rejects unbalanced journals
    pub fn new(storage: S, accounts: AccountManager<S>, entities: EntityBalanceSync<S>) -> Self {
        Self::with_validator(storage, accounts, entities, Arc::new(BalancedJournalValidator))
    }

    /// Create a journal manager with custom validator
    pub fn with_validator(
        storage: S,
        accounts: AccountManager<S>,
        entities: EntityBalanceSync<S>,
        validator: Arc<dyn JournalValidator>,
    ) -> Self {
        Self {
            storage,
            accounts,
            entities,
            validator,
        }
    }

    /// Post a journal inside the caller's scope
    ///
    /// Lines are applied one after another. A failure after the first line was
    /// applied marks the scope failed, so it can only be rolled back.
    #[instrument(
        name = "ledger.journals.post",
        skip(self, scope, new_journal),
        fields(reference = %new_journal.reference, lines = new_journal.lines.len()),
        err
    )]
    pub async fn post(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        new_journal: NewJournal,
    ) -> LedgerResult<Journal> {
        self.validator.validate_journal(&new_journal)?;

        if scope
            .tx()
            .find_journal_by_reference(tenant_id, &new_journal.reference)
            .await?
            .is_some()
        {
            return Err(LedgerError::Conflict(format!(
                "Journal reference '{}' already exists",
                new_journal.reference
            )));
        }

        let mut journal = Journal::new(
            tenant_id.to_string(),
            new_journal.reference,
            new_journal.date,
            new_journal.description,
        );

        let written = self
            .write_journal(scope, tenant_id, &mut journal, new_journal.lines)
            .await;
        scope.track(written)?;

        tracing::info!(journal_id = %journal.id, "journal posted");
        Ok(journal)
    }

    async fn write_journal(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        journal: &mut Journal,
        lines: Vec<JournalLine>,
    ) -> LedgerResult<()> {
        for line in lines {
            self.post_and_sync(scope, tenant_id, &line).await?;
            let detail = JournalDetail::new(&journal.id, line);
            scope.tx().insert_journal_detail(&detail).await?;
            journal.details.push(detail);
        }
        scope.tx().insert_journal(journal).await
    }

    /// Reverse every line of a posted journal and mark it voided
    #[instrument(name = "ledger.journals.void", skip(self, scope), err)]
    pub async fn void(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        journal_id: &str,
    ) -> LedgerResult<Journal> {
        let mut journal = scope
            .tx()
            .get_journal(journal_id)
            .await?
            .filter(|j| j.tenant_id == tenant_id)
            .ok_or_else(|| LedgerError::JournalNotFound(journal_id.to_string()))?;

        if journal.is_voided() {
            return Err(LedgerError::InvalidOperation(format!(
                "Journal '{}' is already voided",
                journal.reference
            )));
        }

        let reversed = self.reverse_journal(scope, tenant_id, &mut journal).await;
        scope.track(reversed)?;
        Ok(journal)
    }

    async fn reverse_journal(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        journal: &mut Journal,
    ) -> LedgerResult<()> {
        for detail in &journal.details {
            let reversal = JournalLine::new(
                detail.nominal_account_id.clone(),
                detail.credit.clone(),
                detail.debit.clone(),
                detail.description.clone(),
            );
            self.post_and_sync(scope, tenant_id, &reversal).await?;
        }

        journal.deleted_at = Some(chrono::Utc::now().naive_utc());
        scope.tx().update_journal(journal).await
    }

    /// Apply one line: bump the account totals, roll the parent chain up and
    /// mirror the movement onto a linked entity
    ///
    /// Only leaves take postings. A parent's totals are always the sum of its
    /// children, so a line posted straight to it would be lost on the next
    /// rollup.
    async fn post_and_sync(
        &self,
        scope: &mut TransactionScope<S::Transaction>,
        tenant_id: &str,
        line: &JournalLine,
    ) -> LedgerResult<Account> {
        let tx = scope.tx();
        let target = tx
            .get_account(&line.account_id)
            .await?
            .filter(|a| a.is_visible_to(tenant_id))
            .ok_or_else(|| LedgerError::AccountNotFound(line.account_id.clone()))?;
        if !tx.child_accounts(&target.id).await?.is_empty() {
            return Err(LedgerError::InvalidOperation(format!(
                "Account '{}' has child accounts, post to one of them instead",
                target.code
            )));
        }

        let account = tx
            .increment_account(&line.account_id, &line.debit, &line.credit)
            .await?;
        tracing::debug!(
            account_id = %account.id,
            debit = %line.debit,
            credit = %line.credit,
            "line applied"
        );

        if let Some(parent_id) = &account.parent_id {
            self.accounts.propagate_upward(scope, parent_id).await?;
        }

        if let Some(entity) = &account.entity {
            let delta = &line.debit - &line.credit;
            if delta != BigDecimal::from(0) {
                let owner = account.tenant_id.as_deref().unwrap_or(tenant_id);
                self.entities
                    .sync_entity_balance(scope, owner, entity, &delta)
                    .await?;
            }
        }

        Ok(account)
    }

    /// Get a journal of this tenant by ID
    pub async fn find(&self, tenant_id: &str, journal_id: &str) -> LedgerResult<Option<Journal>> {
        Ok(self
            .storage
            .get_journal(journal_id)
            .await?
            .filter(|j| j.tenant_id == tenant_id))
    }

    /// Get a journal of this tenant by ID, returning an error if not found
    pub async fn find_required(&self, tenant_id: &str, journal_id: &str) -> LedgerResult<Journal> {
        self.find(tenant_id, journal_id)
            .await?
            .ok_or_else(|| LedgerError::JournalNotFound(journal_id.to_string()))
    }

    pub async fn find_by_reference(
        &self,
        tenant_id: &str,
        reference: &str,
    ) -> LedgerResult<Option<Journal>> {
        Ok(self
            .storage
            .list_journals(tenant_id, None, None)
            .await?
            .into_iter()
            .find(|j| j.reference == reference))
    }

    /// Live journals within a date range, oldest first
    pub async fn list(
        &self,
        tenant_id: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Journal>> {
        Ok(self
            .storage
            .list_journals(tenant_id, start_date, end_date)
            .await?
            .into_iter()
            .filter(|j| !j.is_voided())
            .collect())
    }

    /// Posted lines of live journals that touch an account
    pub async fn account_activity(
        &self,
        tenant_id: &str,
        account_id: &str,
    ) -> LedgerResult<Vec<JournalDetail>> {
        self.accounts.find_required(tenant_id, account_id).await?;

        let live: HashSet<String> = self
            .list(tenant_id, None, None)
            .await?
            .into_iter()
            .map(|j| j.id)
            .collect();
        Ok(self
            .storage
            .account_details(account_id)
            .await?
            .into_iter()
            .filter(|d| live.contains(&d.journal_id))
            .collect())
    }
}

/// Builder for journals
#[derive(Debug)]
pub struct JournalBuilder {
    journal: NewJournal,
}

impl JournalBuilder {
    pub fn new(reference: impl Into<String>, date: NaiveDate, description: impl Into<String>) -> Self {
        Self {
            journal: NewJournal {
                reference: reference.into(),
                date,
                description: description.into(),
                lines: Vec::new(),
            },
        }
    }

    /// Add a debit line
    pub fn debit(
        mut self,
        account_id: impl Into<String>,
        amount: BigDecimal,
        description: Option<String>,
    ) -> Self {
        self.journal
            .lines
            .push(JournalLine::debit(account_id.into(), amount, description));
        self
    }

    /// Add a credit line
    pub fn credit(
        mut self,
        account_id: impl Into<String>,
        amount: BigDecimal,
        description: Option<String>,
    ) -> Self {
        self.journal
            .lines
            .push(JournalLine::credit(account_id.into(), amount, description));
        self
    }

    pub fn line(mut self, line: JournalLine) -> Self {
        self.journal.lines.push(line);
        self
    }

    /// Build the journal, refusing empty, negative or unbalanced line sets
    pub fn build(self) -> LedgerResult<NewJournal> {
        BalancedJournalValidator.validate_journal(&self.journal)?;
        Ok(self.journal)
    }
}

/// Balanced line sets for the standard business operations
pub mod patterns {
    use super::*;

    /// Header fields shared by every pattern
    #[derive(Debug, Clone)]
    pub struct JournalHeader {
        pub reference: String,
        pub date: NaiveDate,
        pub description: String,
    }

    impl JournalHeader {
        pub fn new(reference: impl Into<String>, date: NaiveDate, description: impl Into<String>) -> Self {
            Self {
                reference: reference.into(),
                date,
                description: description.into(),
            }
        }

        fn builder(self) -> JournalBuilder {
            JournalBuilder::new(self.reference, self.date, self.description)
        }
    }

    /// Sale on account: debit the customer, credit sales
    pub fn sale(
        header: JournalHeader,
        customer_account_id: &str,
        sales_account_id: &str,
        amount: BigDecimal,
    ) -> LedgerResult<NewJournal> {
        header
            .builder()
            .debit(customer_account_id, amount.clone(), Some("Amount receivable".to_string()))
            .credit(sales_account_id, amount, Some("Sales revenue".to_string()))
            .build()
    }

    /// Purchase on account: debit stock, credit the vendor
    pub fn purchase(
        header: JournalHeader,
        inventory_account_id: &str,
        vendor_account_id: &str,
        amount: BigDecimal,
    ) -> LedgerResult<NewJournal> {
        header
            .builder()
            .debit(inventory_account_id, amount.clone(), Some("Stock received".to_string()))
            .credit(vendor_account_id, amount, Some("Amount payable".to_string()))
            .build()
    }

    /// Customer receipt: debit the bank, credit the customer
    pub fn receipt(
        header: JournalHeader,
        bank_account_id: &str,
        customer_account_id: &str,
        amount: BigDecimal,
    ) -> LedgerResult<NewJournal> {
        header
            .builder()
            .debit(bank_account_id, amount.clone(), None)
            .credit(customer_account_id, amount, None)
            .build()
    }

    /// Vendor payment: debit the vendor, credit the bank
    pub fn payment(
        header: JournalHeader,
        vendor_account_id: &str,
        bank_account_id: &str,
        amount: BigDecimal,
    ) -> LedgerResult<NewJournal> {
        header
            .builder()
            .debit(vendor_account_id, amount.clone(), None)
            .credit(bank_account_id, amount, None)
            .build()
    }

    /// Direct expense paid from a bank
    pub fn expense(
        header: JournalHeader,
        expense_account_id: &str,
        bank_account_id: &str,
        amount: BigDecimal,
    ) -> LedgerResult<NewJournal> {
        header
            .builder()
            .debit(expense_account_id, amount.clone(), Some("Expense".to_string()))
            .credit(bank_account_id, amount, Some("Paid from bank".to_string()))
            .build()
    }

    /// Production run: consume raw materials into a finished good
    ///
    /// Each `(account, cost)` input is credited and the finished good is
    /// debited with their total.
    pub fn production(
        header: JournalHeader,
        finished_account_id: &str,
        inputs: &[(String, BigDecimal)],
    ) -> LedgerResult<NewJournal> {
        let total: BigDecimal = inputs.iter().map(|(_, cost)| cost).sum();
        let builder = header
            .builder()
            .debit(finished_account_id, total, Some("Produced".to_string()));
        inputs
            .iter()
            .fold(builder, |builder, (account_id, cost)| {
                builder.credit(account_id.as_str(), cost.clone(), Some("Consumed".to_string()))
            })
            .build()
    }
}
