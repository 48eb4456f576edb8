//! # Ledger Core
//!
//! Multi-tenant double-entry ledger: a hierarchical chart of accounts with
//! rolled-up balances, journal posting, shadow accounts that mirror external
//! business records, and per-tenant code sequences.
//!
//! ## Features
//!
//! - **Account tree**: four-level chart shared between system and tenant accounts,
//!   with materialized paths and upward balance rollup
//! - **Journal posting**: sequential line posting inside one transaction scope, with
//!   linked entity balances updated in the same scope
//! - **Entity shadows**: every customer, vendor, bank and inventory item gets a
//!   regular and a reserves account, resolved through a time-bounded cache
//! - **Code sequences**: gap-tolerant, never duplicated codes such as `INV-42`
//! - **Storage abstraction**: database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust
//! use ledger_core::{Ledger, MemoryStorage, EntityRef};
//! use bigdecimal::BigDecimal;
//!
//! # async fn run() -> ledger_core::LedgerResult<()> {
//! let ledger = Ledger::new(MemoryStorage::new());
//!
//! let mut scope = ledger.begin_scope().await?;
//! ledger.setup_system_chart(&mut scope).await?;
//! ledger
//!     .open_entity(&mut scope, "t1", &EntityRef::customer("42"), "CUS-1", "Acme", BigDecimal::from(100))
//!     .await?;
//! scope.commit().await?;
//! # Ok(())
//! # }
//! ```

pub mod ledger;
pub mod settings;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use ledger::*;
pub use settings::Settings;
pub use traits::*;
pub use types::*;
pub use utils::memory_storage::{MemoryStorage, MemoryTransaction};
