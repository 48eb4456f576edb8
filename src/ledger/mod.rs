//! Ledger module: account tree, journal posting, entity sync and code sequences

pub mod account;
pub mod core;
pub mod entity;
pub mod journal;
pub mod scope;
pub mod sequence;

pub use account::*;
pub use self::core::*;
pub use entity::*;
pub use journal::*;
pub use scope::*;
pub use sequence::*;
