//! Context Manager and Context Store.
//!
//! - [`manager`]: pure snapshot derivation (`inherit`, `rebase`, scoring)
//! - [`store`]: serialized, append-only commit of snapshot versions

pub mod manager;
pub mod store;

pub use manager::{ContextManager, ContributionDraft};
pub use store::{Admission, ContextStore, ForkCommit};
