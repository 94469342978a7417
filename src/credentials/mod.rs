//! Upstream credential management
//!
//! Loads the configured API keys and hands them out least-used first, with a
//! random pick among ties.

pub mod selector;
pub mod store;

pub use selector::CredentialSelector;
pub use store::{Credential, CredentialSet, CredentialStore, MaskedUsageStat, UsageStat};
