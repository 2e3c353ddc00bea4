//! Built-in plugins.
//!
//! - [`BudgetPlugin`] - daily spending cap
//! - [`ReputationPlugin`] - minimum on-chain provider reputation
//! - [`SelectorPlugin`] - redirects calls to the best matching listing

mod budget;
mod reputation;
mod selector;

pub use budget::BudgetPlugin;
pub use reputation::{DEFAULT_REPUTATION_TTL, ReputationPlugin};
pub use selector::{Selection, SelectorPlugin, Strategy, UnknownStrategy};
