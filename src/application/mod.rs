pub mod account_locks;
pub mod ledger;
pub mod reporting;
pub mod webhook;

pub use account_locks::*;
pub use ledger::*;
pub use reporting::*;
pub use webhook::*;
