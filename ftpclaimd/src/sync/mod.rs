pub mod backoff;
mod claim;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod mirror;
pub mod paths;
mod reconcile;
pub mod state;
#[cfg(test)]
pub(crate) mod testing;

pub use claim::{ClaimOutcome, RejectReason};
pub use reconcile::ReconcileReport;
