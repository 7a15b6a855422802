pub mod decision;
pub mod directories;
pub mod paths;
pub mod probe;
pub mod reconciler;
pub mod transfer;

pub use reconciler::{Reconciler, SyncError, SyncOutcome};
