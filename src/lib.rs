pub mod amount;
pub mod csv;
pub mod dedup;
pub mod engine;
pub mod model;
pub mod notify;
pub mod status;
pub mod store;

pub use amount::Amount;
pub use dedup::deduplicate;
pub use engine::{ReconcileCommand, ReconciliationResult, Reconciler};
pub use model::{Actor, TransferId, TransferRecord, UserId, WalletTransactionRecord};
pub use status::{SemanticStatus, normalize};
