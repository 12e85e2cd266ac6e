//! Error types for reconciliation.

use thiserror::Error;

use crate::model::{TransferId, WalletTxId};
use crate::status::SemanticStatus;
use crate::store::StoreError;

/// Terminal errors returned by [`Reconciler::reconcile`](super::Reconciler::reconcile).
///
/// Partial failures of individual stages are reported inside the
/// [`ReconciliationResult`](super::ReconciliationResult) instead.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("transfer {0} not found")]
    NotFound(TransferId),

    #[error("{actor} may not move transfer {transfer} from {from} to {to}")]
    NotPermitted {
        transfer: TransferId,
        actor: String,
        from: SemanticStatus,
        to: SemanticStatus,
    },

    #[error("transfer {0}: {1} -> {2} requires a restore to pending first")]
    InvalidTransition(TransferId, SemanticStatus, SemanticStatus),

    #[error("{0}")]
    Store(#[from] StoreError),
}

/// Error from the idempotent ledger writer.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("transfer {0} not found")]
    NotFound(TransferId),

    /// Neither write path produced the target status on re-read.
    #[error("transfer {id} still {observed} after both write attempts (wanted {target})")]
    StaleOrConflicting {
        id: TransferId,
        observed: SemanticStatus,
        target: SemanticStatus,
    },

    #[error("ledger write failed: {0}")]
    Store(#[from] StoreError),
}

/// Error from the wallet credit coordinator.
#[derive(Debug, Error)]
pub enum CreditError {
    /// The wallet row is completed and flagged; the balance was not changed.
    #[error("wallet transaction {wallet_tx} completed but balance increment failed: {source}")]
    BalanceMutationFailed {
        wallet_tx: WalletTxId,
        source: StoreError,
    },

    #[error("wallet ledger error: {0}")]
    Store(#[from] StoreError),
}
