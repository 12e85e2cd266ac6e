//! The ledger store the reconciler runs against.
//!
//! Only row reads, conditional updates and an atomic balance increment are
//! assumed. Every method is a single store round-trip; correctness under
//! concurrent callers comes from the conditional forms, not from locks held
//! across calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::Amount;
use crate::model::{TransferRecord, UserId, WalletTransactionRecord, WalletTxId, WalletTxStatus};
use crate::status::SemanticStatus;

mod memory;
pub use memory::InMemoryLedger;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The path exists but cannot serve the call right now.
    #[error("store path unavailable: {0}")]
    Unavailable(String),
    #[error("transfer {0} not found")]
    TransferNotFound(String),
    #[error("wallet transaction {0} not found")]
    WalletTransactionNotFound(WalletTxId),
    #[error("store error: {0}")]
    Backend(String),
}

/// Fields written on a status change, computed once and shared by both write paths.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    /// Status the row must still have for the write to apply.
    pub expected: SemanticStatus,
    pub target: SemanticStatus,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    /// Appended to the audit trail when present.
    pub note: Option<String>,
}

impl StatusUpdate {
    /// Derive the processing fields from the target status.
    pub fn new(
        expected: SemanticStatus,
        target: SemanticStatus,
        processed_at: Option<DateTime<Utc>>,
        note: Option<String>,
    ) -> Self {
        let processed = target.marks_processed();
        Self {
            expected,
            target,
            processed,
            processed_at: processed.then(|| processed_at.unwrap_or_else(Utc::now)),
            note,
        }
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn transfer(&self, id: &str) -> Result<Option<TransferRecord>, StoreError>;

    async fn transfers(&self) -> Result<Vec<TransferRecord>, StoreError>;

    /// Server-side procedure applying `update` atomically.
    /// Returns whether a row changed.
    async fn apply_status_procedure(
        &self,
        id: &str,
        update: &StatusUpdate,
    ) -> Result<bool, StoreError>;

    /// Direct conditional table update: same fields as the procedure.
    async fn update_transfer_status(
        &self,
        id: &str,
        update: &StatusUpdate,
    ) -> Result<bool, StoreError>;

    /// First deposit row of `user_id` whose description carries `key`, in `status`.
    async fn find_wallet_transaction(
        &self,
        user_id: &str,
        key: &str,
        status: WalletTxStatus,
    ) -> Result<Option<WalletTransactionRecord>, StoreError>;

    /// Conditional `pending -> completed`. Returns `false` if the row was no
    /// longer pending, or another row for the same key is already completed.
    async fn complete_wallet_transaction(
        &self,
        id: WalletTxId,
        key: &str,
    ) -> Result<bool, StoreError>;

    /// Insert `record` as completed unless a completed row for the same
    /// `(user, key)` exists. Returns the new id, or `None` when refused.
    async fn insert_completed_wallet_transaction(
        &self,
        record: WalletTransactionRecord,
        key: &str,
    ) -> Result<Option<WalletTxId>, StoreError>;

    /// Conditional `pending -> cancelled`.
    async fn cancel_wallet_transaction(&self, id: WalletTxId) -> Result<bool, StoreError>;

    async fn flag_wallet_transaction(&self, id: WalletTxId, reason: &str)
    -> Result<(), StoreError>;

    async fn flagged_wallet_transactions(&self)
    -> Result<Vec<WalletTransactionRecord>, StoreError>;

    /// Atomic add to the current balance. Returns the new balance.
    async fn increment_balance(&self, user_id: &str, delta: Amount) -> Result<Amount, StoreError>;

    async fn balance(&self, user_id: &str) -> Result<Amount, StoreError>;
}

/// Balance row snapshot, as printed by the binary.
pub type BalanceRow = (UserId, Amount);
