//! Idempotent status writes against the transfer ledger.
//!
//! A write acknowledgment is never trusted on its own: the row is re-read
//! after every attempt and the observed status decides the outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::error::WriteError;
use crate::model::TransferRecord;
use crate::status::SemanticStatus;
use crate::store::{LedgerStore, StatusUpdate, StoreError};

#[derive(Debug, Clone)]
pub struct WriteOutcome {
    /// The row as re-read after the write.
    pub record: TransferRecord,
    /// Whether this call performed the change, as opposed to finding it
    /// already in place.
    pub changed: bool,
}

pub struct LedgerWriter {
    store: Arc<dyn LedgerStore>,
}

impl LedgerWriter {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Move transfer `id` from `expected` to `target`.
    ///
    /// Tries the store procedure first, then a direct conditional update.
    /// At most two write attempts are made, both conditional on the row
    /// still holding `expected`. A row already at `target` is a no-op; a row
    /// found in any other state is reported as conflicting and left alone.
    pub async fn apply_status(
        &self,
        id: &str,
        expected: SemanticStatus,
        target: SemanticStatus,
        processed_at: Option<DateTime<Utc>>,
        note: Option<String>,
    ) -> Result<WriteOutcome, WriteError> {
        let current = self.read(id).await?;
        if current.status == target {
            debug!(transfer_id = %id, status = %target, "status already applied");
            return Ok(WriteOutcome {
                record: current,
                changed: false,
            });
        }
        if current.status != expected {
            warn!(
                transfer_id = %id,
                expected = %expected,
                observed = %current.status,
                "transfer moved since it was checked"
            );
            return Err(WriteError::StaleOrConflicting {
                id: id.to_string(),
                observed: current.status,
                target,
            });
        }

        let update = StatusUpdate::new(expected, target, processed_at, note);

        match self.store.apply_status_procedure(id, &update).await {
            Ok(acknowledged) => {
                let record = self.read(id).await?;
                if record.status == target {
                    return Ok(WriteOutcome {
                        record,
                        changed: acknowledged,
                    });
                }
                warn!(
                    transfer_id = %id,
                    acknowledged,
                    observed = %record.status,
                    target = %target,
                    "procedure write not visible on re-read, trying direct update"
                );
            }
            Err(StoreError::TransferNotFound(_)) => {
                return Err(WriteError::NotFound(id.to_string()));
            }
            Err(e) => {
                warn!(
                    transfer_id = %id,
                    error = %e,
                    "status procedure failed, trying direct update"
                );
            }
        }

        let acknowledged = match self.store.update_transfer_status(id, &update).await {
            Ok(acknowledged) => acknowledged,
            Err(StoreError::TransferNotFound(_)) => {
                return Err(WriteError::NotFound(id.to_string()));
            }
            Err(e) => {
                warn!(transfer_id = %id, error = %e, "direct status update failed");
                false
            }
        };

        let record = self.read(id).await?;
        if record.status == target {
            return Ok(WriteOutcome {
                record,
                changed: acknowledged,
            });
        }

        Err(WriteError::StaleOrConflicting {
            id: id.to_string(),
            observed: record.status,
            target,
        })
    }

    async fn read(&self, id: &str) -> Result<TransferRecord, WriteError> {
        self.store
            .transfer(id)
            .await?
            .ok_or_else(|| WriteError::NotFound(id.to_string()))
    }
}
