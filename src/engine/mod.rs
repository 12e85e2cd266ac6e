//! Bank-transfer reconciliation engine.
//!
//! Brings the transfer ledger and the wallet-transaction ledger to mutually
//! consistent states. Callers may trigger the same reconciliation many times
//! and concurrently; the status write is verified by re-read and the wallet
//! credit is guarded by the wallet ledger, so the balance moves at most once.

use std::sync::Arc;

use chrono::Utc;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::dedup::deduplicate;
use crate::model::{Actor, LedgerSource, TransferId, TransferRecord, WalletTransactionRecord};
use crate::notify::{Notification, NotificationKind, Notifier};
use crate::status::SemanticStatus;
use crate::store::{LedgerStore, StoreError};

mod state;
pub use state::{TransitionDenied, check_transition};

mod writer;
pub use writer::{LedgerWriter, WriteOutcome};

mod credit;
pub use credit::{CreditCoordinator, CreditOutcome};

mod error;
pub use error::{CreditError, ReconcileError, WriteError};

/// One reconciliation request, as delivered by any trigger surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileCommand {
    pub transfer_id: TransferId,
    pub target: SemanticStatus,
    pub actor: Actor,
}

/// Aggregated outcome of one [`Reconciler::reconcile`] call.
#[derive(Debug)]
pub struct ReconciliationResult {
    pub transfer_id: TransferId,
    /// Status observed on the transfer row at the end of the call.
    pub status: SemanticStatus,
    /// The target status is in place on the transfer row.
    pub applied: bool,
    /// This call incremented the wallet balance.
    pub credited: bool,
    pub message: String,
    pub write_error: Option<WriteError>,
    pub credit_error: Option<CreditError>,
}

impl ReconciliationResult {
    fn new(transfer_id: &str, status: SemanticStatus) -> Self {
        Self {
            transfer_id: transfer_id.to_string(),
            status,
            applied: false,
            credited: false,
            message: String::new(),
            write_error: None,
            credit_error: None,
        }
    }

    /// No stage reported a failure.
    pub fn is_clean(&self) -> bool {
        self.write_error.is_none() && self.credit_error.is_none()
    }

    fn push_message(&mut self, part: impl AsRef<str>) {
        if !self.message.is_empty() {
            self.message.push_str("; ");
        }
        self.message.push_str(part.as_ref());
    }
}

/// Summary of a [`Reconciler::sweep`] pass.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Canonical transfer-ledger records found in the `FundsConfirmed` state.
    pub confirmed: usize,
    /// Transfers whose missing wallet credit was applied by this sweep.
    pub repaired: Vec<TransferId>,
    pub failed: Vec<(TransferId, CreditError)>,
}

/// Orchestrates the ledger writer and the credit coordinator.
pub struct Reconciler {
    store: Arc<dyn LedgerStore>,
    writer: LedgerWriter,
    credits: CreditCoordinator,
    notifier: Arc<dyn Notifier>,
}

/// Public API
impl Reconciler {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            writer: LedgerWriter::new(store.clone()),
            credits: CreditCoordinator::new(store.clone()),
            store,
            notifier,
        }
    }

    /// Drain a stream of commands. Failures are logged and do not stop the run.
    pub async fn run(&self, mut stream: impl Stream<Item = ReconcileCommand> + Unpin) {
        while let Some(cmd) = stream.next().await {
            if let Err(e) = self.reconcile(&cmd.transfer_id, cmd.target, &cmd.actor).await {
                warn!(transfer_id = %cmd.transfer_id, reason = %e, "reconcile skipped");
            }
        }
    }

    /// Move a transfer to `target` and, for confirmed funds, credit the wallet once.
    ///
    /// Only a missing transfer or a refused transition is returned as an
    /// error; stage failures are collected in the result.
    pub async fn reconcile(
        &self,
        transfer_id: &str,
        target: SemanticStatus,
        actor: &Actor,
    ) -> Result<ReconciliationResult, ReconcileError> {
        let current = self
            .store
            .transfer(transfer_id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound(transfer_id.to_string()))?;

        check_transition(current.status, target, actor).map_err(|denied| match denied {
            TransitionDenied::OperatorOnly => ReconcileError::NotPermitted {
                transfer: transfer_id.to_string(),
                actor: actor.to_string(),
                from: current.status,
                to: target,
            },
            TransitionDenied::NotAdjacent => {
                ReconcileError::InvalidTransition(transfer_id.to_string(), current.status, target)
            }
        })?;

        let mut result = ReconciliationResult::new(transfer_id, current.status);
        let note = format!(
            "{} {} -> {} by {actor}",
            Utc::now().to_rfc3339(),
            current.status,
            target
        );

        let mut changed = false;
        let observed = match self
            .writer
            .apply_status(transfer_id, current.status, target, None, Some(note))
            .await
        {
            Ok(outcome) => {
                result.applied = true;
                result.status = outcome.record.status;
                changed = outcome.changed;
                result.push_message(if changed {
                    format!("status set to {target}")
                } else {
                    format!("status already {target}")
                });
                Some(outcome.record)
            }
            Err(WriteError::NotFound(id)) => return Err(ReconcileError::NotFound(id)),
            Err(e) => {
                result.push_message(format!("status write failed: {e}"));
                result.write_error = Some(e);
                // a concurrent actor may still have confirmed the funds
                self.reread(transfer_id, &mut result).await?
            }
        };

        if let Some(record) = observed.filter(|r| r.status == target) {
            match target {
                SemanticStatus::FundsConfirmed => self.credit(&record, &mut result).await,
                SemanticStatus::Rejected | SemanticStatus::Cancelled => {
                    self.release(&record, &mut result).await
                }
                SemanticStatus::Pending => {}
            }
            if changed {
                self.announce(&record).await;
            }
        }

        Self::log_result(&result);
        Ok(result)
    }

    /// Credit every canonical transfer that is confirmed on the transfer
    /// ledger but has no completed wallet row.
    ///
    /// Only transfer-ledger records compete for the canonical slot, so a
    /// wallet-ledger copy never hides the row that needs repair.
    pub async fn sweep(&self, records: Vec<TransferRecord>) -> SweepReport {
        let mut report = SweepReport::default();
        let transfers = records
            .into_iter()
            .filter(|r| r.source == LedgerSource::TransferLedger)
            .collect();

        for canonical in deduplicate(transfers) {
            let record = match self.store.transfer(&canonical.id).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    debug!(transfer_id = %canonical.id, "sweep: transfer not in store");
                    continue;
                }
                Err(e) => {
                    warn!(transfer_id = %canonical.id, error = %e, "sweep: read failed");
                    continue;
                }
            };
            if record.status != SemanticStatus::FundsConfirmed {
                continue;
            }
            report.confirmed += 1;

            match self.credits.credit_if_needed(&record).await {
                Ok(CreditOutcome::Credited { .. }) => {
                    info!(
                        transfer_id = %record.id,
                        amount = %record.amount,
                        "sweep: missing credit repaired"
                    );
                    report.repaired.push(record.id);
                }
                Ok(CreditOutcome::AlreadyCredited) => {}
                Err(e) => {
                    warn!(transfer_id = %record.id, error = %e, "sweep: credit failed");
                    report.failed.push((record.id, e));
                }
            }
        }

        report
    }

    /// Wallet rows whose balance increment failed and need an operator.
    pub async fn flagged(&self) -> Result<Vec<WalletTransactionRecord>, StoreError> {
        self.store.flagged_wallet_transactions().await
    }
}

/// Private API
impl Reconciler {
    async fn reread(
        &self,
        transfer_id: &str,
        result: &mut ReconciliationResult,
    ) -> Result<Option<TransferRecord>, ReconcileError> {
        match self.store.transfer(transfer_id).await {
            Ok(Some(record)) => {
                result.status = record.status;
                Ok(Some(record))
            }
            Ok(None) => Err(ReconcileError::NotFound(transfer_id.to_string())),
            Err(e) => {
                warn!(transfer_id = %transfer_id, error = %e, "re-read after failed write failed");
                Ok(None)
            }
        }
    }

    async fn credit(&self, record: &TransferRecord, result: &mut ReconciliationResult) {
        match self.credits.credit_if_needed(record).await {
            Ok(CreditOutcome::Credited { balance, .. }) => {
                result.credited = true;
                result.push_message(format!(
                    "wallet credited {} (balance {balance})",
                    record.amount
                ));
            }
            Ok(CreditOutcome::AlreadyCredited) => result.push_message("wallet already credited"),
            Err(e) => {
                if let CreditError::BalanceMutationFailed { wallet_tx, .. } = &e {
                    self.send(Notification {
                        user_id: record.user_id.clone(),
                        kind: NotificationKind::ReconciliationRequired,
                        payload: format!("transfer {} wallet_tx {wallet_tx}", record.id),
                    })
                    .await;
                }
                result.push_message(format!("wallet credit failed: {e}"));
                result.credit_error = Some(e);
            }
        }
    }

    async fn release(&self, record: &TransferRecord, result: &mut ReconciliationResult) {
        match self.credits.cancel_pending(record).await {
            Ok(Some(wallet_tx)) => result.push_message(format!("wallet row {wallet_tx} cancelled")),
            Ok(None) => {}
            Err(e) => {
                result.push_message(format!("wallet row cancel failed: {e}"));
                result.credit_error = Some(e);
            }
        }
    }

    async fn announce(&self, record: &TransferRecord) {
        self.send(Notification {
            user_id: record.user_id.clone(),
            kind: NotificationKind::for_status(record.status),
            payload: format!("{} {}", record.correlation_key(), record.amount),
        })
        .await;
    }

    async fn send(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(
                user_id = %notification.user_id,
                kind = notification.kind.as_str(),
                error = %e,
                "notification dropped"
            );
        }
    }

    /// Small helper to log `reconcile` results
    fn log_result(result: &ReconciliationResult) {
        if result.is_clean() {
            info!(
                transfer_id = %result.transfer_id,
                status = %result.status,
                credited = result.credited,
                "reconcile applied: {}",
                result.message
            );
        } else {
            warn!(
                transfer_id = %result.transfer_id,
                status = %result.status,
                applied = result.applied,
                credited = result.credited,
                "reconcile incomplete: {}",
                result.message
            );
        }
    }
}
