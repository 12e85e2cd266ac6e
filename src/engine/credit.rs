//! Exactly-once wallet crediting for confirmed deposits.
//!
//! The wallet-transaction ledger is the idempotency anchor: the lookup for a
//! completed row always runs before any mutation, and only the caller that
//! wins the conditional completion (or insert) touches the balance.

use std::sync::Arc;

use tracing::{debug, error, info};

use super::error::CreditError;
use crate::Amount;
use crate::model::{TransferRecord, WalletTransactionRecord, WalletTxId, WalletTxStatus};
use crate::store::LedgerStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    /// This call completed the wallet row and incremented the balance.
    Credited {
        wallet_tx: WalletTxId,
        balance: Amount,
    },
    /// A completed wallet row already existed; nothing was changed.
    AlreadyCredited,
}

pub struct CreditCoordinator {
    store: Arc<dyn LedgerStore>,
}

impl CreditCoordinator {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Credit `transfer.amount` to the user's wallet unless a completed wallet
    /// row for the transfer already exists.
    ///
    /// A failed balance increment is flagged on the wallet row and reported,
    /// never retried here.
    pub async fn credit_if_needed(
        &self,
        transfer: &TransferRecord,
    ) -> Result<CreditOutcome, CreditError> {
        let key = transfer.correlation_key();
        let user_id = transfer.user_id.as_str();

        if self.already_credited(transfer).await? {
            return Ok(CreditOutcome::AlreadyCredited);
        }

        let mut wallet_tx = None;
        if let Some(pending) = self
            .store
            .find_wallet_transaction(user_id, key, WalletTxStatus::Pending)
            .await?
        {
            if self.store.complete_wallet_transaction(pending.id, key).await? {
                debug!(
                    transfer_id = %transfer.id,
                    wallet_tx = pending.id,
                    "pending wallet row completed"
                );
                wallet_tx = Some(pending.id);
            } else if self.already_credited(transfer).await? {
                return Ok(CreditOutcome::AlreadyCredited);
            }
        }

        let wallet_tx = match wallet_tx {
            Some(id) => id,
            None => {
                let row = WalletTransactionRecord::deposit_for(transfer, WalletTxStatus::Completed);
                match self
                    .store
                    .insert_completed_wallet_transaction(row, key)
                    .await?
                {
                    Some(id) => id,
                    None => {
                        debug!(transfer_id = %transfer.id, "concurrent credit won the insert");
                        return Ok(CreditOutcome::AlreadyCredited);
                    }
                }
            }
        };

        match self
            .store
            .increment_balance(user_id, transfer.amount)
            .await
        {
            Ok(balance) => {
                info!(
                    transfer_id = %transfer.id,
                    user_id = %user_id,
                    amount = %transfer.amount,
                    balance = %balance,
                    wallet_tx,
                    "wallet credited"
                );
                Ok(CreditOutcome::Credited { wallet_tx, balance })
            }
            Err(source) => {
                let reason = format!("balance increment failed: {source}");
                if let Err(e) = self.store.flag_wallet_transaction(wallet_tx, &reason).await {
                    error!(wallet_tx, error = %e, "could not flag wallet row for reconciliation");
                }
                error!(
                    transfer_id = %transfer.id,
                    user_id = %user_id,
                    wallet_tx,
                    error = %source,
                    "wallet row completed without balance change"
                );
                Err(CreditError::BalanceMutationFailed { wallet_tx, source })
            }
        }
    }

    /// Cancel the pending wallet row paired with a rejected or cancelled transfer.
    pub async fn cancel_pending(
        &self,
        transfer: &TransferRecord,
    ) -> Result<Option<WalletTxId>, CreditError> {
        let pending = self
            .store
            .find_wallet_transaction(
                &transfer.user_id,
                transfer.correlation_key(),
                WalletTxStatus::Pending,
            )
            .await?;

        match pending {
            Some(row) if self.store.cancel_wallet_transaction(row.id).await? => {
                debug!(
                    transfer_id = %transfer.id,
                    wallet_tx = row.id,
                    "pending wallet row cancelled"
                );
                Ok(Some(row.id))
            }
            _ => Ok(None),
        }
    }

    async fn already_credited(&self, transfer: &TransferRecord) -> Result<bool, CreditError> {
        let completed = self
            .store
            .find_wallet_transaction(
                &transfer.user_id,
                transfer.correlation_key(),
                WalletTxStatus::Completed,
            )
            .await?;
        if let Some(row) = &completed {
            debug!(transfer_id = %transfer.id, wallet_tx = row.id, "wallet already credited");
        }
        Ok(completed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::SemanticStatus;
    use crate::store::InMemoryLedger;

    fn confirmed(reference: &str, amount: i64) -> TransferRecord {
        let mut t = TransferRecord::new("t1", "u1", reference, Amount::from_minor(amount));
        t.status = SemanticStatus::FundsConfirmed;
        t
    }

    fn setup() -> (Arc<InMemoryLedger>, CreditCoordinator) {
        let store = Arc::new(InMemoryLedger::new());
        let coordinator = CreditCoordinator::new(store.clone());
        (store, coordinator)
    }

    #[tokio::test]
    async fn inserts_completed_row_and_credits() {
        let (store, coordinator) = setup();
        let outcome = coordinator
            .credit_if_needed(&confirmed("DEP-442", 50_000))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CreditOutcome::Credited {
                wallet_tx: 1,
                balance: Amount::from_minor(50_000)
            }
        );
        let rows = store.wallet_transactions();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, WalletTxStatus::Completed);
    }

    #[tokio::test]
    async fn completes_existing_pending_row_instead_of_inserting() {
        let (store, coordinator) = setup();
        let transfer = confirmed("DEP-001", 15_000);
        let pending = store.insert_wallet_transaction(WalletTransactionRecord::deposit_for(
            &transfer,
            WalletTxStatus::Pending,
        ));

        let outcome = coordinator.credit_if_needed(&transfer).await.unwrap();

        assert!(matches!(
            outcome,
            CreditOutcome::Credited { wallet_tx, .. } if wallet_tx == pending
        ));
        let rows = store.wallet_transactions();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, WalletTxStatus::Completed);
        assert_eq!(store.balance("u1").await.unwrap(), Amount::from_minor(15_000));
    }

    #[tokio::test]
    async fn second_credit_is_already_credited() {
        let (store, coordinator) = setup();
        let transfer = confirmed("DEP-001", 15_000);
        coordinator.credit_if_needed(&transfer).await.unwrap();

        let outcome = coordinator.credit_if_needed(&transfer).await.unwrap();

        assert_eq!(outcome, CreditOutcome::AlreadyCredited);
        assert_eq!(store.increment_count(), 1);
        assert_eq!(store.balance("u1").await.unwrap(), Amount::from_minor(15_000));
    }

    #[tokio::test]
    async fn spent_balance_does_not_trigger_recredit() {
        let (store, coordinator) = setup();
        let transfer = confirmed("DEP-001", 15_000);
        coordinator.credit_if_needed(&transfer).await.unwrap();
        store
            .increment_balance("u1", -Amount::from_minor(15_000))
            .await
            .unwrap();

        let outcome = coordinator.credit_if_needed(&transfer).await.unwrap();
        assert_eq!(outcome, CreditOutcome::AlreadyCredited);
        assert_eq!(store.balance("u1").await.unwrap(), Amount::default());
    }

    #[tokio::test]
    async fn failed_increment_flags_row() {
        let (store, coordinator) = setup();
        store.set_failing_increments(true);
        let transfer = confirmed("DEP-001", 15_000);

        let result = coordinator.credit_if_needed(&transfer).await;
        assert!(matches!(
            result,
            Err(CreditError::BalanceMutationFailed { wallet_tx: 1, .. })
        ));

        let flagged = store.flagged_wallet_transactions().await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].status, WalletTxStatus::Completed);

        // the completed row still anchors idempotency
        store.set_failing_increments(false);
        let outcome = coordinator.credit_if_needed(&transfer).await.unwrap();
        assert_eq!(outcome, CreditOutcome::AlreadyCredited);
        assert_eq!(store.balance("u1").await.unwrap(), Amount::default());
    }

    #[tokio::test]
    async fn cancel_pending_cancels_paired_row() {
        let (store, coordinator) = setup();
        let transfer = confirmed("DEP-001", 15_000);
        let id = store.insert_wallet_transaction(WalletTransactionRecord::deposit_for(
            &transfer,
            WalletTxStatus::Pending,
        ));

        assert_eq!(coordinator.cancel_pending(&transfer).await.unwrap(), Some(id));
        assert_eq!(coordinator.cancel_pending(&transfer).await.unwrap(), None);
        assert_eq!(store.wallet_transactions()[0].status, WalletTxStatus::Cancelled);
    }

    #[tokio::test]
    async fn completed_row_matches_reference_in_any_case() {
        let (store, coordinator) = setup();
        let mut wallet_side = confirmed("DEP-900", 2_000);
        wallet_side.id = "w2".to_string();
        store.insert_wallet_transaction(WalletTransactionRecord::deposit_for(
            &wallet_side,
            WalletTxStatus::Completed,
        ));
        store.seed_balance("u1", Amount::from_minor(2_000)).unwrap();

        let outcome = coordinator
            .credit_if_needed(&confirmed("dep-900", 2_000))
            .await
            .unwrap();

        assert_eq!(outcome, CreditOutcome::AlreadyCredited);
        assert_eq!(store.wallet_transactions().len(), 1);
        assert_eq!(store.increment_count(), 0);
        assert_eq!(store.balance("u1").await.unwrap(), Amount::from_minor(2_000));
    }

    #[tokio::test]
    async fn other_users_rows_are_ignored() {
        let (store, coordinator) = setup();
        let mut other = confirmed("DEP-001", 15_000);
        other.user_id = "u2".to_string();
        store.insert_wallet_transaction(WalletTransactionRecord::deposit_for(
            &other,
            WalletTxStatus::Completed,
        ));

        let outcome = coordinator
            .credit_if_needed(&confirmed("DEP-001", 15_000))
            .await
            .unwrap();
        assert!(matches!(outcome, CreditOutcome::Credited { .. }));
    }
}
