use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{BalanceRow, LedgerStore, StatusUpdate, StoreError};
use crate::Amount;
use crate::model::{
    LedgerSource, TransferId, TransferRecord, UserId, WalletTransactionRecord, WalletTxId,
    WalletTxStatus,
};

#[derive(Debug, Default)]
struct Faults {
    procedure_unavailable: bool,
    stale_writes: bool,
    failing_increments: bool,
}

#[derive(Debug, Default)]
struct Inner {
    transfers: BTreeMap<TransferId, TransferRecord>,
    wallet: BTreeMap<WalletTxId, WalletTransactionRecord>,
    balances: BTreeMap<UserId, Amount>,
    next_wallet_id: WalletTxId,
    increments: usize,
    faults: Faults,
}

impl Inner {
    fn has_completed(&self, user_id: &str, key: &str) -> bool {
        self.wallet
            .values()
            .any(|w| w.status == WalletTxStatus::Completed && w.correlates_with(user_id, key))
    }

    fn add_to_balance(&mut self, user_id: &str, delta: Amount) -> Result<Amount, StoreError> {
        let balance = self.balances.entry(user_id.to_string()).or_default();
        *balance = balance
            .checked_add(delta)
            .ok_or_else(|| StoreError::Backend(format!("balance overflow for {user_id}")))?;
        Ok(*balance)
    }

    fn push_wallet(&mut self, mut record: WalletTransactionRecord) -> WalletTxId {
        self.next_wallet_id += 1;
        record.id = self.next_wallet_id;
        self.wallet.insert(record.id, record);
        self.next_wallet_id
    }

    fn write_status(&mut self, id: &str, update: &StatusUpdate) -> Result<bool, StoreError> {
        let stale = self.faults.stale_writes;
        let record = self
            .transfers
            .get_mut(id)
            .ok_or_else(|| StoreError::TransferNotFound(id.to_string()))?;

        if record.status != update.expected {
            return Ok(false);
        }
        // acknowledged but never applied
        if stale {
            return Ok(true);
        }

        record.status = update.target;
        record.processed = update.processed;
        record.processed_at = update.processed_at;
        if let Some(note) = &update.note {
            record.append_note(note);
        }
        Ok(true)
    }
}

/// In-process ledger store. Each trait call runs in one critical section,
/// which gives the per-row conditional semantics a database would.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: Mutex<Inner>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_transfer(&self, record: TransferRecord) {
        self.lock().transfers.insert(record.id.clone(), record);
    }

    /// Insert a wallet row as-is. Returns its store-assigned id.
    pub fn insert_wallet_transaction(&self, record: WalletTransactionRecord) -> WalletTxId {
        self.lock().push_wallet(record)
    }

    /// Seed from records read off both ledgers. Wallet-ledger records become
    /// deposit rows; completed ones are reflected in the balance.
    pub fn load(&self, records: &[TransferRecord]) -> Result<(), StoreError> {
        for record in records {
            match record.source {
                LedgerSource::TransferLedger => self.insert_transfer(record.clone()),
                LedgerSource::WalletLedger => {
                    let status = WalletTxStatus::from(record.status);
                    self.insert_wallet_transaction(WalletTransactionRecord::deposit_for(
                        record, status,
                    ));
                    if status == WalletTxStatus::Completed {
                        self.seed_balance(&record.user_id, record.amount)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn seed_balance(&self, user_id: &str, amount: Amount) -> Result<Amount, StoreError> {
        self.lock().add_to_balance(user_id, amount)
    }

    pub fn balances(&self) -> Vec<BalanceRow> {
        self.lock()
            .balances
            .iter()
            .map(|(user, amount)| (user.clone(), *amount))
            .collect()
    }

    pub fn wallet_transactions(&self) -> Vec<WalletTransactionRecord> {
        self.lock().wallet.values().cloned().collect()
    }

    /// Number of successful balance increments since creation.
    pub fn increment_count(&self) -> usize {
        self.lock().increments
    }

    pub fn set_procedure_unavailable(&self, value: bool) {
        self.lock().faults.procedure_unavailable = value;
    }

    /// Writes report success without changing the row.
    pub fn set_stale_writes(&self, value: bool) {
        self.lock().faults.stale_writes = value;
    }

    pub fn set_failing_increments(&self, value: bool) {
        self.lock().faults.failing_increments = value;
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn transfer(&self, id: &str) -> Result<Option<TransferRecord>, StoreError> {
        Ok(self.lock().transfers.get(id).cloned())
    }

    async fn transfers(&self) -> Result<Vec<TransferRecord>, StoreError> {
        Ok(self.lock().transfers.values().cloned().collect())
    }

    async fn apply_status_procedure(
        &self,
        id: &str,
        update: &StatusUpdate,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        if inner.faults.procedure_unavailable {
            return Err(StoreError::Unavailable("apply_transfer_status".to_string()));
        }
        inner.write_status(id, update)
    }

    async fn update_transfer_status(
        &self,
        id: &str,
        update: &StatusUpdate,
    ) -> Result<bool, StoreError> {
        self.lock().write_status(id, update)
    }

    async fn find_wallet_transaction(
        &self,
        user_id: &str,
        key: &str,
        status: WalletTxStatus,
    ) -> Result<Option<WalletTransactionRecord>, StoreError> {
        Ok(self
            .lock()
            .wallet
            .values()
            .find(|w| w.status == status && w.correlates_with(user_id, key))
            .cloned())
    }

    async fn complete_wallet_transaction(
        &self,
        id: WalletTxId,
        key: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let (status, user_id) = match inner.wallet.get(&id) {
            Some(row) => (row.status, row.user_id.clone()),
            None => return Err(StoreError::WalletTransactionNotFound(id)),
        };
        if status != WalletTxStatus::Pending || inner.has_completed(&user_id, key) {
            return Ok(false);
        }
        if let Some(row) = inner.wallet.get_mut(&id) {
            row.status = WalletTxStatus::Completed;
        }
        Ok(true)
    }

    async fn insert_completed_wallet_transaction(
        &self,
        mut record: WalletTransactionRecord,
        key: &str,
    ) -> Result<Option<WalletTxId>, StoreError> {
        let mut inner = self.lock();
        if inner.has_completed(&record.user_id, key) {
            return Ok(None);
        }
        record.status = WalletTxStatus::Completed;
        Ok(Some(inner.push_wallet(record)))
    }

    async fn cancel_wallet_transaction(&self, id: WalletTxId) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let row = inner
            .wallet
            .get_mut(&id)
            .ok_or(StoreError::WalletTransactionNotFound(id))?;
        if row.status != WalletTxStatus::Pending {
            return Ok(false);
        }
        row.status = WalletTxStatus::Cancelled;
        Ok(true)
    }

    async fn flag_wallet_transaction(
        &self,
        id: WalletTxId,
        reason: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let row = inner
            .wallet
            .get_mut(&id)
            .ok_or(StoreError::WalletTransactionNotFound(id))?;
        row.needs_reconciliation = Some(reason.to_string());
        Ok(())
    }

    async fn flagged_wallet_transactions(
        &self,
    ) -> Result<Vec<WalletTransactionRecord>, StoreError> {
        Ok(self
            .lock()
            .wallet
            .values()
            .filter(|w| w.needs_reconciliation.is_some())
            .cloned()
            .collect())
    }

    async fn increment_balance(&self, user_id: &str, delta: Amount) -> Result<Amount, StoreError> {
        let mut inner = self.lock();
        if inner.faults.failing_increments {
            return Err(StoreError::Backend(format!(
                "balance increment rejected for {user_id}"
            )));
        }
        let balance = inner.add_to_balance(user_id, delta)?;
        inner.increments += 1;
        Ok(balance)
    }

    async fn balance(&self, user_id: &str) -> Result<Amount, StoreError> {
        Ok(self
            .lock()
            .balances
            .get(user_id)
            .copied()
            .unwrap_or_default())
    }
}
