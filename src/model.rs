//! Core domain types for the two ledgers.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::Amount;
use crate::dedup::normalized_reference;
use crate::status::SemanticStatus;

/// User identifier, opaque to the reconciler.
pub type UserId = String;

/// Transfer identifier, assigned by the ledger that holds the row.
pub type TransferId = String;

/// Wallet-transaction identifier, assigned by the store.
pub type WalletTxId = u64;

/// Which backing table a transfer record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerSource {
    TransferLedger,
    WalletLedger,
}

impl LedgerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerSource::TransferLedger => "transfer-ledger",
            LedgerSource::WalletLedger => "wallet-ledger",
        }
    }
}

impl fmt::Display for LedgerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bank-deposit claim.
///
/// Once `status` is `FundsConfirmed`, `amount` and `user_id` are never
/// rewritten: the store only updates status, processing and notes fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub id: TransferId,
    /// Bank or user supplied free text, not guaranteed unique.
    pub reference: String,
    pub amount: Amount,
    pub user_id: UserId,
    pub status: SemanticStatus,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    /// Append-only audit trail.
    pub notes: String,
    pub source: LedgerSource,
    pub created_at: Option<DateTime<Utc>>,
}

impl TransferRecord {
    /// Create a freshly submitted claim in the `Pending` state.
    pub fn new(
        id: impl Into<TransferId>,
        user_id: impl Into<UserId>,
        reference: impl Into<String>,
        amount: Amount,
    ) -> Self {
        Self {
            id: id.into(),
            reference: reference.into(),
            amount,
            user_id: user_id.into(),
            status: SemanticStatus::Pending,
            processed: false,
            processed_at: None,
            notes: String::new(),
            source: LedgerSource::TransferLedger,
            created_at: Some(Utc::now()),
        }
    }

    /// Key linking this transfer to its wallet-ledger entry.
    ///
    /// Blank references fall back to the transfer id.
    pub fn correlation_key(&self) -> &str {
        let reference = self.reference.trim();
        if reference.is_empty() {
            &self.id
        } else {
            reference
        }
    }

    /// Append a line to the audit trail.
    pub fn append_note(&mut self, note: &str) {
        if !self.notes.is_empty() {
            self.notes.push('\n');
        }
        self.notes.push_str(note);
    }
}

impl fmt::Display for TransferRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transfer[{}] user={} reference={:?} amount={} status={} source={}",
            self.id, self.user_id, self.reference, self.amount, self.status, self.source
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletTxKind {
    Deposit,
    Withdrawal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletTxStatus {
    Pending,
    Completed,
    Cancelled,
}

impl WalletTxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletTxStatus::Pending => "pending",
            WalletTxStatus::Completed => "completed",
            WalletTxStatus::Cancelled => "cancelled",
        }
    }
}

impl From<SemanticStatus> for WalletTxStatus {
    fn from(status: SemanticStatus) -> Self {
        match status {
            SemanticStatus::Pending => WalletTxStatus::Pending,
            SemanticStatus::FundsConfirmed => WalletTxStatus::Completed,
            SemanticStatus::Rejected | SemanticStatus::Cancelled => WalletTxStatus::Cancelled,
        }
    }
}

/// Ledger entry backing a wallet balance change.
///
/// The only link to a transfer is the reference embedded in `description`.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletTransactionRecord {
    pub id: WalletTxId,
    pub user_id: UserId,
    /// Signed: positive is a credit.
    pub amount: Amount,
    pub kind: WalletTxKind,
    pub status: WalletTxStatus,
    pub description: String,
    /// Set when the balance increment failed after this row was completed.
    pub needs_reconciliation: Option<String>,
}

impl WalletTransactionRecord {
    /// A deposit row for `transfer`, with the correlation key in its description.
    /// The id is assigned by the store on insert.
    pub fn deposit_for(transfer: &TransferRecord, status: WalletTxStatus) -> Self {
        Self {
            id: 0,
            user_id: transfer.user_id.clone(),
            amount: transfer.amount,
            kind: WalletTxKind::Deposit,
            status,
            description: deposit_description(transfer.correlation_key()),
            needs_reconciliation: None,
        }
    }

    pub fn correlates_with(&self, user_id: &str, key: &str) -> bool {
        self.kind == WalletTxKind::Deposit
            && self.user_id == user_id
            && mentions_reference(&self.description, key)
    }
}

const REFERENCE_MARKER: &str = "ref:";

pub fn deposit_description(key: &str) -> String {
    format!("Bank transfer deposit - {REFERENCE_MARKER} {key}")
}

/// Whether `description` refers to the transfer with correlation key `key`.
///
/// References compare in their normalized form, so `DEP-900` and ` dep-900`
/// are the same transfer, as they are for deduplication. Descriptions without
/// a `ref:` marker are free text and must contain the key as a whole token,
/// ignoring case.
pub fn mentions_reference(description: &str, key: &str) -> bool {
    let wanted = normalized_reference(key);
    if wanted.is_empty() {
        return false;
    }
    if let Some((_, tail)) = description.rsplit_once(REFERENCE_MARKER) {
        return normalized_reference(tail) == wanted;
    }

    let haystack = description.to_lowercase();
    let needle = key.trim().to_lowercase();
    let is_word = |c: char| c.is_alphanumeric();
    haystack.match_indices(&needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

/// The opaque credential a caller passes along with a reconciliation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    User(UserId),
    Admin(String),
    /// Scheduled polls and notification-triggered repair.
    System,
}

impl Actor {
    pub fn is_operator(&self) -> bool {
        matches!(self, Actor::Admin(_))
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::User(id) => write!(f, "user:{id}"),
            Actor::Admin(name) => write!(f, "admin:{name}"),
            Actor::System => f.write_str("system"),
        }
    }
}
