//! Canonical transfer status and normalization of the free-text vocabulary
//! found in both ledgers.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// The closed set of states all reconciliation logic operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SemanticStatus {
    /// Deposit claim submitted, funds not yet seen on the bank side.
    #[default]
    Pending,
    /// Funds received on the bank side; the wallet must be credited once.
    FundsConfirmed,
    Rejected,
    Cancelled,
}

impl SemanticStatus {
    /// Ranking used to pick the canonical record among duplicates.
    pub fn priority(&self) -> u8 {
        match self {
            SemanticStatus::FundsConfirmed => 3,
            SemanticStatus::Pending => 2,
            SemanticStatus::Rejected => 1,
            SemanticStatus::Cancelled => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SemanticStatus::Pending)
    }

    /// Whether the ledger writer marks the row as processed.
    pub fn marks_processed(&self) -> bool {
        matches!(
            self,
            SemanticStatus::FundsConfirmed | SemanticStatus::Rejected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticStatus::Pending => "pending",
            SemanticStatus::FundsConfirmed => "completed",
            SemanticStatus::Rejected => "rejected",
            SemanticStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SemanticStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw status string outside the known vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized status '{0}'")]
pub struct MalformedStatus(pub String);

/// Result of [`normalize`]: the status plus the side channel for unknown input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub status: SemanticStatus,
    pub unrecognized: Option<MalformedStatus>,
}

impl Normalized {
    pub fn is_recognized(&self) -> bool {
        self.unrecognized.is_none()
    }
}

fn lookup(raw: &str) -> Option<SemanticStatus> {
    match raw {
        // "receveid" is a misspelling that exists in production rows
        "received" | "reçu" | "receveid" | "completed" => Some(SemanticStatus::FundsConfirmed),
        "pending" => Some(SemanticStatus::Pending),
        "rejected" => Some(SemanticStatus::Rejected),
        "cancelled" => Some(SemanticStatus::Cancelled),
        _ => None,
    }
}

/// Map a raw status to its canonical form. Never fails: unknown input is
/// treated as `Pending` and reported through `unrecognized`.
pub fn normalize(raw: &str) -> Normalized {
    let folded = raw.trim().to_lowercase();
    match lookup(&folded) {
        Some(status) => Normalized {
            status,
            unrecognized: None,
        },
        None => Normalized {
            status: SemanticStatus::Pending,
            unrecognized: Some(MalformedStatus(raw.to_string())),
        },
    }
}

/// Strict parsing, for inputs where an unknown status must be refused
/// rather than defaulted.
impl FromStr for SemanticStatus {
    type Err = MalformedStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(&s.trim().to_lowercase()).ok_or_else(|| MalformedStatus(s.to_string()))
    }
}
