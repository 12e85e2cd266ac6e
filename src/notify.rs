//! User-visible notifications emitted after a confirmed ledger write.
//!
//! Delivery is best effort: a failed notification is logged and never
//! changes the outcome of a reconciliation.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::model::UserId;
use crate::status::SemanticStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    DepositConfirmed,
    DepositRejected,
    DepositCancelled,
    DepositRestored,
    /// Ledger updated but the balance was not; sent to operators.
    ReconciliationRequired,
}

impl NotificationKind {
    /// Kind announcing a transfer that moved to `status`.
    pub fn for_status(status: SemanticStatus) -> Self {
        match status {
            SemanticStatus::FundsConfirmed => NotificationKind::DepositConfirmed,
            SemanticStatus::Rejected => NotificationKind::DepositRejected,
            SemanticStatus::Cancelled => NotificationKind::DepositCancelled,
            SemanticStatus::Pending => NotificationKind::DepositRestored,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::DepositConfirmed => "deposit_confirmed",
            NotificationKind::DepositRejected => "deposit_rejected",
            NotificationKind::DepositCancelled => "deposit_cancelled",
            NotificationKind::DepositRestored => "deposit_restored",
            NotificationKind::ReconciliationRequired => "reconciliation_required",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub payload: String,
}

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Emits notifications as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            user_id = %notification.user_id,
            kind = notification.kind.as_str(),
            payload = %notification.payload,
            "notification"
        );
        Ok(())
    }
}
