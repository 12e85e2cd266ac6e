use crate::model::Actor;
use crate::status::SemanticStatus;

/// Why a requested status change is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDenied {
    /// Only operators may restore a terminal transfer to pending.
    OperatorOnly,
    /// Terminal states only connect through pending.
    NotAdjacent,
}

/// Transfer lifecycle:
/// - same status: allowed (the write is a no-op)
/// - `Pending -> FundsConfirmed | Rejected | Cancelled`: allowed
/// - `terminal -> Pending`: operator restore
/// - `terminal -> other terminal`: refused
///
/// A restore never reverses a wallet credit.
pub fn check_transition(
    from: SemanticStatus,
    to: SemanticStatus,
    actor: &Actor,
) -> Result<(), TransitionDenied> {
    if from == to || from == SemanticStatus::Pending {
        return Ok(());
    }
    if to == SemanticStatus::Pending {
        return if actor.is_operator() {
            Ok(())
        } else {
            Err(TransitionDenied::OperatorOnly)
        };
    }
    Err(TransitionDenied::NotAdjacent)
}
