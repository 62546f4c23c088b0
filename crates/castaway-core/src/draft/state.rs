// Draft lifecycle: pending -> active -> completed.

use crate::error::{EngineError, EngineResult};
use crate::model::DraftStatus;

/// Side effect the engine must run after a status change is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    /// Same status requested again; nothing to do.
    None,
    /// The draft just opened: assign random draft positions (once).
    AssignDraftOrder,
    /// The draft closed: re-settle every scored episode so the new picks
    /// count retroactively.
    BackfillSettlement,
}

/// Validate a requested status change and say what it triggers.
///
/// Re-requesting `completed` repeats the backfill, which is idempotent.
pub fn plan_transition(from: DraftStatus, to: DraftStatus) -> EngineResult<TransitionEffect> {
    match (from, to) {
        (DraftStatus::Pending, DraftStatus::Active) => Ok(TransitionEffect::AssignDraftOrder),
        (DraftStatus::Active, DraftStatus::Completed)
        | (DraftStatus::Completed, DraftStatus::Completed) => {
            Ok(TransitionEffect::BackfillSettlement)
        }
        (from, to) if from == to => Ok(TransitionEffect::None),
        (from, to) => Err(EngineError::validation(format!(
            "draft cannot move from {from} to {to}"
        ))),
    }
}

/// Picks and bids are only accepted while the draft is active.
pub fn ensure_accepting_picks(status: DraftStatus) -> EngineResult<()> {
    if status == DraftStatus::Active {
        Ok(())
    } else {
        Err(EngineError::validation(format!(
            "draft is {status}; picks are only accepted while active"
        )))
    }
}
