// Weekly point allocations: validation and the pluggable scoring rule.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::model::{ContestantId, EpisodeId, Prediction};
use crate::title_pick::TitleChoice;

/// Points every team spreads across contestants each episode.
pub const ALLOCATION_BUDGET: u32 = 10;

/// One line of a submission: points placed on one contestant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub contestant_id: ContestantId,
    pub points: u32,
}

impl Allocation {
    pub fn new(contestant_id: ContestantId, points: u32) -> Self {
        Allocation {
            contestant_id,
            points,
        }
    }
}

/// Validate a submission and return the rows to store.
///
/// Zero-point lines are dropped (zero contributes nothing to the sum, so the
/// order of dropping and checking does not matter). A contestant may appear at
/// most once and the remaining points must total exactly `ALLOCATION_BUDGET`.
/// Output is sorted by contestant id.
pub fn normalize_allocations(allocations: &[Allocation]) -> EngineResult<Vec<Allocation>> {
    let mut seen: BTreeSet<ContestantId> = BTreeSet::new();
    let mut by_contestant: BTreeMap<ContestantId, u32> = BTreeMap::new();
    let mut total: u64 = 0;

    for allocation in allocations {
        if !seen.insert(allocation.contestant_id) {
            return Err(EngineError::validation(format!(
                "contestant {} appears more than once",
                allocation.contestant_id
            )));
        }
        total += u64::from(allocation.points);
        if allocation.points > 0 {
            by_contestant.insert(allocation.contestant_id, allocation.points);
        }
    }

    if total != u64::from(ALLOCATION_BUDGET) {
        return Err(EngineError::validation(format!(
            "allocations must total exactly {ALLOCATION_BUDGET} points, got {total}"
        )));
    }

    Ok(by_contestant
        .into_iter()
        .map(|(contestant_id, points)| Allocation::new(contestant_id, points))
        .collect())
}

// ---------------------------------------------------------------------------
// Outcome-based scoring
// ---------------------------------------------------------------------------

/// What happened in one scored episode, as seen by one league.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EpisodeOutcome {
    pub episode_id: EpisodeId,
    /// Contestants with an `eliminated` event this episode.
    pub eliminated: BTreeSet<ContestantId>,
    /// Event points per contestant under the league's scoring table.
    pub contestant_points: BTreeMap<ContestantId, i64>,
    pub title_speaker: Option<TitleChoice>,
}

/// Turns one stored prediction row into earned points.
///
/// Any `Fn(&Prediction, &EpisodeOutcome) -> i64` closure is a rule too.
pub trait PredictionRule: Send + Sync {
    fn earned(&self, prediction: &Prediction, outcome: &EpisodeOutcome) -> i64;
}

impl<F> PredictionRule for F
where
    F: Fn(&Prediction, &EpisodeOutcome) -> i64 + Send + Sync,
{
    fn earned(&self, prediction: &Prediction, outcome: &EpisodeOutcome) -> i64 {
        self(prediction, outcome)
    }
}

/// Default rule: points placed on a contestant are earned back when that
/// contestant leaves the game in the episode.
#[derive(Debug, Default, Clone, Copy)]
pub struct EliminationRule;

impl PredictionRule for EliminationRule {
    fn earned(&self, prediction: &Prediction, outcome: &EpisodeOutcome) -> i64 {
        if outcome.eliminated.contains(&prediction.contestant_id) {
            i64::from(prediction.points_allocated)
        } else {
            0
        }
    }
}
