// Weekly side pick: who speaks the line the episode is titled after.

use serde::{Deserialize, Serialize};

use crate::model::ContestantId;

/// A title-pick answer. The host is a valid answer even though the host is
/// never a contestant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleChoice {
    Contestant(ContestantId),
    Host,
}

impl TitleChoice {
    /// Split into the `(contestant_id, is_host)` column pair used in storage.
    pub fn to_columns(self) -> (Option<ContestantId>, bool) {
        match self {
            TitleChoice::Contestant(id) => (Some(id), false),
            TitleChoice::Host => (None, true),
        }
    }

    /// Inverse of `to_columns`. The host flag wins if both are set.
    pub fn from_columns(contestant_id: Option<ContestantId>, is_host: bool) -> Option<Self> {
        if is_host {
            Some(TitleChoice::Host)
        } else {
            contestant_id.map(TitleChoice::Contestant)
        }
    }
}

/// Points earned by a title pick once the episode's speaker is known.
///
/// An episode without a recorded speaker pays nothing.
pub fn resolve_title_pick(pick: TitleChoice, speaker: Option<TitleChoice>, points: i64) -> i64 {
    match speaker {
        Some(actual) if actual == pick => points,
        _ => 0,
    }
}
