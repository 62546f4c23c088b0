// Scoring categories and the per-league category -> points table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A kind of on-show event an administrator can record for a contestant.
///
/// Unrecognized keys parse into `Other` and are worth nothing; they are kept
/// rather than rejected so a typo in an import never blocks settlement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScoringCategory {
    TribeReward,
    TribeImmunity,
    SecondPlaceImmunity,
    IndividualReward,
    VotesReceived,
    FoundIdol,
    IdolPlayed,
    Merge,
    FinalThree,
    Winner,
    /// Voted out or otherwise removed from the game this episode.
    Eliminated,
    Other(String),
}

impl ScoringCategory {
    /// Every category with a defined point value, in table order.
    pub const KNOWN: [ScoringCategory; 11] = [
        ScoringCategory::TribeReward,
        ScoringCategory::TribeImmunity,
        ScoringCategory::SecondPlaceImmunity,
        ScoringCategory::IndividualReward,
        ScoringCategory::VotesReceived,
        ScoringCategory::FoundIdol,
        ScoringCategory::IdolPlayed,
        ScoringCategory::Merge,
        ScoringCategory::FinalThree,
        ScoringCategory::Winner,
        ScoringCategory::Eliminated,
    ];

    /// Stable key used in storage, CSV imports, and config files.
    pub fn key(&self) -> &str {
        match self {
            ScoringCategory::TribeReward => "tribe_reward",
            ScoringCategory::TribeImmunity => "tribe_immunity",
            ScoringCategory::SecondPlaceImmunity => "second_place_immunity",
            ScoringCategory::IndividualReward => "individual_reward",
            ScoringCategory::VotesReceived => "votes_received",
            ScoringCategory::FoundIdol => "found_idol",
            ScoringCategory::IdolPlayed => "idol_played",
            ScoringCategory::Merge => "merge",
            ScoringCategory::FinalThree => "final_three",
            ScoringCategory::Winner => "winner",
            ScoringCategory::Eliminated => "eliminated",
            ScoringCategory::Other(key) => key,
        }
    }

    /// Parse a category key. Accepts a few legacy spellings; never fails.
    pub fn parse(s: &str) -> Self {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "tribe_reward" => ScoringCategory::TribeReward,
            "tribe_immunity" => ScoringCategory::TribeImmunity,
            "second_place_immunity" | "second_immunity" => ScoringCategory::SecondPlaceImmunity,
            "individual_reward" => ScoringCategory::IndividualReward,
            "votes_received" | "vote_received" => ScoringCategory::VotesReceived,
            "found_idol" => ScoringCategory::FoundIdol,
            "idol_played" | "successful_idol_play" => ScoringCategory::IdolPlayed,
            "merge" | "made_merge" => ScoringCategory::Merge,
            "final_three" | "final_3" => ScoringCategory::FinalThree,
            "winner" | "sole_survivor" => ScoringCategory::Winner,
            "eliminated" | "voted_out" => ScoringCategory::Eliminated,
            _ => ScoringCategory::Other(normalized),
        }
    }

    /// Whether this category applies to a whole tribe rather than one person.
    pub fn is_tribal(&self) -> bool {
        matches!(
            self,
            ScoringCategory::TribeReward
                | ScoringCategory::TribeImmunity
                | ScoringCategory::SecondPlaceImmunity
        )
    }
}

impl From<String> for ScoringCategory {
    fn from(s: String) -> Self {
        ScoringCategory::parse(&s)
    }
}

impl From<ScoringCategory> for String {
    fn from(category: ScoringCategory) -> Self {
        category.key().to_string()
    }
}

impl fmt::Display for ScoringCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ---------------------------------------------------------------------------
// Point table
// ---------------------------------------------------------------------------

/// Points awarded per category, plus the title-pick bonus.
///
/// Field names match `ScoringCategory::key`, so a `[scoring]` TOML table or a
/// stored JSON blob deserializes directly; missing fields take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub tribe_reward: i64,
    pub tribe_immunity: i64,
    pub second_place_immunity: i64,
    pub individual_reward: i64,
    pub votes_received: i64,
    pub found_idol: i64,
    pub idol_played: i64,
    pub merge: i64,
    pub final_three: i64,
    pub winner: i64,
    pub eliminated: i64,
    /// Awarded for naming the episode title's speaker.
    pub title_pick: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            tribe_reward: 1,
            tribe_immunity: 2,
            second_place_immunity: 1,
            individual_reward: 4,
            votes_received: 1,
            found_idol: 5,
            idol_played: 5,
            merge: 5,
            final_three: 10,
            winner: 20,
            eliminated: 0,
            title_pick: 1,
        }
    }
}

impl ScoringConfig {
    /// Field names accepted in a config table.
    pub const KEYS: [&'static str; 12] = [
        "tribe_reward",
        "tribe_immunity",
        "second_place_immunity",
        "individual_reward",
        "votes_received",
        "found_idol",
        "idol_played",
        "merge",
        "final_three",
        "winner",
        "eliminated",
        "title_pick",
    ];

    pub fn points_for(&self, category: &ScoringCategory) -> i64 {
        match category {
            ScoringCategory::TribeReward => self.tribe_reward,
            ScoringCategory::TribeImmunity => self.tribe_immunity,
            ScoringCategory::SecondPlaceImmunity => self.second_place_immunity,
            ScoringCategory::IndividualReward => self.individual_reward,
            ScoringCategory::VotesReceived => self.votes_received,
            ScoringCategory::FoundIdol => self.found_idol,
            ScoringCategory::IdolPlayed => self.idol_played,
            ScoringCategory::Merge => self.merge,
            ScoringCategory::FinalThree => self.final_three,
            ScoringCategory::Winner => self.winner,
            ScoringCategory::Eliminated => self.eliminated,
            ScoringCategory::Other(_) => 0,
        }
    }
}
