// Entities shared by the rule modules, the store, and the engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scoring::{ScoringCategory, ScoringConfig};
use crate::title_pick::TitleChoice;

pub type SeasonId = i64;
pub type ContestantId = i64;
pub type LeagueId = i64;
pub type TeamId = i64;
pub type EpisodeId = i64;
pub type ScoringEventId = i64;

/// Opaque user identifier supplied by the identity collaborator.
pub type UserId = String;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonStatus {
    Upcoming,
    Active,
    Complete,
}

impl SeasonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeasonStatus::Upcoming => "upcoming",
            SeasonStatus::Active => "active",
            SeasonStatus::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "upcoming" => Some(SeasonStatus::Upcoming),
            "active" => Some(SeasonStatus::Active),
            "complete" | "completed" => Some(SeasonStatus::Complete),
            _ => None,
        }
    }
}

impl fmt::Display for SeasonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftMode {
    Snake,
    Auction,
}

impl DraftMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftMode::Snake => "snake",
            DraftMode::Auction => "auction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "snake" => Some(DraftMode::Snake),
            "auction" => Some(DraftMode::Auction),
            _ => None,
        }
    }
}

impl fmt::Display for DraftMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a league's draft. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Pending,
    Active,
    Completed,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Pending => "pending",
            DraftStatus::Active => "active",
            DraftStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(DraftStatus::Pending),
            "active" => Some(DraftStatus::Active),
            "completed" | "complete" => Some(DraftStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Season-level entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    pub id: SeasonId,
    pub name: String,
    pub status: SeasonStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contestant {
    pub id: ContestantId,
    pub season_id: SeasonId,
    pub name: String,
    /// Current tribe, if the cast has been split into tribes.
    pub tribe: Option<String>,
    /// Draft-value bucket (1 = most valuable).
    pub tier: u32,
    /// Suggested baseline value for drafting.
    pub value: u32,
    pub is_active: bool,
}

/// Input for creating or importing a contestant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContestant {
    pub name: String,
    pub tribe: Option<String>,
    pub tier: u32,
    pub value: u32,
}

/// Administrator edit of a contestant. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContestantUpdate {
    pub value: Option<u32>,
    pub tier: Option<u32>,
    pub is_active: Option<bool>,
    pub tribe: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub season_id: SeasonId,
    pub number: u32,
    pub title: Option<String>,
    /// `None` means predictions stay open until the episode is scored.
    pub prediction_deadline: Option<DateTime<Utc>>,
    /// One-way latch: false -> true only.
    pub is_scored: bool,
    /// Who spoke the line the episode is titled after.
    pub title_speaker: Option<TitleChoice>,
}

impl Episode {
    /// Whether predictions and title picks are closed at `now`.
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.prediction_deadline.is_some_and(|deadline| now > deadline)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringEvent {
    pub id: ScoringEventId,
    pub episode_id: EpisodeId,
    pub contestant_id: ContestantId,
    pub category: ScoringCategory,
    /// Set when the event was entered for a whole tribe.
    pub tribe: Option<String>,
}

// ---------------------------------------------------------------------------
// League-level entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct League {
    pub id: LeagueId,
    pub season_id: SeasonId,
    pub name: String,
    pub commissioner_id: UserId,
    pub draft_mode: DraftMode,
    pub team_count: u32,
    /// Per-team starting budget; `None` for snake drafts.
    pub budget: Option<u32>,
    pub roster_size: u32,
    pub roster_remainder: u32,
    pub invite_code: String,
    pub draft_status: DraftStatus,
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub league_id: LeagueId,
    /// 1-based creation order within the league.
    pub slot: u32,
    pub name: String,
    /// `None` until a user claims the slot.
    pub owner_id: Option<UserId>,
    /// Auction leagues only.
    pub budget_remaining: Option<u32>,
    /// 0-based snake position, assigned once when the draft starts.
    pub draft_position: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftPick {
    pub league_id: LeagueId,
    pub team_id: TeamId,
    pub contestant_id: ContestantId,
    /// 1-based order in which the pick was made within the league.
    pub pick_number: u32,
    /// Winning bid for auction drafts.
    pub price: Option<u32>,
}

/// A team's private pre-draft planning numbers for one contestant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valuation {
    pub league_id: LeagueId,
    pub team_id: TeamId,
    pub contestant_id: ContestantId,
    pub my_value: u32,
    pub max_bid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub league_id: LeagueId,
    pub episode_id: EpisodeId,
    pub team_id: TeamId,
    pub contestant_id: ContestantId,
    pub points_allocated: u32,
    pub locked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitlePick {
    pub league_id: LeagueId,
    pub episode_id: EpisodeId,
    pub team_id: TeamId,
    pub choice: TitleChoice,
    /// Resolved by settlement; zero until the episode is scored.
    pub points_earned: i64,
}

/// Materialized standings row: points for one team as of one episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamEpisodeScore {
    pub league_id: LeagueId,
    pub team_id: TeamId,
    pub episode_id: EpisodeId,
    pub episode_number: u32,
    pub roster_points: i64,
    pub prediction_points: i64,
    pub title_points: i64,
    /// Sum of the three components for this episode alone.
    pub episode_points: i64,
    /// Running total from the season's first scored episode through this one.
    pub cumulative_points: i64,
}
