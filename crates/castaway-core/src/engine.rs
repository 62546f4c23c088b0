// The caller-facing engine: authorization, validation, and orchestration of
// drafts, predictions, and settlement on top of the SQLite store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::Caller;
use crate::clock::{Clock, SystemClock};
use crate::db::{
    ClaimOutcome, Database, LockedWrite, NewLeague, NewScoringEvent, PickOutcome, PickRequest,
};
use crate::draft::budget::{ensure_affordable, summarize, BudgetSummary};
use crate::draft::order::{shuffled_draft_positions, PickSlot, SnakeOrder};
use crate::draft::roster::{roster_sizing, RosterSizing};
use crate::draft::state::{ensure_accepting_picks, plan_transition, TransitionEffect};
use crate::error::{EngineError, EngineResult};
use crate::import::{EventRow, EventTarget};
use crate::invite::{normalize_code, InviteCodeAllocator};
use crate::model::{
    Contestant, ContestantId, ContestantUpdate, DraftMode, DraftPick, DraftStatus, Episode,
    EpisodeId, League, LeagueId, NewContestant, Prediction, ScoringEvent, ScoringEventId, Season,
    SeasonId, SeasonStatus, Team, TeamId, TitlePick, Valuation,
};
use crate::predictions::{normalize_allocations, Allocation, EliminationRule, PredictionRule};
use crate::scoring::{ScoringCategory, ScoringConfig};
use crate::settlement::{rank_standings, settle_league, Standing};
use crate::title_pick::TitleChoice;

/// Default auction budget when neither the caller nor config supplies one.
pub const DEFAULT_BUDGET: u32 = 100;

/// Engine-wide defaults, normally filled from the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub default_budget: u32,
    pub invite: InviteCodeAllocator,
    /// Category table given to new leagues.
    pub scoring: ScoringConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            default_budget: DEFAULT_BUDGET,
            invite: InviteCodeAllocator::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Request and response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueRequest {
    pub season_id: SeasonId,
    pub name: String,
    pub draft_mode: DraftMode,
    pub team_count: u32,
    /// Auction only; falls back to the configured default.
    pub budget: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueSettled {
    pub league_id: LeagueId,
    pub rows_written: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementFailure {
    pub league_id: LeagueId,
    pub error: String,
}

/// Per-league outcome of a settlement run. Each league is settled in its own
/// transaction, so a failure in one leaves the others' rows intact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub settled: Vec<LeagueSettled>,
    pub failed: Vec<SettlementFailure>,
}

impl SettlementReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn merge(&mut self, other: SettlementReport) {
        self.settled.extend(other.settled);
        self.failed.extend(other.failed);
    }
}

/// Events written or removed, plus the re-settlement they caused (only when
/// the episode was already scored).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventChange {
    pub events: Vec<ScoringEvent>,
    pub settlement: Option<SettlementReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftTransition {
    pub league: League,
    pub effect: TransitionEffect,
    pub settlement: Option<SettlementReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnTheClock {
    pub team_id: TeamId,
    pub slot: PickSlot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamPredictions {
    pub team_id: TeamId,
    pub predictions: Vec<Prediction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standings {
    pub league_id: LeagueId,
    /// Episode the table is as of; `None` before anything is scored.
    pub episode_number: Option<u32>,
    pub rows: Vec<Standing>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    db: Database,
    settings: EngineSettings,
    clock: Arc<dyn Clock>,
    rule: Box<dyn PredictionRule>,
    rng: Mutex<StdRng>,
}

impl Engine {
    pub fn new(db: Database, settings: EngineSettings) -> Self {
        Engine {
            db,
            settings,
            clock: Arc::new(SystemClock),
            rule: Box::new(EliminationRule),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Open the SQLite database at `path` and build an engine over it.
    pub fn open(path: &str, settings: EngineSettings) -> anyhow::Result<Self> {
        Ok(Self::new(Database::open(path)?, settings))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the rule that turns prediction rows into points.
    pub fn with_rule<R: PredictionRule + 'static>(mut self, rule: R) -> Self {
        self.rule = Box::new(rule);
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().expect("rng mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub fn season(&self, id: SeasonId) -> EngineResult<Season> {
        self.db
            .season(id)?
            .ok_or_else(|| EngineError::not_found("season", id))
    }

    pub fn seasons(&self) -> EngineResult<Vec<Season>> {
        Ok(self.db.seasons()?)
    }

    /// The season currently being played, resolved from `Season.status`.
    pub fn active_season(&self) -> EngineResult<Option<Season>> {
        Ok(self.db.active_season()?)
    }

    pub fn contestants(&self, season_id: SeasonId) -> EngineResult<Vec<Contestant>> {
        self.season(season_id)?;
        Ok(self.db.contestants(season_id)?)
    }

    pub fn episode(&self, id: EpisodeId) -> EngineResult<Episode> {
        self.db
            .episode(id)?
            .ok_or_else(|| EngineError::not_found("episode", id))
    }

    pub fn episodes(&self, season_id: SeasonId) -> EngineResult<Vec<Episode>> {
        self.season(season_id)?;
        Ok(self.db.episodes(season_id)?)
    }

    pub fn events_for_episode(&self, episode_id: EpisodeId) -> EngineResult<Vec<ScoringEvent>> {
        self.episode(episode_id)?;
        Ok(self.db.events_for_episode(episode_id)?)
    }

    pub fn league(&self, id: LeagueId) -> EngineResult<League> {
        self.db
            .league(id)?
            .ok_or_else(|| EngineError::not_found("league", id))
    }

    pub fn teams(&self, league_id: LeagueId) -> EngineResult<Vec<Team>> {
        self.league(league_id)?;
        Ok(self.db.teams(league_id)?)
    }

    pub fn picks(&self, league_id: LeagueId) -> EngineResult<Vec<DraftPick>> {
        self.league(league_id)?;
        Ok(self.db.picks(league_id)?)
    }

    fn team_in(&self, league: &League, team_id: TeamId) -> EngineResult<Team> {
        match self.db.team(team_id)? {
            Some(team) if team.league_id == league.id => Ok(team),
            _ => Err(EngineError::not_found("team", team_id)),
        }
    }

    fn episode_in(&self, league: &League, episode_id: EpisodeId) -> EngineResult<Episode> {
        match self.db.episode(episode_id)? {
            Some(episode) if episode.season_id == league.season_id => Ok(episode),
            _ => Err(EngineError::not_found("episode", episode_id)),
        }
    }

    fn contestant_in(
        &self,
        season_id: SeasonId,
        contestant_id: ContestantId,
    ) -> EngineResult<Contestant> {
        match self.db.contestant(contestant_id)? {
            Some(contestant) if contestant.season_id == season_id => Ok(contestant),
            _ => Err(EngineError::not_found("contestant", contestant_id)),
        }
    }

    fn check_title_choice(
        &self,
        season_id: SeasonId,
        choice: Option<TitleChoice>,
    ) -> EngineResult<()> {
        if let Some(TitleChoice::Contestant(id)) = choice {
            self.contestant_in(season_id, id)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Seasons, contestants, episodes (platform admin)
    // ------------------------------------------------------------------

    pub fn create_season(
        &self,
        caller: &Caller,
        name: &str,
        status: SeasonStatus,
    ) -> EngineResult<Season> {
        caller.require_admin()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::validation("season name cannot be empty"));
        }
        if self.db.seasons()?.iter().any(|s| s.name == name) {
            return Err(EngineError::Conflict(format!("season '{name}' already exists")));
        }
        let season = self.db.insert_season(name, status)?;
        info!("Created season {} '{}' ({})", season.id, season.name, season.status);
        Ok(season)
    }

    pub fn set_season_status(
        &self,
        caller: &Caller,
        id: SeasonId,
        status: SeasonStatus,
    ) -> EngineResult<Season> {
        caller.require_admin()?;
        let mut season = self.season(id)?;
        self.db.set_season_status(id, status)?;
        info!("Season {} status {} -> {}", id, season.status, status);
        season.status = status;
        Ok(season)
    }

    pub fn add_contestant(
        &self,
        caller: &Caller,
        season_id: SeasonId,
        contestant: NewContestant,
    ) -> EngineResult<Contestant> {
        caller.require_admin()?;
        self.season(season_id)?;
        let contestant = NewContestant {
            name: contestant.name.trim().to_string(),
            ..contestant
        };
        if contestant.name.is_empty() {
            return Err(EngineError::validation("contestant name cannot be empty"));
        }
        if self
            .db
            .contestants(season_id)?
            .iter()
            .any(|c| c.name == contestant.name)
        {
            return Err(EngineError::Conflict(format!(
                "contestant '{}' already exists in season {season_id}",
                contestant.name
            )));
        }
        Ok(self.db.insert_contestant(season_id, &contestant)?)
    }

    /// Administrator edit of value, tier, active flag, or tribe.
    pub fn update_contestant(
        &self,
        caller: &Caller,
        contestant_id: ContestantId,
        update: ContestantUpdate,
    ) -> EngineResult<Contestant> {
        caller.require_admin()?;
        let mut contestant = self
            .db
            .contestant(contestant_id)?
            .ok_or_else(|| EngineError::not_found("contestant", contestant_id))?;
        if let Some(value) = update.value {
            contestant.value = value;
        }
        if let Some(tier) = update.tier {
            contestant.tier = tier;
        }
        if let Some(is_active) = update.is_active {
            contestant.is_active = is_active;
        }
        if let Some(tribe) = update.tribe {
            contestant.tribe = tribe;
        }
        self.db.update_contestant(&contestant)?;
        debug!("Updated contestant {} '{}'", contestant.id, contestant.name);
        Ok(contestant)
    }

    /// Load a whole cast at once; names already in the season are updated.
    pub fn import_cast(
        &self,
        caller: &Caller,
        season_id: SeasonId,
        cast: &[NewContestant],
    ) -> EngineResult<Vec<Contestant>> {
        caller.require_admin()?;
        self.season(season_id)?;
        if cast.iter().any(|c| c.name.trim().is_empty()) {
            return Err(EngineError::validation("contestant name cannot be empty"));
        }
        let stored = self.db.import_contestants(season_id, cast)?;
        info!("Imported {} contestants into season {}", stored.len(), season_id);
        Ok(stored)
    }

    pub fn add_episode(
        &self,
        caller: &Caller,
        season_id: SeasonId,
        number: u32,
        title: Option<&str>,
        deadline: Option<DateTime<Utc>>,
    ) -> EngineResult<Episode> {
        caller.require_admin()?;
        self.season(season_id)?;
        if number == 0 {
            return Err(EngineError::validation("episode numbers start at 1"));
        }
        self.db
            .insert_episode(season_id, number, title, deadline)?
            .ok_or_else(|| {
                EngineError::Conflict(format!("season {season_id} already has episode {number}"))
            })
    }

    /// Move or clear an episode's prediction deadline. Allowed for platform
    /// admins and for the commissioner of any league in the episode's season.
    ///
    /// Episodes belong to the season, not to a league, so the new deadline
    /// applies to every league drafting that season: a commissioner moving it
    /// for their own league moves it for all the others too.
    pub fn update_episode_deadline(
        &self,
        caller: &Caller,
        episode_id: EpisodeId,
        deadline: Option<DateTime<Utc>>,
    ) -> EngineResult<Episode> {
        caller.require_user()?;
        let mut episode = self.episode(episode_id)?;
        if !caller.is_admin
            && !self
                .db
                .leagues_in_season(episode.season_id)?
                .iter()
                .any(|league| caller.is_commissioner(league))
        {
            return Err(EngineError::Forbidden(
                "only a commissioner or admin may change deadlines".into(),
            ));
        }
        if episode.is_scored {
            return Err(EngineError::AlreadyScored { episode_id });
        }
        self.db.set_episode_deadline(episode_id, deadline)?;
        info!("Episode {} deadline set to {:?}", episode_id, deadline);
        episode.prediction_deadline = deadline;
        Ok(episode)
    }

    /// Record who spoke the episode's title line. Re-settles if the episode
    /// is already scored.
    pub fn set_title_speaker(
        &self,
        caller: &Caller,
        episode_id: EpisodeId,
        speaker: Option<TitleChoice>,
    ) -> EngineResult<Option<SettlementReport>> {
        caller.require_admin()?;
        let episode = self.episode(episode_id)?;
        self.check_title_choice(episode.season_id, speaker)?;
        self.db.set_title_speaker(episode_id, speaker)?;
        if episode.is_scored {
            return Ok(Some(self.settle_from(&episode)?));
        }
        Ok(None)
    }

    /// Latch the episode as scored and settle every league in its season
    /// from this episode onward. Calling it again only re-settles.
    pub fn mark_episode_scored(
        &self,
        caller: &Caller,
        episode_id: EpisodeId,
    ) -> EngineResult<SettlementReport> {
        caller.require_admin()?;
        let mut episode = self.episode(episode_id)?;
        if self.db.mark_episode_scored(episode_id)? {
            info!("Episode {} (#{}) marked scored", episode_id, episode.number);
        } else {
            debug!("Episode {} was already scored; re-settling", episode_id);
        }
        episode.is_scored = true;
        self.settle_from(&episode)
    }

    // ------------------------------------------------------------------
    // Scoring events (platform admin)
    // ------------------------------------------------------------------

    fn write_events(
        &self,
        episode: &Episode,
        events: &[NewScoringEvent],
    ) -> EngineResult<EventChange> {
        let stored = self.db.insert_events(episode.id, events)?;
        debug!("Recorded {} events for episode {}", stored.len(), episode.id);
        let settlement = if episode.is_scored {
            Some(self.settle_from(episode)?)
        } else {
            None
        };
        Ok(EventChange {
            events: stored,
            settlement,
        })
    }

    pub fn record_event(
        &self,
        caller: &Caller,
        episode_id: EpisodeId,
        contestant_id: ContestantId,
        category: ScoringCategory,
    ) -> EngineResult<EventChange> {
        caller.require_admin()?;
        let episode = self.episode(episode_id)?;
        self.contestant_in(episode.season_id, contestant_id)?;
        let event = NewScoringEvent {
            contestant_id,
            category,
            tribe: None,
        };
        self.write_events(&episode, &[event])
    }

    /// Record one event per contestant currently in `tribe`.
    pub fn record_tribe_event(
        &self,
        caller: &Caller,
        episode_id: EpisodeId,
        tribe: &str,
        category: ScoringCategory,
    ) -> EngineResult<EventChange> {
        caller.require_admin()?;
        let episode = self.episode(episode_id)?;
        let events = self.expand_tribe(episode.season_id, tribe, &category)?;
        self.write_events(&episode, &events)
    }

    fn expand_tribe(
        &self,
        season_id: SeasonId,
        tribe: &str,
        category: &ScoringCategory,
    ) -> EngineResult<Vec<NewScoringEvent>> {
        let tribe = tribe.trim();
        let members = self.db.tribe_members(season_id, tribe)?;
        if members.is_empty() {
            return Err(EngineError::validation(format!(
                "tribe '{tribe}' has no active members"
            )));
        }
        if !category.is_tribal() {
            debug!("Category '{}' recorded for a whole tribe", category);
        }
        Ok(members
            .into_iter()
            .map(|contestant_id| NewScoringEvent {
                contestant_id,
                category: category.clone(),
                tribe: Some(tribe.to_string()),
            })
            .collect())
    }

    pub fn delete_event(
        &self,
        caller: &Caller,
        event_id: ScoringEventId,
    ) -> EngineResult<EventChange> {
        caller.require_admin()?;
        let removed = self
            .db
            .delete_event(event_id)?
            .ok_or_else(|| EngineError::not_found("scoring event", event_id))?;
        let episode = self.episode(removed.episode_id)?;
        let settlement = if episode.is_scored {
            Some(self.settle_from(&episode)?)
        } else {
            None
        };
        Ok(EventChange {
            events: vec![removed],
            settlement,
        })
    }

    /// Record imported event rows, resolving contestant and tribe names
    /// against the episode's season. Any unknown name rejects the whole batch.
    pub fn import_events(
        &self,
        caller: &Caller,
        episode_id: EpisodeId,
        rows: &[EventRow],
    ) -> EngineResult<EventChange> {
        caller.require_admin()?;
        let episode = self.episode(episode_id)?;
        let by_name: BTreeMap<String, ContestantId> = self
            .db
            .contestants(episode.season_id)?
            .into_iter()
            .map(|c| (c.name.to_lowercase(), c.id))
            .collect();

        let mut events = Vec::new();
        for row in rows {
            match &row.target {
                EventTarget::Contestant(name) => {
                    let contestant_id = by_name.get(&name.to_lowercase()).copied().ok_or_else(|| {
                        EngineError::validation(format!("unknown contestant '{name}'"))
                    })?;
                    events.push(NewScoringEvent {
                        contestant_id,
                        category: row.category.clone(),
                        tribe: None,
                    });
                }
                EventTarget::Tribe(tribe) => {
                    events.extend(self.expand_tribe(episode.season_id, tribe, &row.category)?);
                }
            }
        }
        self.write_events(&episode, &events)
    }

    // ------------------------------------------------------------------
    // Leagues and membership
    // ------------------------------------------------------------------

    /// Create a league with all of its teams. The caller becomes commissioner
    /// and owner of the first team; the others wait to be claimed.
    pub fn create_league(
        &self,
        caller: &Caller,
        request: &LeagueRequest,
    ) -> EngineResult<(League, Vec<Team>)> {
        let user = caller.require_user()?;
        let name = request.name.trim();
        if name.is_empty() {
            return Err(EngineError::validation("league name cannot be empty"));
        }
        if request.team_count == 0 {
            return Err(EngineError::validation("a league needs at least one team"));
        }
        let budget = match request.draft_mode {
            DraftMode::Snake => None,
            DraftMode::Auction => {
                let budget = request.budget.unwrap_or(self.settings.default_budget);
                if budget == 0 {
                    return Err(EngineError::validation("auction budget must be positive"));
                }
                Some(budget)
            }
        };
        self.season(request.season_id)?;
        let sizing = roster_sizing(
            self.db.active_contestant_count(request.season_id)?,
            request.team_count,
        );

        let allocator = self.settings.invite;
        let invite_code = {
            let mut rng = self.rng();
            allocator.allocate(&mut *rng, |code| self.db.invite_code_exists(code))?
        };
        let Some(invite_code) = invite_code else {
            warn!(
                "Invite code allocation exhausted after {} attempts",
                allocator.max_attempts
            );
            return Err(EngineError::AllocationExhausted {
                attempts: allocator.max_attempts,
            });
        };

        let created = self.db.insert_league(&NewLeague {
            season_id: request.season_id,
            name: name.to_string(),
            commissioner_id: user.to_string(),
            draft_mode: request.draft_mode,
            team_count: request.team_count,
            budget,
            sizing,
            invite_code,
            scoring: self.settings.scoring.clone(),
        })?;
        let (league, teams) = created.ok_or_else(|| {
            EngineError::Conflict("invite code was claimed by another league".into())
        })?;

        info!(
            "Created league {} '{}' ({}, {} teams, roster size {}, code {})",
            league.id,
            league.name,
            league.draft_mode,
            league.team_count,
            league.roster_size,
            league.invite_code
        );
        Ok((league, teams))
    }

    /// Join by invite code, claiming the lowest open team slot. Joining a
    /// league the caller already plays in returns their existing team.
    pub fn join_league(&self, caller: &Caller, invite_code: &str) -> EngineResult<Team> {
        let user = caller.require_user()?;
        let code = normalize_code(invite_code);
        let league = self
            .db
            .league_by_invite_code(&code)?
            .ok_or_else(|| EngineError::not_found("league with invite code", &code))?;
        match self.db.claim_open_team(league.id, user)? {
            ClaimOutcome::Claimed(team) => {
                info!("User {} claimed slot {} in league {}", user, team.slot, league.id);
                Ok(team)
            }
            ClaimOutcome::AlreadyMember(team) => Ok(team),
            ClaimOutcome::LeagueFull => Err(EngineError::Conflict(format!(
                "league {} has no open team slots",
                league.id
            ))),
        }
    }

    pub fn rename_team(&self, caller: &Caller, team_id: TeamId, name: &str) -> EngineResult<Team> {
        let mut team = self
            .db
            .team(team_id)?
            .ok_or_else(|| EngineError::not_found("team", team_id))?;
        caller.require_team_owner(&team)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::validation("team name cannot be empty"));
        }
        self.db.rename_team(team_id, name)?;
        team.name = name.to_string();
        Ok(team)
    }

    /// Replace a league's category table and re-settle it.
    pub fn set_scoring_config(
        &self,
        caller: &Caller,
        league_id: LeagueId,
        scoring: &ScoringConfig,
    ) -> EngineResult<SettlementReport> {
        let league = self.league(league_id)?;
        caller.require_commissioner(&league)?;
        self.db.set_scoring_config(league_id, scoring)?;
        info!("League {} scoring config replaced", league_id);
        Ok(self.settle_leagues(&[league], None))
    }

    // ------------------------------------------------------------------
    // Draft
    // ------------------------------------------------------------------

    /// Move the draft to `status`, running whatever the transition triggers.
    pub fn set_draft_status(
        &self,
        caller: &Caller,
        league_id: LeagueId,
        status: DraftStatus,
    ) -> EngineResult<DraftTransition> {
        let mut league = self.league(league_id)?;
        caller.require_commissioner(&league)?;
        let effect = plan_transition(league.draft_status, status)?;

        if effect == TransitionEffect::AssignDraftOrder {
            let sizing = roster_sizing(
                self.db.active_contestant_count(league.season_id)?,
                league.team_count,
            );
            if sizing.roster_size == 0 {
                return Err(EngineError::validation(format!(
                    "not enough active contestants for {} teams",
                    league.team_count
                )));
            }
            self.open_draft(&league, sizing)?;
            league.roster_size = sizing.roster_size;
            league.roster_remainder = sizing.remainder;
        }

        if league.draft_status != status {
            self.db.set_draft_status(league_id, status)?;
            info!("League {} draft {} -> {}", league_id, league.draft_status, status);
            league.draft_status = status;
        }

        let settlement = match effect {
            TransitionEffect::BackfillSettlement => {
                let report = self.settle_leagues(std::slice::from_ref(&league), None);
                info!("League {} draft completed; backfilled settlement", league_id);
                Some(report)
            }
            _ => None,
        };

        Ok(DraftTransition {
            league,
            effect,
            settlement,
        })
    }

    fn open_draft(&self, league: &League, sizing: RosterSizing) -> EngineResult<()> {
        self.db.set_roster_sizing(league.id, sizing)?;
        let teams = self.db.teams(league.id)?;
        let positions = {
            let mut rng = self.rng();
            shuffled_draft_positions(teams.len(), &mut *rng)
        };
        let assignments: Vec<(TeamId, u32)> = teams.iter().map(|t| t.id).zip(positions).collect();
        if self.db.assign_draft_positions(league.id, &assignments)? {
            info!("League {} draft order shuffled for {} teams", league.id, teams.len());
        } else {
            debug!("League {} already has a draft order; not reshuffling", league.id);
        }
        Ok(())
    }

    /// Teams in draft-position order (empty positions sort last).
    pub fn draft_order(&self, league_id: LeagueId) -> EngineResult<Vec<Team>> {
        let mut teams = self.teams(league_id)?;
        teams.sort_by_key(|t| (t.draft_position.is_none(), t.draft_position, t.slot));
        Ok(teams)
    }

    fn snake_turns(league: &League, ordered: &[Team]) -> EngineResult<(SnakeOrder, Vec<TeamId>)> {
        if ordered.iter().any(|t| t.draft_position.is_none()) {
            return Err(EngineError::validation(format!(
                "league {} has no draft order yet",
                league.id
            )));
        }
        let order = SnakeOrder::new(ordered.len() as u32, league.roster_size);
        Ok((order, ordered.iter().map(|t| t.id).collect()))
    }

    /// Which team picks next in a snake draft, or `None` once every pick is in.
    pub fn on_the_clock(&self, league_id: LeagueId) -> EngineResult<Option<OnTheClock>> {
        let league = self.league(league_id)?;
        if league.draft_mode != DraftMode::Snake {
            return Err(EngineError::validation("auction drafts have no pick order"));
        }
        let ordered = self.draft_order(league_id)?;
        let (order, team_ids) = Self::snake_turns(&league, &ordered)?;
        let made = self.db.picks(league_id)?.len() as u32;
        Ok(order.slot_at(made).map(|slot| OnTheClock {
            team_id: team_ids[slot.team_index as usize],
            slot,
        }))
    }

    /// Snake pick by the team on the clock (or its commissioner/admin).
    pub fn make_pick(
        &self,
        caller: &Caller,
        league_id: LeagueId,
        team_id: TeamId,
        contestant_id: ContestantId,
    ) -> EngineResult<DraftPick> {
        let league = self.league(league_id)?;
        let team = self.team_in(&league, team_id)?;
        caller.require_team_manager(&league, &team)?;
        if league.draft_mode != DraftMode::Snake {
            return Err(EngineError::validation(
                "auction leagues record picks as winning bids",
            ));
        }
        ensure_accepting_picks(league.draft_status)?;
        self.draftable(&league, contestant_id)?;

        let ordered = self.draft_order(league_id)?;
        let (order, team_ids) = Self::snake_turns(&league, &ordered)?;
        let turn = |made: u32| order.slot_at(made).map(|slot| team_ids[slot.team_index as usize]);

        let request = PickRequest {
            league_id,
            team_id,
            contestant_id,
            price: None,
            roster_size: league.roster_size,
        };
        let outcome = self.db.record_pick(&request, Some(&turn))?;
        self.finish_pick(&league, &request, outcome)
    }

    /// Record an auction's winning bid. Entered by the commissioner acting
    /// as auctioneer (or an admin).
    pub fn record_auction_pick(
        &self,
        caller: &Caller,
        league_id: LeagueId,
        team_id: TeamId,
        contestant_id: ContestantId,
        price: u32,
    ) -> EngineResult<DraftPick> {
        let league = self.league(league_id)?;
        caller.require_commissioner(&league)?;
        let team = self.team_in(&league, team_id)?;
        if league.draft_mode != DraftMode::Auction {
            return Err(EngineError::validation("snake leagues do not take bids"));
        }
        ensure_accepting_picks(league.draft_status)?;
        self.draftable(&league, contestant_id)?;
        ensure_affordable(team.budget_remaining.unwrap_or(0), price)?;

        let request = PickRequest {
            league_id,
            team_id,
            contestant_id,
            price: Some(price),
            roster_size: league.roster_size,
        };
        let outcome = self.db.record_pick(&request, None)?;
        self.finish_pick(&league, &request, outcome)
    }

    fn draftable(&self, league: &League, contestant_id: ContestantId) -> EngineResult<()> {
        let contestant = self.contestant_in(league.season_id, contestant_id)?;
        if !contestant.is_active {
            return Err(EngineError::validation(format!(
                "{} is no longer in the game",
                contestant.name
            )));
        }
        Ok(())
    }

    fn finish_pick(
        &self,
        league: &League,
        request: &PickRequest,
        outcome: PickOutcome,
    ) -> EngineResult<DraftPick> {
        match outcome {
            PickOutcome::Recorded(pick) => {
                info!(
                    "League {} pick #{}: team {} took contestant {}{}",
                    league.id,
                    pick.pick_number,
                    pick.team_id,
                    pick.contestant_id,
                    pick.price.map(|p| format!(" for ${p}")).unwrap_or_default()
                );
                Ok(pick)
            }
            PickOutcome::DraftNotActive { status } => Err(EngineError::validation(format!(
                "draft is {status}; picks are only accepted while active"
            ))),
            PickOutcome::AlreadyDrafted => Err(EngineError::Conflict(format!(
                "contestant {} is already drafted in league {}",
                request.contestant_id, league.id
            ))),
            PickOutcome::RosterFull => Err(EngineError::validation(format!(
                "team {} already has {} contestants",
                request.team_id, league.roster_size
            ))),
            PickOutcome::NotOnTheClock { expected: Some(expected) } => Err(EngineError::validation(
                format!("team {expected} is on the clock, not team {}", request.team_id),
            )),
            PickOutcome::NotOnTheClock { expected: None } => {
                Err(EngineError::validation("every pick of this draft has been made"))
            }
            PickOutcome::InsufficientBudget { remaining } => Err(EngineError::InsufficientBudget {
                requested: request.price.unwrap_or(0),
                remaining,
            }),
        }
    }

    /// Spent, remaining, and max-bid per team of an auction league.
    pub fn budgets(&self, league_id: LeagueId) -> EngineResult<Vec<BudgetSummary>> {
        let league = self.league(league_id)?;
        let Some(budget) = league.budget else {
            return Err(EngineError::validation("snake leagues have no budgets"));
        };
        let teams = self.db.teams(league_id)?;
        let picks = self.db.picks(league_id)?;
        Ok(summarize(&teams, &picks, budget, league.roster_size))
    }

    /// Store a team's private valuation of a contestant.
    pub fn set_valuation(
        &self,
        caller: &Caller,
        league_id: LeagueId,
        team_id: TeamId,
        contestant_id: ContestantId,
        my_value: u32,
        max_bid: Option<u32>,
    ) -> EngineResult<Valuation> {
        let league = self.league(league_id)?;
        let team = self.team_in(&league, team_id)?;
        caller.require_team_owner(&team)?;
        self.contestant_in(league.season_id, contestant_id)?;
        let valuation = Valuation {
            league_id,
            team_id,
            contestant_id,
            my_value,
            max_bid,
        };
        self.db.upsert_valuation(&valuation)?;
        Ok(valuation)
    }

    /// A team's private valuation; `None` when none was set.
    pub fn valuation(
        &self,
        caller: &Caller,
        league_id: LeagueId,
        team_id: TeamId,
        contestant_id: ContestantId,
    ) -> EngineResult<Option<Valuation>> {
        let league = self.league(league_id)?;
        let team = self.team_in(&league, team_id)?;
        caller.require_team_owner(&team)?;
        Ok(self.db.valuation(league_id, team_id, contestant_id)?)
    }

    pub fn valuations(
        &self,
        caller: &Caller,
        league_id: LeagueId,
        team_id: TeamId,
    ) -> EngineResult<Vec<Valuation>> {
        let league = self.league(league_id)?;
        let team = self.team_in(&league, team_id)?;
        caller.require_team_owner(&team)?;
        Ok(self.db.valuations(league_id, team_id)?)
    }

    // ------------------------------------------------------------------
    // Predictions and title picks
    // ------------------------------------------------------------------

    /// Replace a team's allocations for an episode.
    ///
    /// Checked in order: ownership, allocation shape, deadline, scored latch.
    /// The store re-checks the latch inside the replacing transaction.
    pub fn submit_predictions(
        &self,
        caller: &Caller,
        league_id: LeagueId,
        episode_id: EpisodeId,
        team_id: TeamId,
        allocations: &[Allocation],
    ) -> EngineResult<Vec<Prediction>> {
        caller.require_user()?;
        let league = self.league(league_id)?;
        let team = self.team_in(&league, team_id)?;
        let episode = self.episode_in(&league, episode_id)?;
        caller.require_team_owner(&team)?;

        let rows = normalize_allocations(allocations)?;
        for row in &rows {
            match self.db.contestant(row.contestant_id)? {
                Some(c) if c.season_id == league.season_id => {}
                _ => {
                    return Err(EngineError::validation(format!(
                        "unknown contestant {}",
                        row.contestant_id
                    )))
                }
            }
        }

        let now = self.clock.now();
        if let Some(deadline) = episode.prediction_deadline {
            if now > deadline {
                return Err(EngineError::DeadlinePassed { deadline });
            }
        }
        if episode.is_scored {
            return Err(EngineError::AlreadyScored { episode_id });
        }

        match self.db.replace_predictions(league_id, episode_id, team_id, &rows, now)? {
            LockedWrite::Written => {}
            LockedWrite::EpisodeScored => return Err(EngineError::AlreadyScored { episode_id }),
        }
        info!(
            "Team {} locked {} predictions for episode {} in league {}",
            team_id,
            rows.len(),
            episode_id,
            league_id
        );

        Ok(rows
            .into_iter()
            .map(|row| Prediction {
                league_id,
                episode_id,
                team_id,
                contestant_id: row.contestant_id,
                points_allocated: row.points,
                locked_at: now,
            })
            .collect())
    }

    /// Teams whose rows the caller may see: all of them for the commissioner
    /// or an admin, or once the episode has locked; otherwise only their own.
    fn visible_teams(
        &self,
        caller: &Caller,
        league: &League,
        episode: &Episode,
    ) -> EngineResult<Option<TeamId>> {
        caller.require_user()?;
        if caller.is_commissioner(league) {
            return Ok(None);
        }
        let own = self
            .db
            .teams(league.id)?
            .into_iter()
            .find(|t| caller.owns(t))
            .ok_or_else(|| {
                EngineError::Forbidden(format!("not a member of league {}", league.id))
            })?;
        if episode.is_scored || episode.deadline_passed(self.clock.now()) {
            Ok(None)
        } else {
            Ok(Some(own.id))
        }
    }

    /// Locked predictions for an episode, grouped by team.
    pub fn predictions_for_episode(
        &self,
        caller: &Caller,
        league_id: LeagueId,
        episode_id: EpisodeId,
    ) -> EngineResult<Vec<TeamPredictions>> {
        let league = self.league(league_id)?;
        let episode = self.episode_in(&league, episode_id)?;
        let only = self.visible_teams(caller, &league, &episode)?;

        let mut grouped: BTreeMap<TeamId, Vec<Prediction>> = BTreeMap::new();
        for row in self.db.predictions_for_episode(league_id, episode_id)? {
            if only.map_or(true, |team_id| team_id == row.team_id) {
                grouped.entry(row.team_id).or_default().push(row);
            }
        }
        Ok(grouped
            .into_iter()
            .map(|(team_id, predictions)| TeamPredictions {
                team_id,
                predictions,
            })
            .collect())
    }

    /// Set (`Some`) or clear (`None`) the caller's title pick for an episode.
    pub fn set_title_pick(
        &self,
        caller: &Caller,
        league_id: LeagueId,
        episode_id: EpisodeId,
        choice: Option<TitleChoice>,
    ) -> EngineResult<Option<TitlePick>> {
        caller.require_user()?;
        let league = self.league(league_id)?;
        let episode = self.episode_in(&league, episode_id)?;
        let team = self
            .db
            .teams(league_id)?
            .into_iter()
            .find(|t| caller.owns(t))
            .ok_or_else(|| EngineError::Forbidden(format!("not a member of league {league_id}")))?;
        self.check_title_choice(league.season_id, choice)?;

        if let Some(deadline) = episode.prediction_deadline {
            if self.clock.now() > deadline {
                return Err(EngineError::DeadlinePassed { deadline });
            }
        }
        if episode.is_scored {
            return Err(EngineError::AlreadyScored { episode_id });
        }

        match self.db.write_title_pick(league_id, episode_id, team.id, choice)? {
            LockedWrite::Written => {}
            LockedWrite::EpisodeScored => return Err(EngineError::AlreadyScored { episode_id }),
        }
        debug!("Team {} title pick for episode {}: {:?}", team.id, episode_id, choice);
        Ok(choice.map(|choice| TitlePick {
            league_id,
            episode_id,
            team_id: team.id,
            choice,
            points_earned: 0,
        }))
    }

    pub fn title_picks_for_episode(
        &self,
        caller: &Caller,
        league_id: LeagueId,
        episode_id: EpisodeId,
    ) -> EngineResult<Vec<TitlePick>> {
        let league = self.league(league_id)?;
        let episode = self.episode_in(&league, episode_id)?;
        let only = self.visible_teams(caller, &league, &episode)?;
        Ok(self
            .db
            .title_picks_for_episode(league_id, episode_id)?
            .into_iter()
            .filter(|pick| only.map_or(true, |team_id| team_id == pick.team_id))
            .collect())
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    /// Settle each league in its own transaction. Failures are logged and
    /// reported; they do not stop the remaining leagues.
    fn settle_leagues(&self, leagues: &[League], from_episode: Option<u32>) -> SettlementReport {
        let mut report = SettlementReport::default();
        for league in leagues {
            let result = self.db.settle_league_with(league.id, |input| {
                settle_league(input, from_episode, self.rule.as_ref())
            });
            match result {
                Ok(Some(settlement)) => {
                    info!(
                        "Settled league {} from episode {:?}: {} rows",
                        league.id,
                        from_episode,
                        settlement.scores.len()
                    );
                    report.settled.push(LeagueSettled {
                        league_id: league.id,
                        rows_written: settlement.scores.len(),
                    });
                }
                Ok(None) => {
                    warn!("League {} disappeared before settlement", league.id);
                    report.failed.push(SettlementFailure {
                        league_id: league.id,
                        error: "league not found".into(),
                    });
                }
                Err(e) => {
                    warn!("Settlement failed for league {}: {:#}", league.id, e);
                    report.failed.push(SettlementFailure {
                        league_id: league.id,
                        error: format!("{e:#}"),
                    });
                }
            }
        }
        report
    }

    /// Settle every league in the episode's season from this episode on.
    fn settle_from(&self, episode: &Episode) -> EngineResult<SettlementReport> {
        let leagues = self.db.leagues_in_season(episode.season_id)?;
        Ok(self.settle_leagues(&leagues, Some(episode.number)))
    }

    /// Re-run settlement for a scored episode (and every later scored one).
    pub fn settle_episode(
        &self,
        caller: &Caller,
        episode_id: EpisodeId,
    ) -> EngineResult<SettlementReport> {
        caller.require_admin()?;
        let episode = self.episode(episode_id)?;
        if !episode.is_scored {
            return Err(EngineError::validation(format!(
                "episode {episode_id} has not been scored"
            )));
        }
        self.settle_from(&episode)
    }

    /// Recompute every scored episode of every league in the season.
    pub fn settle_season(
        &self,
        caller: &Caller,
        season_id: SeasonId,
    ) -> EngineResult<SettlementReport> {
        caller.require_admin()?;
        self.season(season_id)?;
        let leagues = self.db.leagues_in_season(season_id)?;
        let mut report = SettlementReport::default();
        report.merge(self.settle_leagues(&leagues, None));
        info!(
            "Season {} settlement: {} leagues settled, {} failed",
            season_id,
            report.settled.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Recompute one league from its season's first scored episode.
    pub fn backfill_league(
        &self,
        caller: &Caller,
        league_id: LeagueId,
    ) -> EngineResult<SettlementReport> {
        let league = self.league(league_id)?;
        caller.require_commissioner(&league)?;
        Ok(self.settle_leagues(&[league], None))
    }

    /// League table as of `episode_id`, or as of the latest scored episode.
    pub fn standings(
        &self,
        league_id: LeagueId,
        episode_id: Option<EpisodeId>,
    ) -> EngineResult<Standings> {
        let league = self.league(league_id)?;
        let teams = self.db.teams(league_id)?;
        let target = match episode_id {
            Some(id) => {
                let episode = self.episode_in(&league, id)?;
                if !episode.is_scored {
                    return Err(EngineError::validation(format!(
                        "episode {id} has not been scored"
                    )));
                }
                Some(episode)
            }
            None => self
                .db
                .episodes(league.season_id)?
                .into_iter()
                .filter(|e| e.is_scored)
                .max_by_key(|e| e.number),
        };
        let scores = match &target {
            Some(episode) => self.db.scores_for_episode(league_id, episode.id)?,
            None => Vec::new(),
        };
        Ok(Standings {
            league_id,
            episode_number: target.map(|e| e.number),
            rows: rank_standings(&teams, &scores),
        })
    }
}
