// SQLite persistence layer for seasons, leagues, drafts, predictions, and
// settled standings.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::draft::roster::RosterSizing;
use crate::model::{
    Contestant, ContestantId, DraftMode, DraftPick, DraftStatus, Episode, EpisodeId, League,
    LeagueId, NewContestant, Prediction, ScoringEvent, ScoringEventId, Season, SeasonId,
    SeasonStatus, Team, TeamEpisodeScore, TeamId, TitlePick, Valuation,
};
use crate::predictions::Allocation;
use crate::scoring::{ScoringCategory, ScoringConfig};
use crate::settlement::{LeagueSettlement, SettlementInput};
use crate::title_pick::TitleChoice;

// ---------------------------------------------------------------------------
// Write inputs and atomic outcomes
// ---------------------------------------------------------------------------

/// Everything needed to insert a league and its teams in one go.
#[derive(Debug, Clone)]
pub struct NewLeague {
    pub season_id: SeasonId,
    pub name: String,
    pub commissioner_id: String,
    pub draft_mode: DraftMode,
    pub team_count: u32,
    pub budget: Option<u32>,
    pub sizing: RosterSizing,
    pub invite_code: String,
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScoringEvent {
    pub contestant_id: ContestantId,
    pub category: ScoringCategory,
    pub tribe: Option<String>,
}

/// A pick or winning bid to record atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickRequest {
    pub league_id: LeagueId,
    pub team_id: TeamId,
    pub contestant_id: ContestantId,
    /// Winning bid; `Some` debits the team's budget in the same transaction.
    pub price: Option<u32>,
    pub roster_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    Recorded(DraftPick),
    /// The draft left `active` before the pick's transaction began.
    DraftNotActive { status: DraftStatus },
    AlreadyDrafted,
    RosterFull,
    /// `expected` is `None` once every pick of the draft has been made.
    NotOnTheClock { expected: Option<TeamId> },
    InsufficientBudget { remaining: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(Team),
    AlreadyMember(Team),
    LeagueFull,
}

/// Result of a write that is only allowed before an episode is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockedWrite {
    Written,
    EpisodeScored,
}

// ---------------------------------------------------------------------------
// Column lists and row mappers
// ---------------------------------------------------------------------------

const SEASON_COLUMNS: &str = "id, name, status";
const CONTESTANT_COLUMNS: &str = "id, season_id, name, tribe, tier, value, is_active";
const EPISODE_COLUMNS: &str =
    "id, season_id, number, title, prediction_deadline, is_scored, title_contestant_id, title_host";
const EVENT_COLUMNS: &str = "id, episode_id, contestant_id, category, tribe";
const LEAGUE_COLUMNS: &str = "id, season_id, name, commissioner_id, draft_mode, team_count, \
     budget, roster_size, roster_remainder, invite_code, draft_status, scoring_config";
const TEAM_COLUMNS: &str =
    "id, league_id, slot, name, owner_id, budget_remaining, draft_position";
const PICK_COLUMNS: &str = "league_id, team_id, contestant_id, pick_number, price";
const PREDICTION_COLUMNS: &str =
    "league_id, episode_id, team_id, contestant_id, points_allocated, locked_at";
const TITLE_PICK_COLUMNS: &str =
    "league_id, episode_id, team_id, contestant_id, is_host, points_earned";
const SCORE_COLUMNS: &str = "league_id, team_id, episode_id, episode_number, roster_points, \
     prediction_points, title_points, episode_points, cumulative_points";

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_column<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_error(idx, format!("unrecognized value '{raw}'")))
}

fn season_from_row(row: &Row) -> rusqlite::Result<Season> {
    Ok(Season {
        id: row.get(0)?,
        name: row.get(1)?,
        status: parse_column(row, 2, SeasonStatus::parse)?,
    })
}

fn contestant_from_row(row: &Row) -> rusqlite::Result<Contestant> {
    Ok(Contestant {
        id: row.get(0)?,
        season_id: row.get(1)?,
        name: row.get(2)?,
        tribe: row.get(3)?,
        tier: row.get(4)?,
        value: row.get(5)?,
        is_active: row.get(6)?,
    })
}

fn episode_from_row(row: &Row) -> rusqlite::Result<Episode> {
    Ok(Episode {
        id: row.get(0)?,
        season_id: row.get(1)?,
        number: row.get(2)?,
        title: row.get(3)?,
        prediction_deadline: row.get(4)?,
        is_scored: row.get(5)?,
        title_speaker: TitleChoice::from_columns(row.get(6)?, row.get(7)?),
    })
}

fn event_from_row(row: &Row) -> rusqlite::Result<ScoringEvent> {
    let category: String = row.get(3)?;
    Ok(ScoringEvent {
        id: row.get(0)?,
        episode_id: row.get(1)?,
        contestant_id: row.get(2)?,
        category: ScoringCategory::parse(&category),
        tribe: row.get(4)?,
    })
}

fn league_from_row(row: &Row) -> rusqlite::Result<League> {
    let scoring_json: String = row.get(11)?;
    let scoring: ScoringConfig = serde_json::from_str(&scoring_json)
        .map_err(|e| conversion_error(11, format!("bad scoring config: {e}")))?;
    Ok(League {
        id: row.get(0)?,
        season_id: row.get(1)?,
        name: row.get(2)?,
        commissioner_id: row.get(3)?,
        draft_mode: parse_column(row, 4, DraftMode::parse)?,
        team_count: row.get(5)?,
        budget: row.get(6)?,
        roster_size: row.get(7)?,
        roster_remainder: row.get(8)?,
        invite_code: row.get(9)?,
        draft_status: parse_column(row, 10, DraftStatus::parse)?,
        scoring,
    })
}

fn team_from_row(row: &Row) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        league_id: row.get(1)?,
        slot: row.get(2)?,
        name: row.get(3)?,
        owner_id: row.get(4)?,
        budget_remaining: row.get(5)?,
        draft_position: row.get(6)?,
    })
}

fn pick_from_row(row: &Row) -> rusqlite::Result<DraftPick> {
    Ok(DraftPick {
        league_id: row.get(0)?,
        team_id: row.get(1)?,
        contestant_id: row.get(2)?,
        pick_number: row.get(3)?,
        price: row.get(4)?,
    })
}

fn prediction_from_row(row: &Row) -> rusqlite::Result<Prediction> {
    Ok(Prediction {
        league_id: row.get(0)?,
        episode_id: row.get(1)?,
        team_id: row.get(2)?,
        contestant_id: row.get(3)?,
        points_allocated: row.get(4)?,
        locked_at: row.get(5)?,
    })
}

/// Rows with neither a contestant nor the host flag map to `None`.
fn title_pick_from_row(row: &Row) -> rusqlite::Result<Option<TitlePick>> {
    let Some(choice) = TitleChoice::from_columns(row.get(3)?, row.get(4)?) else {
        return Ok(None);
    };
    Ok(Some(TitlePick {
        league_id: row.get(0)?,
        episode_id: row.get(1)?,
        team_id: row.get(2)?,
        choice,
        points_earned: row.get(5)?,
    }))
}

fn score_from_row(row: &Row) -> rusqlite::Result<TeamEpisodeScore> {
    Ok(TeamEpisodeScore {
        league_id: row.get(0)?,
        team_id: row.get(1)?,
        episode_id: row.get(2)?,
        episode_number: row.get(3)?,
        roster_points: row.get(4)?,
        prediction_points: row.get(5)?,
        title_points: row.get(6)?,
        episode_points: row.get(7)?,
        cumulative_points: row.get(8)?,
    })
}

// Connection-level queries shared by plain reads and transactions
// (`Transaction` derefs to `Connection`).

fn query_league(conn: &Connection, id: LeagueId) -> Result<Option<League>> {
    conn.query_row(
        &format!("SELECT {LEAGUE_COLUMNS} FROM leagues WHERE id = ?1"),
        params![id],
        league_from_row,
    )
    .optional()
    .context("failed to load league")
}

fn query_teams(conn: &Connection, league_id: LeagueId) -> Result<Vec<Team>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {TEAM_COLUMNS} FROM teams WHERE league_id = ?1 ORDER BY slot"
        ))
        .context("failed to prepare teams query")?;
    let teams = stmt
        .query_map(params![league_id], team_from_row)
        .context("failed to query teams")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map team rows")?;
    Ok(teams)
}

fn query_team(conn: &Connection, id: TeamId) -> Result<Option<Team>> {
    conn.query_row(
        &format!("SELECT {TEAM_COLUMNS} FROM teams WHERE id = ?1"),
        params![id],
        team_from_row,
    )
    .optional()
    .context("failed to load team")
}

fn query_picks(conn: &Connection, league_id: LeagueId) -> Result<Vec<DraftPick>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {PICK_COLUMNS} FROM draft_picks WHERE league_id = ?1 ORDER BY pick_number"
        ))
        .context("failed to prepare picks query")?;
    let picks = stmt
        .query_map(params![league_id], pick_from_row)
        .context("failed to query draft picks")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map draft pick rows")?;
    Ok(picks)
}

fn query_episodes(conn: &Connection, season_id: SeasonId) -> Result<Vec<Episode>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes WHERE season_id = ?1 ORDER BY number"
        ))
        .context("failed to prepare episodes query")?;
    let episodes = stmt
        .query_map(params![season_id], episode_from_row)
        .context("failed to query episodes")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map episode rows")?;
    Ok(episodes)
}

fn episode_is_scored(conn: &Connection, episode_id: EpisodeId) -> Result<bool> {
    let scored: Option<bool> = conn
        .query_row(
            "SELECT is_scored FROM episodes WHERE id = ?1",
            params![episode_id],
            |row| row.get(0),
        )
        .optional()
        .context("failed to check episode scored flag")?;
    scored.with_context(|| format!("episode {episode_id} does not exist"))
}

/// SQLite-backed store for every engine entity.
///
/// All access goes through one connection behind a mutex, and every
/// multi-statement write runs in an IMMEDIATE transaction, so concurrent
/// callers see either the state before or after a write, never a mix.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS seasons (
                id     INTEGER PRIMARY KEY AUTOINCREMENT,
                name   TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS contestants (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                season_id INTEGER NOT NULL REFERENCES seasons(id),
                name      TEXT NOT NULL,
                tribe     TEXT,
                tier      INTEGER NOT NULL,
                value     INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                UNIQUE(season_id, name)
            );

            CREATE TABLE IF NOT EXISTS episodes (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                season_id           INTEGER NOT NULL REFERENCES seasons(id),
                number              INTEGER NOT NULL,
                title               TEXT,
                prediction_deadline TEXT,
                is_scored           INTEGER NOT NULL DEFAULT 0,
                title_contestant_id INTEGER REFERENCES contestants(id),
                title_host          INTEGER NOT NULL DEFAULT 0,
                UNIQUE(season_id, number)
            );

            CREATE TABLE IF NOT EXISTS scoring_events (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                episode_id    INTEGER NOT NULL REFERENCES episodes(id),
                contestant_id INTEGER NOT NULL REFERENCES contestants(id),
                category      TEXT NOT NULL,
                tribe         TEXT
            );

            CREATE TABLE IF NOT EXISTS leagues (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                season_id        INTEGER NOT NULL REFERENCES seasons(id),
                name             TEXT NOT NULL,
                commissioner_id  TEXT NOT NULL,
                draft_mode       TEXT NOT NULL,
                team_count       INTEGER NOT NULL CHECK (team_count > 0),
                budget           INTEGER,
                roster_size      INTEGER NOT NULL,
                roster_remainder INTEGER NOT NULL,
                invite_code      TEXT NOT NULL UNIQUE,
                draft_status     TEXT NOT NULL DEFAULT 'pending',
                scoring_config   TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS teams (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                league_id        INTEGER NOT NULL REFERENCES leagues(id),
                slot             INTEGER NOT NULL,
                name             TEXT NOT NULL,
                owner_id         TEXT,
                budget_remaining INTEGER CHECK (budget_remaining >= 0),
                draft_position   INTEGER,
                UNIQUE(league_id, slot),
                UNIQUE(league_id, owner_id)
            );

            CREATE TABLE IF NOT EXISTS draft_picks (
                league_id     INTEGER NOT NULL REFERENCES leagues(id),
                team_id       INTEGER NOT NULL REFERENCES teams(id),
                contestant_id INTEGER NOT NULL REFERENCES contestants(id),
                pick_number   INTEGER NOT NULL,
                price         INTEGER,
                timestamp     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (league_id, contestant_id),
                UNIQUE(league_id, pick_number)
            );

            CREATE TABLE IF NOT EXISTS valuations (
                league_id     INTEGER NOT NULL REFERENCES leagues(id),
                team_id       INTEGER NOT NULL REFERENCES teams(id),
                contestant_id INTEGER NOT NULL REFERENCES contestants(id),
                my_value      INTEGER NOT NULL,
                max_bid       INTEGER,
                PRIMARY KEY (league_id, team_id, contestant_id)
            );

            CREATE TABLE IF NOT EXISTS predictions (
                league_id        INTEGER NOT NULL REFERENCES leagues(id),
                episode_id       INTEGER NOT NULL REFERENCES episodes(id),
                team_id          INTEGER NOT NULL REFERENCES teams(id),
                contestant_id    INTEGER NOT NULL REFERENCES contestants(id),
                points_allocated INTEGER NOT NULL CHECK (points_allocated > 0),
                locked_at        TEXT NOT NULL,
                PRIMARY KEY (league_id, episode_id, team_id, contestant_id)
            );

            CREATE TABLE IF NOT EXISTS title_picks (
                league_id     INTEGER NOT NULL REFERENCES leagues(id),
                episode_id    INTEGER NOT NULL REFERENCES episodes(id),
                team_id       INTEGER NOT NULL REFERENCES teams(id),
                contestant_id INTEGER REFERENCES contestants(id),
                is_host       INTEGER NOT NULL DEFAULT 0,
                points_earned INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (league_id, episode_id, team_id)
            );

            CREATE TABLE IF NOT EXISTS team_episode_scores (
                league_id         INTEGER NOT NULL REFERENCES leagues(id),
                team_id           INTEGER NOT NULL REFERENCES teams(id),
                episode_id        INTEGER NOT NULL REFERENCES episodes(id),
                episode_number    INTEGER NOT NULL,
                roster_points     INTEGER NOT NULL,
                prediction_points INTEGER NOT NULL,
                title_points      INTEGER NOT NULL,
                episode_points    INTEGER NOT NULL,
                cumulative_points INTEGER NOT NULL,
                PRIMARY KEY (league_id, team_id, episode_id)
            );
            ",
        )
        .context("failed to create database schema")?;

        // The one-way scored latch is enforced by the store as well as the engine.
        conn.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS episodes_scored_latch
             BEFORE UPDATE OF is_scored ON episodes
             WHEN OLD.is_scored = 1 AND NEW.is_scored = 0
             BEGIN
                 SELECT RAISE(ABORT, 'is_scored cannot be cleared');
             END;

             CREATE INDEX IF NOT EXISTS idx_scoring_events_episode ON scoring_events(episode_id);
             CREATE INDEX IF NOT EXISTS idx_leagues_season ON leagues(season_id);",
        )
        .context("failed to create triggers and indexes")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Seasons
    // ------------------------------------------------------------------

    pub fn insert_season(&self, name: &str, status: SeasonStatus) -> Result<Season> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "INSERT INTO seasons (name, status) VALUES (?1, ?2) RETURNING {SEASON_COLUMNS}"
            ),
            params![name, status.as_str()],
            season_from_row,
        )
        .with_context(|| format!("failed to insert season '{name}'"))
    }

    pub fn season(&self, id: SeasonId) -> Result<Option<Season>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {SEASON_COLUMNS} FROM seasons WHERE id = ?1"),
            params![id],
            season_from_row,
        )
        .optional()
        .context("failed to load season")
    }

    pub fn seasons(&self) -> Result<Vec<Season>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("SELECT {SEASON_COLUMNS} FROM seasons ORDER BY id"))
            .context("failed to prepare seasons query")?;
        let seasons = stmt
            .query_map([], season_from_row)
            .context("failed to query seasons")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map season rows")?;
        Ok(seasons)
    }

    /// The most recently created season whose status is `active`.
    pub fn active_season(&self) -> Result<Option<Season>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {SEASON_COLUMNS} FROM seasons WHERE status = 'active'
                 ORDER BY id DESC LIMIT 1"
            ),
            [],
            season_from_row,
        )
        .optional()
        .context("failed to query active season")
    }

    pub fn set_season_status(&self, id: SeasonId, status: SeasonStatus) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE seasons SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )
            .context("failed to update season status")?;
        Ok(changed > 0)
    }

    // ------------------------------------------------------------------
    // Contestants
    // ------------------------------------------------------------------

    pub fn insert_contestant(
        &self,
        season_id: SeasonId,
        contestant: &NewContestant,
    ) -> Result<Contestant> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "INSERT INTO contestants (season_id, name, tribe, tier, value)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 RETURNING {CONTESTANT_COLUMNS}"
            ),
            params![
                season_id,
                contestant.name,
                contestant.tribe,
                contestant.tier,
                contestant.value
            ],
            contestant_from_row,
        )
        .with_context(|| format!("failed to insert contestant '{}'", contestant.name))
    }

    /// Insert a season's cast in a single transaction. Re-importing a name
    /// updates tribe, tier, and value in place.
    pub fn import_contestants(
        &self,
        season_id: SeasonId,
        contestants: &[NewContestant],
    ) -> Result<Vec<Contestant>> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin import transaction")?;
        let mut stored = Vec::with_capacity(contestants.len());
        for contestant in contestants {
            let row = tx
                .query_row(
                    &format!(
                        "INSERT INTO contestants (season_id, name, tribe, tier, value)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT(season_id, name) DO UPDATE SET
                            tribe = excluded.tribe,
                            tier  = excluded.tier,
                            value = excluded.value
                         RETURNING {CONTESTANT_COLUMNS}"
                    ),
                    params![
                        season_id,
                        contestant.name,
                        contestant.tribe,
                        contestant.tier,
                        contestant.value
                    ],
                    contestant_from_row,
                )
                .with_context(|| format!("failed to upsert contestant '{}'", contestant.name))?;
            stored.push(row);
        }
        tx.commit().context("failed to commit contestant import")?;
        Ok(stored)
    }

    pub fn contestant(&self, id: ContestantId) -> Result<Option<Contestant>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {CONTESTANT_COLUMNS} FROM contestants WHERE id = ?1"),
            params![id],
            contestant_from_row,
        )
        .optional()
        .context("failed to load contestant")
    }

    pub fn contestants(&self, season_id: SeasonId) -> Result<Vec<Contestant>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CONTESTANT_COLUMNS} FROM contestants WHERE season_id = ?1 ORDER BY id"
            ))
            .context("failed to prepare contestants query")?;
        let contestants = stmt
            .query_map(params![season_id], contestant_from_row)
            .context("failed to query contestants")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map contestant rows")?;
        Ok(contestants)
    }

    pub fn active_contestant_count(&self, season_id: SeasonId) -> Result<u32> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*) FROM contestants WHERE season_id = ?1 AND is_active = 1",
            params![season_id],
            |row| row.get(0),
        )
        .context("failed to count active contestants")
    }

    pub fn update_contestant(&self, contestant: &Contestant) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE contestants SET tribe = ?1, tier = ?2, value = ?3, is_active = ?4
             WHERE id = ?5",
            params![
                contestant.tribe,
                contestant.tier,
                contestant.value,
                contestant.is_active,
                contestant.id
            ],
        )
        .context("failed to update contestant")?;
        Ok(())
    }

    /// Ids of the contestants currently in `tribe` (case-insensitive).
    pub fn tribe_members(&self, season_id: SeasonId, tribe: &str) -> Result<Vec<ContestantId>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id FROM contestants
                 WHERE season_id = ?1 AND tribe = ?2 COLLATE NOCASE AND is_active = 1
                 ORDER BY id",
            )
            .context("failed to prepare tribe query")?;
        let ids = stmt
            .query_map(params![season_id, tribe], |row| row.get(0))
            .context("failed to query tribe members")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map tribe member rows")?;
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Episodes
    // ------------------------------------------------------------------

    /// Insert an episode. Returns `None` if the season already has an episode
    /// with this number.
    pub fn insert_episode(
        &self,
        season_id: SeasonId,
        number: u32,
        title: Option<&str>,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<Option<Episode>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "INSERT INTO episodes (season_id, number, title, prediction_deadline)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(season_id, number) DO NOTHING
                 RETURNING {EPISODE_COLUMNS}"
            ),
            params![season_id, number, title, deadline],
            episode_from_row,
        )
        .optional()
        .context("failed to insert episode")
    }

    pub fn episode(&self, id: EpisodeId) -> Result<Option<Episode>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {EPISODE_COLUMNS} FROM episodes WHERE id = ?1"),
            params![id],
            episode_from_row,
        )
        .optional()
        .context("failed to load episode")
    }

    pub fn episodes(&self, season_id: SeasonId) -> Result<Vec<Episode>> {
        let conn = self.conn();
        query_episodes(&conn, season_id)
    }

    pub fn set_episode_deadline(
        &self,
        id: EpisodeId,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE episodes SET prediction_deadline = ?1 WHERE id = ?2",
            params![deadline, id],
        )
        .context("failed to update episode deadline")?;
        Ok(())
    }

    /// Latch `is_scored`. Returns `true` only on the call that flipped it.
    pub fn mark_episode_scored(&self, id: EpisodeId) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE episodes SET is_scored = 1 WHERE id = ?1 AND is_scored = 0",
                params![id],
            )
            .context("failed to mark episode scored")?;
        Ok(changed > 0)
    }

    pub fn set_title_speaker(&self, id: EpisodeId, speaker: Option<TitleChoice>) -> Result<()> {
        let (contestant_id, is_host) = speaker.map_or((None, false), TitleChoice::to_columns);
        let conn = self.conn();
        conn.execute(
            "UPDATE episodes SET title_contestant_id = ?1, title_host = ?2 WHERE id = ?3",
            params![contestant_id, is_host, id],
        )
        .context("failed to update episode title speaker")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scoring events
    // ------------------------------------------------------------------

    /// Insert a batch of events for one episode in a single transaction.
    pub fn insert_events(
        &self,
        episode_id: EpisodeId,
        events: &[NewScoringEvent],
    ) -> Result<Vec<ScoringEvent>> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin event transaction")?;
        let mut stored = Vec::with_capacity(events.len());
        for event in events {
            let row = tx
                .query_row(
                    &format!(
                        "INSERT INTO scoring_events (episode_id, contestant_id, category, tribe)
                         VALUES (?1, ?2, ?3, ?4)
                         RETURNING {EVENT_COLUMNS}"
                    ),
                    params![
                        episode_id,
                        event.contestant_id,
                        event.category.key(),
                        event.tribe
                    ],
                    event_from_row,
                )
                .context("failed to insert scoring event")?;
            stored.push(row);
        }
        tx.commit().context("failed to commit scoring events")?;
        Ok(stored)
    }

    /// Delete an event, returning it if it existed.
    pub fn delete_event(&self, id: ScoringEventId) -> Result<Option<ScoringEvent>> {
        let conn = self.conn();
        conn.query_row(
            &format!("DELETE FROM scoring_events WHERE id = ?1 RETURNING {EVENT_COLUMNS}"),
            params![id],
            event_from_row,
        )
        .optional()
        .context("failed to delete scoring event")
    }

    pub fn events_for_episode(&self, episode_id: EpisodeId) -> Result<Vec<ScoringEvent>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM scoring_events WHERE episode_id = ?1 ORDER BY id"
            ))
            .context("failed to prepare events query")?;
        let events = stmt
            .query_map(params![episode_id], event_from_row)
            .context("failed to query scoring events")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map scoring event rows")?;
        Ok(events)
    }

    // ------------------------------------------------------------------
    // Leagues and teams
    // ------------------------------------------------------------------

    pub fn invite_code_exists(&self, code: &str) -> Result<bool> {
        let conn = self.conn();
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM leagues WHERE invite_code = ?1)",
            params![code],
            |row| row.get(0),
        )
        .context("failed to check invite code")
    }

    /// Insert a league and its `team_count` teams in one transaction. Team
    /// slot 1 is claimed by the commissioner; the rest start unclaimed.
    ///
    /// Returns `None` if the invite code was taken in the meantime.
    pub fn insert_league(&self, league: &NewLeague) -> Result<Option<(League, Vec<Team>)>> {
        let scoring_json =
            serde_json::to_string(&league.scoring).context("failed to serialize scoring config")?;

        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin league transaction")?;

        let inserted = tx
            .query_row(
                &format!(
                    "INSERT INTO leagues (season_id, name, commissioner_id, draft_mode,
                        team_count, budget, roster_size, roster_remainder, invite_code,
                        draft_status, scoring_config)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10)
                     ON CONFLICT(invite_code) DO NOTHING
                     RETURNING {LEAGUE_COLUMNS}"
                ),
                params![
                    league.season_id,
                    league.name,
                    league.commissioner_id,
                    league.draft_mode.as_str(),
                    league.team_count,
                    league.budget,
                    league.sizing.roster_size,
                    league.sizing.remainder,
                    league.invite_code,
                    scoring_json,
                ],
                league_from_row,
            )
            .optional()
            .context("failed to insert league")?;

        let Some(stored) = inserted else {
            return Ok(None);
        };

        for slot in 1..=league.team_count {
            let owner = (slot == 1).then_some(league.commissioner_id.as_str());
            tx.execute(
                "INSERT INTO teams (league_id, slot, name, owner_id, budget_remaining)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![stored.id, slot, format!("Team {slot}"), owner, league.budget],
            )
            .with_context(|| format!("failed to insert team slot {slot}"))?;
        }

        let teams = query_teams(&tx, stored.id)?;
        tx.commit().context("failed to commit league creation")?;
        Ok(Some((stored, teams)))
    }

    pub fn league(&self, id: LeagueId) -> Result<Option<League>> {
        let conn = self.conn();
        query_league(&conn, id)
    }

    pub fn league_by_invite_code(&self, code: &str) -> Result<Option<League>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {LEAGUE_COLUMNS} FROM leagues WHERE invite_code = ?1"),
            params![code],
            league_from_row,
        )
        .optional()
        .context("failed to look up league by invite code")
    }

    pub fn leagues_in_season(&self, season_id: SeasonId) -> Result<Vec<League>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {LEAGUE_COLUMNS} FROM leagues WHERE season_id = ?1 ORDER BY id"
            ))
            .context("failed to prepare leagues query")?;
        let leagues = stmt
            .query_map(params![season_id], league_from_row)
            .context("failed to query leagues")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map league rows")?;
        Ok(leagues)
    }

    pub fn set_draft_status(&self, league_id: LeagueId, status: DraftStatus) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE leagues SET draft_status = ?1 WHERE id = ?2",
            params![status.as_str(), league_id],
        )
        .context("failed to update draft status")?;
        Ok(())
    }

    pub fn set_roster_sizing(&self, league_id: LeagueId, sizing: RosterSizing) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE leagues SET roster_size = ?1, roster_remainder = ?2 WHERE id = ?3",
            params![sizing.roster_size, sizing.remainder, league_id],
        )
        .context("failed to update roster sizing")?;
        Ok(())
    }

    pub fn set_scoring_config(&self, league_id: LeagueId, scoring: &ScoringConfig) -> Result<()> {
        let json = serde_json::to_string(scoring).context("failed to serialize scoring config")?;
        let conn = self.conn();
        conn.execute(
            "UPDATE leagues SET scoring_config = ?1 WHERE id = ?2",
            params![json, league_id],
        )
        .context("failed to update scoring config")?;
        Ok(())
    }

    pub fn teams(&self, league_id: LeagueId) -> Result<Vec<Team>> {
        let conn = self.conn();
        query_teams(&conn, league_id)
    }

    pub fn team(&self, id: TeamId) -> Result<Option<Team>> {
        let conn = self.conn();
        query_team(&conn, id)
    }

    /// Give `user_id` the lowest unclaimed team slot in the league.
    pub fn claim_open_team(&self, league_id: LeagueId, user_id: &str) -> Result<ClaimOutcome> {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin claim transaction")?;

        let existing = tx
            .query_row(
                &format!("SELECT {TEAM_COLUMNS} FROM teams WHERE league_id = ?1 AND owner_id = ?2"),
                params![league_id, user_id],
                team_from_row,
            )
            .optional()
            .context("failed to check existing membership")?;
        if let Some(team) = existing {
            return Ok(ClaimOutcome::AlreadyMember(team));
        }

        let claimed = tx
            .query_row(
                &format!(
                    "UPDATE teams SET owner_id = ?1
                     WHERE id = (SELECT id FROM teams
                                 WHERE league_id = ?2 AND owner_id IS NULL
                                 ORDER BY slot LIMIT 1)
                     RETURNING {TEAM_COLUMNS}"
                ),
                params![user_id, league_id],
                team_from_row,
            )
            .optional()
            .context("failed to claim team")?;
        tx.commit().context("failed to commit team claim")?;

        Ok(match claimed {
            Some(team) => ClaimOutcome::Claimed(team),
            None => ClaimOutcome::LeagueFull,
        })
    }

    pub fn rename_team(&self, team_id: TeamId, name: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE teams SET name = ?1 WHERE id = ?2",
            params![name, team_id],
        )
        .context("failed to rename team")?;
        Ok(())
    }

    /// Store snake draft positions, but only if none have been assigned yet.
    /// Returns `false` (and changes nothing) when positions already exist.
    pub fn assign_draft_positions(
        &self,
        league_id: LeagueId,
        positions: &[(TeamId, u32)],
    ) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin draft order transaction")?;

        let already: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM teams
                               WHERE league_id = ?1 AND draft_position IS NOT NULL)",
                params![league_id],
                |row| row.get(0),
            )
            .context("failed to check draft positions")?;
        if already {
            return Ok(false);
        }

        for &(team_id, position) in positions {
            tx.execute(
                "UPDATE teams SET draft_position = ?1 WHERE id = ?2 AND league_id = ?3",
                params![position, team_id, league_id],
            )
            .context("failed to set draft position")?;
        }
        tx.commit().context("failed to commit draft order")?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Draft picks
    // ------------------------------------------------------------------

    /// Record a pick (and debit the bid, if any) as one atomic unit.
    ///
    /// `on_the_clock` maps the number of picks already made to the team whose
    /// turn it is; pass `None` to skip the turn check (auction drafts).
    pub fn record_pick(
        &self,
        request: &PickRequest,
        on_the_clock: Option<&dyn Fn(u32) -> Option<TeamId>>,
    ) -> Result<PickOutcome> {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin pick transaction")?;

        let status = tx
            .query_row(
                "SELECT draft_status FROM leagues WHERE id = ?1",
                params![request.league_id],
                |row| parse_column(row, 0, DraftStatus::parse),
            )
            .context("failed to read draft status")?;
        if status != DraftStatus::Active {
            return Ok(PickOutcome::DraftNotActive { status });
        }

        let drafted: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM draft_picks
                 WHERE league_id = ?1 AND contestant_id = ?2)",
                params![request.league_id, request.contestant_id],
                |row| row.get(0),
            )
            .context("failed to check contestant availability")?;
        if drafted {
            return Ok(PickOutcome::AlreadyDrafted);
        }

        let rostered: u32 = tx
            .query_row(
                "SELECT COUNT(*) FROM draft_picks WHERE league_id = ?1 AND team_id = ?2",
                params![request.league_id, request.team_id],
                |row| row.get(0),
            )
            .context("failed to count team picks")?;
        if rostered >= request.roster_size {
            return Ok(PickOutcome::RosterFull);
        }

        let made: u32 = tx
            .query_row(
                "SELECT COUNT(*) FROM draft_picks WHERE league_id = ?1",
                params![request.league_id],
                |row| row.get(0),
            )
            .context("failed to count league picks")?;

        if let Some(turn) = on_the_clock {
            let expected = turn(made);
            if expected != Some(request.team_id) {
                return Ok(PickOutcome::NotOnTheClock { expected });
            }
        }

        if let Some(price) = request.price {
            let debited = tx
                .execute(
                    "UPDATE teams SET budget_remaining = budget_remaining - ?1
                     WHERE id = ?2 AND budget_remaining >= ?1",
                    params![price, request.team_id],
                )
                .context("failed to debit team budget")?;
            if debited == 0 {
                let remaining: Option<u32> = tx
                    .query_row(
                        "SELECT budget_remaining FROM teams WHERE id = ?1",
                        params![request.team_id],
                        |row| row.get(0),
                    )
                    .context("failed to read team budget")?;
                return Ok(PickOutcome::InsufficientBudget {
                    remaining: remaining.unwrap_or(0),
                });
            }
        }

        let pick = tx
            .query_row(
                &format!(
                    "INSERT INTO draft_picks (league_id, team_id, contestant_id, pick_number, price)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     RETURNING {PICK_COLUMNS}"
                ),
                params![
                    request.league_id,
                    request.team_id,
                    request.contestant_id,
                    made + 1,
                    request.price
                ],
                pick_from_row,
            )
            .context("failed to insert draft pick")?;
        tx.commit().context("failed to commit draft pick")?;
        Ok(PickOutcome::Recorded(pick))
    }

    pub fn picks(&self, league_id: LeagueId) -> Result<Vec<DraftPick>> {
        let conn = self.conn();
        query_picks(&conn, league_id)
    }

    // ------------------------------------------------------------------
    // Valuations
    // ------------------------------------------------------------------

    /// Insert or replace a team's private valuation of a contestant.
    pub fn upsert_valuation(&self, valuation: &Valuation) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO valuations (league_id, team_id, contestant_id, my_value, max_bid)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(league_id, team_id, contestant_id) DO UPDATE SET
                my_value = excluded.my_value,
                max_bid  = excluded.max_bid",
            params![
                valuation.league_id,
                valuation.team_id,
                valuation.contestant_id,
                valuation.my_value,
                valuation.max_bid
            ],
        )
        .context("failed to upsert valuation")?;
        Ok(())
    }

    pub fn valuation(
        &self,
        league_id: LeagueId,
        team_id: TeamId,
        contestant_id: ContestantId,
    ) -> Result<Option<Valuation>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT league_id, team_id, contestant_id, my_value, max_bid FROM valuations
             WHERE league_id = ?1 AND team_id = ?2 AND contestant_id = ?3",
            params![league_id, team_id, contestant_id],
            |row| {
                Ok(Valuation {
                    league_id: row.get(0)?,
                    team_id: row.get(1)?,
                    contestant_id: row.get(2)?,
                    my_value: row.get(3)?,
                    max_bid: row.get(4)?,
                })
            },
        )
        .optional()
        .context("failed to load valuation")
    }

    pub fn valuations(&self, league_id: LeagueId, team_id: TeamId) -> Result<Vec<Valuation>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT league_id, team_id, contestant_id, my_value, max_bid FROM valuations
                 WHERE league_id = ?1 AND team_id = ?2 ORDER BY contestant_id",
            )
            .context("failed to prepare valuations query")?;
        let valuations = stmt
            .query_map(params![league_id, team_id], |row| {
                Ok(Valuation {
                    league_id: row.get(0)?,
                    team_id: row.get(1)?,
                    contestant_id: row.get(2)?,
                    my_value: row.get(3)?,
                    max_bid: row.get(4)?,
                })
            })
            .context("failed to query valuations")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map valuation rows")?;
        Ok(valuations)
    }

    // ------------------------------------------------------------------
    // Predictions and title picks
    // ------------------------------------------------------------------

    /// Replace a team's allocations for an episode: delete and insert inside
    /// one IMMEDIATE transaction, re-checking the scored latch first so a
    /// submission can never land after scoring.
    pub fn replace_predictions(
        &self,
        league_id: LeagueId,
        episode_id: EpisodeId,
        team_id: TeamId,
        allocations: &[Allocation],
        locked_at: DateTime<Utc>,
    ) -> Result<LockedWrite> {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin prediction transaction")?;

        if episode_is_scored(&tx, episode_id)? {
            return Ok(LockedWrite::EpisodeScored);
        }

        tx.execute(
            "DELETE FROM predictions WHERE league_id = ?1 AND episode_id = ?2 AND team_id = ?3",
            params![league_id, episode_id, team_id],
        )
        .context("failed to clear previous predictions")?;

        for allocation in allocations {
            tx.execute(
                "INSERT INTO predictions
                    (league_id, episode_id, team_id, contestant_id, points_allocated, locked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    league_id,
                    episode_id,
                    team_id,
                    allocation.contestant_id,
                    allocation.points,
                    locked_at
                ],
            )
            .context("failed to insert prediction")?;
        }

        tx.commit().context("failed to commit predictions")?;
        Ok(LockedWrite::Written)
    }

    /// Locked prediction rows for one episode, ordered by team then contestant.
    pub fn predictions_for_episode(
        &self,
        league_id: LeagueId,
        episode_id: EpisodeId,
    ) -> Result<Vec<Prediction>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PREDICTION_COLUMNS} FROM predictions
                 WHERE league_id = ?1 AND episode_id = ?2
                 ORDER BY team_id, contestant_id"
            ))
            .context("failed to prepare predictions query")?;
        let rows = stmt
            .query_map(params![league_id, episode_id], prediction_from_row)
            .context("failed to query predictions")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map prediction rows")?;
        Ok(rows)
    }

    /// Set (`Some`) or clear (`None`) a team's title pick for an episode.
    pub fn write_title_pick(
        &self,
        league_id: LeagueId,
        episode_id: EpisodeId,
        team_id: TeamId,
        choice: Option<TitleChoice>,
    ) -> Result<LockedWrite> {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin title pick transaction")?;

        if episode_is_scored(&tx, episode_id)? {
            return Ok(LockedWrite::EpisodeScored);
        }

        match choice {
            Some(choice) => {
                let (contestant_id, is_host) = choice.to_columns();
                tx.execute(
                    "INSERT INTO title_picks
                        (league_id, episode_id, team_id, contestant_id, is_host)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(league_id, episode_id, team_id) DO UPDATE SET
                        contestant_id = excluded.contestant_id,
                        is_host       = excluded.is_host,
                        points_earned = 0",
                    params![league_id, episode_id, team_id, contestant_id, is_host],
                )
                .context("failed to upsert title pick")?;
            }
            None => {
                tx.execute(
                    "DELETE FROM title_picks
                     WHERE league_id = ?1 AND episode_id = ?2 AND team_id = ?3",
                    params![league_id, episode_id, team_id],
                )
                .context("failed to clear title pick")?;
            }
        }

        tx.commit().context("failed to commit title pick")?;
        Ok(LockedWrite::Written)
    }

    pub fn title_picks_for_episode(
        &self,
        league_id: LeagueId,
        episode_id: EpisodeId,
    ) -> Result<Vec<TitlePick>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TITLE_PICK_COLUMNS} FROM title_picks
                 WHERE league_id = ?1 AND episode_id = ?2 ORDER BY team_id"
            ))
            .context("failed to prepare title picks query")?;
        let rows = stmt
            .query_map(params![league_id, episode_id], title_pick_from_row)
            .context("failed to query title picks")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map title pick rows")?;
        Ok(rows.into_iter().flatten().collect())
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    /// Read one league's settlement inputs, compute, and write the results,
    /// all inside one IMMEDIATE transaction.
    ///
    /// Returns `None` if the league does not exist. Rows are upserted, never
    /// accumulated, so concurrent or repeated runs converge.
    pub fn settle_league_with<F>(
        &self,
        league_id: LeagueId,
        compute: F,
    ) -> Result<Option<LeagueSettlement>>
    where
        F: FnOnce(&SettlementInput) -> LeagueSettlement,
    {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin settlement transaction")?;

        let Some(league) = query_league(&tx, league_id)? else {
            return Ok(None);
        };
        let teams = query_teams(&tx, league_id)?;
        let picks = query_picks(&tx, league_id)?;
        let episodes = query_episodes(&tx, league.season_id)?;

        let events = {
            let mut stmt = tx
                .prepare(
                    "SELECT e.id, e.episode_id, e.contestant_id, e.category, e.tribe
                     FROM scoring_events e JOIN episodes ep ON ep.id = e.episode_id
                     WHERE ep.season_id = ?1 ORDER BY e.id",
                )
                .context("failed to prepare season events query")?;
            let rows = stmt
                .query_map(params![league.season_id], event_from_row)
                .context("failed to query season events")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to map season event rows")?;
            rows
        };

        let predictions = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE league_id = ?1
                     ORDER BY episode_id, team_id, contestant_id"
                ))
                .context("failed to prepare league predictions query")?;
            let rows = stmt
                .query_map(params![league_id], prediction_from_row)
                .context("failed to query league predictions")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to map league prediction rows")?;
            rows
        };

        let title_picks = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {TITLE_PICK_COLUMNS} FROM title_picks WHERE league_id = ?1
                     ORDER BY episode_id, team_id"
                ))
                .context("failed to prepare league title picks query")?;
            let rows = stmt
                .query_map(params![league_id], title_pick_from_row)
                .context("failed to query league title picks")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to map league title pick rows")?;
            rows.into_iter().flatten().collect::<Vec<_>>()
        };

        let input = SettlementInput {
            league,
            teams,
            picks,
            episodes,
            events,
            predictions,
            title_picks,
        };
        let settlement = compute(&input);

        for score in &settlement.scores {
            tx.execute(
                &format!(
                    "INSERT INTO team_episode_scores ({SCORE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(league_id, team_id, episode_id) DO UPDATE SET
                        episode_number    = excluded.episode_number,
                        roster_points     = excluded.roster_points,
                        prediction_points = excluded.prediction_points,
                        title_points      = excluded.title_points,
                        episode_points    = excluded.episode_points,
                        cumulative_points = excluded.cumulative_points"
                ),
                params![
                    score.league_id,
                    score.team_id,
                    score.episode_id,
                    score.episode_number,
                    score.roster_points,
                    score.prediction_points,
                    score.title_points,
                    score.episode_points,
                    score.cumulative_points,
                ],
            )
            .context("failed to write team episode score")?;
        }

        for result in &settlement.title_results {
            tx.execute(
                "UPDATE title_picks SET points_earned = ?1
                 WHERE league_id = ?2 AND episode_id = ?3 AND team_id = ?4",
                params![
                    result.points_earned,
                    result.league_id,
                    result.episode_id,
                    result.team_id
                ],
            )
            .context("failed to write title pick points")?;
        }

        tx.commit().context("failed to commit settlement")?;
        Ok(Some(settlement))
    }

    /// Every stored standings row for a league, by episode then team id.
    pub fn scores_for_league(&self, league_id: LeagueId) -> Result<Vec<TeamEpisodeScore>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SCORE_COLUMNS} FROM team_episode_scores WHERE league_id = ?1
                 ORDER BY episode_number, team_id"
            ))
            .context("failed to prepare scores query")?;
        let rows = stmt
            .query_map(params![league_id], score_from_row)
            .context("failed to query team episode scores")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map team episode score rows")?;
        Ok(rows)
    }

    pub fn scores_for_episode(
        &self,
        league_id: LeagueId,
        episode_id: EpisodeId,
    ) -> Result<Vec<TeamEpisodeScore>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SCORE_COLUMNS} FROM team_episode_scores
                 WHERE league_id = ?1 AND episode_id = ?2 ORDER BY team_id"
            ))
            .context("failed to prepare episode scores query")?;
        let rows = stmt
            .query_map(params![league_id, episode_id], score_from_row)
            .context("failed to query episode scores")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map episode score rows")?;
        Ok(rows)
    }
}
