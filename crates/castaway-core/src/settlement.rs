// Scoring settlement: raw events + picks + predictions -> cumulative standings.
//
// Every run recomputes totals from the first scored episode of the season.
// Nothing is added onto previously stored totals, so a run can be repeated,
// interleaved with another run, or triggered out of order (late draft,
// corrected event, episode scored after a later one) and always lands on the
// same rows.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{
    ContestantId, DraftPick, Episode, EpisodeId, League, LeagueId, Prediction, ScoringEvent,
    Team, TeamEpisodeScore, TeamId, TitlePick,
};
use crate::predictions::{EpisodeOutcome, PredictionRule};
use crate::scoring::{ScoringCategory, ScoringConfig};
use crate::title_pick::resolve_title_pick;

/// Everything settlement reads for one league, loaded in one transaction.
#[derive(Debug, Clone)]
pub struct SettlementInput {
    pub league: League,
    pub teams: Vec<Team>,
    pub picks: Vec<DraftPick>,
    /// All episodes of the league's season; unscored ones are ignored.
    pub episodes: Vec<Episode>,
    pub events: Vec<ScoringEvent>,
    pub predictions: Vec<Prediction>,
    pub title_picks: Vec<TitlePick>,
}

/// Resolved value of one title pick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitlePickResult {
    pub league_id: LeagueId,
    pub episode_id: EpisodeId,
    pub team_id: TeamId,
    pub points_earned: i64,
}

/// Rows to write back for one league.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeagueSettlement {
    pub scores: Vec<TeamEpisodeScore>,
    pub title_results: Vec<TitlePickResult>,
}

/// Summarize one episode's events under a league's scoring table.
pub fn episode_outcome(
    episode: &Episode,
    events: &[&ScoringEvent],
    config: &ScoringConfig,
) -> EpisodeOutcome {
    let mut outcome = EpisodeOutcome {
        episode_id: episode.id,
        title_speaker: episode.title_speaker,
        ..EpisodeOutcome::default()
    };
    for event in events {
        if event.category == ScoringCategory::Eliminated {
            outcome.eliminated.insert(event.contestant_id);
        }
        *outcome
            .contestant_points
            .entry(event.contestant_id)
            .or_insert(0) += config.points_for(&event.category);
    }
    outcome
}

/// Compute standings rows for every scored episode of the league's season.
///
/// With `from_episode = Some(n)` only rows for scored episodes numbered `n`
/// or later are returned (earlier rows cannot change when `n` changes);
/// cumulative totals still start from the first scored episode.
pub fn settle_league(
    input: &SettlementInput,
    from_episode: Option<u32>,
    rule: &dyn PredictionRule,
) -> LeagueSettlement {
    let league_id = input.league.id;
    let config = &input.league.scoring;

    let mut scored: Vec<&Episode> = input.episodes.iter().filter(|e| e.is_scored).collect();
    scored.sort_by_key(|e| (e.number, e.id));

    let mut teams: Vec<&Team> = input.teams.iter().collect();
    teams.sort_by_key(|t| (t.slot, t.id));

    let owner_of: BTreeMap<ContestantId, TeamId> = input
        .picks
        .iter()
        .map(|p| (p.contestant_id, p.team_id))
        .collect();

    let mut events_by_episode: BTreeMap<EpisodeId, Vec<&ScoringEvent>> = BTreeMap::new();
    for event in &input.events {
        events_by_episode.entry(event.episode_id).or_default().push(event);
    }

    let mut predictions_by_key: BTreeMap<(EpisodeId, TeamId), Vec<&Prediction>> = BTreeMap::new();
    for prediction in &input.predictions {
        predictions_by_key
            .entry((prediction.episode_id, prediction.team_id))
            .or_default()
            .push(prediction);
    }

    let title_by_key: BTreeMap<(EpisodeId, TeamId), &TitlePick> = input
        .title_picks
        .iter()
        .map(|t| ((t.episode_id, t.team_id), t))
        .collect();

    let mut cumulative: BTreeMap<TeamId, i64> = BTreeMap::new();
    let mut settlement = LeagueSettlement::default();

    for episode in scored {
        let events = events_by_episode
            .get(&episode.id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let outcome = episode_outcome(episode, events, config);
        let emit = from_episode.map_or(true, |n| episode.number >= n);

        for team in &teams {
            let roster_points: i64 = outcome
                .contestant_points
                .iter()
                .filter(|(contestant, _)| owner_of.get(*contestant) == Some(&team.id))
                .map(|(_, points)| points)
                .sum();

            let prediction_points: i64 = predictions_by_key
                .get(&(episode.id, team.id))
                .map(|rows| rows.iter().map(|p| rule.earned(p, &outcome)).sum())
                .unwrap_or(0);

            let title_pick = title_by_key.get(&(episode.id, team.id));
            let title_points = title_pick
                .map(|t| resolve_title_pick(t.choice, outcome.title_speaker, config.title_pick))
                .unwrap_or(0);

            let episode_points = roster_points + prediction_points + title_points;
            let total = cumulative.entry(team.id).or_insert(0);
            *total += episode_points;

            if !emit {
                continue;
            }
            settlement.scores.push(TeamEpisodeScore {
                league_id,
                team_id: team.id,
                episode_id: episode.id,
                episode_number: episode.number,
                roster_points,
                prediction_points,
                title_points,
                episode_points,
                cumulative_points: *total,
            });
            if title_pick.is_some() {
                settlement.title_results.push(TitlePickResult {
                    league_id,
                    episode_id: episode.id,
                    team_id: team.id,
                    points_earned: title_points,
                });
            }
        }
    }

    settlement
}

// ---------------------------------------------------------------------------
// Standings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    /// Competition rank: tied teams share a rank, the next rank skips.
    pub rank: u32,
    pub team_id: TeamId,
    pub team_name: String,
    pub slot: u32,
    pub episode_points: i64,
    pub cumulative_points: i64,
}

/// Order teams by cumulative points, highest first. Ties are listed by team
/// slot (creation order). `scores` holds one episode's rows; teams without a
/// row count as zero.
pub fn rank_standings(teams: &[Team], scores: &[TeamEpisodeScore]) -> Vec<Standing> {
    let by_team: BTreeMap<TeamId, &TeamEpisodeScore> =
        scores.iter().map(|s| (s.team_id, s)).collect();

    let mut rows: Vec<Standing> = teams
        .iter()
        .map(|team| {
            let score = by_team.get(&team.id);
            Standing {
                rank: 0,
                team_id: team.id,
                team_name: team.name.clone(),
                slot: team.slot,
                episode_points: score.map_or(0, |s| s.episode_points),
                cumulative_points: score.map_or(0, |s| s.cumulative_points),
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.cumulative_points
            .cmp(&a.cumulative_points)
            .then(a.slot.cmp(&b.slot))
    });

    let mut previous: Option<(i64, u32)> = None;
    for (idx, row) in rows.iter_mut().enumerate() {
        let rank = match previous {
            Some((points, rank)) if points == row.cumulative_points => rank,
            _ => idx as u32 + 1,
        };
        row.rank = rank;
        previous = Some((row.cumulative_points, rank));
    }
    rows
}
