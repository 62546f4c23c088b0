// Integration tests for the league engine.
//
// These drive the public `Engine` surface end-to-end against an in-memory
// SQLite store: season setup from CSV fixtures, snake and auction drafts,
// prediction locking, scoring, settlement backfill, and standings.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use castaway_core::auth::Caller;
use castaway_core::clock::FixedClock;
use castaway_core::db::Database;
use castaway_core::engine::{LeagueRequest, SettlementReport};
use castaway_core::import::{load_cast, load_events};
use castaway_core::invite::InviteCodeAllocator;
use castaway_core::model::{
    Contestant, DraftMode, DraftStatus, LeagueId, Season, SeasonStatus, Team, TeamId,
};
use castaway_core::predictions::Allocation;
use castaway_core::scoring::ScoringCategory;
use castaway_core::{Engine, EngineError, EngineSettings};

// ===========================================================================
// Test helpers
// ===========================================================================

/// Fixture directory path (relative to the crate root, which is the cwd for
/// `cargo test`).
const FIXTURES: &str = "tests/fixtures";

fn admin() -> Caller {
    Caller::admin("host")
}

fn commissioner() -> Caller {
    Caller::user("jeff")
}

fn premiere() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 25, 18, 0, 0).unwrap()
}

struct World {
    engine: Engine,
    clock: Arc<FixedClock>,
    season: Season,
    cast: Vec<Contestant>,
}

/// Engine over a fresh in-memory database with the fixture cast imported.
fn world_with(settings: EngineSettings) -> World {
    let clock = Arc::new(FixedClock::new(premiere()));
    let engine = Engine::new(Database::open(":memory:").unwrap(), settings)
        .with_clock(clock.clone())
        .with_rng_seed(2026);
    let season = engine
        .create_season(&admin(), "Legends", SeasonStatus::Active)
        .unwrap();
    let rows = load_cast(&Path::new(FIXTURES).join("cast.csv")).unwrap();
    let cast = engine.import_cast(&admin(), season.id, &rows).unwrap();
    World {
        engine,
        clock,
        season,
        cast,
    }
}

fn world() -> World {
    world_with(EngineSettings::default())
}

fn by_name<'a>(w: &'a World, name: &str) -> &'a Contestant {
    w.cast.iter().find(|c| c.name == name).unwrap()
}

/// Create a league and fill every slot: slot 1 is "jeff", the rest "fanN".
fn full_league(
    w: &World,
    mode: DraftMode,
    teams: u32,
    budget: Option<u32>,
) -> (LeagueId, Vec<Team>) {
    let (league, _) = w
        .engine
        .create_league(
            &commissioner(),
            &LeagueRequest {
                season_id: w.season.id,
                name: "Second Chance".into(),
                draft_mode: mode,
                team_count: teams,
                budget,
            },
        )
        .unwrap();
    for i in 2..=teams {
        w.engine
            .join_league(&Caller::user(format!("fan{i}")), &league.invite_code)
            .unwrap();
    }
    (league.id, w.engine.teams(league.id).unwrap())
}

fn owner_of(team: &Team) -> Caller {
    Caller::user(team.owner_id.clone().unwrap())
}

/// Cumulative points per team for one episode number, from stored rows.
fn cumulative_at(w: &World, league_id: LeagueId, episode_number: u32) -> BTreeMap<TeamId, i64> {
    w.engine
        .database()
        .scores_for_league(league_id)
        .unwrap()
        .into_iter()
        .filter(|s| s.episode_number == episode_number)
        .map(|s| (s.team_id, s.cumulative_points))
        .collect()
}

fn assert_complete(report: &SettlementReport) {
    assert!(report.is_complete(), "settlement failures: {:?}", report.failed);
}

// ===========================================================================
// Full season
// ===========================================================================

#[test]
fn full_snake_season_flow() {
    let w = world();
    assert_eq!(w.cast.len(), 12);
    assert_eq!(w.engine.active_season().unwrap().unwrap().id, w.season.id);

    let (league_id, teams) = full_league(&w, DraftMode::Snake, 3, None);
    let league = w.engine.league(league_id).unwrap();
    assert_eq!(league.roster_size, 4);
    assert_eq!(league.roster_remainder, 0);

    w.engine
        .set_draft_status(&commissioner(), league_id, DraftStatus::Active)
        .unwrap();

    // Every team drafts in turn, taking the next cast member in file order.
    let mut next = 0;
    while let Some(turn) = w.engine.on_the_clock(league_id).unwrap() {
        let team = teams.iter().find(|t| t.id == turn.team_id).unwrap();
        w.engine
            .make_pick(&owner_of(team), league_id, team.id, w.cast[next].id)
            .unwrap();
        next += 1;
    }
    assert_eq!(next, 12);
    w.engine
        .set_draft_status(&commissioner(), league_id, DraftStatus::Completed)
        .unwrap();

    let picks = w.engine.picks(league_id).unwrap();
    let owner: BTreeMap<i64, TeamId> = picks.iter().map(|p| (p.contestant_id, p.team_id)).collect();
    for team in &teams {
        assert_eq!(picks.iter().filter(|p| p.team_id == team.id).count(), 4);
    }

    // Episode 1: each team predicts; only the Ethan backers get paid.
    let ep = w
        .engine
        .add_episode(
            &admin(),
            w.season.id,
            1,
            Some("Premiere"),
            Some(premiere() + Duration::hours(2)),
        )
        .unwrap();
    let ethan = by_name(&w, "Ethan Zohn").id;
    let rob = by_name(&w, "Rob Mariano").id;
    w.engine
        .submit_predictions(
            &owner_of(&teams[0]),
            league_id,
            ep.id,
            teams[0].id,
            &[Allocation::new(ethan, 7), Allocation::new(rob, 3)],
        )
        .unwrap();
    w.engine
        .submit_predictions(
            &owner_of(&teams[1]),
            league_id,
            ep.id,
            teams[1].id,
            &[Allocation::new(rob, 10)],
        )
        .unwrap();

    let rows = load_events(&Path::new(FIXTURES).join("week1_events.csv")).unwrap();
    assert_eq!(rows.len(), 6);
    let change = w.engine.import_events(&admin(), ep.id, &rows).unwrap();
    assert_eq!(change.events.len(), 6);

    w.clock.advance(Duration::hours(3));
    assert_complete(&w.engine.mark_episode_scored(&admin(), ep.id).unwrap());

    // Roster points: Rob 5 (idol), Parvati 4 (individual reward), Cirie 2 (two
    // vote rows). Eliminated and unknown categories score nothing.
    let event_points: BTreeMap<i64, i64> = [
        (rob, 5),
        (by_name(&w, "Parvati Shallow").id, 4),
        (by_name(&w, "Cirie Fields").id, 2),
    ]
    .into_iter()
    .collect();
    let mut expected: BTreeMap<TeamId, i64> = teams.iter().map(|t| (t.id, 0)).collect();
    for (contestant, points) in &event_points {
        *expected.get_mut(&owner[contestant]).unwrap() += points;
    }
    *expected.get_mut(&teams[0].id).unwrap() += 7;

    assert_eq!(cumulative_at(&w, league_id, 1), expected);

    let table = w.engine.standings(league_id, None).unwrap();
    assert_eq!(table.episode_number, Some(1));
    let cumulative: Vec<i64> = table.rows.iter().map(|r| r.cumulative_points).collect();
    let mut sorted = cumulative.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(cumulative, sorted);
    assert_eq!(table.rows[0].rank, 1);
}

// ===========================================================================
// Budget ledger
// ===========================================================================

#[test]
fn bid_above_remaining_budget_is_rejected_without_change() {
    let w = world();
    let (league_id, teams) = full_league(&w, DraftMode::Auction, 2, Some(50));
    w.engine
        .set_draft_status(&commissioner(), league_id, DraftStatus::Active)
        .unwrap();

    let err = w
        .engine
        .record_auction_pick(&commissioner(), league_id, teams[1].id, w.cast[0].id, 60)
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InsufficientBudget {
            requested: 60,
            remaining: 50
        }
    ));
    let budgets = w.engine.budgets(league_id).unwrap();
    assert_eq!(budgets[1].remaining, 50);
    assert!(w.engine.picks(league_id).unwrap().is_empty());

    w.engine
        .record_auction_pick(&commissioner(), league_id, teams[1].id, w.cast[0].id, 45)
        .unwrap();
    let budgets = w.engine.budgets(league_id).unwrap();
    assert_eq!(budgets[1].spent, 45);
    assert_eq!(budgets[1].remaining, 5);
    // Six roster slots, one filled: keep a dollar for each of the other four.
    assert_eq!(budgets[1].open_slots, 5);
    assert_eq!(budgets[1].max_bid, 1);

    let err = w
        .engine
        .record_auction_pick(&commissioner(), league_id, teams[1].id, w.cast[1].id, 6)
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientBudget { remaining: 5, .. }));
}

#[test]
fn concurrent_bids_cannot_overspend_one_budget() {
    let w = world();
    let (league_id, teams) = full_league(&w, DraftMode::Auction, 2, Some(50));
    w.engine
        .set_draft_status(&commissioner(), league_id, DraftStatus::Active)
        .unwrap();
    let team_id = teams[0].id;

    // Every bid alone is affordable; any two together are not.
    let results: Vec<Result<_, EngineError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = w.cast[..6]
            .iter()
            .map(|contestant| {
                let engine = &w.engine;
                scope.spawn(move || {
                    engine.record_auction_pick(
                        &commissioner(),
                        league_id,
                        team_id,
                        contestant.id,
                        30,
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let won = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(won, 1, "results: {results:?}");
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(err, EngineError::InsufficientBudget { requested: 30, remaining: 20 }),
            "unexpected error: {err:?}"
        );
    }

    let team = w.engine.database().team(team_id).unwrap().unwrap();
    assert_eq!(team.budget_remaining, Some(20));
    let picks = w.engine.picks(league_id).unwrap();
    assert_eq!(picks.len(), 1);
    assert_eq!(picks[0].price, Some(30));
}

#[test]
fn only_the_auctioneer_records_bids() {
    let w = world();
    let (league_id, teams) = full_league(&w, DraftMode::Auction, 2, Some(50));
    w.engine
        .set_draft_status(&commissioner(), league_id, DraftStatus::Active)
        .unwrap();
    let err = w
        .engine
        .record_auction_pick(&owner_of(&teams[1]), league_id, teams[1].id, w.cast[0].id, 5)
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
}

#[test]
fn private_valuations_stay_private() {
    let w = world();
    let (league_id, teams) = full_league(&w, DraftMode::Auction, 2, Some(50));
    let fan = owner_of(&teams[1]);

    assert_eq!(
        w.engine.valuation(&fan, league_id, teams[1].id, w.cast[0].id).unwrap(),
        None
    );
    w.engine
        .set_valuation(&fan, league_id, teams[1].id, w.cast[0].id, 20, Some(25))
        .unwrap();
    w.engine
        .set_valuation(&fan, league_id, teams[1].id, w.cast[0].id, 20, Some(25))
        .unwrap();
    assert_eq!(w.engine.valuations(&fan, league_id, teams[1].id).unwrap().len(), 1);

    let err = w
        .engine
        .valuations(&owner_of(&teams[0]), league_id, teams[1].id)
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
}

// ===========================================================================
// Draft completion backfill
// ===========================================================================

#[test]
fn completing_the_draft_backfills_scored_episodes() {
    let w = world();
    let (league_id, teams) = full_league(&w, DraftMode::Snake, 2, None);
    let star = by_name(&w, "Tony Vlachos").id;
    let boot = by_name(&w, "Jeremy Collins").id;

    // Episodes 1-3 air and are scored before anyone drafts. Team 2 locked a
    // prediction on the first boot back then.
    let mut episodes = Vec::new();
    for number in 1..=3 {
        let ep = w
            .engine
            .add_episode(&admin(), w.season.id, number, None, None)
            .unwrap();
        episodes.push(ep);
    }
    w.engine
        .submit_predictions(
            &owner_of(&teams[1]),
            league_id,
            episodes[0].id,
            teams[1].id,
            &[Allocation::new(boot, 10)],
        )
        .unwrap();
    for ep in &episodes {
        w.engine
            .record_event(&admin(), ep.id, star, ScoringCategory::FoundIdol)
            .unwrap();
    }
    w.engine
        .record_event(&admin(), episodes[0].id, boot, ScoringCategory::Eliminated)
        .unwrap();
    for ep in &episodes {
        assert_complete(&w.engine.mark_episode_scored(&admin(), ep.id).unwrap());
    }

    let before: Vec<BTreeMap<TeamId, i64>> =
        (1..=3).map(|n| cumulative_at(&w, league_id, n)).collect();
    for table in &before {
        assert_eq!(table[&teams[0].id], 0);
        assert_eq!(table[&teams[1].id], 10);
    }

    // Draft happens late; the first team on the clock takes the idol finder.
    w.engine
        .set_draft_status(&commissioner(), league_id, DraftStatus::Active)
        .unwrap();
    let first = w.engine.on_the_clock(league_id).unwrap().unwrap().team_id;
    w.engine
        .make_pick(&commissioner(), league_id, first, star)
        .unwrap();
    let transition = w
        .engine
        .set_draft_status(&commissioner(), league_id, DraftStatus::Completed)
        .unwrap();
    assert_complete(transition.settlement.as_ref().unwrap());

    let after: Vec<BTreeMap<TeamId, i64>> =
        (1..=3).map(|n| cumulative_at(&w, league_id, n)).collect();
    let idol_points = [5, 10, 15];
    for (table, idol) in after.iter().zip(idol_points) {
        let first_bonus = if first == teams[1].id { 10 } else { 0 };
        assert_eq!(table[&first], idol + first_bonus);
    }
    let other = teams.iter().map(|t| t.id).find(|id| *id != first).unwrap();
    let other_bonus = if other == teams[1].id { 10 } else { 0 };
    assert!(after.iter().all(|table| table[&other] == other_bonus));

    // Asking for completion again recomputes to the same rows.
    let rows_before = w.engine.database().scores_for_league(league_id).unwrap();
    w.engine
        .set_draft_status(&commissioner(), league_id, DraftStatus::Completed)
        .unwrap();
    let rows_after = w.engine.database().scores_for_league(league_id).unwrap();
    assert_eq!(rows_before, rows_after);
}

// ===========================================================================
// Settlement idempotence
// ===========================================================================

#[test]
fn rerunning_settlement_yields_identical_rows() {
    let w = world();
    let (league_id, teams) = full_league(&w, DraftMode::Snake, 2, None);
    w.engine
        .set_draft_status(&commissioner(), league_id, DraftStatus::Active)
        .unwrap();
    let turn = w.engine.on_the_clock(league_id).unwrap().unwrap();
    w.engine
        .make_pick(&commissioner(), league_id, turn.team_id, w.cast[0].id)
        .unwrap();

    let ep1 = w.engine.add_episode(&admin(), w.season.id, 1, None, None).unwrap();
    let ep2 = w.engine.add_episode(&admin(), w.season.id, 2, None, None).unwrap();
    w.engine
        .record_tribe_event(&admin(), ep1.id, "Ometepe", ScoringCategory::TribeImmunity)
        .unwrap();
    w.engine
        .record_event(&admin(), ep2.id, w.cast[0].id, ScoringCategory::IdolPlayed)
        .unwrap();
    // Score out of order: episode 2 first.
    w.engine.mark_episode_scored(&admin(), ep2.id).unwrap();
    w.engine.mark_episode_scored(&admin(), ep1.id).unwrap();

    let first = w.engine.database().scores_for_league(league_id).unwrap();
    assert_complete(&w.engine.settle_episode(&admin(), ep1.id).unwrap());
    assert_complete(&w.engine.settle_season(&admin(), w.season.id).unwrap());
    assert_complete(&w.engine.backfill_league(&commissioner(), league_id).unwrap());
    let second = w.engine.database().scores_for_league(league_id).unwrap();
    assert_eq!(first, second);

    // Rob is Ometepe's only member: 2 for immunity, then 5 for the idol play.
    let drafted_by = turn.team_id;
    assert_eq!(cumulative_at(&w, league_id, 1)[&drafted_by], 2);
    assert_eq!(cumulative_at(&w, league_id, 2)[&drafted_by], 7);
    assert_eq!(second.len(), 2 * teams.len());
}

#[test]
fn league_scoring_override_resettles() {
    let w = world();
    let (league_id, _) = full_league(&w, DraftMode::Snake, 1, None);
    w.engine
        .set_draft_status(&commissioner(), league_id, DraftStatus::Active)
        .unwrap();
    let team = w.engine.on_the_clock(league_id).unwrap().unwrap().team_id;
    let winner = by_name(&w, "Amber Brkich").id;
    w.engine.make_pick(&commissioner(), league_id, team, winner).unwrap();

    let ep = w.engine.add_episode(&admin(), w.season.id, 1, None, None).unwrap();
    w.engine
        .record_event(&admin(), ep.id, winner, ScoringCategory::Winner)
        .unwrap();
    w.engine.mark_episode_scored(&admin(), ep.id).unwrap();
    assert_eq!(cumulative_at(&w, league_id, 1)[&team], 20);

    let mut scoring = w.engine.league(league_id).unwrap().scoring;
    scoring.winner = 100;
    assert_complete(
        &w.engine
            .set_scoring_config(&commissioner(), league_id, &scoring)
            .unwrap(),
    );
    assert_eq!(cumulative_at(&w, league_id, 1)[&team], 100);
}

// ===========================================================================
// Prediction ledger
// ===========================================================================

#[test]
fn valid_sets_read_back_and_invalid_sets_change_nothing() {
    let w = world();
    let (league_id, teams) = full_league(&w, DraftMode::Snake, 2, None);
    let ep = w.engine.add_episode(&admin(), w.season.id, 1, None, None).unwrap();
    let fan = owner_of(&teams[1]);
    let ids: Vec<i64> = w.cast.iter().map(|c| c.id).collect();

    let valid_sets: Vec<Vec<Allocation>> = vec![
        vec![Allocation::new(ids[0], 10)],
        vec![Allocation::new(ids[1], 4), Allocation::new(ids[2], 6)],
        vec![
            Allocation::new(ids[3], 1),
            Allocation::new(ids[4], 2),
            Allocation::new(ids[5], 3),
            Allocation::new(ids[6], 4),
            Allocation::new(ids[7], 0),
        ],
    ];
    for set in &valid_sets {
        w.engine
            .submit_predictions(&fan, league_id, ep.id, teams[1].id, set)
            .unwrap();
        let read = w.engine.predictions_for_episode(&fan, league_id, ep.id).unwrap();
        let got: Vec<(i64, u32)> = read[0]
            .predictions
            .iter()
            .map(|p| (p.contestant_id, p.points_allocated))
            .collect();
        let mut want: Vec<(i64, u32)> = set
            .iter()
            .filter(|a| a.points > 0)
            .map(|a| (a.contestant_id, a.points))
            .collect();
        want.sort();
        assert_eq!(got, want);
    }

    let snapshot = w.engine.predictions_for_episode(&fan, league_id, ep.id).unwrap();
    for bad in [
        vec![Allocation::new(ids[0], 11)],
        vec![Allocation::new(ids[0], 5), Allocation::new(ids[1], 4)],
        vec![Allocation::new(ids[0], 5), Allocation::new(ids[0], 5)],
        vec![Allocation::new(99_999, 10)],
    ] {
        let err = w
            .engine
            .submit_predictions(&fan, league_id, ep.id, teams[1].id, &bad)
            .unwrap_err();
        assert!(matches!(err, EngineError::ValidationError(_)), "{err}");
        assert_eq!(
            w.engine.predictions_for_episode(&fan, league_id, ep.id).unwrap(),
            snapshot
        );
    }
}

#[test]
fn scored_episode_rejects_predictions() {
    let w = world();
    let (league_id, teams) = full_league(&w, DraftMode::Snake, 2, None);
    let ep = w.engine.add_episode(&admin(), w.season.id, 1, None, None).unwrap();
    w.engine.mark_episode_scored(&admin(), ep.id).unwrap();
    let err = w
        .engine
        .submit_predictions(
            &owner_of(&teams[0]),
            league_id,
            ep.id,
            teams[0].id,
            &[Allocation::new(w.cast[0].id, 10)],
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyScored { .. }));
    assert!(matches!(
        w.engine.update_episode_deadline(&commissioner(), ep.id, None),
        Err(EngineError::AlreadyScored { .. })
    ));
}

#[test]
fn concurrent_submissions_leave_one_whole_set() {
    let w = world();
    let (league_id, teams) = full_league(&w, DraftMode::Snake, 2, None);
    let ep = w.engine.add_episode(&admin(), w.season.id, 1, None, None).unwrap();
    let fan = owner_of(&teams[1]);
    let team_id = teams[1].id;
    let ids: Vec<i64> = w.cast.iter().map(|c| c.id).collect();

    // Thread i spreads its ten points over contestants i and i+1.
    let sets: Vec<Vec<Allocation>> = (0..8)
        .map(|i| vec![Allocation::new(ids[i], 3), Allocation::new(ids[i + 1], 7)])
        .collect();

    std::thread::scope(|scope| {
        for set in &sets {
            let engine = &w.engine;
            let fan = fan.clone();
            scope.spawn(move || {
                for _ in 0..5 {
                    engine
                        .submit_predictions(&fan, league_id, ep.id, team_id, set)
                        .unwrap();
                }
            });
        }
    });

    let read = w.engine.predictions_for_episode(&fan, league_id, ep.id).unwrap();
    assert_eq!(read.len(), 1);
    let rows: Vec<(i64, u32)> = read[0]
        .predictions
        .iter()
        .map(|p| (p.contestant_id, p.points_allocated))
        .collect();
    assert_eq!(rows.iter().map(|(_, p)| p).sum::<u32>(), 10);
    assert!(
        sets.iter().any(|set| {
            let mut want: Vec<(i64, u32)> =
                set.iter().map(|a| (a.contestant_id, a.points)).collect();
            want.sort();
            want == rows
        }),
        "mixed rows from several submissions: {rows:?}"
    );
}

// ===========================================================================
// Invite codes
// ===========================================================================

#[test]
fn invite_codes_are_unique_until_exhausted() {
    // One-character codes: 31 possible, so the space fills quickly.
    let settings = EngineSettings {
        invite: InviteCodeAllocator {
            code_length: 1,
            max_attempts: 10,
        },
        ..EngineSettings::default()
    };
    let w = world_with(settings);
    let mut codes = HashSet::new();
    let mut exhausted = false;

    for i in 0..500 {
        let result = w.engine.create_league(
            &commissioner(),
            &LeagueRequest {
                season_id: w.season.id,
                name: format!("League {i}"),
                draft_mode: DraftMode::Snake,
                team_count: 2,
                budget: None,
            },
        );
        match result {
            Ok((league, _)) => assert!(codes.insert(league.invite_code), "duplicate code"),
            Err(EngineError::AllocationExhausted { attempts }) => {
                assert_eq!(attempts, 10);
                exhausted = true;
                break;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert!(exhausted);
    assert!(codes.len() <= 31);
}
