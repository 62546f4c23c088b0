// Production-crew commands: seasons, cast and event import, settlement and
// standings. Every command runs as a platform admin.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use castaway_core::auth::Caller;
use castaway_core::engine::SettlementReport;
use castaway_core::import;
use castaway_core::model::{DraftStatus, EpisodeId, LeagueId, SeasonId, SeasonStatus};
use castaway_core::Engine;
use clap::{Parser, Subcommand};
use tracing::info;

/// User id recorded for actions taken from the command line.
pub const CLI_ADMIN: &str = "castaway-cli";

#[derive(Parser, Debug)]
#[command(name = "castaway", about = "Fantasy reality-TV league engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// List seasons.
    Seasons,
    /// Create a season.
    CreateSeason {
        name: String,
        #[arg(long, default_value = "upcoming", value_parser = parse_status)]
        status: SeasonStatus,
    },
    /// Change a season's status (upcoming, active, complete).
    SetSeasonStatus {
        season_id: SeasonId,
        #[arg(value_parser = parse_status)]
        status: SeasonStatus,
    },
    /// Import a cast CSV (name,tribe,tier,value) into a season.
    ImportCast { season_id: SeasonId, csv: PathBuf },
    /// Add an episode to a season.
    AddEpisode {
        season_id: SeasonId,
        number: u32,
        #[arg(long)]
        title: Option<String>,
    },
    /// Import an episode's scoring events CSV (contestant,tribe,category).
    ImportEvents { episode_id: EpisodeId, csv: PathBuf },
    /// Mark an episode scored and settle every league in its season.
    Score { episode_id: EpisodeId },
    /// Re-run settlement for a whole season, or from one episode onward.
    Settle {
        season_id: SeasonId,
        episode: Option<EpisodeId>,
    },
    /// Move a league's draft to pending, active, or completed.
    DraftStatus {
        league_id: LeagueId,
        #[arg(value_parser = parse_draft_status)]
        status: DraftStatus,
    },
    /// Print a league's standings.
    Standings {
        league_id: LeagueId,
        #[arg(long)]
        episode: Option<EpisodeId>,
        #[arg(long)]
        json: bool,
    },
}

fn parse_status(s: &str) -> Result<SeasonStatus, String> {
    SeasonStatus::parse(s).ok_or_else(|| format!("unknown season status '{s}'"))
}

fn parse_draft_status(s: &str) -> Result<DraftStatus, String> {
    DraftStatus::parse(s).ok_or_else(|| format!("unknown draft status '{s}'"))
}

/// Execute one command against `engine`, writing human-readable output to `out`.
pub fn run(engine: &Engine, command: Commands, out: &mut impl Write) -> Result<()> {
    let caller = Caller::admin(CLI_ADMIN);
    match command {
        Commands::Seasons => {
            for season in engine.seasons()? {
                writeln!(out, "{:>4}  {:<10}  {}", season.id, season.status, season.name)?;
            }
        }
        Commands::CreateSeason { name, status } => {
            let season = engine.create_season(&caller, &name, status)?;
            writeln!(out, "created season {} ({})", season.id, season.name)?;
        }
        Commands::SetSeasonStatus { season_id, status } => {
            let season = engine.set_season_status(&caller, season_id, status)?;
            writeln!(out, "season {} is now {}", season.id, season.status)?;
        }
        Commands::ImportCast { season_id, csv } => {
            let cast = import::load_cast(&csv)
                .with_context(|| format!("failed to load cast from {}", csv.display()))?;
            let imported = engine.import_cast(&caller, season_id, &cast)?;
            info!("Imported {} contestants into season {}", imported.len(), season_id);
            writeln!(out, "imported {} contestants", imported.len())?;
        }
        Commands::AddEpisode {
            season_id,
            number,
            title,
        } => {
            let episode = engine.add_episode(&caller, season_id, number, title.as_deref(), None)?;
            writeln!(out, "created episode {} (#{})", episode.id, episode.number)?;
        }
        Commands::ImportEvents { episode_id, csv } => {
            let rows = import::load_events(&csv)
                .with_context(|| format!("failed to load events from {}", csv.display()))?;
            let change = engine.import_events(&caller, episode_id, &rows)?;
            writeln!(out, "recorded {} events", change.events.len())?;
            if let Some(report) = change.settlement {
                write_report(out, &report)?;
            }
        }
        Commands::Score { episode_id } => {
            let report = engine.mark_episode_scored(&caller, episode_id)?;
            write_report(out, &report)?;
        }
        Commands::Settle { season_id, episode } => {
            let report = match episode {
                Some(episode_id) => {
                    let target = engine.episode(episode_id)?;
                    if target.season_id != season_id {
                        anyhow::bail!("episode {} is not in season {}", episode_id, season_id);
                    }
                    engine.settle_episode(&caller, episode_id)?
                }
                None => engine.settle_season(&caller, season_id)?,
            };
            write_report(out, &report)?;
        }
        Commands::DraftStatus { league_id, status } => {
            let transition = engine.set_draft_status(&caller, league_id, status)?;
            writeln!(
                out,
                "league {} draft is {}",
                transition.league.id,
                transition.league.draft_status.as_str()
            )?;
            if let Some(report) = transition.settlement {
                write_report(out, &report)?;
            }
        }
        Commands::Standings {
            league_id,
            episode,
            json,
        } => {
            let standings = engine.standings(league_id, episode)?;
            if json {
                let text = serde_json::to_string_pretty(&standings)
                    .context("failed to serialize standings")?;
                writeln!(out, "{text}")?;
            } else {
                match standings.episode_number {
                    Some(n) => writeln!(out, "standings after episode {n}")?,
                    None => writeln!(out, "no episodes scored yet")?,
                }
                for row in &standings.rows {
                    writeln!(
                        out,
                        "{:>3}. {:<24} {:>5} ({:+})",
                        row.rank, row.team_name, row.cumulative_points, row.episode_points
                    )?;
                }
            }
        }
    }
    Ok(())
}

fn write_report(out: &mut impl Write, report: &SettlementReport) -> Result<()> {
    writeln!(out, "settled {} leagues", report.settled.len())?;
    for failure in &report.failed {
        writeln!(out, "league {} failed: {}", failure.league_id, failure.error)?;
    }
    if !report.is_complete() {
        anyhow::bail!("{} leagues failed to settle", report.failed.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use castaway_core::engine::LeagueRequest;
    use castaway_core::model::DraftMode;
    use castaway_core::EngineSettings;

    fn engine() -> Engine {
        Engine::open(":memory:", EngineSettings::default()).unwrap()
    }

    fn exec(engine: &Engine, args: &[&str]) -> Result<String> {
        let mut argv = vec!["castaway"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv)?;
        let mut out = Vec::new();
        run(engine, cli.command, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn fixture(name: &str) -> String {
        let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        root.join("../castaway-core/tests/fixtures")
            .join(name)
            .display()
            .to_string()
    }

    #[test]
    fn parses_settle_with_optional_episode() {
        let cli = Cli::try_parse_from(["castaway", "settle", "3", "7"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Settle {
                season_id: 3,
                episode: Some(7)
            }
        );
    }

    #[test]
    fn rejects_unknown_season_status() {
        let argv = ["castaway", "create-season", "S50", "--status", "paused"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn season_setup_and_listing() {
        let engine = engine();
        let out = exec(&engine, &["create-season", "Survivor 50", "--status", "active"]).unwrap();
        assert!(out.contains("created season"));
        let out = exec(&engine, &["seasons"]).unwrap();
        assert!(out.contains("active"));
        assert!(out.contains("Survivor 50"));
    }

    #[test]
    fn imports_cast_and_scores_an_episode() {
        let engine = engine();
        exec(&engine, &["create-season", "Survivor 50", "--status", "active"]).unwrap();
        let season = engine.seasons().unwrap()[0].id;
        let season_arg = season.to_string();
        let out = exec(&engine, &["import-cast", &season_arg, &fixture("cast.csv")]).unwrap();
        assert_eq!(out.trim(), "imported 12 contestants");

        exec(&engine, &["add-episode", &season.to_string(), "1", "--title", "Premiere"]).unwrap();
        let episode = engine.episodes(season).unwrap()[0].id;
        let events = fixture("week1_events.csv");
        let out = exec(&engine, &["import-events", &episode.to_string(), &events]).unwrap();
        assert!(out.starts_with("recorded "));

        let out = exec(&engine, &["score", &episode.to_string()]).unwrap();
        assert!(out.contains("settled 0 leagues"));
        assert!(engine.episode(episode).unwrap().is_scored);
    }

    #[test]
    fn settle_rejects_episode_from_another_season() {
        let engine = engine();
        exec(&engine, &["create-season", "A"]).unwrap();
        exec(&engine, &["create-season", "B"]).unwrap();
        let seasons = engine.seasons().unwrap();
        let (a, b) = (seasons[0].id, seasons[1].id);
        exec(&engine, &["add-episode", &a.to_string(), "1"]).unwrap();
        let episode = engine.episodes(a).unwrap()[0].id;
        let err = exec(&engine, &["settle", &b.to_string(), &episode.to_string()]).unwrap_err();
        assert!(err.to_string().contains("not in season"));
    }

    #[test]
    fn draft_status_opens_and_closes_a_league_draft() {
        let engine = engine();
        exec(&engine, &["create-season", "Survivor 50", "--status", "active"]).unwrap();
        exec(&engine, &["import-cast", "1", &fixture("cast.csv")]).unwrap();
        let (league, _) = engine
            .create_league(
                &Caller::user("host"),
                &LeagueRequest {
                    season_id: 1,
                    name: "Couch Jury".into(),
                    draft_mode: DraftMode::Snake,
                    team_count: 4,
                    budget: None,
                },
            )
            .unwrap();

        let id = league.id.to_string();
        let out = exec(&engine, &["draft-status", &id, "active"]).unwrap();
        assert_eq!(out.trim(), "league 1 draft is active");
        let out = exec(&engine, &["draft-status", &id, "completed"]).unwrap();
        assert!(out.contains("draft is completed"));
        assert!(out.contains("settled 1 leagues"));

        // Completed drafts cannot reopen.
        assert!(exec(&engine, &["draft-status", &id, "pending"]).is_err());
    }

    #[test]
    fn standings_print_as_json() {
        let engine = engine();
        exec(&engine, &["create-season", "S"]).unwrap();
        engine
            .create_league(
                &Caller::user("host"),
                &LeagueRequest {
                    season_id: 1,
                    name: "Couch Jury".into(),
                    draft_mode: DraftMode::Auction,
                    team_count: 2,
                    budget: Some(50),
                },
            )
            .unwrap();
        let out = exec(&engine, &["standings", "1", "--json"]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["league_id"], 1);
        assert!(value["episode_number"].is_null());
        assert_eq!(value["rows"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn missing_cast_file_reports_path() {
        let engine = engine();
        exec(&engine, &["create-season", "A"]).unwrap();
        let err = exec(&engine, &["import-cast", "1", "/nonexistent/cast.csv"]).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/cast.csv"));
    }
}
