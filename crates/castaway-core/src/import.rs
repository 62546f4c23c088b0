// Cast and scoring-event loading from CSV.
//
// Cast files carry one contestant per row (`name,tribe,tier,value`). Event
// files carry one event per row (`contestant,tribe,category`) where exactly
// one of `contestant` or `tribe` is filled in; a tribe row is expanded to that
// tribe's current members when recorded.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::model::NewContestant;
use crate::scoring::ScoringCategory;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Who an imported event applies to, by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTarget {
    Contestant(String),
    Tribe(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub target: EventTarget,
    pub category: ScoringCategory,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("validation error: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Raw CSV serde structs (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawCastRow {
    name: String,
    #[serde(default)]
    tribe: Option<String>,
    #[serde(default = "default_tier")]
    tier: u32,
    #[serde(default)]
    value: u32,
}

fn default_tier() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct RawEventRow {
    #[serde(default)]
    contestant: Option<String>,
    #[serde(default)]
    tribe: Option<String>,
    category: String,
}

/// Trim and drop empty strings, which csv hands back for blank cells.
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Reader-based loaders
// ---------------------------------------------------------------------------

pub fn load_cast_from_reader<R: Read>(rdr: R) -> Result<Vec<NewContestant>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    let mut cast: Vec<NewContestant> = Vec::new();
    for result in reader.deserialize::<RawCastRow>() {
        match result {
            Ok(raw) => {
                let name = raw.name.trim().to_string();
                if name.is_empty() {
                    warn!("skipping cast row with empty name");
                    continue;
                }
                if cast.iter().any(|c| c.name == name) {
                    warn!("duplicate cast entry for '{}', keeping the first", name);
                    continue;
                }
                cast.push(NewContestant {
                    name,
                    tribe: non_blank(raw.tribe),
                    tier: raw.tier,
                    value: raw.value,
                });
            }
            Err(e) => {
                warn!("skipping malformed cast row: {}", e);
            }
        }
    }
    Ok(cast)
}

pub fn load_events_from_reader<R: Read>(rdr: R) -> Result<Vec<EventRow>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
    let mut events = Vec::new();
    for result in reader.deserialize::<RawEventRow>() {
        match result {
            Ok(raw) => {
                if raw.category.trim().is_empty() {
                    warn!("skipping event row with empty category");
                    continue;
                }
                let target = match (non_blank(raw.contestant), non_blank(raw.tribe)) {
                    (Some(name), None) => EventTarget::Contestant(name),
                    (None, Some(tribe)) => EventTarget::Tribe(tribe),
                    (Some(name), Some(tribe)) => {
                        warn!(
                            "skipping event row naming both contestant '{}' and tribe '{}'",
                            name, tribe
                        );
                        continue;
                    }
                    (None, None) => {
                        warn!("skipping event row with neither contestant nor tribe");
                        continue;
                    }
                };
                events.push(EventRow {
                    target,
                    category: ScoringCategory::parse(&raw.category),
                });
            }
            Err(e) => {
                warn!("skipping malformed event row: {}", e);
            }
        }
    }
    Ok(events)
}

// ---------------------------------------------------------------------------
// Public path-based loaders
// ---------------------------------------------------------------------------

fn open(path: &Path) -> Result<std::fs::File, ImportError> {
    std::fs::File::open(path).map_err(|e| ImportError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

/// Load a season's cast from a CSV file. An empty result is an error.
pub fn load_cast(path: &Path) -> Result<Vec<NewContestant>, ImportError> {
    let cast = load_cast_from_reader(open(path)?).map_err(|e| ImportError::Csv {
        path: path.display().to_string(),
        source: e,
    })?;
    if cast.is_empty() {
        return Err(ImportError::Validation(format!(
            "{} produced zero valid cast rows",
            path.display()
        )));
    }
    Ok(cast)
}

/// Load an episode's events from a CSV file. An empty file is allowed (an
/// episode where nothing scored).
pub fn load_events(path: &Path) -> Result<Vec<EventRow>, ImportError> {
    load_events_from_reader(open(path)?).map_err(|e| ImportError::Csv {
        path: path.display().to_string(),
        source: e,
    })
}
