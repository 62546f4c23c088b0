// Configuration loading and validation (config/castaway.toml).

use std::io::Write;
use std::path::{Path, PathBuf};

use castaway_core::invite::InviteCodeAllocator;
use castaway_core::scoring::ScoringConfig;
use castaway_core::EngineSettings;
use serde::Deserialize;
use thiserror::Error;

/// File name under `config/` (and `defaults/`).
pub const CONFIG_FILE: &str = "castaway.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub league_defaults: LeagueDefaults,
    pub invite: InviteConfig,
    pub scoring: ScoringConfig,
    /// `[scoring]` keys that matched no category. Reported once logging is up.
    pub ignored_scoring_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; `None` means the platform data directory.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
    pub directory: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LeagueDefaults {
    pub budget: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InviteConfig {
    pub code_length: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    castaway_core::invite::DEFAULT_MAX_ATTEMPTS
}

/// Raw deserialization target for the whole file. `[scoring]` stays a plain
/// table so unknown keys can be reported before it is typed.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    database: DatabaseConfig,
    logging: LoggingConfig,
    league_defaults: LeagueDefaults,
    invite: InviteConfig,
    #[serde(default)]
    scoring: Option<toml::Table>,
}

impl Config {
    /// Engine defaults derived from this config.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            default_budget: self.league_defaults.budget,
            invite: InviteCodeAllocator {
                code_length: self.invite.code_length,
                max_attempts: self.invite.max_attempts,
            },
            scoring: self.scoring.clone(),
        }
    }

    /// Where the SQLite database lives: the configured path, else
    /// `castaway.db` in the platform data directory, else the working
    /// directory.
    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.database.path {
            return PathBuf::from(path);
        }
        match directories::ProjectDirs::from("", "", "castaway") {
            Some(dirs) => dirs.data_dir().join("castaway.db"),
            None => PathBuf::from("castaway.db"),
        }
    }

    /// Log directory, resolved against `base_dir` when relative.
    pub fn log_directory(&self, base_dir: &Path) -> PathBuf {
        let dir = Path::new(&self.logging.directory);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            base_dir.join(dir)
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/castaway.toml` relative to `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    parse_config(&path, &text)
}

fn parse_config(path: &Path, text: &str) -> Result<Config, ConfigError> {
    let file: ConfigFile = toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut ignored_scoring_keys = Vec::new();
    let scoring = match file.scoring {
        Some(table) => {
            for key in table.keys() {
                if !ScoringConfig::KEYS.contains(&key.as_str()) {
                    ignored_scoring_keys.push(key.clone());
                }
            }
            toml::Value::Table(table)
                .try_into::<ScoringConfig>()
                .map_err(|e| ConfigError::ParseError {
                    path: path.to_path_buf(),
                    source: e,
                })?
        }
        None => ScoringConfig::default(),
    };

    let config = Config {
        database: file.database,
        logging: file.logging,
        league_defaults: file.league_defaults,
        invite: file.invite,
        scoring,
        ignored_scoring_keys,
    };

    validate(&config)?;

    Ok(config)
}

/// Copy `defaults/castaway.toml` to `config/castaway.toml` unless the latter
/// already exists. Returns the written path, or `None` when nothing was copied.
/// Nothing else under `defaults/` (such as `.example` files) is copied.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let config_dir = base_dir.join("config");
    let target = config_dir.join(CONFIG_FILE);
    if target.exists() {
        return Ok(None);
    }
    let source = base_dir.join("defaults").join(CONFIG_FILE);
    if !source.is_file() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "no config/{CONFIG_FILE} or defaults/{CONFIG_FILE} under {}",
                base_dir.display()
            ),
        });
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| copy_error("create", &config_dir, e))?;
    let content = std::fs::read(&source).map_err(|e| copy_error("read", &source, e))?;
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
    {
        Ok(mut dest) => {
            dest.write_all(&content).map_err(|e| copy_error("write", &target, e))?;
            Ok(Some(target))
        }
        // Another process got there first.
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(copy_error("create", &target, e)),
    }
}

fn copy_error(action: &str, path: &Path, e: std::io::Error) -> ConfigError {
    ConfigError::DefaultsCopyError {
        message: format!("failed to {action} {}: {e}", path.display()),
    }
}

/// Loads config relative to `base_dir`, copying defaults first.
pub fn load_config_in(base_dir: &Path) -> Result<Config, ConfigError> {
    ensure_config_file(base_dir)?;
    load_config_from(base_dir)
}

/// Convenience wrapper: loads config relative to the current working directory.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    load_config_in(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.league_defaults.budget == 0 {
        return Err(invalid("league_defaults.budget", "must be greater than 0"));
    }

    if config.invite.code_length < 4 {
        return Err(invalid(
            "invite.code_length",
            format!("must be at least 4, got {}", config.invite.code_length),
        ));
    }
    if config.invite.max_attempts == 0 {
        return Err(invalid("invite.max_attempts", "must be at least 1"));
    }

    if config.logging.filter.trim().is_empty() {
        return Err(invalid("logging.filter", "must not be empty"));
    }

    if let Some(path) = &config.database.path {
        if path.trim().is_empty() {
            return Err(invalid("database.path", "must not be empty when set"));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// Helper: returns the castaway-cli crate root
    /// (works whether `cargo test` runs from the crate root or repo root).
    fn project_root() -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        if cwd.join("defaults").exists() {
            cwd
        } else if cwd.join("crates/castaway-cli/defaults").exists() {
            cwd.join("crates/castaway-cli")
        } else {
            panic!("Cannot locate defaults/ directory from CWD {:?}", cwd);
        }
    }

    fn defaults_text() -> String {
        fs::read_to_string(project_root().join("defaults").join(CONFIG_FILE)).unwrap()
    }

    fn parse(text: &str) -> Result<Config, ConfigError> {
        parse_config(Path::new("test.toml"), text)
    }

    /// Write `text` as config/castaway.toml in a fresh temp dir.
    fn temp_config(name: &str, text: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config").join(CONFIG_FILE), text).unwrap();
        tmp
    }

    #[test]
    fn load_valid_config_from_project_defaults() {
        let tmp = temp_config("castaway_config_defaults", &defaults_text());
        let config = load_config_from(&tmp).expect("defaults should load");

        assert_eq!(config.database.path, None);
        assert_eq!(config.logging.directory, "logs");
        assert_eq!(config.league_defaults.budget, 100);
        assert_eq!(config.invite.code_length, 6);
        assert_eq!(config.invite.max_attempts, 10);
        assert_eq!(config.scoring, ScoringConfig::default());

        let settings = config.engine_settings();
        assert_eq!(settings.default_budget, 100);
        assert_eq!(settings.invite, InviteCodeAllocator::default());

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn scoring_overrides_merge_with_defaults() {
        let text = defaults_text().replace("winner = 20", "winner = 50\nsurvived_fire = 3");
        let config = parse(&text).unwrap();
        assert_eq!(config.scoring.winner, 50);
        assert_eq!(config.scoring.found_idol, 5);
        assert_eq!(config.ignored_scoring_keys, vec!["survived_fire".to_string()]);
    }

    #[test]
    fn missing_scoring_table_uses_defaults() {
        let text = "[logging]\nfilter = \"info\"\ndirectory = \"logs\"\n\
                    [league_defaults]\nbudget = 200\n\
                    [invite]\ncode_length = 8\n";
        let config = parse(text).unwrap();
        assert_eq!(config.scoring, ScoringConfig::default());
        assert_eq!(config.invite.max_attempts, 10);
        assert_eq!(config.league_defaults.budget, 200);
    }

    #[test]
    fn explicit_database_path_wins() {
        let text = defaults_text().replace("# path = \"castaway.db\"", "path = \"/tmp/league.db\"");
        let config = parse(&text).unwrap();
        assert_eq!(config.database_path(), PathBuf::from("/tmp/league.db"));
    }

    #[test]
    fn default_database_path_is_named_castaway_db() {
        let config = parse(&defaults_text()).unwrap();
        assert!(config.database_path().ends_with("castaway.db"));
    }

    #[test]
    fn rejects_zero_budget() {
        let text = defaults_text().replace("budget = 100", "budget = 0");
        match parse(&text).unwrap_err() {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "league_defaults.budget")
            }
            other => panic!("expected ValidationError, got: {other}"),
        }
    }

    #[test]
    fn rejects_short_invite_codes() {
        let text = defaults_text().replace("code_length = 6", "code_length = 3");
        match parse(&text).unwrap_err() {
            ConfigError::ValidationError { field, message } => {
                assert_eq!(field, "invite.code_length");
                assert!(message.contains("got 3"));
            }
            other => panic!("expected ValidationError, got: {other}"),
        }
    }

    #[test]
    fn rejects_zero_attempts() {
        let text = defaults_text().replace("max_attempts = 10", "max_attempts = 0");
        assert!(matches!(
            parse(&text),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = temp_config("castaway_config_invalid", "this is [not toml");
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn file_not_found_for_missing_config() {
        let tmp = std::env::temp_dir().join("castaway_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn first_run_copies_only_castaway_toml() {
        let tmp = std::env::temp_dir().join("castaway_config_first_run");
        let _ = fs::remove_dir_all(&tmp);
        let defaults_dir = tmp.join("defaults");
        fs::create_dir_all(&defaults_dir).unwrap();
        fs::write(defaults_dir.join(CONFIG_FILE), defaults_text()).unwrap();
        fs::write(defaults_dir.join("castaway.local.toml.example"), "# local\n").unwrap();

        let target = tmp.join("config").join(CONFIG_FILE);
        assert_eq!(ensure_config_file(&tmp).unwrap(), Some(target.clone()));
        assert!(!tmp.join("config/castaway.local.toml.example").exists());

        // Local edits survive later runs.
        fs::write(&target, "# custom\n").unwrap();
        assert_eq!(ensure_config_file(&tmp).unwrap(), None);
        assert_eq!(fs::read_to_string(&target).unwrap(), "# custom\n");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn existing_config_loads_without_defaults() {
        let tmp = temp_config("castaway_config_no_defaults", &defaults_text());
        assert_eq!(ensure_config_file(&tmp).unwrap(), None);
        assert!(load_config_in(&tmp).is_ok());
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_castaway_toml_is_reported_by_name() {
        let tmp = std::env::temp_dir().join("castaway_config_missing_toml");
        let _ = fs::remove_dir_all(&tmp);
        // An empty config/ directory is not enough.
        fs::create_dir_all(tmp.join("config")).unwrap();

        match ensure_config_file(&tmp).unwrap_err() {
            ConfigError::DefaultsCopyError { message } => {
                assert!(message.contains("defaults/castaway.toml"), "{message}");
            }
            other => panic!("expected DefaultsCopyError, got: {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }
}
