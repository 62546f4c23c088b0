// Library root for the draft, prediction, and scoring settlement engine.
//
// The pure rule modules (draft, predictions, scoring, settlement, invite,
// title_pick) never touch storage. `db` is the SQLite persistence layer and
// `engine` wires both together behind the caller-facing operations.

pub mod auth;
pub mod clock;
pub mod db;
pub mod draft;
pub mod engine;
pub mod error;
pub mod import;
pub mod invite;
pub mod model;
pub mod predictions;
pub mod scoring;
pub mod settlement;
pub mod title_pick;

pub use engine::{Engine, EngineSettings};
pub use error::{EngineError, EngineResult};
