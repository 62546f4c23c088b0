// Roster sizing from pool size and team count.

/// How many contestants each team drafts, and how many are left over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterSizing {
    pub roster_size: u32,
    pub remainder: u32,
}

/// Split `active_contestants` evenly across `team_count` teams.
///
/// `team_count` must be at least 1; callers reject zero before getting here.
pub fn roster_sizing(active_contestants: u32, team_count: u32) -> RosterSizing {
    debug_assert!(team_count >= 1, "team_count must be positive");
    RosterSizing {
        roster_size: active_contestants / team_count,
        remainder: active_contestants % team_count,
    }
}
