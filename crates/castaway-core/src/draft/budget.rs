// Auction budget rules.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::model::{DraftPick, Team, TeamId};

/// Minimum winning bid in an auction.
pub const MIN_BID: u32 = 1;

/// Reject a bid that is below the minimum or above what the team has left.
pub fn ensure_affordable(remaining: u32, amount: u32) -> EngineResult<()> {
    if amount < MIN_BID {
        return Err(EngineError::validation(format!(
            "bid must be at least {MIN_BID}, got {amount}"
        )));
    }
    if amount > remaining {
        return Err(EngineError::InsufficientBudget {
            requested: amount,
            remaining,
        });
    }
    Ok(())
}

/// Largest bid a team can place while still affording the minimum bid for
/// every other open roster slot.
pub fn max_bid(remaining: u32, open_slots: u32) -> u32 {
    if open_slots == 0 {
        return 0;
    }
    remaining.saturating_sub((open_slots - 1) * MIN_BID)
}

/// Per-team view of an auction's money.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSummary {
    pub team_id: TeamId,
    pub team_name: String,
    pub spent: u32,
    pub remaining: u32,
    pub rostered: u32,
    pub open_slots: u32,
    pub max_bid: u32,
}

/// Summarize every team's budget, in team slot order.
pub fn summarize(
    teams: &[Team],
    picks: &[DraftPick],
    budget: u32,
    roster_size: u32,
) -> Vec<BudgetSummary> {
    let mut teams: Vec<&Team> = teams.iter().collect();
    teams.sort_by_key(|t| t.slot);

    teams
        .into_iter()
        .map(|team| {
            let owned: Vec<&DraftPick> = picks.iter().filter(|p| p.team_id == team.id).collect();
            let rostered = owned.len() as u32;
            let remaining = team.budget_remaining.unwrap_or(budget);
            let open_slots = roster_size.saturating_sub(rostered);
            BudgetSummary {
                team_id: team.id,
                team_name: team.name.clone(),
                spent: owned.iter().filter_map(|p| p.price).sum(),
                remaining,
                rostered,
                open_slots,
                max_bid: max_bid(remaining, open_slots),
            }
        })
        .collect()
}
