// Snake pick order and the one-time random draft position shuffle.

use rand::seq::SliceRandom;
use rand::Rng;

/// One position in the pick sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickSlot {
    /// Index into the draft order (0-based draft position).
    pub team_index: u32,
    /// 0-based round.
    pub round: u32,
    /// 1-based pick number across the whole draft.
    pub overall_pick: u32,
}

/// Lazy snake-draft sequence: even rounds run forward, odd rounds run in
/// reverse. Cloning or calling `restart` replays it from the first pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnakeOrder {
    num_teams: u32,
    num_rounds: u32,
    next: u32,
}

impl SnakeOrder {
    pub fn new(num_teams: u32, num_rounds: u32) -> Self {
        SnakeOrder {
            num_teams,
            num_rounds,
            next: 0,
        }
    }

    pub fn total_picks(&self) -> u32 {
        self.num_teams * self.num_rounds
    }

    /// The slot at 0-based sequence position `index`, if within the draft.
    pub fn slot_at(&self, index: u32) -> Option<PickSlot> {
        if index >= self.total_picks() {
            return None;
        }
        let round = index / self.num_teams;
        let offset = index % self.num_teams;
        let team_index = if round % 2 == 0 {
            offset
        } else {
            self.num_teams - 1 - offset
        };
        Some(PickSlot {
            team_index,
            round,
            overall_pick: index + 1,
        })
    }

    pub fn restart(&mut self) {
        self.next = 0;
    }
}

impl Iterator for SnakeOrder {
    type Item = PickSlot;

    fn next(&mut self) -> Option<PickSlot> {
        let slot = self.slot_at(self.next)?;
        self.next += 1;
        Some(slot)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total_picks().saturating_sub(self.next) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for SnakeOrder {}

/// Random draft positions `0..team_count`, one per team in input order.
///
/// Uses `SliceRandom::shuffle`, a Fisher-Yates shuffle, so every ordering is
/// equally likely.
pub fn shuffled_draft_positions<R: Rng + ?Sized>(team_count: usize, rng: &mut R) -> Vec<u32> {
    let mut positions: Vec<u32> = (0..team_count as u32).collect();
    positions.shuffle(rng);
    positions
}
