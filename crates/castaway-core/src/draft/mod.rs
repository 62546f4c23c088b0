// Draft rules: roster sizing, pick order, auction budgets, draft lifecycle.

pub mod budget;
pub mod order;
pub mod roster;
pub mod state;
