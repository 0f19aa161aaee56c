//! # ns-search
//!
//! Search controllers and reward evaluation for discrete black-box search.
//!
//! Provides the [`Controller`] strategies (exhaustive enumeration,
//! coordinate-wise greedy, simulated annealing with optional cost-window
//! repair), process-backed reward and cost evaluators, and the
//! single-evaluator [`SearchLoop`].

mod annealing;
mod controller;
mod evaluator;
mod search_loop;

pub use annealing::{Constraint, SimulatedAnnealing, Violation};
pub use controller::{
    AnnealingConfig, ConstraintConfig, Controller, ControllerConfig, EnumerateController,
    GreedyController,
};
pub use evaluator::{
    parse_cost, parse_reward, reward_or_fallback, AppendArgCommand, CommandBuilder, Cost,
    CostEvaluator, ProcessCostEvaluator, ProcessEvaluator, RewardEvaluator, FALLBACK_REWARD,
};
pub use search_loop::SearchLoop;
