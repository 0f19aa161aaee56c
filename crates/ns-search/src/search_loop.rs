//! Single-evaluator iterative search.

use chrono::Utc;
use tracing::{debug, info};

use ns_types::{ConfigVector, NsResult, SearchOutcome, SearchState};

use crate::controller::Controller;
use crate::evaluator::RewardEvaluator;

/// Drives a controller against one evaluator for a fixed number of steps.
///
/// There is no early stopping: every run evaluates exactly `max_iterations`
/// proposals. Evaluator errors abort the run.
pub struct SearchLoop<C, E> {
    controller: C,
    evaluator: E,
}

impl<C: Controller, E: RewardEvaluator> SearchLoop<C, E> {
    pub fn new(controller: C, evaluator: E) -> Self {
        Self {
            controller,
            evaluator,
        }
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.controller
    }

    pub fn into_parts(self) -> (C, E) {
        (self.controller, self.evaluator)
    }

    /// Search starting from the controller's own initial vector, evaluating
    /// it first to obtain the initial reward.
    pub fn search_from_init(&mut self, max_iterations: usize) -> NsResult<SearchOutcome> {
        let init_var = self.controller.generate_init_var();
        let init_reward = self.evaluator.evaluate(&init_var.to_string())?;
        self.search(max_iterations, init_var, init_reward)
    }

    /// Run `max_iterations` 1-indexed steps from `init_var`, whose reward is
    /// `init_reward`. The outcome's best reward is the maximum of
    /// `init_reward` and every reward observed. `init_var` must lie inside
    /// the controller's range table.
    pub fn search(
        &mut self,
        max_iterations: usize,
        init_var: ConfigVector,
        init_reward: f64,
    ) -> NsResult<SearchOutcome> {
        self.controller.range_table().validate(&init_var)?;
        let started_at = Utc::now();
        let mut state = SearchState::new(init_var, init_reward);

        info!(
            controller = self.controller.name(),
            max_iterations,
            reward = state.current_reward,
            var = %state.current_var,
            "iter 0"
        );

        for iteration in 1..=max_iterations {
            let proposal = self.controller.generate_new_var(&state.current_var);
            let reward_new = self.evaluator.evaluate(&proposal.to_string())?;
            debug!(iteration, reward_new, var_new = %proposal, "proposal evaluated");

            let accepted = self
                .controller
                .check(reward_new, state.current_reward, iteration);
            state.record(iteration, &proposal, reward_new, accepted);

            info!(
                iteration,
                accepted,
                reward = state.current_reward,
                var = %state.current_var,
                best_reward = state.best_reward,
                "iteration finished"
            );
        }

        Ok(SearchOutcome::from_state(state, started_at))
    }
}
