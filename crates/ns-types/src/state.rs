//! Running search state and the report produced at the end of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::space::ConfigVector;

/// Unique search run identifier.
pub type RunId = Uuid;

/// Mutable state threaded through a search run.
///
/// `current_*` follows the controller's acceptance decisions, while `best_*`
/// tracks the maximum reward ever observed regardless of acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchState {
    pub current_var: ConfigVector,
    pub current_reward: f64,
    pub best_var: ConfigVector,
    pub best_reward: f64,
    /// Last completed step, 0 before the first one.
    pub iteration: usize,
    /// Number of proposals accepted into `current_var`.
    pub accepted: usize,
}

impl SearchState {
    pub fn new(init_var: ConfigVector, init_reward: f64) -> Self {
        Self {
            best_var: init_var.clone(),
            best_reward: init_reward,
            current_var: init_var,
            current_reward: init_reward,
            iteration: 0,
            accepted: 0,
        }
    }

    /// Apply the outcome of one evaluated proposal.
    pub fn record(
        &mut self,
        iteration: usize,
        proposal: &ConfigVector,
        reward_new: f64,
        accepted: bool,
    ) {
        self.iteration = iteration;
        if accepted {
            self.current_var = proposal.clone();
            self.current_reward = reward_new;
            self.accepted += 1;
        }
        if reward_new > self.best_reward {
            self.best_reward = reward_new;
            self.best_var = proposal.clone();
        }
    }
}

/// Summary of a finished search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub run_id: RunId,
    pub best_var: ConfigVector,
    pub best_reward: f64,
    pub current_var: ConfigVector,
    pub current_reward: f64,
    pub iterations: usize,
    pub accepted: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SearchOutcome {
    pub fn from_state(state: SearchState, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            best_var: state.best_var,
            best_reward: state.best_reward,
            current_var: state.current_var,
            current_reward: state.current_reward,
            iterations: state.iteration,
            accepted: state.accepted,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn best(&self) -> (&ConfigVector, f64) {
        (&self.best_var, self.best_reward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(values: &[usize]) -> ConfigVector {
        ConfigVector::new(values.to_vec())
    }

    #[test]
    fn accepted_proposal_becomes_current() {
        let mut state = SearchState::new(var(&[0, 0]), 1.0);
        state.record(1, &var(&[0, 1]), 2.0, true);

        assert_eq!(state.current_var, var(&[0, 1]));
        assert_eq!(state.current_reward, 2.0);
        assert_eq!(state.best_reward, 2.0);
        assert_eq!(state.accepted, 1);
        assert_eq!(state.iteration, 1);
    }

    #[test]
    fn best_tracks_rejected_improvements() {
        let mut state = SearchState::new(var(&[0]), 1.0);
        state.record(1, &var(&[3]), 5.0, false);

        assert_eq!(state.current_var, var(&[0]));
        assert_eq!(state.current_reward, 1.0);
        assert_eq!(state.best_var, var(&[3]));
        assert_eq!(state.best_reward, 5.0);
        assert_eq!(state.accepted, 0);
    }

    #[test]
    fn accepted_regression_keeps_best() {
        let mut state = SearchState::new(var(&[1]), 4.0);
        state.record(1, &var(&[2]), 3.0, true);

        assert_eq!(state.current_reward, 3.0);
        assert_eq!(state.best_var, var(&[1]));
        assert_eq!(state.best_reward, 4.0);
    }

    #[test]
    fn outcome_copies_final_state() {
        let mut state = SearchState::new(var(&[0]), 0.0);
        state.record(1, &var(&[1]), 0.5, true);
        state.record(2, &var(&[2]), 0.25, false);

        let started = Utc::now();
        let outcome = SearchOutcome::from_state(state, started);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.best(), (&var(&[1]), 0.5));
        assert!(outcome.finished_at >= outcome.started_at);

        let json = serde_json::to_string(&outcome).unwrap();
        let back: SearchOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(outcome, back);
    }
}
