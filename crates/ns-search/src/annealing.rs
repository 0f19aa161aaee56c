//! Simulated annealing with optional cost-window repair.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use ns_types::{ConfigVector, RangeTable};

use crate::controller::Controller;
use crate::evaluator::CostEvaluator;

/// Cost window a constrained run keeps its proposals inside.
pub struct Constraint {
    pub ceiling: f64,
    pub max_threshold: f64,
    pub min_threshold: f64,
    /// Repair attempts per proposal before the last attempt is kept as is.
    pub max_iter_number: usize,
    pub evaluator: Box<dyn CostEvaluator>,
}

/// Which side of the cost window a vector fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    TooCostly,
    TooCheap,
}

impl Constraint {
    pub fn violation(&self, cost: f64) -> Option<Violation> {
        if cost > self.max_threshold * self.ceiling {
            Some(Violation::TooCostly)
        } else if cost < self.min_threshold * self.ceiling {
            Some(Violation::TooCheap)
        } else {
            None
        }
    }

    fn measure(&mut self, var: &ConfigVector) -> Option<Violation> {
        let cost = self.evaluator.cost(var);
        debug!(var = %var, cost = cost.cost, size = cost.size, "constraint cost");
        self.violation(cost.cost)
    }
}

/// Random single-dimension moves accepted by the Metropolis rule under a
/// geometric cooling schedule keyed to the iteration count.
pub struct SimulatedAnnealing {
    range_table: RangeTable,
    reduce_rate: f64,
    init_temperature: f64,
    constraint: Option<Constraint>,
    rng: ChaCha8Rng,
}

impl SimulatedAnnealing {
    pub fn new(range_table: RangeTable, reduce_rate: f64, init_temperature: f64) -> Self {
        Self {
            range_table,
            reduce_rate,
            init_temperature,
            constraint: None,
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn is_constrained(&self) -> bool {
        self.constraint.is_some()
    }

    /// `init_temperature * reduce_rate^iteration`.
    pub fn temperature(&self, iteration: usize) -> f64 {
        self.init_temperature * self.reduce_rate.powf(iteration as f64)
    }

    /// Probability that `check` accepts the given transition.
    pub fn acceptance_probability(&self, reward_new: f64, reward: f64, iteration: usize) -> f64 {
        if reward_new > reward {
            return 1.0;
        }
        ((reward_new - reward) / self.temperature(iteration)).exp()
    }

    /// Binary search for a shared ratio whose replicated vector lands inside
    /// the cost window. Stops once the half-open interval holds one value.
    fn constrained_init(
        range_table: &RangeTable,
        constraint: &mut Constraint,
    ) -> ConfigVector {
        let mut start = 0;
        let mut end = range_table.bound(0);
        let mut mid = (start + end) / 2;
        let mut var = replicated_within(range_table, mid);
        let mut violation = constraint.measure(&var);

        while end - start > 1 {
            match violation {
                None => break,
                Some(Violation::TooCostly) => start = mid,
                Some(Violation::TooCheap) => end = mid,
            }
            mid = (start + end) / 2;
            var = replicated_within(range_table, mid);
            violation = constraint.measure(&var);
        }

        debug!(var = %var, feasible = violation.is_none(), "constrained init");
        var
    }
}

/// `(ratio, ratio, ...)`, capped per dimension at its last valid value.
fn replicated_within(range_table: &RangeTable, ratio: usize) -> ConfigVector {
    ConfigVector::new(
        range_table
            .bounds()
            .iter()
            .map(|&bound| ratio.min(bound - 1))
            .collect(),
    )
}

fn mutate(rng: &mut ChaCha8Rng, range_table: &RangeTable, var: &ConfigVector) -> ConfigVector {
    let dim = rng.gen_range(0..range_table.dims());
    let value = rng.gen_range(0..range_table.bound(dim));
    var.with_value(dim, value)
}

impl Controller for SimulatedAnnealing {
    fn generate_init_var(&mut self) -> ConfigVector {
        match self.constraint.as_mut() {
            Some(constraint) => Self::constrained_init(&self.range_table, constraint),
            None => ConfigVector::new(
                self.range_table
                    .bounds()
                    .iter()
                    .map(|&bound| self.rng.gen_range(0..bound))
                    .collect(),
            ),
        }
    }

    fn generate_new_var(&mut self, var: &ConfigVector) -> ConfigVector {
        let Self {
            range_table,
            constraint,
            rng,
            ..
        } = self;

        let mut var_new = mutate(rng, range_table, var);
        if let Some(constraint) = constraint.as_mut() {
            for _ in 0..constraint.max_iter_number {
                if constraint.measure(&var_new).is_none() {
                    break;
                }
                var_new = mutate(rng, range_table, &var_new);
            }
        }
        var_new
    }

    fn check(&mut self, reward_new: f64, reward: f64, iteration: usize) -> bool {
        if reward_new > reward {
            return true;
        }
        let probability = self.acceptance_probability(reward_new, reward, iteration);
        self.rng.gen::<f64>() <= probability
    }

    fn name(&self) -> &str {
        "simulated_annealing"
    }

    fn range_table(&self) -> &RangeTable {
        &self.range_table
    }
}
