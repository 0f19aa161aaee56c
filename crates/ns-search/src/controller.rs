//! Proposal/acceptance strategies and their configuration.

use serde::{Deserialize, Serialize};

use ns_types::{config_error, validation_error, ConfigVector, NsResult, RangeTable};

use crate::annealing::{Constraint, SimulatedAnnealing};
use crate::evaluator::ProcessCostEvaluator;

/// Common trait for all search controllers.
///
/// A controller proposes candidates and decides whether an evaluated
/// candidate replaces the running "current" vector.
pub trait Controller: Send {
    /// Starting point for a run.
    fn generate_init_var(&mut self) -> ConfigVector;

    /// Next proposal derived from the current accepted vector and the
    /// controller's own cursor state. `var` is never modified.
    fn generate_new_var(&mut self, var: &ConfigVector) -> ConfigVector;

    /// Accept or reject a proposal. `iteration` is the 1-based step counter.
    fn check(&mut self, reward_new: f64, reward: f64, iteration: usize) -> bool;

    /// Human-readable controller name.
    fn name(&self) -> &str;

    /// Space every proposal is drawn from.
    fn range_table(&self) -> &RangeTable;
}

impl<C: Controller + ?Sized> Controller for Box<C> {
    fn generate_init_var(&mut self) -> ConfigVector {
        (**self).generate_init_var()
    }

    fn generate_new_var(&mut self, var: &ConfigVector) -> ConfigVector {
        (**self).generate_new_var(var)
    }

    fn check(&mut self, reward_new: f64, reward: f64, iteration: usize) -> bool {
        (**self).check(reward_new, reward, iteration)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn range_table(&self) -> &RangeTable {
        (**self).range_table()
    }
}

// ---------------------------------------------------------------------------
// Enumerate
// ---------------------------------------------------------------------------

/// Exhaustive, cyclic walk over every point of the range table.
///
/// Points are ordered lexicographically with the last dimension varying
/// fastest. The walk wraps around after `total` proposals.
#[derive(Debug, Clone)]
pub struct EnumerateController {
    range_table: RangeTable,
    total: usize,
    index: usize,
}

impl EnumerateController {
    pub fn new(range_table: RangeTable) -> NsResult<Self> {
        let total = range_table.total_size().ok_or_else(|| {
            validation_error!(
                "range table {:?} is too large to enumerate",
                range_table.bounds()
            )
        })?;
        Ok(Self {
            range_table,
            total,
            index: 0,
        })
    }

    /// Number of points in one full period.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Mixed-radix decode of a position in the enumeration order.
    fn point(&self, mut index: usize) -> ConfigVector {
        let bounds = self.range_table.bounds();
        let mut values = vec![0; bounds.len()];
        for (slot, &bound) in values.iter_mut().zip(bounds).rev() {
            *slot = index % bound;
            index /= bound;
        }
        ConfigVector::new(values)
    }
}

impl Controller for EnumerateController {
    fn generate_init_var(&mut self) -> ConfigVector {
        self.point(0)
    }

    fn generate_new_var(&mut self, _var: &ConfigVector) -> ConfigVector {
        self.index = (self.index + 1) % self.total;
        self.point(self.index)
    }

    fn check(&mut self, reward_new: f64, reward: f64, _iteration: usize) -> bool {
        reward_new > reward
    }

    fn name(&self) -> &str {
        "enumerate"
    }

    fn range_table(&self) -> &RangeTable {
        &self.range_table
    }
}

// ---------------------------------------------------------------------------
// Greedy
// ---------------------------------------------------------------------------

/// Coordinate-wise hill climbing.
///
/// Sweeps the values of one dimension at a time. When a dimension's values
/// are used up the value cursor resets and the dimension cursor advances,
/// and the reset value `0` is written into the newly entered dimension in the
/// same call. After the last dimension every proposal is an unchanged copy.
#[derive(Debug, Clone)]
pub struct GreedyController {
    range_table: RangeTable,
    dim_index: usize,
    val_index: usize,
}

impl GreedyController {
    pub fn new(range_table: RangeTable) -> Self {
        Self {
            range_table,
            dim_index: 0,
            val_index: 0,
        }
    }

    /// Current `(dimension, value)` cursors.
    pub fn cursor(&self) -> (usize, usize) {
        (self.dim_index, self.val_index)
    }

    pub fn is_exhausted(&self) -> bool {
        self.dim_index >= self.range_table.dims()
    }
}

impl Controller for GreedyController {
    fn generate_init_var(&mut self) -> ConfigVector {
        self.range_table.zeros()
    }

    fn generate_new_var(&mut self, var: &ConfigVector) -> ConfigVector {
        if self.dim_index >= var.len() {
            return var.clone();
        }

        if self.val_index + 1 < self.range_table.bound(self.dim_index) {
            self.val_index += 1;
        } else {
            self.val_index = 0;
            self.dim_index += 1;
        }

        if self.dim_index < var.len() {
            var.with_value(self.dim_index, self.val_index)
        } else {
            var.clone()
        }
    }

    fn check(&mut self, reward_new: f64, reward: f64, _iteration: usize) -> bool {
        reward_new > reward
    }

    fn name(&self) -> &str {
        "greedy"
    }

    fn range_table(&self) -> &RangeTable {
        &self.range_table
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Serializable selection of a controller and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControllerConfig {
    Enumerate,
    Greedy,
    SimulatedAnnealing(AnnealingConfig),
}

/// Parameters for [`SimulatedAnnealing`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnealingConfig {
    /// Geometric cooling factor applied once per iteration.
    pub reduce_rate: f64,
    pub init_temperature: f64,
    /// Fixed RNG seed; `None` seeds from OS entropy.
    pub seed: Option<u64>,
    pub constraint: Option<ConstraintConfig>,
}

impl Default for AnnealingConfig {
    fn default() -> Self {
        Self {
            reduce_rate: 0.85,
            init_temperature: 1024.0,
            seed: None,
            constraint: None,
        }
    }
}

impl AnnealingConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_cooling(mut self, init_temperature: f64, reduce_rate: f64) -> Self {
        self.init_temperature = init_temperature;
        self.reduce_rate = reduce_rate;
        self
    }

    pub fn with_constraint(mut self, constraint: ConstraintConfig) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn validate(&self) -> NsResult<()> {
        if !(self.reduce_rate > 0.0 && self.reduce_rate <= 1.0) {
            return Err(config_error!(
                "reduce_rate must be in (0, 1], got {}",
                self.reduce_rate
            ));
        }
        if !(self.init_temperature > 0.0) {
            return Err(config_error!(
                "init_temperature must be positive, got {}",
                self.init_temperature
            ));
        }
        if let Some(constraint) = &self.constraint {
            constraint.validate()?;
        }
        Ok(())
    }
}

/// Cost window enforced by a constrained annealing run.
///
/// A vector is feasible when its cost lies in
/// `[min_threshold * ceiling, max_threshold * ceiling]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintConfig {
    pub ceiling: f64,
    pub max_threshold: f64,
    pub min_threshold: f64,
    /// Repair attempts per proposal.
    #[serde(default = "default_max_iter_number")]
    pub max_iter_number: usize,
    /// Cost command; the compact config string is appended as the last argument.
    pub command: Vec<String>,
}

fn default_max_iter_number() -> usize {
    300
}

impl ConstraintConfig {
    pub fn validate(&self) -> NsResult<()> {
        if self.command.is_empty() {
            return Err(config_error!("constraint command must not be empty"));
        }
        if self.min_threshold > self.max_threshold {
            return Err(config_error!(
                "min_threshold {} exceeds max_threshold {}",
                self.min_threshold,
                self.max_threshold
            ));
        }
        Ok(())
    }
}

impl ControllerConfig {
    /// Instantiate the configured controller for `range_table`.
    pub fn build(&self, range_table: RangeTable) -> NsResult<Box<dyn Controller>> {
        match self {
            Self::Enumerate => Ok(Box::new(EnumerateController::new(range_table)?)),
            Self::Greedy => Ok(Box::new(GreedyController::new(range_table))),
            Self::SimulatedAnnealing(config) => {
                config.validate()?;
                let mut controller = SimulatedAnnealing::new(
                    range_table,
                    config.reduce_rate,
                    config.init_temperature,
                );
                if let Some(seed) = config.seed {
                    controller = controller.with_seed(seed);
                }
                if let Some(constraint) = &config.constraint {
                    let evaluator = ProcessCostEvaluator::new(constraint.command.clone())?;
                    controller = controller.with_constraint(Constraint {
                        ceiling: constraint.ceiling,
                        max_threshold: constraint.max_threshold,
                        min_threshold: constraint.min_threshold,
                        max_iter_number: constraint.max_iter_number,
                        evaluator: Box::new(evaluator),
                    });
                }
                Ok(Box::new(controller))
            }
        }
    }
}
