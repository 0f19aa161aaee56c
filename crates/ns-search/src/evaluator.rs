//! Reward and cost evaluators backed by external processes.

use std::process::{Command, Output};
use std::sync::Arc;

use tracing::{debug, error, warn};

use ns_types::{config_error, ConfigVector, NsError, NsResult};

/// Scores a rendered [`ConfigVector`].
pub trait RewardEvaluator {
    /// Evaluate the compact config string (see [`ConfigVector`]'s `Display`).
    ///
    /// Malformed evaluator output degrades to a reward of `0.0`; only
    /// spawn or transport failures are returned as errors.
    fn evaluate(&mut self, config: &str) -> NsResult<f64>;
}

impl<E: RewardEvaluator + ?Sized> RewardEvaluator for Box<E> {
    fn evaluate(&mut self, config: &str) -> NsResult<f64> {
        (**self).evaluate(config)
    }
}

/// Reward reported when evaluator output cannot be parsed.
pub const FALLBACK_REWARD: f64 = 0.0;

/// Extract the reward from evaluator output: the first whitespace-delimited
/// token of the last line after trimming.
pub fn parse_reward(output: &str) -> Option<f64> {
    output
        .trim()
        .lines()
        .last()?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

/// [`parse_reward`] with the fallback applied and logged.
pub fn reward_or_fallback(config: &str, output: &str, stderr: &str) -> f64 {
    match parse_reward(output) {
        Some(reward) => reward,
        None => {
            warn!(
                config,
                out = output.trim(),
                err = stderr.trim(),
                "unparsable reward, using fallback"
            );
            FALLBACK_REWARD
        }
    }
}

// ---------------------------------------------------------------------------
// Command construction
// ---------------------------------------------------------------------------

/// Maps a config string to the argv of the process that scores it.
pub trait CommandBuilder: Send + Sync {
    fn build(&self, config: &str) -> Vec<String>;
}

impl<F> CommandBuilder for F
where
    F: Fn(&str) -> Vec<String> + Send + Sync,
{
    fn build(&self, config: &str) -> Vec<String> {
        self(config)
    }
}

/// Fixed program and arguments with the config string appended last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendArgCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl AppendArgCommand {
    /// Split `argv` into program and leading arguments.
    pub fn from_argv(argv: Vec<String>) -> NsResult<Self> {
        let mut argv = argv.into_iter();
        let program = argv
            .next()
            .ok_or_else(|| config_error!("evaluator command must not be empty"))?;
        Ok(Self {
            program,
            args: argv.collect(),
        })
    }
}

impl CommandBuilder for AppendArgCommand {
    fn build(&self, config: &str) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 2);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv.push(config.to_string());
        argv
    }
}

/// Run `argv` to completion, capturing stdout and stderr. The exit status
/// is not inspected.
fn run_captured(argv: &[String]) -> NsResult<Output> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| config_error!("command builder produced an empty argv"))?;
    Command::new(program)
        .args(args)
        .output()
        .map_err(|source| NsError::Spawn {
            program: program.clone(),
            source,
        })
}

// ---------------------------------------------------------------------------
// Local process reward evaluator
// ---------------------------------------------------------------------------

/// Spawns one process per evaluation and reads the reward from its stdout.
#[derive(Clone)]
pub struct ProcessEvaluator {
    builder: Arc<dyn CommandBuilder>,
}

impl ProcessEvaluator {
    pub fn new(builder: impl CommandBuilder + 'static) -> Self {
        Self {
            builder: Arc::new(builder),
        }
    }

    /// Evaluator running `argv` with the config string appended.
    pub fn from_argv(argv: Vec<String>) -> NsResult<Self> {
        Ok(Self::new(AppendArgCommand::from_argv(argv)?))
    }
}

impl std::fmt::Debug for ProcessEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessEvaluator").finish_non_exhaustive()
    }
}

impl RewardEvaluator for ProcessEvaluator {
    fn evaluate(&mut self, config: &str) -> NsResult<f64> {
        let argv = self.builder.build(config);
        let output = run_captured(&argv)?;
        let out = String::from_utf8_lossy(&output.stdout);
        let err = String::from_utf8_lossy(&output.stderr);
        debug!(config, out = %out, err = %err, "evaluator process finished");
        Ok(reward_or_fallback(config, &out, &err))
    }
}

// ---------------------------------------------------------------------------
// Cost evaluator
// ---------------------------------------------------------------------------

/// Cost and size of a configuration, as reported by a cost command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cost {
    pub cost: f64,
    pub size: f64,
}

impl Cost {
    /// Reported when the cost command fails or prints something else than
    /// two numbers.
    pub const SENTINEL: Cost = Cost {
        cost: 1e9,
        size: 1e9,
    };
}

/// Measures the cost of a configuration for constrained search.
pub trait CostEvaluator: Send {
    fn cost(&mut self, var: &ConfigVector) -> Cost;
}

/// Parse exactly two whitespace-separated floats.
pub fn parse_cost(output: &str) -> Result<Cost, String> {
    let tokens: Vec<&str> = output.split_whitespace().collect();
    match tokens.as_slice() {
        [cost, size] => {
            let cost = cost.parse::<f64>().map_err(|e| format!("cost {cost:?}: {e}"))?;
            let size = size.parse::<f64>().map_err(|e| format!("size {size:?}: {e}"))?;
            Ok(Cost { cost, size })
        }
        _ => Err(format!(
            "expected two values, got {} in {:?}",
            tokens.len(),
            output.trim()
        )),
    }
}

/// Runs a fixed command with the compact config string appended and blocks
/// until it exits.
#[derive(Debug, Clone)]
pub struct ProcessCostEvaluator {
    command: AppendArgCommand,
}

impl ProcessCostEvaluator {
    pub fn new(argv: Vec<String>) -> NsResult<Self> {
        Ok(Self {
            command: AppendArgCommand::from_argv(argv)?,
        })
    }
}

impl CostEvaluator for ProcessCostEvaluator {
    fn cost(&mut self, var: &ConfigVector) -> Cost {
        let argv = self.command.build(&var.to_string());
        let parsed = run_captured(&argv)
            .map_err(|e| e.to_string())
            .and_then(|output| parse_cost(&String::from_utf8_lossy(&output.stdout)));

        match parsed {
            Ok(cost) => {
                debug!(var = %var, cost = cost.cost, size = cost.size, "cost measured");
                cost
            }
            Err(e) => {
                error!(var = %var, error = %e, "cost evaluation failed, using sentinel");
                Cost::SENTINEL
            }
        }
    }
}
