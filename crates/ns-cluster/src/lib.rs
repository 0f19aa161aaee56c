//! # ns-cluster
//!
//! Master-worker distribution of a search run over TCP.
//!
//! The [`Coordinator`] keeps one persistent connection per worker and one
//! task outstanding on each. Worker machines run a [`RewardClient`] that
//! evaluates every config string it receives with a local reward command.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod remote;
pub mod worker;

pub use client::RewardClient;
pub use config::{
    ClientConfig, CoordinatorConfig, CoordinatorSettings, DEFAULT_ADDRESS, DEFAULT_BUFFER_SIZE,
};
pub use coordinator::{Coordinator, CoordinatorOutcome, CoordinatorPhase, DispatchStats};
pub use remote::RemoteEvaluator;
pub use worker::{Task, TaskResult, WorkerEvent, WorkerMessage};
