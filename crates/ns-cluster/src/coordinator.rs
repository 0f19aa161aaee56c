//! Master side of the distributed search.
//!
//! The [`Coordinator`] accepts a fixed number of persistent worker
//! connections, keeps exactly one task outstanding per worker, and feeds
//! every result back through the controller's acceptance check.
//!
//! Each worker slot has its own task channel, so a task can only ever be
//! evaluated over the connection it was addressed to. Results from all
//! slots share one channel and are consumed in arrival order.

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, TcpListener};
use tracing::{debug, info, warn};

use ns_search::Controller;
use ns_types::{
    config_error, internal_error, ConfigVector, NsError, NsResult, SearchOutcome, SearchState,
};

use crate::config::CoordinatorConfig;
use crate::worker::{
    spawn_worker, Task, TaskResult, WorkerEvent, WorkerHandle, WorkerMessage, WorkerSlot,
};

/// Lifecycle of a coordinator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorPhase {
    /// Not listening, or listening but no run in progress yet.
    Idle,
    /// Waiting for the configured number of worker connections.
    Accepting,
    /// Tasks are outstanding and results are being consumed.
    Dispatching,
    /// Stop sentinels sent; worker connections are being closed.
    Draining,
    /// Every worker of the last run has been shut down.
    Closed,
}

/// Message counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// One per worker, all proposed from the initial vector.
    pub initial_tasks: usize,
    /// One per consumed result.
    pub replacement_tasks: usize,
    pub stop_sentinels: usize,
}

/// Result of [`Coordinator::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorOutcome {
    pub outcome: SearchOutcome,
    pub stats: DispatchStats,
}

/// Distributed master: owns the listener and the per-run worker sessions.
#[derive(Debug)]
pub struct Coordinator {
    config: CoordinatorConfig,
    listener: Option<TcpListener>,
    phase: CoordinatorPhase,
}

/// Channels and threads of the workers taking part in one run.
#[derive(Default)]
struct Session {
    task_txs: Vec<Sender<WorkerMessage>>,
    workers: Vec<WorkerHandle>,
}

impl Session {
    fn send(&self, client_index: usize, var: ConfigVector) -> NsResult<()> {
        let tx = self
            .task_txs
            .get(client_index)
            .ok_or_else(|| internal_error!("no worker slot {client_index}"))?;
        tx.send(WorkerMessage::Task(Task { client_index, var }))
            .map_err(|_| NsError::unavailable(Some(client_index), "worker thread has exited"))
    }

    /// Send one stop sentinel per slot, then close every connection.
    /// Returns the number of sentinels delivered.
    fn drain(self) -> usize {
        let mut delivered = 0;
        for tx in &self.task_txs {
            if tx.send(WorkerMessage::Stop).is_ok() {
                delivered += 1;
            }
        }
        for worker in self.workers {
            worker.close();
        }
        delivered
    }
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> NsResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            listener: None,
            phase: CoordinatorPhase::Idle,
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn phase(&self) -> CoordinatorPhase {
        self.phase
    }

    /// Bind the listen socket.
    pub fn start(&mut self) -> NsResult<()> {
        let listener = TcpListener::bind(&self.config.address)?;
        info!(
            address = %listener.local_addr()?,
            num_workers = self.config.num_workers,
            "coordinator listening"
        );
        self.listener = Some(listener);
        self.phase = CoordinatorPhase::Idle;
        Ok(())
    }

    /// Address actually bound, useful when configured with port 0.
    pub fn local_addr(&self) -> NsResult<SocketAddr> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| config_error!("coordinator is not started"))?;
        Ok(listener.local_addr()?)
    }

    /// Drop the listen socket.
    pub fn close(&mut self) {
        if self.listener.take().is_some() {
            info!("coordinator closed");
        }
        self.phase = CoordinatorPhase::Closed;
    }

    /// Run `max_iterations` result-consuming iterations across all workers.
    ///
    /// Blocks until `num_workers` connections have arrived. A failure on any
    /// worker connection ends the run with
    /// [`NsError::EvaluatorUnavailable`] after the remaining workers are shut
    /// down. Tasks still outstanding when the run ends are discarded.
    /// `init_var` must lie inside the controller's range table.
    pub fn run<C: Controller + ?Sized>(
        &mut self,
        controller: &mut C,
        max_iterations: usize,
        init_var: ConfigVector,
        init_reward: f64,
    ) -> NsResult<CoordinatorOutcome> {
        controller.range_table().validate(&init_var)?;
        let started_at = Utc::now();

        self.phase = CoordinatorPhase::Accepting;
        let slots = match self.accept_workers() {
            Ok(slots) => slots,
            Err(error) => {
                self.phase = CoordinatorPhase::Idle;
                return Err(error);
            }
        };

        self.phase = CoordinatorPhase::Dispatching;
        let mut session = Session::default();
        let mut stats = DispatchStats::default();
        let result = self.dispatch(
            &mut session,
            &mut stats,
            slots,
            controller,
            max_iterations,
            SearchState::new(init_var, init_reward),
        );

        self.phase = CoordinatorPhase::Draining;
        stats.stop_sentinels = session.drain();
        self.phase = CoordinatorPhase::Closed;
        info!(?stats, "workers shut down");

        let state = result?;
        Ok(CoordinatorOutcome {
            outcome: SearchOutcome::from_state(state, started_at),
            stats,
        })
    }

    fn accept_workers(&self) -> NsResult<Vec<WorkerSlot>> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| config_error!("coordinator is not started"))?;
        let timeout = self.config.io_timeout();

        let mut slots = Vec::with_capacity(self.config.num_workers);
        for client_index in 0..self.config.num_workers {
            let (connection, peer) = listener.accept()?;
            connection.set_read_timeout(timeout)?;
            connection.set_write_timeout(timeout)?;
            connection.set_nodelay(true)?;
            info!(client_index, peer = %peer, "worker connected");
            slots.push(WorkerSlot {
                client_index,
                peer,
                connection,
            });
        }
        Ok(slots)
    }

    fn dispatch<C: Controller + ?Sized>(
        &self,
        session: &mut Session,
        stats: &mut DispatchStats,
        slots: Vec<WorkerSlot>,
        controller: &mut C,
        max_iterations: usize,
        mut state: SearchState,
    ) -> NsResult<SearchState> {
        info!(
            controller = controller.name(),
            reward = state.current_reward,
            var = %state.current_var,
            "iter 0"
        );

        let (result_tx, result_rx) = unbounded();
        for slot in slots {
            let (task_tx, task_rx) = unbounded();
            let client_index = slot.client_index;
            session.task_txs.push(task_tx);

            // Every initial proposal perturbs the same starting vector.
            let proposal = controller.generate_new_var(&state.current_var);
            session.send(client_index, proposal)?;
            stats.initial_tasks += 1;

            session.workers.push(spawn_worker(
                slot,
                self.config.buffer_size,
                task_rx,
                result_tx.clone(),
            )?);
        }
        // Only workers hold result senders from here on.
        drop(result_tx);

        for iteration in 1..=max_iterations {
            let result = next_result(&result_rx, iteration)?;
            debug!(
                client_index = result.client_index,
                reward_new = result.reward,
                var_new = %result.var,
                "result received"
            );

            let accepted = controller.check(result.reward, state.current_reward, iteration);
            state.record(iteration, &result.var, result.reward, accepted);
            info!(
                iteration,
                accepted,
                reward = state.current_reward,
                var = %state.current_var,
                best_reward = state.best_reward,
                "iteration finished"
            );

            let proposal = controller.generate_new_var(&state.current_var);
            session.send(result.client_index, proposal)?;
            stats.replacement_tasks += 1;
        }

        Ok(state)
    }
}

fn next_result(
    results: &Receiver<WorkerEvent>,
    iteration: usize,
) -> NsResult<TaskResult> {
    match results.recv() {
        Ok(WorkerEvent::Completed(result)) => Ok(result),
        Ok(WorkerEvent::Failed {
            client_index,
            error,
        }) => {
            warn!(client_index, iteration, error = %error, "aborting run");
            Err(error.with_client_index(client_index))
        }
        Err(_) => Err(internal_error!(
            "every worker exited before iteration {iteration}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ns_search::{EnumerateController, GreedyController, SimulatedAnnealing};
    use ns_types::RangeTable;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    fn table(bounds: &[usize]) -> RangeTable {
        RangeTable::new(bounds.to_vec()).unwrap()
    }

    /// Log of `(worker id, config, reward)` served by fake workers.
    type ServedLog = Arc<Mutex<Vec<(usize, String, f64)>>>;

    /// Fake remote worker scoring each vector with `score` until the
    /// coordinator closes the connection.
    fn fake_worker(
        id: usize,
        addr: SocketAddr,
        log: ServedLog,
        score: fn(&[usize]) -> f64,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            let mut buf = [0u8; 1024];
            loop {
                let n = match stream.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                let config = String::from_utf8_lossy(&buf[..n]).into_owned();
                let var: ConfigVector = config.parse().unwrap();
                let reward = score(var.values());
                log.lock().unwrap().push((id, config, reward));
                if stream.write_all(reward.to_string().as_bytes()).is_err() {
                    return;
                }
            }
        })
    }

    fn started(num_workers: usize) -> Coordinator {
        let config = CoordinatorConfig::new("127.0.0.1:0", num_workers)
            .with_io_timeout(Some(Duration::from_secs(10)));
        let mut coordinator = Coordinator::new(config).unwrap();
        coordinator.start().unwrap();
        coordinator
    }

    fn sum_score(v: &[usize]) -> f64 {
        v.iter().sum::<usize>() as f64
    }

    #[test]
    fn run_finds_best_and_counts_messages() {
        let mut coordinator = started(2);
        let addr = coordinator.local_addr().unwrap();
        let log: ServedLog = Arc::default();
        let workers: Vec<_> = (0..2)
            .map(|id| fake_worker(id, addr, Arc::clone(&log), sum_score))
            .collect();

        let mut controller = EnumerateController::new(table(&[2, 3])).unwrap();
        let init = controller.generate_init_var();
        let result = coordinator.run(&mut controller, 10, init, 0.0).unwrap();

        assert_eq!(coordinator.phase(), CoordinatorPhase::Closed);
        assert_eq!(
            result.stats,
            DispatchStats {
                initial_tasks: 2,
                replacement_tasks: 10,
                stop_sentinels: 2,
            }
        );
        assert_eq!(result.outcome.iterations, 10);
        assert_eq!(result.outcome.best_var, ConfigVector::new(vec![1, 2]));
        assert_eq!(result.outcome.best_reward, 3.0);

        for worker in workers {
            worker.join().unwrap();
        }
        coordinator.close();
    }

    #[test]
    fn best_is_one_of_the_served_results() {
        let mut coordinator = started(3);
        let addr = coordinator.local_addr().unwrap();
        let log: ServedLog = Arc::default();
        let workers: Vec<_> = (0..3)
            .map(|id| {
                fake_worker(id, addr, Arc::clone(&log), |v: &[usize]| {
                    (v[0] * 7 % 5) as f64 - v[1] as f64
                })
            })
            .collect();

        let mut controller = SimulatedAnnealing::new(table(&[8, 8]), 0.85, 16.0).with_seed(23);
        let init = controller.generate_init_var();
        let result = coordinator.run(&mut controller, 40, init, -100.0).unwrap();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(result.outcome.iterations, 40);
        let best_var = result.outcome.best_var.to_string();
        let served = log.lock().unwrap();
        assert!(served.len() >= 40);
        assert!(served
            .iter()
            .all(|(_, _, reward)| *reward <= 4.0 && *reward >= -7.0));
        assert!(served
            .iter()
            .any(|(_, config, reward)| *reward == result.outcome.best_reward && *config == best_var));
    }

    #[test]
    fn initial_batch_perturbs_the_same_vector() {
        let mut coordinator = started(2);
        let addr = coordinator.local_addr().unwrap();
        let log: ServedLog = Arc::default();
        let workers: Vec<_> = (0..2)
            .map(|id| fake_worker(id, addr, Arc::clone(&log), |_: &[usize]| 0.0))
            .collect();

        // Greedy from (0, 0, 0) on a flat landscape: nothing is accepted, so
        // every proposal is a one-coordinate move away from the start.
        let mut controller = GreedyController::new(table(&[3, 3, 3]));
        let init = ConfigVector::new(vec![0, 0, 0]);
        let result = coordinator.run(&mut controller, 2, init, 0.0).unwrap();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(result.outcome.accepted, 0);
        assert_eq!(result.outcome.current_var, ConfigVector::new(vec![0, 0, 0]));
        let served = log.lock().unwrap();
        assert!(served.len() >= 2);
        for (_, config, _) in served.iter() {
            let var: ConfigVector = config.parse().unwrap();
            let moved = var.values().iter().filter(|&&v| v != 0).count();
            assert!(moved <= 1, "{config} is not a single-coordinate move");
        }
    }

    #[test]
    fn every_worker_keeps_serving() {
        let mut coordinator = started(2);
        let addr = coordinator.local_addr().unwrap();
        let log: ServedLog = Arc::default();
        let first = fake_worker(0, addr, Arc::clone(&log), |_: &[usize]| 1.0);
        let second = fake_worker(1, addr, Arc::clone(&log), |_: &[usize]| 1.0);

        let mut controller = EnumerateController::new(table(&[4, 4])).unwrap();
        let result = coordinator
            .run(&mut controller, 20, ConfigVector::new(vec![0, 0]), 0.0)
            .unwrap();
        first.join().unwrap();
        second.join().unwrap();

        assert_eq!(result.stats.replacement_tasks, 20);
        assert_eq!(result.outcome.best_reward, 1.0);
        let served = log.lock().unwrap();
        assert!(served.iter().any(|(id, _, _)| *id == 0));
        assert!(served.iter().any(|(id, _, _)| *id == 1));
    }

    #[test]
    fn dead_worker_aborts_run() {
        let mut coordinator = started(2);
        let addr = coordinator.local_addr().unwrap();
        let log: ServedLog = Arc::default();
        let healthy = fake_worker(0, addr, Arc::clone(&log), sum_score);
        let dead = thread::spawn(move || {
            let stream = TcpStream::connect(addr).unwrap();
            drop(stream);
        });

        let mut controller = EnumerateController::new(table(&[3, 3])).unwrap();
        let err = coordinator
            .run(&mut controller, 10_000, ConfigVector::new(vec![0, 0]), 0.0)
            .unwrap_err();
        assert!(err.is_evaluator_unavailable(), "unexpected error: {err}");
        assert_eq!(coordinator.phase(), CoordinatorPhase::Closed);

        dead.join().unwrap();
        healthy.join().unwrap();
    }

    #[test]
    fn silent_worker_times_out() {
        let config = CoordinatorConfig::new("127.0.0.1:0", 1)
            .with_io_timeout(Some(Duration::from_millis(200)));
        let mut coordinator = Coordinator::new(config).unwrap();
        coordinator.start().unwrap();
        let addr = coordinator.local_addr().unwrap();

        let silent = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            let mut buf = [0u8; 64];
            // Read the task but never answer; return once the coordinator
            // closes the connection.
            while let Ok(n) = stream.read(&mut buf) {
                if n == 0 {
                    break;
                }
            }
        });

        let mut controller = GreedyController::new(table(&[2]));
        let err = coordinator
            .run(&mut controller, 3, ConfigVector::new(vec![0]), 0.0)
            .unwrap_err();
        match err {
            NsError::EvaluatorUnavailable {
                client_index,
                message,
            } => {
                assert_eq!(client_index, Some(0));
                assert!(message.contains("timeout"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
        silent.join().unwrap();
    }

    #[test]
    fn run_requires_start() {
        let mut coordinator =
            Coordinator::new(CoordinatorConfig::new("127.0.0.1:0", 1)).unwrap();
        assert_eq!(coordinator.phase(), CoordinatorPhase::Idle);
        assert!(coordinator.local_addr().is_err());

        let mut controller = GreedyController::new(table(&[2]));
        let err = coordinator
            .run(&mut controller, 1, ConfigVector::new(vec![0]), 0.0)
            .unwrap_err();
        assert!(matches!(err, NsError::Config(_)));
        assert_eq!(coordinator.phase(), CoordinatorPhase::Idle);
    }

    #[test]
    fn init_var_outside_range_table_is_rejected_before_accepting() {
        // No worker ever connects, so reaching accept() would block.
        let mut coordinator = started(1);
        let mut controller = GreedyController::new(table(&[1]));
        let err = coordinator
            .run(&mut controller, 3, ConfigVector::new(vec![0, 0, 0]), 0.0)
            .unwrap_err();
        assert!(matches!(err, NsError::Validation(_)), "{err}");
        assert_eq!(coordinator.phase(), CoordinatorPhase::Idle);

        let mut controller = SimulatedAnnealing::new(table(&[4, 4]), 0.85, 8.0).with_seed(3);
        let err = coordinator
            .run(&mut controller, 3, ConfigVector::new(vec![9, 0]), 0.0)
            .unwrap_err();
        assert!(matches!(err, NsError::Validation(_)), "{err}");
        coordinator.close();
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(Coordinator::new(CoordinatorConfig::new("127.0.0.1:0", 0)).is_err());
    }
}
