//! Worker slots: one thread per remote connection, fed by its own channel.

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use ns_search::RewardEvaluator;
use ns_types::{internal_error, ConfigVector, NsError, NsResult};

use crate::remote::RemoteEvaluator;

/// A candidate addressed to one worker slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub client_index: usize,
    pub var: ConfigVector,
}

/// An evaluated task, tagged with the slot that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub client_index: usize,
    pub var: ConfigVector,
    pub reward: f64,
}

/// Messages on a slot's task channel.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Task(Task),
    /// Leave the dequeue loop.
    Stop,
}

/// Messages on the shared result channel.
#[derive(Debug)]
pub enum WorkerEvent {
    Completed(TaskResult),
    /// The slot's connection failed; the worker thread has exited.
    Failed { client_index: usize, error: NsError },
}

/// One accepted worker connection.
#[derive(Debug)]
pub struct WorkerSlot {
    pub client_index: usize,
    pub peer: SocketAddr,
    pub connection: TcpStream,
}

/// Running worker thread plus a handle to close its connection.
#[derive(Debug)]
pub struct WorkerHandle {
    client_index: usize,
    connection: TcpStream,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn client_index(&self) -> usize {
        self.client_index
    }

    /// Close the connection and wait for the thread to exit.
    ///
    /// An evaluation still in flight fails once the connection is shut down,
    /// so this never waits on a slow remote reward.
    pub fn close(self) {
        let _ = self.connection.shutdown(Shutdown::Both);
        if self.thread.join().is_err() {
            error!(client_index = self.client_index, "worker thread panicked");
        }
    }
}

/// Start the worker thread for `slot`.
///
/// The thread evaluates every task from `tasks` over the slot's connection
/// and reports to `results` until it receives [`WorkerMessage::Stop`], its
/// channel disconnects, or the connection fails.
pub fn spawn_worker(
    slot: WorkerSlot,
    buffer_size: usize,
    tasks: Receiver<WorkerMessage>,
    results: Sender<WorkerEvent>,
) -> NsResult<WorkerHandle> {
    let client_index = slot.client_index;
    let connection = slot.connection.try_clone()?;
    let evaluator = RemoteEvaluator::new(slot.connection, buffer_size).for_client(client_index);

    let thread = thread::Builder::new()
        .name(format!("ns-worker-{client_index}"))
        .spawn(move || worker_loop(client_index, evaluator, tasks, results))
        .map_err(|e| internal_error!("failed to spawn worker {client_index}: {e}"))?;

    info!(client_index, peer = %slot.peer, "worker started");
    Ok(WorkerHandle {
        client_index,
        connection,
        thread,
    })
}

fn worker_loop<E: RewardEvaluator>(
    client_index: usize,
    mut evaluator: E,
    tasks: Receiver<WorkerMessage>,
    results: Sender<WorkerEvent>,
) {
    for message in tasks.iter() {
        let task = match message {
            WorkerMessage::Task(task) => task,
            WorkerMessage::Stop => {
                debug!(client_index, "stop received");
                break;
            }
        };

        let event = match evaluator.evaluate(&task.var.to_string()) {
            Ok(reward) => WorkerEvent::Completed(TaskResult {
                client_index,
                var: task.var,
                reward,
            }),
            Err(error) => {
                // A queued stop means the coordinator is draining and closed
                // this connection under the in-flight task.
                if matches!(tasks.try_recv(), Ok(WorkerMessage::Stop)) {
                    debug!(client_index, error = %error, "connection closed during shutdown");
                    return;
                }
                warn!(client_index, error = %error, "worker connection failed");
                let _ = results.send(WorkerEvent::Failed {
                    client_index,
                    error: error.with_client_index(client_index),
                });
                return;
            }
        };

        if results.send(event).is_err() {
            // Coordinator is gone; nobody will read further results.
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    struct Doubling;

    impl RewardEvaluator for Doubling {
        fn evaluate(&mut self, config: &str) -> NsResult<f64> {
            let var: ConfigVector = config.parse()?;
            Ok(var.values().iter().sum::<usize>() as f64 * 2.0)
        }
    }

    struct Failing;

    impl RewardEvaluator for Failing {
        fn evaluate(&mut self, _config: &str) -> NsResult<f64> {
            Err(NsError::unavailable(None, "reset"))
        }
    }

    fn task(client_index: usize, values: &[usize]) -> WorkerMessage {
        WorkerMessage::Task(Task {
            client_index,
            var: ConfigVector::new(values.to_vec()),
        })
    }

    #[test]
    fn loop_evaluates_until_stop() {
        let (task_tx, task_rx) = unbounded();
        let (result_tx, result_rx) = unbounded();
        task_tx.send(task(4, &[1, 2])).unwrap();
        task_tx.send(task(4, &[3, 3])).unwrap();
        task_tx.send(WorkerMessage::Stop).unwrap();
        task_tx.send(task(4, &[9, 9])).unwrap();

        worker_loop(4, Doubling, task_rx, result_tx);

        let rewards: Vec<f64> = result_rx
            .try_iter()
            .map(|event| match event {
                WorkerEvent::Completed(result) => {
                    assert_eq!(result.client_index, 4);
                    result.reward
                }
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        // The task queued after the stop sentinel is never evaluated.
        assert_eq!(rewards, vec![6.0, 12.0]);
    }

    #[test]
    fn loop_reports_failure_and_exits() {
        let (task_tx, task_rx) = unbounded();
        let (result_tx, result_rx) = unbounded();
        task_tx.send(task(1, &[0])).unwrap();
        task_tx.send(task(1, &[1])).unwrap();

        worker_loop(1, Failing, task_rx, result_tx);

        let events: Vec<WorkerEvent> = result_rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        match &events[0] {
            WorkerEvent::Failed { client_index, error } => {
                assert_eq!(*client_index, 1);
                assert!(error.to_string().contains("client 1"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn failure_after_stop_is_not_reported() {
        let (task_tx, task_rx) = unbounded();
        let (result_tx, result_rx) = unbounded();
        task_tx.send(task(3, &[2])).unwrap();
        task_tx.send(WorkerMessage::Stop).unwrap();

        worker_loop(3, Failing, task_rx, result_tx);

        assert_eq!(result_rx.try_iter().count(), 0);
    }

    #[test]
    fn loop_exits_when_channel_disconnects() {
        let (task_tx, task_rx) = unbounded::<WorkerMessage>();
        let (result_tx, _result_rx) = unbounded();
        drop(task_tx);
        worker_loop(0, Doubling, task_rx, result_tx);
    }

    #[test]
    fn spawned_worker_uses_its_own_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut remote = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (connection, peer) = listener.accept().unwrap();

        let (task_tx, task_rx) = unbounded();
        let (result_tx, result_rx) = unbounded();
        let handle = spawn_worker(
            WorkerSlot {
                client_index: 0,
                peer,
                connection,
            },
            1024,
            task_rx,
            result_tx,
        )
        .unwrap();

        task_tx.send(task(0, &[5, 1])).unwrap();
        let mut buf = [0u8; 64];
        let n = remote.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"[5,1]");
        remote.write_all(b"0.5").unwrap();

        match result_rx.recv().unwrap() {
            WorkerEvent::Completed(result) => {
                assert_eq!(result.var, ConfigVector::new(vec![5, 1]));
                assert_eq!(result.reward, 0.5);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        task_tx.send(WorkerMessage::Stop).unwrap();
        assert_eq!(handle.client_index(), 0);
        handle.close();

        // The coordinator side shut the connection down.
        assert_eq!(remote.read(&mut buf).unwrap(), 0);
    }
}
