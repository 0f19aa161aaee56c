//! Reward evaluation over an established worker connection.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;

use tracing::debug;

use ns_search::{reward_or_fallback, RewardEvaluator};
use ns_types::{NsError, NsResult};

/// Sends a config string to a remote reward client and parses its reply.
///
/// One request/response round trip per call: the config text goes out in a
/// single write and the reply is a single read of at most `buffer_size`
/// bytes. Replies that do not fit are truncated, which usually makes them
/// unparsable and scores them `0.0`.
#[derive(Debug)]
pub struct RemoteEvaluator {
    client_index: Option<usize>,
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl RemoteEvaluator {
    pub fn new(stream: TcpStream, buffer_size: usize) -> Self {
        Self {
            client_index: None,
            stream,
            buffer: vec![0; buffer_size],
        }
    }

    /// Tag transport errors with the worker slot owning this connection.
    pub fn for_client(mut self, client_index: usize) -> Self {
        self.client_index = Some(client_index);
        self
    }

    fn transport_error(&self, action: &str, err: std::io::Error) -> NsError {
        let message = match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                format!("no reply within timeout while {action}")
            }
            _ => format!("{action} failed: {err}"),
        };
        NsError::unavailable(self.client_index, message)
    }
}

impl RewardEvaluator for RemoteEvaluator {
    fn evaluate(&mut self, config: &str) -> NsResult<f64> {
        self.stream
            .write_all(config.as_bytes())
            .map_err(|e| self.transport_error("sending config", e))?;

        let received = self
            .stream
            .read(&mut self.buffer)
            .map_err(|e| self.transport_error("receiving reward", e))?;
        if received == 0 {
            return Err(NsError::unavailable(
                self.client_index,
                "connection closed by worker",
            ));
        }

        let reply = String::from_utf8_lossy(&self.buffer[..received]);
        debug!(client_index = ?self.client_index, config, reply = %reply, "reward received");
        Ok(reward_or_fallback(config, &reply, ""))
    }
}
