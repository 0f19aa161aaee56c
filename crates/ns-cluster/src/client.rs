//! Worker-side reward client.
//!
//! Connects to the coordinator, then answers every config string it receives
//! with the reward produced by a local evaluator, one reply per request, until
//! the coordinator closes the connection.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use ns_search::{ProcessEvaluator, RewardEvaluator};
use ns_types::{internal_error, NsError, NsResult};

use crate::config::ClientConfig;

/// Serves reward requests for one coordinator connection.
#[derive(Debug, Clone)]
pub struct RewardClient<E = ProcessEvaluator> {
    config: ClientConfig,
    evaluator: E,
}

impl RewardClient<ProcessEvaluator> {
    /// Client running the configured reward command for every request.
    pub fn new(config: ClientConfig) -> NsResult<Self> {
        config.validate()?;
        let evaluator = ProcessEvaluator::from_argv(config.reward_command.clone())?;
        Ok(Self { config, evaluator })
    }
}

impl<E> RewardClient<E>
where
    E: RewardEvaluator + Clone + Send + 'static,
{
    pub fn with_evaluator(config: ClientConfig, evaluator: E) -> Self {
        Self { config, evaluator }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to the coordinator and serve until it hangs up.
    ///
    /// Returns the number of requests answered.
    pub async fn run(&self) -> NsResult<usize> {
        let stream = TcpStream::connect(&self.config.server_address).await?;
        stream.set_nodelay(true)?;
        info!(server = %self.config.server_address, "connected to coordinator");
        self.serve(stream).await
    }

    /// Request/response loop over an established connection.
    pub async fn serve<S>(&self, mut stream: S) -> NsResult<usize>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buffer = vec![0u8; self.config.buffer_size];
        let mut served = 0;

        loop {
            let received = match self.receive(&mut stream, &mut buffer).await? {
                Some(received) => received,
                None => break,
            };
            let config = String::from_utf8_lossy(&buffer[..received]).into_owned();
            debug!(config = %config, "task received");

            let reward = self.evaluate(config).await?;
            if let Err(e) = stream.write_all(reward.to_string().as_bytes()).await {
                if is_disconnect(&e) {
                    warn!(error = %e, "coordinator went away before the reply was sent");
                    break;
                }
                return Err(e.into());
            }
            served += 1;
        }

        info!(served, "coordinator closed the connection");
        Ok(served)
    }

    /// One read of at most `buffer.len()` bytes. `None` once the session is over.
    async fn receive<S>(&self, stream: &mut S, buffer: &mut [u8]) -> NsResult<Option<usize>>
    where
        S: AsyncRead + Unpin,
    {
        let read = stream.read(buffer);
        let outcome = match self.config.idle_timeout() {
            Some(limit) => tokio::time::timeout(limit, read).await.map_err(|_| {
                NsError::unavailable(None, format!("no task within {}s", limit.as_secs()))
            })?,
            None => read.await,
        };

        match outcome {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(n)),
            Err(e) if is_disconnect(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Run the evaluator off the async runtime; reward commands can take hours.
    async fn evaluate(&self, config: String) -> NsResult<f64> {
        let mut evaluator = self.evaluator.clone();
        tokio::task::spawn_blocking(move || evaluator.evaluate(&config))
            .await
            .map_err(|e| internal_error!("evaluator task failed: {e}"))?
    }
}

fn is_disconnect(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
    )
}
