use crate::runner::FileRunner;
use fileflow_core::{FileStatus, FlowError, WorkSource};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Node-side loop: claim files up to the node's runner budget and process
/// them concurrently until shut down.
pub struct NodeWorker {
    runner: Arc<FileRunner>,
    source: Arc<dyn WorkSource>,
    poll_interval: Duration,
}

impl NodeWorker {
    pub fn new(
        runner: Arc<FileRunner>,
        source: Arc<dyn WorkSource>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            runner,
            source,
            poll_interval,
        }
    }

    /// Run until `shutdown` is cancelled. In-flight runs are cancelled with
    /// it and awaited, so their files are released before this returns.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), FlowError> {
        let node = self.runner.node();
        let budget = node.max_runners.max(1);
        let mut running: FuturesUnordered<JoinHandle<Result<FileStatus, FlowError>>> =
            FuturesUnordered::new();

        tracing::info!("Node '{}' started with {} runner(s)", node.name, budget);

        loop {
            while !shutdown.is_cancelled() && running.len() < budget {
                match self.source.claim_next(node.uid).await {
                    Ok(Some(file)) => {
                        tracing::info!("Claimed '{}' ({})", file.name, file.uid);
                        let runner = self.runner.clone();
                        let token = shutdown.child_token();
                        running.push(tokio::spawn(async move {
                            runner.run(file, HashMap::new(), token).await
                        }));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Claim request failed: {}", e);
                        break;
                    }
                }
            }

            if shutdown.is_cancelled() && running.is_empty() {
                break;
            }

            tokio::select! {
                Some(joined) = running.next(), if !running.is_empty() => {
                    match joined {
                        Ok(Ok(status)) => tracing::debug!("Run ended with {}", status),
                        Ok(Err(e)) => tracing::error!("Run could not be completed: {}", e),
                        Err(e) => tracing::error!("Run task join error: {}", e),
                    }
                }
                _ = shutdown.cancelled(), if !shutdown.is_cancelled() => {
                    tracing::info!(
                        "Node '{}' shutting down, waiting for {} run(s)",
                        node.name,
                        running.len()
                    );
                }
                _ = tokio::time::sleep(self.poll_interval), if !shutdown.is_cancelled() => {}
            }
        }

        tracing::info!("Node '{}' stopped", node.name);
        Ok(())
    }
}
