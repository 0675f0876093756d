//! Worker-pool fan-out across node identities.
//!
//! Parallel setup and teardown run the same command against many nodes at
//! once: one task per node identity, concurrency capped by a semaphore,
//! results collected in input order so the fan-in is deterministic. Session
//! reuse comes from the shared [`Registry`]; two tasks that happen to
//! target the same identity serialize on that session's own lock.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::ExecError;
use crate::registry::Registry;
use crate::types::{CommandResult, NodeIdentity};

/// Outcome of running the command on one node.
#[derive(Debug)]
pub struct NodeRunResult {
    pub node: NodeIdentity,
    pub result: Result<CommandResult, ExecError>,
}

/// Run `command` on every node, at most `max_parallel` at a time.
///
/// Returns one result per node, in the same order as `nodes`. A failure on
/// one node never aborts the others.
pub async fn run_on_nodes(
    registry: &Arc<Registry>,
    nodes: &[NodeIdentity],
    command: &str,
    timeout_secs: Option<u64>,
    sudo: bool,
    max_parallel: usize,
) -> Vec<NodeRunResult> {
    let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
    debug!(
        "Running {:?} on {} node(s), {} at a time",
        command,
        nodes.len(),
        max_parallel.max(1)
    );

    let handles: Vec<_> = nodes
        .iter()
        .cloned()
        .map(|node| {
            let registry = Arc::clone(registry);
            let semaphore = Arc::clone(&semaphore);
            let command = command.to_string();
            tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return NodeRunResult {
                            result: Err(ExecError::Connection {
                                endpoint: node.endpoint(),
                                reason: "worker pool closed".to_string(),
                            }),
                            node,
                        };
                    }
                };
                let result = registry.exec(&node, &command, timeout_secs, sudo, None).await;
                NodeRunResult { node, result }
            })
        })
        .collect();

    let joined = join_all(handles).await;

    nodes
        .iter()
        .cloned()
        .zip(joined)
        .map(|(node, joined)| match joined {
            Ok(run) => run,
            Err(e) => NodeRunResult {
                result: Err(ExecError::Connection {
                    endpoint: node.endpoint(),
                    reason: format!("worker task failed: {}", e),
                }),
                node,
            },
        })
        .collect()
}
