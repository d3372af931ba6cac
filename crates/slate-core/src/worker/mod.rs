//! Worker-agent harness: claim loop, dispatch, heartbeat, result
//! publishing.
//!
//! The harness knows nothing about domain logic. A worker plugs in one
//! [`TaskHandler`] per task type; everything else — claiming, status
//! transitions, knowledge emission, graceful shutdown — is uniform.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::blackboard::Blackboard;
use crate::config::CoordinationConfig;
use crate::models::{KnowledgeItem, Space, TaskDefinition, TaskStatus};
use crate::Result;

/// Domain logic for one task type.
///
/// The returned payload is opaque to the harness; it SHOULD carry a
/// `confidence` field for result integration.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Process a claimed task and return its output payload.
    async fn handle(&self, task: &TaskDefinition) -> Result<Value>;
}

/// A claim currently held by this worker.
#[derive(Debug, Clone)]
pub struct ActiveClaim {
    pub task_id: String,
    pub task_type: String,
}

/// Tracks the claims a worker holds, for graceful release on shutdown.
#[derive(Debug, Clone, Default)]
pub struct ClaimTracker {
    claims: Arc<RwLock<Vec<ActiveClaim>>>,
}

impl ClaimTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly won claim.
    pub async fn register(&self, claim: ActiveClaim) {
        self.claims.write().await.push(claim);
    }

    /// Drop a claim once its task reaches a terminal state.
    pub async fn release(&self, task_id: &str) -> Option<ActiveClaim> {
        let mut claims = self.claims.write().await;
        let index = claims.iter().position(|c| c.task_id == task_id)?;
        Some(claims.remove(index))
    }

    /// All claims currently held.
    pub async fn all(&self) -> Vec<ActiveClaim> {
        self.claims.read().await.clone()
    }

    /// Number of claims currently held.
    pub async fn count(&self) -> usize {
        self.claims.read().await.len()
    }
}

/// Result of releasing claims during graceful shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownResult {
    pub released_count: usize,
    pub failed_count: usize,
    pub failed_tasks: Vec<String>,
}

/// The uniform worker scaffold.
#[derive(Clone)]
pub struct WorkerAgent {
    agent_id: String,
    agent_type: String,
    blackboard: Arc<Blackboard>,
    handlers: Arc<HashMap<String, Arc<dyn TaskHandler>>>,
    claims: ClaimTracker,
    config: CoordinationConfig,
}

impl WorkerAgent {
    /// Create a worker with its handler registry.
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        blackboard: Arc<Blackboard>,
        handlers: HashMap<String, Arc<dyn TaskHandler>>,
        config: CoordinationConfig,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            blackboard,
            handlers: Arc::new(handlers),
            claims: ClaimTracker::new(),
            config,
        }
    }

    /// This worker's agent id.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Task types this worker can execute.
    #[must_use]
    pub fn task_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Register on the blackboard with the handler types as capabilities.
    pub async fn initialize(&self) -> Result<()> {
        let capabilities = self.handlers.keys().cloned().collect();
        self.blackboard
            .register_agent(&self.agent_id, &self.agent_type, &capabilities)
            .await
    }

    /// Spawn the claim and heartbeat loops.
    #[must_use]
    pub fn start(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let claim = {
            let worker = self.clone();
            let rx = shutdown.subscribe();
            tokio::spawn(async move { worker.run_claim_loop(rx).await })
        };
        let heartbeat = {
            let worker = self.clone();
            let rx = shutdown.subscribe();
            tokio::spawn(async move { worker.run_heartbeat_loop(rx).await })
        };
        vec![claim, heartbeat]
    }

    /// Claim loop: poll for available work, claim in order, and run each
    /// won task concurrently. Exits on the shutdown signal after releasing
    /// outstanding claims.
    pub async fn run_claim_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    let result = self.graceful_shutdown().await;
                    tracing::info!(
                        agent_id = %self.agent_id,
                        released = result.released_count,
                        failed = result.failed_count,
                        "Worker claim loop shut down"
                    );
                    break;
                }
                () = tokio::time::sleep(self.config.claim_interval) => {
                    match self.claim_pass().await {
                        Ok(handles) => {
                            // Handlers run detached; completion is reported
                            // through the store, not the join handle.
                            drop(handles);
                        }
                        Err(e) => {
                            tracing::error!(agent_id = %self.agent_id, error = %e, "Claim pass failed");
                        }
                    }
                }
            }
        }
    }

    /// One pass of the claim loop. Returns a join handle per task won, so
    /// callers that need determinism can await them.
    pub async fn claim_pass(&self) -> Result<Vec<JoinHandle<()>>> {
        let task_types = self.task_types();
        let available = self
            .blackboard
            .get_available_tasks(Some(&task_types), self.config.claim_batch_size)
            .await?;

        let mut handles = Vec::new();
        for task in available {
            let won = match self.claim_with_retries(&task.id).await {
                Ok(won) => won,
                // Exhausted retries are losing the race.
                Err(crate::Error::ContentionExhausted(_)) => false,
                Err(e) => return Err(e),
            };
            if !won {
                continue;
            }
            self.claims
                .register(ActiveClaim {
                    task_id: task.id.clone(),
                    task_type: task.task_type.clone(),
                })
                .await;

            let worker = self.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = worker.process_task(task).await {
                    tracing::error!(agent_id = %worker.agent_id, error = %e, "Task processing failed");
                }
            }));
        }
        Ok(handles)
    }

    /// Attempt a claim, retrying transient store failures up to the
    /// configured bound.
    async fn claim_with_retries(&self, task_id: &str) -> Result<bool> {
        for attempt in 0..=self.config.claim_retry_bound {
            match self.blackboard.claim_task(task_id, &self.agent_id).await {
                Ok(won) => return Ok(won),
                Err(e) if e.is_retriable() => {
                    tracing::debug!(
                        task_id = %task_id,
                        attempt,
                        error = %e,
                        "Transient store error during claim"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(crate::Error::ContentionExhausted(format!(
            "Claim retries exhausted for task {task_id}"
        )))
    }

    /// Run the handler for a claimed task and publish the result.
    pub async fn process_task(&self, task: TaskDefinition) -> Result<()> {
        let started = Instant::now();
        self.blackboard
            .update_task_status(&task.id, &self.agent_id, TaskStatus::InProgress, None, None)
            .await?;

        let handler = self.handlers.get(&task.task_type).cloned();
        let outcome = match handler {
            Some(handler) => handler.handle(&task).await,
            None => Err(crate::Error::Handler(format!(
                "No handler for task type: {}",
                task.task_type
            ))),
        };
        let processing_time_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                self.blackboard
                    .update_task_status(
                        &task.id,
                        &self.agent_id,
                        TaskStatus::Completed,
                        Some(output.clone()),
                        None,
                    )
                    .await?;
                self.emit_result_knowledge(&task, &output).await?;
                tracing::info!(
                    agent_id = %self.agent_id,
                    task_id = %task.id,
                    task_type = %task.task_type,
                    processing_time_ms,
                    "Task completed"
                );
            }
            Err(e) => {
                self.blackboard
                    .update_task_status(
                        &task.id,
                        &self.agent_id,
                        TaskStatus::Failed,
                        None,
                        Some(json!({
                            "error": e.to_string(),
                            "error_kind": e.code(),
                            "task_type": task.task_type,
                            "processing_time_ms": processing_time_ms,
                        })),
                    )
                    .await?;
                tracing::warn!(
                    agent_id = %self.agent_id,
                    task_id = %task.id,
                    error = %e,
                    "Task failed"
                );
            }
        }

        self.claims.release(&task.id).await;
        Ok(())
    }

    /// Heartbeat loop. Missed heartbeats are detected centrally by the
    /// store's timeout scan.
    pub async fn run_heartbeat_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(self.config.heartbeat_interval) => {
                    if let Err(e) = self.blackboard.agent_heartbeat(&self.agent_id).await {
                        tracing::error!(agent_id = %self.agent_id, error = %e, "Heartbeat failed");
                    }
                }
            }
        }
    }

    /// Release every outstanding claim back to `pending` so other workers
    /// can pick the tasks up.
    pub async fn graceful_shutdown(&self) -> ShutdownResult {
        let held = self.claims.all().await;
        let mut released_count = 0;
        let mut failed_tasks = Vec::new();

        for claim in held {
            match self.blackboard.release_claim(&claim.task_id, &self.agent_id).await {
                Ok(true) => {
                    released_count += 1;
                    self.claims.release(&claim.task_id).await;
                    tracing::info!(
                        task_id = %claim.task_id,
                        agent_id = %self.agent_id,
                        "Released claim during graceful shutdown"
                    );
                }
                Ok(false) => {
                    // Terminal or no longer ours; nothing to release.
                    self.claims.release(&claim.task_id).await;
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = %claim.task_id,
                        error = %e,
                        "Failed to release claim during shutdown"
                    );
                    failed_tasks.push(claim.task_id);
                }
            }
        }

        ShutdownResult {
            released_count,
            failed_count: failed_tasks.len(),
            failed_tasks,
        }
    }

    /// Publish a `<task_type>_result` knowledge item carrying the handler
    /// output; result integration discovers outputs through this channel.
    async fn emit_result_knowledge(&self, task: &TaskDefinition, output: &Value) -> Result<()> {
        let item = KnowledgeItem::new(
            Space::Governance,
            &self.agent_id,
            format!("{}_result", task.task_type),
            json!({
                "task_type": task.task_type,
                "result": output,
                "governance_request_id":
                    crate::payload::governance_request_id(&task.requirements),
                "processing_metadata": {
                    "completed_at": Utc::now().to_rfc3339(),
                    "agent_id": self.agent_id,
                },
            }),
        )
        .with_task(task.id.clone())
        .with_priority(task.priority)
        .with_tags([task.task_type.clone(), "analysis_complete".to_owned()]);

        self.blackboard.add_knowledge(&item).await?;
        Ok(())
    }
}
