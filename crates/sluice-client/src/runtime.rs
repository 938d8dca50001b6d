//! Group runtime
//!
//! Consumes the coordinator's sessions and runs one [`ClaimProcessor`] task
//! per assigned partition. A session's claims are drained before the next
//! session starts; on cancellation the member leaves the group explicitly.

use crate::coordinator::{CoordinatorConfig, GroupSession, SessionCoordinator};
use crate::error::{Error, Result};
use crate::log::GroupLog;
use crate::processor::{ClaimProcessor, ProcessorConfig, RecordHandler};
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Consumer group member running claim processors
pub struct GroupRuntime {
    coordinator: SessionCoordinator,
    handler: Arc<dyn RecordHandler>,
    processor_config: ProcessorConfig,
}

impl GroupRuntime {
    pub fn new(
        log: Arc<dyn GroupLog>,
        coordinator_config: CoordinatorConfig,
        handler: Arc<dyn RecordHandler>,
    ) -> Self {
        Self {
            coordinator: SessionCoordinator::new(log, coordinator_config),
            handler,
            processor_config: ProcessorConfig::default(),
        }
    }

    pub fn with_processor_config(mut self, config: ProcessorConfig) -> Self {
        self.processor_config = config;
        self
    }

    pub fn member_id(&self) -> &str {
        self.coordinator.member_id()
    }

    /// Run until `cancel` fires or the group cannot be joined
    pub async fn run(&self, cancel: CancellationToken, topics: Vec<String>) -> Result<()> {
        info!(
            group_id = %self.coordinator.group_id(),
            member_id = %self.member_id(),
            topics = ?topics,
            "Starting consumer group runtime"
        );

        let mut sessions = self.coordinator.join(topics, cancel.clone());
        let mut current: Option<GroupSession> = None;

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                next = sessions.next() => next,
            };

            let session = match next {
                None => break Ok(()),
                Some(Ok(session)) => session,
                Some(Err(e)) => {
                    error!(
                        group_id = %self.coordinator.group_id(),
                        error = %e,
                        "Consumer group failed"
                    );
                    break Err(Error::Group(e));
                }
            };

            current = Some(session.clone());
            self.run_session(&session).await;

            if cancel.is_cancelled() {
                break Ok(());
            }
        };

        // A session may have been handed out concurrently with cancellation;
        // the stream ends once the coordinator stops.
        while let Some(item) = sessions.next().await {
            if let Ok(session) = item {
                session.revoke();
                current = Some(session);
            }
        }

        if let Some(session) = current {
            if let Err(e) = self.coordinator.leave(&session).await {
                warn!(member_id = %self.member_id(), error = %e, "Failed to leave group");
            }
        }
        info!(member_id = %self.member_id(), "Consumer group runtime stopped");
        outcome
    }

    /// Spawn a processor per assigned partition and wait for all of them
    async fn run_session(&self, session: &GroupSession) {
        let mut claims = JoinSet::new();
        for partition in session.assignments() {
            match session.claim(partition).await {
                Ok(claim) => {
                    let processor = ClaimProcessor::new(
                        claim,
                        self.handler.clone(),
                        self.processor_config.clone(),
                    );
                    claims.spawn(processor.run(session.cancel_token()));
                }
                Err(e) => warn!(
                    topic = %partition.topic,
                    partition = partition.partition,
                    generation = session.generation(),
                    error = %e,
                    "Failed to claim partition, skipping for this session"
                ),
            }
        }

        info!(
            generation = session.generation(),
            claims = claims.len(),
            "Session started"
        );

        while let Some(joined) = claims.join_next().await {
            match joined {
                Ok(Ok(report)) => info!(
                    topic = %report.partition.topic,
                    partition = report.partition.partition,
                    generation = report.generation,
                    exit = ?report.exit,
                    records = report.records_handled,
                    decode_failures = report.decode_failures,
                    last_committed = ?report.last_committed,
                    "Claim ended"
                ),
                Ok(Err(e)) => error!(
                    generation = session.generation(),
                    error = %e,
                    "Claim failed, partition idle until next session"
                ),
                Err(e) => error!(
                    generation = session.generation(),
                    error = %e,
                    "Claim task panicked"
                ),
            }
        }
    }
}
