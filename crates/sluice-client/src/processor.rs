//! Claim processor
//!
//! Reads one claimed partition in offset order, hands every record to a
//! [`RecordHandler`] and commits its offset before reading the next one.
//! Delivery is at-least-once: a record re-delivered after a crash is
//! handled again and its commit is a no-op.

use crate::coordinator::GroupSession;
use crate::error::{ClaimError, CommitError};
use crate::log::RecordStream;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use futures::StreamExt;
use sluice_protocol::{
    decode, ChangeDataMessage, ChangeKind, DecodeError, DecodedPayload, Record, TopicPartition,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-record callback. Errors are logged and never stop the partition.
#[async_trait]
pub trait RecordHandler: Send + Sync + 'static {
    async fn handle(&self, record: &Record) -> Result<(), DecodeError>;
}

/// Decodes records by `content-kind` and logs their contents
#[derive(Debug, Clone, Default)]
pub struct ChangeDataHandler {
    processing_delay: Option<Duration>,
}

impl ChangeDataHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep after each record to simulate processing work
    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = Some(delay);
        self
    }

    fn log_received(record: &Record) {
        info!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            key = %String::from_utf8_lossy(&record.key),
            headers = record.headers.len(),
            "Received message"
        );
        for header in &record.headers {
            info!(
                offset = record.offset,
                header = %header.key,
                value = %String::from_utf8_lossy(&header.value),
                "Message header"
            );
        }
    }

    fn log_change_data(record: &Record, msg: &ChangeDataMessage) {
        info!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            request_id = %msg.request_id,
            message_number = msg.message_number,
            total_message_count = msg.total_message_count,
            tenant_uid = msg.tenant_uid,
            records = msg.records.len(),
            "Received ChangeDataMessage"
        );

        for (i, change) in msg.records.iter().enumerate() {
            let operation = change.operation_type();
            match change.kind() {
                ChangeKind::Department(d) => info!(
                    index = i,
                    operation = %operation,
                    id = %d.id,
                    biid = %d.biid,
                    code = %d.code,
                    name = %d.name,
                    short_name = %d.short_name,
                    department_type = %d.r#type,
                    tenant_uid = d.tenant_uid,
                    version = d.version,
                    "Department"
                ),
                ChangeKind::AggregationPattern(a) => info!(
                    index = i,
                    operation = %operation,
                    id = %a.id,
                    biid = %a.biid,
                    name = %a.name,
                    tenant_uid = a.tenant_uid,
                    version = a.version,
                    "AggregationPattern"
                ),
                ChangeKind::AggregationPatternDepartment(a) => info!(
                    index = i,
                    operation = %operation,
                    aggregation_pattern_id = %a.aggregation_pattern_id,
                    department_biid = %a.department_biid,
                    path = %a.path,
                    "AggregationPatternDepartment"
                ),
                ChangeKind::Unknown => warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    index = i,
                    operation = %operation,
                    "Unknown change record payload"
                ),
            }
        }
    }
}

#[async_trait]
impl RecordHandler for ChangeDataHandler {
    async fn handle(&self, record: &Record) -> Result<(), DecodeError> {
        Self::log_received(record);
        match decode(record)? {
            DecodedPayload::ChangeData(msg) => Self::log_change_data(record, &msg),
            DecodedPayload::Json(msg) => info!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "Received JSON message: {}",
                msg
            ),
            DecodedPayload::Text(text) => info!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "Received text message: {}",
                text
            ),
        }

        if let Some(delay) = self.processing_delay {
            tokio::time::sleep(delay).await;
        }
        info!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            "Message processed"
        );
        Ok(())
    }
}

// ============================================================================
// Claims
// ============================================================================

/// Exclusive read ownership of one partition for one session
pub struct PartitionClaim {
    partition: TopicPartition,
    records: RecordStream,
    session: GroupSession,
}

impl PartitionClaim {
    pub fn new(partition: TopicPartition, records: RecordStream, session: GroupSession) -> Self {
        Self {
            partition,
            records,
            session,
        }
    }

    pub fn partition(&self) -> &TopicPartition {
        &self.partition
    }

    pub fn session(&self) -> &GroupSession {
        &self.session
    }
}

impl fmt::Debug for PartitionClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionClaim")
            .field("partition", &self.partition)
            .field("generation", &self.session.generation())
            .finish_non_exhaustive()
    }
}

/// Why a claim processor stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimExit {
    /// The record stream ended (partition revoked by the log)
    Exhausted,
    /// The cancellation signal fired
    Cancelled,
    /// A commit was rejected as stale
    Revoked,
}

/// Progress of one claim at exit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimReport {
    pub partition: TopicPartition,
    pub generation: u64,
    pub exit: ClaimExit,
    pub records_handled: u64,
    pub decode_failures: u64,
    pub offset_gaps: u64,
    pub last_committed: Option<u64>,
}

/// Processor settings
#[derive(Debug, Clone, Default)]
pub struct ProcessorConfig {
    /// Backoff for commit transport failures
    pub commit_retry: RetryPolicy,
}

enum CommitOutcome {
    Committed,
    Stale,
    Cancelled,
}

/// Runs one [`PartitionClaim`] to completion
pub struct ClaimProcessor {
    claim: PartitionClaim,
    handler: Arc<dyn RecordHandler>,
    config: ProcessorConfig,
    report: ClaimReport,
}

impl ClaimProcessor {
    pub fn new(
        claim: PartitionClaim,
        handler: Arc<dyn RecordHandler>,
        config: ProcessorConfig,
    ) -> Self {
        let report = ClaimReport {
            partition: claim.partition.clone(),
            generation: claim.session.generation(),
            exit: ClaimExit::Exhausted,
            records_handled: 0,
            decode_failures: 0,
            offset_gaps: 0,
            last_committed: None,
        };
        Self {
            claim,
            handler,
            config,
            report,
        }
    }

    /// Process records until the stream ends, `cancel` fires, or the
    /// session is found stale. Only exhausted commit retries are errors.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ClaimReport, ClaimError> {
        let partition = self.claim.partition.clone();
        debug!(
            topic = %partition.topic,
            partition = partition.partition,
            generation = self.report.generation,
            "Claim started"
        );

        let mut expected: Option<u64> = None;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = self.claim.records.next() => Some(next),
            };
            let record = match next {
                None => return Ok(self.finish(ClaimExit::Cancelled)),
                Some(None) => return Ok(self.finish(ClaimExit::Exhausted)),
                Some(Some(record)) => record,
            };

            if let Some(expected) = expected.filter(|&e| record.offset > e) {
                self.report.offset_gaps += 1;
                warn!(
                    topic = %partition.topic,
                    partition = partition.partition,
                    expected,
                    offset = record.offset,
                    "Offset gap, log reset to an out-of-range position"
                );
            }
            expected = Some(record.offset.saturating_add(1));

            if self.report.last_committed.is_some_and(|c| record.offset <= c) {
                debug!(
                    topic = %partition.topic,
                    partition = partition.partition,
                    offset = record.offset,
                    "Re-delivered record"
                );
            }

            if let Err(e) = self.handler.handle(&record).await {
                self.report.decode_failures += 1;
                warn!(
                    topic = %partition.topic,
                    partition = partition.partition,
                    offset = record.offset,
                    error = %e,
                    "Failed to handle record"
                );
            }
            self.report.records_handled += 1;

            match self.commit(record.offset, &cancel).await? {
                CommitOutcome::Committed => {}
                CommitOutcome::Stale => return Ok(self.finish(ClaimExit::Revoked)),
                CommitOutcome::Cancelled => return Ok(self.finish(ClaimExit::Cancelled)),
            }
        }
    }

    async fn commit(
        &mut self,
        offset: u64,
        cancel: &CancellationToken,
    ) -> Result<CommitOutcome, ClaimError> {
        let partition = &self.claim.partition;
        let policy = &self.config.commit_retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(CommitOutcome::Cancelled),
                result = self.claim.session.commit(partition, offset) => result,
            };

            match result {
                Ok(()) => {
                    let committed = self.report.last_committed.map_or(offset, |c| c.max(offset));
                    self.report.last_committed = Some(committed);
                    return Ok(CommitOutcome::Committed);
                }
                Err(CommitError::StaleGeneration { generation, .. }) => {
                    info!(
                        topic = %partition.topic,
                        partition = partition.partition,
                        offset,
                        generation,
                        "Commit rejected for superseded session, dropping claim"
                    );
                    return Ok(CommitOutcome::Stale);
                }
                Err(e @ CommitError::TransportFailure(_)) => {
                    if !policy.should_retry(attempt) {
                        return Err(ClaimError::CommitFailed {
                            partition: partition.clone(),
                            offset,
                            attempts: attempt,
                            source: e,
                        });
                    }
                    let delay = policy.backoff(attempt);
                    warn!(
                        topic = %partition.topic,
                        partition = partition.partition,
                        offset,
                        attempt,
                        error = %e,
                        ?delay,
                        "Commit failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(CommitOutcome::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn finish(mut self, exit: ClaimExit) -> ClaimReport {
        self.report.exit = exit;
        debug!(
            topic = %self.report.partition.topic,
            partition = self.report.partition.partition,
            exit = ?exit,
            records = self.report.records_handled,
            "Claim finished"
        );
        self.report
    }
}
