//! Session coordinator
//!
//! Turns group membership into a stream of [`GroupSession`]s. Every
//! membership change produces a fresh session; the previous one is revoked
//! first so its claims stop reading before the replacement is handed out.
//!
//! ```text
//!   join ──► session(gen N) ──► heartbeat … RebalanceRequired
//!                                     │
//!                 revoke(gen N) ◄─────┘
//!                       │
//!   join ──► session(gen N+1) ──► …
//! ```

use crate::error::{CommitError, GroupError};
use crate::log::{GroupLog, Heartbeat, SessionHandle};
use crate::processor::PartitionClaim;
use crate::retry::RetryPolicy;
use futures::Stream;
use sluice_protocol::TopicPartition;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub group_id: String,
    /// Interval between liveness checks
    pub heartbeat_interval: Duration,
    /// Backoff for join and heartbeat failures
    pub retry: RetryPolicy,
}

impl CoordinatorConfig {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            heartbeat_interval: Duration::from_secs(3),
            retry: RetryPolicy::default(),
        }
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

// ============================================================================
// Group session
// ============================================================================

struct SessionInner {
    handle: SessionHandle,
    cancel: CancellationToken,
    log: Arc<dyn GroupLog>,
}

/// One generation of group membership.
///
/// Cheap to clone; all clones share the same cancellation signal, which
/// claims of this generation observe.
#[derive(Clone)]
pub struct GroupSession {
    inner: Arc<SessionInner>,
}

impl GroupSession {
    pub fn new(handle: SessionHandle, cancel: CancellationToken, log: Arc<dyn GroupLog>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                handle,
                cancel,
                log,
            }),
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.inner.handle
    }

    pub fn generation(&self) -> u64 {
        self.inner.handle.generation
    }

    pub fn member_id(&self) -> &str {
        &self.inner.handle.member_id
    }

    pub fn group_id(&self) -> &str {
        &self.inner.handle.group_id
    }

    pub fn assignments(&self) -> &[TopicPartition] {
        &self.inner.handle.assignments
    }

    /// Cancellation signal shared by this session's claims
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn revoke(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_revoked(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Commit `offset` for `partition` under this session's generation
    pub async fn commit(&self, partition: &TopicPartition, offset: u64) -> Result<(), CommitError> {
        self.inner
            .log
            .commit(&self.inner.handle, partition, offset)
            .await
    }

    /// Open the record stream for one assigned partition
    pub async fn claim(&self, partition: &TopicPartition) -> Result<PartitionClaim, GroupError> {
        let records = self.inner.log.fetch(&self.inner.handle, partition).await?;
        Ok(PartitionClaim::new(partition.clone(), records, self.clone()))
    }
}

impl fmt::Debug for GroupSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupSession")
            .field("group_id", &self.group_id())
            .field("member_id", &self.member_id())
            .field("generation", &self.generation())
            .field("assignments", &self.assignments())
            .field("revoked", &self.is_revoked())
            .finish()
    }
}

// ============================================================================
// Session stream
// ============================================================================

/// Sessions in membership order. Yields a terminal `JoinFailure` and then
/// ends when the group cannot be joined; ends quietly on cancellation.
pub struct SessionStream {
    rx: mpsc::Receiver<Result<GroupSession, GroupError>>,
}

impl Stream for SessionStream {
    type Item = Result<GroupSession, GroupError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Drives group membership for one member
pub struct SessionCoordinator {
    log: Arc<dyn GroupLog>,
    config: CoordinatorConfig,
    member_id: String,
}

impl SessionCoordinator {
    /// Create a coordinator with a fresh member id
    pub fn new(log: Arc<dyn GroupLog>, config: CoordinatorConfig) -> Self {
        let member_id = format!("{}-{}", config.group_id, uuid::Uuid::new_v4());
        Self {
            log,
            config,
            member_id,
        }
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    pub fn group_id(&self) -> &str {
        &self.config.group_id
    }

    /// Join the group and stream sessions until `cancel` fires.
    ///
    /// Session signals are children of `cancel`.
    pub fn join(&self, topics: Vec<String>, cancel: CancellationToken) -> SessionStream {
        let (tx, rx) = mpsc::channel(1);
        let driver = MembershipDriver {
            log: self.log.clone(),
            config: self.config.clone(),
            member_id: self.member_id.clone(),
            topics,
            cancel,
            tx,
        };
        tokio::spawn(driver.run());
        SessionStream { rx }
    }

    /// Leave the group explicitly
    pub async fn leave(&self, session: &GroupSession) -> Result<(), GroupError> {
        session.revoke();
        self.log.leave_group(session.handle()).await?;
        info!(
            group_id = %session.group_id(),
            member_id = %session.member_id(),
            generation = session.generation(),
            "Left consumer group"
        );
        Ok(())
    }
}

struct MembershipDriver {
    log: Arc<dyn GroupLog>,
    config: CoordinatorConfig,
    member_id: String,
    topics: Vec<String>,
    cancel: CancellationToken,
    tx: mpsc::Sender<Result<GroupSession, GroupError>>,
}

enum Liveness {
    Rejoin,
    Stop,
}

impl MembershipDriver {
    async fn run(self) {
        loop {
            let handle = match self.join_with_retry().await {
                Ok(Some(handle)) => handle,
                Ok(None) => return,
                Err(e) => {
                    warn!(group_id = %self.config.group_id, error = %e, "Giving up on group join");
                    let _ = self.tx.send(Err(e)).await;
                    return;
                }
            };

            let session = GroupSession::new(handle, self.cancel.child_token(), self.log.clone());
            info!(
                group_id = %session.group_id(),
                member_id = %session.member_id(),
                generation = session.generation(),
                partitions = session.assignments().len(),
                "Joined consumer group"
            );

            if self.tx.send(Ok(session.clone())).await.is_err() {
                session.revoke();
                return;
            }

            match self.watch(&session).await {
                Liveness::Rejoin => {
                    session.revoke();
                    info!(
                        group_id = %session.group_id(),
                        generation = session.generation(),
                        "Session revoked, rejoining"
                    );
                }
                Liveness::Stop => {
                    session.revoke();
                    return;
                }
            }
        }
    }

    /// Join, retrying transient failures. `Ok(None)` means cancelled.
    async fn join_with_retry(&self) -> Result<Option<SessionHandle>, GroupError> {
        let policy = &self.config.retry;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(None),
                result = self.log.join_group(&self.config.group_id, &self.member_id, &self.topics) => result,
            };

            let error = match result {
                Ok(handle) => return Ok(Some(handle)),
                Err(e) => e,
            };
            if !policy.should_retry(attempt) {
                return Err(GroupError::JoinFailure {
                    group_id: self.config.group_id.clone(),
                    attempts: attempt,
                    reason: error.to_string(),
                });
            }

            let delay = policy.backoff(attempt);
            warn!(
                group_id = %self.config.group_id,
                attempt,
                error = %error,
                ?delay,
                "Group join failed, retrying"
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Heartbeat until the session must be replaced or the driver stops
    async fn watch(&self, session: &GroupSession) -> Liveness {
        let policy = &self.config.retry;
        let mut failures = 0u32;
        let mut delay = self.config.heartbeat_interval;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Liveness::Stop,
                _ = self.tx.closed() => return Liveness::Stop,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.log.heartbeat(session.handle()).await {
                Ok(Heartbeat::Stable) => {
                    failures = 0;
                    delay = self.config.heartbeat_interval;
                }
                Ok(Heartbeat::RebalanceRequired) => {
                    debug!(generation = session.generation(), "Rebalance required");
                    return Liveness::Rejoin;
                }
                Err(GroupError::UnknownMember(member)) => {
                    warn!(member_id = %member, "Member unknown to coordinator");
                    return Liveness::Rejoin;
                }
                Err(e) => {
                    failures += 1;
                    if !policy.should_retry(failures) {
                        warn!(error = %e, failures, "Heartbeat retries exhausted");
                        return Liveness::Rejoin;
                    }
                    delay = policy.backoff(failures);
                    warn!(error = %e, failures, ?delay, "Heartbeat failed, retrying");
                }
            }
        }
    }
}
