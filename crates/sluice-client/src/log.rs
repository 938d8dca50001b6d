//! Log capability consumed by the group runtime
//!
//! [`GroupLog`] is everything a consumer group needs from the broker: group
//! membership, per-partition record streams and fenced offset commits.
//! [`MemoryLog`](crate::memory::MemoryLog) is the in-process implementation.

use crate::error::{CommitError, GroupError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use sluice_protocol::{Record, TopicPartition};

/// Records of one claimed partition, in offset order. The stream ends when
/// the claim is revoked.
pub type RecordStream = BoxStream<'static, Record>;

/// Membership of one member in one generation of a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub group_id: String,
    pub member_id: String,
    pub generation: u64,
    /// Partitions owned by this member, sorted
    pub assignments: Vec<TopicPartition>,
}

/// Outcome of a liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heartbeat {
    /// Membership unchanged
    Stable,
    /// Group membership changed; the member must rejoin
    RebalanceRequired,
}

#[async_trait]
pub trait GroupLog: Send + Sync + 'static {
    /// Join (or rejoin) `group_id`. Rejoining with the same subscription
    /// does not start a new generation.
    async fn join_group(
        &self,
        group_id: &str,
        member_id: &str,
        topics: &[String],
    ) -> Result<SessionHandle, GroupError>;

    async fn heartbeat(&self, session: &SessionHandle) -> Result<Heartbeat, GroupError>;

    /// Stream a claimed partition starting after its committed offset
    async fn fetch(
        &self,
        session: &SessionHandle,
        partition: &TopicPartition,
    ) -> Result<RecordStream, GroupError>;

    /// Commit `offset` as processed. Commits at or below the current
    /// committed offset are accepted and ignored.
    async fn commit(
        &self,
        session: &SessionHandle,
        partition: &TopicPartition,
        offset: u64,
    ) -> Result<(), CommitError>;

    async fn leave_group(&self, session: &SessionHandle) -> Result<(), GroupError>;
}
