//! In-process log with consumer-group coordination
//!
//! Backs the demo binary and the integration tests. Mirrors the broker
//! behaviour the group runtime relies on:
//!
//! - generations advance only when group membership changes
//! - partitions are assigned round-robin over sorted members
//! - commits are fenced on generation and assignment
//! - record streams end once the reader's claim is superseded
//! - retention truncation moves a reader forward to the earliest offset
//!
//! Faults can be injected for joins, heartbeats and commits.

use crate::error::{CommitError, GroupError, PublishError};
use crate::log::{GroupLog, Heartbeat, RecordStream, SessionHandle};
use crate::producer::Publisher;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sluice_protocol::{Header, Record, TopicPartition};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// An honoured commit, in the order the log accepted it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEvent {
    pub group_id: String,
    pub member_id: String,
    pub generation: u64,
    pub partition: TopicPartition,
    pub offset: u64,
}

#[derive(Default)]
struct PartitionLog {
    /// Offset of `records[0]`
    base_offset: u64,
    records: Vec<Record>,
}

impl PartitionLog {
    fn next_offset(&self) -> u64 {
        self.base_offset + self.records.len() as u64
    }

    fn get(&self, offset: u64) -> Option<&Record> {
        offset
            .checked_sub(self.base_offset)
            .and_then(|idx| self.records.get(idx as usize))
    }
}

#[derive(Default)]
struct GroupState {
    generation: u64,
    /// member id -> subscribed topics
    members: BTreeMap<String, BTreeSet<String>>,
    /// member id -> owned partitions
    assignments: HashMap<String, Vec<TopicPartition>>,
    committed: HashMap<TopicPartition, u64>,
}

impl GroupState {
    fn owns(&self, session: &SessionHandle, partition: &TopicPartition) -> bool {
        session.generation == self.generation
            && self
                .assignments
                .get(&session.member_id)
                .is_some_and(|owned| owned.contains(partition))
    }
}

#[derive(Default)]
struct Faults {
    failing_joins: u32,
    failing_heartbeats: u32,
    failing_commits: u32,
    failing_partitions: BTreeSet<TopicPartition>,
    commit_latency: Option<Duration>,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, Vec<PartitionLog>>,
    round_robin: HashMap<String, u32>,
    groups: HashMap<String, GroupState>,
    commit_log: Vec<CommitEvent>,
    faults: Faults,
}

impl State {
    /// Round-robin sorted partitions of each topic over its sorted subscribers
    fn rebalance(&mut self, group_id: &str) {
        let Some(group) = self.groups.get_mut(group_id) else {
            return;
        };
        group.generation += 1;
        group.assignments = group
            .members
            .keys()
            .map(|m| (m.clone(), Vec::new()))
            .collect();

        let subscribed: BTreeSet<&String> = group.members.values().flatten().collect();
        for topic in subscribed {
            let Some(partitions) = self.topics.get(topic) else {
                continue;
            };
            let eligible: Vec<&String> = group
                .members
                .iter()
                .filter(|(_, topics)| topics.contains(topic))
                .map(|(member, _)| member)
                .collect();
            for partition in 0..partitions.len() as u32 {
                let owner = eligible[partition as usize % eligible.len()];
                if let Some(owned) = group.assignments.get_mut(owner) {
                    owned.push(TopicPartition::new(topic.clone(), partition));
                }
            }
        }
        for owned in group.assignments.values_mut() {
            owned.sort();
        }

        info!(
            group_id = %group_id,
            generation = group.generation,
            members = group.members.len(),
            "Group rebalanced"
        );
    }

    fn session_for(&self, group_id: &str, member_id: &str) -> Option<SessionHandle> {
        let group = self.groups.get(group_id)?;
        Some(SessionHandle {
            group_id: group_id.to_string(),
            member_id: member_id.to_string(),
            generation: group.generation,
            assignments: group.assignments.get(member_id).cloned().unwrap_or_default(),
        })
    }
}

struct Shared {
    state: Mutex<State>,
    changed: Notify,
}

/// Shared handle to an in-memory log; clones see the same data
#[derive(Clone)]
pub struct MemoryLog {
    shared: Arc<Shared>,
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLog {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                changed: Notify::new(),
            }),
        }
    }

    fn notify(&self) {
        self.shared.changed.notify_waiters();
    }

    /// Create a topic; an existing topic is grown to `partitions`
    pub fn create_topic(&self, topic: impl Into<String>, partitions: u32) {
        let topic = topic.into();
        let mut state = self.shared.state.lock();
        let logs = state.topics.entry(topic.clone()).or_default();
        while logs.len() < partitions as usize {
            logs.push(PartitionLog::default());
        }
        debug!(topic = %topic, partitions, "Topic created");
    }

    /// Append to a specific partition, returning the assigned offset
    pub fn append(
        &self,
        topic: &str,
        partition: u32,
        key: Option<Bytes>,
        value: Bytes,
        headers: Vec<Header>,
    ) -> Result<u64, PublishError> {
        let offset = {
            let mut state = self.shared.state.lock();
            let log = state
                .topics
                .get_mut(topic)
                .and_then(|p| p.get_mut(partition as usize))
                .ok_or_else(|| PublishError::UnknownTopic(format!("{topic}-{partition}")))?;
            let offset = log.next_offset();
            let mut record = Record::new(topic, partition, offset, value)
                .with_timestamp(chrono::Utc::now().timestamp_millis());
            record.key = key.unwrap_or_default();
            record.headers = headers;
            log.records.push(record);
            offset
        };
        self.notify();
        Ok(offset)
    }

    /// Offset the next appended record will receive
    pub fn high_watermark(&self, topic: &str, partition: u32) -> Option<u64> {
        self.shared
            .state
            .lock()
            .topics
            .get(topic)
            .and_then(|p| p.get(partition as usize))
            .map(PartitionLog::next_offset)
    }

    /// Drop every record below `before` from a partition
    pub fn truncate(&self, topic: &str, partition: u32, before: u64) {
        let mut state = self.shared.state.lock();
        if let Some(log) = state
            .topics
            .get_mut(topic)
            .and_then(|p| p.get_mut(partition as usize))
        {
            let drop = before
                .saturating_sub(log.base_offset)
                .min(log.records.len() as u64);
            log.records.drain(..drop as usize);
            log.base_offset += drop;
            debug!(topic = %topic, partition, base_offset = log.base_offset, "Partition truncated");
        }
    }

    /// Remove a member as if its session timed out
    pub fn evict(&self, group_id: &str, member_id: &str) {
        {
            let mut state = self.shared.state.lock();
            let removed = state
                .groups
                .get_mut(group_id)
                .is_some_and(|g| g.members.remove(member_id).is_some());
            if removed {
                warn!(group_id = %group_id, member_id = %member_id, "Member evicted");
                state.rebalance(group_id);
            }
        }
        self.notify();
    }

    /// Fail the next `n` join attempts with `CoordinatorUnavailable`
    pub fn fail_next_joins(&self, n: u32) {
        self.shared.state.lock().faults.failing_joins = n;
    }

    /// Fail the next `n` heartbeats with `CoordinatorUnavailable`
    pub fn fail_next_heartbeats(&self, n: u32) {
        self.shared.state.lock().faults.failing_heartbeats = n;
    }

    /// Fail the next `n` commits on any partition with `TransportFailure`
    pub fn fail_next_commits(&self, n: u32) {
        self.shared.state.lock().faults.failing_commits = n;
    }

    /// Fail every commit on `partition` until cleared
    pub fn fail_commits_for(&self, partition: TopicPartition) {
        self.shared
            .state
            .lock()
            .faults
            .failing_partitions
            .insert(partition);
    }

    pub fn clear_commit_failures(&self) {
        let mut state = self.shared.state.lock();
        state.faults.failing_commits = 0;
        state.faults.failing_partitions.clear();
    }

    /// Delay every commit acknowledgement by `latency`
    pub fn set_commit_latency(&self, latency: Option<Duration>) {
        self.shared.state.lock().faults.commit_latency = latency;
    }

    pub fn committed(&self, group_id: &str, partition: &TopicPartition) -> Option<u64> {
        self.shared
            .state
            .lock()
            .groups
            .get(group_id)
            .and_then(|g| g.committed.get(partition).copied())
    }

    /// Every honoured commit so far
    pub fn commit_log(&self) -> Vec<CommitEvent> {
        self.shared.state.lock().commit_log.clone()
    }

    /// Honoured commit offsets for one partition, in acceptance order
    pub fn commits_for(&self, group_id: &str, partition: &TopicPartition) -> Vec<u64> {
        self.shared
            .state
            .lock()
            .commit_log
            .iter()
            .filter(|e| e.group_id == group_id && &e.partition == partition)
            .map(|e| e.offset)
            .collect()
    }

    pub fn generation(&self, group_id: &str) -> Option<u64> {
        self.shared
            .state
            .lock()
            .groups
            .get(group_id)
            .map(|g| g.generation)
    }

    pub fn members(&self, group_id: &str) -> Vec<String> {
        self.shared
            .state
            .lock()
            .groups
            .get(group_id)
            .map(|g| g.members.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn assignment(&self, group_id: &str, member_id: &str) -> Vec<TopicPartition> {
        self.shared
            .state
            .lock()
            .groups
            .get(group_id)
            .and_then(|g| g.assignments.get(member_id).cloned())
            .unwrap_or_default()
    }
}

enum Next {
    Record(Record),
    Wait,
    End,
}

#[async_trait]
impl GroupLog for MemoryLog {
    async fn join_group(
        &self,
        group_id: &str,
        member_id: &str,
        topics: &[String],
    ) -> Result<SessionHandle, GroupError> {
        let session = {
            let mut state = self.shared.state.lock();
            if state.faults.failing_joins > 0 {
                state.faults.failing_joins -= 1;
                return Err(GroupError::CoordinatorUnavailable(
                    "injected join failure".to_string(),
                ));
            }

            let subscription: BTreeSet<String> = topics.iter().cloned().collect();
            let group = state.groups.entry(group_id.to_string()).or_default();
            let changed = group.members.get(member_id) != Some(&subscription);
            if changed {
                group.members.insert(member_id.to_string(), subscription);
                state.rebalance(group_id);
            }
            state.session_for(group_id, member_id)
        };
        self.notify();

        session.ok_or_else(|| GroupError::UnknownMember(member_id.to_string()))
    }

    async fn heartbeat(&self, session: &SessionHandle) -> Result<Heartbeat, GroupError> {
        let mut state = self.shared.state.lock();
        if state.faults.failing_heartbeats > 0 {
            state.faults.failing_heartbeats -= 1;
            return Err(GroupError::CoordinatorUnavailable(
                "injected heartbeat failure".to_string(),
            ));
        }
        let group = state
            .groups
            .get(&session.group_id)
            .filter(|g| g.members.contains_key(&session.member_id))
            .ok_or_else(|| GroupError::UnknownMember(session.member_id.clone()))?;

        if group.generation == session.generation {
            Ok(Heartbeat::Stable)
        } else {
            Ok(Heartbeat::RebalanceRequired)
        }
    }

    async fn fetch(
        &self,
        session: &SessionHandle,
        partition: &TopicPartition,
    ) -> Result<RecordStream, GroupError> {
        let start = {
            let state = self.shared.state.lock();
            let group = state
                .groups
                .get(&session.group_id)
                .filter(|g| g.members.contains_key(&session.member_id))
                .ok_or_else(|| GroupError::UnknownMember(session.member_id.clone()))?;
            let base = state
                .topics
                .get(&partition.topic)
                .and_then(|p| p.get(partition.partition as usize))
                .map(|log| log.base_offset)
                .unwrap_or(0);

            match group.committed.get(partition).map(|&c| (c, c.saturating_add(1))) {
                Some((_, next)) if next >= base => next,
                Some((committed, _)) => {
                    warn!(
                        topic = %partition.topic,
                        partition = partition.partition,
                        committed,
                        earliest = base,
                        "Committed offset out of range, resetting to earliest"
                    );
                    base
                }
                None => base,
            }
        };

        let shared = self.shared.clone();
        let session = session.clone();
        let partition = partition.clone();

        let stream = async_stream::stream! {
            let mut next_offset = start;
            loop {
                let changed = shared.changed.notified();
                let next = {
                    let state = shared.state.lock();
                    let owned = state
                        .groups
                        .get(&session.group_id)
                        .is_some_and(|g| g.owns(&session, &partition));
                    match state
                        .topics
                        .get(&partition.topic)
                        .and_then(|p| p.get(partition.partition as usize))
                    {
                        _ if !owned => Next::End,
                        None => Next::End,
                        Some(log) => {
                            if next_offset < log.base_offset {
                                next_offset = log.base_offset;
                            }
                            match log.get(next_offset) {
                                Some(record) => Next::Record(record.clone()),
                                None => Next::Wait,
                            }
                        }
                    }
                };

                match next {
                    Next::Record(record) => {
                        next_offset = record.offset.saturating_add(1);
                        yield record;
                    }
                    Next::Wait => changed.await,
                    Next::End => break,
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn commit(
        &self,
        session: &SessionHandle,
        partition: &TopicPartition,
        offset: u64,
    ) -> Result<(), CommitError> {
        let latency = self.shared.state.lock().faults.commit_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.shared.state.lock();
        if state.faults.failing_partitions.contains(partition) {
            return Err(CommitError::TransportFailure(format!(
                "injected commit failure for {partition}"
            )));
        }
        if state.faults.failing_commits > 0 {
            state.faults.failing_commits -= 1;
            return Err(CommitError::TransportFailure(
                "injected commit failure".to_string(),
            ));
        }

        let stale = CommitError::StaleGeneration {
            partition: partition.clone(),
            generation: session.generation,
        };
        let Some(group) = state.groups.get_mut(&session.group_id) else {
            return Err(stale);
        };
        if !group.owns(session, partition) {
            return Err(stale);
        }
        if group.committed.get(partition).is_some_and(|&c| c >= offset) {
            return Ok(());
        }
        group.committed.insert(partition.clone(), offset);

        state.commit_log.push(CommitEvent {
            group_id: session.group_id.clone(),
            member_id: session.member_id.clone(),
            generation: session.generation,
            partition: partition.clone(),
            offset,
        });
        Ok(())
    }

    async fn leave_group(&self, session: &SessionHandle) -> Result<(), GroupError> {
        {
            let mut state = self.shared.state.lock();
            let removed = state
                .groups
                .get_mut(&session.group_id)
                .is_some_and(|g| g.members.remove(&session.member_id).is_some());
            if !removed {
                return Err(GroupError::UnknownMember(session.member_id.clone()));
            }
            info!(
                group_id = %session.group_id,
                member_id = %session.member_id,
                "Member left group"
            );
            state.rebalance(&session.group_id);
        }
        self.notify();
        Ok(())
    }
}

#[async_trait]
impl Publisher for MemoryLog {
    async fn publish(
        &self,
        topic: &str,
        key: Option<Bytes>,
        value: Bytes,
        headers: Vec<Header>,
    ) -> Result<(u32, u64), PublishError> {
        let partition = {
            let mut state = self.shared.state.lock();
            let count = state
                .topics
                .get(topic)
                .map(|p| p.len() as u32)
                .filter(|&n| n > 0)
                .ok_or_else(|| PublishError::UnknownTopic(topic.to_string()))?;
            match &key {
                Some(key) if !key.is_empty() => {
                    let mut hasher = DefaultHasher::new();
                    key.hash(&mut hasher);
                    (hasher.finish() % count as u64) as u32
                }
                _ => {
                    let next = state.round_robin.entry(topic.to_string()).or_insert(0);
                    let partition = *next % count;
                    *next = next.wrapping_add(1);
                    partition
                }
            }
        };
        let offset = self.append(topic, partition, key, value, headers)?;
        Ok((partition, offset))
    }
}
