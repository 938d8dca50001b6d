//! Consumer group tests
//!
//! End-to-end behaviour of the group runtime over the in-memory log:
//! - offset commit after every handled record
//! - resume from the committed position
//! - rebalancing between members
//! - commit fencing and fault isolation
//! - heartbeat outages within and beyond the retry budget
//! - cancellation and terminal join failures
//!
//! Run with: cargo test -p sluice-client --test consumer_groups -- --nocapture

mod common;

use common::*;
use futures::StreamExt;
use sluice_client::{
    ChangeDataHandler, ChangeDataProducer, Error, GroupError, GroupLog, MemoryLog, Producer,
    RetryPolicy, SessionCoordinator,
};
use sluice_protocol::TopicPartition;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

const TOPIC: &str = "test-topic";

#[tokio::test]
async fn test_commits_every_record_in_order() -> anyhow::Result<()> {
    init_tracing();

    let log = MemoryLog::new();
    log.create_topic(TOPIC, 2);
    append_text(&log, TOPIC, 0, 3);
    append_text(&log, TOPIC, 1, 2);

    let group = "e2e-group";
    let p0 = TopicPartition::new(TOPIC, 0);
    let p1 = TopicPartition::new(TOPIC, 1);

    let member = Member::start(&log, group, TOPIC);
    let done = wait_until(Duration::from_secs(5), || {
        log.committed(group, &p0) == Some(2) && log.committed(group, &p1) == Some(1)
    })
    .await;
    assert!(done, "all records committed");

    member.stop().await?;

    assert_eq!(log.commits_for(group, &p0), vec![0, 1, 2]);
    assert_eq!(log.commits_for(group, &p1), vec![0, 1]);
    assert!(log.members(group).is_empty(), "member left on shutdown");
    Ok(())
}

#[tokio::test]
async fn test_cancel_stops_idle_runtime_promptly() -> anyhow::Result<()> {
    init_tracing();

    let log = MemoryLog::new();
    log.create_topic(TOPIC, 3);
    let group = "cancel-group";

    let member = Member::start(&log, group, TOPIC);
    assert!(wait_until(Duration::from_secs(5), || log.members(group).len() == 1).await);

    let started = tokio::time::Instant::now();
    member.stop().await?;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(log.members(group).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cancel_during_slow_commit() -> anyhow::Result<()> {
    init_tracing();

    let log = MemoryLog::new();
    log.create_topic(TOPIC, 1);
    append_text(&log, TOPIC, 0, 1);
    log.set_commit_latency(Some(Duration::from_secs(30)));
    let group = "slow-commit-group";

    let member = Member::start(&log, group, TOPIC);
    assert!(wait_until(Duration::from_secs(5), || log.members(group).len() == 1).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = tokio::time::Instant::now();
    member.stop().await?;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(log.committed(group, &TopicPartition::new(TOPIC, 0)), None);
    Ok(())
}

#[tokio::test]
async fn test_cancel_with_backlog_on_every_partition() -> anyhow::Result<()> {
    init_tracing();

    let log = MemoryLog::new();
    log.create_topic(TOPIC, 3);
    for partition in 0..3 {
        append_text(&log, TOPIC, partition, 50);
    }
    let group = "backlog-group";

    let handler = ChangeDataHandler::new().with_processing_delay(Duration::from_millis(100));
    let member = Member::start_with_handler(
        &log,
        fast_coordinator(group),
        fast_processor(),
        Arc::new(handler),
        TOPIC,
    );
    assert!(wait_until(Duration::from_secs(5), || log.members(group).len() == 1).await);
    tokio::time::sleep(Duration::from_millis(350)).await;

    let started = tokio::time::Instant::now();
    member.stop().await?;
    assert!(started.elapsed() < Duration::from_secs(1));

    let commits: usize = (0..3)
        .map(|p| log.commits_for(group, &TopicPartition::new(TOPIC, p)).len())
        .sum();
    info!(commits, "Commits before cancel");
    assert!(commits > 0);
    assert!(commits < 150);
    assert!(log.members(group).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_rebalance_keeps_progress() -> anyhow::Result<()> {
    init_tracing();

    let log = MemoryLog::new();
    log.create_topic(TOPIC, 4);
    let group = "rebalance-group";
    let partitions: Vec<TopicPartition> =
        (0..4).map(|p| TopicPartition::new(TOPIC, p)).collect();

    let producer_cancel = CancellationToken::new();
    let producer = tokio::spawn(
        Producer::new(Arc::new(log.clone()), TOPIC, ChangeDataProducer::new())
            .run(producer_cancel.clone(), Duration::from_millis(5)),
    );

    let first = Member::start(&log, group, TOPIC);
    assert!(
        wait_until(Duration::from_secs(5), || !log.commit_log().is_empty()).await,
        "first member commits"
    );

    let second = Member::start(&log, group, TOPIC);
    let balanced = wait_until(Duration::from_secs(5), || {
        log.assignment(group, &first.member_id).len() == 2
            && log.assignment(group, &second.member_id).len() == 2
    })
    .await;
    assert!(balanced, "partitions split between members");

    tokio::time::sleep(Duration::from_millis(200)).await;
    producer_cancel.cancel();
    let sent = producer.await?;
    info!(sent, "Producer finished");

    // Every partition drains to its last offset
    let drained = wait_until(Duration::from_secs(5), || {
        partitions.iter().all(|tp| {
            match log.high_watermark(TOPIC, tp.partition) {
                Some(0) | None => true,
                Some(next) => log.committed(group, tp) == Some(next - 1),
            }
        })
    })
    .await;
    assert!(drained, "no partition stalls after the rebalance");

    let events = log.commit_log();
    let committers: HashSet<&str> = events.iter().map(|e| e.member_id.as_str()).collect();
    assert!(committers.contains(first.member_id.as_str()));
    assert!(committers.contains(second.member_id.as_str()));

    for tp in &partitions {
        let per_partition: Vec<_> = events.iter().filter(|e| &e.partition == tp).collect();
        for pair in per_partition.windows(2) {
            assert!(pair[0].offset < pair[1].offset, "commits advance on {tp}");
            assert!(pair[0].generation <= pair[1].generation, "generations advance on {tp}");
        }
    }

    first.stop().await?;
    second.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_commit_failure_isolated_to_partition() -> anyhow::Result<()> {
    init_tracing();

    let log = MemoryLog::new();
    log.create_topic(TOPIC, 2);
    let group = "isolation-group";
    let p0 = TopicPartition::new(TOPIC, 0);
    let p1 = TopicPartition::new(TOPIC, 1);
    log.fail_commits_for(p0.clone());

    append_text(&log, TOPIC, 0, 3);
    append_text(&log, TOPIC, 1, 3);

    let member = Member::start(&log, group, TOPIC);
    assert!(
        wait_until(Duration::from_secs(5), || log.committed(group, &p1) == Some(2)).await,
        "healthy partition keeps committing"
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(log.committed(group, &p0), None);
    assert!(!member.task.is_finished(), "runtime survives a failed claim");

    member.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_transient_commit_failures_are_retried() -> anyhow::Result<()> {
    init_tracing();

    let log = MemoryLog::new();
    log.create_topic(TOPIC, 1);
    let group = "retry-group";
    let p0 = TopicPartition::new(TOPIC, 0);
    log.fail_next_commits(2);
    append_text(&log, TOPIC, 0, 2);

    let member = Member::start(&log, group, TOPIC);
    assert!(wait_until(Duration::from_secs(5), || log.committed(group, &p0) == Some(1)).await);
    member.stop().await?;

    assert_eq!(log.commits_for(group, &p0), vec![0, 1]);
    Ok(())
}

#[tokio::test]
async fn test_restart_resumes_after_committed_offset() -> anyhow::Result<()> {
    init_tracing();

    let log = MemoryLog::new();
    log.create_topic(TOPIC, 1);
    let group = "resume-group";
    let p0 = TopicPartition::new(TOPIC, 0);

    append_text(&log, TOPIC, 0, 3);
    let member = Member::start(&log, group, TOPIC);
    assert!(wait_until(Duration::from_secs(5), || log.committed(group, &p0) == Some(2)).await);
    member.stop().await?;

    append_text(&log, TOPIC, 0, 2);
    let member = Member::start(&log, group, TOPIC);
    assert!(wait_until(Duration::from_secs(5), || log.committed(group, &p0) == Some(4)).await);
    member.stop().await?;

    assert_eq!(log.commits_for(group, &p0), vec![0, 1, 2, 3, 4]);
    Ok(())
}

#[tokio::test]
async fn test_replayed_commit_is_noop() -> anyhow::Result<()> {
    init_tracing();

    let log = MemoryLog::new();
    log.create_topic(TOPIC, 1);
    let group = "replay-group";
    let p0 = TopicPartition::new(TOPIC, 0);

    let handle = log.join_group(group, "m1", &[TOPIC.to_string()]).await?;
    log.commit(&handle, &p0, 5).await?;
    log.commit(&handle, &p0, 3).await?;
    log.commit(&handle, &p0, 5).await?;

    assert_eq!(log.committed(group, &p0), Some(5));
    assert_eq!(log.commits_for(group, &p0), vec![5]);
    Ok(())
}

#[tokio::test]
async fn test_truncated_log_resets_to_earliest() -> anyhow::Result<()> {
    init_tracing();

    let log = MemoryLog::new();
    log.create_topic(TOPIC, 1);
    let group = "reset-group";
    let p0 = TopicPartition::new(TOPIC, 0);

    append_text(&log, TOPIC, 0, 3);
    let member = Member::start(&log, group, TOPIC);
    assert!(wait_until(Duration::from_secs(5), || log.committed(group, &p0) == Some(2)).await);
    member.stop().await?;

    // Offsets 3..=7 written, 3..=5 lost to retention
    append_text(&log, TOPIC, 0, 5);
    log.truncate(TOPIC, 0, 6);

    let member = Member::start(&log, group, TOPIC);
    assert!(wait_until(Duration::from_secs(5), || log.committed(group, &p0) == Some(7)).await);
    member.stop().await?;

    assert_eq!(log.commits_for(group, &p0), vec![0, 1, 2, 6, 7]);
    Ok(())
}

#[tokio::test]
async fn test_evicted_member_rejoins() -> anyhow::Result<()> {
    init_tracing();

    let log = MemoryLog::new();
    log.create_topic(TOPIC, 1);
    let group = "evict-group";
    let p0 = TopicPartition::new(TOPIC, 0);

    let member = Member::start(&log, group, TOPIC);
    assert!(wait_until(Duration::from_secs(5), || log.members(group).len() == 1).await);
    let before = log.generation(group).unwrap_or_default();

    log.evict(group, &member.member_id);
    assert!(
        wait_until(Duration::from_secs(5), || {
            log.members(group).len() == 1 && log.generation(group) > Some(before + 1)
        })
        .await,
        "member rejoins under a new generation"
    );

    append_text(&log, TOPIC, 0, 1);
    assert!(wait_until(Duration::from_secs(5), || log.committed(group, &p0) == Some(0)).await);
    member.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_heartbeat_outage_within_retry_budget() -> anyhow::Result<()> {
    init_tracing();

    let log = MemoryLog::new();
    log.create_topic(TOPIC, 1);
    let group = "blip-group";
    let config = fast_coordinator(group).retry(RetryPolicy::new(
        4,
        Duration::from_millis(5),
        Duration::from_millis(10),
    ));

    let coordinator = SessionCoordinator::new(Arc::new(log.clone()), config);
    let cancel = CancellationToken::new();
    let mut sessions = coordinator.join(vec![TOPIC.to_string()], cancel.clone());
    let first = sessions.next().await.expect("session")?;

    log.fail_next_heartbeats(2);
    let next = tokio::time::timeout(Duration::from_millis(400), sessions.next()).await;
    assert!(next.is_err(), "no new session while heartbeats recover");
    assert!(!first.is_revoked());
    assert_eq!(log.generation(group), Some(first.generation()));

    cancel.cancel();
    assert!(sessions.next().await.is_none());
    assert!(first.is_revoked());
    Ok(())
}

#[tokio::test]
async fn test_heartbeat_outage_beyond_retry_budget() -> anyhow::Result<()> {
    init_tracing();

    let log = MemoryLog::new();
    log.create_topic(TOPIC, 1);
    let group = "outage-group";
    let config = fast_coordinator(group).retry(RetryPolicy::new(
        3,
        Duration::from_millis(5),
        Duration::from_millis(10),
    ));

    let coordinator = SessionCoordinator::new(Arc::new(log.clone()), config);
    let cancel = CancellationToken::new();
    let mut sessions = coordinator.join(vec![TOPIC.to_string()], cancel.clone());
    let first = sessions.next().await.expect("session")?;

    log.fail_next_heartbeats(3);
    let second = tokio::time::timeout(Duration::from_secs(5), sessions.next())
        .await?
        .expect("fresh session")?;
    assert!(first.is_revoked());
    assert!(!second.is_revoked());
    // Membership did not change, so the group stays on the same generation
    assert_eq!(second.generation(), first.generation());
    assert_eq!(second.member_id(), first.member_id());
    assert_eq!(log.members(group), vec![coordinator.member_id().to_string()]);

    cancel.cancel();
    assert!(sessions.next().await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_join_failure_is_terminal() {
    init_tracing();

    let log = MemoryLog::new();
    log.create_topic(TOPIC, 1);
    log.fail_next_joins(100);

    let coordinator = fast_coordinator("doomed-group").retry(RetryPolicy::new(
        3,
        Duration::from_millis(1),
        Duration::from_millis(2),
    ));
    let member = Member::start_with(&log, coordinator, fast_processor(), TOPIC);

    let result = tokio::time::timeout(Duration::from_secs(5), member.task)
        .await
        .expect("runtime gives up")
        .expect("runtime task does not panic");

    match result {
        Err(Error::Group(GroupError::JoinFailure {
            group_id, attempts, ..
        })) => {
            assert_eq!(group_id, "doomed-group");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected JoinFailure, got {other:?}"),
    }
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn committed_offset_never_regresses(offsets in prop::collection::vec(0u64..100, 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let log = MemoryLog::new();
                log.create_topic(TOPIC, 1);
                let tp = TopicPartition::new(TOPIC, 0);
                let handle = log
                    .join_group("prop-group", "m1", &[TOPIC.to_string()])
                    .await
                    .unwrap();

                let mut high = None;
                for offset in &offsets {
                    log.commit(&handle, &tp, *offset).await.unwrap();
                    high = high.max(Some(*offset));
                    prop_assert_eq!(log.committed("prop-group", &tp), high);
                }

                let history = log.commits_for("prop-group", &tp);
                prop_assert!(history.windows(2).all(|w| w[0] < w[1]));
                Ok(())
            })?;
        }
    }
}
