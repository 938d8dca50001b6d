//! Shared helpers for the integration tests

#![allow(dead_code)]

use bytes::Bytes;
use sluice_client::{
    ChangeDataHandler, CoordinatorConfig, GroupRuntime, MemoryLog, ProcessorConfig, RecordHandler,
    RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sluice_client=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Coordinator tuned for fast tests
pub fn fast_coordinator(group_id: &str) -> CoordinatorConfig {
    CoordinatorConfig::new(group_id)
        .heartbeat_interval(Duration::from_millis(20))
        .retry(RetryPolicy::new(
            5,
            Duration::from_millis(5),
            Duration::from_millis(20),
        ))
}

pub fn fast_processor() -> ProcessorConfig {
    ProcessorConfig {
        commit_retry: RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(10)),
    }
}

/// Append `count` text records to one partition
pub fn append_text(log: &MemoryLog, topic: &str, partition: u32, count: usize) {
    for i in 0..count {
        log.append(
            topic,
            partition,
            None,
            Bytes::from(format!("message-{i}")),
            Vec::new(),
        )
        .expect("append to existing partition");
    }
}

/// A runtime member running in the background
pub struct Member {
    pub member_id: String,
    pub cancel: CancellationToken,
    pub task: JoinHandle<sluice_client::Result<()>>,
}

impl Member {
    pub fn start(log: &MemoryLog, group_id: &str, topic: &str) -> Self {
        Self::start_with(log, fast_coordinator(group_id), fast_processor(), topic)
    }

    pub fn start_with(
        log: &MemoryLog,
        coordinator: CoordinatorConfig,
        processor: ProcessorConfig,
        topic: &str,
    ) -> Self {
        Self::start_with_handler(
            log,
            coordinator,
            processor,
            Arc::new(ChangeDataHandler::new()),
            topic,
        )
    }

    pub fn start_with_handler(
        log: &MemoryLog,
        coordinator: CoordinatorConfig,
        processor: ProcessorConfig,
        handler: Arc<dyn RecordHandler>,
        topic: &str,
    ) -> Self {
        let runtime = GroupRuntime::new(Arc::new(log.clone()), coordinator, handler)
            .with_processor_config(processor);
        let member_id = runtime.member_id().to_string();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let topics = vec![topic.to_string()];
        let task = tokio::spawn(async move { runtime.run(token, topics).await });
        Self {
            member_id,
            cancel,
            task,
        }
    }

    /// Cancel and wait for the runtime to return
    pub async fn stop(self) -> sluice_client::Result<()> {
        self.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("runtime stops promptly after cancel")
            .expect("runtime task does not panic")
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
