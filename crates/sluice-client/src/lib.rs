//! Sluice consumer-group client
//!
//! Consumes change-data records from a partitioned log as a member of a
//! consumer group, committing every offset after its record is handled.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       GroupRuntime                         │
//! │                                                            │
//! │  SessionCoordinator ──► GroupSession (gen N) ──┬─► ClaimProcessor (p0)
//! │        │  join / heartbeat / leave             ├─► ClaimProcessor (p1)
//! │        ▼                                       └─► ClaimProcessor (pN)
//! │     GroupLog  ◄──────────── fetch / commit ───────────────┘
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Connections to a broker go through [`SecureConnector`], which applies a
//! [`SecurityProfile`] and drives a SASL [`Authenticator`] (PLAIN or SCRAM).
//!
//! # Example
//!
//! ```rust,no_run
//! use sluice_client::{ChangeDataHandler, CoordinatorConfig, GroupRuntime, MemoryLog};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> sluice_client::Result<()> {
//! let log = MemoryLog::new();
//! log.create_topic("test-topic", 3);
//!
//! let runtime = GroupRuntime::new(
//!     Arc::new(log),
//!     CoordinatorConfig::new("change-data-consumer-group"),
//!     Arc::new(ChangeDataHandler::new()),
//! );
//! runtime
//!     .run(CancellationToken::new(), vec!["test-topic".to_string()])
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod log;
pub mod memory;
pub mod processor;
pub mod producer;
pub mod retry;
pub mod runtime;

pub use auth::{
    authenticate, Authenticator, Connector, PlainClient, SaslTransport, ScramClient,
    ScramMechanism, SecureConnector,
};
pub use config::{
    ConfigOverrides, PipelineConfig, SaslMechanism, SecurityProfile, SecurityProtocol,
};
pub use coordinator::{CoordinatorConfig, GroupSession, SessionCoordinator, SessionStream};
pub use error::{
    AuthError, ClaimError, CommitError, ConfigError, Error, GroupError, PublishError, Result,
    TransportError,
};
pub use log::{GroupLog, Heartbeat, RecordStream, SessionHandle};
pub use memory::{CommitEvent, MemoryLog};
pub use processor::{
    ChangeDataHandler, ClaimExit, ClaimProcessor, ClaimReport, PartitionClaim, ProcessorConfig,
    RecordHandler,
};
pub use producer::{
    ChangeDataProducer, MessageSource, MixedProducer, OutgoingMessage, Producer, Publisher,
};
pub use retry::RetryPolicy;
pub use runtime::GroupRuntime;

pub use sluice_protocol as protocol;
