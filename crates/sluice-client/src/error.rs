use sluice_protocol::TopicPartition;
use thiserror::Error;

/// Authentication handshake failures. All of them abort the connection
/// attempt; none is retried with the same credentials.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credential: identity and secret must be non-empty")]
    InvalidCredential,

    #[error("Handshake sequence violation: {0}")]
    SequenceViolation(&'static str),

    #[error("Server proof is invalid")]
    ServerProofInvalid,

    #[error("Server rejected authentication: {0}")]
    ServerRejected(String),

    #[error("Malformed server challenge: {0}")]
    MalformedChallenge(String),
}

/// Offset commit failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    /// The session that issued the commit has been superseded by a rebalance
    #[error("Stale generation {generation} for {partition}")]
    StaleGeneration {
        partition: TopicPartition,
        generation: u64,
    },

    #[error("Commit transport failure: {0}")]
    TransportFailure(String),
}

/// Group membership failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    #[error("Failed to join group '{group_id}' after {attempts} attempts: {reason}")]
    JoinFailure {
        group_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Group coordinator unavailable: {0}")]
    CoordinatorUnavailable(String),

    #[error("Unknown member '{0}'")]
    UnknownMember(String),
}

/// Failure that ends a single partition's claim processor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("Commit of {partition} offset {offset} failed after {attempts} attempts: {source}")]
    CommitFailed {
        partition: TopicPartition,
        offset: u64,
        attempts: u32,
        #[source]
        source: CommitError,
    },
}

/// Configuration resolution failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("SASL protocol selected but username or password is missing")]
    MissingCredentials,

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// SASL transport failures
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed during handshake")]
    Closed,

    #[error("Handshake did not complete after {0} rounds")]
    TooManyRounds(usize),
}

/// Publish failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Unknown topic '{0}'")]
    UnknownTopic(String),

    #[error("Failed to encode payload: {0}")]
    Encode(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Claim(#[from] ClaimError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

pub type Result<T> = std::result::Result<T, Error>;
