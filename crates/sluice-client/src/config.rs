//! Pipeline configuration and security profile
//!
//! Values resolve in three layers: explicit overrides (CLI flags), then the
//! environment, then defaults. The environment is read through an injected
//! lookup so resolution stays testable.
//!
//! | Variable                  | Default                        |
//! |---------------------------|--------------------------------|
//! | `KAFKA_BROKERS`           | `KAFKA_BROKER`, `localhost:9092` |
//! | `KAFKA_TOPIC_NAME`        | `test-topic`                   |
//! | `KAFKA_GROUP_ID`          | `change-data-consumer-group`   |
//! | `KAFKA_SECURITY_PROTOCOL` | `PLAINTEXT`                    |
//! | `KAFKA_SASL_MECHANISM`    | `PLAIN`                        |
//! | `KAFKA_USERNAME`          | none                           |
//! | `KAFKA_PASSWORD`          | none                           |
//! | `KAFKA_SSL_VERIFY`        | `true` (exactly `true` enables) |

use crate::auth::{Authenticator, PlainClient, ScramClient, ScramMechanism};
use crate::error::ConfigError;
use secrecy::SecretString;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_BROKER: &str = "localhost:9092";
pub const DEFAULT_TOPIC: &str = "test-topic";
pub const DEFAULT_GROUP_ID: &str = "change-data-consumer-group";

// ============================================================================
// Security profile
// ============================================================================

/// Transport security protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecurityProtocol {
    /// No encryption, no authentication
    #[default]
    Plaintext,
    /// TLS encryption, no authentication
    Ssl,
    /// No encryption, SASL authentication
    SaslPlaintext,
    /// TLS encryption, SASL authentication
    SaslSsl,
}

impl SecurityProtocol {
    pub fn uses_sasl(&self) -> bool {
        matches!(self, SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl)
    }

    pub fn uses_tls(&self) -> bool {
        matches!(self, SecurityProtocol::Ssl | SecurityProtocol::SaslSsl)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "PLAINTEXT",
            SecurityProtocol::Ssl => "SSL",
            SecurityProtocol::SaslPlaintext => "SASL_PLAINTEXT",
            SecurityProtocol::SaslSsl => "SASL_SSL",
        }
    }
}

impl FromStr for SecurityProtocol {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PLAINTEXT" => Ok(SecurityProtocol::Plaintext),
            "SSL" => Ok(SecurityProtocol::Ssl),
            "SASL_PLAINTEXT" => Ok(SecurityProtocol::SaslPlaintext),
            "SASL_SSL" => Ok(SecurityProtocol::SaslSsl),
            _ => Err(ConfigError::InvalidValue {
                key: ENV_SECURITY_PROTOCOL.to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SecurityProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SASL mechanism for authentication
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SaslMechanism {
    /// No SASL exchange (non-SASL protocols)
    None,
    /// Plain username/password
    #[default]
    Plain,
    ScramSha256,
    ScramSha512,
}

impl SaslMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaslMechanism::None => "NONE",
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
        }
    }

    /// Fresh authenticator for one connection attempt
    pub fn authenticator(&self) -> Option<Box<dyn Authenticator>> {
        match self {
            SaslMechanism::None => None,
            SaslMechanism::Plain => Some(Box::new(PlainClient::new())),
            SaslMechanism::ScramSha256 => Some(Box::new(ScramClient::new(ScramMechanism::Sha256))),
            SaslMechanism::ScramSha512 => Some(Box::new(ScramClient::new(ScramMechanism::Sha512))),
        }
    }
}

impl FromStr for SaslMechanism {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "PLAIN" => Ok(SaslMechanism::Plain),
            "SCRAM-SHA-256" => Ok(SaslMechanism::ScramSha256),
            "SCRAM-SHA-512" => Ok(SaslMechanism::ScramSha512),
            _ => Err(ConfigError::InvalidValue {
                key: ENV_SASL_MECHANISM.to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved, immutable security settings
#[derive(Clone)]
pub struct SecurityProfile {
    pub protocol: SecurityProtocol,
    pub mechanism: SaslMechanism,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub authorization_id: Option<String>,
    pub ssl_verify: bool,
}

impl Default for SecurityProfile {
    fn default() -> Self {
        Self::plaintext()
    }
}

impl SecurityProfile {
    pub fn plaintext() -> Self {
        Self {
            protocol: SecurityProtocol::Plaintext,
            mechanism: SaslMechanism::None,
            username: None,
            password: None,
            authorization_id: None,
            ssl_verify: true,
        }
    }

    /// SASL profile with the given mechanism and credentials
    pub fn sasl(
        protocol: SecurityProtocol,
        mechanism: SaslMechanism,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let profile = Self {
            protocol,
            mechanism,
            username: Some(username.into()),
            password: Some(SecretString::new(password.into().into_boxed_str())),
            authorization_id: None,
            ssl_verify: true,
        };
        profile.validate()?;
        Ok(profile)
    }

    pub fn with_authorization_id(mut self, authorization_id: impl Into<String>) -> Self {
        self.authorization_id = Some(authorization_id.into());
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.protocol.uses_sasl() {
            return Ok(());
        }
        if self.mechanism == SaslMechanism::None {
            return Err(ConfigError::InvalidValue {
                key: ENV_SASL_MECHANISM.to_string(),
                value: SaslMechanism::None.to_string(),
            });
        }
        let has_username = self.username.as_deref().is_some_and(|u| !u.is_empty());
        let has_password = self
            .password
            .as_ref()
            .is_some_and(|p| !secrecy::ExposeSecret::expose_secret(p).is_empty());
        if !has_username || !has_password {
            return Err(ConfigError::MissingCredentials);
        }
        Ok(())
    }
}

impl fmt::Debug for SecurityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityProfile")
            .field("protocol", &self.protocol)
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("authorization_id", &self.authorization_id)
            .field("ssl_verify", &self.ssl_verify)
            .finish()
    }
}

impl fmt::Display for SecurityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol={}", self.protocol)?;
        if self.protocol.uses_sasl() {
            write!(
                f,
                " mechanism={} username={} password={}",
                self.mechanism,
                self.username.as_deref().unwrap_or("-"),
                if self.password.is_some() { "[REDACTED]" } else { "-" }
            )?;
        }
        if self.protocol.uses_tls() {
            write!(f, " ssl_verify={}", self.ssl_verify)?;
        }
        Ok(())
    }
}

// ============================================================================
// Pipeline configuration
// ============================================================================

const ENV_BROKERS: &str = "KAFKA_BROKERS";
const ENV_BROKER: &str = "KAFKA_BROKER";
const ENV_TOPIC: &str = "KAFKA_TOPIC_NAME";
const ENV_GROUP_ID: &str = "KAFKA_GROUP_ID";
const ENV_SECURITY_PROTOCOL: &str = "KAFKA_SECURITY_PROTOCOL";
const ENV_SASL_MECHANISM: &str = "KAFKA_SASL_MECHANISM";
const ENV_USERNAME: &str = "KAFKA_USERNAME";
const ENV_PASSWORD: &str = "KAFKA_PASSWORD";
const ENV_SSL_VERIFY: &str = "KAFKA_SSL_VERIFY";

/// Explicit values that take precedence over the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub brokers: Option<Vec<String>>,
    pub topic: Option<String>,
    pub group_id: Option<String>,
    pub security_protocol: Option<String>,
    pub sasl_mechanism: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_verify: Option<bool>,
}

/// Resolved settings for one producer/consumer pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    pub security: SecurityProfile,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            brokers: vec![DEFAULT_BROKER.to_string()],
            topic: DEFAULT_TOPIC.to_string(),
            group_id: DEFAULT_GROUP_ID.to_string(),
            security: SecurityProfile::default(),
        }
    }
}

impl PipelineConfig {
    /// Resolve from the process environment
    pub fn from_env(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        Self::resolve(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve with an arbitrary environment lookup
    pub fn resolve<F>(overrides: &ConfigOverrides, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let brokers = match &overrides.brokers {
            Some(brokers) if !brokers.is_empty() => brokers.clone(),
            _ => env(ENV_BROKERS)
                .or_else(|| env(ENV_BROKER))
                .map(|list| parse_broker_list(&list))
                .filter(|list| !list.is_empty())
                .unwrap_or_else(|| vec![DEFAULT_BROKER.to_string()]),
        };

        let topic = overrides
            .topic
            .clone()
            .or_else(|| env(ENV_TOPIC))
            .unwrap_or_else(|| DEFAULT_TOPIC.to_string());

        let group_id = overrides
            .group_id
            .clone()
            .or_else(|| env(ENV_GROUP_ID))
            .unwrap_or_else(|| DEFAULT_GROUP_ID.to_string());

        let protocol = match overrides
            .security_protocol
            .clone()
            .or_else(|| env(ENV_SECURITY_PROTOCOL))
        {
            None => SecurityProtocol::default(),
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(value = %raw, "Unknown security protocol, falling back to PLAINTEXT");
                SecurityProtocol::Plaintext
            }),
        };

        let mechanism = if protocol.uses_sasl() {
            match overrides
                .sasl_mechanism
                .clone()
                .or_else(|| env(ENV_SASL_MECHANISM))
            {
                None => SaslMechanism::default(),
                Some(raw) => raw.parse().unwrap_or_else(|_| {
                    warn!(value = %raw, "Unknown SASL mechanism, falling back to PLAIN");
                    SaslMechanism::Plain
                }),
            }
        } else {
            SaslMechanism::None
        };

        let ssl_verify = overrides.ssl_verify.unwrap_or_else(|| {
            env(ENV_SSL_VERIFY).map(|v| v == "true").unwrap_or(true)
        });

        let security = SecurityProfile {
            protocol,
            mechanism,
            username: overrides.username.clone().or_else(|| env(ENV_USERNAME)),
            password: overrides
                .password
                .clone()
                .or_else(|| env(ENV_PASSWORD))
                .map(|p| SecretString::new(p.into_boxed_str())),
            authorization_id: None,
            ssl_verify,
        };
        security.validate()?;

        Ok(Self {
            brokers,
            topic,
            group_id,
            security,
        })
    }
}

fn parse_broker_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect()
}
