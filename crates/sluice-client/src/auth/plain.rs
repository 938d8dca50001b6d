//! SASL/PLAIN (RFC 4616): a single `authzid NUL authcid NUL passwd` message,
//! completed by the server's (empty) outcome.

use super::Authenticator;
use crate::error::AuthError;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

#[derive(Default)]
enum State {
    #[default]
    NotStarted,
    Ready {
        identity: String,
        secret: SecretString,
        authorization_id: String,
    },
    AwaitingOutcome,
    Done,
    Failed,
}

/// Client side of SASL/PLAIN
#[derive(Default)]
pub struct PlainClient {
    state: State,
}

impl PlainClient {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Authenticator for PlainClient {
    fn mechanism(&self) -> &'static str {
        "PLAIN"
    }

    fn begin(
        &mut self,
        identity: &str,
        secret: &str,
        authorization_id: &str,
    ) -> Result<(), AuthError> {
        if !matches!(self.state, State::NotStarted) {
            return Err(AuthError::SequenceViolation("exchange already started"));
        }
        if identity.is_empty() || secret.is_empty() {
            return Err(AuthError::InvalidCredential);
        }
        self.state = State::Ready {
            identity: identity.to_string(),
            secret: SecretString::new(secret.into()),
            authorization_id: authorization_id.to_string(),
        };
        Ok(())
    }

    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>, AuthError> {
        match std::mem::take(&mut self.state) {
            State::NotStarted => Err(AuthError::SequenceViolation("step before begin")),
            State::Failed => {
                self.state = State::Failed;
                Err(AuthError::SequenceViolation("exchange failed"))
            }
            State::Done => {
                self.state = State::Done;
                Err(AuthError::SequenceViolation("exchange already complete"))
            }
            State::Ready {
                identity,
                secret,
                authorization_id,
            } => {
                if !challenge.is_empty() {
                    self.state = State::Failed;
                    return Err(AuthError::SequenceViolation(
                        "PLAIN expects an empty challenge",
                    ));
                }
                let mut message = Vec::with_capacity(
                    authorization_id.len() + identity.len() + secret.expose_secret().len() + 2,
                );
                message.extend_from_slice(authorization_id.as_bytes());
                message.push(0);
                message.extend_from_slice(identity.as_bytes());
                message.push(0);
                message.extend_from_slice(secret.expose_secret().as_bytes());
                self.state = State::AwaitingOutcome;
                Ok(message)
            }
            State::AwaitingOutcome => {
                if !challenge.is_empty() {
                    self.state = State::Failed;
                    return Err(AuthError::ServerRejected(
                        String::from_utf8_lossy(challenge).into_owned(),
                    ));
                }
                self.state = State::Done;
                Ok(Vec::new())
            }
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }
}

impl fmt::Debug for PlainClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainClient")
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_message() {
        let mut client = PlainClient::new();
        client.begin("alice", "s3cret", "").unwrap();
        assert!(!client.is_done());

        let message = client.step(b"").unwrap();
        assert_eq!(message, b"\0alice\0s3cret");
        assert!(!client.is_done());

        assert!(client.step(b"").unwrap().is_empty());
        assert!(client.is_done());
    }

    #[test]
    fn test_plain_with_authorization_id() {
        let mut client = PlainClient::new();
        client.begin("alice", "pw", "admin").unwrap();
        assert_eq!(client.step(b"").unwrap(), b"admin\0alice\0pw");
    }

    #[test]
    fn test_plain_sequence() {
        let mut client = PlainClient::new();
        assert!(matches!(
            client.step(b""),
            Err(AuthError::SequenceViolation(_))
        ));
        assert_eq!(client.begin("", "pw", ""), Err(AuthError::InvalidCredential));

        client.begin("alice", "pw", "").unwrap();
        client.step(b"").unwrap();
        client.step(b"").unwrap();
        assert!(matches!(
            client.step(b""),
            Err(AuthError::SequenceViolation(_))
        ));
        assert!(client.is_done());
    }

    #[test]
    fn test_plain_server_rejection() {
        let mut client = PlainClient::new();
        client.begin("alice", "wrong", "").unwrap();
        client.step(b"").unwrap();
        assert_eq!(
            client.step(b"Authentication failed"),
            Err(AuthError::ServerRejected("Authentication failed".to_string()))
        );
        assert!(!client.is_done());
        assert!(matches!(
            client.step(b""),
            Err(AuthError::SequenceViolation(_))
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let mut client = PlainClient::new();
        client.begin("alice", "hunter2", "").unwrap();
        assert!(!format!("{:?}", client).contains("hunter2"));
    }
}
