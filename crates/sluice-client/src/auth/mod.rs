//! SASL authentication
//!
//! Every mechanism implements [`Authenticator`], a step-driven state machine
//! with no I/O of its own. [`authenticate`] drives one over a
//! [`SaslTransport`], and [`SecureConnector`] wires the whole thing to a
//! [`SecurityProfile`](crate::config::SecurityProfile).

mod handshake;
mod plain;
mod scram;

pub use handshake::{authenticate, Connector, SaslTransport, SecureConnector, MAX_HANDSHAKE_ROUNDS};
pub use plain::PlainClient;
pub use scram::{ScramClient, ScramMechanism};

use crate::error::AuthError;
use std::fmt;

/// Client half of a challenge-response exchange.
///
/// One instance serves exactly one connection attempt:
///
/// 1. `begin` with the credentials
/// 2. `step(b"")` for the initial response
/// 3. `step(challenge)` once per server message until `is_done`
pub trait Authenticator: Send + fmt::Debug {
    /// SASL mechanism name as sent to the server
    fn mechanism(&self) -> &'static str;

    fn begin(
        &mut self,
        identity: &str,
        secret: &str,
        authorization_id: &str,
    ) -> Result<(), AuthError>;

    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>, AuthError>;

    fn is_done(&self) -> bool;
}
