//! Handshake driver and secure connector

use super::Authenticator;
use crate::config::SecurityProfile;
use crate::error::{AuthError, Error, Result, TransportError};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

/// Upper bound on step/exchange rounds for one handshake
pub const MAX_HANDSHAKE_ROUNDS: usize = 8;

/// One connection's SASL channel: send a client response, receive the next
/// server challenge.
#[async_trait]
pub trait SaslTransport: Send {
    async fn exchange(&mut self, response: Vec<u8>) -> std::result::Result<Vec<u8>, TransportError>;
}

/// Opens raw connections to a broker
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: SaslTransport;

    async fn connect(
        &self,
        broker: &str,
        encrypted: bool,
        verify_certificates: bool,
    ) -> std::result::Result<Self::Connection, TransportError>;
}

/// Drive `auth` to completion over `transport`.
///
/// The authenticator must already have been started with `begin`.
pub async fn authenticate<T>(transport: &mut T, auth: &mut dyn Authenticator) -> Result<()>
where
    T: SaslTransport + ?Sized,
{
    let mut challenge = Vec::new();
    for round in 0..MAX_HANDSHAKE_ROUNDS {
        let response = auth.step(&challenge)?;
        if auth.is_done() {
            debug!(mechanism = auth.mechanism(), rounds = round, "SASL exchange complete");
            return Ok(());
        }
        challenge = transport.exchange(response).await?;
    }
    Err(TransportError::TooManyRounds(MAX_HANDSHAKE_ROUNDS).into())
}

/// Connector that applies a [`SecurityProfile`] to every new connection
pub struct SecureConnector<C> {
    inner: C,
    profile: SecurityProfile,
}

impl<C: Connector> SecureConnector<C> {
    pub fn new(inner: C, profile: SecurityProfile) -> Self {
        Self { inner, profile }
    }

    pub fn profile(&self) -> &SecurityProfile {
        &self.profile
    }

    /// Connect to `broker`, authenticating when the profile selects SASL.
    /// A failed handshake drops the connection.
    pub async fn connect(&self, broker: &str) -> Result<C::Connection> {
        let protocol = self.profile.protocol;
        if protocol.uses_tls() && !self.profile.ssl_verify {
            warn!(broker = %broker, "TLS certificate verification disabled");
        }

        let mut conn = self
            .inner
            .connect(broker, protocol.uses_tls(), self.profile.ssl_verify)
            .await?;

        if !protocol.uses_sasl() {
            debug!(broker = %broker, protocol = %protocol, "Connected");
            return Ok(conn);
        }

        let Some(mut auth) = self.profile.mechanism.authenticator() else {
            return Err(Error::Auth(AuthError::SequenceViolation(
                "SASL protocol without a mechanism",
            )));
        };
        let username = self.profile.username.as_deref().unwrap_or_default();
        let password = self
            .profile
            .password
            .as_ref()
            .map(|p| p.expose_secret())
            .unwrap_or_default();
        let authorization_id = self.profile.authorization_id.as_deref().unwrap_or_default();

        auth.begin(username, password, authorization_id)?;
        if let Err(e) = authenticate(&mut conn, auth.as_mut()).await {
            warn!(
                broker = %broker,
                mechanism = auth.mechanism(),
                error = %e,
                "SASL authentication failed"
            );
            return Err(e);
        }

        info!(
            broker = %broker,
            protocol = %protocol,
            mechanism = auth.mechanism(),
            "Authenticated"
        );
        Ok(conn)
    }
}
