//! # SCRAM client
//!
//! SCRAM-SHA-256 and SCRAM-SHA-512 (RFC 5802, RFC 7677) as a step-driven
//! state machine. The two mechanisms differ only in the hash family.
//!
//! ```text
//! Client                          Server
//!   |  step(b"")                    |
//!   |--- client-first-message ----->|  (gs2 header, user, nonce)
//!   |<-- server-first-message ------|  (combined nonce, salt, iterations)
//!   |  step(server-first)           |
//!   |--- client-final-message ----->|  (channel binding, nonce, proof)
//!   |<-- server-final-message ------|  (server signature)
//!   |  step(server-final)           |
//!   |  is_done() == true            |
//! ```

use super::Authenticator;
use crate::error::AuthError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;

const NONCE_LEN: usize = 24;

/// Hash family selecting the SCRAM variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScramMechanism {
    Sha256,
    Sha512,
}

impl ScramMechanism {
    pub fn name(&self) -> &'static str {
        match self {
            ScramMechanism::Sha256 => "SCRAM-SHA-256",
            ScramMechanism::Sha512 => "SCRAM-SHA-512",
        }
    }

    /// Digest output length in bytes
    pub fn output_len(&self) -> usize {
        match self {
            ScramMechanism::Sha256 => 32,
            ScramMechanism::Sha512 => 64,
        }
    }

    fn hmac(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        match self {
            ScramMechanism::Sha256 => {
                let mut mac =
                    Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            ScramMechanism::Sha512 => {
                let mut mac =
                    Hmac::<Sha512>::new_from_slice(key).expect("HMAC can take key of any size");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    fn hash(&self, data: &[u8]) -> Vec<u8> {
        match self {
            ScramMechanism::Sha256 => Sha256::digest(data).to_vec(),
            ScramMechanism::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Hi(password, salt, i) = PBKDF2 with this family's HMAC
    fn salted_password(&self, password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        let mut out = vec![0u8; self.output_len()];
        match self {
            ScramMechanism::Sha256 => {
                pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out)
            }
            ScramMechanism::Sha512 => {
                pbkdf2::pbkdf2_hmac::<Sha512>(password, salt, iterations, &mut out)
            }
        }
        out
    }
}

impl fmt::Display for ScramMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum Conversation {
    NotStarted,
    /// `begin` succeeded; the initial response has not been produced yet
    Ready(ClientFirst),
    AwaitingServerFirst(ClientFirst),
    AwaitingServerFinal { server_signature: Vec<u8> },
    Done,
    Failed,
}

struct ClientFirst {
    gs2_header: String,
    bare: String,
    nonce: String,
}

/// One SCRAM exchange. Create a new one per connection attempt.
pub struct ScramClient {
    mechanism: ScramMechanism,
    password: Option<SecretString>,
    nonce_override: Option<String>,
    state: Conversation,
}

impl ScramClient {
    pub fn new(mechanism: ScramMechanism) -> Self {
        Self {
            mechanism,
            password: None,
            nonce_override: None,
            state: Conversation::NotStarted,
        }
    }

    /// Create with a fixed client nonce (for testing)
    #[cfg(test)]
    pub(crate) fn with_nonce(mechanism: ScramMechanism, nonce: &str) -> Self {
        Self {
            nonce_override: Some(nonce.to_string()),
            ..Self::new(mechanism)
        }
    }

    fn generate_nonce() -> String {
        use rand::RngCore;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        BASE64.encode(nonce_bytes)
    }

    /// Escape '=' and ',' per RFC 5802 saslname rules
    fn escape(name: &str) -> String {
        name.replace('=', "=3D").replace(',', "=2C")
    }

    fn client_final(&mut self, first: &ClientFirst, server_first: &[u8]) -> Result<Vec<u8>, AuthError> {
        let server_first = std::str::from_utf8(server_first)
            .map_err(|e| AuthError::MalformedChallenge(e.to_string()))?;
        let (nonce, salt, iterations) = parse_server_first(server_first)?;

        if !nonce.starts_with(&first.nonce) || nonce.len() <= first.nonce.len() {
            return Err(AuthError::MalformedChallenge(
                "server nonce does not extend client nonce".to_string(),
            ));
        }

        let password = self
            .password
            .as_ref()
            .ok_or(AuthError::SequenceViolation("credentials missing"))?;
        let salted = self.mechanism.salted_password(
            password.expose_secret().as_bytes(),
            &salt,
            iterations,
        );

        let without_proof = format!("c={},r={}", BASE64.encode(&first.gs2_header), nonce);
        let auth_message = format!("{},{},{}", first.bare, server_first, without_proof);

        let client_key = self.mechanism.hmac(&salted, b"Client Key");
        let stored_key = self.mechanism.hash(&client_key);
        let client_signature = self.mechanism.hmac(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = self.mechanism.hmac(&salted, b"Server Key");
        let server_signature = self.mechanism.hmac(&server_key, auth_message.as_bytes());
        self.state = Conversation::AwaitingServerFinal { server_signature };

        Ok(format!("{},p={}", without_proof, BASE64.encode(proof)).into_bytes())
    }

    fn verify_server_final(expected: &[u8], server_final: &[u8]) -> Result<(), AuthError> {
        let server_final = std::str::from_utf8(server_final)
            .map_err(|e| AuthError::MalformedChallenge(e.to_string()))?;

        if let Some(reason) = server_final.strip_prefix("e=") {
            return Err(AuthError::ServerRejected(reason.to_string()));
        }
        let Some(signature_b64) = server_final.strip_prefix("v=") else {
            return Err(AuthError::SequenceViolation("expected server-final message"));
        };
        let signature = BASE64
            .decode(signature_b64)
            .map_err(|_| AuthError::ServerProofInvalid)?;

        if constant_time_eq(&signature, expected) {
            Ok(())
        } else {
            Err(AuthError::ServerProofInvalid)
        }
    }
}

impl Authenticator for ScramClient {
    fn mechanism(&self) -> &'static str {
        self.mechanism.name()
    }

    fn begin(
        &mut self,
        identity: &str,
        secret: &str,
        authorization_id: &str,
    ) -> Result<(), AuthError> {
        if !matches!(self.state, Conversation::NotStarted) {
            return Err(AuthError::SequenceViolation("exchange already started"));
        }
        if identity.is_empty() || secret.is_empty() {
            return Err(AuthError::InvalidCredential);
        }

        let nonce = self
            .nonce_override
            .take()
            .unwrap_or_else(Self::generate_nonce);
        let gs2_header = if authorization_id.is_empty() {
            "n,,".to_string()
        } else {
            format!("n,a={},", Self::escape(authorization_id))
        };
        let bare = format!("n={},r={}", Self::escape(identity), nonce);

        self.password = Some(SecretString::new(secret.into()));
        self.state = Conversation::Ready(ClientFirst {
            gs2_header,
            bare,
            nonce,
        });
        Ok(())
    }

    fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>, AuthError> {
        match std::mem::replace(&mut self.state, Conversation::Failed) {
            Conversation::NotStarted => {
                self.state = Conversation::NotStarted;
                Err(AuthError::SequenceViolation("step before begin"))
            }
            Conversation::Done => {
                self.state = Conversation::Done;
                Err(AuthError::SequenceViolation("exchange already complete"))
            }
            Conversation::Failed => Err(AuthError::SequenceViolation("exchange failed")),
            Conversation::Ready(first) => {
                if !challenge.is_empty() {
                    return Err(AuthError::SequenceViolation(
                        "initial step expects an empty challenge",
                    ));
                }
                let message = format!("{}{}", first.gs2_header, first.bare).into_bytes();
                self.state = Conversation::AwaitingServerFirst(first);
                Ok(message)
            }
            Conversation::AwaitingServerFirst(first) => {
                if challenge.is_empty() {
                    return Err(AuthError::SequenceViolation("expected server-first message"));
                }
                // client_final sets the next state on success; on error the
                // conversation stays failed.
                self.client_final(&first, challenge)
            }
            Conversation::AwaitingServerFinal { server_signature } => {
                Self::verify_server_final(&server_signature, challenge)?;
                self.password = None;
                self.state = Conversation::Done;
                Ok(Vec::new())
            }
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.state, Conversation::Done)
    }
}

impl fmt::Debug for ScramClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            Conversation::NotStarted => "not-started",
            Conversation::Ready(_)
            | Conversation::AwaitingServerFirst(_)
            | Conversation::AwaitingServerFinal { .. } => "in-progress",
            Conversation::Done => "done",
            Conversation::Failed => "failed",
        };
        f.debug_struct("ScramClient")
            .field("mechanism", &self.mechanism)
            .field("password", &"[REDACTED]")
            .field("state", &state)
            .finish()
    }
}

/// Parse `r=<nonce>,s=<salt>,i=<iterations>`
fn parse_server_first(msg: &str) -> Result<(String, Vec<u8>, u32), AuthError> {
    let mut nonce = None;
    let mut salt = None;
    let mut iterations = None;

    for part in msg.split(',') {
        if let Some(value) = part.strip_prefix("r=") {
            nonce = Some(value.to_string());
        } else if let Some(value) = part.strip_prefix("s=") {
            salt = Some(
                BASE64
                    .decode(value)
                    .map_err(|e| AuthError::MalformedChallenge(format!("salt: {e}")))?,
            );
        } else if let Some(value) = part.strip_prefix("i=") {
            iterations = Some(
                value
                    .parse::<u32>()
                    .map_err(|e| AuthError::MalformedChallenge(format!("iterations: {e}")))?,
            );
        } else if part.starts_with("m=") {
            return Err(AuthError::MalformedChallenge(
                "unsupported mandatory extension".to_string(),
            ));
        }
    }

    let nonce = nonce.ok_or_else(|| AuthError::MalformedChallenge("missing nonce".into()))?;
    let salt = salt.ok_or_else(|| AuthError::MalformedChallenge("missing salt".into()))?;
    let iterations = match iterations {
        Some(0) | None => {
            return Err(AuthError::MalformedChallenge(
                "missing iteration count".into(),
            ))
        }
        Some(i) => i,
    };

    Ok((nonce, salt, iterations))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    const SALT: &[u8] = b"sluice-test-salt";
    const ITERATIONS: u32 = 4096;

    /// Server side of the exchange, computed from the same primitives.
    #[derive(Debug)]
    pub(crate) struct ScriptedServer {
        mechanism: ScramMechanism,
        password: String,
        server_nonce: String,
        client_first_bare: Option<String>,
        server_first: Option<String>,
    }

    impl ScriptedServer {
        pub(crate) fn new(mechanism: ScramMechanism, password: &str) -> Self {
            Self {
                mechanism,
                password: password.to_string(),
                server_nonce: "3rfcNHYJY1ZVvWVs7j".to_string(),
                client_first_bare: None,
                server_first: None,
            }
        }

        pub(crate) fn server_first(&mut self, client_first: &[u8]) -> Vec<u8> {
            let client_first = String::from_utf8(client_first.to_vec()).unwrap();
            let bare = client_first.splitn(3, ',').nth(2).unwrap().to_string();
            let client_nonce = bare.split(",r=").nth(1).unwrap();
            let msg = format!(
                "r={}{},s={},i={}",
                client_nonce,
                self.server_nonce,
                BASE64.encode(SALT),
                ITERATIONS
            );
            self.client_first_bare = Some(bare);
            self.server_first = Some(msg.clone());
            msg.into_bytes()
        }

        pub(crate) fn server_final(&self, client_final: &[u8]) -> Vec<u8> {
            let client_final = String::from_utf8(client_final.to_vec()).unwrap();
            let (without_proof, proof_b64) = client_final.rsplit_once(",p=").unwrap();
            let auth_message = format!(
                "{},{},{}",
                self.client_first_bare.as_ref().unwrap(),
                self.server_first.as_ref().unwrap(),
                without_proof
            );

            let salted = self
                .mechanism
                .salted_password(self.password.as_bytes(), SALT, ITERATIONS);
            let client_key = self.mechanism.hmac(&salted, b"Client Key");
            let stored_key = self.mechanism.hash(&client_key);
            let client_signature = self.mechanism.hmac(&stored_key, auth_message.as_bytes());
            let proof = BASE64.decode(proof_b64).unwrap();
            let recovered: Vec<u8> = proof
                .iter()
                .zip(client_signature.iter())
                .map(|(p, s)| p ^ s)
                .collect();
            if self.mechanism.hash(&recovered) != stored_key {
                return b"e=invalid-proof".to_vec();
            }

            let server_key = self.mechanism.hmac(&salted, b"Server Key");
            let signature = self.mechanism.hmac(&server_key, auth_message.as_bytes());
            format!("v={}", BASE64.encode(signature)).into_bytes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedServer;
    use super::*;

    fn run_exchange(mechanism: ScramMechanism) {
        let mut client = ScramClient::with_nonce(mechanism, "fyko+d2lbbFgONRv9qkxdawL");
        let mut server = ScriptedServer::new(mechanism, "pencil");
        client.begin("user", "pencil", "").unwrap();

        let client_first = client.step(b"").unwrap();
        assert_eq!(
            String::from_utf8(client_first.clone()).unwrap(),
            "n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL"
        );

        // One step per server message after the initial response
        let mut server_steps = 0;
        let server_first = server.server_first(&client_first);
        let client_final = client.step(&server_first).unwrap();
        server_steps += 1;
        assert!(!client.is_done());

        let server_final = server.server_final(&client_final);
        let last = client.step(&server_final).unwrap();
        server_steps += 1;

        assert!(last.is_empty());
        assert!(client.is_done());
        assert_eq!(server_steps, 2);
        assert_eq!(
            client.step(&server_final),
            Err(AuthError::SequenceViolation("exchange already complete"))
        );
        assert!(client.is_done());
    }

    #[test]
    fn test_full_exchange_sha256() {
        run_exchange(ScramMechanism::Sha256);
    }

    #[test]
    fn test_full_exchange_sha512() {
        run_exchange(ScramMechanism::Sha512);
    }

    #[test]
    fn test_invalid_server_proof() {
        let mut client = ScramClient::with_nonce(ScramMechanism::Sha256, "clientnonce");
        let mut server = ScriptedServer::new(ScramMechanism::Sha256, "pencil");
        client.begin("user", "pencil", "").unwrap();

        let client_first = client.step(b"").unwrap();
        let server_first = server.server_first(&client_first);
        client.step(&server_first).unwrap();

        let forged = format!("v={}", BASE64.encode([7u8; 32]));
        assert_eq!(
            client.step(forged.as_bytes()),
            Err(AuthError::ServerProofInvalid)
        );
        assert!(!client.is_done());
        // A failed exchange is terminal.
        assert!(matches!(
            client.step(b""),
            Err(AuthError::SequenceViolation(_))
        ));
    }

    #[test]
    fn test_wrong_password_rejected_by_server() {
        let mut client = ScramClient::with_nonce(ScramMechanism::Sha256, "clientnonce");
        let mut server = ScriptedServer::new(ScramMechanism::Sha256, "pencil");
        client.begin("user", "not-pencil", "").unwrap();

        let server_first = server.server_first(&client.step(b"").unwrap());
        let server_final = server.server_final(&client.step(&server_first).unwrap());

        assert_eq!(
            client.step(&server_final),
            Err(AuthError::ServerRejected("invalid-proof".to_string()))
        );
    }

    #[test]
    fn test_replayed_challenge_is_sequence_violation() {
        let mut client = ScramClient::with_nonce(ScramMechanism::Sha256, "clientnonce");
        let mut server = ScriptedServer::new(ScramMechanism::Sha256, "pencil");
        client.begin("user", "pencil", "").unwrap();

        let server_first = server.server_first(&client.step(b"").unwrap());
        client.step(&server_first).unwrap();
        assert!(matches!(
            client.step(&server_first),
            Err(AuthError::SequenceViolation(_))
        ));
    }

    #[test]
    fn test_empty_initial_step_twice() {
        let mut client = ScramClient::new(ScramMechanism::Sha256);
        client.begin("user", "pencil", "").unwrap();
        client.step(b"").unwrap();
        assert!(matches!(
            client.step(b""),
            Err(AuthError::SequenceViolation(_))
        ));
    }

    #[test]
    fn test_step_before_begin() {
        let mut client = ScramClient::new(ScramMechanism::Sha512);
        assert_eq!(
            client.step(b""),
            Err(AuthError::SequenceViolation("step before begin"))
        );
    }

    #[test]
    fn test_begin_rejects_empty_credentials() {
        let mut client = ScramClient::new(ScramMechanism::Sha256);
        assert_eq!(
            client.begin("", "secret", ""),
            Err(AuthError::InvalidCredential)
        );
        assert_eq!(client.begin("user", "", ""), Err(AuthError::InvalidCredential));
        assert!(client.begin("user", "secret", "").is_ok());
        assert!(matches!(
            client.begin("user", "secret", ""),
            Err(AuthError::SequenceViolation(_))
        ));
    }

    #[test]
    fn test_authorization_id_and_escaping() {
        let mut client = ScramClient::with_nonce(ScramMechanism::Sha256, "abc");
        client.begin("user=name,x", "pw", "admin").unwrap();
        let first = String::from_utf8(client.step(b"").unwrap()).unwrap();
        assert_eq!(first, "n,a=admin,n=user=3Dname=2Cx,r=abc");
    }

    #[test]
    fn test_server_nonce_must_extend_client_nonce() {
        let mut client = ScramClient::with_nonce(ScramMechanism::Sha256, "clientnonce");
        client.begin("user", "pencil", "").unwrap();
        client.step(b"").unwrap();

        let result = client.step(b"r=othernonce,s=c2FsdA==,i=4096");
        assert!(matches!(result, Err(AuthError::MalformedChallenge(_))));
    }

    #[test]
    fn test_parse_server_first() {
        let (nonce, salt, iterations) =
            parse_server_first("r=clientnonce+servernonce,s=c2FsdA==,i=4096").unwrap();
        assert_eq!(nonce, "clientnonce+servernonce");
        assert_eq!(salt, b"salt");
        assert_eq!(iterations, 4096);

        assert!(parse_server_first("s=c2FsdA==,i=4096").is_err());
        assert!(parse_server_first("r=n,s=c2FsdA==,i=0").is_err());
        assert!(parse_server_first("m=ext,r=n,s=c2FsdA==,i=1").is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut client = ScramClient::new(ScramMechanism::Sha256);
        client.begin("user", "secret_password", "").unwrap();
        let debug = format!("{:?}", client);

        assert!(!debug.contains("secret_password"));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("in-progress"));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
    }
}
