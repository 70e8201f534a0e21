//! SASL authentication providers.

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use std::sync::Arc;

/// A SASL mechanism implementation.
///
/// The pool drives the exchange on every fresh socket: the initial
/// response first, then `step` per server challenge until the server
/// reports authenticated.
pub trait AuthProvider: Send + Sync {
    /// Mechanism name as advertised by the server, e.g. "PLAIN".
    fn mechanism(&self) -> &str;

    /// The client-first initial response.
    fn initial(&self) -> Vec<u8>;

    /// Answer a server challenge.
    fn step(&self, challenge: &[u8]) -> Vec<u8>;
}

/// SASL PLAIN: `authzid \0 authcid \0 password` in a single message.
pub struct PlainAuth {
    zone: String,
    user_name: String,
    password: String,
}

impl PlainAuth {
    pub fn new(
        zone: impl Into<String>,
        user_name: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            zone: zone.into(),
            user_name: user_name.into(),
            password: password.into(),
        }
    }

    fn message(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.zone.len() + self.user_name.len() + self.password.len() + 2,
        );
        out.extend_from_slice(self.zone.as_bytes());
        out.push(0);
        out.extend_from_slice(self.user_name.as_bytes());
        out.push(0);
        out.extend_from_slice(self.password.as_bytes());
        out
    }
}

impl AuthProvider for PlainAuth {
    fn mechanism(&self) -> &str {
        "PLAIN"
    }

    fn initial(&self) -> Vec<u8> {
        self.message()
    }

    fn step(&self, _challenge: &[u8]) -> Vec<u8> {
        // PLAIN is single-shot; a challenge just gets the same message.
        self.message()
    }
}

/// Build a provider from configuration.
pub(crate) fn make_provider(config: &AuthConfig) -> Result<Arc<dyn AuthProvider>> {
    match config.mechanism.to_ascii_uppercase().as_str() {
        "PLAIN" => Ok(Arc::new(PlainAuth::new(
            config.parameter("zone"),
            config.parameter("user_name"),
            config.parameter("password"),
        ))),
        other => Err(Error::Config(format!("unsupported SASL mechanism {other:?}"))),
    }
}
