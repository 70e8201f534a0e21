//! Configuration types for the memcached client.

use crate::keys::KeyTransformer;
use crate::protocol::ProtocolKind;
use crate::topology::locator::NodeLocatorFactory;
use crate::types::Endpoint;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Main configuration for the client.
pub struct ClientConfig {
    /// Seed list of server endpoints.
    pub servers: Vec<Endpoint>,

    /// Per-node socket pool settings.
    pub socket_pool: SocketPoolConfig,

    /// Wire dialect spoken to every server.
    pub protocol: ProtocolKind,

    /// Optional SASL authentication (binary dialect only).
    pub authentication: Option<AuthConfig>,

    /// Custom key transformer. Defaults to a validating pass-through.
    pub key_transformer: Option<Arc<dyn KeyTransformer>>,

    /// Custom node locator factory. Defaults to a Ketama ring
    /// (or a trivial locator when a single server is configured).
    pub locator: Option<Arc<dyn NodeLocatorFactory>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            socket_pool: SocketPoolConfig::default(),
            protocol: ProtocolKind::Binary,
            authentication: None,
            key_transformer: None,
            locator: None,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("servers", &self.servers)
            .field("socket_pool", &self.socket_pool)
            .field("protocol", &self.protocol)
            .field("authentication", &self.authentication.is_some())
            .field("key_transformer", &self.key_transformer.is_some())
            .field("locator", &self.locator.is_some())
            .finish()
    }
}

impl ClientConfig {
    /// Create a configuration for the given servers.
    pub fn new(servers: Vec<Endpoint>) -> Self {
        Self {
            servers,
            ..Default::default()
        }
    }

    /// Add a server endpoint.
    pub fn with_server(mut self, endpoint: Endpoint) -> Self {
        self.servers.push(endpoint);
        self
    }

    /// Set socket pool settings.
    pub fn with_socket_pool(mut self, socket_pool: SocketPoolConfig) -> Self {
        self.socket_pool = socket_pool;
        self
    }

    /// Select the wire dialect.
    pub fn with_protocol(mut self, protocol: ProtocolKind) -> Self {
        self.protocol = protocol;
        self
    }

    /// Enable SASL authentication.
    pub fn with_authentication(mut self, auth: AuthConfig) -> Self {
        self.authentication = Some(auth);
        self
    }

    /// Install a custom key transformer.
    pub fn with_key_transformer<T: KeyTransformer + 'static>(mut self, transformer: T) -> Self {
        self.key_transformer = Some(Arc::new(transformer));
        self
    }

    /// Install a custom node locator factory.
    pub fn with_locator<F: NodeLocatorFactory + 'static>(mut self, factory: F) -> Self {
        self.locator = Some(Arc::new(factory));
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.servers.is_empty() {
            return Err("at least one server endpoint is required".to_string());
        }
        self.socket_pool.validate()?;
        if self.authentication.is_some() && self.protocol == ProtocolKind::Text {
            return Err("SASL authentication requires the binary protocol".to_string());
        }
        Ok(())
    }
}

/// Settings for each node's socket pool.
#[derive(Debug, Clone)]
pub struct SocketPoolConfig {
    /// Sockets kept warm per node.
    pub min_pool_size: usize,

    /// Hard cap on concurrent sockets per node.
    pub max_pool_size: usize,

    /// Time allowed for a TCP connect (plus authentication).
    pub connection_timeout: Duration,

    /// Time allowed for each read while waiting on a response.
    pub receive_timeout: Duration,

    /// Time an acquisition waits when the pool is at capacity.
    pub queue_timeout: Duration,

    /// How long a node stays Dead before it is probed again.
    pub dead_timeout: Duration,

    /// Failure policy applied to repeated node failures.
    pub failure_policy: FailurePolicyConfig,
}

impl Default for SocketPoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: 5,
            max_pool_size: 20,
            connection_timeout: Duration::from_secs(10),
            receive_timeout: Duration::from_secs(10),
            queue_timeout: Duration::from_millis(100),
            dead_timeout: Duration::from_secs(10),
            failure_policy: FailurePolicyConfig::default(),
        }
    }
}

impl SocketPoolConfig {
    /// Set pool bounds.
    pub fn with_pool_size(mut self, min: usize, max: usize) -> Self {
        self.min_pool_size = min;
        self.max_pool_size = max;
        self
    }

    /// Set the connect timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the receive timeout.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Set the acquisition queue timeout.
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    /// Set the dead-node timeout.
    pub fn with_dead_timeout(mut self, timeout: Duration) -> Self {
        self.dead_timeout = timeout;
        self
    }

    /// Set the failure policy.
    pub fn with_failure_policy(mut self, policy: FailurePolicyConfig) -> Self {
        self.failure_policy = policy;
        self
    }

    fn validate(&self) -> Result<(), String> {
        if self.max_pool_size == 0 {
            return Err("max_pool_size must be at least 1".to_string());
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(format!(
                "min_pool_size {} exceeds max_pool_size {}",
                self.min_pool_size, self.max_pool_size
            ));
        }
        if let FailurePolicyConfig::Throttling {
            failure_threshold, ..
        } = self.failure_policy
        {
            if failure_threshold == 0 {
                return Err("failure_threshold must be at least 1".to_string());
            }
        }
        Ok(())
    }
}

/// Failure policy selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePolicyConfig {
    /// Never trip a node; every operation retries it.
    None,

    /// Count failures within a sliding window and trip the node when
    /// the threshold is reached.
    Throttling {
        /// Failures within the window that mark the node Dead.
        failure_threshold: u32,
        /// Window after which the counter resets.
        reset_after: Duration,
    },
}

impl Default for FailurePolicyConfig {
    fn default() -> Self {
        Self::Throttling {
            failure_threshold: 5,
            reset_after: Duration::from_secs(10),
        }
    }
}

/// SASL authentication settings.
#[derive(Clone)]
pub struct AuthConfig {
    /// Mechanism name, e.g. "PLAIN".
    pub mechanism: String,

    /// Mechanism parameters. PLAIN reads `zone`, `user_name`, `password`.
    pub parameters: HashMap<String, String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Parameter values stay out of logs.
        f.debug_struct("AuthConfig")
            .field("mechanism", &self.mechanism)
            .field("parameters", &self.parameters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AuthConfig {
    /// PLAIN credentials without an authorization zone.
    pub fn plain(user_name: impl Into<String>, password: impl Into<String>) -> Self {
        let mut parameters = HashMap::new();
        parameters.insert("user_name".to_string(), user_name.into());
        parameters.insert("password".to_string(), password.into());
        Self {
            mechanism: "PLAIN".to_string(),
            parameters,
        }
    }

    /// Set the authorization zone (the authzid of the PLAIN exchange).
    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.parameters.insert("zone".to_string(), zone.into());
        self
    }

    pub(crate) fn parameter(&self, name: &str) -> &str {
        self.parameters.get(name).map(String::as_str).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_binary_with_throttling() {
        let config = ClientConfig::default();
        assert_eq!(config.protocol, ProtocolKind::Binary);
        assert!(matches!(
            config.socket_pool.failure_policy,
            FailurePolicyConfig::Throttling { .. }
        ));
    }

    #[test]
    fn validation_requires_servers() {
        let config = ClientConfig::default();
        assert!(config.validate().is_err());

        let config = config.with_server(Endpoint::new("127.0.0.1", 11211));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_inverted_pool_bounds() {
        let config = ClientConfig::new(vec![Endpoint::new("127.0.0.1", 11211)])
            .with_socket_pool(SocketPoolConfig::default().with_pool_size(8, 4));
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_text_sasl() {
        let config = ClientConfig::new(vec![Endpoint::new("127.0.0.1", 11211)])
            .with_protocol(ProtocolKind::Text)
            .with_authentication(AuthConfig::plain("user", "secret"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn auth_debug_hides_parameter_values() {
        let auth = AuthConfig::plain("user", "hunter2");
        let rendered = format!("{auth:?}");
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn builder_chains() {
        let config = ClientConfig::new(vec![Endpoint::new("cache-a", 11211)])
            .with_server(Endpoint::new("cache-b", 11211))
            .with_protocol(ProtocolKind::Text)
            .with_socket_pool(
                SocketPoolConfig::default()
                    .with_pool_size(1, 4)
                    .with_queue_timeout(Duration::from_millis(250)),
            );
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.socket_pool.max_pool_size, 4);
        assert_eq!(config.socket_pool.queue_timeout, Duration::from_millis(250));
    }
}
