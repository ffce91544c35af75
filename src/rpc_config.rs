//! Public, transport-agnostic RPC client configuration.
//!
//! This type intentionally contains no transport-specific concepts
//! (e.g. AMQP channel options). Transport layers are responsible for
//! interpreting this config into concrete connection settings.

use std::time::Duration;

use crate::{Result, RpcError};

/// Client configuration and connection parameters.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    // ---
    /// Transport connection URI.
    ///
    /// For broker-based transports this specifies the broker address
    /// (e.g., "amqp://localhost:5672/%2f"). `None` selects the in-memory
    /// transport.
    pub transport_uri: Option<String>,

    /// Unique identifier for this client instance, used for logging and
    /// transport identities.
    pub client_id: String,

    /// Topic to which outbound requests are published.
    pub topic: String,

    /// Topic the listener consumes results from.
    ///
    /// If `None`, defaults to `topic` — the original deployment shape,
    /// where requests and results share one topic. Self-traffic is
    /// harmless: a request payload fails the result parse and is
    /// discarded.
    pub result_topic: Option<String>,

    /// Durable subscription name attached by the listener.
    pub subscription: String,

    /// Broker-side redelivery deadline for unacknowledged deliveries.
    ///
    /// Default: 20 seconds.
    pub ack_deadline: Duration,

    /// Timeout used by [`request()`](crate::RpcClient::request) for its
    /// internal wait.
    ///
    /// Default: 30 seconds.
    pub request_timeout: Duration,

    /// Optional TTL for correlation state.
    ///
    /// `None` (the default) keeps the baseline behavior: a resolved value
    /// is cached for the client's lifetime and repeated waits on the same
    /// id keep returning it. When set, a background sweep evicts resolved
    /// values, unclaimed issued marks, and abandoned pending entries older
    /// than the TTL; entries with a live waiter are never evicted.
    pub entry_ttl: Option<Duration>,
}

impl RpcConfig {
    /// Create a config for the in-memory transport (no broker).
    pub fn new(
        topic: impl Into<String>,
        subscription: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        // ---
        Self {
            transport_uri: None,
            client_id: client_id.into(),
            topic: topic.into(),
            result_topic: None,
            subscription: subscription.into(),
            ack_deadline: Duration::from_secs(20),
            request_timeout: Duration::from_secs(30),
            entry_ttl: None,
        }
    }

    /// Create a config with the given broker URI.
    pub fn with_broker(
        transport_uri: impl Into<String>,
        topic: impl Into<String>,
        subscription: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        // ---
        let mut config = Self::new(topic, subscription, client_id);
        config.transport_uri = Some(transport_uri.into());
        config
    }

    /// Build a config from environment variables.
    ///
    /// Reads `PUBSUB_RPC_TOPIC`, `PUBSUB_RPC_SUBSCRIPTION`,
    /// `PUBSUB_RPC_CLIENT_ID` (required) and `PUBSUB_RPC_URI` (optional;
    /// absent selects the in-memory transport).
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::MissingConfig`] naming the first missing
    /// required variable.
    pub fn from_env() -> Result<Self> {
        // ---
        let require = |name: &str| {
            std::env::var(name).map_err(|_| RpcError::MissingConfig(name.to_string()))
        };

        let topic = require("PUBSUB_RPC_TOPIC")?;
        let subscription = require("PUBSUB_RPC_SUBSCRIPTION")?;
        let client_id = require("PUBSUB_RPC_CLIENT_ID")?;

        let mut config = Self::new(topic, subscription, client_id);
        config.transport_uri = std::env::var("PUBSUB_RPC_URI").ok();
        Ok(config)
    }

    /// Set a separate topic for inbound results.
    pub fn with_result_topic(mut self, topic: impl Into<String>) -> Self {
        self.result_topic = Some(topic.into());
        self
    }

    /// Set the broker acknowledgment deadline.
    pub fn with_ack_deadline(mut self, deadline: Duration) -> Self {
        self.ack_deadline = deadline;
        self
    }

    /// Set the timeout used by `request()`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Enable TTL-based eviction of correlation state.
    ///
    /// Note that this trades the "repeated wait returns the cached value"
    /// property for bounded memory over long uptimes.
    pub fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = Some(ttl);
        self
    }

    /// Effective topic the listener consumes from.
    pub fn effective_result_topic(&self) -> &str {
        self.result_topic.as_deref().unwrap_or(&self.topic)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_result_topic_defaults_to_request_topic() {
        // ---
        let config = RpcConfig::new("jobs", "jobs-sub", "client-1");
        assert_eq!(config.effective_result_topic(), "jobs");

        let config = config.with_result_topic("results");
        assert_eq!(config.effective_result_topic(), "results");
    }

    #[test]
    fn test_defaults() {
        // ---
        let config = RpcConfig::new("jobs", "jobs-sub", "client-1");
        assert_eq!(config.ack_deadline, Duration::from_secs(20));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.entry_ttl.is_none());
        assert!(config.transport_uri.is_none());
    }
}
