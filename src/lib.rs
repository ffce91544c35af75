//! Correlated request/response semantics over fire-and-forget pub/sub.
//!
//! This library turns a publish/subscribe transport into an RPC-like
//! abstraction usable by a synchronous caller. It mints correlation IDs,
//! publishes encoded requests, runs a background listener that
//! demultiplexes inbound result messages, and lets callers block with a
//! timeout for a specific correlated result.
//!
//! The transport is assumed to provide at-least-once delivery with
//! explicit per-message acknowledgment; the client tolerates duplicates,
//! malformed payloads, and results it never asked for.

// Import all sub modules once...
mod client;
mod domain;
mod registry;
mod transport;

mod rpc_config;

mod correlation;
mod error;
mod protocol;

// Re-export main types
pub use client::{LifecycleState, RpcClient, StatsSnapshot};

pub use rpc_config::RpcConfig;

pub use correlation::CorrelationId;
pub use error::{Result, RpcError};

pub use protocol::{RequestMessage, ResultMessage};

pub use transport::{create_memory_transport, create_memory_transport_with_hub, MemoryHub};

#[cfg(feature = "transport_lapin")]
pub use transport::create_lapin_transport;

// --- public re-exports
pub use domain::{
    //
    Acker,
    Delivery,
    SubscriptionHandle,
    SubscriptionName,
    Topic,
    Transport,
    TransportPtr,
};

/// Create the transport selected by the config and enabled features.
///
/// With `transport_lapin` enabled and a `transport_uri` configured, this
/// connects to the AMQP broker; otherwise it falls back to the in-memory
/// transport.
pub async fn create_transport(config: &RpcConfig) -> Result<TransportPtr> {
    // ---
    #[cfg(feature = "transport_lapin")]
    {
        if config.transport_uri.is_some() {
            return create_lapin_transport(config).await;
        }
    }

    // Fallback / default
    create_memory_transport(config).await
}
