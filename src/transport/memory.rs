//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It is intended primarily for testing, local execution,
//! and as a reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! The in-memory transport defines the **reference behavior** for the
//! transport layer. All other transport implementations are expected to
//! approximate this behavior as closely as their underlying systems allow
//! and to document any unavoidable deviations.
//!
//! In particular, the in-memory transport establishes the following
//! expectations:
//!
//! - `attach_subscription()` is idempotent per subscription name.
//! - Once `attach_subscription()` returns successfully, payloads published
//!   *after* that point to the topic are deliverable.
//! - `publish()` returns only after the payload is enqueued to every
//!   attached subscriber (the in-process stand-in for durable acceptance).
//! - Topic matching is exact string equality.
//!
//! ## Non-Goals
//!
//! This transport does not attempt to emulate the failure modes,
//! persistence, or redelivery timing of any specific broker. It records
//! acknowledgments (see [`MemoryHub::acked_count`]) so tests can assert
//! the consumer's always-ack policy, but it never actually redelivers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::{
    // ---
    Acker,
    Delivery,
    Result,
    RpcConfig,
    RpcError,
    SubscriptionHandle,
    SubscriptionName,
    Topic,
    Transport,
    TransportPtr,
};

/// Shared message bus for the in-memory transport.
///
/// Simulates a message broker within a single process. All transports that
/// share a `MemoryHub` can publish into and consume from each other's
/// topics, exactly as clients connected to a real broker would.
///
/// # Usage in Integration Tests
///
/// For integration tests that need isolation between parallel test cases,
/// construct a hub explicitly and pass it to
/// [`create_memory_transport_with_hub`]:
///
/// ```
/// # use pubsub_rpc::{MemoryHub, RpcConfig};
/// # async fn example() -> pubsub_rpc::Result<()> {
/// let hub = MemoryHub::new();
/// let config = RpcConfig::new("jobs", "jobs-sub", "client-1");
/// let transport = pubsub_rpc::create_memory_transport_with_hub(&config, hub.clone()).await?;
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    inner: RwLock<HubInner>,
    acked: Arc<AtomicU64>,
}

#[derive(Default)]
struct HubInner {
    /// Topic → subscriber inbox senders.
    subscribers: HashMap<Topic, Vec<mpsc::Sender<Delivery>>>,
    /// Subscription name → topic, for idempotent attach.
    attached: HashMap<SubscriptionName, Topic>,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self::default())
    }

    /// Number of deliveries acknowledged by consumers on this hub.
    ///
    /// Lets tests assert the always-ack policy: malformed and unknown
    /// payloads must be acked just like resolved ones.
    pub fn acked_count(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    async fn publish(&self, _client_id: &str, topic: &Topic, payload: Bytes) -> Result<()> {
        // ---
        let inner = self.inner.read().await;

        if let Some(senders) = inner.subscribers.get(topic) {
            debug!("{_client_id}: publish to {topic}");

            for sender in senders {
                let delivery = Delivery {
                    payload: payload.clone(),
                    acker: Arc::new(MemoryAcker {
                        acked: self.acked.clone(),
                    }),
                };

                // Ignore send failures; a closed channel indicates a
                // dropped SubscriptionHandle.
                if let Err(_err) = sender.send(delivery).await {
                    debug!("publish to dropped subscription: {_err:?}");
                }
            }
        }

        Ok(())
    }

    async fn attach(
        &self,
        _client_id: &str,
        topic: &Topic,
        subscription: &SubscriptionName,
    ) -> Result<SubscriptionHandle> {
        // ---
        debug!("{_client_id}: attach {subscription} to {topic}");

        let mut inner = self.inner.write().await;

        match inner.attached.get(subscription) {
            Some(existing) if existing != topic => {
                return Err(RpcError::Transport(format!(
                    "subscription {subscription} already attached to topic {existing}"
                )));
            }
            _ => {
                inner
                    .attached
                    .insert(subscription.clone(), topic.clone());
            }
        }

        let (tx, rx) = mpsc::channel(16);
        inner
            .subscribers
            .entry(topic.clone())
            .or_default()
            .push(tx);

        Ok(SubscriptionHandle { inbox: rx })
    }

    async fn close(&self, _client_id: &str) -> Result<()> {
        // ---
        debug!("{_client_id}: closing transport...");

        let mut inner = self.inner.write().await;
        inner.subscribers.clear();
        inner.attached.clear();
        Ok(())
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            inner: RwLock::new(HubInner::default()),
            acked: Arc::new(AtomicU64::new(0)),
        }
    }
}

struct MemoryAcker {
    acked: Arc<AtomicU64>,
}

#[async_trait::async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        // ---
        self.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Process-global hub used by [`create_memory_transport`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport.
///
/// Routes payloads through a shared [`MemoryHub`], simulating a message
/// broker within the process.
struct MemoryTransport {
    // ---
    client_id: String,
    hub: Arc<MemoryHub>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    /// Attach a subscription on the shared hub.
    ///
    /// Idempotent per subscription name; re-attaching the same name to a
    /// different topic is an error. The hub has no redelivery timer, so
    /// `ack_deadline` is accepted and unused.
    async fn attach_subscription(
        &self,
        topic: &Topic,
        subscription: &SubscriptionName,
        _ack_deadline: Duration,
    ) -> Result<SubscriptionHandle> {
        self.hub.attach(&self.client_id, topic, subscription).await
    }

    /// Publish a payload to all subscribers of `topic` on the shared hub.
    ///
    /// Matching semantics are intentionally simple: exact string equality.
    /// This behavior defines the reference matching semantics for the
    /// transport layer.
    async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<()> {
        self.hub.publish(&self.client_id, topic, payload).await
    }

    /// Close the transport.
    ///
    /// Clears all subscriptions from the shared hub. Note that if other
    /// transports share the same hub, their subscriptions are also
    /// cleared. Use per-test hubs via [`create_memory_transport_with_hub`]
    /// to avoid this.
    async fn close(&self) -> Result<()> {
        self.hub.close(&self.client_id).await
    }
}

/// Create a new in-memory transport using the process-global hub.
///
/// All transports created with this function share a single message bus,
/// matching the semantics of clients connected to a real broker. Suitable
/// for single-process deployments and simple single-test scenarios.
///
/// For isolated parallel testing, use [`create_memory_transport_with_hub`].
///
/// # Errors
///
/// Currently infallible — always returns `Ok`.
pub async fn create_memory_transport(config: &RpcConfig) -> Result<TransportPtr> {
    // ---
    create_memory_transport_with_hub(config, global_hub()).await
}

/// Create a new in-memory transport using the provided hub.
///
/// Allows multiple transports to share an explicitly constructed
/// [`MemoryHub`], providing isolation between test cases running in
/// parallel.
///
/// # Errors
///
/// Currently infallible — always returns `Ok`.
pub async fn create_memory_transport_with_hub(
    config: &RpcConfig,
    hub: Arc<MemoryHub>,
) -> Result<TransportPtr> {
    // ---
    debug!("{}: create memory transport", config.client_id);

    Ok(Arc::new(MemoryTransport {
        client_id: config.client_id.clone(),
        hub,
    }))
}
