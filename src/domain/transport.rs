// src/domain/transport.rs

//! Transport domain abstractions.
//!
//! This module defines the domain-level transport interface consumed by the
//! RPC client. It intentionally avoids any reference to concrete protocols,
//! brokers, or client libraries.
//!
//! The transport layer is responsible only for accepting published bytes
//! and delivering opaque inbound payloads to an attached subscription.
//! Higher-level semantics such as correlation, timeouts, or shutdown are
//! handled elsewhere.
//!
//! The contract assumes at-least-once delivery with explicit per-message
//! acknowledgment: the broker may redeliver a payload until its [`Acker`]
//! is invoked. Publishing is decoupled from consumer delivery; `publish`
//! returning `Ok` means the broker durably accepted the message, not that
//! any consumer saw it.
//!
//! Concrete implementations of this interface live under `src/transport/`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::Result;

/// A named destination for published requests and inbound results.
///
/// Interpretation is transport-specific (queue name, topic path). The
/// domain layer makes no assumptions about syntax or hierarchy.
///
/// Topics are immutable, cheap to clone, and safe to share across threads.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Topic(pub Arc<str>);

impl<T> From<T> for Topic
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        Topic(value.into())
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A durable subscription identifier.
///
/// Attaching the same name twice must be idempotent at the transport
/// level: the second attach joins the existing subscription rather than
/// failing or creating a second one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionName(pub Arc<str>);

impl<T> From<T> for SubscriptionName
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        // ---
        SubscriptionName(value.into())
    }
}

impl std::fmt::Display for SubscriptionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Acknowledgment handle for a single delivery.
///
/// Must be invoked to suppress broker redelivery. Acking is terminal:
/// there is no nack/requeue in this contract, the consumer's policy is to
/// treat every received message as handled.
#[async_trait::async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<()>;
}

/// One inbound message handed to the consumer.
pub struct Delivery {
    /// Opaque payload bytes. Interpretation belongs to the protocol layer.
    pub payload: Bytes,
    /// Handle that suppresses redelivery of this message once invoked.
    pub acker: Arc<dyn Acker>,
}

/// Handle returned from a successful subscription attach.
///
/// The subscription remains active until either the handle is dropped
/// (receiver channel closes) or the transport is closed.
pub struct SubscriptionHandle {
    // ---
    /// Receiver channel for deliveries on this subscription.
    pub inbox: mpsc::Receiver<Delivery>,
}

/// Transport abstraction.
///
/// A `Transport` provides at-least-once delivery of opaque payloads from
/// publishers to attached subscriptions, with stronger semantics provided
/// by higher layers. It defines the minimal contract required by the RPC
/// client without committing to any specific protocol or broker.
///
/// Implementations must ensure that:
/// - `attach_subscription()` is idempotent for a given subscription name.
/// - Once `attach_subscription()` returns successfully, messages published
///   *after* that point to the topic are deliverable.
/// - `publish()` returns only after the broker durably accepted the
///   message; acceptance is independent of consumer delivery.
/// - An unacknowledged delivery may be redelivered.
///
/// The in-memory transport serves as the reference implementation of these
/// semantics.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show
/// explicit lifetimes and a boxed `Future`. This is an implementation
/// detail — consumers should treat methods as normal `async fn`s.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Attach to (or idempotently create) a subscription on `topic`.
    ///
    /// `ack_deadline` is the broker-side redelivery deadline for
    /// unacknowledged messages; transports without a per-message deadline
    /// concept may ignore it.
    async fn attach_subscription(
        &self,
        topic: &Topic,
        subscription: &SubscriptionName,
        ack_deadline: Duration,
    ) -> Result<SubscriptionHandle>;

    /// Publish a payload, returning once the broker durably accepted it.
    async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<()>;

    /// Close the transport and release any associated resources.
    async fn close(&self) -> Result<()>;
}

/// Shared transport pointer.
///
/// This is an `Arc<dyn Transport>`, which means:
/// - `.clone()` is cheap (only increments a reference count)
/// - Multiple clones share the same underlying connection
/// - Used to erase concrete transport types behind a stable domain interface.
pub type TransportPtr = Arc<dyn Transport>;
