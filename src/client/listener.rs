//! Background listener.
//!
//! A single task consumes the transport's inbound stream, decodes result
//! payloads, and resolves matching registry entries. It is tolerant of
//! anything the wire throws at it: decode and correlate failures are
//! logged, counted, and dropped — they never terminate the loop, never
//! block later deliveries, and never surface to a caller.
//!
//! Every delivery is acknowledged up front, regardless of outcome. The
//! transport is at-least-once, but this consumer treats each received
//! message as terminally handled (poison-message policy); a payload that
//! cannot be parsed now will not parse on redelivery either.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::client::rpc_client::LifecycleState;
use crate::client::stats::ClientStats;
use crate::protocol::ResultMessage;
use crate::registry::{CorrelationRegistry, ResolveOutcome};
use crate::{CorrelationId, Delivery, SubscriptionHandle};

/// Consume deliveries until shutdown is signaled or the transport closes.
///
/// Shutdown is observed between deliveries; an in-flight delivery is never
/// aborted mid-handling.
pub(crate) async fn run(
    mut handle: SubscriptionHandle,
    registry: Arc<CorrelationRegistry>,
    stats: Arc<ClientStats>,
    mut state_rx: watch::Receiver<LifecycleState>,
) {
    // ---
    debug!("listener started");

    loop {
        tokio::select! {
            delivery = handle.inbox.recv() => match delivery {
                Some(delivery) => handle_delivery(delivery, &registry, &stats).await,
                None => {
                    debug!("transport inbox closed, listener exiting");
                    break;
                }
            },
            _ = async { let _ = state_rx.wait_for(|s| s.is_shutdown()).await; } => {
                debug!("shutdown signaled, listener exiting");
                break;
            }
        }
    }
}

async fn handle_delivery(
    delivery: Delivery,
    registry: &CorrelationRegistry,
    stats: &ClientStats,
) {
    // ---
    // Ack first, unconditionally. Whatever happens below, this delivery is
    // terminally handled and must not be redelivered.
    if let Err(err) = delivery.acker.ack().await {
        warn!("failed to ack delivery: {err}");
    }

    if delivery.payload.is_empty() {
        stats.discarded_malformed.fetch_add(1, Ordering::Relaxed);
        debug!("discarding empty payload");
        return;
    }

    let message: ResultMessage = match serde_json::from_slice(&delivery.payload) {
        Ok(message) => message,
        Err(err) => {
            stats.discarded_malformed.fetch_add(1, Ordering::Relaxed);
            debug!("discarding unparseable payload: {err}");
            return;
        }
    };

    let id = CorrelationId::from(message.message_id);
    let value = message.result;

    match registry.resolve(&id, value.clone()) {
        ResolveOutcome::Stored(waiters) => {
            stats.resolved.fetch_add(1, Ordering::Relaxed);
            debug!("resolved correlation_id: {id}");

            // Senders are fired outside the registry lock; resolve() only
            // hands them back. A closed receiver means the waiter already
            // gave up (timeout or stop) and the value stays cached.
            for tx in waiters {
                let _ = tx.send(value.clone());
            }
        }
        ResolveOutcome::Duplicate => {
            stats.discarded_duplicate.fetch_add(1, Ordering::Relaxed);
            debug!("dropping redelivery for correlation_id: {id}");
        }
        ResolveOutcome::Unknown => {
            stats.discarded_unknown.fetch_add(1, Ordering::Relaxed);
            debug!("discarding result for unknown correlation_id: {id}");
        }
    }
}
