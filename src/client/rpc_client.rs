use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::client::listener;
use crate::client::stats::{ClientStats, StatsSnapshot};
use crate::protocol::RequestMessage;
use crate::registry::{CorrelationRegistry, WaitHandle};
use crate::{CorrelationId, Result, RpcConfig, RpcError, Topic, TransportPtr};

/// Client lifecycle, forward-only: `Created → Listening → Stopping → Closed`.
///
/// Broadcast to every blocked waiter through a watch channel, so a stop
/// wakes all of them at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Listening,
    Stopping,
    Closed,
}

impl LifecycleState {
    /// True once shutdown has begun; publish and wait fail fast from here.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, LifecycleState::Stopping | LifecycleState::Closed)
    }
}

/// Correlated RPC client over a pub/sub transport.
///
/// Cheap to clone (internally `Arc`-backed). Construct once in the owning
/// service and pass clones to collaborators; there is no global instance.
///
/// # Example
///
/// ```no_run
/// # use pubsub_rpc::{RpcClient, RpcConfig};
/// # use serde_json::json;
/// # use std::time::Duration;
/// # async fn example() -> pubsub_rpc::Result<()> {
/// let config = RpcConfig::new("jobs", "jobs-sub", "api-server");
/// let client = RpcClient::new(&config).await?;
/// client.start().await?;
///
/// let id = client
///     .publish_message("image-search", json!({"image_reference": "gs://bucket/x.jpg"}))
///     .await?;
/// let result = client
///     .wait_for_response(&id, Duration::from_secs(1), true)
///     .await?;
/// println!("label: {}", result["label"]);
///
/// client.stop().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Tasks {
    listener: Option<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

struct Inner {
    // ---
    transport: TransportPtr,
    config: RpcConfig,
    topic: Topic,
    result_topic: Topic,

    /// The only shared mutable state between listener and waiters.
    registry: Arc<CorrelationRegistry>,
    stats: Arc<ClientStats>,

    /// Lifecycle broadcast; waiters subscribe before blocking.
    state_tx: watch::Sender<LifecycleState>,

    /// Background task handles, guarded by an async mutex so start/stop
    /// serialize with each other. Never contended by the data path.
    tasks: tokio::sync::Mutex<Tasks>,
}

impl RpcClient {
    // ---
    /// Create a client with an explicitly provided transport.
    ///
    /// This is the constructor you want for tests and for advanced users.
    /// No subscription is attached and no task is spawned until
    /// [`start()`](Self::start).
    pub fn with_transport(transport: TransportPtr, config: RpcConfig) -> Self {
        // ---
        let (state_tx, _) = watch::channel(LifecycleState::Created);
        let topic = Topic::from(config.topic.clone());
        let result_topic = Topic::from(config.effective_result_topic().to_string());

        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                topic,
                result_topic,
                registry: Arc::new(CorrelationRegistry::new()),
                stats: Arc::new(ClientStats::default()),
                state_tx,
                tasks: tokio::sync::Mutex::new(Tasks::default()),
            }),
        }
    }

    /// Convenience constructor that selects the crate-default transport.
    ///
    /// This calls [`crate::create_transport()`] (feature-driven) and then
    /// constructs the client using [`with_transport()`](Self::with_transport).
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Transport` if transport creation fails (invalid
    /// URI, connection failure, etc.).
    pub async fn new(config: &RpcConfig) -> Result<Self> {
        // ---
        let transport = crate::create_transport(config).await?;
        Ok(Self::with_transport(transport, config.clone()))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.inner.state_tx.borrow()
    }

    /// Snapshot of the client's counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Attach the result subscription and launch the background listener.
    ///
    /// Idempotent while listening: a second call is a no-op. When
    /// `entry_ttl` is configured, also launches the TTL sweeper.
    ///
    /// # Errors
    ///
    /// - `RpcError::Transport` if the subscription cannot be attached
    /// - `RpcError::Closed` if the client was already stopped
    pub async fn start(&self) -> Result<()> {
        // ---
        let mut tasks = self.inner.tasks.lock().await;

        match self.state() {
            LifecycleState::Created => {}
            LifecycleState::Listening => return Ok(()),
            LifecycleState::Stopping | LifecycleState::Closed => return Err(RpcError::Closed),
        }

        let handle = self
            .inner
            .transport
            .attach_subscription(
                &self.inner.result_topic,
                &crate::SubscriptionName::from(self.inner.config.subscription.clone()),
                self.inner.config.ack_deadline,
            )
            .await?;

        tasks.listener = Some(tokio::spawn(listener::run(
            handle,
            self.inner.registry.clone(),
            self.inner.stats.clone(),
            self.inner.state_tx.subscribe(),
        )));

        if let Some(ttl) = self.inner.config.entry_ttl {
            tasks.sweeper = Some(tokio::spawn(run_sweeper(
                ttl,
                self.inner.registry.clone(),
                self.inner.stats.clone(),
                self.inner.state_tx.subscribe(),
            )));
        }

        self.inner.state_tx.send_replace(LifecycleState::Listening);
        info!(
            client_id = %self.inner.config.client_id,
            topic = %self.inner.result_topic,
            "rpc client listening"
        );
        Ok(())
    }

    /// Stop the client.
    ///
    /// Broadcasts shutdown, which terminates the listener after its
    /// current receive cycle and unblocks *every* waiter with
    /// [`RpcError::Stopped`]; then awaits the background tasks and closes
    /// the transport. Idempotent: repeated calls after the first return
    /// `Ok` without effect. A never-started client is closed without ever
    /// listening.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Transport` if closing the transport fails; the
    /// client still transitions to `Closed`.
    pub async fn stop(&self) -> Result<()> {
        // ---
        let mut tasks = self.inner.tasks.lock().await;

        if self.state().is_shutdown() {
            return Ok(());
        }

        self.inner.state_tx.send_replace(LifecycleState::Stopping);
        debug!("stopping rpc client");

        if let Some(listener) = tasks.listener.take() {
            if let Err(err) = listener.await {
                warn!("listener task panicked: {err}");
            }
        }
        if let Some(sweeper) = tasks.sweeper.take() {
            if let Err(err) = sweeper.await {
                warn!("sweeper task panicked: {err}");
            }
        }

        let close_result = self.inner.transport.close().await;

        self.inner.state_tx.send_replace(LifecycleState::Closed);
        info!(client_id = %self.inner.config.client_id, "rpc client closed");

        close_result
    }

    /// Publish a request and return its freshly minted correlation id.
    ///
    /// Returns only after the transport acknowledged durable acceptance of
    /// the message; acceptance is independent of any consumer seeing it.
    /// There is no ordering guarantee between this returning and the
    /// matching result arriving — the two are correlated only by id.
    ///
    /// # Errors
    ///
    /// - `RpcError::Serialization` if `args` cannot be encoded (nothing
    ///   is published)
    /// - `RpcError::Transport` if the broker rejects the publish
    /// - `RpcError::Closed` after shutdown began
    pub async fn publish_message<T: Serialize>(
        &self,
        method: &str,
        args: T,
    ) -> Result<CorrelationId> {
        // ---
        let args = serde_json::to_value(args)?;
        self.publish_request(RequestMessage::new(
            method,
            args,
            CorrelationId::generate().to_string(),
        ))
        .await
    }

    /// Like [`publish_message`](Self::publish_message), with explicit
    /// keyword arguments instead of the wire default (empty string).
    pub async fn publish_message_with_kwargs<T, K>(
        &self,
        method: &str,
        args: T,
        kwargs: K,
    ) -> Result<CorrelationId>
    where
        T: Serialize,
        K: Serialize,
    {
        // ---
        let args = serde_json::to_value(args)?;
        let kwargs = serde_json::to_value(kwargs)?;
        self.publish_request(
            RequestMessage::new(method, args, CorrelationId::generate().to_string())
                .with_kwargs(kwargs),
        )
        .await
    }

    async fn publish_request(&self, message: RequestMessage) -> Result<CorrelationId> {
        // ---
        if self.state().is_shutdown() {
            return Err(RpcError::Closed);
        }

        let bytes = Bytes::from(serde_json::to_vec(&message)?);
        let id = CorrelationId::from(message.message_id);

        // The issued mark is the only publish-time registry effect; real
        // correlation state is created lazily at first wait or first
        // inbound result.
        self.inner.registry.mark_issued(&id);

        if let Err(err) = self.inner.transport.publish(&self.inner.topic, bytes).await {
            self.inner.registry.forget_issued(&id);
            return Err(err);
        }

        self.inner.stats.published.fetch_add(1, Ordering::Relaxed);
        debug!(method = %message.method, correlation_id = %id, "published request");
        Ok(id)
    }

    /// Block until the result for `id` arrives, the timeout elapses, or
    /// the client is stopped.
    ///
    /// If the result already arrived, returns immediately without waiting.
    /// With `delete_after_use` the entry is consumed, so a second wait on
    /// the same id finds nothing and times out; without it, the resolved
    /// value is a durable cache readable by any number of later waits.
    ///
    /// The check for "already resolved" and the registration of the waker
    /// happen atomically under the registry lock, so a result arriving in
    /// between cannot be lost.
    ///
    /// # Errors
    ///
    /// - `RpcError::Timeout` — no matching result within `timeout` (fires
    ///   no earlier than `timeout`)
    /// - `RpcError::Stopped` — the client was stopped while waiting
    /// - `RpcError::Closed` — called after shutdown began
    pub async fn wait_for_response(
        &self,
        id: &CorrelationId,
        timeout: Duration,
        delete_after_use: bool,
    ) -> Result<Value> {
        // ---
        // Subscribe before the fast path: `wait_for` re-checks the current
        // value, so a stop landing between the claim attempt and the
        // select below is still observed.
        let mut state_rx = self.inner.state_tx.subscribe();
        if state_rx.borrow().is_shutdown() {
            return Err(RpcError::Closed);
        }

        let rx = match self
            .inner
            .registry
            .claim_or_subscribe(id, delete_after_use)
        {
            WaitHandle::Ready(value) => return Ok(value),
            WaitHandle::Waiting(rx) => rx,
        };

        tokio::select! {
            received = rx => match received {
                Ok(value) => {
                    if delete_after_use {
                        self.inner.registry.consume(id);
                    }
                    Ok(value)
                }
                // Sender side dropped without resolving: registry torn down.
                Err(_) => Err(RpcError::Stopped),
            },
            _ = time::sleep(timeout) => Err(RpcError::Timeout),
            _ = state_rx.wait_for(|s| s.is_shutdown()) => Err(RpcError::Stopped),
        }
    }

    /// Typed publish+wait convenience.
    ///
    /// Publishes `args` under `method`, waits up to the configured
    /// `request_timeout`, and consumes the entry (`delete_after_use`).
    ///
    /// # Errors
    ///
    /// Everything `publish_message` and `wait_for_response` can return,
    /// plus `RpcError::Serialization` if the result does not deserialize
    /// into `TResp`.
    pub async fn request<TReq, TResp>(&self, method: &str, args: TReq) -> Result<TResp>
    where
        TReq: Serialize,
        TResp: DeserializeOwned,
    {
        // ---
        let id = self.publish_message(method, args).await?;
        let value = self
            .wait_for_response(&id, self.inner.config.request_timeout, true)
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Periodically evict stale correlation state.
///
/// Runs only when `entry_ttl` is configured; exits on shutdown.
async fn run_sweeper(
    ttl: Duration,
    registry: Arc<CorrelationRegistry>,
    stats: Arc<ClientStats>,
    mut state_rx: watch::Receiver<LifecycleState>,
) {
    // ---
    let period = (ttl / 2).max(Duration::from_millis(1));
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let evicted = registry.sweep(ttl);
                if evicted > 0 {
                    stats.evicted.fetch_add(evicted, Ordering::Relaxed);
                    debug!(evicted, "swept stale correlation entries");
                }
            }
            _ = state_rx.wait_for(|s| s.is_shutdown()) => break,
        }
    }
}
