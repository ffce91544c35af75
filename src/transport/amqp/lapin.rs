//! AMQP transport implementation using `lapin`.
//!
//! This module provides an implementation of the `Transport` trait backed by
//! an AMQP broker connection. It follows an **actor-based concurrency model**
//! to safely integrate with the underlying AMQP client.
//!
//! ## Concurrency model
//!
//! - A single background **actor task** owns the AMQP connection and channel.
//! - The actor is responsible for:
//!   - publishing outbound messages,
//!   - declaring queues and starting consumers,
//!   - clean shutdown of the connection.
//! - All interaction with the AMQP client is serialized through this actor;
//!   no other task ever touches the connection directly.
//!
//! This design preserves the public `Transport` contract (`Send + Sync`)
//! while respecting the AMQP client's connection semantics.
//!
//! ## Delivery semantics
//!
//! - `publish()` runs with **publisher confirms** enabled and returns only
//!   after the broker confirmed acceptance, satisfying the durable-acceptance
//!   contract of the `Transport` trait.
//! - `attach_subscription()` maps to an idempotent `queue_declare` (durable,
//!   not auto-delete) plus `basic_consume` with **manual acks**: each
//!   [`Delivery`] carries an acker wrapping lapin's, and the broker will
//!   redeliver until the consumer invokes it.
//! - `ack_deadline` is surfaced as the `x-consumer-timeout` queue argument,
//!   the closest AMQP analogue to a per-message acknowledgment deadline.
//!
//! ## Scope and limitations
//!
//! - One transport instance corresponds to a single broker connection.
//! - The transport assumes a small number of active queues and subscribers
//!   (typical RPC-style usage).
//!
//! This module intentionally avoids exposing AMQP-specific concepts
//! (exchanges, routing keys, message properties) outside the transport
//! boundary.

use lapin::{
    //
    options::{
        //
        BasicAckOptions,
        BasicConsumeOptions,
        BasicPublishOptions,
        ConfirmSelectOptions,
        QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable},
    BasicProperties,
    Channel,
    Connection,
    ConnectionProperties,
};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{
    //
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

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        topic: Topic,
        payload: Bytes,
        resp: oneshot::Sender<Result<()>>,
    },
    Attach {
        topic: Topic,
        subscription: SubscriptionName,
        ack_deadline: Duration,
        resp: oneshot::Sender<Result<SubscriptionHandle>>,
    },
    Close {
        resp: oneshot::Sender<Result<()>>,
    },
}

enum ActorStep {
    //
    Cmd(Cmd),
    Closed,
}

/// AMQP transport implementation using lapin.
///
/// Cheap to clone (commands go through a channel to the owning actor) and
/// `Send + Sync` for use across async boundaries.
pub struct AmqpTransport {
    // ---
    cmd_tx: mpsc::Sender<Cmd>,
    actor_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AmqpTransport {
    /// Creates a new AMQP transport with the given connection and channel.
    ///
    /// Spawns a background actor task to handle AMQP operations.
    fn create(client_id: &str, connection: Connection, channel: Channel) -> TransportPtr {
        // ---
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        let actor = Actor {
            client_id: client_id.to_string(),
            connection,
            channel,
            cmd_rx,
            confirms_enabled: false,
            consumer_seq: 0,
            consumer_handles: Vec::new(),
        };

        let handle = tokio::spawn(async move {
            actor.run().await;
        });

        Arc::new(Self {
            cmd_tx,
            actor_task: tokio::sync::Mutex::new(Some(handle)),
        })
    }

    async fn send_cmd<T>(
        &self,
        cmd: Cmd,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        // ---
        self.cmd_tx.send(cmd).await.map_err(|e| {
            let msg = format!("actor command channel closed:{e}");
            RpcError::Transport(msg)
        })?;

        rx.await.map_err(|e| {
            let msg = format!("actor responder channel read failed:{e}");
            RpcError::Transport(msg)
        })?
    }
}

/// Background actor task that owns the AMQP connection and channel.
struct Actor {
    // ---
    client_id: String,
    connection: Connection,
    channel: Channel,
    cmd_rx: mpsc::Receiver<Cmd>,
    confirms_enabled: bool,
    consumer_seq: u64,
    consumer_handles: Vec<JoinHandle<()>>,
}

impl Actor {
    async fn run(mut self) {
        // ---
        info!("[{}] AMQP actor started", self.client_id);

        loop {
            match self.next_step().await {
                ActorStep::Cmd(cmd) => {
                    self.handle_cmd(cmd).await;
                }
                ActorStep::Closed => {
                    info!("[{}] AMQP actor shutting down", self.client_id);
                    break;
                }
            }
        }

        // Clean up consumer tasks
        for handle in self.consumer_handles.drain(..) {
            handle.abort();
        }

        // Close channel and connection
        let _ = self.channel.close(200, "Normal shutdown").await;
        let _ = self.connection.close(200, "Normal shutdown").await;

        info!("[{}] AMQP actor stopped", self.client_id);
    }

    async fn next_step(&mut self) -> ActorStep {
        // ---
        match self.cmd_rx.recv().await {
            Some(cmd) => ActorStep::Cmd(cmd),
            None => ActorStep::Closed,
        }
    }

    async fn handle_cmd(&mut self, cmd: Cmd) {
        // ---
        match cmd {
            Cmd::Publish {
                topic,
                payload,
                resp,
            } => {
                let result = self.do_publish(&topic, payload).await;
                let _ = resp.send(result);
            }
            Cmd::Attach {
                topic,
                subscription,
                ack_deadline,
                resp,
            } => {
                let result = self.do_attach(&topic, &subscription, ack_deadline).await;
                let _ = resp.send(result);
            }
            Cmd::Close { resp } => {
                let _ = resp.send(Ok(()));
                self.cmd_rx.close();
            }
        }
    }

    async fn ensure_confirms(&mut self) -> Result<()> {
        // ---
        if self.confirms_enabled {
            return Ok(());
        }

        self.channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: confirm select failed: {e}")))?;

        self.confirms_enabled = true;
        Ok(())
    }

    async fn do_publish(&mut self, topic: &Topic, payload: Bytes) -> Result<()> {
        // ---
        self.ensure_confirms().await?;

        let queue = topic.0.as_ref();

        let confirm = self
            .channel
            .basic_publish(
                "",    // default exchange
                queue, // routing key = queue name
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2), // persistent
            )
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: publish failed: {e}")))?
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: publish confirm failed: {e}")))?;

        if let Confirmation::Nack(_) = confirm {
            return Err(RpcError::Transport(format!(
                "amqp: broker rejected publish to {queue}"
            )));
        }

        debug!("[{}] Published to queue: {queue}", self.client_id);
        Ok(())
    }

    async fn do_attach(
        &mut self,
        topic: &Topic,
        subscription: &SubscriptionName,
        ack_deadline: Duration,
    ) -> Result<SubscriptionHandle> {
        // ---
        let queue = topic.0.as_ref();

        // Declare queue if not already declared. Durable and not
        // auto-delete: the subscription outlives individual consumers.
        let queue_opts = QueueDeclareOptions {
            passive: false,
            durable: true,
            exclusive: false,
            auto_delete: false,
            nowait: false,
        };

        let mut queue_args = FieldTable::default();
        queue_args.insert(
            "x-consumer-timeout".into(),
            AMQPValue::LongLongInt(ack_deadline.as_millis() as i64),
        );

        self.channel
            .queue_declare(queue, queue_opts, queue_args)
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: queue declare failed: {e}")))?;

        info!("[{}] Declared queue: {queue}", self.client_id);

        // Consumer tags must be unique per channel, so repeated attaches
        // of the same subscription get a sequence suffix.
        self.consumer_seq += 1;
        let consumer_tag = format!("{}-{}", subscription, self.consumer_seq);

        let consumer = self
            .channel
            .basic_consume(
                queue,
                &consumer_tag,
                BasicConsumeOptions::default(), // manual acks
                FieldTable::default(),
            )
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: consume failed: {e}")))?;

        info!("[{}] Started consuming queue: {queue}", self.client_id);

        let (tx, rx) = mpsc::channel(16);

        // Spawn consumer task
        let queue_name = queue.to_string();
        let client_id = self.client_id.clone();

        let handle = tokio::spawn(async move {
            use futures_lite::stream::StreamExt;

            let mut consumer = consumer;
            while let Some(delivery_result) = consumer.next().await {
                match delivery_result {
                    Ok(delivery) => {
                        debug!("[{client_id}] Received message on queue: {queue_name}");

                        let delivery = Delivery {
                            payload: Bytes::from(delivery.data),
                            acker: Arc::new(LapinAcker {
                                acker: delivery.acker,
                            }),
                        };

                        if tx.send(delivery).await.is_err() {
                            debug!("[{client_id}] Subscription handle dropped for {queue_name}");
                            break;
                        }
                    }
                    Err(e) => {
                        error!("[{client_id}] Consumer error on {queue_name}: {e}");
                        break;
                    }
                }
            }

            info!("[{client_id}] Consumer task ended for queue: {queue_name}");
        });

        self.consumer_handles.push(handle);

        Ok(SubscriptionHandle { inbox: rx })
    }
}

/// Wraps lapin's per-delivery acker behind the domain [`Acker`] contract.
///
/// The listener's ack is what suppresses broker redelivery; the transport
/// itself never acks on the consumer's behalf.
struct LapinAcker {
    acker: lapin::acker::Acker,
}

#[async_trait::async_trait]
impl Acker for LapinAcker {
    async fn ack(&self) -> Result<()> {
        // ---
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| RpcError::Transport(format!("amqp: ack failed: {e}")))
    }
}

#[async_trait::async_trait]
impl Transport for AmqpTransport {
    // ---
    async fn attach_subscription(
        &self,
        topic: &Topic,
        subscription: &SubscriptionName,
        ack_deadline: Duration,
    ) -> Result<SubscriptionHandle> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.send_cmd(
            Cmd::Attach {
                topic: topic.clone(),
                subscription: subscription.clone(),
                ack_deadline,
                resp: tx,
            },
            rx,
        )
        .await
    }

    async fn publish(&self, topic: &Topic, payload: Bytes) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.send_cmd(
            Cmd::Publish {
                topic: topic.clone(),
                payload,
                resp: tx,
            },
            rx,
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        // ---
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Cmd::Close { resp: tx }).await;
        let _ = rx.await;

        let mut task = self.actor_task.lock().await;
        if let Some(handle) = task.take() {
            let _ = handle.await;
        }

        Ok(())
    }
}

/// Creates a lapin-based AMQP transport from the given configuration.
///
/// # Errors
///
/// Returns an error if:
/// - The broker URI is missing or cannot be parsed
/// - Connection to the broker fails
///
/// # Connection Behavior
///
/// The connection to the broker happens immediately during transport
/// creation.
pub async fn create_transport(config: &RpcConfig) -> Result<TransportPtr> {
    // ---
    let (connection, channel) = create_amqp_connection(config).await?;
    Ok(AmqpTransport::create(
        &config.client_id,
        connection,
        channel,
    ))
}

/// Creates an AMQP connection and channel from the given configuration.
async fn create_amqp_connection(config: &RpcConfig) -> Result<(Connection, Channel)> {
    // ---
    let uri = config
        .transport_uri
        .as_deref()
        .ok_or_else(|| RpcError::MissingConfig("transport_uri".to_string()))?;

    info!("Connecting to AMQP broker: {uri}");

    let connection = Connection::connect(uri, ConnectionProperties::default())
        .await
        .map_err(|e| {
            let msg = format!("amqp: connection failed: {e}");
            error!("{msg}");
            RpcError::Transport(msg)
        })?;

    info!("Connected to AMQP broker");

    let channel = connection.create_channel().await.map_err(|e| {
        let msg = format!("amqp: channel creation failed: {e}");
        error!("{msg}");
        RpcError::Transport(msg)
    })?;

    info!("Created AMQP channel");

    Ok((connection, channel))
}
