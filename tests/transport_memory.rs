// tests/transport_memory.rs

use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;

use pubsub_rpc::{
    // ---
    create_memory_transport_with_hub,
    MemoryHub,
    RpcConfig,
    SubscriptionName,
    Topic,
};

#[tokio::test]
async fn memory_attach_then_publish_delivers() {
    // ---
    // Arrange
    // ---
    let hub = MemoryHub::new();
    let config = RpcConfig::new("test.topic", "test-sub", "matpd");

    let transport = create_memory_transport_with_hub(&config, hub)
        .await
        .expect("failed to create memory transport");

    let topic = Topic::from("test.topic");

    let mut handle = transport
        .attach_subscription(
            &topic,
            &SubscriptionName::from("test-sub"),
            Duration::from_secs(20),
        )
        .await
        .expect("attach failed");

    let payload = Bytes::from_static(b"hello");

    // ---
    // Act
    // ---
    transport
        .publish(&topic, payload.clone())
        .await
        .expect("publish failed");

    // ---
    // Assert
    // ---
    let received = timeout(Duration::from_millis(100), handle.inbox.recv())
        .await
        .expect("timed out waiting for message")
        .expect("subscription channel closed unexpectedly");

    assert_eq!(received.payload, payload);
}

#[tokio::test]
async fn memory_attach_is_idempotent_per_name() {
    // ---
    let hub = MemoryHub::new();
    let config = RpcConfig::new("test.topic", "test-sub", "maipn");
    let transport = create_memory_transport_with_hub(&config, hub).await.unwrap();

    let topic = Topic::from("test.topic");
    let name = SubscriptionName::from("test-sub");

    // Re-attaching the same name to the same topic succeeds.
    let _first = transport
        .attach_subscription(&topic, &name, Duration::from_secs(20))
        .await
        .expect("first attach failed");
    let _second = transport
        .attach_subscription(&topic, &name, Duration::from_secs(20))
        .await
        .expect("repeated attach should be idempotent");

    // The same name pointed at a different topic is refused.
    let err = transport
        .attach_subscription(&Topic::from("other.topic"), &name, Duration::from_secs(20))
        .await;
    assert!(err.is_err(), "conflicting attach should fail");
}

#[tokio::test]
async fn memory_records_consumer_acks() {
    // ---
    let hub = MemoryHub::new();
    let config = RpcConfig::new("test.topic", "test-sub", "mrca");
    let transport = create_memory_transport_with_hub(&config, hub.clone())
        .await
        .unwrap();

    let topic = Topic::from("test.topic");
    let mut handle = transport
        .attach_subscription(
            &topic,
            &SubscriptionName::from("test-sub"),
            Duration::from_secs(20),
        )
        .await
        .unwrap();

    transport
        .publish(&topic, Bytes::from_static(b"a"))
        .await
        .unwrap();
    transport
        .publish(&topic, Bytes::from_static(b"b"))
        .await
        .unwrap();

    assert_eq!(hub.acked_count(), 0);

    for _ in 0..2 {
        let delivery = handle.inbox.recv().await.expect("delivery missing");
        delivery.acker.ack().await.expect("ack failed");
    }

    assert_eq!(hub.acked_count(), 2);
}

#[tokio::test]
async fn memory_publish_without_subscribers_is_accepted() {
    // ---
    let hub = MemoryHub::new();
    let config = RpcConfig::new("test.topic", "test-sub", "mpwsia");
    let transport = create_memory_transport_with_hub(&config, hub).await.unwrap();

    // Durable acceptance is independent of consumer delivery.
    transport
        .publish(&Topic::from("test.topic"), Bytes::from_static(b"nobody"))
        .await
        .expect("publish without subscribers must succeed");
}
