//! Pub/Sub Integration Tests
//!
//! These tests require:
//! - Running Redis instance
//! - Environment variables: REDIS_URL
//!
//! Run with: cargo test -p integration-tests --test pubsub_tests

use std::time::Duration;

use channels_common::ResubscribePolicy;
use channels_pubsub::{
    ChannelError, ConnectionState, JsonCodec, PubChannel, RedisConnector, SubChannel,
};
use integration_tests::{check_test_env, test_config, unique_channel, Recorder, TestChannels};
use serde::{Deserialize, Serialize};

const MESSAGE: &str = "PING";

// ============================================================================
// Publish / Receive
// ============================================================================

#[tokio::test]
async fn test_publish_reaches_single_subscriber() {
    if !check_test_env().await {
        return;
    }

    let channels = TestChannels::connect().await.expect("Failed to connect");
    let channel = unique_channel("test:channel");
    let mut recorder = Recorder::new();

    channels
        .subscriber
        .sub(channel.clone(), recorder.listener())
        .await
        .unwrap();

    let receivers = channels
        .publisher
        .publish(&channel, &MESSAGE.to_string())
        .await
        .unwrap();
    assert_eq!(receivers, 1);

    let (received_channel, received_message) = recorder.next().await.unwrap();
    assert_eq!(received_channel, channel);
    assert_eq!(received_message, MESSAGE);
    recorder
        .assert_silent(Duration::from_millis(200))
        .await
        .unwrap();

    channels.close().await;
}

#[tokio::test]
async fn test_publish_without_subscribers() {
    if !check_test_env().await {
        return;
    }

    let channels = TestChannels::connect().await.expect("Failed to connect");
    let receivers = channels
        .publisher
        .publish(&unique_channel("nobody"), &MESSAGE.to_string())
        .await
        .unwrap();
    assert_eq!(receivers, 0);

    channels.close().await;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PresenceUpdate {
    user_id: u64,
    status: String,
}

#[tokio::test]
async fn test_json_values() {
    if !check_test_env().await {
        return;
    }

    let config = test_config().unwrap();
    let connector = RedisConnector::from_config(&config.redis).unwrap();
    let channel = unique_channel("presence");

    let subscriber = SubChannel::builder()
        .client(connector.clone())
        .codec(JsonCodec::<PresenceUpdate>::new())
        .build()
        .unwrap();
    subscriber.connect().await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    subscriber
        .sub(channel.clone(), move |_, update: PresenceUpdate| {
            tx.send(update)?;
            Ok(())
        })
        .await
        .unwrap();

    let publisher = PubChannel::builder()
        .client(connector)
        .codec(JsonCodec::<PresenceUpdate>::new())
        .build()
        .unwrap();
    publisher.connect().await.unwrap();

    let update = PresenceUpdate {
        user_id: 42,
        status: "online".to_string(),
    };
    assert_eq!(publisher.publish(&channel, &update).await.unwrap(), 1);

    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, update);

    subscriber.close().await;
    publisher.close().await;
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_unsub_stops_delivery() {
    if !check_test_env().await {
        return;
    }

    let channels = TestChannels::connect().await.expect("Failed to connect");
    let channel = unique_channel("test:channel");
    let mut recorder = Recorder::new();

    channels
        .subscriber
        .sub(channel.clone(), recorder.listener())
        .await
        .unwrap();
    channels.subscriber.unsub(&channel).await.unwrap();

    let receivers = channels
        .publisher
        .publish(&channel, &MESSAGE.to_string())
        .await
        .unwrap();
    assert_eq!(receivers, 0);
    recorder
        .assert_silent(Duration::from_millis(200))
        .await
        .unwrap();

    channels.close().await;
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    if !check_test_env().await {
        return;
    }

    let channels = TestChannels::connect().await.expect("Failed to connect");
    let channel = unique_channel("test:channel");

    channels.subscriber.sub(channel.clone(), |_, _| Ok(())).await.unwrap();
    let err = channels
        .subscriber
        .sub(channel.clone(), |_, _| Ok(()))
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::AlreadySubscribed(_)));

    channels.close().await;
}

#[tokio::test]
async fn test_unsub_unknown_channel() {
    if !check_test_env().await {
        return;
    }

    let channels = TestChannels::connect().await.expect("Failed to connect");
    channels
        .subscriber
        .unsub(&unique_channel("never-registered"))
        .await
        .unwrap();

    channels.close().await;
}

#[tokio::test]
async fn test_resubscribe_keeps_existing_channels() {
    if !check_test_env().await {
        return;
    }

    for policy in [ResubscribePolicy::Bulk, ResubscribePolicy::Incremental] {
        let mut config = test_config().unwrap();
        config.subscriber.resubscribe = policy;

        let channels = TestChannels::connect_with_config(&config)
            .await
            .expect("Failed to connect");
        let first = unique_channel("first");
        let second = unique_channel("second");
        let mut recorder = Recorder::new();

        channels.subscriber.sub(first.clone(), recorder.listener()).await.unwrap();
        channels.subscriber.sub(second.clone(), recorder.listener()).await.unwrap();
        channels.subscriber.unsub(&second).await.unwrap();

        let receivers = channels
            .publisher
            .publish(&first, &MESSAGE.to_string())
            .await
            .unwrap();
        assert_eq!(receivers, 1, "policy {policy:?}");
        assert_eq!(recorder.next().await.unwrap().0, first);

        channels.close().await;
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_close_is_safe() {
    if !check_test_env().await {
        return;
    }

    let config = test_config().unwrap();
    let connector = RedisConnector::from_config(&config.redis).unwrap();

    let never_connected = SubChannel::builder().client(connector.clone()).build().unwrap();
    never_connected.close().await;
    never_connected.close().await;

    let publisher = PubChannel::builder().client(connector).build().unwrap();
    publisher.close().await;

    let channels = TestChannels::connect().await.expect("Failed to connect");
    channels.subscriber.close().await;
    channels.subscriber.close().await;
    assert_eq!(channels.subscriber.state().await, ConnectionState::Closed);
    channels.close().await;
}
