//! Keepalive ping scheduling under paused time.

mod common;

use common::{accept, expect_publish, test_options};
use mqtt_keeper::packet::Packet;
use mqtt_keeper::{
    KeepaliveConfig, MemoryConnector, MqttError, PublishOptions, QoS, Session, SessionEvent,
};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn pings_fire_once_per_idle_interval() {
    let (connector, mut links) = MemoryConnector::new();
    let options =
        test_options("ping").keepalive(KeepaliveConfig::new(Duration::from_secs(3)));
    let (session, _events) = Session::connect(options, connector.clone()).unwrap();
    let mut link = links.recv().await.unwrap();
    accept(&mut link, false).await;

    for _ in 0..2 {
        match link.recv().await {
            Some(Packet::PingReq) => {
                link.send(Packet::PingResp);
            }
            other => panic!("expected PINGREQ, got {other:?}"),
        }
    }
    session.end(true).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn missing_pingresp_drops_the_connection() {
    let (connector, mut links) = MemoryConnector::new();
    let options =
        test_options("ping-timeout").keepalive(KeepaliveConfig::new(Duration::from_secs(3)));
    let (session, mut events) = Session::connect(options, connector.clone()).unwrap();
    let mut link = links.recv().await.unwrap();
    accept(&mut link, false).await;

    match link.recv().await {
        Some(Packet::PingReq) => {} // never answered
        other => panic!("expected PINGREQ, got {other:?}"),
    }

    // the unanswered ping times out and a fresh attempt follows
    let mut link = links.recv().await.unwrap();
    accept(&mut link, false).await;
    session.end(true).await.unwrap();

    let mut saw_offline = false;
    let mut saw_timeout = false;
    while let Some(event) = events.try_recv() {
        match event {
            SessionEvent::Offline => saw_offline = true,
            SessionEvent::Error(MqttError::KeepAliveTimeout) => saw_timeout = true,
            _ => {}
        }
    }
    assert!(saw_offline);
    assert!(saw_timeout);
}

#[tokio::test(start_paused = true)]
async fn outbound_traffic_defers_the_ping() {
    let (connector, mut links) = MemoryConnector::new();
    let options =
        test_options("ping-defer").keepalive(KeepaliveConfig::new(Duration::from_secs(3)));
    let (session, _events) = Session::connect(options, connector.clone()).unwrap();
    let mut link = links.recv().await.unwrap();
    accept(&mut link, false).await;
    let start = tokio::time::Instant::now();

    tokio::time::sleep(Duration::from_secs(2)).await;
    session
        .publish("heartbeat", "h", PublishOptions::qos(QoS::AtMostOnce))
        .await
        .unwrap();
    let publish = expect_publish(&mut link).await;
    assert_eq!(publish.topic, "heartbeat");

    match link.recv().await {
        Some(Packet::PingReq) => {
            // a full idle interval after the publish, not after connect
            assert!(start.elapsed() >= Duration::from_secs(5));
            link.send(Packet::PingResp);
        }
        other => panic!("expected PINGREQ, got {other:?}"),
    }
    session.end(true).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn fixed_cadence_pings_ignore_traffic() {
    let (connector, mut links) = MemoryConnector::new();
    let options = test_options("ping-fixed").keepalive(KeepaliveConfig {
        interval: Duration::from_secs(3),
        reschedule_on_send: false,
    });
    let (session, _events) = Session::connect(options, connector.clone()).unwrap();
    let mut link = links.recv().await.unwrap();
    accept(&mut link, false).await;
    let start = tokio::time::Instant::now();

    tokio::time::sleep(Duration::from_secs(2)).await;
    session
        .publish("heartbeat", "h", PublishOptions::qos(QoS::AtMostOnce))
        .await
        .unwrap();
    let publish = expect_publish(&mut link).await;
    assert_eq!(publish.topic, "heartbeat");

    match link.recv().await {
        Some(Packet::PingReq) => {
            // still on the connect-anchored cadence despite the publish
            assert!(start.elapsed() < Duration::from_secs(5));
            link.send(Packet::PingResp);
        }
        other => panic!("expected PINGREQ, got {other:?}"),
    }
    session.end(true).await.unwrap();
}
