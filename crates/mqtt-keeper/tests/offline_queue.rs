//! Offline queueing, flush ordering, and persisted replay across reconnects.

mod common;

use common::{accept, expect_publish, puback, test_options};
use mqtt_keeper::{
    MemoryConnector, MemoryStore, PublishOptions, QoS, Session, SessionStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn queued_publishes_flush_in_submission_order() {
    let (connector, mut links) = MemoryConnector::new();
    connector.set_refuse(true);
    let (session, _events) =
        Session::connect(test_options("flush-order"), connector.clone()).unwrap();

    let mut waiters = Vec::new();
    for topic in ["q/1", "q/2", "q/3"] {
        let worker = session.clone();
        waiters.push(tokio::spawn(async move {
            worker
                .publish(topic, "payload", PublishOptions::qos(QoS::AtLeastOnce))
                .await
        }));
        settle().await;
    }

    connector.set_refuse(false);
    let mut link = links.recv().await.unwrap();
    accept(&mut link, false).await;

    for expected in ["q/1", "q/2", "q/3"] {
        let publish = expect_publish(&mut link).await;
        assert_eq!(publish.topic, expected);
        puback(&link, publish.message_id.unwrap());
    }
    for waiter in waiters {
        waiter.await.unwrap().unwrap();
    }
    session.end(true).await.unwrap();
}

#[tokio::test]
async fn unacked_publish_is_resent_as_duplicate_after_reconnect() {
    let outgoing = Arc::new(MemoryStore::new());
    let (connector, mut links) = MemoryConnector::new();
    let options = test_options("replay")
        .clean(false)
        .outgoing_store(outgoing.clone());
    let (session, _events) = Session::connect(options, connector.clone()).unwrap();
    let mut link = links.recv().await.unwrap();
    accept(&mut link, false).await;

    let mut waiters = Vec::new();
    for topic in ["r/1", "r/2", "r/3"] {
        let worker = session.clone();
        waiters.push(tokio::spawn(async move {
            worker
                .publish(topic, "payload", PublishOptions::qos(QoS::AtLeastOnce))
                .await
        }));
        settle().await;
    }

    // acknowledge the first two, leave the third in flight
    let mut third = None;
    for expected in ["r/1", "r/2", "r/3"] {
        let publish = expect_publish(&mut link).await;
        assert_eq!(publish.topic, expected);
        if expected == "r/3" {
            third = Some(publish);
        } else {
            puback(&link, publish.message_id.unwrap());
        }
    }
    let third = third.unwrap();
    while outgoing.size() > 1 {
        settle().await;
    }
    assert_eq!(outgoing.ids(), vec![third.message_id.unwrap()]);

    link.close();
    let mut link = links.recv().await.unwrap();
    accept(&mut link, true).await;

    let resent = expect_publish(&mut link).await;
    assert_eq!(resent.topic, "r/3");
    assert_eq!(resent.message_id, third.message_id);
    assert!(resent.dup);
    puback(&link, resent.message_id.unwrap());

    let mut results = Vec::new();
    for waiter in waiters {
        results.push(waiter.await.unwrap());
    }
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(outgoing.size(), 0);
    session.end(true).await.unwrap();
}

#[tokio::test]
async fn qos_zero_is_queued_while_offline_by_default() {
    let (connector, mut links) = MemoryConnector::new();
    connector.set_refuse(true);
    let (session, _events) =
        Session::connect(test_options("q0-queued"), connector.clone()).unwrap();

    let worker = session.clone();
    let waiter = tokio::spawn(async move {
        worker
            .publish("telemetry", "v", PublishOptions::qos(QoS::AtMostOnce))
            .await
    });
    settle().await;

    connector.set_refuse(false);
    let mut link = links.recv().await.unwrap();
    accept(&mut link, false).await;

    let publish = expect_publish(&mut link).await;
    assert_eq!(publish.topic, "telemetry");
    assert_eq!(publish.qos, QoS::AtMostOnce);
    waiter.await.unwrap().unwrap();
    session.end(true).await.unwrap();
}

#[tokio::test]
async fn qos_zero_is_dropped_while_offline_when_queueing_disabled() {
    let (connector, mut links) = MemoryConnector::new();
    connector.set_refuse(true);
    let options = test_options("q0-dropped").queue_qos_zero(false);
    let (session, _events) = Session::connect(options, connector.clone()).unwrap();
    settle().await;

    // resolves immediately: nothing is queued for it
    session
        .publish("telemetry", "v", PublishOptions::qos(QoS::AtMostOnce))
        .await
        .unwrap();

    connector.set_refuse(false);
    let mut link = links.recv().await.unwrap();
    accept(&mut link, false).await;

    let worker = session.clone();
    let marker = tokio::spawn(async move {
        worker
            .publish("marker", "m", PublishOptions::qos(QoS::AtLeastOnce))
            .await
    });
    let publish = expect_publish(&mut link).await;
    assert_eq!(publish.topic, "marker");
    puback(&link, publish.message_id.unwrap());
    marker.await.unwrap().unwrap();
    session.end(true).await.unwrap();
}

#[tokio::test]
async fn store_put_hook_fires_before_completion() {
    let stored = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stored);
    let mut options = PublishOptions::qos(QoS::AtLeastOnce);
    options.cb_store_put = Some(Arc::new(move || flag.store(true, Ordering::SeqCst)));

    let (connector, mut links) = MemoryConnector::new();
    let (session, _events) =
        Session::connect(test_options("store-hook"), connector.clone()).unwrap();
    let mut link = links.recv().await.unwrap();
    accept(&mut link, false).await;

    let worker = session.clone();
    let waiter =
        tokio::spawn(async move { worker.publish("h/t", "p", options).await });

    let publish = expect_publish(&mut link).await;
    assert!(stored.load(Ordering::SeqCst));
    puback(&link, publish.message_id.unwrap());
    waiter.await.unwrap().unwrap();
    session.end(true).await.unwrap();
}
