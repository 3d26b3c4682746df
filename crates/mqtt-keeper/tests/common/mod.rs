//! Broker-side helpers for driving a session over the in-memory transport.

#![allow(dead_code)]

use mqtt_keeper::packet::{
    ConnAckPacket, ConnectReturnCode, Packet, PubAckPacket, PublishPacket, ReasonCode,
    SubAckCode, SubAckPacket,
};
use mqtt_keeper::transport::BrokerLink;
use mqtt_keeper::{QoS, ReconnectConfig, SessionOptions};
use std::time::Duration;

pub fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        period: Duration::from_millis(50),
        max_attempts: None,
    }
}

pub fn test_options(client_id: &str) -> SessionOptions {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    SessionOptions::new()
        .client_id(client_id)
        .reconnect(fast_reconnect())
        .connect_timeout(Duration::from_secs(5))
}

/// Consumes the CONNECT and answers with an accepting CONNACK.
pub async fn accept(link: &mut BrokerLink, session_present: bool) {
    let packet = link.recv().await.expect("link closed before CONNECT");
    assert!(
        matches!(packet, Packet::Connect(_)),
        "expected CONNECT, got {packet:?}"
    );
    assert!(link.send(Packet::ConnAck(ConnAckPacket {
        session_present,
        return_code: ConnectReturnCode::Accepted,
    })));
}

/// Answers the CONNECT with a refusal.
pub async fn refuse(link: &mut BrokerLink, return_code: ConnectReturnCode) {
    let packet = link.recv().await.expect("link closed before CONNECT");
    assert!(matches!(packet, Packet::Connect(_)));
    assert!(link.send(Packet::ConnAck(ConnAckPacket {
        session_present: false,
        return_code,
    })));
}

/// Next PUBLISH from the client, skipping pings.
pub async fn expect_publish(link: &mut BrokerLink) -> PublishPacket {
    loop {
        match link.recv().await.expect("link closed awaiting PUBLISH") {
            Packet::Publish(p) => return p,
            Packet::PingReq => {
                link.send(Packet::PingResp);
            }
            other => panic!("expected PUBLISH, got {other:?}"),
        }
    }
}

pub fn puback(link: &BrokerLink, message_id: u16) {
    assert!(link.send(Packet::PubAck(PubAckPacket {
        message_id,
        reason: ReasonCode::Success,
    })));
}

/// Grants every filter of the next SUBSCRIBE at its requested QoS.
pub async fn grant_subscribe(link: &mut BrokerLink) -> u16 {
    loop {
        match link.recv().await.expect("link closed awaiting SUBSCRIBE") {
            Packet::Subscribe(sub) => {
                let grants: Vec<SubAckCode> = sub
                    .filters
                    .iter()
                    .map(|f| SubAckCode::Granted(f.qos))
                    .collect();
                assert!(link.send(Packet::SubAck(SubAckPacket {
                    message_id: sub.message_id,
                    grants,
                })));
                return sub.message_id;
            }
            Packet::PingReq => {
                link.send(Packet::PingResp);
            }
            other => panic!("expected SUBSCRIBE, got {other:?}"),
        }
    }
}

/// Next packet from the client, answering pings transparently.
pub async fn next_packet(link: &mut BrokerLink) -> Packet {
    loop {
        match link.recv().await.expect("link closed") {
            Packet::PingReq => {
                link.send(Packet::PingResp);
            }
            packet => return packet,
        }
    }
}

pub fn qos2_publish(message_id: u16, topic: &str) -> Packet {
    Packet::Publish(PublishPacket {
        topic: topic.into(),
        payload: bytes::Bytes::from_static(b"payload"),
        qos: QoS::ExactlyOnce,
        retain: false,
        dup: false,
        message_id: Some(message_id),
    })
}
