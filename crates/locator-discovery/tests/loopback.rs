// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end tests over loopback: a UDP lookup responder, a TCP locator and
//! the proxy between them.

use locator_discovery::connection::FramedConnection;
use locator_discovery::protocol::LocatorWire;
use locator_discovery::types::{ENCODING_1_0, ENCODING_1_1};
use locator_discovery::{
    codec_for, start_discovery, Codec, DiscoveredLocator, DiscoveryConfig, EncodingVersion,
    Endpoint, Identity, LookupMessage, NamedCodec, ObjectProxy, Operation, PositionalCodec,
    ProxyServer, ReplyFrame, ReplyStatus, RequestFrame,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;

const MAX_FRAME: usize = 1024 * 1024;

/// Requests seen by a fake locator.
type Seen = Arc<Mutex<Vec<RequestFrame>>>;

/// TCP locator answering every request with an indirect proxy, in the
/// request's encoding.
async fn spawn_locator() -> (Endpoint, Seen) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let seen: Seen = Arc::default();

    let log = Arc::clone(&seen);
    tokio::spawn(async move {
        while let Ok((stream, peer)) = listener.accept().await {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let mut conn = FramedConnection::new(stream, peer, MAX_FRAME);
                while let Ok(Some(request)) = conn.read_frame::<RequestFrame>().await {
                    log.lock().push(request.clone());
                    let codec = codec_for(request.encoding).unwrap();
                    let proxy = ObjectProxy::indirect(Identity::new("hello", ""), "Hello");
                    let payload = codec.encode_result(Some(&proxy)).unwrap();
                    if conn
                        .write_frame(&ReplyFrame::ok(&request, payload))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }
    });

    (Endpoint::tcp("127.0.0.1", port), seen)
}

/// UDP lookup responder announcing `locator` to every matching query.
async fn spawn_responder(locator: DiscoveredLocator) -> (SocketAddr, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        let found = LookupMessage::FoundLocator {
            locator: LocatorWire::from(&locator),
        }
        .encode()
        .unwrap();

        while let Ok((len, _)) = socket.recv_from(&mut buf).await {
            if let Ok(LookupMessage::FindLocator {
                instance_name,
                reply,
            }) = LookupMessage::decode(&buf[..len])
            {
                if instance_name.is_empty() || instance_name == locator.instance_name() {
                    let _ = socket.send_to(&found, reply).await;
                }
            }
        }
    });

    (addr, handle)
}

fn config(lookups: &[SocketAddr]) -> DiscoveryConfig {
    DiscoveryConfig {
        lookup: lookups
            .iter()
            .map(|a| format!("udp -h {} -p {}", a.ip(), a.port()))
            .collect(),
        interface: Some("127.0.0.1".parse().unwrap()),
        listen: "127.0.0.1:0".parse().unwrap(),
        timeout_ms: 200,
        retry_count: 2,
        retry_delay_ms: 500,
        ..Default::default()
    }
}

async fn start_proxy(config: DiscoveryConfig) -> (Arc<ProxyServer>, JoinHandle<()>) {
    let server = Arc::new(ProxyServer::bind(config).await.unwrap());
    let running = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            server.run().await.unwrap();
        })
    };
    (server, running)
}

async fn call(server: &ProxyServer, request: &RequestFrame) -> ReplyFrame {
    let mut conn = FramedConnection::connect(&server.local_addr().to_string(), MAX_FRAME)
        .await
        .unwrap();
    conn.write_frame(request).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), conn.read_frame::<ReplyFrame>())
        .await
        .unwrap()
        .unwrap()
        .unwrap()
}

fn find_adapter(request_id: u32, encoding: EncodingVersion) -> RequestFrame {
    let op = Operation::FindAdapterById { id: "Hello".into() };
    RequestFrame {
        request_id,
        operation: op.name().into(),
        encoding,
        payload: codec_for(encoding).unwrap().encode_request(&op).unwrap(),
    }
}

async fn stop(server: Arc<ProxyServer>, running: JoinHandle<()>) {
    server.shutdown();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_matching_encoding_forwarded_unchanged() {
    let (endpoint, seen) = spawn_locator().await;
    let locator = DiscoveredLocator::new(Identity::new("Locator", "prod"))
        .with_encoding(ENCODING_1_1)
        .with_endpoints(vec![endpoint]);
    let (lookup, _responder) = spawn_responder(locator).await;

    let (server, running) = start_proxy(config(&[lookup])).await;

    let reply = call(&server, &find_adapter(77, ENCODING_1_1)).await;
    assert!(reply.is_ok());
    assert_eq!(reply.request_id, 77);
    let proxy = NamedCodec.decode_result(&reply.payload).unwrap().unwrap();
    assert_eq!(proxy.adapter_id.as_deref(), Some("Hello"));

    // The locator saw the caller's own frame
    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].request_id, 77);
    assert_eq!(seen[0].encoding, ENCODING_1_1);

    assert_eq!(server.coordinator().stats().replies_accepted, 1);
    stop(server, running).await;
}

#[tokio::test]
async fn test_foreign_encoding_transcoded() {
    let (endpoint, seen) = spawn_locator().await;
    let locator = DiscoveredLocator::new(Identity::new("Locator", "prod"))
        .with_encoding(ENCODING_1_1)
        .with_endpoints(vec![endpoint]);
    let (lookup, _responder) = spawn_responder(locator).await;

    let (server, running) = start_proxy(config(&[lookup])).await;

    let reply = call(&server, &find_adapter(5, ENCODING_1_0)).await;
    assert!(reply.is_ok());
    assert_eq!(reply.request_id, 5);
    assert_eq!(reply.encoding, ENCODING_1_0);
    let proxy = PositionalCodec.decode_result(&reply.payload).unwrap().unwrap();
    assert_eq!(proxy.adapter_id.as_deref(), Some("Hello"));

    // Re-encoded for the locator
    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].encoding, ENCODING_1_1);
    assert_eq!(seen[0].operation, "findAdapterById");

    stop(server, running).await;
}

#[tokio::test]
async fn test_no_locator_answers_not_found() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let (server, running) = start_proxy(config(&[silent.local_addr().unwrap()])).await;

    let reply = call(&server, &find_adapter(1, ENCODING_1_1)).await;
    assert_eq!(reply.status, ReplyStatus::Ok);
    assert_eq!(NamedCodec.decode_result(&reply.payload).unwrap(), None);

    // Cooling down: answered without another lookup round
    let rounds = server.coordinator().stats().rounds;
    let reply = call(&server, &find_adapter(2, ENCODING_1_0)).await;
    assert_eq!(PositionalCodec.decode_result(&reply.payload).unwrap(), None);
    assert_eq!(server.coordinator().stats().rounds, rounds);

    stop(server, running).await;
}

#[tokio::test]
async fn test_instance_filter_skips_other_deployment() {
    let (endpoint, _seen) = spawn_locator().await;
    let staging = DiscoveredLocator::new(Identity::new("Locator", "staging"))
        .with_endpoints(vec![endpoint.clone()]);
    let prod = DiscoveredLocator::new(Identity::new("Locator", "prod"))
        .with_endpoints(vec![endpoint]);
    let (staging_lookup, _a) = spawn_responder(staging).await;
    let (prod_lookup, _b) = spawn_responder(prod).await;

    let config = DiscoveryConfig {
        instance_name: Some("prod".into()),
        ..config(&[staging_lookup, prod_lookup])
    };
    let (server, running) = start_proxy(config).await;

    let reply = call(&server, &find_adapter(3, ENCODING_1_1)).await;
    assert!(reply.is_ok());

    let cached = server.coordinator().cached().unwrap();
    assert_eq!(cached.instance_name(), "prod");

    stop(server, running).await;
}

#[tokio::test]
async fn test_survey_lists_deployments() {
    let (endpoint, _seen) = spawn_locator().await;
    let mut lookups = Vec::new();
    let mut responders = Vec::new();
    for (instance, port) in [("prod", 7001), ("prod", 7002), ("staging", 7003)] {
        let locator = DiscoveredLocator::new(Identity::new("Locator", instance))
            .with_endpoints(vec![endpoint.clone(), Endpoint::tcp("127.0.0.1", port)]);
        let (addr, handle) = spawn_responder(locator).await;
        lookups.push(addr);
        responders.push(handle);
    }

    let (coordinator, listeners) = start_discovery(&config(&lookups)).await.unwrap();
    let found = coordinator.survey(None, Duration::from_millis(500)).await;

    assert_eq!(found.len(), 2);
    assert_eq!(found[0].instance_name(), "prod");
    assert_eq!(found[0].endpoints.len(), 3);
    assert_eq!(found[1].instance_name(), "staging");

    let only_staging = coordinator
        .survey(Some("staging"), Duration::from_millis(500))
        .await;
    assert_eq!(only_staging.len(), 1);
    assert_eq!(only_staging[0].instance_name(), "staging");

    coordinator.shutdown();
    for listener in listeners {
        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .unwrap()
            .unwrap();
    }
}
