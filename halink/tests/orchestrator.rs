//! Node-level scenarios: handshake, reconnect, restart and teardown.

#[path = "support/mod.rs"]
mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use halink::{
    ClientState, DeliveryStatus, EntrypointReply, EntrypointRequest, HaError, InboundHandler,
    LinkDirection, LinkError, LinkPhase, LocalNetwork, Message, Tag, Transport, TransportError,
};
use support::{
    Event, TestNode, init_tracing, node, observed_node, peer_of, receive_n, started_pair,
};

/// Listener that accepts sessions but never answers an entrypoint request.
struct SilentAcceptor;

#[async_trait]
impl InboundHandler for SilentAcceptor {
    fn deliver(&self, _msg: Message) -> DeliveryStatus {
        DeliveryStatus::NoSuchLink
    }

    async fn entrypoint(&self, _request: EntrypointRequest) -> EntrypointReply {
        std::future::pending().await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mutual_connect() {
    init_tracing();
    let (_network, a, b) = started_pair();

    let (a_out, b_out) = tokio::join!(a.connect("b"), b.connect("a"));
    let a_out = a_out.unwrap();
    let b_out = b_out.unwrap();

    assert_eq!(a.outgoing_links().len(), 1);
    assert_eq!(a.incoming_links().len(), 1);
    assert_eq!(b.outgoing_links().len(), 1);
    assert_eq!(b.incoming_links().len(), 1);

    // Each outgoing end is mirrored by the peer's incoming end.
    let a_in = a.incoming_links()[0].link().clone();
    let b_in = b.incoming_links()[0].link().clone();
    assert_eq!(a_out.params().mirrored(), b_in.params());
    assert_eq!(b_out.params().mirrored(), a_in.params());

    let ids: HashSet<_> = [&a_out, &b_out, &a_in, &b_in]
        .iter()
        .map(|l| l.id())
        .collect();
    assert_eq!(ids.len(), 4);

    for (from, to) in [(&a_out, &b_in), (&b_in, &a_out), (&b_out, &a_in), (&a_in, &b_out)] {
        let tag = from.send(Message::new(format!("from {}", from.id()))).unwrap();
        from.wait_delivery(tag).await.unwrap();
        let got = receive_n(to, 1).await;
        assert_eq!(got[0].tag, tag);
        assert_eq!(got[0].payload(), format!("from {}", from.id()).as_bytes());
    }

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_observer_sees_connect_and_disconnect() {
    init_tracing();
    let network = LocalNetwork::new();
    let (a, a_events) = observed_node(&network, "a", 0xa);
    let (b, b_events) = observed_node(&network, "b", 0xb);
    a.start().unwrap();
    b.start().unwrap();

    let link = a.connect("b").await.unwrap();
    let peer = peer_of(&b, &link);
    assert_eq!(
        a_events.events(),
        vec![Event::Connected(link.id(), LinkDirection::Outgoing)]
    );
    assert_eq!(
        b_events.events(),
        vec![
            Event::Request {
                first_request: true
            },
            Event::Connected(peer.id(), LinkDirection::Incoming),
        ]
    );

    a.disconnect(&link).await.unwrap();
    assert_eq!(
        a_events.events()[1..],
        [
            Event::Disconnecting(link.id()),
            Event::Disconnected(link.id(), LinkDirection::Outgoing),
        ]
    );

    b.stop().await.unwrap();
    assert_eq!(
        b_events.events()[2..],
        [
            Event::Disconnecting(peer.id()),
            Event::Disconnected(peer.id(), LinkDirection::Incoming),
        ]
    );
    a.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disconnect_removes_link() {
    init_tracing();
    let (_network, a, b) = started_pair();
    let link = a.connect("b").await.unwrap();
    assert!(a.registry().contains(&link.id()));

    a.disconnect(&link).await.unwrap();
    assert!(a.outgoing_links().is_empty());
    assert!(!a.registry().contains(&link.id()));
    assert!(!link.is_running());
    assert_eq!(
        a.disconnect(&link).await.unwrap_err(),
        HaError::UnknownLink { id: link.id() }
    );
    assert!(matches!(
        link.send(Message::new("gone")),
        Err(LinkError::Stopped { .. })
    ));

    // The acceptor keeps its end until told otherwise.
    assert_eq!(b.incoming_links().len(), 1);

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reconnect_reuses_acceptor_link() {
    init_tracing();
    let network = LocalNetwork::new();
    let (a, a_events) = observed_node(&network, "a", 0xa);
    let (b, b_events) = observed_node(&network, "b", 0xb);
    a.start().unwrap();
    b.start().unwrap();

    let link = a.connect("b").await.unwrap();
    let peer = peer_of(&b, &link);
    let params = link.params();
    assert_eq!(link.send(Message::new("one")).unwrap(), 1);
    assert_eq!(link.send(Message::new("two")).unwrap(), 3);
    link.flush().await.unwrap();

    a.reconnect(&link).await.unwrap();
    assert_eq!(link.params(), params);
    assert_eq!(b.incoming_links().len(), 1);
    assert_eq!(a_events.events().last(), Some(&Event::Reused(link.id())));
    assert_eq!(
        b_events.events()[2..],
        [
            Event::Request {
                first_request: false
            },
            Event::Reused(peer.id()),
        ]
    );

    // Tags carry on where they left off and delivery resumes.
    let tag = link.send(Message::new("three")).unwrap();
    assert_eq!(tag, 5);
    link.wait_delivery(tag).await.unwrap();
    let got: Vec<Tag> = receive_n(&peer, 3).await.iter().map(|m| m.tag).collect();
    assert_eq!(got, vec![1, 3, 5]);

    let back = peer.send(Message::new("back")).unwrap();
    peer.wait_delivery(back).await.unwrap();
    assert_eq!(receive_n(&link, 1).await[0].tag, back);

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reconnect_after_acceptor_restart_rebuilds_link() {
    init_tracing();
    let network = LocalNetwork::new();
    let a = node(&network, "a", 0xa);
    let b = node(&network, "b", 0xb);
    a.start().unwrap();
    b.start().unwrap();

    let link = a.connect("b").await.unwrap();
    let tag = link.send(Message::new("before")).unwrap();
    link.wait_delivery(tag).await.unwrap();
    assert_eq!(link.delivered_consume(), Some(tag));

    b.stop().await.unwrap();
    let restarted = node(&network, "b", 0xbb);
    restarted.start().unwrap();

    // The new incarnation does not know the link.
    let lost = link.send(Message::new("lost")).unwrap();
    link.wait_delivery(lost).await.unwrap();
    assert_eq!(link.not_delivered_consume(), Some(lost));
    assert!(restarted.incoming_links().is_empty());

    a.reconnect(&link).await.unwrap();
    let incoming = restarted.incoming_links();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].link().params(), link.params().mirrored());
    assert_eq!(incoming[0].endpoint(), "a");

    let peer = peer_of(&restarted, &link);
    let tag = link.send(Message::new("after")).unwrap();
    link.wait_delivery(tag).await.unwrap();
    assert_eq!(link.delivered_consume(), Some(tag));
    let got = receive_n(&peer, 1).await;
    assert_eq!(got[0].tag, tag);
    assert_eq!(got[0].payload(), b"after");

    a.stop().await.unwrap();
    restarted.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_releases_everything() {
    init_tracing();
    let (_network, a, b) = started_pair();
    let out = a.connect("b").await.unwrap();
    b.connect("a").await.unwrap();
    assert_eq!(a.registry().len(), 2);

    a.stop().await.unwrap();
    assert!(!a.is_started());
    assert!(a.registry().is_empty());
    assert!(a.incoming_links().is_empty());
    assert!(a.outgoing_links().is_empty());
    assert!(!out.is_running());
    assert_eq!(a.client_state(), ClientState::Fini);

    assert_eq!(a.connect("b").await.unwrap_err(), HaError::NotStarted);
    assert_eq!(
        b.connect("a").await.unwrap_err(),
        HaError::Transport(TransportError::ConnectionRefused {
            endpoint: "a".to_string()
        })
    );
    // A stopped node does not come back.
    assert!(matches!(
        a.start(),
        Err(HaError::InvalidTransition {
            from: ClientState::Fini,
            ..
        })
    ));
    // Stopping twice is harmless.
    a.stop().await.unwrap();

    b.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connect_to_unreachable_node_times_out() {
    init_tracing();
    let (network, a, b) = started_pair();
    network.block("b");

    assert_eq!(a.connect("b").await.unwrap_err(), HaError::Timeout);
    assert!(a.outgoing_links().is_empty());
    assert!(b.incoming_links().is_empty());
    // The session never opened, so the client never left its idle state.
    assert_eq!(a.client_state(), ClientState::Unavailable);

    network.unblock("b");
    let link = a.connect("b").await.unwrap();
    assert!(a.registry().contains(&link.id()));

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abandoned_connect_leaves_node_usable() {
    init_tracing();
    let (network, a, b) = started_pair();
    network.listen("silent", Arc::new(SilentAcceptor)).unwrap();

    // Give up well before the entrypoint timeout, while the reply is awaited.
    let abandoned = tokio::time::timeout(Duration::from_millis(50), a.connect("silent")).await;
    assert!(abandoned.is_err());
    assert_eq!(a.client_state(), ClientState::Unavailable);
    assert!(a.outgoing_links().is_empty());

    let link = a.connect("b").await.unwrap();
    let tag = link.send(Message::new("still here")).unwrap();
    link.wait_delivery(tag).await.unwrap();
    assert_eq!(link.delivered_consume(), Some(tag));

    a.stop().await.unwrap();
    assert_eq!(a.client_state(), ClientState::Fini);
    b.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abandoned_reconnect_does_not_strand_link() {
    init_tracing();
    let (network, a, b) = started_pair();
    let link = a.connect("b").await.unwrap();

    network.block("b");
    let abandoned = tokio::time::timeout(Duration::from_millis(20), a.reconnect(&link)).await;
    assert!(abandoned.is_err());

    // The link went back to its old endpoint, which is still unreachable:
    // waiters learn about it instead of hanging.
    let tag = link.send(Message::new("pending")).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), link.wait_delivery(tag))
        .await
        .expect("waiter is released");
    assert!(matches!(outcome, Err(LinkError::Failed { .. })));
    assert_eq!(link.phase(), LinkPhase::Failed);

    network.unblock("b");
    a.reconnect(&link).await.unwrap();
    link.wait_delivery(tag).await.unwrap();
    assert_eq!(link.delivered_consume(), Some(tag));
    let peer = peer_of(&b, &link);
    assert_eq!(receive_n(&peer, 1).await[0].tag, tag);

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_retires_links_accepted_during_shutdown() {
    init_tracing();
    for _ in 0..10 {
        let network = LocalNetwork::new();
        let acceptor = node(&network, "b", 0xb);
        acceptor.start().unwrap();
        let requesters: Vec<TestNode> = (0..4u64)
            .map(|i| node(&network, &format!("r{i}"), 0x100 + i))
            .collect();
        for r in &requesters {
            r.start().unwrap();
        }

        let attempts: Vec<_> = requesters
            .iter()
            .cloned()
            .map(|r| {
                tokio::spawn(async move {
                    for _ in 0..5 {
                        let _ = r.connect("b").await;
                    }
                })
            })
            .collect();
        tokio::task::yield_now().await;
        acceptor.stop().await.unwrap();
        for attempt in attempts {
            attempt.await.unwrap();
        }

        assert!(acceptor.incoming_links().is_empty());
        assert!(acceptor.registry().is_empty());
        for r in requesters {
            r.stop().await.unwrap();
        }
    }
}
