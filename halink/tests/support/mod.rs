//! Shared helpers for halink integration tests.
//!
//! Nodes share one in-process [`LocalNetwork`] and use short timeouts so
//! failure paths resolve quickly.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use halink::{
    EntrypointRequest, HaConfig, HaNode, HaObserver, Link, LinkDirection, LinkId, LocalNetwork,
    Message, RequestId, TokioProviders,
};

pub type TestNode = HaNode<TokioProviders<LocalNetwork>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

pub fn config(address: &str, node_id: u64) -> HaConfig {
    HaConfig::local_network(address)
        .with_node_id(node_id)
        .with_timeouts(Duration::from_millis(200), Duration::from_millis(200))
        .with_entrypoint_timeout(Duration::from_millis(500))
}

pub fn node(network: &LocalNetwork, address: &str, node_id: u64) -> TestNode {
    HaNode::new(config(address, node_id), TokioProviders::new(network.clone()))
}

pub fn observed_node(
    network: &LocalNetwork,
    address: &str,
    node_id: u64,
) -> (TestNode, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::default());
    let node = HaNode::with_observer(
        config(address, node_id),
        TokioProviders::new(network.clone()),
        observer.clone(),
    );
    (node, observer)
}

/// Two started nodes, "a" and "b", on a fresh network.
pub fn started_pair() -> (LocalNetwork, TestNode, TestNode) {
    let network = LocalNetwork::new();
    let a = node(&network, "a", 0xa);
    let b = node(&network, "b", 0xb);
    a.start().unwrap();
    b.start().unwrap();
    (network, a, b)
}

/// The link on `node` forming the other end of `link`.
pub fn peer_of(node: &TestNode, link: &Link) -> Link {
    node.registry()
        .find(&link.params().id_remote)
        .expect("peer link registered")
}

/// Receive `count` messages, waiting for each.
pub async fn receive_n(link: &Link, count: usize) -> Vec<Message> {
    let mut received = Vec::with_capacity(count);
    while received.len() < count {
        tokio::time::timeout(Duration::from_secs(5), link.wait_arrival())
            .await
            .expect("message arrives in time")
            .expect("link still running");
        while let Some(msg) = link.receive() {
            received.push(msg);
        }
    }
    received
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Request { first_request: bool },
    Connected(LinkId, LinkDirection),
    Reused(LinkId),
    Disconnecting(LinkId),
    Disconnected(LinkId, LinkDirection),
}

#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl HaObserver for RecordingObserver {
    fn entrypoint_request(&self, _id: RequestId, request: &EntrypointRequest) {
        self.push(Event::Request {
            first_request: request.first_request,
        });
    }

    fn link_connected(&self, link: &Link, direction: LinkDirection) {
        self.push(Event::Connected(link.id(), direction));
    }

    fn link_reused(&self, link: &Link) {
        self.push(Event::Reused(link.id()));
    }

    fn link_is_disconnecting(&self, link: &Link) {
        self.push(Event::Disconnecting(link.id()));
    }

    fn link_disconnected(&self, id: LinkId, direction: LinkDirection) {
        self.push(Event::Disconnected(id, direction));
    }
}
