//! Configuration structures for links and nodes.

use std::time::Duration;

/// Capacity of one message queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of queued messages. `None` means unbounded.
    pub capacity: Option<usize>,
}

impl QueueConfig {
    /// Unbounded queue.
    pub const fn unbounded() -> Self {
        Self { capacity: None }
    }

    /// Queue holding at most `capacity` messages.
    pub const fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
        }
    }
}

/// Per-link queue configuration.
///
/// The delivered and not-delivered queues are always unbounded: a message
/// leaving the outbound queue must always find a place to land.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkConfig {
    /// Inbound queue (received, not yet consumed).
    pub inbound: QueueConfig,
    /// Outbound queue (sent by the application, not yet transmitted).
    pub outbound: QueueConfig,
}

impl LinkConfig {
    /// Bound both queues to the same capacity.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            inbound: QueueConfig::bounded(capacity),
            outbound: QueueConfig::bounded(capacity),
        }
    }

    /// Set the inbound queue configuration.
    pub fn with_inbound(mut self, inbound: QueueConfig) -> Self {
        self.inbound = inbound;
        self
    }

    /// Set the outbound queue configuration.
    pub fn with_outbound(mut self, outbound: QueueConfig) -> Self {
        self.outbound = outbound;
        self
    }
}

/// Where and how a link task connects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkConnCfg {
    /// Remote endpoint address.
    pub endpoint: String,
    /// Deadline for opening the transport session.
    pub connect_timeout: Duration,
    /// Deadline for closing the transport session.
    pub disconnect_timeout: Duration,
}

impl LinkConnCfg {
    /// Connection to `endpoint` with default timeouts.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(5),
        }
    }

    /// Set connect and disconnect deadlines.
    pub fn with_timeouts(mut self, connect: Duration, disconnect: Duration) -> Self {
        self.connect_timeout = connect;
        self.disconnect_timeout = disconnect;
        self
    }
}

/// Configuration of an [`HaNode`](crate::HaNode).
#[derive(Clone, Debug)]
pub struct HaConfig {
    /// Address the node listens on and advertises to acceptors.
    pub address: String,

    /// Node incarnation id. Drawn at random when `None`.
    pub node_id: Option<u64>,

    /// Queue configuration applied to every link.
    pub link: LinkConfig,

    /// Deadline for opening transport sessions.
    pub connect_timeout: Duration,

    /// Deadline for closing transport sessions.
    pub disconnect_timeout: Duration,

    /// Deadline for an entrypoint request/reply exchange.
    pub entrypoint_timeout: Duration,
}

impl HaConfig {
    /// Configuration with default timeouts and unbounded queues.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            node_id: None,
            link: LinkConfig::default(),
            connect_timeout: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(5),
            entrypoint_timeout: Duration::from_secs(10),
        }
    }

    /// Create a configuration for low-latency local networking.
    pub fn local_network(address: impl Into<String>) -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            disconnect_timeout: Duration::from_millis(500),
            entrypoint_timeout: Duration::from_secs(1),
            ..Self::new(address)
        }
    }

    /// Create a configuration for high-latency WAN networking.
    pub fn wan_network(address: impl Into<String>) -> Self {
        Self {
            link: LinkConfig::bounded(5000),
            connect_timeout: Duration::from_secs(30),
            disconnect_timeout: Duration::from_secs(30),
            entrypoint_timeout: Duration::from_secs(60),
            ..Self::new(address)
        }
    }

    /// Pin the node incarnation id.
    pub fn with_node_id(mut self, node_id: u64) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Set the link queue configuration.
    pub fn with_link_config(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    /// Set the connect and disconnect deadlines.
    pub fn with_timeouts(mut self, connect: Duration, disconnect: Duration) -> Self {
        self.connect_timeout = connect;
        self.disconnect_timeout = disconnect;
        self
    }

    /// Set the entrypoint deadline.
    pub fn with_entrypoint_timeout(mut self, timeout: Duration) -> Self {
        self.entrypoint_timeout = timeout;
        self
    }

    pub(crate) fn conn_cfg(&self, endpoint: &str) -> LinkConnCfg {
        LinkConnCfg::new(endpoint).with_timeouts(self.connect_timeout, self.disconnect_timeout)
    }
}
