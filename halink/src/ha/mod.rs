//! Connection orchestrator.
//!
//! An [`HaNode`] listens on its address, answers entrypoint requests by
//! creating incoming links, creates outgoing links with
//! [`connect`](HaNode::connect), and tears everything down on
//! [`stop`](HaNode::stop).
//!
//! # Link ids
//!
//! Ids allocated by a node are `LinkId { first: node_id, second: n }` with
//! `n` counting up from 1. The acceptor allocates both ids of a link: the
//! first for its own end, the second for the requester's. The acceptor's end
//! issues even tags, the requester's odd ones. The connection id pairs the
//! requester's request generation with the acceptor's.
//!
//! # Reconnect
//!
//! A requester that lost its session calls [`reconnect`](HaNode::reconnect):
//!
//! - the acceptor still has the matching incoming link: it is reused, and
//!   told to reconnect towards the requester;
//! - the acceptor restarted and lost it: a new incoming link is built from
//!   the parameters carried by the request, mirrored.

mod observer;

pub use observer::{HaObserver, LinkDirection, NoopObserver};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{HaConfig, LinkConnCfg};
use crate::dispatch::dispatch_incoming;
use crate::entrypoint::{
    ClientState, EntrypointClient, EntrypointReply, EntrypointRequest, EntrypointServer,
    EntrypointStatus,
};
use crate::error::{HaError, HaResult, LinkResult};
use crate::link::Link;
use crate::message::Message;
use crate::providers::{Providers, RandomProvider, TimeProvider};
use crate::registry::LinkRegistry;
use crate::transport::{DeliveryStatus, InboundHandler, Transport};
use crate::types::{LinkId, LinkParams, RequestId};

/// A link together with the bookkeeping the node keeps for it.
#[derive(Debug, Clone)]
pub struct LinkCtx {
    link: Link,
    direction: LinkDirection,
    request_id: Option<RequestId>,
    endpoint: String,
}

impl LinkCtx {
    /// The link.
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Incoming or outgoing.
    pub fn direction(&self) -> LinkDirection {
        self.direction
    }

    /// Entrypoint request that created the link.
    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    /// Endpoint the link task connects to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

struct HaInner<P: Providers> {
    config: HaConfig,
    providers: P,
    node_id: u64,
    registry: LinkRegistry,
    incoming: RwLock<Vec<LinkCtx>>,
    outgoing: RwLock<Vec<LinkCtx>>,
    link_id_counter: AtomicU64,
    generation: AtomicU64,
    server: EntrypointServer,
    client: EntrypointClient,
    observer: Arc<dyn HaObserver>,
    started: AtomicBool,
    /// Entrypoint requests are accepted while true. Held for the whole of
    /// an acceptance so `stop` cannot drain the lists under its feet.
    accepting: Mutex<bool>,
}

/// A node owning incoming and outgoing HA links.
pub struct HaNode<P: Providers> {
    inner: Arc<HaInner<P>>,
}

impl<P: Providers> Clone for HaNode<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Providers> HaNode<P> {
    /// Create a node. Nothing listens until [`start`](Self::start).
    pub fn new(config: HaConfig, providers: P) -> Self {
        Self::with_observer(config, providers, Arc::new(NoopObserver))
    }

    /// Create a node reporting events to `observer`.
    pub fn with_observer(config: HaConfig, providers: P, observer: Arc<dyn HaObserver>) -> Self {
        let node_id = config
            .node_id
            .unwrap_or_else(|| providers.random().random_range(1..u64::MAX));
        Self {
            inner: Arc::new(HaInner {
                config,
                providers,
                node_id,
                registry: LinkRegistry::new(),
                incoming: RwLock::new(Vec::new()),
                outgoing: RwLock::new(Vec::new()),
                link_id_counter: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                server: EntrypointServer::new(),
                client: EntrypointClient::new(),
                observer,
                started: AtomicBool::new(false),
                accepting: Mutex::new(false),
            }),
        }
    }

    /// Node incarnation id.
    pub fn node_id(&self) -> u64 {
        self.inner.node_id
    }

    /// Address the node listens on.
    pub fn address(&self) -> &str {
        &self.inner.config.address
    }

    /// Registry of every started link of this node.
    pub fn registry(&self) -> &LinkRegistry {
        &self.inner.registry
    }

    /// State of the entrypoint client.
    pub fn client_state(&self) -> ClientState {
        self.inner.client.state()
    }

    /// Links created by peers' entrypoint requests.
    pub fn incoming_links(&self) -> Vec<LinkCtx> {
        read_list(&self.inner.incoming)
    }

    /// Links created by [`connect`](Self::connect).
    pub fn outgoing_links(&self) -> Vec<LinkCtx> {
        read_list(&self.inner.outgoing)
    }

    /// Whether the node is started.
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Start listening and serving entrypoint requests.
    pub fn start(&self) -> HaResult<()> {
        if self.inner.started.load(Ordering::Acquire) {
            return Ok(());
        }
        self.inner.client.start()?;
        self.inner.server.start();
        self.inner.set_accepting(true);
        let handler = Arc::new(NodeHandler {
            node: Arc::downgrade(&self.inner),
        });
        if let Err(e) = self
            .inner
            .providers
            .transport()
            .listen(&self.inner.config.address, handler)
        {
            self.inner.set_accepting(false);
            self.inner.server.stop();
            return Err(e.into());
        }
        self.inner.started.store(true, Ordering::Release);
        info!(address = %self.address(), node_id = self.node_id(), "ha node started");
        Ok(())
    }

    /// Ask the node at `address` for a new link and start our end of it.
    ///
    /// Errors are returned as they happen; there is no retry.
    pub async fn connect(&self, address: &str) -> HaResult<Link> {
        self.ensure_started()?;
        let inner = &self.inner;
        let request = EntrypointRequest::first(inner.next_generation(), &inner.config.address);
        let reply = inner.entrypoint_exchange(address, request).await?;
        let params = reply
            .link_params
            .ok_or_else(|| HaError::Rejected("reply without link parameters".to_string()))?;

        let link = inner
            .start_link(
                params,
                inner.config.conn_cfg(address),
                LinkDirection::Outgoing,
                Some(reply.request_id),
            )
            .inspect_err(|e| {
                // The acceptor already runs its end; it stays until the peer
                // node is stopped.
                warn!(
                    link = %params.id_local,
                    peer = %address,
                    remote = %params.id_remote,
                    error = %e,
                    "accepted link could not be started"
                );
            })?;
        debug!(link = %link.id(), peer = %address, "connected");
        Ok(link)
    }

    /// Re-run the entrypoint exchange for an outgoing link, keeping its ids
    /// and tags, then let it connect again.
    pub async fn reconnect(&self, link: &Link) -> HaResult<()> {
        self.ensure_started()?;
        let inner = &self.inner;
        let endpoint = find_ctx(&inner.outgoing, &link.id())
            .map(|ctx| ctx.endpoint)
            .ok_or(HaError::UnknownLink { id: link.id() })?;

        let params = link.reconnect_begin();
        let pending = PendingReconnect::new(link);
        let request =
            EntrypointRequest::reuse(inner.next_generation(), params, &inner.config.address);
        match inner.entrypoint_exchange(&endpoint, request).await {
            Ok(reply) if reply.link_params == Some(params) => {
                pending.finish(inner.config.conn_cfg(&endpoint))?;
                inner.observer.link_reused(link);
                debug!(link = %link.id(), peer = %endpoint, "reconnected");
                Ok(())
            }
            Ok(_) => {
                pending.cancel()?;
                Err(HaError::Rejected(
                    "acceptor answered with different link parameters".to_string(),
                ))
            }
            Err(e) => {
                pending.cancel()?;
                Err(e)
            }
        }
    }

    /// Remove `link` from its list, stop and release it.
    pub async fn disconnect(&self, link: &Link) -> HaResult<()> {
        let id = link.id();
        let ctx = take_ctx(&self.inner.outgoing, &id)
            .or_else(|| take_ctx(&self.inner.incoming, &id))
            .ok_or(HaError::UnknownLink { id })?;
        self.inner.retire(ctx).await
    }

    /// Stop accepting entrypoint requests, stop every link, outgoing first,
    /// then stop listening.
    ///
    /// Entrypoint requests arriving meanwhile are answered `Unavailable`.
    pub async fn stop(&self) -> HaResult<()> {
        if !self.inner.started.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let inner = &self.inner;
        // Waits for an acceptance in progress; none starts afterwards.
        inner.set_accepting(false);
        inner.server.stop();
        let mut first_error = None;

        for list in [&inner.outgoing, &inner.incoming] {
            let contexts: Vec<LinkCtx> = list
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .collect();
            for ctx in contexts {
                if let Err(e) = inner.retire(ctx).await {
                    warn!(error = %e, "failed to retire link");
                    first_error.get_or_insert(e);
                }
            }
        }

        inner.providers.transport().unlisten(&inner.config.address);
        inner.client.stop().await?;
        info!(address = %self.address(), "ha node stopped");
        first_error.map_or(Ok(()), Err)
    }

    fn ensure_started(&self) -> HaResult<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(HaError::NotStarted)
        }
    }
}

impl<P: Providers> HaInner<P> {
    fn set_accepting(&self, accepting: bool) {
        *self.accepting.lock().unwrap_or_else(PoisonError::into_inner) = accepting;
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn alloc_link_id(&self) -> LinkId {
        LinkId::new(
            self.node_id,
            self.link_id_counter.fetch_add(1, Ordering::Relaxed) + 1,
        )
    }

    fn list(&self, direction: LinkDirection) -> &RwLock<Vec<LinkCtx>> {
        match direction {
            LinkDirection::Incoming => &self.incoming,
            LinkDirection::Outgoing => &self.outgoing,
        }
    }

    fn start_link(
        &self,
        params: LinkParams,
        conn: LinkConnCfg,
        direction: LinkDirection,
        request_id: Option<RequestId>,
    ) -> HaResult<Link> {
        let link = Link::new(&self.config.link, params);
        let endpoint = conn.endpoint.clone();
        link.start(&self.providers, &self.registry, conn)?;
        self.list(direction)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LinkCtx {
                link: link.clone(),
                direction,
                request_id,
                endpoint,
            });
        self.observer.link_connected(&link, direction);
        Ok(link)
    }

    async fn retire(&self, ctx: LinkCtx) -> HaResult<()> {
        let id = ctx.link.id();
        self.observer.link_is_disconnecting(&ctx.link);
        ctx.link.stop().await?;
        ctx.link.fini()?;
        self.observer.link_disconnected(id, ctx.direction);
        debug!(link = %id, direction = ?ctx.direction, "link retired");
        Ok(())
    }

    /// Open a throwaway session to `address` and run one exchange on it.
    async fn entrypoint_exchange(
        &self,
        address: &str,
        request: EntrypointRequest,
    ) -> HaResult<EntrypointReply> {
        let time = self.providers.time();
        let session = time
            .timeout(
                self.config.connect_timeout,
                self.providers.transport().open(address),
            )
            .await
            .map_err(|_| HaError::Timeout)??;

        let result = self
            .client
            .request(
                session.as_ref(),
                request,
                time,
                self.config.entrypoint_timeout,
            )
            .await;

        match time
            .timeout(self.config.disconnect_timeout, session.close())
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(peer = %address, error = %e, "entrypoint session close failed"),
            Err(_) => debug!(peer = %address, "entrypoint session close timed out"),
        }
        result
    }

    async fn handle_entrypoint(&self, request: EntrypointRequest) -> EntrypointReply {
        let (id, reply_rx) = {
            let accepting = self.accepting.lock().unwrap_or_else(PoisonError::into_inner);
            if !*accepting {
                return EntrypointReply::failed(RequestId::default(), EntrypointStatus::Unavailable);
            }
            let (id, reply_rx) = match self.server.register() {
                Ok(registered) => registered,
                Err(_) => {
                    return EntrypointReply::failed(
                        RequestId::default(),
                        EntrypointStatus::Unavailable,
                    );
                }
            };
            self.observer.entrypoint_request(id, &request);

            let reply = self.accept(id, &request);
            if let Err(e) = self.server.reply(id, reply) {
                warn!(request = %id, error = %e, "entrypoint reply lost");
            }
            (id, reply_rx)
        };
        reply_rx
            .await
            .unwrap_or_else(|_| EntrypointReply::failed(id, EntrypointStatus::Unavailable))
    }

    fn accept(&self, id: RequestId, request: &EntrypointRequest) -> EntrypointReply {
        let conn = self.config.conn_cfg(&request.process_endpoint);

        if request.first_request {
            let id_local = self.alloc_link_id();
            let id_remote = self.alloc_link_id();
            let id_connection = LinkId::new(request.generation, self.next_generation());
            let params = LinkParams::new(id_local, id_remote, id_connection, true);
            return match self.start_link(params, conn, LinkDirection::Incoming, Some(id)) {
                Ok(link) => {
                    debug!(link = %link.id(), peer = %request.process_endpoint, "accepted new link");
                    EntrypointReply::ok(id, params.mirrored())
                }
                Err(e) => rejected(id, e.to_string()),
            };
        }

        let Some(requester) = request.link_params else {
            return rejected(id, "reconnect request without link parameters".to_string());
        };
        let wanted = requester.mirrored();

        if let Some(ctx) = find_ctx(&self.incoming, &wanted.id_local) {
            if ctx.link.params() != wanted {
                return rejected(id, format!("link {} has different parameters", wanted.id_local));
            }
            ctx.link.reconnect_begin();
            if let Err(e) = ctx.link.reconnect_end(conn) {
                return rejected(id, e.to_string());
            }
            self.observer.link_reused(&ctx.link);
            debug!(link = %wanted.id_local, peer = %request.process_endpoint, "reused link");
            return EntrypointReply::ok(id, requester);
        }

        // We restarted since the link was made: rebuild our end.
        match self.start_link(wanted, conn, LinkDirection::Incoming, Some(id)) {
            Ok(link) => {
                debug!(link = %link.id(), peer = %request.process_endpoint, "rebuilt link");
                EntrypointReply::ok(id, requester)
            }
            Err(e) => rejected(id, e.to_string()),
        }
    }
}

/// An outgoing link between `reconnect_begin` and its outcome. Dropped
/// without an outcome, it resumes the link's previous connection.
struct PendingReconnect<'a> {
    link: &'a Link,
    settled: bool,
}

impl<'a> PendingReconnect<'a> {
    fn new(link: &'a Link) -> Self {
        Self {
            link,
            settled: false,
        }
    }

    fn finish(mut self, conn: LinkConnCfg) -> LinkResult<()> {
        self.settled = true;
        self.link.reconnect_end(conn)
    }

    fn cancel(mut self) -> LinkResult<()> {
        self.settled = true;
        self.link.reconnect_cancel()
    }
}

impl Drop for PendingReconnect<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(link = %self.link.id(), "reconnect abandoned, resuming previous connection");
        if let Err(e) = self.link.reconnect_cancel() {
            warn!(link = %self.link.id(), error = %e, "failed to resume link");
        }
    }
}

fn rejected(id: RequestId, reason: String) -> EntrypointReply {
    warn!(request = %id, %reason, "entrypoint request rejected");
    EntrypointReply::failed(id, EntrypointStatus::Rejected(reason))
}

fn read_list(list: &RwLock<Vec<LinkCtx>>) -> Vec<LinkCtx> {
    list.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn find_ctx(list: &RwLock<Vec<LinkCtx>>, id: &LinkId) -> Option<LinkCtx> {
    list.read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .find(|ctx| ctx.link.id() == *id)
        .cloned()
}

fn take_ctx(list: &RwLock<Vec<LinkCtx>>, id: &LinkId) -> Option<LinkCtx> {
    let mut list = list.write().unwrap_or_else(PoisonError::into_inner);
    let index = list.iter().position(|ctx| ctx.link.id() == *id)?;
    Some(list.remove(index))
}

struct NodeHandler<P: Providers> {
    node: Weak<HaInner<P>>,
}

#[async_trait]
impl<P: Providers> InboundHandler for NodeHandler<P> {
    fn deliver(&self, msg: Message) -> DeliveryStatus {
        match self.node.upgrade() {
            Some(node) => dispatch_incoming(&node.registry, msg),
            None => DeliveryStatus::NoSuchLink,
        }
    }

    async fn entrypoint(&self, request: EntrypointRequest) -> EntrypointReply {
        match self.node.upgrade() {
            Some(node) => node.handle_entrypoint(request).await,
            None => EntrypointReply::failed(RequestId::default(), EntrypointStatus::Unavailable),
        }
    }
}
