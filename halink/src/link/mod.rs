//! Reliable point-to-point link.
//!
//! A [`Link`] owns four message queues, a single in-flight slot and a tag
//! counter. The application sends and receives through the link; a
//! background task (see [`LinkPhase`]) moves messages from the outbound
//! queue to the peer, one at a time, and files each one under delivered or
//! not-delivered once the peer answered.
//!
//! ```text
//!   send() ──► outbound ──► in-flight ──► peer
//!                                │
//!                     reply ─────┴──► delivered / not-delivered ──► *_consume()
//!
//!   peer ──► dispatch ──► inbound ──► receive()
//! ```
//!
//! Every tag handed out by [`Link::send`] sits in exactly one of outbound,
//! in-flight, delivered or not-delivered until the application consumes it.

mod channel;
mod task;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, watch};
use tracing::{debug, warn};

use crate::config::{LinkConfig, LinkConnCfg};
use crate::error::{LinkError, LinkResult, TransportError};
use crate::message::Message;
use crate::providers::{Providers, TaskProvider};
use crate::queue::{MessageQueue, QueueKind};
use crate::registry::LinkRegistry;
use crate::transport::{DeliveryStatus, PostReceipt};
use crate::types::{LinkId, LinkParams, Tag};

use channel::{LinkChannel, broadcast};

/// States of the link task.
///
/// ```text
/// Init → TransportInit → NotConnected ⇄ {Connect → Connecting} → Idle
/// Idle ⇄ {Send → WaitReply → WaitRelease}
/// Idle → Disconnect → Disconnecting → NotConnected
/// Connecting → Failed → {Connect | TransportFini}
/// NotConnected → TransportFini → Finish
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkPhase {
    /// Task created.
    Init,
    /// Setting up transport resources.
    TransportInit,
    /// No session.
    NotConnected,
    /// About to open a session.
    Connect,
    /// Opening a session.
    Connecting,
    /// Connected, waiting for work.
    Idle,
    /// Posting the in-flight message.
    Send,
    /// Waiting for the peer's verdict.
    WaitReply,
    /// Waiting for the transport to release the outbound buffer.
    WaitRelease,
    /// About to close the session.
    Disconnect,
    /// Closing the session.
    Disconnecting,
    /// Connecting failed; parked until reconnect or stop.
    Failed,
    /// Releasing transport resources.
    TransportFini,
    /// Task is done.
    Finish,
}

/// Counters of one link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Messages accepted by `send()`.
    pub sent: u64,
    /// Messages acknowledged by the peer.
    pub delivered: u64,
    /// Messages that failed or were drained at shutdown.
    pub not_delivered: u64,
    /// Messages deposited into the inbound queue.
    pub received: u64,
    /// Wakeups posted to the link task.
    pub wakeups_posted: u64,
    /// Wakeup requests folded into an already pending one.
    pub wakeups_coalesced: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

enum IdleStep {
    Stop,
    Reconnect,
    Send,
    Wait,
}

struct LinkState {
    q_in: MessageQueue,
    q_out: MessageQueue,
    q_delivered: MessageQueue,
    q_not_delivered: MessageQueue,
    in_flight: Option<Message>,
    tag_current: Tag,
    last_tag: Option<Tag>,
    lifecycle: Lifecycle,
    phase: LinkPhase,
    waking_up: bool,
    task_is_stopping: bool,
    stop_requested: bool,
    reconnect: bool,
    reconnect_cfg: Option<LinkConnCfg>,
    conn: Option<LinkConnCfg>,
    failure: Option<String>,
    stats: LinkStats,
}

impl LinkState {
    fn is_delivered(&self, tag: Tag) -> bool {
        !self.q_out.contains(tag) && self.in_flight.as_ref().map(|m| m.tag) != Some(tag)
    }

    fn drain_outbound(&mut self) -> usize {
        let drained: Vec<Message> = self.q_out.drain().collect();
        let count = drained.len();
        for msg in drained {
            self.file(msg, false);
        }
        count
    }

    fn file(&mut self, msg: Message, delivered: bool) {
        // The outcome queues are unbounded.
        if delivered {
            self.stats.delivered += 1;
            let _ = self.q_delivered.enqueue(msg);
        } else {
            self.stats.not_delivered += 1;
            let _ = self.q_not_delivered.enqueue(msg);
        }
    }
}

struct LinkInner {
    params: LinkParams,
    /// Always locked before `state`.
    channel: LinkChannel,
    state: Mutex<LinkState>,
    wakeup: Notify,
    done: watch::Sender<bool>,
    registry: Mutex<Option<LinkRegistry>>,
}

/// Handle to a link. Clones refer to the same link.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id())
            .field("phase", &self.phase())
            .finish()
    }
}

impl Link {
    /// Create a link. Nothing runs until [`start`](Self::start).
    pub fn new(config: &LinkConfig, params: LinkParams) -> Self {
        let (done, _) = watch::channel(false);
        let state = LinkState {
            q_in: MessageQueue::new(QueueKind::Inbound, config.inbound),
            q_out: MessageQueue::new(QueueKind::Outbound, config.outbound),
            q_delivered: MessageQueue::unbounded(QueueKind::Delivered),
            q_not_delivered: MessageQueue::unbounded(QueueKind::NotDelivered),
            in_flight: None,
            tag_current: params.first_tag(),
            last_tag: None,
            lifecycle: Lifecycle::Created,
            phase: LinkPhase::Init,
            waking_up: false,
            task_is_stopping: false,
            stop_requested: false,
            reconnect: false,
            reconnect_cfg: None,
            conn: None,
            failure: None,
            stats: LinkStats::default(),
        };
        Self {
            inner: Arc::new(LinkInner {
                params,
                channel: LinkChannel::default(),
                state: Mutex::new(state),
                wakeup: Notify::new(),
                done,
                registry: Mutex::new(None),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the state and wake every waiter, channel lock first.
    fn with_broadcast<R>(&self, f: impl FnOnce(&mut LinkState) -> R) -> R {
        let clinks = self.inner.channel.lock();
        let result = {
            let mut state = self.lock();
            f(&mut state)
        };
        broadcast(&clinks);
        result
    }

    /// Local id; inbound messages addressed to it land here.
    pub fn id(&self) -> LinkId {
        self.inner.params.id_local
    }

    /// Parameters agreed for this link.
    pub fn params(&self) -> LinkParams {
        self.inner.params
    }

    /// Current phase of the link task.
    pub fn phase(&self) -> LinkPhase {
        self.lock().phase
    }

    /// Counters.
    pub fn stats(&self) -> LinkStats {
        self.lock().stats
    }

    /// Reason of the last connect failure, if the link is parked in
    /// [`LinkPhase::Failed`].
    pub fn failure(&self) -> Option<String> {
        self.lock().failure.clone()
    }

    /// Whether the link task is running.
    pub fn is_running(&self) -> bool {
        self.lock().lifecycle == Lifecycle::Running
    }

    /// Register the link and spawn its task, which connects to
    /// `conn.endpoint`.
    pub fn start<P: Providers>(
        &self,
        providers: &P,
        registry: &LinkRegistry,
        conn: LinkConnCfg,
    ) -> LinkResult<()> {
        {
            let mut state = self.lock();
            if state.lifecycle != Lifecycle::Created {
                return Err(LinkError::InvalidState(format!(
                    "link {} was already started",
                    self.id()
                )));
            }
            registry.register(self)?;
            state.lifecycle = Lifecycle::Running;
            state.conn = Some(conn.clone());
        }
        *self
            .inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(registry.clone());

        debug!(link = %self.id(), endpoint = %conn.endpoint, tag_even = self.inner.params.tag_even, "starting link");
        providers.task().spawn_task(
            &format!("ha_link_{}", self.id()),
            task::run(self.clone(), providers.clone(), conn),
        );
        Ok(())
    }

    /// Stop the link and wait for its task to finish.
    ///
    /// The request is honoured once the task is idle, so the in-flight
    /// message always gets its verdict. Messages never transmitted are moved
    /// to the not-delivered queue. Stopping twice is a no-op.
    pub async fn stop(&self) -> LinkResult<()> {
        {
            let mut state = self.lock();
            match state.lifecycle {
                Lifecycle::Created => {
                    return Err(LinkError::InvalidState(format!(
                        "link {} was never started",
                        self.id()
                    )));
                }
                Lifecycle::Stopped => return Ok(()),
                Lifecycle::Running => state.stop_requested = true,
            }
        }
        debug!(link = %self.id(), "stopping link");
        self.inner.wakeup.notify_one();

        let mut done = self.inner.done.subscribe();
        let _ = done.wait_for(|finished| *finished).await;

        let registry = self
            .inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(registry) = registry {
            registry.deregister(&self.id());
        }
        self.lock().lifecycle = Lifecycle::Stopped;
        Ok(())
    }

    /// Release the handle. Refused while the link is running.
    pub fn fini(self) -> LinkResult<()> {
        if self.lock().lifecycle == Lifecycle::Running {
            return Err(LinkError::InvalidState(format!(
                "link {} is still running",
                self.id()
            )));
        }
        Ok(())
    }

    /// Queue a message for transmission and return its tag.
    ///
    /// Never blocks. Fails when the outbound queue is at capacity, or when
    /// the link is shutting down and the message could no longer be
    /// accounted for.
    pub fn send(&self, mut msg: Message) -> LinkResult<Tag> {
        let tag = {
            let mut state = self.lock();
            if state.task_is_stopping || state.lifecycle == Lifecycle::Stopped {
                return Err(LinkError::Stopped { id: self.id() });
            }
            let tag = state.tag_current;
            msg.tag = tag;
            msg.link_id = self.inner.params.id_remote;
            msg.incoming = false;
            state.q_out.enqueue(msg)?;
            state.tag_current += 2;
            state.last_tag = Some(tag);
            state.stats.sent += 1;
            tag
        };
        self.wakeup();
        Ok(tag)
    }

    /// Pop the oldest received message.
    pub fn receive(&self) -> Option<Message> {
        self.lock().q_in.dequeue()
    }

    /// Pop the oldest delivered tag.
    pub fn delivered_consume(&self) -> Option<Tag> {
        self.lock().q_delivered.dequeue().map(|m| m.tag)
    }

    /// Pop the oldest not-delivered tag.
    pub fn not_delivered_consume(&self) -> Option<Tag> {
        self.lock().q_not_delivered.dequeue().map(|m| m.tag)
    }

    /// Whether `tag` left both the outbound queue and the in-flight slot.
    pub fn is_delivered(&self, tag: Tag) -> bool {
        self.lock().is_delivered(tag)
    }

    /// Wait until [`is_delivered`](Self::is_delivered) holds for `tag`.
    ///
    /// Fails if the link fails to connect or finishes while the tag is
    /// still pending.
    pub async fn wait_delivery(&self, tag: Tag) -> LinkResult<()> {
        let guard = self.inner.channel.register();
        loop {
            guard.clink().arm();
            if let Some(outcome) = self.delivery_outcome(tag) {
                return outcome;
            }
            guard.clink().wait().await;
        }
    }

    fn delivery_outcome(&self, tag: Tag) -> Option<LinkResult<()>> {
        let state = self.lock();
        if state.is_delivered(tag) {
            Some(Ok(()))
        } else if let Some(reason) = &state.failure {
            Some(Err(LinkError::Failed {
                id: self.id(),
                reason: reason.clone(),
            }))
        } else if state.phase == LinkPhase::Finish {
            Some(Err(LinkError::Stopped { id: self.id() }))
        } else {
            None
        }
    }

    /// Wait until the inbound queue is non-empty.
    pub async fn wait_arrival(&self) -> LinkResult<()> {
        let guard = self.inner.channel.register();
        loop {
            guard.clink().arm();
            if let Some(outcome) = self.arrival_outcome() {
                return outcome;
            }
            guard.clink().wait().await;
        }
    }

    fn arrival_outcome(&self) -> Option<LinkResult<()>> {
        let state = self.lock();
        if !state.q_in.is_empty() {
            Some(Ok(()))
        } else if state.phase == LinkPhase::Finish {
            Some(Err(LinkError::Stopped { id: self.id() }))
        } else {
            None
        }
    }

    /// Wait for the most recently sent tag. No-op if nothing was sent.
    pub async fn flush(&self) -> LinkResult<()> {
        let last = self.lock().last_tag;
        match last {
            Some(tag) => self.wait_delivery(tag).await,
            None => Ok(()),
        }
    }

    /// Ask the task to drop its session once idle and wait for
    /// [`reconnect_end`](Self::reconnect_end). Returns the parameters to
    /// present to the acceptor.
    pub fn reconnect_begin(&self) -> LinkParams {
        {
            let mut state = self.lock();
            state.reconnect = true;
            state.reconnect_cfg = None;
        }
        debug!(link = %self.id(), "reconnect begin");
        self.inner.wakeup.notify_one();
        self.inner.params
    }

    /// Let the task connect again, to `conn`.
    pub fn reconnect_end(&self, conn: LinkConnCfg) -> LinkResult<()> {
        {
            let mut state = self.lock();
            if !state.reconnect {
                return Err(LinkError::InvalidState(format!(
                    "link {} is not reconnecting",
                    self.id()
                )));
            }
            debug!(link = %self.id(), endpoint = %conn.endpoint, "reconnect end");
            state.reconnect_cfg = Some(conn);
            state.failure = None;
        }
        self.inner.wakeup.notify_one();
        Ok(())
    }

    /// Abandon a reconnect and resume with the previous connection.
    pub fn reconnect_cancel(&self) -> LinkResult<()> {
        let previous = self.lock().conn.clone();
        match previous {
            Some(conn) => self.reconnect_end(conn),
            None => Err(LinkError::InvalidState(format!(
                "link {} has no connection to resume",
                self.id()
            ))),
        }
    }

    /// Number of registered waiters.
    pub fn waiters(&self) -> usize {
        self.inner.channel.waiters()
    }

    // Dispatch side.

    pub(crate) fn deliver_incoming(&self, mut msg: Message) -> DeliveryStatus {
        msg.incoming = true;
        let clinks = self.inner.channel.lock();
        let status = {
            let mut state = self.lock();
            match state.q_in.enqueue(msg) {
                Ok(()) => {
                    state.stats.received += 1;
                    DeliveryStatus::Accepted
                }
                Err(e) => {
                    warn!(link = %self.id(), error = %e, "refusing inbound message");
                    DeliveryStatus::QueueFull
                }
            }
        };
        if status == DeliveryStatus::Accepted {
            broadcast(&clinks);
        }
        status
    }

    // Task side.

    fn wakeup(&self) {
        let post = {
            let mut state = self.lock();
            if state.waking_up || state.task_is_stopping {
                state.stats.wakeups_coalesced += 1;
                false
            } else {
                state.waking_up = true;
                state.stats.wakeups_posted += 1;
                true
            }
        };
        if post {
            self.inner.wakeup.notify_one();
        }
    }

    async fn wait_wakeup(&self) {
        self.inner.wakeup.notified().await;
        self.lock().waking_up = false;
    }

    fn set_phase(&self, phase: LinkPhase) {
        self.lock().phase = phase;
    }

    fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    fn reconnect_pending(&self) -> bool {
        self.lock().reconnect
    }

    fn take_reconnect_cfg(&self) -> Option<LinkConnCfg> {
        let mut state = self.lock();
        if !state.reconnect {
            return None;
        }
        let conn = state.reconnect_cfg.take()?;
        state.reconnect = false;
        state.failure = None;
        state.conn = Some(conn.clone());
        Some(conn)
    }

    fn idle_step(&self) -> IdleStep {
        self.with_broadcast(|state| {
            if state.stop_requested {
                state.task_is_stopping = true;
                let drained = state.drain_outbound();
                if drained > 0 {
                    debug!(link = %self.id(), drained, "outbound drained to not-delivered");
                }
                IdleStep::Stop
            } else if state.reconnect {
                IdleStep::Reconnect
            } else if let Some(msg) = state.q_out.dequeue() {
                state.in_flight = Some(msg);
                IdleStep::Send
            } else {
                IdleStep::Wait
            }
        })
    }

    fn post_in_flight(
        &self,
        post: impl FnOnce(&Message) -> Result<PostReceipt, TransportError>,
    ) -> Option<Result<PostReceipt, TransportError>> {
        let state = self.lock();
        state.in_flight.as_ref().map(post)
    }

    fn complete_in_flight(&self, delivered: bool) {
        self.with_broadcast(|state| {
            if let Some(msg) = state.in_flight.take() {
                state.file(msg, delivered);
            }
        });
    }

    fn fail(&self, reason: String) {
        warn!(link = %self.id(), %reason, "link failed");
        self.with_broadcast(|state| {
            state.failure = Some(reason);
            state.phase = LinkPhase::Failed;
        });
    }

    fn drain_outbound(&self) {
        self.with_broadcast(|state| {
            state.task_is_stopping = true;
            state.drain_outbound();
        });
    }

    fn finish(&self) {
        self.with_broadcast(|state| state.phase = LinkPhase::Finish);
        self.inner.done.send_replace(true);
        debug!(link = %self.id(), "link task finished");
    }
}
