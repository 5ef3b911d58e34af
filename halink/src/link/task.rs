//! The link task: one per started link, owns the transport session.
//!
//! Shutdown and reconnect requests are only looked at in `Idle` (or while
//! parked), so a message that reached the in-flight slot always gets a
//! verdict before the session goes away.

use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use super::{IdleStep, Link, LinkPhase};
use crate::config::LinkConnCfg;
use crate::error::TransportError;
use crate::providers::{Providers, TimeProvider};
use crate::transport::{DeliveryStatus, Session, Transport};

pub(super) async fn run<P: Providers>(link: Link, providers: P, mut conn: LinkConnCfg) {
    let id = link.id();
    let mut session: Option<Box<dyn Session>> = None;
    let mut replied: Option<oneshot::Receiver<DeliveryStatus>> = None;
    let mut released: Option<oneshot::Receiver<()>> = None;
    let mut phase = LinkPhase::Init;

    loop {
        link.set_phase(phase);
        trace!(link = %id, ?phase, "link task");

        phase = match phase {
            LinkPhase::Init => LinkPhase::TransportInit,
            LinkPhase::TransportInit => LinkPhase::NotConnected,
            LinkPhase::NotConnected => {
                if link.stop_requested() {
                    LinkPhase::TransportFini
                } else if link.reconnect_pending() {
                    match link.take_reconnect_cfg() {
                        Some(cfg) => {
                            conn = cfg;
                            LinkPhase::Connect
                        }
                        None => {
                            link.wait_wakeup().await;
                            LinkPhase::NotConnected
                        }
                    }
                } else {
                    LinkPhase::Connect
                }
            }
            LinkPhase::Connect => {
                debug!(link = %id, endpoint = %conn.endpoint, "connecting");
                LinkPhase::Connecting
            }
            LinkPhase::Connecting => {
                let opened = providers
                    .time()
                    .timeout(
                        conn.connect_timeout,
                        providers.transport().open(&conn.endpoint),
                    )
                    .await;
                match opened {
                    Ok(Ok(s)) => {
                        debug!(link = %id, endpoint = %conn.endpoint, "connected");
                        session = Some(s);
                        LinkPhase::Idle
                    }
                    Ok(Err(e)) => {
                        link.fail(e.to_string());
                        LinkPhase::Failed
                    }
                    Err(_) => {
                        link.fail(format!(
                            "connect to {} timed out after {:?}",
                            conn.endpoint, conn.connect_timeout
                        ));
                        LinkPhase::Failed
                    }
                }
            }
            LinkPhase::Failed => {
                if link.stop_requested() {
                    LinkPhase::TransportFini
                } else if let Some(cfg) = link.take_reconnect_cfg() {
                    conn = cfg;
                    LinkPhase::Connect
                } else {
                    link.wait_wakeup().await;
                    LinkPhase::Failed
                }
            }
            LinkPhase::Idle => match link.idle_step() {
                IdleStep::Stop | IdleStep::Reconnect => LinkPhase::Disconnect,
                IdleStep::Send => LinkPhase::Send,
                IdleStep::Wait => {
                    link.wait_wakeup().await;
                    LinkPhase::Idle
                }
            },
            LinkPhase::Send => {
                let posted = match &session {
                    Some(s) => link.post_in_flight(|msg| s.post(msg)),
                    None => Some(Err(TransportError::Closed)),
                };
                match posted {
                    Some(Ok(receipt)) => {
                        replied = Some(receipt.replied);
                        released = Some(receipt.released);
                        LinkPhase::WaitReply
                    }
                    Some(Err(e)) => {
                        warn!(link = %id, error = %e, "post failed");
                        link.complete_in_flight(false);
                        LinkPhase::Idle
                    }
                    None => LinkPhase::Idle,
                }
            }
            LinkPhase::WaitReply => {
                let status = match replied.take() {
                    Some(rx) => rx.await.ok(),
                    None => None,
                };
                let delivered = status == Some(DeliveryStatus::Accepted);
                if !delivered {
                    debug!(link = %id, ?status, "message not delivered");
                }
                link.complete_in_flight(delivered);
                LinkPhase::WaitRelease
            }
            LinkPhase::WaitRelease => {
                if let Some(rx) = released.take() {
                    let _ = rx.await;
                }
                LinkPhase::Idle
            }
            LinkPhase::Disconnect => LinkPhase::Disconnecting,
            LinkPhase::Disconnecting => {
                if let Some(s) = session.take() {
                    let closed = providers
                        .time()
                        .timeout(conn.disconnect_timeout, s.close())
                        .await;
                    match closed {
                        Ok(Ok(())) => debug!(link = %id, "disconnected"),
                        Ok(Err(e)) => warn!(link = %id, error = %e, "disconnect failed"),
                        Err(_) => warn!(link = %id, "disconnect timed out"),
                    }
                }
                LinkPhase::NotConnected
            }
            LinkPhase::TransportFini => {
                link.drain_outbound();
                LinkPhase::Finish
            }
            LinkPhase::Finish => {
                link.finish();
                break;
            }
        };
    }
}
