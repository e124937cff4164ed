//! Game transport over TCP.
//!
//! Each accepted socket becomes one connection task that owns the framed
//! stream. Inbound envelopes go to the main loop; outbound ones arrive on an
//! unbounded queue whose depth is what the sender's backpressure reads.
//! A peer's identity is its remote IP address.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use hk_core::PeerId;
use hk_sync::{Envelope, EnvelopeCodec, PeerLink};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// Events from connection tasks to the main loop.
#[derive(Debug)]
pub enum NetEvent {
    Connected {
        peer: PeerId,
        identity: String,
        link: Arc<TcpLink>,
    },
    Message {
        peer: PeerId,
        envelope: Envelope,
    },
    Closed {
        peer: PeerId,
    },
}

#[derive(Debug)]
enum Outbound {
    Frame(Envelope),
    /// Flush what is queued, then close
    Close,
}

/// `PeerLink` over a connection task's outbound queue.
#[derive(Debug)]
pub struct TcpLink {
    peer: PeerId,
    tx: mpsc::UnboundedSender<Outbound>,
    depth: Arc<AtomicUsize>,
    connected: Arc<AtomicBool>,
}

impl PeerLink for TcpLink {
    fn peer_id(&self) -> PeerId {
        self.peer
    }

    fn send_queue_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn send(&self, event: &str, body: Bytes) {
        if !self.is_connected() {
            return;
        }
        self.depth.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(Outbound::Frame(Envelope::new(event, body))).is_err() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            self.connected.store(false, Ordering::Relaxed);
        }
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            let _ = self.tx.send(Outbound::Close);
        }
    }
}

/// Spawn the task that owns `stream` until either side closes it.
pub fn spawn_connection(
    peer: PeerId,
    stream: TcpStream,
    addr: SocketAddr,
    max_frame_bytes: usize,
    events: mpsc::UnboundedSender<NetEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let link = Arc::new(TcpLink {
        peer,
        tx,
        depth: Arc::new(AtomicUsize::new(0)),
        connected: Arc::new(AtomicBool::new(true)),
    });

    let connected = NetEvent::Connected {
        peer,
        identity: addr.ip().to_string(),
        link: Arc::clone(&link),
    };
    if events.send(connected).is_err() {
        return;
    }

    let framed = Framed::new(stream, EnvelopeCodec::new(max_frame_bytes));
    tokio::spawn(async move {
        run_connection(peer, framed, rx, &link, &events).await;
        link.connected.store(false, Ordering::Relaxed);
        let _ = events.send(NetEvent::Closed { peer });
    });
}

async fn run_connection(
    peer: PeerId,
    mut framed: Framed<TcpStream, EnvelopeCodec>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    link: &TcpLink,
    events: &mpsc::UnboundedSender<NetEvent>,
) {
    loop {
        tokio::select! {
            inbound = framed.next() => match inbound {
                Some(Ok(envelope)) => {
                    if events.send(NetEvent::Message { peer, envelope }).is_err() {
                        return;
                    }
                }
                Some(Err(e)) => {
                    warn!(peer = %peer, "closing connection on bad frame: {e}");
                    return;
                }
                None => {
                    debug!(peer = %peer, "peer closed the connection");
                    return;
                }
            },
            outbound = rx.recv() => match outbound {
                Some(Outbound::Frame(envelope)) => {
                    link.depth.fetch_sub(1, Ordering::Relaxed);
                    if let Err(e) = framed.send(envelope).await {
                        warn!(peer = %peer, "write failed: {e}");
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    // Frames queued before the close still go out
                    while let Ok(Outbound::Frame(envelope)) = rx.try_recv() {
                        link.depth.fetch_sub(1, Ordering::Relaxed);
                        if framed.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    let _ = SinkExt::<Envelope>::close(&mut framed).await;
                    debug!(peer = %peer, "connection closed by server");
                    return;
                }
            },
        }
    }
}
