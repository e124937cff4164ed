//! Outbound transfers.
//!
//! `OutboundTransfer` is a step machine. Each `step` either sends the next
//! fragment, asks the caller to wait because the peer's send queue is over
//! the ceiling, or finishes. Two exits are distinct:
//!
//! - the queue stays over the ceiling for longer than the send timeout: the
//!   peer gets `ConnectFailed` and is disconnected (`TimedOut`)
//! - the peer is gone when the next fragment is due: the transfer stops
//!   without touching the link (`Aborted`)
//!
//! `send_payload` drives it on tokio; `send_payload_blocking` drives it on
//! the calling thread for shutdown and disconnect paths.

use bytes::Bytes;
use hk_chunks::{compress, split_fragments};
use hk_core::{DisconnectCode, HkResult};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::context::{TransferContext, TransferSettings};
use crate::link::PeerLink;

/// Poll interval for the blocking driver.
pub const BLOCKING_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Completed { fragments: u32 },
    /// Peer went away mid-transfer
    Aborted { sent: u32 },
    /// Queue never drained; peer was disconnected
    TimedOut { sent: u32 },
}

impl SendOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Aborted { .. } => "aborted",
            Self::TimedOut { .. } => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStep {
    /// Fragment `index` went out and more remain
    Sent { index: u32 },
    /// Queue is over the ceiling; step again after a pause
    Wait,
    Finished(SendOutcome),
}

#[derive(Debug)]
pub struct OutboundTransfer {
    event: String,
    transfer_id: i64,
    messages: Vec<Bytes>,
    next: usize,
    max_send_queue: usize,
    send_timeout: Duration,
    wait_started: Option<Instant>,
    outcome: Option<SendOutcome>,
}

impl OutboundTransfer {
    /// Compress `payload` and pre-encode every fragment message.
    pub fn new(ctx: &TransferContext, event: &str, payload: &[u8]) -> HkResult<Self> {
        let transfer_id = ctx.next_transfer_id();
        Self::with_id(ctx.settings(), transfer_id, event, payload)
    }

    pub fn with_id(
        settings: &TransferSettings,
        transfer_id: i64,
        event: &str,
        payload: &[u8],
    ) -> HkResult<Self> {
        let compressed = Bytes::from(compress(payload)?);
        let messages = split_fragments(transfer_id, compressed, settings.fragment_size)?
            .iter()
            .map(|f| f.encode())
            .collect::<HkResult<Vec<_>>>()?;

        Ok(Self {
            event: event.to_string(),
            transfer_id,
            messages,
            next: 0,
            max_send_queue: settings.max_send_queue,
            send_timeout: settings.send_timeout,
            wait_started: None,
            outcome: None,
        })
    }

    pub fn transfer_id(&self) -> i64 {
        self.transfer_id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn total(&self) -> u32 {
        self.messages.len() as u32
    }

    pub fn sent(&self) -> u32 {
        self.next as u32
    }

    fn finish(&mut self, outcome: SendOutcome) -> SendStep {
        self.outcome = Some(outcome);
        SendStep::Finished(outcome)
    }

    /// Advance by at most one fragment. Once finished, keeps returning the
    /// same outcome.
    pub fn step<L: PeerLink + ?Sized>(&mut self, link: &L, now: Instant) -> SendStep {
        if let Some(outcome) = self.outcome {
            return SendStep::Finished(outcome);
        }

        if link.send_queue_depth() > self.max_send_queue {
            let started = *self.wait_started.get_or_insert(now);
            if now.saturating_duration_since(started) > self.send_timeout {
                warn!(
                    peer = %link.peer_id(),
                    event = %self.event,
                    transfer_id = self.transfer_id,
                    "disconnecting peer: send queue did not drain within {:?}",
                    self.send_timeout
                );
                link.disconnect_with(DisconnectCode::ConnectFailed);
                return self.finish(SendOutcome::TimedOut { sent: self.sent() });
            }
            return SendStep::Wait;
        }
        self.wait_started = None;

        if !link.is_connected() {
            debug!(
                peer = %link.peer_id(),
                event = %self.event,
                transfer_id = self.transfer_id,
                sent = self.sent(),
                total = self.total(),
                "peer disconnected mid-transfer"
            );
            return self.finish(SendOutcome::Aborted { sent: self.sent() });
        }

        let index = self.next;
        link.send(&self.event, self.messages[index].clone());
        self.next += 1;

        if self.next == self.messages.len() {
            debug!(
                peer = %link.peer_id(),
                event = %self.event,
                transfer_id = self.transfer_id,
                fragments = self.total(),
                "transfer sent"
            );
            self.finish(SendOutcome::Completed {
                fragments: self.total(),
            })
        } else {
            SendStep::Sent { index: index as u32 }
        }
    }
}

/// Drive a transfer on the tokio runtime, sleeping `poll_interval` whenever
/// the queue is full.
pub async fn drive<L: PeerLink + ?Sized>(
    link: &L,
    mut transfer: OutboundTransfer,
    poll_interval: Duration,
) -> SendOutcome {
    loop {
        match transfer.step(link, tokio::time::Instant::now().into_std()) {
            SendStep::Sent { .. } => tokio::task::yield_now().await,
            SendStep::Wait => tokio::time::sleep(poll_interval).await,
            SendStep::Finished(outcome) => return outcome,
        }
    }
}

/// Drive a transfer on the calling thread.
pub fn drive_blocking<L: PeerLink + ?Sized>(link: &L, mut transfer: OutboundTransfer) -> SendOutcome {
    loop {
        match transfer.step(link, Instant::now()) {
            SendStep::Sent { .. } => {}
            SendStep::Wait => std::thread::sleep(BLOCKING_POLL),
            SendStep::Finished(outcome) => return outcome,
        }
    }
}

/// Compress, fragment, and send `payload` under `event`.
pub async fn send_payload<L: PeerLink + ?Sized>(
    ctx: &TransferContext,
    link: &L,
    event: &str,
    payload: &[u8],
) -> HkResult<SendOutcome> {
    let transfer = OutboundTransfer::new(ctx, event, payload)?;
    let (transfer_id, total) = (transfer.transfer_id(), transfer.total());
    let outcome = drive(link, transfer, ctx.settings().poll_interval).await;
    info!(
        peer = %link.peer_id(),
        event,
        transfer_id,
        fragments = total,
        bytes = payload.len(),
        outcome = outcome.as_str(),
        "outbound transfer finished"
    );
    Ok(outcome)
}

/// Blocking variant of `send_payload`.
pub fn send_payload_blocking<L: PeerLink + ?Sized>(
    ctx: &TransferContext,
    link: &L,
    event: &str,
    payload: &[u8],
) -> HkResult<SendOutcome> {
    let transfer = OutboundTransfer::new(ctx, event, payload)?;
    let (transfer_id, total) = (transfer.transfer_id(), transfer.total());
    let outcome = drive_blocking(link, transfer);
    info!(
        peer = %link.peer_id(),
        event,
        transfer_id,
        fragments = total,
        bytes = payload.len(),
        outcome = outcome.as_str(),
        "outbound transfer finished (blocking)"
    );
    Ok(outcome)
}
