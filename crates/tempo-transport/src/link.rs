//! Message links
//!
//! A link is the outbound half of a connection; inbound traffic arrives as
//! [`LinkEvent`]s on a [`LinkReceiver`] fed by a background receive loop.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use tempo_core::{TempoError, TempoResult};
use tempo_wire::Message;

/// Outbound half of a connection
pub trait Link: Send + Sync {
    /// Send one message. Fails once the link is closed.
    fn send(&self, message: &Message) -> TempoResult<()>;

    /// Close the connection; the remote side observes EOF
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// What the receive loop observed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Message(Message),
    /// Orderly EOF between messages
    Closed,
    /// Connection reset or other I/O failure
    Broken(String),
    /// Stream ended or failed in the middle of a message
    Corrupt(TempoError),
}

/// Inbound event channel sender
pub type EventSender = mpsc::UnboundedSender<LinkEvent>;

/// Inbound half of a connection
pub struct LinkReceiver {
    rx: mpsc::UnboundedReceiver<LinkEvent>,
}

impl LinkReceiver {
    pub fn channel() -> (EventSender, LinkReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, LinkReceiver { rx })
    }

    /// Block the calling (non-async) thread for the next event.
    ///
    /// Returns `None` once every sender is gone.
    pub fn recv_blocking(&mut self) -> Option<LinkEvent> {
        self.rx.blocking_recv()
    }

    /// Await the next event
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<LinkEvent> {
        self.rx.try_recv().ok()
    }
}

/// In-memory link, one end of a [`channel_pair`]
pub struct ChannelLink {
    peer: EventSender,
    closed: AtomicBool,
}

impl ChannelLink {
    pub fn new(peer: EventSender) -> Self {
        ChannelLink {
            peer,
            closed: AtomicBool::new(false),
        }
    }
}

impl Link for ChannelLink {
    fn send(&self, message: &Message) -> TempoResult<()> {
        if self.is_closed() {
            return Err(TempoError::TransportError("link closed".into()));
        }
        // Round-trip through the codec so in-memory links enforce the
        // same limits as sockets.
        let bytes = message.to_bytes()?;
        let (decoded, _) = Message::decode(&bytes)?;
        self.peer
            .send(LinkEvent::Message(decoded))
            .map_err(|_| TempoError::TransportError("peer dropped".into()))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.peer.send(LinkEvent::Closed);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Two connected in-memory endpoints
pub fn channel_pair() -> ((ChannelLink, LinkReceiver), (ChannelLink, LinkReceiver)) {
    let (to_a, a_rx) = LinkReceiver::channel();
    let (to_b, b_rx) = LinkReceiver::channel();
    ((ChannelLink::new(to_b), a_rx), (ChannelLink::new(to_a), b_rx))
}
