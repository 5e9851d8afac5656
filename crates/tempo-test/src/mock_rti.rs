//! Scripted coordinator for federation tests
//!
//! [`MockRti`] answers one federate over an in-memory link. It accepts the
//! handshake, echoes the proposed start time, and hands every other message
//! to a [`Script`] that decides the replies. Everything the federate sends
//! is recorded for later assertions.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};

use tempo_core::{Instant, Tag};
use tempo_transport::{channel_pair, ChannelLink, Link, LinkEvent, LinkReceiver};
use tempo_wire::Message;

/// What a script sees besides the message itself
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RtiView {
    /// Agreed start time, `None` before the TIMESTAMP exchange
    pub start_time: Option<Instant>,
}

impl RtiView {
    /// Tag `offset` after the start time
    pub fn at(&self, offset: i64) -> Tag {
        Tag::at(self.start_time.unwrap_or(0).saturating_add(offset))
    }
}

/// Replies to one federate message
pub type Script = Box<dyn FnMut(&RtiView, &Message) -> Vec<Message> + Send>;

/// Grant every NET with a TAG and every stop request as proposed
pub fn grant_all() -> Script {
    Box::new(|_, message| match message {
        Message::NextEventTag(tag) => vec![Message::TagAdvanceGrant(*tag)],
        Message::StopRequest(tag) => vec![Message::StopGranted(*tag)],
        _ => Vec::new(),
    })
}

/// Random delay before each scripted reply
#[derive(Clone, Copy, Debug)]
pub struct ReplyJitter {
    pub min_ms: u64,
    pub max_ms: u64,
    pub seed: u64,
}

impl ReplyJitter {
    pub fn none() -> Self {
        ReplyJitter {
            min_ms: 0,
            max_ms: 0,
            seed: 0,
        }
    }
}

/// How the coordinator answers FED_IDS
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Accept,
    Reject(u8),
}

pub struct MockRti {
    handle: Option<JoinHandle<()>>,
    received: Arc<Mutex<Vec<Message>>>,
}

/// Federate end of a mock coordinator connection
pub struct FederateEnd {
    pub link: ChannelLink,
    pub events: LinkReceiver,
}

impl MockRti {
    /// Start a coordinator thread and return the federate's end of the link
    pub fn spawn(script: Script) -> (MockRti, FederateEnd) {
        Self::spawn_with(Admission::Accept, ReplyJitter::none(), script)
    }

    pub fn spawn_with(admission: Admission, jitter: ReplyJitter, script: Script) -> (MockRti, FederateEnd) {
        let ((link, events), (coordinator, inbox)) = channel_pair();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);
        let handle = thread::Builder::new()
            .name("mock-rti".into())
            .spawn(move || serve(coordinator, inbox, admission, jitter, script, &log))
            .ok();
        (MockRti { handle, received }, FederateEnd { link, events })
    }

    /// Messages received so far, in arrival order
    pub fn received(&self) -> Vec<Message> {
        self.received.lock().clone()
    }

    /// Wait for the federate to close its link and return every message.
    /// The federate end must be closed or dropped first.
    pub fn join(mut self) -> Vec<Message> {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Mock coordinator panicked");
            }
        }
        self.received()
    }
}

fn serve(
    coordinator: ChannelLink,
    mut inbox: LinkReceiver,
    admission: Admission,
    jitter: ReplyJitter,
    mut script: Script,
    log: &Mutex<Vec<Message>>,
) {
    let mut view = RtiView { start_time: None };
    let mut rng = StdRng::seed_from_u64(jitter.seed);
    let delay = (jitter.max_ms > jitter.min_ms).then(|| Uniform::new(jitter.min_ms, jitter.max_ms));

    while let Some(event) = inbox.recv_blocking() {
        let message = match event {
            LinkEvent::Message(message) => message,
            LinkEvent::Closed | LinkEvent::Broken(_) | LinkEvent::Corrupt(_) => break,
        };
        debug!("Mock coordinator received {:?}", message);
        log.lock().push(message.clone());

        let replies = match &message {
            Message::FedIds { .. } => match admission {
                Admission::Accept => vec![Message::Ack],
                Admission::Reject(cause) => vec![Message::Reject(cause)],
            },
            Message::Timestamp(proposed) => {
                view.start_time = Some(*proposed);
                vec![Message::Timestamp(*proposed)]
            }
            Message::Resign | Message::Failed => Vec::new(),
            other => script(&view, other),
        };
        for reply in replies {
            if let Some(dist) = &delay {
                thread::sleep(Duration::from_millis(dist.sample(&mut rng)));
            }
            if coordinator.send(&reply).is_err() {
                return;
            }
        }
    }
    coordinator.close();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_and_grants() {
        let (rti, mut fed) = MockRti::spawn(grant_all());
        fed.link
            .send(&Message::FedIds {
                federate: tempo_core::FederateId::new(1),
                federation_id: "f".into(),
            })
            .unwrap();
        assert_eq!(fed.events.recv_blocking(), Some(LinkEvent::Message(Message::Ack)));
        fed.link.send(&Message::Timestamp(42)).unwrap();
        assert_eq!(fed.events.recv_blocking(), Some(LinkEvent::Message(Message::Timestamp(42))));
        fed.link.send(&Message::NextEventTag(Tag::at(50))).unwrap();
        assert_eq!(
            fed.events.recv_blocking(),
            Some(LinkEvent::Message(Message::TagAdvanceGrant(Tag::at(50))))
        );
        fed.link.send(&Message::Resign).unwrap();
        fed.link.close();
        let received = rti.join();
        assert_eq!(received.len(), 4);
        assert_eq!(received.last(), Some(&Message::Resign));
    }

    #[test]
    fn test_rejecting_coordinator() {
        let (_rti, mut fed) = MockRti::spawn_with(Admission::Reject(3), ReplyJitter::none(), grant_all());
        fed.link
            .send(&Message::FedIds {
                federate: tempo_core::FederateId::new(9),
                federation_id: "f".into(),
            })
            .unwrap();
        assert_eq!(fed.events.recv_blocking(), Some(LinkEvent::Message(Message::Reject(3))));
    }

    #[test]
    fn test_view_offsets_from_start() {
        let view = RtiView { start_time: Some(1_000) };
        assert_eq!(view.at(250), Tag::at(1_250));
        assert_eq!(RtiView { start_time: None }.at(5), Tag::at(5));
    }
}
