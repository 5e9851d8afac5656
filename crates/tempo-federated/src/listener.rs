//! Listener threads
//!
//! One thread reads the coordinator link and one reads each inbound peer
//! link. They apply messages to the federate as they arrive and exit when
//! their link closes.

use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use tempo_core::{FederateId, TempoError, TempoResult};
use tempo_transport::{LinkEvent, LinkReceiver};
use tempo_wire::Message;

use crate::Federate;

pub(crate) fn spawn_coordinator_listener(federate: Arc<Federate>, events: LinkReceiver) -> TempoResult<()> {
    let name = format!("tempo-fed{}-rti", federate.id());
    thread::Builder::new()
        .name(name)
        .spawn(move || run_coordinator_listener(&federate, events))
        .map(|_| ())
        .map_err(|e| TempoError::InvalidConfig(format!("cannot spawn coordinator listener: {}", e)))
}

pub(crate) fn spawn_peer_listener(federate: Arc<Federate>, peer: FederateId, events: LinkReceiver) -> TempoResult<()> {
    let name = format!("tempo-fed{}-peer{}", federate.id(), peer);
    thread::Builder::new()
        .name(name)
        .spawn(move || run_peer_listener(&federate, peer, events))
        .map(|_| ())
        .map_err(|e| TempoError::InvalidConfig(format!("cannot spawn peer listener: {}", e)))
}

fn run_coordinator_listener(federate: &Federate, mut events: LinkReceiver) {
    debug!(federate = %federate.id(), "Coordinator listener started");
    loop {
        match events.recv_blocking() {
            Some(LinkEvent::Message(message)) => {
                debug!(federate = %federate.id(), "From coordinator: {:?}", message.message_type());
                federate.handle_message(message);
            }
            Some(LinkEvent::Corrupt(err)) => {
                federate.protocol_desync(err);
                break;
            }
            Some(LinkEvent::Broken(reason)) => {
                federate.coordinator_lost(reason);
                break;
            }
            Some(LinkEvent::Closed) | None => {
                federate.coordinator_lost("connection closed".into());
                break;
            }
        }
    }
    debug!(federate = %federate.id(), "Coordinator listener exited");
}

fn run_peer_listener(federate: &Federate, peer: FederateId, mut events: LinkReceiver) {
    debug!(federate = %federate.id(), "Listening to federate {}", peer);
    loop {
        match events.recv_blocking() {
            Some(LinkEvent::Message(message @ (Message::P2pTaggedMessage(_) | Message::PortAbsent { .. }))) => {
                federate.handle_message(message);
            }
            Some(LinkEvent::Message(other)) => warn!(
                federate = %federate.id(),
                "Ignoring {:?} from federate {}",
                other.message_type(),
                peer
            ),
            Some(LinkEvent::Corrupt(err)) => {
                federate.protocol_desync(err);
                break;
            }
            Some(LinkEvent::Broken(reason)) => {
                warn!(federate = %federate.id(), "Link to federate {} broke: {}", peer, reason);
                break;
            }
            Some(LinkEvent::Closed) | None => break,
        }
    }
    debug!(federate = %federate.id(), "Federate {} closed its link", peer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_core::{PortId, Tag};
    use tempo_runtime::ProgramBuilder;
    use tempo_transport::{channel_pair, Link};

    use crate::{FederateConfig, PortStatus};

    #[test]
    fn test_peer_listener_exits_on_close() {
        let mut b = ProgramBuilder::new("peer");
        let input = b.network_input("in", PortId::new(0), None, 0);
        b.reaction("r", 0, |_| {}).triggered_by(input).input_reaction().add();
        let program = b.build().unwrap();

        let ((rti, rti_events), _coordinator) = channel_pair();
        let federate = Federate::new(
            FederateConfig::decentralized(FederateId::new(1), "fed", 0),
            &program,
            Arc::new(rti),
            rti_events,
        )
        .unwrap();

        let ((peer_link, _), (_, events)) = channel_pair();
        let handle = thread::spawn({
            let federate = Arc::clone(&federate);
            move || run_peer_listener(&federate, FederateId::new(2), events)
        });
        // Without an environment the absence is dropped, but the listener keeps going.
        peer_link
            .send(&Message::PortAbsent {
                port: PortId::new(0),
                federate: FederateId::new(1),
                tag: Tag::at(5),
            })
            .unwrap();
        drop(peer_link);
        handle.join().unwrap();
        assert_eq!(federate.protocol_state().inputs[0].status, PortStatus::Unknown);
    }
}
