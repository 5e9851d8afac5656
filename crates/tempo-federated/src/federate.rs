//! One federate of a federation
//!
//! [`Federate`] implements [`Coordination`] for environment 0 of a runtime.
//! It owns the link to the coordinator, optional direct links to peer
//! federates, and the protocol state. Messages are applied by listener
//! threads; the tag-advancement loop and the workers reach the federate
//! through the coordination hooks.
//!
//! Lock order: environment mutex, then the protocol state mutex, then the
//! connection mutex. Sends never hold the environment mutex of another
//! environment.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, trace, warn};

use tempo_core::{FederateId, Instant, Interval, PortId, Tag, TempoError, TempoResult, FOREVER};
use tempo_runtime::{Coordination, CoordinationMode, EnvState, Environment, NetworkOutputSpec, Program};
use tempo_transport::{Link, LinkEvent, LinkReceiver, RtiAddress, TcpLink};
use tempo_wire::{Message, RejectCause, TaggedPayload};

use crate::{listener, staa, ConnectionState, FederateConfig, FederateState, PortStatus};

pub struct Federate {
    me: Weak<Federate>,
    config: FederateConfig,
    rti: Arc<dyn Link>,
    /// Coordinator events, read directly until the listener takes over
    rti_events: Mutex<Option<LinkReceiver>>,
    outbound_peers: RwLock<HashMap<FederateId, Arc<dyn Link>>>,
    inbound_peers: Mutex<Vec<(FederateId, LinkReceiver)>>,
    connection: Mutex<ConnectionState>,
    state: Mutex<FederateState>,
    env: OnceLock<Weak<Environment>>,
}

impl Federate {
    /// Federate over an already established coordinator link
    pub fn new(
        config: FederateConfig,
        program: &Program,
        rti: Arc<dyn Link>,
        events: LinkReceiver,
    ) -> TempoResult<Arc<Self>> {
        config.validate()?;
        let state = FederateState::new(program, config.mode);
        Ok(Arc::new_cyclic(|me| Federate {
            me: me.clone(),
            config,
            rti,
            rti_events: Mutex::new(Some(events)),
            outbound_peers: RwLock::new(HashMap::new()),
            inbound_peers: Mutex::new(Vec::new()),
            connection: Mutex::new(ConnectionState::Disconnected),
            state: Mutex::new(state),
            env: OnceLock::new(),
        }))
    }

    /// Connect to the coordinator over TCP and join the federation
    pub fn connect(config: FederateConfig, program: &Program, address: &RtiAddress) -> TempoResult<Arc<Self>> {
        let addr = address.resolve()?;
        info!(federate = %config.federate, "Connecting to coordinator at {}", address);
        let (link, events) = TcpLink::connect(addr)?;
        let federate = Federate::new(config, program, Arc::new(link), events)?;
        federate.handshake()?;
        Ok(federate)
    }

    pub fn config(&self) -> &FederateConfig {
        &self.config
    }

    pub fn id(&self) -> FederateId {
        self.config.federate
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.lock()
    }

    fn set_connection(&self, next: ConnectionState) {
        let mut connection = self.connection.lock();
        if *connection != next {
            debug!(federate = %self.config.federate, "Connection {:?} -> {:?}", *connection, next);
            *connection = next;
        }
    }

    /// Protocol state, for inspection. Do not hold it while taking an
    /// environment lock.
    pub fn protocol_state(&self) -> MutexGuard<'_, FederateState> {
        self.state.lock()
    }

    /// Direct link used for tagged messages and absences sent to `peer`
    pub fn add_outbound_peer(&self, peer: FederateId, link: Arc<dyn Link>) {
        self.outbound_peers.write().insert(peer, link);
    }

    /// Events from a peer; a listener thread is started with the federate
    pub fn add_inbound_peer(&self, peer: FederateId, events: LinkReceiver) {
        self.inbound_peers.lock().push((peer, events));
    }

    /// Bind the environment this federate coordinates
    pub fn attach(&self, env: &Arc<Environment>) {
        if self.env.set(Arc::downgrade(env)).is_err() {
            debug!(federate = %self.config.federate, "Environment already attached");
        }
    }

    pub(crate) fn environment(&self) -> Option<Arc<Environment>> {
        self.env.get().and_then(Weak::upgrade)
    }

    // Startup

    /// Identify to the coordinator and wait for it to accept this federate
    pub fn handshake(&self) -> TempoResult<()> {
        self.set_connection(ConnectionState::Handshaking);
        let federate = self.config.federate;
        self.rti.send(&Message::FedIds {
            federate,
            federation_id: self.config.federation_id.clone(),
        })?;
        match self.recv_from_rti()? {
            Message::Ack | Message::UdpPort(_) => {
                info!(federate = %federate, "Joined federation {}", self.config.federation_id);
                Ok(())
            }
            Message::Reject(cause) => {
                self.set_connection(ConnectionState::Failed);
                match RejectCause::from_byte(cause) {
                    Some(reason) => error!(federate = %federate, "Coordinator rejected the federate: {:?}", reason),
                    None => error!(federate = %federate, "Coordinator rejected the federate with unknown cause {}", cause),
                }
                Err(TempoError::HandshakeRejected { federate, cause })
            }
            other => Err(TempoError::ProtocolDesync(format!(
                "expected an ACK to FED_IDS, got {:?}",
                other.message_type()
            ))),
        }
    }

    /// Block for the next coordinator message before the listener runs
    fn recv_from_rti(&self) -> TempoResult<Message> {
        let mut events = self.rti_events.lock();
        let rx = events
            .as_mut()
            .ok_or_else(|| TempoError::ProtocolDesync("coordinator listener already running".into()))?;
        match rx.recv_blocking() {
            Some(LinkEvent::Message(message)) => {
                debug!(federate = %self.config.federate, "Received {:?}", message.message_type());
                Ok(message)
            }
            Some(LinkEvent::Corrupt(err)) => Err(TempoError::ProtocolDesync(err.to_string())),
            Some(LinkEvent::Broken(reason)) => Err(TempoError::CoordinatorLost(reason)),
            Some(LinkEvent::Closed) | None => Err(TempoError::CoordinatorLost("closed during startup".into())),
        }
    }

    fn exchange_start_time(&self, local_start: Instant) -> TempoResult<Instant> {
        if self.connection_state() == ConnectionState::Disconnected {
            self.handshake()?;
        }
        self.rti.send(&Message::Timestamp(local_start))?;
        match self.recv_from_rti()? {
            Message::Timestamp(start) => {
                info!(
                    federate = %self.config.federate,
                    "Start time {} agreed (proposed {})", start, local_start
                );
                self.set_connection(ConnectionState::Synchronized);
                Ok(start)
            }
            other => Err(TempoError::ProtocolDesync(format!(
                "expected TIMESTAMP, got {:?}",
                other.message_type()
            ))),
        }
    }

    fn spawn_listeners(&self) -> TempoResult<()> {
        let me = self
            .me
            .upgrade()
            .ok_or_else(|| TempoError::InvalidConfig("federate dropped during startup".into()))?;
        if let Some(events) = self.rti_events.lock().take() {
            listener::spawn_coordinator_listener(Arc::clone(&me), events)?;
        }
        let peers: Vec<(FederateId, LinkReceiver)> = self.inbound_peers.lock().drain(..).collect();
        for (peer, events) in peers {
            listener::spawn_peer_listener(Arc::clone(&me), peer, events)?;
        }
        Ok(())
    }

    // Sending

    /// Send to the coordinator; after resignation this only warns
    fn send_to_rti(&self, message: &Message) -> TempoResult<()> {
        let connection = *self.connection.lock();
        if !connection.is_open() {
            warn!(
                federate = %self.config.federate,
                "Dropping {:?}: coordinator connection is {:?}",
                message.message_type(),
                connection
            );
            return Ok(());
        }
        trace!(federate = %self.config.federate, "Sending {:?}", message);
        self.rti.send(message)
    }

    /// Send to `peer` directly when a link exists, else through the coordinator
    fn send_toward(&self, peer: FederateId, direct: Message, relayed: Message) -> TempoResult<()> {
        let link = match self.config.mode {
            CoordinationMode::Decentralized => self.outbound_peers.read().get(&peer).cloned(),
            _ => None,
        };
        match link {
            Some(link) => {
                trace!(federate = %self.config.federate, "Sending {:?} to federate {}", direct, peer);
                link.send(&direct)
            }
            None => self.send_to_rti(&relayed),
        }
    }

    fn send_net(&self, tag: Tag) {
        self.state.lock().last_sent_net = tag;
        debug!(federate = %self.config.federate, "Sending NET {}", tag);
        if let Err(err) = self.send_to_rti(&Message::NextEventTag(tag)) {
            warn!(federate = %self.config.federate, "NET {} not sent: {}", tag, err);
        }
    }

    /// Send LTC unless an equal or later one went out already
    fn send_ltc(&self, fed: &mut FederateState, tag: Tag) {
        if fed.last_sent_ltc >= tag {
            return;
        }
        fed.last_sent_ltc = tag;
        debug!(federate = %self.config.federate, "Sending LTC {}", tag);
        if let Err(err) = self.send_to_rti(&Message::LatestTagComplete(tag)) {
            warn!(federate = %self.config.federate, "LTC {} not sent: {}", tag, err);
        }
    }

    /// Cap a NET at what physical actions could still produce
    fn bounded_net(&self, env: &Environment, tag: Tag) -> Option<Tag> {
        let min_delay = self.config.min_delay_from_physical_action_to_output?;
        if !self.config.has_downstream {
            return None;
        }
        let bound = env.clock().now().saturating_add(min_delay);
        if bound < tag.time {
            let bounded = Tag::at(bound - 1);
            debug!(federate = %self.config.federate, "Physical actions bound NET {} to {}", tag, bounded);
            Some(bounded)
        } else {
            None
        }
    }

    /// Wait on the event queue until a grant covers `tag` or the next
    /// event, re-sending NET when the queue head moves
    fn wait_for_grant(&self, env: &Environment, state: &mut MutexGuard<'_, EnvState>, tag: Tag) -> Tag {
        loop {
            trace!(federate = %self.config.federate, "Waiting for a grant of {}", tag);
            env.wait_event_queue(state, FOREVER);
            if state.failure.is_some() {
                return self.state.lock().last_grant;
            }
            let next = match env.peek_locked(state) {
                Ok(next) => next,
                Err(err) => {
                    env.fail_locked(state, err);
                    return self.state.lock().last_grant;
                }
            };
            let (granted, last_sent) = {
                let fed = self.state.lock();
                (fed.last_grant, fed.last_sent_net)
            };
            if granted >= next || granted >= tag {
                return granted;
            }
            if next != tag && next != last_sent {
                self.send_net(next);
            }
        }
    }

    // Inbound messages

    /// Apply a message received from the coordinator
    pub fn handle_message(&self, message: Message) {
        match message {
            Message::TagAdvanceGrant(tag) => self.handle_grant(tag, false),
            Message::ProvisionalTagAdvanceGrant(tag) => self.handle_grant(tag, true),
            Message::TaggedMessage(payload) | Message::P2pTaggedMessage(payload) => self.handle_tagged(payload),
            Message::PortAbsent { port, tag, .. } => self.handle_port_absent(port, tag),
            Message::StopRequest(tag) => self.handle_stop_request(tag),
            Message::StopGranted(tag) => self.handle_stop_granted(tag),
            Message::Failed => {
                error!(federate = %self.config.federate, "Coordinator failed");
                self.set_connection(ConnectionState::Failed);
                if let Some(env) = self.environment() {
                    env.fail(TempoError::CoordinatorFailed);
                }
            }
            other => warn!(
                federate = %self.config.federate,
                "Ignoring unexpected {:?} from the coordinator",
                other.message_type()
            ),
        }
    }

    fn handle_grant(&self, tag: Tag, provisional: bool) {
        let Some(env) = self.environment() else {
            warn!(federate = %self.config.federate, "Grant {} before start", tag);
            return;
        };
        let mut state = env.lock();
        let mut fed = self.state.lock();
        if let Err(previous) = fed.record_grant(tag, provisional) {
            if provisional {
                drop(fed);
                env.fail_locked(
                    &mut state,
                    TempoError::ProtocolDesync(format!("PTAG {} does not follow grant {}", tag, previous)),
                );
            } else {
                error!(
                    federate = %self.config.federate,
                    "Ignoring TAG {} earlier than the previous grant {}", tag, previous
                );
            }
            return;
        }
        info!(federate = %self.config.federate, provisional, "Granted {}", tag);
        if !provisional {
            fed.update_all_last_known_status(tag);
        }
        env.notify_event_queue();
        if fed.update_max_level(state.current_tag, state.start_time) {
            env.notify_port_status();
        }
        if !provisional {
            return;
        }
        let current = state.current_tag;
        if current > tag {
            // Already past the provisional tag; it is complete.
            self.send_ltc(&mut fed, tag);
        } else if current < tag && !tag.is_forever() {
            drop(fed);
            env.insert_placeholder_locked(&mut state, tag);
        }
    }

    fn handle_tagged(&self, payload: TaggedPayload) {
        let Some(env) = self.environment() else {
            warn!(federate = %self.config.federate, "Message for port {} before start", payload.port);
            return;
        };
        let mut state = env.lock();
        let mut fed = self.state.lock();
        let Some(index) = fed.input_index(payload.port) else {
            warn!(federate = %self.config.federate, "Message for unknown port {}", payload.port);
            return;
        };
        let intended = payload.tag;
        let current = state.current_tag;
        let trigger = fed.inputs[index].trigger;
        let unresolved = fed.is_unresolved(index, intended);
        debug!(
            federate = %self.config.federate,
            "Message for port {} at {} (current {})", payload.port, intended, current
        );
        fed.update_last_known_status(index, intended);

        if !state.execution_started {
            // Anything older than the start tag is delivered at the start tag.
            let at = intended.max(Tag::at(state.start_time));
            if let Err(err) = env.schedule_at_tag_locked(&mut state, trigger, at, Some(payload.body), intended) {
                warn!(federate = %self.config.federate, "Message for port {} dropped: {}", payload.port, err);
            }
        } else if intended <= current && unresolved {
            env.trigger_now_locked(&mut state, trigger, Some(payload.body), intended);
            fed.set_status(index, PortStatus::Present);
        } else if current >= state.stop_tag {
            error!(
                federate = %self.config.federate,
                "Message for port {} at {} arrived after the stop tag {}; discarded",
                payload.port,
                intended,
                state.stop_tag
            );
        } else if intended > current {
            if let Err(err) = env.schedule_at_tag_locked(&mut state, trigger, intended, Some(payload.body), intended) {
                warn!(federate = %self.config.federate, "Message for port {} dropped: {}", payload.port, err);
            }
        } else if self.config.mode == CoordinationMode::Centralized {
            drop(fed);
            env.fail_locked(&mut state, TempoError::StpViolation { intended, current });
            return;
        } else if let Err(err) = env.schedule_locked(&mut state, trigger, 0, Some(payload.body), intended) {
            warn!(federate = %self.config.federate, "Late message for port {} dropped: {}", payload.port, err);
        }

        fed.update_max_level(state.current_tag, state.start_time);
        env.notify_port_status();
    }

    fn handle_port_absent(&self, port: PortId, tag: Tag) {
        let Some(env) = self.environment() else {
            return;
        };
        let state = env.lock();
        let mut fed = self.state.lock();
        let Some(index) = fed.input_index(port) else {
            warn!(federate = %self.config.federate, "Absence for unknown port {}", port);
            return;
        };
        if !fed.update_last_known_status(index, tag) {
            trace!(federate = %self.config.federate, "Stale absence of port {} at {}", port, tag);
            return;
        }
        debug!(federate = %self.config.federate, "Port {} absent through {}", port, tag);
        if tag >= state.current_tag && fed.inputs[index].status == PortStatus::Unknown {
            fed.set_status(index, PortStatus::Absent);
        }
        if fed.update_max_level(state.current_tag, state.start_time) {
            env.notify_port_status();
        }
    }

    fn handle_stop_request(&self, tag: Tag) {
        let Some(env) = self.environment() else {
            return;
        };
        {
            let mut fed = self.state.lock();
            if fed.stop_requested_by_coordinator {
                warn!(federate = %self.config.federate, "Repeated stop request at {}", tag);
            }
            fed.stop_requested_by_coordinator = true;
        }
        let global = Arc::clone(env.global());
        drop(env);
        let stop = global.accept_stop_request(tag);
        info!(federate = %self.config.federate, "Coordinator requested stop at {}; can stop at {}", tag, stop);
        if let Err(err) = self.send_to_rti(&Message::StopRequestReply(stop)) {
            warn!(federate = %self.config.federate, "Stop reply not sent: {}", err);
        }
    }

    fn handle_stop_granted(&self, tag: Tag) {
        let Some(env) = self.environment() else {
            return;
        };
        info!(federate = %self.config.federate, "Stop granted at {}", tag);
        let global = Arc::clone(env.global());
        drop(env);
        global.finish_stop(tag);
    }

    /// The coordinator connection ended between messages
    pub(crate) fn coordinator_lost(&self, reason: String) {
        let previous = {
            let mut connection = self.connection.lock();
            let previous = *connection;
            if previous.is_open() {
                *connection = ConnectionState::Failed;
            }
            previous
        };
        if !previous.is_open() {
            debug!(federate = %self.config.federate, "Coordinator connection closed");
            return;
        }
        warn!(federate = %self.config.federate, "Lost the coordinator: {}", reason);
        if self.config.mode == CoordinationMode::Centralized {
            if let Some(env) = self.environment() {
                env.fail(TempoError::CoordinatorLost(reason));
            }
        }
    }

    /// A message was cut off mid-read; the stream cannot be resynchronized
    pub(crate) fn protocol_desync(&self, err: TempoError) {
        self.set_connection(ConnectionState::Failed);
        if let Some(env) = self.environment() {
            env.fail(TempoError::ProtocolDesync(err.to_string()));
        }
    }
}

impl Coordination for Federate {
    fn mode(&self) -> CoordinationMode {
        self.config.mode
    }

    fn synchronize_start(&self, env: &Arc<Environment>, local_start: Instant) -> TempoResult<Instant> {
        self.attach(env);
        let start = self.exchange_start_time(local_start)?;
        self.spawn_listeners()?;
        self.set_connection(ConnectionState::Running);
        Ok(start)
    }

    fn sta_offset(&self) -> Interval {
        match self.config.mode {
            CoordinationMode::Decentralized => self.config.sta_offset,
            _ => 0,
        }
    }

    fn on_execution_start(&self, env: &Arc<Environment>, state: &mut MutexGuard<'_, EnvState>) -> TempoResult<()> {
        match self.config.mode {
            CoordinationMode::Centralized => {
                let start = state.current_tag;
                let granted = self.next_event_tag(env, state, start);
                debug!(federate = %self.config.federate, "Start tag {} granted up to {}", start, granted);
            }
            CoordinationMode::Decentralized => {
                let me = self
                    .me
                    .upgrade()
                    .ok_or_else(|| TempoError::InvalidConfig("federate dropped during startup".into()))?;
                staa::spawn_staa_thread(me, Arc::clone(env))?;
            }
            CoordinationMode::None => {}
        }
        Ok(())
    }

    fn next_event_tag(&self, env: &Environment, state: &mut MutexGuard<'_, EnvState>, tag: Tag) -> Tag {
        let mut tag = tag;
        loop {
            if self.config.is_isolated() {
                debug!(federate = %self.config.federate, "Granted {}: no upstream or downstream federates", tag);
                return tag;
            }
            let granted = self.state.lock().last_grant;
            if granted >= tag {
                debug!(federate = %self.config.federate, "Granted {}: covered by grant {}", tag, granted);
                return granted;
            }

            let original = tag;
            let Some(bounded) = self.bounded_net(env, tag) else {
                self.send_net(tag);
                if !self.config.has_upstream {
                    debug!(federate = %self.config.federate, "Granted {}: no upstream federates", tag);
                    return tag;
                }
                return self.wait_for_grant(env, state, tag);
            };

            // Make the loop visit the bounded tag so downstream federates
            // learn about progress, then look again.
            env.insert_placeholder_locked(state, bounded);
            let deadline = env
                .clock()
                .now()
                .saturating_add(self.config.advance_message_interval)
                .min(original.time);
            env.wait_event_queue(state, deadline);
            if state.failure.is_some() {
                return original;
            }
            tag = match env.peek_locked(state) {
                Ok(next) => next,
                Err(err) => {
                    env.fail_locked(state, err);
                    return original;
                }
            };
        }
    }

    fn on_tag_started(&self, env: &Environment, state: &mut EnvState) {
        let mut fed = self.state.lock();
        fed.reset_port_statuses();
        if fed.update_max_level(state.current_tag, state.start_time) {
            env.notify_port_status();
        }
    }

    fn stall_level(&self, env: &Environment, level: usize) -> bool {
        let mut state = env.lock();
        loop {
            if state.failure.is_some() {
                return false;
            }
            let mlaa = self.state.lock().mlaa();
            if level < mlaa {
                return true;
            }
            debug!(
                federate = %self.config.federate,
                "Level {} at {} waits for network input (MLAA {})", level, state.current_tag, mlaa
            );
            env.wait_port_status(&mut state, FOREVER);
        }
    }

    fn may_starve(&self) -> bool {
        self.config.is_isolated()
    }

    fn level_allowed(&self, _env: &Environment, level: usize) -> bool {
        level < self.state.lock().mlaa()
    }

    fn level_completed(&self, env: &Environment, level: usize) {
        if self.config.mode == CoordinationMode::Centralized && !self.config.has_downstream {
            return;
        }
        let current = env.current_tag();
        for (index, output) in env.program().network_outputs.iter().enumerate() {
            if output.known_after_level != level || output.physical || env.is_present(output.trigger) {
                continue;
            }
            if !self.state.lock().claim_absent(index, current) {
                continue;
            }
            let tag = match output.delay {
                Some(delay) => current.delay_strict(delay),
                None => current,
            };
            debug!(
                federate = %self.config.federate,
                "Port {} of federate {} absent at {}", output.remote_port, output.destination, tag
            );
            let message = Message::PortAbsent {
                port: output.remote_port,
                federate: output.destination,
                tag,
            };
            if let Err(err) = self.send_toward(output.destination, message.clone(), message) {
                warn!(federate = %self.config.federate, "PORT_ABSENT not sent: {}", err);
            }
        }
    }

    fn tag_completed(&self, _env: &Environment, tag: Tag) {
        let mut fed = self.state.lock();
        self.send_ltc(&mut fed, tag);
    }

    fn request_stop(&self, tag: Tag) -> TempoResult<bool> {
        if !self.connection_state().is_open() {
            return Err(TempoError::CoordinatorLost("not connected".into()));
        }
        info!(federate = %self.config.federate, "Requesting stop at {}", tag);
        self.send_to_rti(&Message::StopRequest(tag))?;
        Ok(true)
    }

    fn send_tagged(&self, env: &Environment, output: &NetworkOutputSpec, tag: Tag, body: Bytes) -> TempoResult<()> {
        let intended = match output.delay {
            Some(delay) => tag.delay(delay),
            None => tag,
        };
        let stop = env.stop_tag();
        if intended > stop {
            debug!(
                federate = %self.config.federate,
                "Not sending to port {} at {}: past the stop tag {}", output.remote_port, intended, stop
            );
            return Ok(());
        }
        let payload = TaggedPayload {
            port: output.remote_port,
            federate: output.destination,
            tag: intended,
            body,
        };
        debug!(
            federate = %self.config.federate,
            "Sending {} bytes to port {} of federate {} at {}",
            payload.body.len(),
            output.remote_port,
            output.destination,
            intended
        );
        self.send_toward(
            output.destination,
            Message::P2pTaggedMessage(payload.clone()),
            Message::TaggedMessage(payload),
        )
    }

    fn workers_exited(&self, _env: &Environment) {
        // Lets the coordinator grant downstream federates up to FOREVER.
        self.send_net(Tag::FOREVER);
    }

    fn finish(&self, failure: Option<&TempoError>) {
        let message = match failure {
            None => Message::Resign,
            Some(err) => {
                error!(federate = %self.config.federate, "Leaving the federation after failure: {}", err);
                Message::Failed
            }
        };
        if let Err(err) = self.send_to_rti(&message) {
            warn!(federate = %self.config.federate, "Could not send {:?}: {}", message.message_type(), err);
        }
        self.set_connection(match failure {
            None => ConnectionState::Resigned,
            Some(_) => ConnectionState::Failed,
        });
        for link in self.outbound_peers.read().values() {
            link.close();
        }
        self.rti.close();
        info!(federate = %self.config.federate, "Left federation {}", self.config.federation_id);
    }
}

impl std::fmt::Debug for Federate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Federate")
            .field("federate", &self.config.federate)
            .field("mode", &self.config.mode)
            .field("connection", &self.connection_state())
            .finish_non_exhaustive()
    }
}
