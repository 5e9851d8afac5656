//! Federate protocol state
//!
//! [`FederateState`] lives behind its own mutex, which is always taken
//! after the environment mutex. It records the last grant, what was last
//! sent to the coordinator, and the status of every network input port.
//! The port table drives MLAA, the level ceiling that keeps reactions
//! depending on an unresolved input from running.

use tempo_core::{Instant, Interval, PortId, Tag, TriggerId};
use tempo_runtime::{CoordinationMode, Program};

/// MLAA value that lets every level run
pub const UNBOUNDED_LEVEL: usize = usize::MAX;

/// Lifecycle of the connection to the coordinator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    /// Start time agreed, listeners not yet running
    Synchronized,
    Running,
    Resigned,
    Failed,
}

impl ConnectionState {
    /// Messages may still be sent to the coordinator
    pub fn is_open(self) -> bool {
        matches!(
            self,
            ConnectionState::Handshaking | ConnectionState::Synchronized | ConnectionState::Running
        )
    }
}

/// What is known about a network input port at the current tag
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PortStatus {
    #[default]
    Unknown,
    Present,
    Absent,
}

/// Network input port bookkeeping
#[derive(Clone, Debug)]
pub struct InputPort {
    pub port: PortId,
    pub trigger: TriggerId,
    pub status: PortStatus,
    /// Latest tag through which the port's status is known
    pub last_known_status_tag: Tag,
    /// Level of the first reaction the port enables
    pub level: Option<usize>,
    pub delay: Option<Interval>,
    pub staa: Interval,
    pub physical: bool,
}

impl InputPort {
    fn is_zero_delay(&self) -> bool {
        self.delay.is_none()
    }
}

pub struct FederateState {
    mode: CoordinationMode,
    /// Last TAG or PTAG received
    pub last_grant: Tag,
    pub grant_provisional: bool,
    pub last_sent_net: Tag,
    pub last_sent_ltc: Tag,
    pub inputs: Vec<InputPort>,
    mlaa: usize,
    /// The coordinator asked for a stop; local requests are not forwarded
    pub stop_requested_by_coordinator: bool,
    /// Per network output, the tag of the last PORT_ABSENT sent
    absent_sent: Vec<Tag>,
}

impl FederateState {
    pub fn new(program: &Program, mode: CoordinationMode) -> Self {
        let inputs = program
            .network_inputs
            .iter()
            .map(|input| InputPort {
                port: input.port,
                trigger: input.trigger,
                status: PortStatus::Unknown,
                last_known_status_tag: Tag::NEVER,
                level: program
                    .trigger(input.trigger)
                    .reactions
                    .first()
                    .map(|r| program.reaction(*r).level),
                delay: input.delay,
                staa: input.staa,
                physical: input.physical,
            })
            .collect();
        FederateState {
            mode,
            last_grant: Tag::NEVER,
            grant_provisional: false,
            last_sent_net: Tag::NEVER,
            last_sent_ltc: Tag::NEVER,
            inputs,
            mlaa: UNBOUNDED_LEVEL,
            stop_requested_by_coordinator: false,
            absent_sent: vec![Tag::NEVER; program.network_outputs.len()],
        }
    }

    pub fn mode(&self) -> CoordinationMode {
        self.mode
    }

    /// Max level allowed to advance
    pub fn mlaa(&self) -> usize {
        self.mlaa
    }

    pub fn input_index(&self, port: PortId) -> Option<usize> {
        self.inputs.iter().position(|input| input.port == port)
    }

    /// Record a grant. Returns the previous grant if `tag` would move it
    /// backwards, leaving the state untouched.
    pub fn record_grant(&mut self, tag: Tag, provisional: bool) -> Result<(), Tag> {
        if tag < self.last_grant || (tag == self.last_grant && provisional && !self.grant_provisional) {
            return Err(self.last_grant);
        }
        self.last_grant = tag;
        self.grant_provisional = provisional;
        Ok(())
    }

    /// Recompute MLAA for `current`; returns whether it changed.
    ///
    /// Under centralized coordination only a provisional grant of the
    /// current tag (or no grant at all) can hold levels back, and only
    /// zero-delay inputs matter. Under decentralized coordination every
    /// input whose status is behind the current tag does, except near the
    /// start tag where the connection delay covers it.
    pub fn update_max_level(&mut self, current: Tag, start_time: Instant) -> bool {
        let previous = self.mlaa;
        self.mlaa = UNBOUNDED_LEVEL;
        let decentralized = self.mode == CoordinationMode::Decentralized;
        if !decentralized
            && (current < self.last_grant || (current == self.last_grant && !self.grant_provisional))
        {
            return previous != self.mlaa;
        }
        let start = Tag::at(start_time);
        for input in &self.inputs {
            if decentralized {
                let covered = match input.delay {
                    None | Some(0) => current == start,
                    Some(delay) => current <= start.delay_strict(delay),
                };
                if covered {
                    continue;
                }
            } else if !input.is_zero_delay() {
                continue;
            }
            if current > input.last_known_status_tag && !input.physical {
                if let Some(level) = input.level {
                    self.mlaa = self.mlaa.min(level);
                }
            }
        }
        previous != self.mlaa
    }

    /// Advance the last-known-status tag of one input; earlier tags are
    /// ignored. Returns whether anything changed.
    pub fn update_last_known_status(&mut self, index: usize, tag: Tag) -> bool {
        let Some(input) = self.inputs.get_mut(index) else {
            return false;
        };
        if tag > input.last_known_status_tag {
            input.last_known_status_tag = tag;
            true
        } else {
            false
        }
    }

    /// A grant of `tag` settles every input up to `tag`
    pub fn update_all_last_known_status(&mut self, tag: Tag) -> bool {
        let mut changed = false;
        for index in 0..self.inputs.len() {
            changed |= self.update_last_known_status(index, tag);
        }
        changed
    }

    /// A new tag starts with every input unknown
    pub fn reset_port_statuses(&mut self) {
        for input in &mut self.inputs {
            input.status = PortStatus::Unknown;
        }
    }

    pub fn set_status(&mut self, index: usize, status: PortStatus) {
        if let Some(input) = self.inputs.get_mut(index) {
            input.status = status;
        }
    }

    /// Neither a message nor an absence is known for the input at `current`
    pub fn is_unresolved(&self, index: usize, current: Tag) -> bool {
        self.inputs
            .get(index)
            .is_some_and(|input| input.status == PortStatus::Unknown && input.last_known_status_tag < current)
    }

    /// Mark the PORT_ABSENT for `output` at `tag` as sent; false if it
    /// already was.
    pub fn claim_absent(&mut self, output: usize, tag: Tag) -> bool {
        match self.absent_sent.get_mut(output) {
            Some(sent) if *sent < tag => {
                *sent = tag;
                true
            }
            _ => false,
        }
    }

    /// Inputs grouped by STAA, shortest first
    pub fn staa_groups(&self) -> Vec<(Interval, Vec<usize>)> {
        let mut groups: Vec<(Interval, Vec<usize>)> = Vec::new();
        for (index, input) in self.inputs.iter().enumerate() {
            match groups.iter_mut().find(|(staa, _)| *staa == input.staa) {
                Some((_, members)) => members.push(index),
                None => groups.push((input.staa, vec![index])),
            }
        }
        groups.sort_by_key(|(staa, _)| *staa);
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempo_core::{FederateId, MSEC};
    use tempo_runtime::ProgramBuilder;

    /// Two zero-delay inputs feeding levels 1 and 3, one delayed input at level 2
    fn program() -> Program {
        let mut b = ProgramBuilder::new("ports");
        let a = b.network_input("a", PortId::new(0), None, 0);
        let c = b.network_input("c", PortId::new(1), None, 2 * MSEC);
        let d = b.network_input("d", PortId::new(2), Some(5 * MSEC), MSEC);
        b.reaction("ra", 1, |_| {}).triggered_by(a).input_reaction().add();
        b.reaction("rd", 2, |_| {}).triggered_by(d).input_reaction().add();
        b.reaction("rc", 3, |_| {}).triggered_by(c).input_reaction().add();
        let out = b.port("out");
        b.reaction("w", 0, |_| {}).writes(out).add();
        b.network_output(out, PortId::new(0), FederateId::new(1), None, 0);
        b.build().unwrap()
    }

    #[test]
    fn test_port_table() {
        let state = FederateState::new(&program(), CoordinationMode::Centralized);
        assert_eq!(state.inputs.len(), 3);
        assert_eq!(state.inputs[0].level, Some(1));
        assert_eq!(state.inputs[1].level, Some(3));
        assert_eq!(state.input_index(PortId::new(2)), Some(2));
        assert_eq!(state.input_index(PortId::new(7)), None);
        assert_eq!(state.mlaa(), UNBOUNDED_LEVEL);
    }

    #[test]
    fn test_centralized_mlaa_follows_grant() {
        let mut state = FederateState::new(&program(), CoordinationMode::Centralized);
        let current = Tag::at(10 * MSEC);

        state.record_grant(Tag::at(20 * MSEC), false).unwrap();
        assert!(!state.update_max_level(current, 0));
        assert_eq!(state.mlaa(), UNBOUNDED_LEVEL);

        // A provisional grant of the current tag holds zero-delay inputs back.
        let mut state = FederateState::new(&program(), CoordinationMode::Centralized);
        state.record_grant(current, true).unwrap();
        assert!(state.update_max_level(current, 0));
        assert_eq!(state.mlaa(), 1);

        state.update_last_known_status(0, current);
        state.update_max_level(current, 0);
        assert_eq!(state.mlaa(), 3);

        // The full grant of the same tag lifts the ceiling.
        state.record_grant(current, false).unwrap();
        state.update_max_level(current, 0);
        assert_eq!(state.mlaa(), UNBOUNDED_LEVEL);
    }

    #[test]
    fn test_decentralized_mlaa_skips_covered_start() {
        let mut state = FederateState::new(&program(), CoordinationMode::Decentralized);
        state.update_max_level(Tag::at(0), 0);
        assert_eq!(state.mlaa(), UNBOUNDED_LEVEL);

        // Past the start tag the zero-delay inputs block; the delayed one
        // is still covered by its 5ms delay.
        state.update_max_level(Tag::at(MSEC), 0);
        assert_eq!(state.mlaa(), 1);
        state.update_max_level(Tag::at(6 * MSEC), 0);
        assert_eq!(state.mlaa(), 1);
        state.update_last_known_status(0, Tag::at(6 * MSEC));
        state.update_last_known_status(1, Tag::at(6 * MSEC));
        state.update_max_level(Tag::at(6 * MSEC), 0);
        assert_eq!(state.mlaa(), 2);
    }

    #[test]
    fn test_grant_regression_rejected() {
        let mut state = FederateState::new(&program(), CoordinationMode::Centralized);
        state.record_grant(Tag::at(100), false).unwrap();
        assert_eq!(state.record_grant(Tag::at(50), false), Err(Tag::at(100)));
        assert_eq!(state.record_grant(Tag::at(100), true), Err(Tag::at(100)));
        assert_eq!(state.last_grant, Tag::at(100));
        assert!(!state.grant_provisional);
        assert!(state.record_grant(Tag::at(100), false).is_ok());
    }

    #[test]
    fn test_absent_sent_once_per_tag() {
        let mut state = FederateState::new(&program(), CoordinationMode::Centralized);
        assert!(state.claim_absent(0, Tag::at(5)));
        assert!(!state.claim_absent(0, Tag::at(5)));
        assert!(state.claim_absent(0, Tag::new(5, 1)));
        assert!(!state.claim_absent(3, Tag::at(9)));
    }

    #[test]
    fn test_staa_groups_sorted() {
        let state = FederateState::new(&program(), CoordinationMode::Decentralized);
        let groups = state.staa_groups();
        assert_eq!(groups, vec![(0, vec![0]), (MSEC, vec![2]), (2 * MSEC, vec![1])]);
    }

    #[derive(Clone, Debug)]
    enum Update {
        Grant(i64, bool),
        Port(usize, i64),
    }

    fn update() -> impl Strategy<Value = Update> {
        prop_oneof![
            (0i64..40, any::<bool>()).prop_map(|(t, p)| Update::Grant(t, p)),
            (0usize..3, 0i64..40).prop_map(|(i, t)| Update::Port(i, t)),
        ]
    }

    proptest! {
        #[test]
        fn mlaa_never_decreases_within_a_tag(
            decentralized in any::<bool>(),
            current in 1i64..30,
            updates in prop::collection::vec(update(), 1..40),
        ) {
            let mode = if decentralized { CoordinationMode::Decentralized } else { CoordinationMode::Centralized };
            let mut state = FederateState::new(&program(), mode);
            let current = Tag::at(current);
            state.update_max_level(current, 0);
            let mut floor = state.mlaa();
            for update in updates {
                match update {
                    Update::Grant(t, provisional) => {
                        // Grants never move past what the loop is allowed to reach.
                        let _ = state.record_grant(Tag::at(t).max(current), provisional);
                    }
                    Update::Port(index, t) => {
                        state.update_last_known_status(index, Tag::at(t));
                    }
                }
                state.update_max_level(current, 0);
                prop_assert!(state.mlaa() >= floor);
                floor = state.mlaa();
            }
        }
    }
}
