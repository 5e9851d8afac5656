//! Static reaction program
//!
//! A [`Program`] is the precomputed description the runtime executes:
//! reactions with their levels, the triggers that enable them, and the
//! network ports a federate exchanges with its peers. Programs are
//! assembled with [`ProgramBuilder`], which validates ids and levels and
//! derives the per-reaction data the scheduler needs.

use std::fmt;
use std::sync::Arc;

use tempo_core::{FederateId, Interval, PortId, ReactionId, TempoError, TempoResult, TriggerId};

use crate::ReactionContext;

/// Reaction body or handler
pub type ReactionBody = Arc<dyn Fn(&mut ReactionContext<'_>) + Send + Sync>;

/// What to do with an event that lands too close to the previous one
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchedulePolicy {
    /// Queue it at the earliest admissible tag
    #[default]
    Defer,
    /// Discard the new event
    Drop,
    /// Overwrite the payload of the pending event
    Replace,
}

/// Kind of trigger
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerKind {
    Timer { offset: Interval, period: Interval },
    LogicalAction,
    PhysicalAction,
    /// Output or input port of a reaction
    Port,
}

/// A trigger and the reactions it enables
#[derive(Clone, Debug)]
pub struct TriggerSpec {
    pub name: String,
    pub kind: TriggerKind,
    /// Minimum delay added to every schedule call (actions only)
    pub min_delay: Interval,
    /// Minimum spacing between consecutive events; 0 disables the check
    pub min_spacing: Interval,
    pub policy: SchedulePolicy,
    /// Enabled reactions, sorted by level
    pub reactions: Vec<ReactionId>,
}

impl TriggerSpec {
    pub fn is_timer(&self) -> bool {
        matches!(self.kind, TriggerKind::Timer { .. })
    }

    pub fn is_physical(&self) -> bool {
        self.kind == TriggerKind::PhysicalAction
    }

    /// Period of a timer, 0 otherwise
    pub fn period(&self) -> Interval {
        match self.kind {
            TriggerKind::Timer { period, .. } => period,
            _ => 0,
        }
    }
}

/// A reaction
#[derive(Clone)]
pub struct ReactionSpec {
    pub name: String,
    /// Topological level; reactions at the same level are independent
    pub level: usize,
    pub deadline: Option<Interval>,
    pub body: ReactionBody,
    pub deadline_handler: Option<ReactionBody>,
    pub stp_handler: Option<ReactionBody>,
    /// Triggers this reaction may set
    pub effects: Vec<TriggerId>,
    /// Triggers read without being enabled by them
    pub uses: Vec<TriggerId>,
    /// Reactions that read a network input port are exempt from STP handling
    pub is_input_reaction: bool,
    /// Mutual-exclusion group (reactions of the same reactor)
    pub reactor: Option<usize>,
    /// Sole highest-level upstream writer, allowing inline execution
    pub last_enabling: Option<ReactionId>,
}

impl fmt::Debug for ReactionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactionSpec")
            .field("name", &self.name)
            .field("level", &self.level)
            .field("deadline", &self.deadline)
            .field("effects", &self.effects)
            .field("is_input_reaction", &self.is_input_reaction)
            .finish_non_exhaustive()
    }
}

/// Network input port of a federate
#[derive(Clone, Debug)]
pub struct NetworkInputSpec {
    pub port: PortId,
    /// Action scheduled when a message arrives
    pub trigger: TriggerId,
    /// Connection delay, `None` for a zero-delay connection
    pub delay: Option<Interval>,
    /// Safe-to-assume-absent wait for decentralized coordination
    pub staa: Interval,
    /// Physical connection: arrivals are stamped with physical time
    pub physical: bool,
}

/// Network output port of a federate
#[derive(Clone, Debug)]
pub struct NetworkOutputSpec {
    /// Local port whose value is forwarded
    pub trigger: TriggerId,
    pub remote_port: PortId,
    pub destination: FederateId,
    pub delay: Option<Interval>,
    /// Level after which the port's value for the tag is final
    pub known_after_level: usize,
    pub physical: bool,
}

/// Precomputed reaction program
#[derive(Clone, Debug)]
pub struct Program {
    pub name: String,
    pub reactions: Vec<ReactionSpec>,
    pub triggers: Vec<TriggerSpec>,
    pub startup: Vec<ReactionId>,
    pub shutdown: Vec<ReactionId>,
    pub network_inputs: Vec<NetworkInputSpec>,
    pub network_outputs: Vec<NetworkOutputSpec>,
    /// Number of levels; always at least one
    pub num_levels: usize,
    /// Reactor-local mutual exclusion groups
    pub num_reactors: usize,
}

impl Program {
    pub fn builder(name: impl Into<String>) -> ProgramBuilder {
        ProgramBuilder::new(name)
    }

    pub fn reaction(&self, id: ReactionId) -> &ReactionSpec {
        &self.reactions[id.index()]
    }

    pub fn trigger(&self, id: TriggerId) -> &TriggerSpec {
        &self.triggers[id.index()]
    }

    /// Reaction counts per level
    pub fn reactions_per_level(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_levels];
        for reaction in &self.reactions {
            counts[reaction.level] += 1;
        }
        counts
    }

    pub fn network_input(&self, port: PortId) -> Option<&NetworkInputSpec> {
        self.network_inputs.iter().find(|input| input.port == port)
    }

    /// Network output fed by a local trigger
    pub fn network_output_for(&self, trigger: TriggerId) -> impl Iterator<Item = &NetworkOutputSpec> {
        self.network_outputs.iter().filter(move |output| output.trigger == trigger)
    }

    /// Timer triggers
    pub fn timers(&self) -> impl Iterator<Item = (TriggerId, &TriggerSpec)> {
        self.triggers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_timer())
            .map(|(i, t)| (TriggerId::new(i as u32), t))
    }
}

/// Builder for [`Program`]
pub struct ProgramBuilder {
    name: String,
    reactions: Vec<ReactionSpec>,
    triggers: Vec<TriggerSpec>,
    startup: Vec<ReactionId>,
    shutdown: Vec<ReactionId>,
    network_inputs: Vec<NetworkInputSpec>,
    network_outputs: Vec<NetworkOutputSpec>,
    num_reactors: usize,
}

impl ProgramBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        ProgramBuilder {
            name: name.into(),
            reactions: Vec::new(),
            triggers: Vec::new(),
            startup: Vec::new(),
            shutdown: Vec::new(),
            network_inputs: Vec::new(),
            network_outputs: Vec::new(),
            num_reactors: 0,
        }
    }

    fn add_trigger(&mut self, name: &str, kind: TriggerKind) -> TriggerId {
        let id = TriggerId::new(self.triggers.len() as u32);
        self.triggers.push(TriggerSpec {
            name: name.to_string(),
            kind,
            min_delay: 0,
            min_spacing: 0,
            policy: SchedulePolicy::Defer,
            reactions: Vec::new(),
        });
        id
    }

    pub fn timer(&mut self, name: &str, offset: Interval, period: Interval) -> TriggerId {
        self.add_trigger(name, TriggerKind::Timer { offset, period })
    }

    pub fn logical_action(&mut self, name: &str, min_delay: Interval) -> TriggerId {
        let id = self.add_trigger(name, TriggerKind::LogicalAction);
        self.triggers[id.index()].min_delay = min_delay;
        id
    }

    pub fn physical_action(&mut self, name: &str, min_delay: Interval) -> TriggerId {
        let id = self.add_trigger(name, TriggerKind::PhysicalAction);
        self.triggers[id.index()].min_delay = min_delay;
        id
    }

    pub fn port(&mut self, name: &str) -> TriggerId {
        self.add_trigger(name, TriggerKind::Port)
    }

    /// Set the minimum spacing and its policy on an action
    pub fn spacing(&mut self, action: TriggerId, min_spacing: Interval, policy: SchedulePolicy) -> &mut Self {
        if let Some(trigger) = self.triggers.get_mut(action.index()) {
            trigger.min_spacing = min_spacing;
            trigger.policy = policy;
        }
        self
    }

    /// New mutual-exclusion group for reactions of one reactor
    pub fn reactor(&mut self) -> usize {
        self.num_reactors += 1;
        self.num_reactors - 1
    }

    /// Start describing a reaction
    pub fn reaction<F>(&mut self, name: &str, level: usize, body: F) -> ReactionBuilder<'_>
    where
        F: Fn(&mut ReactionContext<'_>) + Send + Sync + 'static,
    {
        ReactionBuilder {
            builder: self,
            spec: ReactionSpec {
                name: name.to_string(),
                level,
                deadline: None,
                body: Arc::new(body),
                deadline_handler: None,
                stp_handler: None,
                effects: Vec::new(),
                uses: Vec::new(),
                is_input_reaction: false,
                reactor: None,
                last_enabling: None,
            },
            triggers: Vec::new(),
            startup: false,
            shutdown: false,
        }
    }

    /// Declare a network input. The trigger becomes a logical action whose
    /// minimum delay is the connection delay.
    pub fn network_input(
        &mut self,
        name: &str,
        port: PortId,
        delay: Option<Interval>,
        staa: Interval,
    ) -> TriggerId {
        let trigger = self.logical_action(name, 0);
        self.network_inputs.push(NetworkInputSpec {
            port,
            trigger,
            delay,
            staa,
            physical: false,
        });
        trigger
    }

    /// Declare a network output fed by a local port
    pub fn network_output(
        &mut self,
        trigger: TriggerId,
        remote_port: PortId,
        destination: FederateId,
        delay: Option<Interval>,
        known_after_level: usize,
    ) -> &mut Self {
        self.network_outputs.push(NetworkOutputSpec {
            trigger,
            remote_port,
            destination,
            delay,
            known_after_level,
            physical: false,
        });
        self
    }

    pub fn build(self) -> TempoResult<Program> {
        let invalid = |msg: String| TempoError::InvalidProgram(msg);
        let num_triggers = self.triggers.len();
        let check_trigger = |id: TriggerId, what: &str| {
            if id.index() >= num_triggers {
                Err(invalid(format!("{} refers to unknown trigger {}", what, id)))
            } else {
                Ok(())
            }
        };

        for reaction in &self.reactions {
            for &effect in reaction.effects.iter().chain(&reaction.uses) {
                check_trigger(effect, &reaction.name)?;
            }
            if let Some(group) = reaction.reactor {
                if group >= self.num_reactors {
                    return Err(invalid(format!("{} refers to unknown reactor {}", reaction.name, group)));
                }
            }
        }
        for input in &self.network_inputs {
            check_trigger(input.trigger, "network input")?;
            if input.staa < 0 {
                return Err(invalid(format!("negative STAA on port {}", input.port)));
            }
        }
        for output in &self.network_outputs {
            check_trigger(output.trigger, "network output")?;
        }

        let mut triggers = self.triggers;
        for trigger in &mut triggers {
            if let TriggerKind::Timer { offset, period } = trigger.kind {
                if offset < 0 || period < 0 {
                    return Err(invalid(format!("timer {} has a negative offset or period", trigger.name)));
                }
                // A timer never piles up events at one time.
                trigger.min_spacing = period;
            }
            if trigger.min_delay < 0 || trigger.min_spacing < 0 {
                return Err(invalid(format!("trigger {} has a negative delay", trigger.name)));
            }
        }

        let mut reactions = self.reactions;
        // Writers must sit strictly below the reactions they enable.
        for (index, reaction) in reactions.iter().enumerate() {
            for &effect in &reaction.effects {
                for &down in &triggers[effect.index()].reactions {
                    if reactions[down.index()].level <= reaction.level {
                        return Err(invalid(format!(
                            "{} (level {}) enables {} (level {}) at the same or a lower level",
                            reaction.name,
                            reaction.level,
                            reactions[down.index()].name,
                            reactions[down.index()].level
                        )));
                    }
                    if down.index() == index {
                        return Err(invalid(format!("{} enables itself", reaction.name)));
                    }
                }
            }
        }

        for trigger in &mut triggers {
            trigger.reactions.sort_by_key(|r| (reactions[r.index()].level, r.index()));
            trigger.reactions.dedup();
        }

        // Inline execution candidate: the unique writer at the highest level
        // among all writers of the triggers a reaction depends on.
        let last_enabling: Vec<Option<ReactionId>> = (0..reactions.len())
            .map(|index| {
                let reads: Vec<TriggerId> = triggers
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.reactions.iter().any(|r| r.index() == index))
                    .map(|(i, _)| TriggerId::new(i as u32))
                    .chain(reactions[index].uses.iter().copied())
                    .collect();
                if reads.iter().any(|t| triggers[t.index()].kind != TriggerKind::Port) {
                    return None;
                }
                let writers: Vec<usize> = reactions
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.effects.iter().any(|e| reads.contains(e)))
                    .map(|(i, _)| i)
                    .collect();
                let top = writers.iter().map(|&w| reactions[w].level).max()?;
                let mut at_top = writers.iter().filter(|&&w| reactions[w].level == top);
                let writer = match (at_top.next(), at_top.next()) {
                    (Some(&w), None) => w,
                    _ => return None,
                };
                // A lower-level sibling in the same reactor must run first.
                let level = reactions[index].level;
                let blocked = reactions[index].reactor.is_some_and(|group| {
                    reactions.iter().enumerate().any(|(i, r)| {
                        i != index && i != writer && r.reactor == Some(group) && r.level < level
                    })
                });
                (!blocked).then(|| ReactionId::new(writer as u32))
            })
            .collect();
        for (reaction, enabling) in reactions.iter_mut().zip(last_enabling) {
            reaction.last_enabling = enabling;
        }

        let num_levels = reactions.iter().map(|r| r.level + 1).max().unwrap_or(1);
        Ok(Program {
            name: self.name,
            reactions,
            triggers,
            startup: self.startup,
            shutdown: self.shutdown,
            network_inputs: self.network_inputs,
            network_outputs: self.network_outputs,
            num_levels,
            num_reactors: self.num_reactors,
        })
    }
}

/// Builder for one reaction, finished with [`ReactionBuilder::add`]
pub struct ReactionBuilder<'a> {
    builder: &'a mut ProgramBuilder,
    spec: ReactionSpec,
    triggers: Vec<TriggerId>,
    startup: bool,
    shutdown: bool,
}

impl<'a> ReactionBuilder<'a> {
    pub fn triggered_by(mut self, trigger: TriggerId) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn on_startup(mut self) -> Self {
        self.startup = true;
        self
    }

    pub fn on_shutdown(mut self) -> Self {
        self.shutdown = true;
        self
    }

    pub fn writes(mut self, effect: TriggerId) -> Self {
        self.spec.effects.push(effect);
        self
    }

    pub fn reads(mut self, source: TriggerId) -> Self {
        self.spec.uses.push(source);
        self
    }

    pub fn deadline(mut self, deadline: Interval) -> Self {
        self.spec.deadline = Some(deadline);
        self
    }

    pub fn on_deadline_miss<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut ReactionContext<'_>) + Send + Sync + 'static,
    {
        self.spec.deadline_handler = Some(Arc::new(handler));
        self
    }

    pub fn on_stp_violation<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut ReactionContext<'_>) + Send + Sync + 'static,
    {
        self.spec.stp_handler = Some(Arc::new(handler));
        self
    }

    pub fn input_reaction(mut self) -> Self {
        self.spec.is_input_reaction = true;
        self
    }

    pub fn in_reactor(mut self, reactor: usize) -> Self {
        self.spec.reactor = Some(reactor);
        self
    }

    /// Register the reaction and return its id
    pub fn add(self) -> ReactionId {
        let id = ReactionId::new(self.builder.reactions.len() as u32);
        for trigger in self.triggers {
            if let Some(spec) = self.builder.triggers.get_mut(trigger.index()) {
                spec.reactions.push(id);
            }
        }
        if self.startup {
            self.builder.startup.push(id);
        }
        if self.shutdown {
            self.builder.shutdown.push(id);
        }
        self.builder.reactions.push(self.spec);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_core::MSEC;

    fn pipeline() -> Program {
        let mut b = Program::builder("pipeline");
        let t = b.timer("t", 0, 10 * MSEC);
        let out = b.port("out");
        let side = b.port("side");
        let producer = b
            .reaction("producer", 0, |_| {})
            .triggered_by(t)
            .writes(out)
            .add();
        b.reaction("other", 0, |_| {}).triggered_by(t).writes(side).add();
        b.reaction("consumer", 1, |_| {}).triggered_by(out).add();
        b.reaction("joiner", 2, |_| {}).triggered_by(out).triggered_by(side).add();
        b.reaction("ticker", 1, |_| {}).triggered_by(t).reads(out).add();
        let program = b.build().unwrap();
        assert_eq!(program.reaction(ReactionId::new(2)).last_enabling, Some(producer));
        program
    }

    #[test]
    fn test_levels_and_trigger_lists() {
        let program = pipeline();
        assert_eq!(program.num_levels, 3);
        assert_eq!(program.reactions_per_level(), vec![2, 2, 1]);
        let t = program.trigger(TriggerId::new(0));
        assert!(t.is_timer());
        assert_eq!(t.min_spacing, 10 * MSEC);
        let levels: Vec<usize> = t.reactions.iter().map(|r| program.reaction(*r).level).collect();
        assert_eq!(levels, vec![0, 0, 1]);
    }

    #[test]
    fn test_inline_candidate_requires_unique_top_writer() {
        let program = pipeline();
        // joiner has two writers at level 0
        assert_eq!(program.reaction(ReactionId::new(3)).last_enabling, None);
        // ticker is also enabled by a timer
        assert_eq!(program.reaction(ReactionId::new(4)).last_enabling, None);
    }

    #[test]
    fn test_inline_candidate_yields_to_lower_sibling() {
        let mut b = Program::builder("siblings");
        let p = b.port("p");
        let reactor = b.reactor();
        let writer = b.reaction("writer", 0, |_| {}).on_startup().writes(p).add();
        b.reaction("early", 1, |_| {}).on_startup().in_reactor(reactor).add();
        let late = b.reaction("late", 2, |_| {}).triggered_by(p).in_reactor(reactor).add();
        let alone = b.reaction("alone", 1, |_| {}).triggered_by(p).add();
        let program = b.build().unwrap();
        assert_eq!(program.reaction(late).last_enabling, None);
        assert_eq!(program.reaction(alone).last_enabling, Some(writer));
    }

    #[test]
    fn test_rejects_level_inversion() {
        let mut b = Program::builder("bad");
        let p = b.port("p");
        b.reaction("down", 0, |_| {}).triggered_by(p).add();
        b.reaction("up", 1, |_| {}).writes(p).add();
        assert!(matches!(b.build(), Err(TempoError::InvalidProgram(_))));
    }

    #[test]
    fn test_rejects_unknown_ids() {
        let mut b = Program::builder("bad");
        b.reaction("r", 0, |_| {}).writes(TriggerId::new(7)).add();
        assert!(b.build().is_err());

        let mut b = Program::builder("bad");
        b.reaction("r", 0, |_| {}).in_reactor(3).add();
        assert!(b.build().is_err());
    }

    #[test]
    fn test_empty_program_has_one_level() {
        let program = Program::builder("empty").build().unwrap();
        assert_eq!(program.num_levels, 1);
    }

    #[test]
    fn test_network_ports() {
        let mut b = Program::builder("fed");
        let input = b.network_input("in", PortId::new(2), Some(MSEC), 0);
        let out = b.port("out");
        b.reaction("r", 0, |_| {}).triggered_by(input).writes(out).input_reaction().add();
        b.network_output(out, PortId::new(0), FederateId::new(1), None, 0);
        let program = b.build().unwrap();
        assert_eq!(program.network_input(PortId::new(2)).unwrap().trigger, input);
        assert_eq!(program.network_output_for(out).count(), 1);
        assert!(program.network_input(PortId::new(9)).is_none());
    }
}
