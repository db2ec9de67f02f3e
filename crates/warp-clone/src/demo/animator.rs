// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Demo animator graph: source arena, virtual clones, one clone kind per node kind.
//!
//! The source side is an append-only arena ([`SourceGraph`]); a node's
//! [`SourceKey`] is its kind plus its arena index. The virtual side is a graph
//! of [`Shared`] handles that may contain cycles (state → transition → state).
//!
//! Conventions followed by every kind below:
//!
//! - children are resolved into locals first and written into the clone with
//!   a short `borrow_mut`, so a cycle that reaches the shell never observes an
//!   outstanding borrow;
//! - clips go through [`CloneSession::apply_all`] before lookup, so an active
//!   override decides which clip is cloned;
//! - a state machine's default state is wired by a deferred action, after
//!   every state reachable from the outermost call has been cloned.
use std::cell::RefCell;
use std::rc::Rc;

use crate::alloc::INVALID_LAYER_INDEX;
use crate::error::CloneError;
use crate::ident::{NodeKind, SourceKey, SourceNode};
use crate::kind::CloneKind;
use crate::session::CloneSession;

/// Shared, mutable clone handle.
pub type Shared<T> = Rc<RefCell<T>>;

fn shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

// ─────────────────────────────────────────────────────────────────────────────
// Source side
// ─────────────────────────────────────────────────────────────────────────────

/// Root controller.
#[derive(Debug, Clone)]
pub struct SourceController {
    key: SourceKey,
    /// Display name.
    pub name: String,
    /// Layer keys in physical order.
    pub layers: Vec<SourceKey>,
    /// Clip overrides `(from, to)` applied while this controller's layers clone.
    pub overrides: Vec<(SourceKey, SourceKey)>,
}

/// Layer of a controller.
#[derive(Debug, Clone)]
pub struct SourceLayer {
    key: SourceKey,
    /// Display name.
    pub name: String,
    /// Root state machine.
    pub state_machine: Option<SourceKey>,
    /// Physical index of the layer this one syncs to, `-1` for none.
    pub synced_layer_index: i32,
}

/// State machine.
#[derive(Debug, Clone)]
pub struct SourceStateMachine {
    key: SourceKey,
    /// Display name.
    pub name: String,
    /// Owned states.
    pub states: Vec<SourceKey>,
    /// Nested state machines.
    pub child_machines: Vec<SourceKey>,
    /// Entry transitions.
    pub entry_transitions: Vec<SourceKey>,
    /// Any-state transitions.
    pub any_state_transitions: Vec<SourceKey>,
    /// State entered by default.
    pub default_state: Option<SourceKey>,
}

/// State.
#[derive(Debug, Clone)]
pub struct SourceState {
    key: SourceKey,
    /// Display name.
    pub name: String,
    /// Clip or blend tree played by the state.
    pub motion: Option<SourceKey>,
    /// Outgoing transitions.
    pub transitions: Vec<SourceKey>,
}

/// Transition leaving a state.
#[derive(Debug, Clone)]
pub struct SourceStateTransition {
    key: SourceKey,
    /// Destination state.
    pub destination: Option<SourceKey>,
    /// Normalized exit time.
    pub exit_time: f32,
}

/// Entry transition of a state machine.
#[derive(Debug, Clone)]
pub struct SourceTransition {
    key: SourceKey,
    /// Destination state.
    pub destination: Option<SourceKey>,
}

/// Blend tree over clips and nested trees.
#[derive(Debug, Clone)]
pub struct SourceMotion {
    key: SourceKey,
    /// Display name.
    pub name: String,
    /// Child clips or motions.
    pub children: Vec<SourceKey>,
}

/// Leaf clip.
#[derive(Debug, Clone)]
pub struct SourceClip {
    key: SourceKey,
    /// Display name.
    pub name: String,
    /// Length in seconds.
    pub length: f32,
}

macro_rules! impl_source_node {
    ($($ty:ty),* $(,)?) => {
        $(impl SourceNode for $ty {
            fn source_key(&self) -> SourceKey {
                self.key
            }
        })*
    };
}

impl_source_node!(
    SourceController,
    SourceLayer,
    SourceStateMachine,
    SourceState,
    SourceStateTransition,
    SourceTransition,
    SourceMotion,
    SourceClip,
);

#[derive(Debug, Clone)]
enum SourceRecord {
    Controller(SourceController),
    Layer(SourceLayer),
    StateMachine(SourceStateMachine),
    State(SourceState),
    StateTransition(SourceStateTransition),
    Transition(SourceTransition),
    Motion(SourceMotion),
    Clip(SourceClip),
}

/// Append-only arena of source nodes.
///
/// Every `add_*` method fails with [`CloneError::ArenaFull`] once the arena
/// has no handle left to assign.
#[derive(Debug, Clone, Default)]
pub struct SourceGraph {
    nodes: Vec<SourceRecord>,
}

fn dangling(key: SourceKey) -> CloneError {
    CloneError::node(key, "dangling source reference")
}

/// Arena index `len` as a handle; arenas past `u32::MAX` nodes are full.
fn handle_for(len: usize) -> Result<u32, CloneError> {
    u32::try_from(len).map_err(|_| CloneError::ArenaFull)
}

fn expect_kind(key: SourceKey, kind: NodeKind) -> Result<(), CloneError> {
    if key.kind == kind {
        Ok(())
    } else {
        Err(CloneError::KindMismatch(key))
    }
}

impl SourceGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn next_key(&self, kind: NodeKind) -> Result<SourceKey, CloneError> {
        handle_for(self.nodes.len()).map(|raw| SourceKey::new(kind, raw))
    }

    fn record(&self, key: SourceKey) -> Option<&SourceRecord> {
        let index = usize::try_from(key.handle.value()).ok()?;
        self.nodes.get(index)
    }

    fn record_mut(&mut self, key: SourceKey) -> Option<&mut SourceRecord> {
        let index = usize::try_from(key.handle.value()).ok()?;
        self.nodes.get_mut(index)
    }

    /// Adds a clip.
    pub fn add_clip(&mut self, name: &str, length: f32) -> Result<SourceKey, CloneError> {
        let key = self.next_key(NodeKind::Clip)?;
        self.nodes.push(SourceRecord::Clip(SourceClip {
            key,
            name: name.to_owned(),
            length,
        }));
        Ok(key)
    }

    /// Adds a blend tree over `children` (clips or motions).
    pub fn add_motion(
        &mut self,
        name: &str,
        children: Vec<SourceKey>,
    ) -> Result<SourceKey, CloneError> {
        let key = self.next_key(NodeKind::Motion)?;
        self.nodes.push(SourceRecord::Motion(SourceMotion {
            key,
            name: name.to_owned(),
            children,
        }));
        Ok(key)
    }

    /// Adds a state playing `motion`.
    pub fn add_state(
        &mut self,
        name: &str,
        motion: Option<SourceKey>,
    ) -> Result<SourceKey, CloneError> {
        let key = self.next_key(NodeKind::State)?;
        self.nodes.push(SourceRecord::State(SourceState {
            key,
            name: name.to_owned(),
            motion,
            transitions: Vec::new(),
        }));
        Ok(key)
    }

    /// Adds a transition from state `from` to state `to`.
    ///
    /// # Errors
    /// [`CloneError::KindMismatch`] if `from` is not a state in this graph.
    pub fn add_state_transition(
        &mut self,
        from: SourceKey,
        to: SourceKey,
        exit_time: f32,
    ) -> Result<SourceKey, CloneError> {
        expect_kind(from, NodeKind::State)?;
        let key = self.next_key(NodeKind::StateTransition)?;
        let Some(SourceRecord::State(state)) = self.record_mut(from) else {
            return Err(dangling(from));
        };
        state.transitions.push(key);
        self.nodes
            .push(SourceRecord::StateTransition(SourceStateTransition {
                key,
                destination: Some(to),
                exit_time,
            }));
        Ok(key)
    }

    /// Adds an empty state machine.
    pub fn add_state_machine(&mut self, name: &str) -> Result<SourceKey, CloneError> {
        let key = self.next_key(NodeKind::StateMachine)?;
        self.nodes
            .push(SourceRecord::StateMachine(SourceStateMachine {
                key,
                name: name.to_owned(),
                states: Vec::new(),
                child_machines: Vec::new(),
                entry_transitions: Vec::new(),
                any_state_transitions: Vec::new(),
                default_state: None,
            }));
        Ok(key)
    }

    fn machine_mut(&mut self, machine: SourceKey) -> Result<&mut SourceStateMachine, CloneError> {
        expect_kind(machine, NodeKind::StateMachine)?;
        match self.record_mut(machine) {
            Some(SourceRecord::StateMachine(m)) => Ok(m),
            _ => Err(dangling(machine)),
        }
    }

    /// Appends `state` to `machine`.
    ///
    /// # Errors
    /// [`CloneError::KindMismatch`] if `machine` is not a state machine.
    pub fn attach_state(&mut self, machine: SourceKey, state: SourceKey) -> Result<(), CloneError> {
        self.machine_mut(machine)?.states.push(state);
        Ok(())
    }

    /// Appends `child` to `machine`'s nested machines.
    ///
    /// # Errors
    /// [`CloneError::KindMismatch`] if `machine` is not a state machine.
    pub fn attach_child_machine(
        &mut self,
        machine: SourceKey,
        child: SourceKey,
    ) -> Result<(), CloneError> {
        self.machine_mut(machine)?.child_machines.push(child);
        Ok(())
    }

    /// Sets `machine`'s default state.
    ///
    /// # Errors
    /// [`CloneError::KindMismatch`] if `machine` is not a state machine.
    pub fn set_default_state(
        &mut self,
        machine: SourceKey,
        state: SourceKey,
    ) -> Result<(), CloneError> {
        self.machine_mut(machine)?.default_state = Some(state);
        Ok(())
    }

    /// Adds an entry transition of `machine` into `to`.
    ///
    /// # Errors
    /// [`CloneError::KindMismatch`] if `machine` is not a state machine.
    pub fn add_entry_transition(
        &mut self,
        machine: SourceKey,
        to: SourceKey,
    ) -> Result<SourceKey, CloneError> {
        let key = self.next_key(NodeKind::Transition)?;
        self.machine_mut(machine)?.entry_transitions.push(key);
        self.nodes.push(SourceRecord::Transition(SourceTransition {
            key,
            destination: Some(to),
        }));
        Ok(key)
    }

    /// Adds an any-state transition of `machine` into `to`.
    ///
    /// # Errors
    /// [`CloneError::KindMismatch`] if `machine` is not a state machine.
    pub fn add_any_state_transition(
        &mut self,
        machine: SourceKey,
        to: SourceKey,
        exit_time: f32,
    ) -> Result<SourceKey, CloneError> {
        let key = self.next_key(NodeKind::StateTransition)?;
        self.machine_mut(machine)?.any_state_transitions.push(key);
        self.nodes
            .push(SourceRecord::StateTransition(SourceStateTransition {
                key,
                destination: Some(to),
                exit_time,
            }));
        Ok(key)
    }

    /// Adds a layer rooted at `state_machine`.
    pub fn add_layer(
        &mut self,
        name: &str,
        state_machine: Option<SourceKey>,
        synced_layer_index: i32,
    ) -> Result<SourceKey, CloneError> {
        let key = self.next_key(NodeKind::Layer)?;
        self.nodes.push(SourceRecord::Layer(SourceLayer {
            key,
            name: name.to_owned(),
            state_machine,
            synced_layer_index,
        }));
        Ok(key)
    }

    /// Adds a controller over `layers`.
    pub fn add_controller(
        &mut self,
        name: &str,
        layers: Vec<SourceKey>,
    ) -> Result<SourceKey, CloneError> {
        let key = self.next_key(NodeKind::Controller)?;
        self.nodes.push(SourceRecord::Controller(SourceController {
            key,
            name: name.to_owned(),
            layers,
            overrides: Vec::new(),
        }));
        Ok(key)
    }

    /// Registers a clip override on `controller`.
    ///
    /// # Errors
    /// [`CloneError::KindMismatch`] if `controller` is not a controller.
    pub fn add_override(
        &mut self,
        controller: SourceKey,
        from: SourceKey,
        to: SourceKey,
    ) -> Result<(), CloneError> {
        expect_kind(controller, NodeKind::Controller)?;
        match self.record_mut(controller) {
            Some(SourceRecord::Controller(c)) => {
                c.overrides.push((from, to));
                Ok(())
            }
            _ => Err(dangling(controller)),
        }
    }
}

macro_rules! typed_lookup {
    ($name:ident, $variant:ident, $ty:ty) => {
        impl SourceGraph {
            /// Looks up a node of this kind.
            ///
            /// # Errors
            /// [`CloneError::KindMismatch`] for a key of another kind,
            /// [`CloneError::Node`] for a key outside the arena.
            pub fn $name(&self, key: SourceKey) -> Result<&$ty, CloneError> {
                expect_kind(key, NodeKind::$variant)?;
                match self.record(key) {
                    Some(SourceRecord::$variant(node)) => Ok(node),
                    _ => Err(dangling(key)),
                }
            }
        }
    };
}

typed_lookup!(controller, Controller, SourceController);
typed_lookup!(layer, Layer, SourceLayer);
typed_lookup!(state_machine, StateMachine, SourceStateMachine);
typed_lookup!(state, State, SourceState);
typed_lookup!(state_transition, StateTransition, SourceStateTransition);
typed_lookup!(transition, Transition, SourceTransition);
typed_lookup!(motion, Motion, SourceMotion);
typed_lookup!(clip, Clip, SourceClip);

// ─────────────────────────────────────────────────────────────────────────────
// Virtual side
// ─────────────────────────────────────────────────────────────────────────────

/// Cloned controller.
pub struct VirtualController {
    /// Display name.
    pub name: String,
    /// Cloned layers in physical order.
    pub layers: Vec<Shared<VirtualLayer>>,
}

/// Cloned layer.
pub struct VirtualLayer {
    /// Display name.
    pub name: String,
    /// Index assigned from the session's virtual layer allocator.
    pub virtual_index: i32,
    /// Virtual index of the synced layer, [`INVALID_LAYER_INDEX`] for none.
    pub synced_layer_index: i32,
    /// Cloned root state machine.
    pub state_machine: Option<Shared<VirtualStateMachine>>,
}

/// Cloned state machine.
pub struct VirtualStateMachine {
    /// Display name.
    pub name: String,
    /// Cloned states.
    pub states: Vec<Shared<VirtualState>>,
    /// Cloned nested machines.
    pub child_machines: Vec<Shared<VirtualStateMachine>>,
    /// Cloned entry transitions.
    pub entry_transitions: Vec<Shared<VirtualTransition>>,
    /// Cloned any-state transitions.
    pub any_state_transitions: Vec<Shared<VirtualStateTransition>>,
    /// Default state; wired after the outermost clone call unwinds.
    pub default_state: Option<Shared<VirtualState>>,
}

/// Motion played by a state or nested in a blend tree.
#[derive(Clone)]
pub enum VirtualMotionRef {
    /// A leaf clip.
    Clip(Shared<VirtualClip>),
    /// A blend tree.
    Tree(Shared<VirtualMotion>),
}

/// Cloned state.
pub struct VirtualState {
    /// Display name.
    pub name: String,
    /// Cloned motion.
    pub motion: Option<VirtualMotionRef>,
    /// Cloned outgoing transitions.
    pub transitions: Vec<Shared<VirtualStateTransition>>,
}

/// Cloned state transition.
pub struct VirtualStateTransition {
    /// Cloned destination.
    pub destination: Option<Shared<VirtualState>>,
    /// Normalized exit time.
    pub exit_time: f32,
}

/// Cloned entry transition.
pub struct VirtualTransition {
    /// Cloned destination.
    pub destination: Option<Shared<VirtualState>>,
}

/// Cloned blend tree.
pub struct VirtualMotion {
    /// Display name.
    pub name: String,
    /// Cloned children.
    pub children: Vec<VirtualMotionRef>,
}

/// Cloned clip.
pub struct VirtualClip {
    /// Display name.
    pub name: String,
    /// Length in seconds.
    pub length: f32,
    /// Source clip actually cloned (after substitution).
    pub source: SourceKey,
}

// ─────────────────────────────────────────────────────────────────────────────
// Clone kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Entry points for cloning nodes of one [`SourceGraph`].
#[derive(Debug, Clone)]
pub struct Animator {
    graph: Rc<SourceGraph>,
}

impl Animator {
    /// Wraps `graph` for cloning.
    pub fn new(graph: SourceGraph) -> Self {
        Self {
            graph: Rc::new(graph),
        }
    }

    /// The wrapped source graph.
    pub fn graph(&self) -> &SourceGraph {
        &self.graph
    }

    /// Clones a controller and everything reachable from it.
    ///
    /// # Errors
    /// Any [`CloneError`] raised while cloning, including deferred work.
    pub fn clone_controller(
        &self,
        session: &mut CloneSession,
        key: SourceKey,
    ) -> Result<Shared<VirtualController>, CloneError> {
        let source = self.graph.controller(key)?;
        session
            .resolve_kind(&ControllerKind::new(self), Some(source))?
            .ok_or(CloneError::MissingKey)
    }

    /// Clones a state machine outside of any layer.
    ///
    /// # Errors
    /// Any [`CloneError`] raised while cloning, including deferred work.
    pub fn clone_state_machine(
        &self,
        session: &mut CloneSession,
        key: SourceKey,
    ) -> Result<Shared<VirtualStateMachine>, CloneError> {
        let source = self.graph.state_machine(key)?;
        session
            .resolve_kind(&StateMachineKind::new(self), Some(source))?
            .ok_or(CloneError::MissingKey)
    }

    /// Clones a single state.
    ///
    /// # Errors
    /// Any [`CloneError`] raised while cloning, including deferred work.
    pub fn clone_state(
        &self,
        session: &mut CloneSession,
        key: SourceKey,
    ) -> Result<Shared<VirtualState>, CloneError> {
        let source = self.graph.state(key)?;
        session
            .resolve_kind(&StateKind::new(self), Some(source))?
            .ok_or(CloneError::MissingKey)
    }

    /// Clones a clip or blend tree, applying active substitutions to clips.
    ///
    /// # Errors
    /// [`CloneError::KindMismatch`] if `key` is neither a clip nor a motion.
    pub fn clone_motion(
        &self,
        session: &mut CloneSession,
        key: SourceKey,
    ) -> Result<VirtualMotionRef, CloneError> {
        match key.kind {
            NodeKind::Clip => {
                let leaf = session.apply_all(key);
                let clip = self.graph.clip(leaf)?;
                session
                    .resolve_kind(&ClipKind, Some(clip))?
                    .map(VirtualMotionRef::Clip)
                    .ok_or(CloneError::MissingKey)
            }
            NodeKind::Motion => {
                let motion = self.graph.motion(key)?;
                session
                    .resolve_kind(&MotionKind::new(self), Some(motion))?
                    .map(VirtualMotionRef::Tree)
                    .ok_or(CloneError::MissingKey)
            }
            _ => Err(CloneError::KindMismatch(key)),
        }
    }

    fn resolve_states(
        &self,
        session: &mut CloneSession,
        keys: &[SourceKey],
    ) -> Result<Vec<Shared<VirtualState>>, CloneError> {
        keys.iter()
            .map(|key| self.clone_state(session, *key))
            .collect()
    }

    fn resolve_state_transitions(
        &self,
        session: &mut CloneSession,
        keys: &[SourceKey],
    ) -> Result<Vec<Shared<VirtualStateTransition>>, CloneError> {
        let kind = StateTransitionKind::new(self);
        keys.iter()
            .map(|key| {
                let source = self.graph.state_transition(*key)?;
                session
                    .resolve_kind(&kind, Some(source))?
                    .ok_or(CloneError::MissingKey)
            })
            .collect()
    }

    fn resolve_destination(
        &self,
        session: &mut CloneSession,
        destination: Option<SourceKey>,
    ) -> Result<Option<Shared<VirtualState>>, CloneError> {
        destination
            .map(|key| self.clone_state(session, key))
            .transpose()
    }
}

/// Clone kind for controllers. Allocates one virtual layer index per layer.
#[derive(Debug)]
pub struct ControllerKind<'a> {
    animator: &'a Animator,
}

impl<'a> ControllerKind<'a> {
    /// Kind bound to `animator`'s graph.
    pub fn new(animator: &'a Animator) -> Self {
        Self { animator }
    }

    fn populate_layers(
        &self,
        session: &mut CloneSession,
        source: &SourceController,
        clone: &Shared<VirtualController>,
    ) -> Result<(), CloneError> {
        let count =
            i32::try_from(source.layers.len()).map_err(|_| CloneError::AllocatorExhausted)?;
        let mut virtual_index = session.allocate_range(count)?;
        let mut layers = Vec::with_capacity(source.layers.len());
        for key in &source.layers {
            let layer = self.animator.graph.layer(*key)?;
            let kind = LayerKind {
                animator: self.animator,
                virtual_index,
            };
            if let Some(cloned) = session.resolve_kind(&kind, Some(layer))? {
                layers.push(cloned);
            }
            virtual_index += 1;
        }
        clone.borrow_mut().layers = layers;
        Ok(())
    }
}

impl CloneKind for ControllerKind<'_> {
    const KIND: NodeKind = NodeKind::Controller;
    type Source = SourceController;
    type Output = Shared<VirtualController>;

    fn instantiate(&self, source: &SourceController) -> Result<Self::Output, CloneError> {
        Ok(shared(VirtualController {
            name: source.name.clone(),
            layers: Vec::new(),
        }))
    }

    fn populate(
        &self,
        session: &mut CloneSession,
        source: &SourceController,
        clone: &Self::Output,
    ) -> Result<(), CloneError> {
        if source.overrides.is_empty() {
            return self.populate_layers(session, source, clone);
        }
        let table = source.overrides.clone();
        let mut scope = session.push_scope(move |leaf: SourceKey| {
            table
                .iter()
                .find(|(from, _)| *from == leaf)
                .map_or(leaf, |(_, to)| *to)
        });
        self.populate_layers(&mut scope, source, clone)
    }
}

/// Clone kind for layers; carries the virtual index chosen by the controller.
#[derive(Debug)]
pub struct LayerKind<'a> {
    animator: &'a Animator,
    virtual_index: i32,
}

impl CloneKind for LayerKind<'_> {
    const KIND: NodeKind = NodeKind::Layer;
    type Source = SourceLayer;
    type Output = Shared<VirtualLayer>;

    fn instantiate(&self, source: &SourceLayer) -> Result<Self::Output, CloneError> {
        Ok(shared(VirtualLayer {
            name: source.name.clone(),
            virtual_index: self.virtual_index,
            synced_layer_index: INVALID_LAYER_INDEX,
            state_machine: None,
        }))
    }

    fn populate(
        &self,
        session: &mut CloneSession,
        source: &SourceLayer,
        clone: &Self::Output,
    ) -> Result<(), CloneError> {
        // Translate before recursing; nested allocations move the active range.
        let synced = session.translate_or_invalid(source.synced_layer_index);
        let machine = match source.state_machine {
            Some(key) => Some(self.animator.clone_state_machine(session, key)?),
            None => None,
        };
        let mut layer = clone.borrow_mut();
        layer.synced_layer_index = synced;
        layer.state_machine = machine;
        Ok(())
    }
}

/// Clone kind for state machines.
#[derive(Debug)]
pub struct StateMachineKind<'a> {
    animator: &'a Animator,
}

impl<'a> StateMachineKind<'a> {
    /// Kind bound to `animator`'s graph.
    pub fn new(animator: &'a Animator) -> Self {
        Self { animator }
    }
}

impl CloneKind for StateMachineKind<'_> {
    const KIND: NodeKind = NodeKind::StateMachine;
    type Source = SourceStateMachine;
    type Output = Shared<VirtualStateMachine>;

    fn instantiate(&self, source: &SourceStateMachine) -> Result<Self::Output, CloneError> {
        Ok(shared(VirtualStateMachine {
            name: source.name.clone(),
            states: Vec::new(),
            child_machines: Vec::new(),
            entry_transitions: Vec::new(),
            any_state_transitions: Vec::new(),
            default_state: None,
        }))
    }

    fn populate(
        &self,
        session: &mut CloneSession,
        source: &SourceStateMachine,
        clone: &Self::Output,
    ) -> Result<(), CloneError> {
        let animator = self.animator;
        let states = animator.resolve_states(session, &source.states)?;
        let child_machines = source
            .child_machines
            .iter()
            .map(|key| animator.clone_state_machine(session, *key))
            .collect::<Result<Vec<_>, _>>()?;
        let entry_kind = TransitionKind::new(animator);
        let entry_transitions = source
            .entry_transitions
            .iter()
            .map(|key| {
                let transition = animator.graph.transition(*key)?;
                session
                    .resolve_kind(&entry_kind, Some(transition))?
                    .ok_or(CloneError::MissingKey)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let any_state_transitions =
            animator.resolve_state_transitions(session, &source.any_state_transitions)?;
        {
            let mut machine = clone.borrow_mut();
            machine.states = states;
            machine.child_machines = child_machines;
            machine.entry_transitions = entry_transitions;
            machine.any_state_transitions = any_state_transitions;
        }

        if let Some(default_key) = source.default_state {
            let animator = animator.clone();
            let machine = Rc::clone(clone);
            session.enqueue(move |session| {
                let state = animator.clone_state(session, default_key)?;
                machine.borrow_mut().default_state = Some(state);
                Ok(())
            })?;
        }
        Ok(())
    }
}

/// Clone kind for states.
#[derive(Debug)]
pub struct StateKind<'a> {
    animator: &'a Animator,
}

impl<'a> StateKind<'a> {
    /// Kind bound to `animator`'s graph.
    pub fn new(animator: &'a Animator) -> Self {
        Self { animator }
    }
}

impl CloneKind for StateKind<'_> {
    const KIND: NodeKind = NodeKind::State;
    type Source = SourceState;
    type Output = Shared<VirtualState>;

    fn instantiate(&self, source: &SourceState) -> Result<Self::Output, CloneError> {
        Ok(shared(VirtualState {
            name: source.name.clone(),
            motion: None,
            transitions: Vec::new(),
        }))
    }

    fn populate(
        &self,
        session: &mut CloneSession,
        source: &SourceState,
        clone: &Self::Output,
    ) -> Result<(), CloneError> {
        let motion = source
            .motion
            .map(|key| self.animator.clone_motion(session, key))
            .transpose()?;
        let transitions = self
            .animator
            .resolve_state_transitions(session, &source.transitions)?;
        let mut state = clone.borrow_mut();
        state.motion = motion;
        state.transitions = transitions;
        Ok(())
    }
}

/// Clone kind for state transitions (including any-state transitions).
#[derive(Debug)]
pub struct StateTransitionKind<'a> {
    animator: &'a Animator,
}

impl<'a> StateTransitionKind<'a> {
    /// Kind bound to `animator`'s graph.
    pub fn new(animator: &'a Animator) -> Self {
        Self { animator }
    }
}

impl CloneKind for StateTransitionKind<'_> {
    const KIND: NodeKind = NodeKind::StateTransition;
    type Source = SourceStateTransition;
    type Output = Shared<VirtualStateTransition>;

    fn instantiate(&self, source: &SourceStateTransition) -> Result<Self::Output, CloneError> {
        Ok(shared(VirtualStateTransition {
            destination: None,
            exit_time: source.exit_time,
        }))
    }

    fn populate(
        &self,
        session: &mut CloneSession,
        source: &SourceStateTransition,
        clone: &Self::Output,
    ) -> Result<(), CloneError> {
        let destination = self
            .animator
            .resolve_destination(session, source.destination)?;
        clone.borrow_mut().destination = destination;
        Ok(())
    }
}

/// Clone kind for entry transitions.
#[derive(Debug)]
pub struct TransitionKind<'a> {
    animator: &'a Animator,
}

impl<'a> TransitionKind<'a> {
    /// Kind bound to `animator`'s graph.
    pub fn new(animator: &'a Animator) -> Self {
        Self { animator }
    }
}

impl CloneKind for TransitionKind<'_> {
    const KIND: NodeKind = NodeKind::Transition;
    type Source = SourceTransition;
    type Output = Shared<VirtualTransition>;

    fn instantiate(&self, _source: &SourceTransition) -> Result<Self::Output, CloneError> {
        Ok(shared(VirtualTransition { destination: None }))
    }

    fn populate(
        &self,
        session: &mut CloneSession,
        source: &SourceTransition,
        clone: &Self::Output,
    ) -> Result<(), CloneError> {
        let destination = self
            .animator
            .resolve_destination(session, source.destination)?;
        clone.borrow_mut().destination = destination;
        Ok(())
    }
}

/// Clone kind for blend trees.
#[derive(Debug)]
pub struct MotionKind<'a> {
    animator: &'a Animator,
}

impl<'a> MotionKind<'a> {
    /// Kind bound to `animator`'s graph.
    pub fn new(animator: &'a Animator) -> Self {
        Self { animator }
    }
}

impl CloneKind for MotionKind<'_> {
    const KIND: NodeKind = NodeKind::Motion;
    type Source = SourceMotion;
    type Output = Shared<VirtualMotion>;

    fn instantiate(&self, source: &SourceMotion) -> Result<Self::Output, CloneError> {
        Ok(shared(VirtualMotion {
            name: source.name.clone(),
            children: Vec::new(),
        }))
    }

    fn populate(
        &self,
        session: &mut CloneSession,
        source: &SourceMotion,
        clone: &Self::Output,
    ) -> Result<(), CloneError> {
        let children = source
            .children
            .iter()
            .map(|key| self.animator.clone_motion(session, *key))
            .collect::<Result<Vec<_>, _>>()?;
        clone.borrow_mut().children = children;
        Ok(())
    }
}

/// Clone kind for clips. Leaves have no children.
#[derive(Debug, Clone, Copy)]
pub struct ClipKind;

impl CloneKind for ClipKind {
    const KIND: NodeKind = NodeKind::Clip;
    type Source = SourceClip;
    type Output = Shared<VirtualClip>;

    fn instantiate(&self, source: &SourceClip) -> Result<Self::Output, CloneError> {
        Ok(shared(VirtualClip {
            name: source.name.clone(),
            length: source.length,
            source: source.key,
        }))
    }

    fn populate(
        &self,
        _session: &mut CloneSession,
        _source: &SourceClip,
        _clone: &Self::Output,
    ) -> Result<(), CloneError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn typed_lookup_rejects_other_kinds() {
        let mut graph = SourceGraph::new();
        let clip = graph.add_clip("idle", 1.0).expect("clip");
        assert!(graph.clip(clip).is_ok());
        assert!(matches!(
            graph.state(clip),
            Err(CloneError::KindMismatch(k)) if k == clip
        ));
        let forged = SourceKey::new(NodeKind::Clip, 99);
        assert!(matches!(graph.clip(forged), Err(CloneError::Node { .. })));
    }

    #[test]
    fn handles_follow_insertion_order() {
        let mut graph = SourceGraph::new();
        let a = graph.add_clip("a", 1.0).expect("a");
        let b = graph.add_clip("a", 1.0).expect("b");
        assert_ne!(a, b, "identical contents still get distinct keys");
        assert_eq!(b.handle.value(), a.handle.value() + 1);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn state_transitions_register_on_their_source_state() {
        let mut graph = SourceGraph::new();
        let a = graph.add_state("a", None).expect("a");
        let b = graph.add_state("b", None).expect("b");
        let t = graph.add_state_transition(a, b, 0.5).expect("transition");
        assert_eq!(graph.state(a).expect("a").transitions, vec![t]);
        assert_eq!(
            graph.state_transition(t).expect("t").destination,
            Some(b)
        );
    }

    #[test]
    fn arena_refuses_indices_past_u32() {
        let last = usize::try_from(u32::MAX).expect("usize holds u32");
        assert_eq!(handle_for(last).expect("last handle"), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(handle_for(last + 1), Err(CloneError::ArenaFull)));
    }
}
