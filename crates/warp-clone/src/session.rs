// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Clone session: the orchestrator node-kind clone functions talk to.
use std::any::Any;
use std::ops::{Deref, DerefMut};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{trace, trace_span, warn};

use crate::alloc::{LayerRange, VirtualLayerAllocator};
use crate::config::SessionConfig;
use crate::error::{CloneError, ConfigError};
use crate::ident::{SourceKey, SourceNode};
use crate::identity::{IdentityMap, Lookup};
use crate::kind::CloneKind;
use crate::scheduler::{self, DrainReport, Scheduler};
use crate::substitution::{Substitution, SubstitutionStack};

/// State of one cloning task.
///
/// Owns the identity map, the deferred-action queue and nesting depth, the
/// substitution stack, and the virtual layer allocator. Produced clones are
/// shared handles; the session keeps one copy of each for memoization and
/// never constrains how callers mutate them.
///
/// A session is single-threaded (`!Send`). Run concurrent cloning tasks on
/// separate sessions.
///
/// # Cycles
///
/// [`CloneSession::resolve`] registers its result only after the clone
/// function returns; a cycle back to the same source fails with
/// [`CloneError::CycleWithoutShell`]. Kinds that can participate in cycles use
/// the two-phase [`CloneSession::resolve_cyclic`] (or a [`CloneKind`]), which
/// registers the shell before any child is resolved.
#[derive(Debug)]
pub struct CloneSession {
    config: SessionConfig,
    identity: IdentityMap,
    pub(crate) scheduler: Scheduler,
    pub(crate) substitutions: SubstitutionStack,
    allocator: VirtualLayerAllocator,
    pub(crate) last_drain: DrainReport,
}

impl Default for CloneSession {
    fn default() -> Self {
        Self::from_valid_config(SessionConfig::default())
    }
}

impl CloneSession {
    /// Creates a session with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session from `config`.
    ///
    /// # Errors
    /// Returns the [`ConfigError`] reported by [`SessionConfig::validate`].
    pub fn with_config(config: SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: SessionConfig) -> Self {
        Self {
            allocator: VirtualLayerAllocator::new(config.virtual_layer_base),
            config,
            identity: IdentityMap::new(),
            scheduler: Scheduler::default(),
            substitutions: SubstitutionStack::new(),
            last_drain: DrainReport::default(),
        }
    }

    /// Configuration this session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ── Identity ────────────────────────────────────────────────────────────

    /// Returns the clone of `source`, invoking `clone_fn` on first sight only.
    ///
    /// An absent source yields `Ok(None)` without side effects. The result is
    /// registered after `clone_fn` returns; deferred actions drain when the
    /// outermost clone call finishes, success or failure.
    ///
    /// # Errors
    /// - [`CloneError::CycleWithoutShell`] if `source` is already being cloned
    ///   by an enclosing `resolve`.
    /// - [`CloneError::KindMismatch`] if a clone of another type is registered.
    /// - Any error from `clone_fn`, unmodified (no entry is registered), or
    ///   from a deferred action drained on the way out.
    ///
    /// # Panics
    /// A panic from `clone_fn` is resumed after the pending mark is cleared and
    /// the depth restored. If it unwinds the outermost call, queued deferred
    /// actions are dropped unrun.
    pub fn resolve<S, C, F>(
        &mut self,
        source: Option<&S>,
        clone_fn: F,
    ) -> Result<Option<C>, CloneError>
    where
        S: SourceNode + ?Sized,
        C: Clone + 'static,
        F: FnOnce(&mut Self, &S) -> Result<C, CloneError>,
    {
        let Some(source) = source else {
            return Ok(None);
        };
        let key = source.source_key();
        match self.identity.lookup::<C>(key)? {
            Lookup::Hit(clone) => {
                trace!(%key, "identity hit");
                return Ok(Some(clone));
            }
            Lookup::Pending => return Err(CloneError::CycleWithoutShell(key)),
            Lookup::Miss => {}
        }

        self.identity.mark_pending(key);
        self.scheduler.enter();
        let outcome = match catch_unwind(AssertUnwindSafe(|| clone_fn(self, source))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                self.identity.clear_pending(key);
                self.unwind_call(payload)
            }
        };
        match &outcome {
            Ok(clone) => self.identity.insert(key, clone.clone()),
            Err(_) => self.identity.clear_pending(key),
        }
        self.finish_call(outcome).map(Some)
    }

    /// Two-phase variant of [`Self::resolve`] for nodes that may sit on a cycle.
    ///
    /// `instantiate` builds the shell, which is registered before `populate`
    /// resolves children. A cycle back to `source` observes the shell.
    ///
    /// # Errors
    /// As [`Self::resolve`]. If `populate` fails the shell stays registered,
    /// since descendants may already hold it.
    ///
    /// # Panics
    /// As [`Self::resolve`]; the shell stays registered.
    pub fn resolve_cyclic<S, C, I, P>(
        &mut self,
        source: Option<&S>,
        instantiate: I,
        populate: P,
    ) -> Result<Option<C>, CloneError>
    where
        S: SourceNode + ?Sized,
        C: Clone + 'static,
        I: FnOnce(&S) -> Result<C, CloneError>,
        P: FnOnce(&mut Self, &S, &C) -> Result<(), CloneError>,
    {
        let Some(source) = source else {
            return Ok(None);
        };
        let key = source.source_key();
        match self.identity.lookup::<C>(key)? {
            Lookup::Hit(clone) => {
                trace!(%key, "identity hit");
                return Ok(Some(clone));
            }
            Lookup::Pending => return Err(CloneError::CycleWithoutShell(key)),
            Lookup::Miss => {}
        }

        let shell = instantiate(source)?;
        self.identity.insert(key, shell.clone());
        self.scheduler.enter();
        let outcome = match catch_unwind(AssertUnwindSafe(|| populate(self, source, &shell))) {
            Ok(outcome) => outcome.map(|()| shell),
            Err(payload) => self.unwind_call(payload),
        };
        self.finish_call(outcome).map(Some)
    }

    /// Per-kind entry point: clones `source` with `kind`'s clone function.
    ///
    /// # Errors
    /// [`CloneError::KindMismatch`] if `source` is not of kind `K::KIND`,
    /// otherwise as [`Self::resolve_cyclic`].
    pub fn resolve_kind<K: CloneKind>(
        &mut self,
        kind: &K,
        source: Option<&K::Source>,
    ) -> Result<Option<K::Output>, CloneError> {
        let Some(source) = source else {
            return Ok(None);
        };
        let key = source.source_key();
        if key.kind != K::KIND {
            return Err(CloneError::KindMismatch(key));
        }
        let span = trace_span!(
            "clone",
            kind = K::KIND.label(),
            handle = key.handle.value()
        );
        let _entered = span.enter();
        self.resolve_cyclic(
            Some(source),
            |src| kind.instantiate(src),
            |session, src, clone| kind.populate(session, src, clone),
        )
    }

    /// Returns the clone registered for `source`.
    ///
    /// # Errors
    /// [`CloneError::MissingKey`] if `source` is absent or has no clone yet,
    /// [`CloneError::KindMismatch`] if the clone is not a `C`.
    pub fn lookup<S, C>(&self, source: Option<&S>) -> Result<C, CloneError>
    where
        S: SourceNode + ?Sized,
        C: Clone + 'static,
    {
        let source = source.ok_or(CloneError::MissingKey)?;
        self.identity
            .get(source.source_key())?
            .ok_or(CloneError::MissingKey)
    }

    /// Returns the clone registered for `key`, if any.
    ///
    /// # Errors
    /// [`CloneError::KindMismatch`] if the clone is not a `C`.
    pub fn try_get<C: Clone + 'static>(&self, key: SourceKey) -> Result<Option<C>, CloneError> {
        self.identity.get(key)
    }

    /// Returns `true` if a clone is registered for `key`.
    pub fn contains(&self, key: SourceKey) -> bool {
        self.identity.contains(key)
    }

    /// Number of clones registered so far.
    pub fn clone_count(&self) -> usize {
        self.identity.len()
    }

    /// Leaves the call a panic is unwinding through, then resumes the panic.
    ///
    /// Work queued under an outermost call that panicked is discarded.
    fn unwind_call(&mut self, payload: Box<dyn Any + Send>) -> ! {
        if self.scheduler.leave() {
            let dropped = self.scheduler.abandon();
            if dropped > 0 {
                warn!(dropped, "discarding deferred clone actions after a panic");
            }
        }
        resume_unwind(payload)
    }

    fn finish_call<T>(&mut self, outcome: Result<T, CloneError>) -> Result<T, CloneError> {
        if !self.scheduler.leave() {
            return outcome;
        }
        match (outcome, scheduler::drain(self)) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(err)) | (Err(err), Ok(_)) => Err(err),
            (Err(err), Err(deferred)) => {
                warn!(error = %deferred, "deferred clone action failed after a failed clone");
                Err(err)
            }
        }
    }

    // ── Substitution ────────────────────────────────────────────────────────

    /// Opens a substitution scope; dropping the guard closes it.
    ///
    /// The guard dereferences to the session, so cloning inside the scope goes
    /// through it. Nested scopes borrow the enclosing guard, which keeps the
    /// release order strict.
    pub fn push_scope<T>(&mut self, transform: T) -> SubstitutionScope<'_>
    where
        T: Substitution + 'static,
    {
        let mark = self.substitutions.push(Rc::new(transform));
        SubstitutionScope {
            session: self,
            mark,
        }
    }

    /// Runs `f` with `transform` pushed, popping it on every exit path.
    pub fn with_scope<T, R>(&mut self, transform: T, f: impl FnOnce(&mut Self) -> R) -> R
    where
        T: Substitution + 'static,
    {
        let mut scope = self.push_scope(transform);
        f(&mut *scope)
    }

    /// Applies every active substitution to a leaf key, oldest first.
    pub fn apply_all(&self, leaf: SourceKey) -> SourceKey {
        self.substitutions.apply_all(leaf)
    }

    /// Number of active substitution scopes.
    pub fn substitution_depth(&self) -> usize {
        self.substitutions.depth()
    }

    /// By-value copy of the active substitution stack.
    pub fn substitution_snapshot(&self) -> SubstitutionStack {
        self.substitutions.snapshot()
    }

    // ── Scheduling ──────────────────────────────────────────────────────────

    /// Runs `action` now when no clone call is in progress, otherwise queues
    /// it (with the current substitution stack) until the outermost call ends.
    ///
    /// # Errors
    /// Only when run immediately: the action's own error.
    pub fn enqueue<F>(&mut self, action: F) -> Result<(), CloneError>
    where
        F: FnOnce(&mut Self) -> Result<(), CloneError> + 'static,
    {
        if self.scheduler.depth() == 0 {
            return action(self);
        }
        let context = self.substitutions.snapshot();
        self.scheduler.defer(Box::new(action), context);
        Ok(())
    }

    /// Current clone nesting depth.
    pub fn depth(&self) -> usize {
        self.scheduler.depth()
    }

    /// Returns `true` while a clone call (or a drain) is on the stack.
    pub fn is_cloning(&self) -> bool {
        self.scheduler.depth() > 0
    }

    /// Number of queued deferred actions.
    pub fn pending_actions(&self) -> usize {
        self.scheduler.pending()
    }

    /// Summary of the most recent drain.
    pub fn last_drain(&self) -> DrainReport {
        self.last_drain
    }

    // ── Virtual layers ──────────────────────────────────────────────────────

    /// Reserves `n` virtual layer indices; see [`VirtualLayerAllocator::allocate_range`].
    ///
    /// # Errors
    /// As [`VirtualLayerAllocator::allocate_range`].
    pub fn allocate_range(&mut self, n: i32) -> Result<i32, CloneError> {
        self.allocator.allocate_range(n)
    }

    /// Consumes one virtual layer index; see [`VirtualLayerAllocator::allocate_single`].
    ///
    /// # Errors
    /// As [`VirtualLayerAllocator::allocate_single`].
    pub fn allocate_single(&mut self) -> Result<i32, CloneError> {
        self.allocator.allocate_single()
    }

    /// Maps a physical layer index onto the active virtual range.
    pub fn translate_physical_to_virtual(&self, physical: i32) -> Option<i32> {
        self.allocator.translate_physical_to_virtual(physical)
    }

    /// As [`Self::translate_physical_to_virtual`], with `-1` for out-of-range.
    pub fn translate_or_invalid(&self, physical: i32) -> i32 {
        self.allocator.translate_or_invalid(physical)
    }

    /// The active virtual layer range.
    pub fn active_layer_range(&self) -> LayerRange {
        self.allocator.active_range()
    }
}

/// Guard for an open substitution scope.
///
/// Dereferences to the owning [`CloneSession`]. Dropping it pops exactly the
/// frame it pushed.
///
/// # Panics
/// On drop, with an [`crate::UnbalancedScope`] payload if the stack depth is
/// not what this scope left it at (for example after leaking an inner guard).
pub struct SubstitutionScope<'s> {
    session: &'s mut CloneSession,
    mark: usize,
}

impl Deref for SubstitutionScope<'_> {
    type Target = CloneSession;

    fn deref(&self) -> &CloneSession {
        self.session
    }
}

impl DerefMut for SubstitutionScope<'_> {
    fn deref_mut(&mut self) -> &mut CloneSession {
        self.session
    }
}

impl Drop for SubstitutionScope<'_> {
    fn drop(&mut self) {
        self.session.substitutions.release(self.mark);
    }
}

impl std::fmt::Debug for SubstitutionScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubstitutionScope")
            .field("mark", &self.mark)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ident::NodeKind;
    use std::cell::RefCell;

    fn clip(raw: u32) -> SourceKey {
        SourceKey::new(NodeKind::Clip, raw)
    }

    #[test]
    fn absent_source_is_a_no_op() {
        let mut session = CloneSession::new();
        let out: Option<Rc<u32>> = session
            .resolve(None::<&SourceKey>, |_, _| Ok(Rc::new(1)))
            .unwrap();
        assert!(out.is_none());
        assert_eq!(session.clone_count(), 0);
        assert_eq!(session.depth(), 0);
    }

    #[test]
    fn failed_clone_registers_nothing() {
        let mut session = CloneSession::new();
        let key = clip(4);
        let err = session
            .resolve::<_, Rc<u32>, _>(Some(&key), |_, k| Err(CloneError::node(*k, "broken")))
            .expect_err("clone fails");
        assert!(matches!(err, CloneError::Node { key: k, .. } if k == key));
        assert!(!session.contains(key));
        assert_eq!(session.depth(), 0);
        // A later attempt is a fresh miss, not a cycle.
        let ok: Option<Rc<u32>> = session.resolve(Some(&key), |_, _| Ok(Rc::new(2))).unwrap();
        assert_eq!(ok.as_deref(), Some(&2));
    }

    #[test]
    fn enqueue_outside_clone_runs_immediately() {
        let mut session = CloneSession::new();
        let ran = Rc::new(RefCell::new(false));
        let flag = Rc::clone(&ran);
        session
            .enqueue(move |_| {
                *flag.borrow_mut() = true;
                Ok(())
            })
            .unwrap();
        assert!(*ran.borrow());
        assert_eq!(session.pending_actions(), 0);
    }

    #[test]
    fn scope_guard_derefs_to_session() {
        let mut session = CloneSession::new();
        {
            let mut scope = session.push_scope(|leaf: SourceKey| {
                if leaf == clip(1) {
                    clip(2)
                } else {
                    leaf
                }
            });
            assert_eq!(scope.apply_all(clip(1)), clip(2));
            let start = scope.allocate_range(2).unwrap();
            assert_eq!(scope.translate_physical_to_virtual(1), Some(start + 1));
        }
        assert_eq!(session.substitution_depth(), 0);
        assert_eq!(session.apply_all(clip(1)), clip(1));
    }

    #[test]
    fn low_base_config_is_rejected() {
        let cfg = SessionConfig::default().with_virtual_layer_base(0);
        assert!(CloneSession::with_config(cfg).is_err());
    }
}
