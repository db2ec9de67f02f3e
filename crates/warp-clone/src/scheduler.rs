// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reentrant deferred-action scheduler.
//!
//! Clone functions run nested inside each other. Work that must observe the
//! finished graph (wiring a default state, resolving a forward reference) is
//! queued and runs once the outermost clone call unwinds. This is a
//! trampoline over a depth counter, not a thread scheduler: nothing blocks and
//! everything runs on the caller's stack.
//!
//! # Draining
//!
//! The drain starts exactly on the 1 → 0 depth transition. It runs with the
//! depth bumped back to one, so clone calls and enqueues made by a draining
//! action are queued again instead of starting a nested drain. The loop runs
//! until the queue is empty, including actions enqueued during the drain.
//!
//! # Failure policy
//!
//! Best effort: a failing action does not stop the drain. The first error is
//! returned once the queue is empty; later errors are logged and counted in
//! [`DrainReport::failed`].
//!
//! A panicking action is different: the live substitution stack and the
//! depth are restored, the remaining queue is dropped, and the panic resumes.

use std::collections::VecDeque;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::error::CloneError;
use crate::session::CloneSession;
use crate::substitution::SubstitutionStack;

/// Deferred unit of work. Receives the session it was enqueued on.
pub type DeferredFn = Box<dyn FnOnce(&mut CloneSession) -> Result<(), CloneError>>;

/// Deferred work plus the substitution context captured at enqueue time.
pub(crate) struct DeferredAction {
    action: DeferredFn,
    context: SubstitutionStack,
}

/// Summary of the most recent drain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Actions executed, including failed ones.
    pub executed: usize,
    /// Actions that returned an error.
    pub failed: usize,
}

/// Nesting depth and FIFO queue of one session.
#[derive(Default)]
pub(crate) struct Scheduler {
    depth: usize,
    queue: VecDeque<DeferredAction>,
}

impl Scheduler {
    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn enter(&mut self) {
        self.depth += 1;
    }

    /// Leaves one nesting level. Returns `true` when the outermost call ended.
    pub(crate) fn leave(&mut self) -> bool {
        debug_assert!(self.depth > 0, "clone depth underflow");
        self.depth = self.depth.saturating_sub(1);
        self.depth == 0
    }

    pub(crate) fn defer(&mut self, action: DeferredFn, context: SubstitutionStack) {
        self.queue.push_back(DeferredAction { action, context });
    }

    /// Drops every queued action. Returns how many were dropped.
    pub(crate) fn abandon(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    fn pop(&mut self) -> Option<DeferredAction> {
        self.queue.pop_front()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("depth", &self.depth)
            .field("pending", &self.queue.len())
            .finish_non_exhaustive()
    }
}

/// Runs every queued action to exhaustion.
///
/// Each action sees its captured substitution stack; the stack that was live
/// before the drain is put back after every action, whatever the action did,
/// including panicking.
pub(crate) fn drain(session: &mut CloneSession) -> Result<DrainReport, CloneError> {
    if session.scheduler.pending() == 0 {
        session.last_drain = DrainReport::default();
        return Ok(session.last_drain);
    }
    debug!(
        pending = session.scheduler.pending(),
        "draining deferred clone actions"
    );
    session.scheduler.enter();
    let mut report = DrainReport::default();
    let mut first_error = None;
    while let Some(DeferredAction { action, context }) = session.scheduler.pop() {
        let prior = std::mem::replace(&mut session.substitutions, context);
        let outcome = catch_unwind(AssertUnwindSafe(|| action(session)));
        session.substitutions = prior;
        report.executed += 1;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                report.failed += 1;
                session.scheduler.leave();
                let dropped = session.scheduler.abandon();
                warn!(
                    dropped,
                    "deferred clone action panicked; dropping the rest of the queue"
                );
                session.last_drain = report;
                resume_unwind(payload);
            }
        };
        if let Err(err) = outcome {
            report.failed += 1;
            if first_error.is_none() {
                first_error = Some(err);
            } else {
                warn!(error = %err, "deferred clone action failed");
            }
        }
    }
    session.scheduler.leave();
    debug!(
        executed = report.executed,
        failed = report.failed,
        "deferred clone actions drained"
    );
    session.last_drain = report;
    first_error.map_or(Ok(report), Err)
}
