// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identity map: source key → clone handle.
use std::any::Any;

use rustc_hash::FxHashMap;

use crate::error::CloneError;
use crate::ident::SourceKey;

enum Slot {
    /// A single-phase clone function for this key is still running.
    Pending,
    Ready(Box<dyn Any>),
}

/// Outcome of probing the map for a key.
pub(crate) enum Lookup<C> {
    Hit(C),
    Pending,
    Miss,
}

/// Memoization table of one clone session.
///
/// Holds at most one entry per [`SourceKey`]. Stored handles are type-erased;
/// reading one back with a different type than it was stored with is a
/// [`CloneError::KindMismatch`].
#[derive(Default)]
pub struct IdentityMap {
    entries: FxHashMap<SourceKey, Slot>,
}

impl IdentityMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered clones (pending entries excluded).
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    /// Returns `true` when no clone has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if a clone is registered for `key`.
    pub fn contains(&self, key: SourceKey) -> bool {
        matches!(self.entries.get(&key), Some(Slot::Ready(_)))
    }

    /// Returns the clone registered for `key`, if any.
    ///
    /// # Errors
    /// [`CloneError::KindMismatch`] if the stored handle is not a `C`.
    pub fn get<C: Clone + 'static>(&self, key: SourceKey) -> Result<Option<C>, CloneError> {
        match self.lookup(key)? {
            Lookup::Hit(clone) => Ok(Some(clone)),
            Lookup::Pending | Lookup::Miss => Ok(None),
        }
    }

    pub(crate) fn lookup<C: Clone + 'static>(
        &self,
        key: SourceKey,
    ) -> Result<Lookup<C>, CloneError> {
        match self.entries.get(&key) {
            None => Ok(Lookup::Miss),
            Some(Slot::Pending) => Ok(Lookup::Pending),
            Some(Slot::Ready(stored)) => stored
                .downcast_ref::<C>()
                .cloned()
                .map(Lookup::Hit)
                .ok_or(CloneError::KindMismatch(key)),
        }
    }

    pub(crate) fn mark_pending(&mut self, key: SourceKey) {
        self.entries.insert(key, Slot::Pending);
    }

    /// Drops a pending mark; registered clones are left untouched.
    pub(crate) fn clear_pending(&mut self, key: SourceKey) {
        if matches!(self.entries.get(&key), Some(Slot::Pending)) {
            self.entries.remove(&key);
        }
    }

    pub(crate) fn insert<C: 'static>(&mut self, key: SourceKey, clone: C) {
        self.entries.insert(key, Slot::Ready(Box::new(clone)));
    }
}

impl std::fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityMap")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
