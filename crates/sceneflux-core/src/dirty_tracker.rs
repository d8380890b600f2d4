//! Shared dirty-object set with multiple independent pollers.
//!
//! Producers call [`GlobalDirtyTracker::mark_dirty`] without knowing who
//! consumes the marks. Each consumer registers a poller and runs one
//! read/reset cycle per frame:
//!
//! ```text
//! Idle --get_dirty_objects--> Read --reset_dirty_objects--> Idle (consumed)
//! ```
//!
//! The shared set is only cleared once every registered poller has consumed
//! it. A poller whose view went stale because a producer marked something
//! after it read (`needs_gather`) gets its pre-reset callback invoked with
//! the full set right before the clear.
//!
//! All producers and pollers must run on the same logical thread per frame;
//! the "last consumer clears" step assumes nobody inserts concurrently.

use std::fmt::Debug;
use std::hash::Hash;

use rustc_hash::FxHashSet;

use crate::bitset::BitSet;
use crate::error::{ContractResult, ContractViolation, contract_violation};

pub type DirtySet<H> = FxHashSet<H>;

/// Called on a stale poller right before the shared set is cleared.
pub type PreResetCallback<H> = Box<dyn FnMut(&DirtySet<H>)>;

/// Identifies a registered poller. Indices are reused after destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollHandle(u32);

impl PollHandle {
    pub fn index(self) -> u32 {
        self.0
    }
}

struct PollerStatus<H> {
    needs_gather: bool,
    pre_reset: Option<PreResetCallback<H>>,
}

pub struct GlobalDirtyTracker<H> {
    dirty_objects: DirtySet<H>,
    pollers: Vec<Option<PollerStatus<H>>>,
    /// Registered poller slots.
    assigned: BitSet,
    /// Pollers between `get_dirty_objects` and their reset.
    has_read: BitSet,
    /// Pollers that finished a read/reset this cycle.
    consumed: BitSet,
    /// Poller holding the dirty-list lock until its own reset.
    lock_owner: Option<PollHandle>,
}

impl<H> Default for GlobalDirtyTracker<H>
where
    H: Copy + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Debug for GlobalDirtyTracker<H>
where
    H: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalDirtyTracker")
            .field("dirty_objects", &self.dirty_objects)
            .field("pollers", &self.assigned.count())
            .field("has_read", &self.has_read.count())
            .field("consumed", &self.consumed.count())
            .field("lock_owner", &self.lock_owner)
            .finish()
    }
}

impl<H> GlobalDirtyTracker<H>
where
    H: Copy + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self::with_poller_capacity(0)
    }

    /// Pre-size poller bookkeeping. Registering more pollers still works;
    /// storage grows on demand.
    pub fn with_poller_capacity(capacity: usize) -> Self {
        Self {
            dirty_objects: DirtySet::default(),
            pollers: Vec::with_capacity(capacity),
            assigned: BitSet::new(capacity),
            has_read: BitSet::new(capacity),
            consumed: BitSet::new(capacity),
            lock_owner: None,
        }
    }

    // -- producers ----------------------------------------------------------

    /// Record `handle` as dirty for every registered poller.
    ///
    /// # Panics
    /// If a poller locked the dirty list and has not reset yet.
    pub fn mark_dirty(&mut self, handle: H) {
        if let Err(err) = self.try_mark_dirty(handle) {
            contract_violation(err);
        }
    }

    pub fn try_mark_dirty(&mut self, handle: H) -> ContractResult<()> {
        if self.lock_owner.is_some() {
            return Err(ContractViolation::DirtyListLocked {
                handle: format!("{handle:?}"),
            });
        }
        if self.assigned.is_empty() {
            return Ok(());
        }
        self.dirty_objects.insert(handle);

        // Pollers that already read have not seen this handle.
        if self.assigned.count() > 1 {
            for poller in self.pollers.iter_mut().flatten() {
                poller.needs_gather = true;
            }
        }
        Ok(())
    }

    // -- poller registry ----------------------------------------------------

    pub fn create_poller(&mut self) -> PollHandle {
        self.register(None)
    }

    /// Register a poller whose `callback` runs when the set is about to be
    /// cleared while this poller's last read is stale.
    pub fn create_poller_with_pre_reset(
        &mut self,
        callback: impl FnMut(&DirtySet<H>) + 'static,
    ) -> PollHandle {
        self.register(Some(Box::new(callback)))
    }

    fn register(&mut self, pre_reset: Option<PreResetCallback<H>>) -> PollHandle {
        let status = PollerStatus {
            needs_gather: true,
            pre_reset,
        };
        let index = match self.pollers.iter().position(Option::is_none) {
            Some(free) => {
                self.pollers[free] = Some(status);
                free
            }
            None => {
                self.pollers.push(Some(status));
                self.pollers.len() - 1
            }
        };
        self.assigned.set(index);
        log::trace!("created dirty poller {index} ({} registered)", self.assigned.count());
        PollHandle(index as u32)
    }

    /// # Panics
    /// If `handle` is unknown or still holds an unreset read.
    pub fn destroy_poller(&mut self, handle: PollHandle) {
        if let Err(err) = self.try_destroy_poller(handle) {
            contract_violation(err);
        }
    }

    pub fn try_destroy_poller(&mut self, handle: PollHandle) -> ContractResult<()> {
        let index = self.validate(handle)?;
        if self.has_read.get(index) {
            return Err(ContractViolation::OutstandingRead(handle.0));
        }
        self.pollers[index] = None;
        self.assigned.unset(index);
        self.consumed.unset(index);
        self.release_lock(handle);
        log::trace!("destroyed dirty poller {index} ({} registered)", self.assigned.count());

        if self.assigned.is_empty() {
            self.dirty_objects.clear();
            self.consumed.clear();
        } else if self.all_consumed() {
            self.finish_cycle();
        }
        Ok(())
    }

    // -- pollers ------------------------------------------------------------

    /// Start this poller's read of the shared dirty set.
    ///
    /// # Panics
    /// If `handle` is unknown.
    pub fn get_dirty_objects(&mut self, handle: PollHandle) -> &DirtySet<H> {
        match self.try_get_dirty_objects(handle) {
            Ok(set) => set,
            Err(err) => contract_violation(err),
        }
    }

    pub fn try_get_dirty_objects(&mut self, handle: PollHandle) -> ContractResult<&DirtySet<H>> {
        let index = self.validate(handle)?;
        if let Some(poller) = self.pollers[index].as_mut() {
            poller.needs_gather = false;
        }
        self.has_read.set(index);
        Ok(&self.dirty_objects)
    }

    /// Forbid `mark_dirty` until this poller resets: the caller consumes
    /// the dirty set destructively. Resets of other pollers keep the lock.
    ///
    /// # Panics
    /// If `handle` is unknown.
    pub fn lock_dirty_list_until_reset(&mut self, handle: PollHandle) {
        if let Err(err) = self.validate(handle) {
            contract_violation(err);
        }
        self.lock_owner = Some(handle);
    }

    /// Finish this poller's read. Clears the shared set once every
    /// registered poller has consumed it.
    ///
    /// # Panics
    /// If `handle` is unknown or did not call `get_dirty_objects` first.
    pub fn reset_dirty_objects(&mut self, handle: PollHandle) {
        if let Err(err) = self.try_reset_dirty_objects(handle) {
            contract_violation(err);
        }
    }

    pub fn try_reset_dirty_objects(&mut self, handle: PollHandle) -> ContractResult<()> {
        let index = self.validate_read(handle)?;
        self.has_read.unset(index);
        self.consumed.set(index);
        self.release_lock(handle);

        if self.all_consumed() {
            self.finish_cycle();
        }
        Ok(())
    }

    /// Reset immediately if `handle` is the only registered poller.
    /// Returns `false`, doing nothing, when other pollers exist.
    ///
    /// # Panics
    /// If `handle` is unknown, or is the single poller and has not read.
    pub fn reset_dirty_objects_if_single_poller(&mut self, handle: PollHandle) -> bool {
        match self.try_reset_dirty_objects_if_single_poller(handle) {
            Ok(reset) => reset,
            Err(err) => contract_violation(err),
        }
    }

    pub fn try_reset_dirty_objects_if_single_poller(
        &mut self,
        handle: PollHandle,
    ) -> ContractResult<bool> {
        self.validate(handle)?;
        if self.assigned.count() != 1 {
            return Ok(false);
        }
        let index = self.validate_read(handle)?;
        self.has_read.unset(index);
        self.consumed.clear();
        self.dirty_objects.clear();
        self.release_lock(handle);
        Ok(true)
    }

    // -- inspection ---------------------------------------------------------

    /// The shared set, without starting a read.
    pub fn dirty_objects(&self) -> &DirtySet<H> {
        &self.dirty_objects
    }

    pub fn is_dirty(&self, handle: &H) -> bool {
        self.dirty_objects.contains(handle)
    }

    pub fn num_pollers(&self) -> usize {
        self.assigned.count()
    }

    /// True if objects were marked since this poller's last read.
    pub fn needs_gather(&self, handle: PollHandle) -> bool {
        self.pollers
            .get(handle.0 as usize)
            .and_then(Option::as_ref)
            .is_some_and(|poller| poller.needs_gather)
    }

    pub fn has_outstanding_read(&self, handle: PollHandle) -> bool {
        self.has_read.get(handle.0 as usize)
    }

    pub fn is_dirty_list_locked(&self) -> bool {
        self.lock_owner.is_some()
    }

    // -- internals ----------------------------------------------------------

    fn validate(&self, handle: PollHandle) -> ContractResult<usize> {
        let index = handle.0 as usize;
        if self.assigned.get(index) {
            Ok(index)
        } else {
            Err(ContractViolation::UnknownPoller(handle.0))
        }
    }

    fn validate_read(&self, handle: PollHandle) -> ContractResult<usize> {
        let index = self.validate(handle)?;
        if self.has_read.get(index) {
            Ok(index)
        } else {
            Err(ContractViolation::ResetWithoutRead(handle.0))
        }
    }

    // `consumed` is always a subset of `assigned`. A poller may read again
    // after consuming; the set stays until that read is reset too.
    fn all_consumed(&self) -> bool {
        !self.assigned.is_empty()
            && self.has_read.is_empty()
            && self.consumed.count() == self.assigned.count()
    }

    fn release_lock(&mut self, handle: PollHandle) {
        if self.lock_owner == Some(handle) {
            self.lock_owner = None;
        }
    }

    fn finish_cycle(&mut self) {
        let mut regathered = 0usize;
        for poller in self.pollers.iter_mut().flatten() {
            if !poller.needs_gather {
                continue;
            }
            if let Some(callback) = poller.pre_reset.as_mut() {
                callback(&self.dirty_objects);
                regathered += 1;
            }
            poller.needs_gather = false;
        }
        log::trace!(
            "dirty cycle finished: clearing {} objects, {regathered} late gathers",
            self.dirty_objects.len()
        );
        self.dirty_objects.clear();
        self.consumed.clear();
    }
}
