//! Per-frame batching of scene object updates.
//!
//! Producers enqueue adds, deletes and typed payloads against a handle during
//! a frame; a single consumer then walks the batch and calls
//! [`UpdateCommandQueue::reset`]. Each distinct handle gets exactly one
//! [`Command`] per cycle, and each command holds at most one payload of each
//! type: enqueueing the same type again overwrites the existing payload in
//! place.
//!
//! A command tracks its payloads with a `u64` mask (bit `i` set iff a payload
//! with id `i` is attached) and a short list of storage slots ordered by id.
//! The list position of payload `T` is `popcount(mask & T::ID.exclusive_mask())`,
//! so memory grows with the payload types actually attached to a handle, not
//! with the 64 that could be declared.
//!
//! Reads borrow the queue shared and writes borrow it exclusively, so a
//! mutation can never run while a view or callback is alive.

use std::fmt::Debug;
use std::hash::Hash;
use std::iter::FusedIterator;

use bitflags::bitflags;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{ContractResult, ContractViolation, contract_violation};
use crate::payload_storage::{DirtyFlags, Payload, PayloadArray, PayloadId, PayloadStorage};

bitflags! {
    /// Which command kinds a `for_each_*` walk visits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct CommandFilter: u8 {
        const ADDED   = 1 << 0;
        const DELETED = 1 << 1;
        /// Commands that are neither added nor deleted.
        const UPDATED = 1 << 2;
        const ALL = Self::ADDED.bits() | Self::DELETED.bits() | Self::UPDATED.bits();
    }
}

/// Accumulated updates for one handle within one cycle.
#[derive(Debug, Clone)]
pub struct Command<H, F> {
    handle: H,
    persistent_id: Option<u32>,
    payload_mask: u64,
    payload_slots: SmallVec<[u32; 4]>,
    dirty_flags: F,
    added: bool,
    deleted: bool,
}

impl<H: Copy, F: DirtyFlags> Command<H, F> {
    fn new(handle: H) -> Self {
        Self {
            handle,
            persistent_id: None,
            payload_mask: 0,
            payload_slots: SmallVec::new(),
            dirty_flags: F::empty(),
            added: false,
            deleted: false,
        }
    }

    pub fn handle(&self) -> H {
        self.handle
    }

    /// Set through [`UpdateCommandQueue::set_persistent_id`], added commands only.
    pub fn persistent_id(&self) -> Option<u32> {
        self.persistent_id
    }

    /// Bit `i` is set iff a payload with id `i` is attached.
    pub fn payload_mask(&self) -> u64 {
        self.payload_mask
    }

    /// Union of the flags of every payload enqueued this cycle.
    pub fn dirty_flags(&self) -> F {
        self.dirty_flags
    }

    pub fn is_added(&self) -> bool {
        self.added
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Neither added nor deleted.
    pub fn is_update(&self) -> bool {
        !self.added && !self.deleted
    }

    pub fn has_payload<P: Payload>(&self) -> bool {
        self.payload_mask & P::ID.bit() != 0
    }

    pub fn matches(&self, filter: CommandFilter) -> bool {
        (filter.contains(CommandFilter::ADDED) && self.added)
            || (filter.contains(CommandFilter::DELETED) && self.deleted)
            || (filter.contains(CommandFilter::UPDATED) && self.is_update())
    }

    /// Storage slot of the payload with `id`, if attached.
    fn payload_slot(&self, id: PayloadId) -> Option<u32> {
        if self.payload_mask & id.bit() == 0 {
            return None;
        }
        let position = (self.payload_mask & id.exclusive_mask()).count_ones() as usize;
        Some(self.payload_slots[position])
    }

    fn insert_payload_slot(&mut self, id: PayloadId, slot: u32) {
        debug_assert_eq!(self.payload_mask & id.bit(), 0);
        let position = (self.payload_mask & id.exclusive_mask()).count_ones() as usize;
        self.payload_slots.insert(position, slot);
        self.payload_mask |= id.bit();
    }
}

/// Unordered multi-map from handle to its [`Command`], plus typed payload storage.
///
/// `H` is the scene object handle (stored by value, never owned), `F` the
/// dirty-flags type shared by every payload enqueued on this queue.
pub struct UpdateCommandQueue<H, F> {
    commands: Vec<Command<H, F>>,
    command_slots: FxHashMap<H, u32>,
    storage: PayloadStorage,
}

impl<H, F> Default for UpdateCommandQueue<H, F>
where
    H: Copy + Eq + Hash + Debug,
    F: DirtyFlags,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<H, F> Debug for UpdateCommandQueue<H, F>
where
    H: Debug,
    F: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateCommandQueue")
            .field("commands", &self.commands)
            .field("storage", &self.storage)
            .finish()
    }
}

impl<H, F> UpdateCommandQueue<H, F>
where
    H: Copy + Eq + Hash + Debug,
    F: DirtyFlags,
{
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Pre-size for `capacity` distinct handles per cycle.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
            command_slots: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            storage: PayloadStorage::new(),
        }
    }

    // -- producers ----------------------------------------------------------

    /// Record that `handle` was added to the scene.
    ///
    /// # Panics
    /// If `handle` already has a command this cycle: the add must be the
    /// first call for a new object.
    pub fn enqueue_add(&mut self, handle: H) {
        if let Err(err) = self.try_enqueue_add(handle) {
            contract_violation(err);
        }
    }

    pub fn try_enqueue_add(&mut self, handle: H) -> ContractResult<()> {
        if self.command_slots.contains_key(&handle) {
            return Err(ContractViolation::DuplicateAdd {
                handle: format!("{handle:?}"),
            });
        }
        let index = Self::command_index(&mut self.commands, &mut self.command_slots, handle);
        self.commands[index].added = true;
        Ok(())
    }

    /// Record that `handle` was removed. Payloads already attached stay in
    /// storage but are hidden from every payload view.
    pub fn enqueue_delete(&mut self, handle: H) {
        let index = Self::command_index(&mut self.commands, &mut self.command_slots, handle);
        self.commands[index].deleted = true;
    }

    /// Attach `payload` to the command for `handle`, overwriting any payload
    /// of the same type already attached.
    ///
    /// # Panics
    /// If another payload type was registered under `P::ID`.
    pub fn enqueue<P: Payload<Flags = F>>(&mut self, handle: H, payload: P) {
        if let Err(err) = self.try_enqueue(handle, payload) {
            contract_violation(err);
        }
    }

    pub fn try_enqueue<P: Payload<Flags = F>>(&mut self, handle: H, payload: P) -> ContractResult<()> {
        let flags = payload.dirty_flags();
        let array = self.storage.array_mut::<P>()?;
        let index = Self::command_index(&mut self.commands, &mut self.command_slots, handle);
        let command = &mut self.commands[index];

        match command.payload_slot(P::ID) {
            Some(slot) => array.replace(slot, payload),
            None => {
                let slot = array.push(index as u32, payload);
                command.insert_payload_slot(P::ID, slot);
            }
        }
        command.dirty_flags.insert(flags);
        Ok(())
    }

    /// Record the externally allocated persistent id of an added object.
    ///
    /// # Panics
    /// If `handle` has no command or its command is not an add.
    pub fn set_persistent_id(&mut self, handle: H, persistent_id: u32) {
        if let Err(err) = self.try_set_persistent_id(handle, persistent_id) {
            contract_violation(err);
        }
    }

    pub fn try_set_persistent_id(&mut self, handle: H, persistent_id: u32) -> ContractResult<()> {
        let command = self
            .command_slots
            .get(&handle)
            .map(|&slot| &mut self.commands[slot as usize])
            .filter(|command| command.added)
            .ok_or_else(|| ContractViolation::PersistentIdOnNonAdded {
                handle: format!("{handle:?}"),
            })?;
        command.persistent_id = Some(persistent_id);
        Ok(())
    }

    // -- consumer -----------------------------------------------------------

    pub fn has_command(&self, handle: &H) -> bool {
        self.command_slots.contains_key(handle)
    }

    pub fn find_command(&self, handle: &H) -> Option<&Command<H, F>> {
        self.command_slots
            .get(handle)
            .map(|&slot| &self.commands[slot as usize])
    }

    /// All commands in insertion order.
    pub fn commands(&self) -> &[Command<H, F>] {
        &self.commands
    }

    /// Visit every command matching `filter`, in insertion order.
    pub fn for_each_command(&self, filter: CommandFilter, mut f: impl FnMut(&Command<H, F>)) {
        self.commands
            .iter()
            .filter(|command| command.matches(filter))
            .for_each(&mut f);
    }

    /// Visit every added command with write access to its persistent id,
    /// so a consumer can assign ids in the same pass that allocates them.
    pub fn for_each_added_command_mut(&mut self, mut f: impl FnMut(AddedCommand<'_, H, F>)) {
        for command in self.commands.iter_mut().filter(|command| command.added) {
            f(AddedCommand { command });
        }
    }

    /// Like [`Self::for_each_command`], but plain updates are only visited if
    /// their dirty flags intersect `flags`. Adds and deletes always pass.
    pub fn for_each_update_command(
        &self,
        filter: CommandFilter,
        flags: F,
        f: impl FnMut(&Command<H, F>),
    ) {
        self.for_each_update_command_where(filter, |command| command.dirty_flags.intersects(flags), f);
    }

    /// Like [`Self::for_each_update_command`], filtering plain updates by
    /// their payload mask instead.
    pub fn for_each_update_command_by_mask(
        &self,
        filter: CommandFilter,
        payload_mask: u64,
        f: impl FnMut(&Command<H, F>),
    ) {
        self.for_each_update_command_where(filter, |command| command.payload_mask & payload_mask != 0, f);
    }

    fn for_each_update_command_where(
        &self,
        filter: CommandFilter,
        wanted: impl Fn(&Command<H, F>) -> bool,
        mut f: impl FnMut(&Command<H, F>),
    ) {
        for command in &self.commands {
            if command.matches(filter) && (!command.is_update() || wanted(command)) {
                f(command);
            }
        }
    }

    /// Every live payload of type `P` with its command. Deleted commands are
    /// skipped. The view can be iterated any number of times.
    ///
    /// # Panics
    /// If another payload type was registered under `P::ID`.
    pub fn range_view<P: Payload<Flags = F>>(&self) -> RangeView<'_, H, F, P> {
        let array = self
            .storage
            .array::<P>()
            .unwrap_or_else(|err| contract_violation(err));
        RangeView {
            commands: &self.commands,
            array,
        }
    }

    /// Single pass over the same items as [`Self::range_view`].
    pub fn iter<P: Payload<Flags = F>>(&self) -> PayloadIter<'_, H, F, P> {
        self.range_view::<P>().iter()
    }

    /// Number of stored payloads of type `P`, including those owned by
    /// deleted commands.
    pub fn num_items<P: Payload<Flags = F>>(&self) -> usize {
        self.range_view::<P>().array.map_or(0, PayloadArray::len)
    }

    /// The payload of type `P` attached to `command`, if any.
    pub fn payload<P: Payload<Flags = F>>(&self, command: &Command<H, F>) -> Option<&P> {
        let slot = command.payload_slot(P::ID)?;
        self.range_view::<P>().array?.get(slot)
    }

    // -- lifecycle ----------------------------------------------------------

    /// Drop every command and payload, keeping all allocations for the next
    /// cycle. No-op on an empty queue.
    pub fn reset(&mut self) {
        if self.commands.is_empty() {
            return;
        }
        log::trace!(
            "resetting update queue: {} commands, {} payload arrays",
            self.commands.len(),
            self.storage.num_arrays()
        );
        self.commands.clear();
        self.command_slots.clear();
        self.storage.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn num_commands(&self) -> usize {
        self.commands.len()
    }

    pub fn command_capacity(&self) -> usize {
        self.commands.capacity()
    }

    /// Retained capacity of the storage for `P` (0 if never used).
    pub fn payload_capacity<P: Payload<Flags = F>>(&self) -> usize {
        self.range_view::<P>().array.map_or(0, PayloadArray::capacity)
    }

    fn command_index(
        commands: &mut Vec<Command<H, F>>,
        slots: &mut FxHashMap<H, u32>,
        handle: H,
    ) -> usize {
        let next = commands.len() as u32;
        let slot = *slots.entry(handle).or_insert(next);
        if slot == next {
            commands.push(Command::new(handle));
        }
        slot as usize
    }
}

/// An added command handed out by [`UpdateCommandQueue::for_each_added_command_mut`].
pub struct AddedCommand<'a, H, F> {
    command: &'a mut Command<H, F>,
}

impl<H: Copy, F: DirtyFlags> AddedCommand<'_, H, F> {
    pub fn handle(&self) -> H {
        self.command.handle
    }

    pub fn command(&self) -> &Command<H, F> {
        self.command
    }

    /// Overwrites any id set earlier this cycle.
    pub fn set_persistent_id(&mut self, persistent_id: u32) {
        self.command.persistent_id = Some(persistent_id);
    }
}

/// One live payload and the command that owns it.
#[derive(Debug)]
pub struct PayloadEntry<'a, H, F, P> {
    pub payload: &'a P,
    pub command: &'a Command<H, F>,
}

impl<H: Copy, F, P> PayloadEntry<'_, H, F, P> {
    pub fn handle(&self) -> H {
        self.command.handle
    }
}

/// Re-iterable view over the live payloads of one type.
pub struct RangeView<'a, H, F, P> {
    commands: &'a [Command<H, F>],
    array: Option<&'a PayloadArray<P>>,
}

impl<'a, H, F, P> RangeView<'a, H, F, P> {
    pub fn iter(&self) -> PayloadIter<'a, H, F, P> {
        let (payloads, command_slots): (&[P], &[u32]) = match self.array {
            Some(array) => (array.payloads(), array.command_slots()),
            None => (&[], &[]),
        };
        PayloadIter {
            commands: self.commands,
            payloads,
            command_slots,
            index: 0,
        }
    }
}

impl<'a, H, F, P> IntoIterator for RangeView<'a, H, F, P> {
    type Item = PayloadEntry<'a, H, F, P>;
    type IntoIter = PayloadIter<'a, H, F, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, H, F, P> IntoIterator for &RangeView<'a, H, F, P> {
    type Item = PayloadEntry<'a, H, F, P>;
    type IntoIter = PayloadIter<'a, H, F, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator behind [`RangeView`].
pub struct PayloadIter<'a, H, F, P> {
    commands: &'a [Command<H, F>],
    payloads: &'a [P],
    command_slots: &'a [u32],
    index: usize,
}

impl<'a, H, F, P> Iterator for PayloadIter<'a, H, F, P> {
    type Item = PayloadEntry<'a, H, F, P>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.payloads.len() {
            let i = self.index;
            self.index += 1;
            let command = &self.commands[self.command_slots[i] as usize];
            if command.deleted {
                continue;
            }
            return Some(PayloadEntry {
                payload: &self.payloads[i],
                command,
            });
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.payloads.len() - self.index))
    }
}

impl<H, F, P> FusedIterator for PayloadIter<'_, H, F, P> {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    bitflags! {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
        struct Dirty: u32 {
            const TRANSFORM = 1 << 0;
            const BOUNDS    = 1 << 1;
            const INSTANCES = 1 << 2;
            const CUSTOM    = 1 << 3;
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Transform(f32);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Instance(u32);

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Custom {
        value: u32,
        moves_bounds: bool,
    }

    impl Payload for Transform {
        type Flags = Dirty;
        const ID: PayloadId = PayloadId::new(0);
        const DIRTY_FLAGS: Dirty = Dirty::TRANSFORM;
    }

    impl Payload for Instance {
        type Flags = Dirty;
        const ID: PayloadId = PayloadId::new(1);
        const DIRTY_FLAGS: Dirty = Dirty::INSTANCES;
    }

    impl Payload for Custom {
        type Flags = Dirty;
        const ID: PayloadId = PayloadId::new(2);
        const DIRTY_FLAGS: Dirty = Dirty::CUSTOM;

        fn dirty_flags(&self) -> Dirty {
            if self.moves_bounds {
                Dirty::CUSTOM | Dirty::BOUNDS
            } else {
                Dirty::CUSTOM
            }
        }
    }

    type Queue = UpdateCommandQueue<u32, Dirty>;

    fn custom(value: u32) -> Custom {
        Custom {
            value,
            moves_bounds: false,
        }
    }

    fn collect<P: Payload<Flags = Dirty> + Copy>(queue: &Queue) -> Vec<(u32, P)> {
        queue
            .range_view::<P>()
            .into_iter()
            .map(|entry| (entry.handle(), *entry.payload))
            .collect()
    }

    #[test]
    fn add_with_two_payload_types() {
        let mut queue = Queue::new();
        queue.enqueue_add(1);
        queue.enqueue(1, Transform(1.5));
        queue.enqueue(1, custom(7));

        assert_eq!(queue.num_commands(), 1);
        assert_eq!(collect::<Transform>(&queue), vec![(1, Transform(1.5))]);
        assert!(collect::<Instance>(&queue).is_empty());

        let command = queue.find_command(&1).unwrap();
        assert_eq!(
            command.payload_mask(),
            Transform::ID.bit() | Custom::ID.bit()
        );
        assert!(command.is_added());
        assert!(!command.has_payload::<Instance>());
    }

    #[test]
    fn re_enqueue_overwrites_in_place() {
        let mut queue = Queue::new();
        queue.enqueue(4, Transform(1.0));
        queue.enqueue(9, Transform(2.0));
        let slot = queue.find_command(&4).unwrap().payload_slot(Transform::ID);

        queue.enqueue(4, Transform(3.0));

        assert_eq!(queue.num_items::<Transform>(), 2);
        assert_eq!(queue.find_command(&4).unwrap().payload_slot(Transform::ID), slot);
        let command = queue.find_command(&4).unwrap();
        assert_eq!(queue.payload::<Transform>(command), Some(&Transform(3.0)));
    }

    #[test]
    fn payload_slots_follow_id_order() {
        let mut queue = Queue::new();
        queue.enqueue(1, custom(3));
        queue.enqueue(1, Transform(1.0));
        queue.enqueue(1, Instance(2));

        let command = queue.find_command(&1).unwrap();
        assert_eq!(queue.payload::<Transform>(command), Some(&Transform(1.0)));
        assert_eq!(queue.payload::<Instance>(command), Some(&Instance(2)));
        assert_eq!(queue.payload::<Custom>(command).map(|c| c.value), Some(3));
    }

    #[test]
    fn payload_lookup_missing_type_is_none() {
        let mut queue = Queue::new();
        queue.enqueue(1, Transform(1.0));
        queue.enqueue(2, Instance(5));
        let command = queue.find_command(&1).unwrap();
        assert!(queue.payload::<Instance>(command).is_none());
        assert!(queue.payload::<Custom>(command).is_none());
    }

    #[test]
    fn deleted_commands_are_hidden_from_payload_views() {
        let mut queue = Queue::new();
        queue.enqueue(1, Transform(1.0));
        queue.enqueue(2, Transform(2.0));
        queue.enqueue_delete(1);
        queue.enqueue_delete(3);
        queue.enqueue(3, Transform(3.0));

        assert_eq!(collect::<Transform>(&queue), vec![(2, Transform(2.0))]);
        assert_eq!(queue.num_items::<Transform>(), 3);
        // The payload is still attached; only views skip it.
        let command = queue.find_command(&1).unwrap();
        assert!(command.has_payload::<Transform>());
    }

    #[test]
    fn range_view_is_restartable() {
        let mut queue = Queue::new();
        queue.enqueue(1, Instance(1));
        queue.enqueue(2, Instance(2));

        let view = queue.range_view::<Instance>();
        let first: Vec<u32> = view.iter().map(|e| e.payload.0).collect();
        let second: Vec<u32> = (&view).into_iter().map(|e| e.payload.0).collect();
        assert_eq!(first, vec![1, 2]);
        assert_eq!(first, second);

        let mut iter = queue.iter::<Instance>();
        assert_eq!(iter.next().map(|e| e.handle()), Some(1));
        assert_eq!(iter.next().map(|e| e.handle()), Some(2));
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn dirty_flags_use_runtime_override() {
        let mut queue = Queue::new();
        queue.enqueue(
            1,
            Custom {
                value: 0,
                moves_bounds: true,
            },
        );
        queue.enqueue(2, custom(0));
        assert_eq!(
            queue.find_command(&1).unwrap().dirty_flags(),
            Dirty::CUSTOM | Dirty::BOUNDS
        );
        assert_eq!(queue.find_command(&2).unwrap().dirty_flags(), Dirty::CUSTOM);
    }

    #[test]
    fn add_then_delete_is_one_command() {
        let mut queue = Queue::new();
        queue.enqueue_add(5);
        queue.enqueue_delete(5);

        let mut seen = Vec::new();
        queue.for_each_command(CommandFilter::ALL, |c| {
            seen.push((c.handle(), c.is_added(), c.is_deleted()));
        });
        assert_eq!(seen, vec![(5, true, true)]);
    }

    #[test]
    #[should_panic(expected = "enqueue_add called twice for 3")]
    fn double_add_panics() {
        let mut queue = Queue::new();
        queue.enqueue_add(3);
        queue.enqueue_add(3);
    }

    #[test]
    fn add_after_payload_is_rejected() {
        let mut queue = Queue::new();
        queue.enqueue(3, Transform(0.0));
        assert!(matches!(
            queue.try_enqueue_add(3),
            Err(ContractViolation::DuplicateAdd { .. })
        ));
    }

    #[test]
    fn persistent_id_only_on_added() {
        let mut queue = Queue::new();
        queue.enqueue_add(1);
        queue.enqueue(2, Transform(0.0));

        queue.set_persistent_id(1, 42);
        assert_eq!(queue.find_command(&1).unwrap().persistent_id(), Some(42));

        assert!(queue.try_set_persistent_id(2, 7).is_err());
        assert!(queue.try_set_persistent_id(99, 7).is_err());
        assert_eq!(queue.find_command(&2).unwrap().persistent_id(), None);
    }

    #[test]
    fn added_commands_take_ids_in_one_pass() {
        let mut queue = Queue::new();
        queue.enqueue_add(5);
        queue.enqueue(6, Transform(0.0));
        queue.enqueue_add(7);
        queue.enqueue_delete(7);

        let mut next_id = 100;
        let mut visited = Vec::new();
        queue.for_each_added_command_mut(|mut added| {
            visited.push(added.handle());
            assert!(added.command().is_added());
            added.set_persistent_id(next_id);
            next_id += 1;
        });

        assert_eq!(visited, vec![5, 7]);
        assert_eq!(queue.find_command(&5).unwrap().persistent_id(), Some(100));
        assert_eq!(queue.find_command(&6).unwrap().persistent_id(), None);
        assert_eq!(queue.find_command(&7).unwrap().persistent_id(), Some(101));
    }

    #[test]
    fn for_each_command_filters_and_keeps_order() {
        let mut queue = Queue::new();
        queue.enqueue(10, Transform(0.0));
        queue.enqueue_add(11);
        queue.enqueue_delete(12);
        queue.enqueue(13, Instance(0));

        let visit = |filter| {
            let mut out = Vec::new();
            queue.for_each_command(filter, |c| out.push(c.handle()));
            out
        };
        assert_eq!(visit(CommandFilter::ALL), vec![10, 11, 12, 13]);
        assert_eq!(visit(CommandFilter::UPDATED), vec![10, 13]);
        assert_eq!(visit(CommandFilter::ADDED | CommandFilter::DELETED), vec![11, 12]);
        assert!(visit(CommandFilter::empty()).is_empty());
    }

    #[test]
    fn update_commands_filter_by_flags_and_mask() {
        let mut queue = Queue::new();
        queue.enqueue(1, Transform(0.0));
        queue.enqueue(2, Instance(0));
        queue.enqueue_add(3);
        queue.enqueue_delete(4);

        let mut by_flags = Vec::new();
        queue.for_each_update_command(CommandFilter::ALL, Dirty::TRANSFORM, |c| {
            by_flags.push(c.handle());
        });
        assert_eq!(by_flags, vec![1, 3, 4]);

        let mut by_mask = Vec::new();
        queue.for_each_update_command_by_mask(CommandFilter::UPDATED, Instance::ID.bit(), |c| {
            by_mask.push(c.handle());
        });
        assert_eq!(by_mask, vec![2]);
    }

    #[test]
    fn reset_clears_and_keeps_capacity() {
        let mut queue = Queue::new();
        queue.reset();
        assert!(queue.is_empty());

        let fill = |queue: &mut Queue| {
            for h in 0..100 {
                queue.enqueue(h, Transform(h as f32));
                queue.enqueue(h, custom(h));
            }
        };

        fill(&mut queue);
        let commands = queue.command_capacity();
        let transforms = queue.payload_capacity::<Transform>();
        let customs = queue.payload_capacity::<Custom>();

        queue.reset();
        assert!(queue.is_empty());
        assert_eq!(queue.num_commands(), 0);
        assert!(!queue.has_command(&5));
        assert!(collect::<Transform>(&queue).is_empty());

        fill(&mut queue);
        assert_eq!(queue.command_capacity(), commands);
        assert_eq!(queue.payload_capacity::<Transform>(), transforms);
        assert_eq!(queue.payload_capacity::<Custom>(), customs);
        assert_eq!(queue.find_command(&7).unwrap().dirty_flags(), Dirty::TRANSFORM | Dirty::CUSTOM);
    }

    #[test]
    fn reset_clears_dirty_flags() {
        let mut queue = Queue::new();
        queue.enqueue(1, Transform(0.0));
        queue.reset();
        queue.enqueue_delete(1);
        assert!(queue.find_command(&1).unwrap().dirty_flags().is_empty());
    }

    proptest! {
        #[test]
        fn last_write_wins_per_type(values in prop::collection::vec((0u32..8, 0u32..1000), 1..64)) {
            let mut queue = Queue::new();
            let mut expected = std::collections::HashMap::new();
            for &(handle, value) in &values {
                queue.enqueue(handle, Instance(value));
                expected.insert(handle, value);
            }
            prop_assert_eq!(queue.num_items::<Instance>(), expected.len());
            for (handle, value) in expected {
                let command = queue.find_command(&handle).unwrap();
                prop_assert_eq!(queue.payload::<Instance>(command), Some(&Instance(value)));
            }
        }

        #[test]
        fn dirty_flags_are_union_of_enqueued(kinds in prop::collection::vec(0u8..3, 1..32)) {
            let mut queue = Queue::new();
            let mut expected = Dirty::empty();
            for kind in kinds {
                match kind {
                    0 => queue.enqueue(1, Transform(0.0)),
                    1 => queue.enqueue(1, Instance(0)),
                    _ => queue.enqueue(1, Custom { value: 0, moves_bounds: true }),
                }
                expected |= match kind {
                    0 => Dirty::TRANSFORM,
                    1 => Dirty::INSTANCES,
                    _ => Dirty::CUSTOM | Dirty::BOUNDS,
                };
            }
            prop_assert_eq!(queue.find_command(&1).unwrap().dirty_flags(), expected);
        }
    }
}
