//! Dense, per-type payload storage backing the update command queue.
//!
//! Every payload type owns one [`PayloadArray`], created the first time a
//! payload of that type is enqueued. The arrays live behind a fixed table of
//! 64 type-erased slots indexed by [`PayloadId`], so enqueueing never goes
//! through a vtable and a command never allocates per payload.

use std::any::{Any, type_name};
use std::fmt::Debug;

use bitflags::Flags;

use crate::error::{ContractResult, ContractViolation};

/// Upper bound on distinct payload types, fixed by the `u64` payload mask.
pub const MAX_PAYLOAD_TYPES: usize = 64;

/// Small integer identifying a payload type within one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PayloadId(u8);

impl PayloadId {
    /// Panics (at compile time in const context) if `id >= 64`.
    pub const fn new(id: u8) -> Self {
        assert!((id as usize) < MAX_PAYLOAD_TYPES, "payload id out of range");
        Self(id)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// `1 << id`.
    pub const fn bit(self) -> u64 {
        1u64 << self.0
    }

    /// Mask of every id strictly below this one.
    pub const fn exclusive_mask(self) -> u64 {
        self.bit() - 1
    }
}

/// Bitflags type usable as a command's dirty flags.
pub trait DirtyFlags: Flags + Copy + Debug + 'static {}

impl<T: Flags + Copy + Debug + 'static> DirtyFlags for T {}

/// A typed data packet that can be attached to a queued command.
pub trait Payload: 'static {
    type Flags: DirtyFlags;

    const ID: PayloadId;

    /// Flags contributed by every payload of this type.
    const DIRTY_FLAGS: Self::Flags;

    /// Flags contributed by this particular value. Override to refine
    /// [`Self::DIRTY_FLAGS`] per instance.
    fn dirty_flags(&self) -> Self::Flags {
        Self::DIRTY_FLAGS
    }
}

/// Dense storage for one payload type.
///
/// `command_slots[i]` is the index of the command owning `payload_data[i]`.
/// Both vectors always have the same length.
#[derive(Debug, Clone)]
pub struct PayloadArray<P> {
    payload_data: Vec<P>,
    command_slots: Vec<u32>,
}

impl<P> Default for PayloadArray<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PayloadArray<P> {
    pub fn new() -> Self {
        Self {
            payload_data: Vec::new(),
            command_slots: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload_data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.payload_data.capacity()
    }

    /// Append a payload owned by `command_slot`. Returns its slot.
    pub fn push(&mut self, command_slot: u32, payload: P) -> u32 {
        let slot = self.payload_data.len() as u32;
        self.payload_data.push(payload);
        self.command_slots.push(command_slot);
        slot
    }

    /// Overwrite the payload in `slot`; ownership does not change.
    pub fn replace(&mut self, slot: u32, payload: P) {
        self.payload_data[slot as usize] = payload;
    }

    pub fn get(&self, slot: u32) -> Option<&P> {
        self.payload_data.get(slot as usize)
    }

    pub fn payloads(&self) -> &[P] {
        &self.payload_data
    }

    pub fn command_slots(&self) -> &[u32] {
        &self.command_slots
    }

    /// Drop all payloads, keeping both allocations.
    pub fn clear(&mut self) {
        self.payload_data.clear();
        self.command_slots.clear();
    }
}

/// Object-safe view of a `PayloadArray<P>` for the erased slot table.
trait ErasedPayloadArray: Any {
    fn len(&self) -> usize;

    fn clear(&mut self);

    fn payload_type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<P: 'static> ErasedPayloadArray for PayloadArray<P> {
    fn len(&self) -> usize {
        PayloadArray::len(self)
    }

    fn clear(&mut self) {
        PayloadArray::clear(self);
    }

    fn payload_type_name(&self) -> &'static str {
        type_name::<P>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// One lazily created [`PayloadArray`] per payload id.
pub struct PayloadStorage {
    arrays: [Option<Box<dyn ErasedPayloadArray>>; MAX_PAYLOAD_TYPES],
}

impl Default for PayloadStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for PayloadStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(
                self.arrays
                    .iter()
                    .enumerate()
                    .filter_map(|(id, a)| a.as_ref().map(|a| (id, (a.payload_type_name(), a.len())))),
            )
            .finish()
    }
}

impl PayloadStorage {
    pub fn new() -> Self {
        Self {
            arrays: std::array::from_fn(|_| None),
        }
    }

    /// The array for `P`, or `None` if no payload of that type was ever stored.
    pub fn array<P: Payload>(&self) -> ContractResult<Option<&PayloadArray<P>>> {
        let Some(erased) = self.arrays[P::ID.index()].as_deref() else {
            return Ok(None);
        };
        erased
            .as_any()
            .downcast_ref::<PayloadArray<P>>()
            .map(Some)
            .ok_or_else(|| collision::<P>(erased.payload_type_name()))
    }

    /// The array for `P`, created on first use.
    pub fn array_mut<P: Payload>(&mut self) -> ContractResult<&mut PayloadArray<P>> {
        let erased = self.arrays[P::ID.index()]
            .get_or_insert_with(|| Box::new(PayloadArray::<P>::new()));
        let registered = erased.payload_type_name();
        erased
            .as_any_mut()
            .downcast_mut::<PayloadArray<P>>()
            .ok_or_else(|| collision::<P>(registered))
    }

    /// Number of payload types that have an array.
    pub fn num_arrays(&self) -> usize {
        self.arrays.iter().flatten().count()
    }

    /// Clear every array without releasing memory.
    pub fn clear(&mut self) {
        for array in self.arrays.iter_mut().flatten() {
            array.clear();
        }
    }
}

fn collision<P: Payload>(registered: &'static str) -> ContractViolation {
    ContractViolation::PayloadIdCollision {
        id: P::ID.index(),
        registered,
        requested: type_name::<P>(),
    }
}
