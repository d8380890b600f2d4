//! Consumes scene update cycles into contiguous GPU-uploadable buffers.
//!
//! Data is laid out as Structure-of-Arrays (SoA): independent buffers
//! (transforms, bounds, instance meta, custom data, primitive ids) addressed
//! by a dense slot per primitive. Slots are stable until the primitive is
//! deleted; deletion swap-removes the last slot into the hole.

use crate::bitset::BitSet;
use crate::payload_storage::Payload;
use crate::scene::{
    CustomDataPayload, InstancePayload, SceneDirtyFlags, ScenePrimitiveUpdates, TransformPayload,
};
use crate::update_queue::CommandFilter;

/// Sentinel for "no slot" / "no persistent id".
const UNASSIGNED: u32 = u32::MAX;

/// u32 words per dirty slot in the staging buffer:
/// transform(16) + bounds(4) + meta(2) + custom(8) + primitive id(1).
pub const STAGING_STRIDE: usize = 31;

/// Tracks which slots have been modified since the last upload.
///
/// One bitset per SoA buffer so each buffer can be uploaded partially:
/// - `transform_dirty`: model matrix changed
/// - `bounds_dirty`: bounding sphere changed
/// - `meta_dirty`: instance range changed
/// - `custom_dirty`: custom shader data changed
pub struct SlotDirtyTracker {
    transform_dirty: BitSet,
    bounds_dirty: BitSet,
    meta_dirty: BitSet,
    custom_dirty: BitSet,
}

impl SlotDirtyTracker {
    /// Create a new tracker pre-sized for `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            transform_dirty: BitSet::new(capacity),
            bounds_dirty: BitSet::new(capacity),
            meta_dirty: BitSet::new(capacity),
            custom_dirty: BitSet::new(capacity),
        }
    }

    pub fn mark_transform_dirty(&mut self, slot: usize) {
        self.transform_dirty.set(slot);
    }

    pub fn mark_bounds_dirty(&mut self, slot: usize) {
        self.bounds_dirty.set(slot);
    }

    pub fn mark_meta_dirty(&mut self, slot: usize) {
        self.meta_dirty.set(slot);
    }

    pub fn mark_custom_dirty(&mut self, slot: usize) {
        self.custom_dirty.set(slot);
    }

    pub fn mark_all_dirty(&mut self, slot: usize) {
        self.mark_transform_dirty(slot);
        self.mark_bounds_dirty(slot);
        self.mark_meta_dirty(slot);
        self.mark_custom_dirty(slot);
    }

    pub fn is_transform_dirty(&self, slot: usize) -> bool {
        self.transform_dirty.get(slot)
    }

    pub fn is_bounds_dirty(&self, slot: usize) -> bool {
        self.bounds_dirty.get(slot)
    }

    pub fn is_meta_dirty(&self, slot: usize) -> bool {
        self.meta_dirty.get(slot)
    }

    pub fn is_custom_dirty(&self, slot: usize) -> bool {
        self.custom_dirty.get(slot)
    }

    /// Dirty in any buffer.
    pub fn is_dirty(&self, slot: usize) -> bool {
        self.is_transform_dirty(slot)
            || self.is_bounds_dirty(slot)
            || self.is_meta_dirty(slot)
            || self.is_custom_dirty(slot)
    }

    /// Ascending slots below `live` that are dirty in any buffer.
    pub fn dirty_slots(&self, live: usize) -> Vec<u32> {
        let mut slots: Vec<u32> = [
            &self.transform_dirty,
            &self.bounds_dirty,
            &self.meta_dirty,
            &self.custom_dirty,
        ]
        .into_iter()
        .flat_map(|bits| bits.iter_ones())
        .filter(|&slot| slot < live)
        .map(|slot| slot as u32)
        .collect();
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    /// Pre-size all internal bitsets to hold at least `capacity` slots.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        self.transform_dirty.ensure_capacity(capacity);
        self.bounds_dirty.ensure_capacity(capacity);
        self.meta_dirty.ensure_capacity(capacity);
        self.custom_dirty.ensure_capacity(capacity);
    }

    /// Clear all dirty flags after an upload.
    pub fn clear(&mut self) {
        self.transform_dirty.clear();
        self.bounds_dirty.clear();
        self.meta_dirty.clear();
        self.custom_dirty.clear();
    }
}

/// What one [`RenderState::apply_updates`] call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedUpdates {
    pub added: u32,
    pub removed: u32,
    pub transforms: u32,
    pub instances: u32,
    pub custom_data: u32,
}

/// Result of collect_dirty_staging: compact staging buffer + indices for GPU scatter.
pub struct DirtyStagingResult {
    /// [`STAGING_STRIDE`] u32 per dirty slot, floats stored as raw bits.
    pub staging: Vec<u32>,
    /// Destination slot index for each dirty slot
    pub dirty_indices: Vec<u32>,
    /// Union dirty ratio (for threshold decision)
    pub dirty_ratio: f32,
}

/// Retained SoA render data for all live primitives.
pub struct RenderState {
    gpu_transforms: Vec<f32>,  // 16 f32/slot (mat4x4)
    gpu_bounds: Vec<f32>,      // 4 f32/slot (xyz + radius)
    gpu_instance_meta: Vec<u32>, // 2 u32/slot (instance_count + first_instance)
    gpu_custom_data: Vec<f32>, // 8 f32/slot
    gpu_primitive_ids: Vec<u32>, // 1 u32/slot (persistent id for picking)
    gpu_count: u32,

    /// Per-buffer dirty tracking for partial upload.
    pub dirty_tracker: SlotDirtyTracker,

    slot_to_entity: Vec<hecs::Entity>,
    entity_to_slot: Vec<u32>, // indexed by entity.id(), UNASSIGNED = none
    pending_despawns: Vec<hecs::Entity>,

    staging_cache: Vec<u32>,
    staging_indices_cache: Vec<u32>,
    staging_dirty_ratio: f32,
}

impl Default for RenderState {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderState {
    pub fn new() -> Self {
        Self {
            gpu_transforms: Vec::new(),
            gpu_bounds: Vec::new(),
            gpu_instance_meta: Vec::new(),
            gpu_custom_data: Vec::new(),
            gpu_primitive_ids: Vec::new(),
            gpu_count: 0,
            dirty_tracker: SlotDirtyTracker::new(0),
            slot_to_entity: Vec::new(),
            entity_to_slot: Vec::new(),
            pending_despawns: Vec::new(),
            staging_cache: Vec::new(),
            staging_indices_cache: Vec::new(),
            staging_dirty_ratio: 0.0,
        }
    }

    /// Apply one cycle of queued updates.
    ///
    /// Deletes are processed first so slots freed this frame can be refilled,
    /// then adds, then each payload type. A primitive added and deleted in
    /// the same cycle never receives a slot.
    pub fn apply_updates(&mut self, updates: &ScenePrimitiveUpdates) -> AppliedUpdates {
        let mut applied = AppliedUpdates::default();

        updates.for_each_command(CommandFilter::DELETED, |command| {
            self.pending_despawns.push(command.handle());
        });
        applied.removed = self.flush_pending_despawns();

        updates.for_each_command(CommandFilter::ADDED, |command| {
            if command.is_deleted() {
                return;
            }
            let slot = self.assign_slot(command.handle());
            self.gpu_primitive_ids[slot as usize] = command.persistent_id().unwrap_or(UNASSIGNED);
            applied.added += 1;
        });

        for entry in updates.range_view::<TransformPayload>() {
            let Some(slot) = self.get_slot(entry.handle()) else {
                continue;
            };
            let s = slot as usize;
            self.gpu_transforms[s * 16..s * 16 + 16].copy_from_slice(&entry.payload.local_to_world);
            self.dirty_tracker.mark_transform_dirty(s);
            if entry.payload.dirty_flags().contains(SceneDirtyFlags::BOUNDS) {
                self.gpu_bounds[s * 4..s * 4 + 4].copy_from_slice(&entry.payload.bounds);
                self.dirty_tracker.mark_bounds_dirty(s);
            }
            applied.transforms += 1;
        }

        for entry in updates.range_view::<InstancePayload>() {
            let Some(slot) = self.get_slot(entry.handle()) else {
                continue;
            };
            let s = slot as usize;
            self.gpu_instance_meta[s * 2] = entry.payload.instance_count;
            self.gpu_instance_meta[s * 2 + 1] = entry.payload.first_instance;
            self.dirty_tracker.mark_meta_dirty(s);
            applied.instances += 1;
        }

        for entry in updates.range_view::<CustomDataPayload>() {
            let Some(slot) = self.get_slot(entry.handle()) else {
                continue;
            };
            let s = slot as usize;
            self.gpu_custom_data[s * 8..s * 8 + 8].copy_from_slice(&entry.payload.params);
            self.dirty_tracker.mark_custom_dirty(s);
            applied.custom_data += 1;
        }

        log::debug!("applied scene updates: {applied:?}, {} live slots", self.gpu_count);
        applied
    }

    /// Assign a stable slot to an entity. Returns the slot index.
    pub fn assign_slot(&mut self, entity: hecs::Entity) -> u32 {
        if let Some(slot) = self.get_slot(entity) {
            return slot;
        }
        let slot = self.gpu_count;
        self.gpu_count += 1;

        // Grow slot_to_entity
        if slot as usize >= self.slot_to_entity.len() {
            self.slot_to_entity.resize(
                (slot as usize + 1).next_power_of_two(),
                hecs::Entity::DANGLING,
            );
        }
        self.slot_to_entity[slot as usize] = entity;

        // Grow entity_to_slot
        let eid = entity.id() as usize;
        if eid >= self.entity_to_slot.len() {
            self.entity_to_slot.resize(eid + 1, UNASSIGNED);
        }
        self.entity_to_slot[eid] = slot;

        // Grow SoA buffers to match
        let count = self.gpu_count as usize;
        self.gpu_transforms.resize(count * 16, 0.0);
        self.gpu_bounds.resize(count * 4, 0.0);
        self.gpu_instance_meta.resize(count * 2, 0);
        self.gpu_custom_data.resize(count * 8, 0.0);
        self.gpu_primitive_ids.resize(count, UNASSIGNED);

        // New slots start with default data, which must still be uploaded.
        let s = slot as usize;
        self.gpu_transforms[s * 16..s * 16 + 16].copy_from_slice(&glam::Mat4::IDENTITY.to_cols_array());
        self.gpu_bounds[s * 4..s * 4 + 4].fill(0.0);
        self.gpu_instance_meta[s * 2] = 1;
        self.gpu_instance_meta[s * 2 + 1] = 0;
        self.gpu_custom_data[s * 8..s * 8 + 8].fill(0.0);
        self.dirty_tracker.ensure_capacity(count);
        self.dirty_tracker.mark_all_dirty(s);

        slot
    }

    /// Process all pending despawns via batch swap-remove. Returns how many
    /// slots were released.
    ///
    /// Processes in descending slot order to maintain the invariant that
    /// `last` always points to a live entity.
    pub fn flush_pending_despawns(&mut self) -> u32 {
        if self.pending_despawns.is_empty() {
            return 0;
        }

        let mut despawn_slots: Vec<u32> = self
            .pending_despawns
            .drain(..)
            .filter_map(|e| {
                let slot = *self.entity_to_slot.get(e.id() as usize)?;
                (slot != UNASSIGNED && self.slot_to_entity[slot as usize] == e).then_some(slot)
            })
            .collect();

        // Highest slots first, so the "last" slot swapped into a hole is live.
        despawn_slots.sort_unstable_by(|a, b| b.cmp(a));
        despawn_slots.dedup();

        let removed = despawn_slots.len() as u32;
        for slot in despawn_slots {
            let last = self.gpu_count - 1;
            let dead_entity = self.slot_to_entity[slot as usize];

            if slot != last {
                self.copy_soa_slot(last, slot);
                let moved_entity = self.slot_to_entity[last as usize];
                self.slot_to_entity[slot as usize] = moved_entity;
                self.entity_to_slot[moved_entity.id() as usize] = slot;
                self.dirty_tracker.mark_all_dirty(slot as usize);
            }

            self.entity_to_slot[dead_entity.id() as usize] = UNASSIGNED;
            self.slot_to_entity[last as usize] = hecs::Entity::DANGLING;
            self.gpu_count -= 1;
        }

        let count = self.gpu_count as usize;
        self.gpu_transforms.truncate(count * 16);
        self.gpu_bounds.truncate(count * 4);
        self.gpu_instance_meta.truncate(count * 2);
        self.gpu_custom_data.truncate(count * 8);
        self.gpu_primitive_ids.truncate(count);

        log::debug!("released {removed} render slots, {count} live");
        removed
    }

    /// Copy all SoA buffer data from slot `src` to slot `dst`.
    /// Must stay in sync with any new SoA buffers added in the future.
    fn copy_soa_slot(&mut self, src: u32, dst: u32) {
        let s = src as usize;
        let d = dst as usize;
        self.gpu_transforms.copy_within(s * 16..s * 16 + 16, d * 16);
        self.gpu_bounds.copy_within(s * 4..s * 4 + 4, d * 4);
        self.gpu_instance_meta.copy_within(s * 2..s * 2 + 2, d * 2);
        self.gpu_custom_data.copy_within(s * 8..s * 8 + 8, d * 8);
        self.gpu_primitive_ids[d] = self.gpu_primitive_ids[s];
    }

    /// Look up the slot for an entity. Returns None if not assigned.
    pub fn get_slot(&self, entity: hecs::Entity) -> Option<u32> {
        let slot = *self.entity_to_slot.get(entity.id() as usize)?;
        (slot != UNASSIGNED && self.slot_to_entity[slot as usize] == entity).then_some(slot)
    }

    /// Number of live primitives (slots in use).
    pub fn count(&self) -> u32 {
        self.gpu_count
    }

    pub fn transforms(&self) -> &[f32] {
        &self.gpu_transforms
    }

    pub fn bounds(&self) -> &[f32] {
        &self.gpu_bounds
    }

    pub fn instance_meta(&self) -> &[u32] {
        &self.gpu_instance_meta
    }

    pub fn custom_data(&self) -> &[f32] {
        &self.gpu_custom_data
    }

    pub fn primitive_ids(&self) -> &[u32] {
        &self.gpu_primitive_ids
    }

    /// Raw pointer to the transforms buffer. For WASM export.
    pub fn transforms_ptr(&self) -> *const f32 {
        if self.gpu_transforms.is_empty() {
            std::ptr::null()
        } else {
            self.gpu_transforms.as_ptr()
        }
    }

    /// Collect dirty slots into a compact staging buffer for GPU scatter
    /// upload, then clear the dirty flags.
    pub fn collect_dirty_staging(&mut self) -> DirtyStagingResult {
        let total = self.gpu_count as usize;
        let dirty_indices = self.dirty_tracker.dirty_slots(total);

        let mut staging = Vec::with_capacity(dirty_indices.len() * STAGING_STRIDE);
        for &slot in &dirty_indices {
            let s = slot as usize;
            let floats: &[u32] = bytemuck::cast_slice(&self.gpu_transforms[s * 16..s * 16 + 16]);
            staging.extend_from_slice(floats);
            staging.extend_from_slice(bytemuck::cast_slice(&self.gpu_bounds[s * 4..s * 4 + 4]));
            staging.extend_from_slice(&self.gpu_instance_meta[s * 2..s * 2 + 2]);
            staging.extend_from_slice(bytemuck::cast_slice(&self.gpu_custom_data[s * 8..s * 8 + 8]));
            staging.push(self.gpu_primitive_ids[s]);
        }

        let dirty_ratio = if total == 0 {
            0.0
        } else {
            dirty_indices.len() as f32 / total as f32
        };
        self.dirty_tracker.clear();

        DirtyStagingResult {
            staging,
            dirty_indices,
            dirty_ratio,
        }
    }

    /// Collect dirty staging data into the internal cache.
    /// Call once per frame after updates are applied, before GPU data is read.
    pub fn collect_and_cache_dirty(&mut self) {
        let result = self.collect_dirty_staging();
        self.staging_cache = result.staging;
        self.staging_indices_cache = result.dirty_indices;
        self.staging_dirty_ratio = result.dirty_ratio;
    }

    pub fn staging(&self) -> &[u32] {
        &self.staging_cache
    }

    pub fn staging_indices(&self) -> &[u32] {
        &self.staging_indices_cache
    }

    /// Ratio of dirty slots to live slots in the last staging collection.
    pub fn dirty_ratio(&self) -> f32 {
        self.staging_dirty_ratio
    }
}
