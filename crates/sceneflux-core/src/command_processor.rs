//! Translates external scene requests into ECS mutations and queued updates.

use glam::Vec3;
use hecs::World;

use crate::components::*;
use crate::dirty_tracker::GlobalDirtyTracker;
use crate::scene::{CustomDataPayload, InstancePayload, ScenePrimitiveUpdates};

/// Maps persistent primitive ids to hecs entities.
pub struct PrimitiveIdMap {
    /// Sparse map: persistent id -> hecs Entity.
    /// Uses a Vec for O(1) lookup. Ids are sequential u32s.
    map: Vec<Option<hecs::Entity>>,
    /// Free list for id recycling.
    free_list: Vec<u32>,
    /// Next id to assign.
    next_id: u32,
}

impl Default for PrimitiveIdMap {
    fn default() -> Self {
        Self::new()
    }
}

impl PrimitiveIdMap {
    pub fn new() -> Self {
        Self {
            map: Vec::new(),
            free_list: Vec::new(),
            next_id: 0,
        }
    }

    /// Allocate a new persistent id (or recycle one).
    pub fn allocate(&mut self) -> u32 {
        if let Some(id) = self.free_list.pop() {
            id
        } else {
            let id = self.next_id;
            self.next_id += 1;
            id
        }
    }

    /// Register a mapping from persistent id to hecs entity.
    pub fn insert(&mut self, id: u32, entity: hecs::Entity) {
        let idx = id as usize;
        if idx >= self.map.len() {
            self.map.resize(idx + 1, None);
        }
        self.map[idx] = Some(entity);
    }

    /// Look up the hecs entity for a persistent id.
    pub fn get(&self, id: u32) -> Option<hecs::Entity> {
        self.map.get(id as usize).copied().flatten()
    }

    /// Remove a mapping and return the id to the free list.
    pub fn remove(&mut self, id: u32) {
        let idx = id as usize;
        if idx < self.map.len() {
            self.map[idx] = None;
        }
        if id < self.next_id {
            self.free_list.push(id);
        }
    }

    /// Iterate over all live (id, entity) pairs.
    pub fn iter_mapped(&self) -> impl Iterator<Item = (u32, hecs::Entity)> + '_ {
        self.map
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.map(|entity| (i as u32, entity)))
    }
}

/// A change requested by the embedding application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SceneRequest {
    /// `id` must come from [`PrimitiveIdMap::allocate`].
    Spawn { id: u32, position: Vec3, radius: f32 },
    Despawn { id: u32 },
    SetPosition { id: u32, position: Vec3 },
    SetVelocity { id: u32, velocity: Vec3 },
    SetCustomData { id: u32, params: [f32; 8] },
    SetInstanceCount { id: u32, instance_count: u32 },
}

impl SceneRequest {
    pub fn id(&self) -> u32 {
        match *self {
            Self::Spawn { id, .. }
            | Self::Despawn { id }
            | Self::SetPosition { id, .. }
            | Self::SetVelocity { id, .. }
            | Self::SetCustomData { id, .. }
            | Self::SetInstanceCount { id, .. } => id,
        }
    }
}

/// Apply a batch of requests.
///
/// Structural changes and payloads go to `updates`; every touched primitive
/// is marked in `net_dirty`. Transform payloads are left to the transform
/// system, which sees the `TransformDirty` flag set here.
pub fn process_requests(
    requests: &[SceneRequest],
    world: &mut World,
    ids: &mut PrimitiveIdMap,
    updates: &mut ScenePrimitiveUpdates,
    net_dirty: &mut GlobalDirtyTracker<u32>,
) {
    for request in requests {
        let id = request.id();

        match (*request, ids.get(id)) {
            (SceneRequest::Spawn { .. }, Some(_)) => {
                log::warn!("spawn request for live primitive {id} ignored");
                continue;
            }
            (SceneRequest::Spawn { position, radius, .. }, None) => {
                let entity = world.spawn((
                    Position(position),
                    Rotation::default(),
                    Scale::default(),
                    Velocity::default(),
                    ModelMatrix::default(),
                    BoundingRadius(radius),
                    PrimitiveId(id),
                    TransformDirty(true),
                ));
                ids.insert(id, entity);
                updates.enqueue_add(entity);
                updates.set_persistent_id(entity, id);
            }
            (_, None) => {
                log::warn!("{request:?} targets unknown primitive {id}");
                continue;
            }
            (SceneRequest::Despawn { .. }, Some(entity)) => {
                updates.enqueue_delete(entity);
                if let Err(err) = world.despawn(entity) {
                    log::warn!("despawn of primitive {id}: {err}");
                }
                ids.remove(id);
            }
            (SceneRequest::SetPosition { position, .. }, Some(entity)) => {
                if let Ok((pos, dirty)) =
                    world.query_one_mut::<(&mut Position, &mut TransformDirty)>(entity)
                {
                    pos.0 = position;
                    dirty.0 = true;
                }
            }
            (SceneRequest::SetVelocity { velocity, .. }, Some(entity)) => {
                if let Ok(mut vel) = world.get::<&mut Velocity>(entity) {
                    vel.0 = velocity;
                }
            }
            (SceneRequest::SetCustomData { params, .. }, Some(entity)) => {
                updates.enqueue(entity, CustomDataPayload { params });
            }
            (SceneRequest::SetInstanceCount { instance_count, .. }, Some(entity)) => {
                updates.enqueue(
                    entity,
                    InstancePayload {
                        instance_count,
                        first_instance: 0,
                    },
                );
            }
        }
        net_dirty.mark_dirty(id);
    }
}
