//! ECS systems that operate on component queries.

use glam::{Mat4, Vec3};
use hecs::World;

use crate::components::{
    BoundingRadius, ModelMatrix, Position, PrimitiveId, Rotation, Scale, TransformDirty, Velocity,
};
use crate::dirty_tracker::GlobalDirtyTracker;
use crate::scene::{ScenePrimitiveUpdates, TransformPayload};

/// Apply velocity to position. Runs once per fixed-timestep tick.
pub fn velocity_system(world: &mut World, dt: f32) {
    for (pos, vel, dirty) in world.query_mut::<(&mut Position, &Velocity, &mut TransformDirty)>() {
        if vel.0 == Vec3::ZERO {
            continue;
        }
        pos.0 += vel.0 * dt;
        dirty.0 = true;
    }
}

/// Recompute model matrices of moved primitives and queue the new
/// transforms. Returns the number of primitives updated.
pub fn transform_system(
    world: &mut World,
    updates: &mut ScenePrimitiveUpdates,
    net_dirty: &mut GlobalDirtyTracker<u32>,
) -> usize {
    let mut count = 0;
    for (entity, pos, rot, scale, radius, id, matrix, dirty) in world.query_mut::<(
        hecs::Entity,
        &Position,
        &Rotation,
        &Scale,
        &BoundingRadius,
        &PrimitiveId,
        &mut ModelMatrix,
        &mut TransformDirty,
    )>() {
        if !dirty.0 {
            continue;
        }
        let m = Mat4::from_scale_rotation_translation(scale.0, rot.0, pos.0);
        matrix.0 = m.to_cols_array();
        dirty.0 = false;

        updates.enqueue(entity, TransformPayload::new(m, pos.0, radius.0));
        net_dirty.mark_dirty(id.0);
        count += 1;
    }
    count
}
