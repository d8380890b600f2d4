//! Scene primitive payloads carried by the update queue.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::payload_storage::{Payload, PayloadId};
use crate::update_queue::UpdateCommandQueue;

/// Payload ids used by [`ScenePrimitiveUpdates`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ScenePayloadId {
    Transform = 0,
    Instance = 1,
    CustomData = 2,
}

impl ScenePayloadId {
    pub const fn id(self) -> PayloadId {
        PayloadId::new(self as u8)
    }
}

bitflags! {
    /// What changed on a primitive this frame.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct SceneDirtyFlags: u32 {
        const TRANSFORM     = 1 << 0;
        const BOUNDS        = 1 << 1;
        const INSTANCE_DATA = 1 << 2;
        const CUSTOM_DATA   = 1 << 3;
    }
}

/// Update queue for scene primitives, keyed by ECS entity.
pub type ScenePrimitiveUpdates = UpdateCommandQueue<hecs::Entity, SceneDirtyFlags>;

/// New local-to-world matrix and bounding sphere.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct TransformPayload {
    pub local_to_world: [f32; 16],
    /// Sphere center xyz and radius. A zero radius means "no bounds".
    pub bounds: [f32; 4],
}

impl TransformPayload {
    pub fn new(local_to_world: Mat4, center: Vec3, radius: f32) -> Self {
        Self {
            local_to_world: local_to_world.to_cols_array(),
            bounds: [center.x, center.y, center.z, radius],
        }
    }
}

impl Payload for TransformPayload {
    type Flags = SceneDirtyFlags;
    const ID: PayloadId = ScenePayloadId::Transform.id();
    const DIRTY_FLAGS: SceneDirtyFlags = SceneDirtyFlags::TRANSFORM.union(SceneDirtyFlags::BOUNDS);

    fn dirty_flags(&self) -> SceneDirtyFlags {
        if self.bounds[3] > 0.0 {
            Self::DIRTY_FLAGS
        } else {
            SceneDirtyFlags::TRANSFORM
        }
    }
}

/// Instance range drawn for the primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct InstancePayload {
    pub instance_count: u32,
    pub first_instance: u32,
}

impl Payload for InstancePayload {
    type Flags = SceneDirtyFlags;
    const ID: PayloadId = ScenePayloadId::Instance.id();
    const DIRTY_FLAGS: SceneDirtyFlags = SceneDirtyFlags::INSTANCE_DATA;
}

/// Eight user floats forwarded to shaders untouched.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct CustomDataPayload {
    pub params: [f32; 8],
}

impl Payload for CustomDataPayload {
    type Flags = SceneDirtyFlags;
    const ID: PayloadId = ScenePayloadId::CustomData.id();
    const DIRTY_FLAGS: SceneDirtyFlags = SceneDirtyFlags::CUSTOM_DATA;
}

#[cfg(test)]
mod tests {
    use super::*;
    use hecs::World;

    #[test]
    fn transform_without_radius_leaves_bounds_clean() {
        let with_bounds = TransformPayload::new(Mat4::IDENTITY, Vec3::ZERO, 2.0);
        let without = TransformPayload::new(Mat4::IDENTITY, Vec3::ZERO, 0.0);
        assert_eq!(
            with_bounds.dirty_flags(),
            SceneDirtyFlags::TRANSFORM | SceneDirtyFlags::BOUNDS
        );
        assert_eq!(without.dirty_flags(), SceneDirtyFlags::TRANSFORM);
    }

    #[test]
    fn payload_ids_are_distinct() {
        let ids = [
            TransformPayload::ID,
            InstancePayload::ID,
            CustomDataPayload::ID,
        ];
        assert_eq!(ids[0].index(), 0);
        assert_eq!(ids[1].index(), 1);
        assert_eq!(ids[2].index(), 2);
    }

    #[test]
    fn scene_queue_scenario() {
        let mut world = World::new();
        let obj = world.spawn(());
        let mut updates = ScenePrimitiveUpdates::new();

        let t1 = TransformPayload::new(Mat4::from_translation(Vec3::X), Vec3::X, 1.0);
        updates.enqueue_add(obj);
        updates.enqueue(obj, t1);
        updates.enqueue(obj, CustomDataPayload { params: [1.0; 8] });

        assert_eq!(updates.num_commands(), 1);
        let transforms: Vec<_> = updates
            .range_view::<TransformPayload>()
            .into_iter()
            .map(|e| (*e.payload, e.handle()))
            .collect();
        assert_eq!(transforms, vec![(t1, obj)]);
        assert_eq!(updates.iter::<InstancePayload>().count(), 0);
        assert_eq!(
            updates.find_command(&obj).unwrap().payload_mask(),
            (1 << ScenePayloadId::Transform as u64) | (1 << ScenePayloadId::CustomData as u64)
        );
    }

    #[test]
    fn transform_payload_is_pod() {
        let t = TransformPayload::new(Mat4::IDENTITY, Vec3::ZERO, 1.0);
        assert_eq!(bytemuck::bytes_of(&t).len(), 80);
    }
}
