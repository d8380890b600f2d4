//! The main engine struct that ties together ECS, request processing,
//! the update queue and the render state into a deterministic
//! fixed-timestep tick loop.

use hecs::World;

use crate::command_processor::{process_requests, PrimitiveIdMap, SceneRequest};
use crate::dirty_tracker::GlobalDirtyTracker;
use crate::render_state::{AppliedUpdates, RenderState};
use crate::scene::ScenePrimitiveUpdates;
use crate::systems::{transform_system, velocity_system};

/// Fixed timestep: 60 ticks per second.
pub const FIXED_DT: f32 = 1.0 / 60.0;

/// Most ticks run by a single `update()` call.
pub const MAX_TICKS_PER_UPDATE: u32 = 10;

/// The core engine state.
pub struct Engine {
    pub world: World,
    pub ids: PrimitiveIdMap,
    pub render_state: RenderState,
    updates: ScenePrimitiveUpdates,
    net_dirty: GlobalDirtyTracker<u32>,
    accumulator: f32,
    tick_count: u64,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            world: World::new(),
            ids: PrimitiveIdMap::new(),
            render_state: RenderState::new(),
            updates: ScenePrimitiveUpdates::new(),
            net_dirty: GlobalDirtyTracker::new(),
            accumulator: 0.0,
            tick_count: 0,
        }
    }

    /// Allocate a persistent id and queue the primitive's spawn.
    /// The primitive reaches the render state on the next `update()`.
    pub fn spawn(&mut self, position: glam::Vec3, radius: f32) -> u32 {
        let id = self.ids.allocate();
        self.process_requests(&[SceneRequest::Spawn {
            id,
            position,
            radius,
        }]);
        id
    }

    /// Apply a batch of requests to the ECS world and the update queue.
    /// Called before `update()` each frame.
    pub fn process_requests(&mut self, requests: &[SceneRequest]) {
        process_requests(
            requests,
            &mut self.world,
            &mut self.ids,
            &mut self.updates,
            &mut self.net_dirty,
        );
    }

    /// Advance the engine by `dt` seconds (variable, from requestAnimationFrame).
    /// Runs fixed-timestep ticks, then queues transforms, applies the
    /// queued cycle to the render state and resets the queue.
    pub fn update(&mut self, dt: f32) -> AppliedUpdates {
        // 1. Accumulate time and run fixed-timestep ticks.
        self.accumulator += dt;

        // Cap accumulator to prevent spiral of death.
        let cap = FIXED_DT * MAX_TICKS_PER_UPDATE as f32;
        if self.accumulator > cap {
            self.accumulator = cap;
        }

        while self.accumulator >= FIXED_DT {
            velocity_system(&mut self.world, FIXED_DT);
            self.accumulator -= FIXED_DT;
            self.tick_count += 1;
        }

        // 2. Recompute model matrices after all ticks.
        transform_system(&mut self.world, &mut self.updates, &mut self.net_dirty);

        // 3. Consume this frame's cycle.
        let applied = self.render_state.apply_updates(&self.updates);
        self.updates.reset();
        applied
    }

    /// How many fixed ticks have elapsed since engine start.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// The interpolation alpha for rendering between ticks.
    /// Ranges from 0.0 to 1.0.
    pub fn interpolation_alpha(&self) -> f32 {
        self.accumulator / FIXED_DT
    }

    /// Queue of the frame in progress. Empty right after `update()`.
    pub fn updates(&self) -> &ScenePrimitiveUpdates {
        &self.updates
    }

    /// Dirty set of primitive ids touched since each poller's last reset.
    /// Replication and other pollers register here.
    pub fn net_dirty_mut(&mut self) -> &mut GlobalDirtyTracker<u32> {
        &mut self.net_dirty
    }
}

// ── Dev-tools debug methods ──────────────────────────────────────
#[cfg(feature = "dev-tools")]
impl Engine {
    /// Returns the number of live primitives in the ECS world.
    pub fn debug_primitive_count(&self) -> u32 {
        self.ids.iter_mapped().count() as u32
    }

    /// Writes live primitive ids into `out`, returning the count written.
    pub fn debug_list_primitives(&self, out: &mut [u32]) -> u32 {
        let mut written = 0usize;
        for ((id, _), dst) in self.ids.iter_mapped().zip(out.iter_mut()) {
            *dst = id;
            written += 1;
        }
        written as u32
    }

    /// Copies the model matrix of primitive `id` into `out`.
    /// Returns false if the primitive does not exist.
    pub fn debug_model_matrix(&self, id: u32, out: &mut [f32; 16]) -> bool {
        let Some(entity) = self.ids.get(id) else {
            return false;
        };
        match self.world.get::<&crate::components::ModelMatrix>(entity) {
            Ok(m) => {
                *out = m.0;
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{ModelMatrix, Position};
    use glam::Vec3;

    #[test]
    fn engine_processes_requests_and_ticks() {
        let mut engine = Engine::new();
        let id = engine.spawn(Vec3::ZERO, 1.0);
        engine.process_requests(&[SceneRequest::SetVelocity {
            id,
            velocity: Vec3::new(60.0, 0.0, 0.0),
        }]);

        // Run for exactly 1 fixed tick (1/60th second).
        engine.update(FIXED_DT);

        let entity = engine.ids.get(id).unwrap();
        let pos = engine.world.get::<&Position>(entity).unwrap();
        assert!((pos.0.x - 1.0).abs() < 0.001);
    }

    #[test]
    fn fixed_timestep_accumulates() {
        let mut engine = Engine::new();
        engine.spawn(Vec3::ZERO, 1.0);

        // Half a tick does not advance.
        engine.update(FIXED_DT * 0.5);
        assert_eq!(engine.tick_count(), 0);
        assert!((engine.interpolation_alpha() - 0.5).abs() < 0.001);

        // The second half completes one tick.
        engine.update(FIXED_DT * 0.5);
        assert_eq!(engine.tick_count(), 1);
    }

    #[test]
    fn spiral_of_death_capped() {
        let mut engine = Engine::new();
        // A huge dt is capped.
        engine.update(100.0);
        assert!(engine.tick_count() <= MAX_TICKS_PER_UPDATE as u64);
    }

    #[test]
    fn spawned_primitive_reaches_render_state() {
        let mut engine = Engine::new();
        let a = engine.spawn(Vec3::new(5.0, 10.0, 15.0), 2.0);
        let b = engine.spawn(Vec3::ZERO, 1.0);

        let applied = engine.update(FIXED_DT);

        assert_eq!(applied.added, 2);
        assert_eq!(applied.transforms, 2);
        assert_eq!(engine.render_state.count(), 2);
        assert_eq!(engine.render_state.primitive_ids(), &[a, b]);
        let t = engine.render_state.transforms();
        assert!((t[12] - 5.0).abs() < 0.001);
        assert!((t[13] - 10.0).abs() < 0.001);
        assert!((t[14] - 15.0).abs() < 0.001);
        assert_eq!(&engine.render_state.bounds()[0..4], &[5.0, 10.0, 15.0, 2.0]);
        assert!(engine.updates().is_empty());
    }

    #[test]
    fn model_matrix_updated_after_set_position() {
        let mut engine = Engine::new();
        let id = engine.spawn(Vec3::ZERO, 1.0);
        engine.update(FIXED_DT);

        engine.process_requests(&[SceneRequest::SetPosition {
            id,
            position: Vec3::new(1.0, 2.0, 3.0),
        }]);
        let applied = engine.update(FIXED_DT);

        assert_eq!(applied.transforms, 1);
        let entity = engine.ids.get(id).unwrap();
        let matrix = engine.world.get::<&ModelMatrix>(entity).unwrap();
        assert!((matrix.0[12] - 1.0).abs() < 0.001);
        assert!((engine.render_state.transforms()[13] - 2.0).abs() < 0.001);
    }

    #[test]
    fn resting_primitives_queue_nothing() {
        let mut engine = Engine::new();
        engine.spawn(Vec3::ONE, 1.0);
        engine.update(FIXED_DT);

        let applied = engine.update(FIXED_DT);
        assert_eq!(applied, AppliedUpdates::default());
    }

    #[test]
    fn despawn_keeps_slots_dense() {
        let mut engine = Engine::new();
        let a = engine.spawn(Vec3::ZERO, 1.0);
        let b = engine.spawn(Vec3::ONE, 1.0);
        let c = engine.spawn(Vec3::NEG_ONE, 1.0);
        engine.update(FIXED_DT);

        engine.process_requests(&[SceneRequest::Despawn { id: b }]);
        let applied = engine.update(FIXED_DT);

        assert_eq!(applied.removed, 1);
        assert_eq!(engine.render_state.count(), 2);
        assert_eq!(engine.render_state.primitive_ids(), &[a, c]);
    }

    #[test]
    fn spawn_and_despawn_in_one_frame_never_renders() {
        let mut engine = Engine::new();
        let id = engine.spawn(Vec3::ZERO, 1.0);
        engine.process_requests(&[SceneRequest::Despawn { id }]);

        let applied = engine.update(FIXED_DT);

        assert_eq!(applied.added, 0);
        assert_eq!(engine.render_state.count(), 0);
    }

    #[test]
    fn net_dirty_poller_sees_touched_ids() {
        let mut engine = Engine::new();
        let poller = engine.net_dirty_mut().create_poller();
        let a = engine.spawn(Vec3::ZERO, 1.0);
        engine.update(FIXED_DT);

        let dirty = engine.net_dirty_mut().get_dirty_objects(poller);
        assert!(dirty.contains(&a));
        engine.net_dirty_mut().reset_dirty_objects(poller);

        engine.update(FIXED_DT);
        assert!(engine.net_dirty_mut().get_dirty_objects(poller).is_empty());
        engine.net_dirty_mut().reset_dirty_objects(poller);
    }

    #[cfg(feature = "dev-tools")]
    #[test]
    fn debug_list_primitives_returns_all_ids() {
        let mut engine = Engine::new();
        for _ in 0..3 {
            engine.spawn(Vec3::ZERO, 1.0);
        }
        assert_eq!(engine.debug_primitive_count(), 3);
        let mut out = vec![0u32; 10];
        let count = engine.debug_list_primitives(&mut out);
        assert_eq!(&out[..count as usize], &[0, 1, 2]);
    }

    #[cfg(feature = "dev-tools")]
    #[test]
    fn debug_model_matrix_reads_world() {
        let mut engine = Engine::new();
        let id = engine.spawn(Vec3::new(4.0, 0.0, 0.0), 1.0);
        engine.update(FIXED_DT);
        let mut m = [0.0; 16];
        assert!(engine.debug_model_matrix(id, &mut m));
        assert_eq!(m[12], 4.0);
        assert!(!engine.debug_model_matrix(99, &mut m));
    }
}
