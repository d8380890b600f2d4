use std::ptr::addr_of_mut;

use glam::Vec3;
use wasm_bindgen::prelude::*;

pub mod bitset;
pub mod command_processor;
pub mod components;
pub mod dirty_tracker;
pub mod engine;
pub mod error;
pub mod global;
pub mod payload_storage;
pub mod render_state;
pub mod scene;
pub mod systems;
pub mod update_queue;

pub use dirty_tracker::{DirtySet, GlobalDirtyTracker, PollHandle, PreResetCallback};
pub use error::{ContractResult, ContractViolation};
pub use payload_storage::{DirtyFlags, Payload, PayloadArray, PayloadId, PayloadStorage, MAX_PAYLOAD_TYPES};
pub use update_queue::{AddedCommand, Command, CommandFilter, PayloadEntry, PayloadIter, RangeView, UpdateCommandQueue};

use command_processor::SceneRequest;
use engine::Engine;

static mut ENGINE: Option<Engine> = None;

/// Run `f` against the engine, or return `default` before `engine_init`.
fn with_engine<R>(default: R, f: impl FnOnce(&mut Engine) -> R) -> R {
    // SAFETY: wasm32 is single-threaded; no concurrent access, and no
    // export re-enters another while holding this borrow.
    unsafe {
        match &mut *addr_of_mut!(ENGINE) {
            Some(engine) => f(engine),
            None => default,
        }
    }
}

/// Initialize the engine. Called once from the Worker.
#[wasm_bindgen]
pub fn engine_init() {
    // SAFETY: wasm32 is single-threaded; no concurrent access.
    unsafe {
        addr_of_mut!(ENGINE).write(Some(Engine::new()));
    }
}

/// Spawn a primitive. Returns its persistent id, or `u32::MAX` before init.
#[wasm_bindgen]
pub fn engine_spawn_primitive(x: f32, y: f32, z: f32, radius: f32) -> u32 {
    with_engine(u32::MAX, |e| e.spawn(Vec3::new(x, y, z), radius))
}

#[wasm_bindgen]
pub fn engine_despawn_primitive(id: u32) {
    with_engine((), |e| e.process_requests(&[SceneRequest::Despawn { id }]));
}

#[wasm_bindgen]
pub fn engine_set_position(id: u32, x: f32, y: f32, z: f32) {
    with_engine((), |e| {
        e.process_requests(&[SceneRequest::SetPosition {
            id,
            position: Vec3::new(x, y, z),
        }])
    });
}

#[wasm_bindgen]
pub fn engine_set_velocity(id: u32, x: f32, y: f32, z: f32) {
    with_engine((), |e| {
        e.process_requests(&[SceneRequest::SetVelocity {
            id,
            velocity: Vec3::new(x, y, z),
        }])
    });
}

/// Set up to 8 custom shader floats. Missing values are zero, extras ignored.
#[wasm_bindgen]
pub fn engine_set_custom_data(id: u32, values: &[f32]) {
    let mut params = [0.0f32; 8];
    for (dst, &src) in params.iter_mut().zip(values) {
        *dst = src;
    }
    with_engine((), |e| e.process_requests(&[SceneRequest::SetCustomData { id, params }]));
}

#[wasm_bindgen]
pub fn engine_set_instance_count(id: u32, instance_count: u32) {
    with_engine((), |e| {
        e.process_requests(&[SceneRequest::SetInstanceCount { id, instance_count }])
    });
}

/// Run one frame update. `dt` is seconds since last frame.
#[wasm_bindgen]
pub fn engine_update(dt: f32) {
    with_engine((), |e| {
        e.update(dt);
    });
}

/// Returns the number of fixed ticks elapsed.
#[wasm_bindgen]
pub fn engine_tick_count() -> u64 {
    with_engine(0, |e| e.tick_count())
}

/// Number of primitives in the render buffers.
#[wasm_bindgen]
pub fn engine_primitive_count() -> u32 {
    with_engine(0, |e| e.render_state.count())
}

/// Pointer to the model matrices in WASM linear memory, 16 f32 per primitive.
/// Invalidated by the next `engine_update`.
#[wasm_bindgen]
pub fn engine_transforms_ptr() -> *const f32 {
    with_engine(std::ptr::null(), |e| e.render_state.transforms_ptr())
}

#[wasm_bindgen]
pub fn engine_transforms_f32_len() -> u32 {
    with_engine(0, |e| e.render_state.transforms().len() as u32)
}
