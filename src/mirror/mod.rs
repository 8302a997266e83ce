//! Mesh mirror: collision-only physics shadows of world geometry
//!
//! Models, chunk terrain and procedural primitives are mirrored as static
//! triangle meshes. The simulation moves capsule probes through them to
//! refine what block collision alone cannot express.

pub mod cache;
pub mod geometry;
pub mod probe;
#[cfg(test)]
pub mod scripted;
pub mod world;

pub use probe::{GroundProbe, MoveRequest, MoveResult, ProbeCharacter};
pub use world::MirrorWorld;

use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::world::{Primitive, PrimitiveId, WorldId, WorldView};

/// Mirror errors
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("invalid probe dimensions {width}x{height}")]
    InvalidProbe { width: f32, height: f32 },

    #[error("non-finite move request")]
    NonFinite,

    #[error("failed to build mesh for {target}: {reason}")]
    MeshBuild { target: String, reason: String },

    #[error("physics engine panicked during {0}")]
    Panicked(&'static str),
}

/// Run one mirror operation, turning a panic inside the physics engine into
/// [`MirrorError::Panicked`] so callers can fall back like any other error.
pub fn guarded<T>(
    operation: &'static str,
    run: impl FnOnce() -> Result<T, MirrorError>,
) -> Result<T, MirrorError> {
    catch_unwind(AssertUnwindSafe(run)).unwrap_or(Err(MirrorError::Panicked(operation)))
}

/// Counters reported by `/stats`
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MirrorStats {
    pub scenes: usize,
    pub models: usize,
    pub chunks: usize,
    pub primitives: usize,
    pub rebuilds: u64,
    pub removals: u64,
}

/// Result of one sync pass over a world's models
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub rebuilt: usize,
    pub moved: usize,
    pub pruned: usize,
}

/// The mirrored physics world as seen by the simulation and world hooks.
///
/// Implementations are not reentrant; share them behind [`SharedMirror`].
pub trait MeshMirror: Send {
    /// Upsert every mesh-collision model of `world` and drop mirrors of
    /// models no longer present.
    fn sync_meshes_for_world(&mut self, world: &dyn WorldView) -> Result<SyncReport, MirrorError>;

    /// `vertices` is a flat `[x, y, z, ...]` buffer in world space.
    fn upsert_chunk_mesh(
        &mut self,
        world: WorldId,
        chunk_x: i32,
        chunk_z: i32,
        vertices: &[f32],
        indices: &[u32],
    ) -> Result<(), MirrorError>;

    fn remove_chunk_mesh(&mut self, world: WorldId, chunk_x: i32, chunk_z: i32) -> bool;

    fn upsert_primitive(&mut self, world: WorldId, primitive: &Primitive) -> Result<(), MirrorError>;

    fn remove_primitive(&mut self, world: WorldId, id: PrimitiveId) -> bool;

    /// Drop every mirror and the collision scene of an unloaded world.
    /// Returns how many mirrored bodies were destroyed.
    fn remove_world(&mut self, world: WorldId) -> usize;

    fn create_probe(&mut self, width: f32, height: f32) -> Result<ProbeCharacter, MirrorError>;

    fn move_character(
        &mut self,
        world: WorldId,
        probe: &ProbeCharacter,
        request: &MoveRequest,
    ) -> Result<MoveResult, MirrorError>;

    fn probe_ground(
        &mut self,
        world: WorldId,
        probe: &ProbeCharacter,
        request: &GroundProbe,
    ) -> Result<bool, MirrorError>;

    fn stats(&self) -> MirrorStats;
}

pub type SharedMirror = Arc<Mutex<dyn MeshMirror>>;

/// Wrap a mirror for sharing between the tick loop and world hooks.
pub fn shared<M: MeshMirror + 'static>(mirror: M) -> SharedMirror {
    Arc::new(Mutex::new(mirror))
}
