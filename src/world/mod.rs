//! Authoritative world surface consumed by the movement simulation
//!
//! Worlds own blocks, placed models and procedural primitives. The simulation
//! reads them through [`WorldView`]; mutation hooks on [`WorldRegistry`]
//! forward geometry changes into the mesh mirror.

pub mod aabb;
pub mod collision;
pub mod instance;
pub mod library;

pub use aabb::Aabb;
pub use collision::BlockCollisionView;
pub use instance::InstanceWorld;
pub use library::{MeshData, ModelLibrary};

use dashmap::DashMap;
use glam::{DVec3, IVec3, Quat, Vec3};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::mirror::geometry::{self, PrimitiveShape};
use crate::mirror::SharedMirror;

/// World (instance) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorldId(pub Uuid);

impl WorldId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorldId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub type ModelId = u64;
pub type PrimitiveId = u64;

/// Block material class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Air,
    Liquid,
    Solid,
}

/// A block cell; `shape` is the collision box in cell-local [0,1] space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub kind: BlockKind,
    pub shape: Option<Aabb>,
}

impl Block {
    pub const AIR: Block = Block {
        kind: BlockKind::Air,
        shape: None,
    };

    pub fn solid() -> Self {
        Self {
            kind: BlockKind::Solid,
            shape: Some(Aabb::new(DVec3::ZERO, DVec3::ONE)),
        }
    }

    /// Lower half slab
    pub fn slab() -> Self {
        Self {
            kind: BlockKind::Solid,
            shape: Some(Aabb::new(DVec3::ZERO, DVec3::new(1.0, 0.5, 1.0))),
        }
    }

    pub fn liquid() -> Self {
        Self {
            kind: BlockKind::Liquid,
            shape: None,
        }
    }

    /// Solid block without a collision box (e.g. a flower)
    pub fn passable() -> Self {
        Self {
            kind: BlockKind::Solid,
            shape: None,
        }
    }
}

/// How a placed model participates in collision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionMode {
    None,
    /// Coarse box only; never mirrored
    Box,
    /// Triangle-accurate; mirrored into the mesh world
    Mesh,
}

/// A placed model instance
#[derive(Debug, Clone, PartialEq)]
pub struct MeshModel {
    pub id: ModelId,
    pub geometry_path: String,
    pub position: DVec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub collision: CollisionMode,
    /// Movable models receive player pushes
    pub pushable: bool,
    pub velocity: Vec3,
}

impl MeshModel {
    pub fn new(id: ModelId, geometry_path: impl Into<String>, position: DVec3) -> Self {
        Self {
            id,
            geometry_path: geometry_path.into(),
            position,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            collision: CollisionMode::Mesh,
            pushable: false,
            velocity: Vec3::ZERO,
        }
    }

    /// Axis-aligned world bounds given the model's local geometry
    pub fn world_bounds(&self, mesh: &MeshData) -> Option<Aabb> {
        let (min, max) = mesh.local_bounds()?;
        let corners = (0..8).map(|i| {
            let local = Vec3::new(
                if i & 1 == 0 { min.x } else { max.x },
                if i & 2 == 0 { min.y } else { max.y },
                if i & 4 == 0 { min.z } else { max.z },
            );
            self.position + (self.rotation * (local * self.scale)).as_dvec3()
        });
        Aabb::from_points(corners)
    }
}

/// A procedural primitive placed in a world
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub id: PrimitiveId,
    pub shape: PrimitiveShape,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub collision: bool,
}

impl Primitive {
    pub fn new(id: PrimitiveId, shape: PrimitiveShape, position: Vec3) -> Self {
        Self {
            id,
            shape,
            position,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            collision: true,
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn without_collision(mut self) -> Self {
        self.collision = false;
        self
    }

    pub fn world_bounds(&self) -> Option<Aabb> {
        geometry::world_bounds(&self.shape, self.position, self.rotation, self.scale)
    }
}

/// Read access to a world, as seen by the simulation and the mirror
pub trait WorldView {
    fn id(&self) -> WorldId;

    fn block_at(&self, cell: IVec3) -> Block;

    fn models(&self) -> Box<dyn Iterator<Item = &MeshModel> + '_>;

    fn model_geometry(&self, path: &str) -> Option<Arc<MeshData>>;

    /// Precomputed bounds of collision-enabled primitives
    fn primitive_colliders(&self) -> Box<dyn Iterator<Item = &Aabb> + '_>;

    /// Bounds of other engine-managed solids (box-collision models)
    fn engine_colliders(&self, query: &Aabb) -> Vec<Aabb>;
}

pub type SharedWorld = Arc<RwLock<InstanceWorld>>;

/// Registry of loaded worlds plus the mutation hooks that keep the mesh
/// mirror in step with them.
pub struct WorldRegistry {
    worlds: DashMap<WorldId, SharedWorld>,
    library: Arc<ModelLibrary>,
    mirror: Option<SharedMirror>,
}

impl WorldRegistry {
    pub fn new(library: Arc<ModelLibrary>, mirror: Option<SharedMirror>) -> Self {
        Self {
            worlds: DashMap::new(),
            library,
            mirror,
        }
    }

    pub fn create_world(&self) -> SharedWorld {
        let world = InstanceWorld::new(WorldId::new(), self.library.clone());
        self.insert(world)
    }

    pub fn insert(&self, world: InstanceWorld) -> SharedWorld {
        let id = world.id();
        let shared = Arc::new(RwLock::new(world));
        self.worlds.insert(id, shared.clone());
        info!(world_id = %id, "World loaded");
        shared
    }

    pub fn get(&self, id: WorldId) -> Option<SharedWorld> {
        self.worlds.get(&id).map(|w| w.value().clone())
    }

    /// Unload a world and drop everything mirrored for it.
    pub fn remove(&self, id: WorldId) -> Option<SharedWorld> {
        let removed = self.worlds.remove(&id).map(|(_, w)| w);
        if let Some(mirror) = &self.mirror {
            mirror.lock().remove_world(id);
        }
        if removed.is_some() {
            info!(world_id = %id, "World unloaded");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.worlds.len()
    }

    /// Place or replace a primitive and mirror it.
    pub fn spawn_primitive(&self, world_id: WorldId, primitive: Primitive) -> bool {
        let Some(world) = self.get(world_id) else {
            warn!(world_id = %world_id, primitive_id = primitive.id, "Primitive spawned into unknown world");
            return false;
        };
        world.write().insert_primitive(primitive.clone());

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.lock().upsert_primitive(world_id, &primitive) {
                warn!(primitive_id = primitive.id, error = %e, "Failed to mirror primitive");
            }
        }
        true
    }

    pub fn remove_primitive(&self, world_id: WorldId, id: PrimitiveId) -> bool {
        let removed = self
            .get(world_id)
            .map(|w| w.write().remove_primitive(id).is_some())
            .unwrap_or(false);

        if let Some(mirror) = &self.mirror {
            mirror.lock().remove_primitive(world_id, id);
        }
        removed
    }

    /// Chunk terrain meshes arrive as flat `[x, y, z, ...]` buffers.
    pub fn load_chunk_mesh(
        &self,
        world_id: WorldId,
        chunk_x: i32,
        chunk_z: i32,
        vertices: &[f32],
        indices: &[u32],
    ) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        if let Err(e) = mirror
            .lock()
            .upsert_chunk_mesh(world_id, chunk_x, chunk_z, vertices, indices)
        {
            warn!(world_id = %world_id, chunk_x, chunk_z, error = %e, "Failed to mirror chunk mesh");
        }
    }

    pub fn unload_chunk_mesh(&self, world_id: WorldId, chunk_x: i32, chunk_z: i32) {
        if let Some(mirror) = &self.mirror {
            mirror.lock().remove_chunk_mesh(world_id, chunk_x, chunk_z);
        }
    }

    /// Push movable models overlapping `player_box` along the player's
    /// velocity.
    pub fn apply_player_push(&self, world_id: WorldId, player_box: &Aabb, velocity: Vec3, strength: f32) {
        if let Some(world) = self.get(world_id) {
            world.write().apply_player_push(player_box, velocity, strength);
        }
    }
}
