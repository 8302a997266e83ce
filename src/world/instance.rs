//! In-memory world instance

use glam::{DVec3, IVec3, Vec3};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{
    Aabb, Block, CollisionMode, MeshData, MeshModel, ModelId, ModelLibrary, Primitive,
    PrimitiveId, WorldId, WorldView,
};

/// Minimum squared speed for a player to push anything
const PUSH_MIN_SPEED_SQ: f32 = 1.0e-8;
/// Query inflation so touching objects are pushed too
const PUSH_QUERY_MARGIN: f64 = 0.02;

/// A loaded world: sparse block grid, placed models and primitives
pub struct InstanceWorld {
    id: WorldId,
    library: Arc<ModelLibrary>,
    blocks: HashMap<IVec3, Block>,
    models: HashMap<ModelId, MeshModel>,
    primitives: HashMap<PrimitiveId, Primitive>,
    /// Bounds cached at insert time for collision-enabled volumetric primitives
    primitive_bounds: HashMap<PrimitiveId, Aabb>,
}

impl InstanceWorld {
    pub fn new(id: WorldId, library: Arc<ModelLibrary>) -> Self {
        Self {
            id,
            library,
            blocks: HashMap::new(),
            models: HashMap::new(),
            primitives: HashMap::new(),
            primitive_bounds: HashMap::new(),
        }
    }

    /// Solid square floor whose top face sits at `floor_y + 1`.
    pub fn flat(id: WorldId, library: Arc<ModelLibrary>, floor_y: i32, radius: i32) -> Self {
        let mut world = Self::new(id, library);
        for x in -radius..=radius {
            for z in -radius..=radius {
                world.set_block(IVec3::new(x, floor_y, z), Block::solid());
            }
        }
        world
    }

    pub fn set_block(&mut self, cell: IVec3, block: Block) {
        if block.kind == super::BlockKind::Air {
            self.blocks.remove(&cell);
        } else {
            self.blocks.insert(cell, block);
        }
    }

    pub fn insert_model(&mut self, model: MeshModel) {
        debug!(world_id = %self.id, model_id = model.id, path = %model.geometry_path, "Model placed");
        self.models.insert(model.id, model);
    }

    pub fn model(&self, id: ModelId) -> Option<&MeshModel> {
        self.models.get(&id)
    }

    pub fn model_mut(&mut self, id: ModelId) -> Option<&mut MeshModel> {
        self.models.get_mut(&id)
    }

    pub fn remove_model(&mut self, id: ModelId) -> Option<MeshModel> {
        self.models.remove(&id)
    }

    pub fn insert_primitive(&mut self, primitive: Primitive) {
        let bounds = if primitive.collision {
            primitive.world_bounds()
        } else {
            None
        };
        match bounds {
            Some(b) => {
                self.primitive_bounds.insert(primitive.id, b);
            }
            None => {
                self.primitive_bounds.remove(&primitive.id);
            }
        }
        self.primitives.insert(primitive.id, primitive);
    }

    pub fn remove_primitive(&mut self, id: PrimitiveId) -> Option<Primitive> {
        self.primitive_bounds.remove(&id);
        self.primitives.remove(&id)
    }

    /// Nudge pushable models overlapping the player's box along its velocity.
    /// Returns how many models were pushed.
    pub fn apply_player_push(&mut self, player_box: &Aabb, velocity: Vec3, strength: f32) -> usize {
        if velocity.length_squared() < PUSH_MIN_SPEED_SQ || strength <= 0.0 {
            return 0;
        }
        let query = player_box.expanded(DVec3::splat(PUSH_QUERY_MARGIN));
        let impulse = velocity * strength;
        let library = &self.library;

        let mut pushed = 0;
        for model in self.models.values_mut().filter(|m| m.pushable) {
            let overlaps = library
                .get(&model.geometry_path)
                .and_then(|mesh| model.world_bounds(&mesh))
                .map(|b| b.intersects(&query))
                .unwrap_or(false);
            if overlaps {
                model.velocity += impulse;
                pushed += 1;
            }
        }
        pushed
    }
}

impl WorldView for InstanceWorld {
    fn id(&self) -> WorldId {
        self.id
    }

    fn block_at(&self, cell: IVec3) -> Block {
        self.blocks.get(&cell).copied().unwrap_or(Block::AIR)
    }

    fn models(&self) -> Box<dyn Iterator<Item = &MeshModel> + '_> {
        Box::new(self.models.values())
    }

    fn model_geometry(&self, path: &str) -> Option<Arc<MeshData>> {
        self.library.get(path)
    }

    fn primitive_colliders(&self) -> Box<dyn Iterator<Item = &Aabb> + '_> {
        Box::new(self.primitive_bounds.values())
    }

    fn engine_colliders(&self, query: &Aabb) -> Vec<Aabb> {
        self.models
            .values()
            .filter(|m| m.collision == CollisionMode::Box)
            .filter_map(|m| {
                let mesh = self.library.get(&m.geometry_path)?;
                m.world_bounds(&mesh)
            })
            .filter(|b| b.intersects(query))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::geometry::PrimitiveShape;

    fn library_with_unit_box() -> Arc<ModelLibrary> {
        let library = Arc::new(ModelLibrary::new());
        library.register(
            "box",
            MeshData::new(
                vec![Vec3::new(-0.5, 0.0, -0.5), Vec3::new(0.5, 1.0, 0.5)],
                vec![],
            ),
        );
        library
    }

    #[test]
    fn flat_world_has_floor_only() {
        let world = InstanceWorld::flat(WorldId::new(), Arc::new(ModelLibrary::new()), 63, 2);
        assert_eq!(world.block_at(IVec3::new(0, 63, 0)), Block::solid());
        assert_eq!(world.block_at(IVec3::new(0, 64, 0)), Block::AIR);
        assert_eq!(world.block_at(IVec3::new(3, 63, 0)), Block::AIR);
    }

    #[test]
    fn non_colliding_primitives_have_no_bounds() {
        let mut world = InstanceWorld::new(WorldId::new(), Arc::new(ModelLibrary::new()));
        world.insert_primitive(Primitive::new(1, PrimitiveShape::Cube, Vec3::ZERO).without_collision());
        world.insert_primitive(Primitive::new(2, PrimitiveShape::Line, Vec3::ZERO));
        world.insert_primitive(Primitive::new(3, PrimitiveShape::Sphere, Vec3::ZERO));

        assert_eq!(world.primitive_colliders().count(), 1);
    }

    #[test]
    fn push_moves_only_overlapping_pushable_models() {
        let mut world = InstanceWorld::new(WorldId::new(), library_with_unit_box());
        let mut near = MeshModel::new(1, "box", DVec3::new(0.8, 64.0, 0.0));
        near.pushable = true;
        let mut far = MeshModel::new(2, "box", DVec3::new(10.0, 64.0, 0.0));
        far.pushable = true;
        let anchored = MeshModel::new(3, "box", DVec3::new(0.8, 64.0, 0.0));
        world.insert_model(near);
        world.insert_model(far);
        world.insert_model(anchored);

        let player = Aabb::from_feet(DVec3::new(0.0, 64.0, 0.0), 0.6, 1.8);
        let pushed = world.apply_player_push(&player, Vec3::new(4.0, 0.0, 0.0), 0.35);

        assert_eq!(pushed, 1);
        assert!((world.model(1).map(|m| m.velocity.x).unwrap_or(0.0) - 1.4).abs() < 1e-6);
        assert_eq!(world.model(2).map(|m| m.velocity), Some(Vec3::ZERO));
        assert_eq!(world.model(3).map(|m| m.velocity), Some(Vec3::ZERO));
    }

    #[test]
    fn resting_player_pushes_nothing() {
        let mut world = InstanceWorld::new(WorldId::new(), library_with_unit_box());
        let mut model = MeshModel::new(1, "box", DVec3::new(0.5, 64.0, 0.0));
        model.pushable = true;
        world.insert_model(model);

        let player = Aabb::from_feet(DVec3::new(0.0, 64.0, 0.0), 0.6, 1.8);
        assert_eq!(world.apply_player_push(&player, Vec3::ZERO, 0.35), 0);
    }
}
