//! Block collision adapter
//!
//! Turns a bounding query into the axis-aligned boxes the base controller
//! collides against: block shapes, registered primitive bounds and
//! engine-managed box colliders.

use glam::{DVec3, IVec3};

use super::{Aabb, BlockKind, WorldView};

/// Cells whose lower edge coincides with the query's max edge are excluded.
pub const COLLISION_QUERY_EPS: f64 = 1.0e-9;

/// Collision source for the base controller
pub trait CollisionQuery {
    /// Boxes overlapping `query`, sorted by ascending `min.y`.
    fn collisions(&self, query: &Aabb) -> Vec<Aabb>;
}

/// Read-only adapter over a world for one tick
pub struct BlockCollisionView<'a> {
    world: &'a dyn WorldView,
}

impl<'a> BlockCollisionView<'a> {
    pub fn new(world: &'a dyn WorldView) -> Self {
        Self { world }
    }

    fn block_boxes(&self, query: &Aabb, out: &mut Vec<Aabb>) {
        let min = query.min.floor().as_ivec3();
        let max = (query.max - DVec3::splat(COLLISION_QUERY_EPS))
            .floor()
            .as_ivec3();

        for x in min.x..=max.x {
            for y in min.y..=max.y {
                for z in min.z..=max.z {
                    let cell = IVec3::new(x, y, z);
                    let block = self.world.block_at(cell);
                    if matches!(block.kind, BlockKind::Air | BlockKind::Liquid) {
                        continue;
                    }
                    let Some(shape) = block.shape else {
                        continue;
                    };
                    if shape.is_degenerate() {
                        continue;
                    }
                    out.push(shape.moved(cell.as_dvec3()));
                }
            }
        }
    }
}

impl CollisionQuery for BlockCollisionView<'_> {
    fn collisions(&self, query: &Aabb) -> Vec<Aabb> {
        let mut out = Vec::new();
        self.block_boxes(query, &mut out);

        out.extend(self.world.engine_colliders(query));
        out.extend(
            self.world
                .primitive_colliders()
                .filter(|b| b.intersects(query))
                .copied(),
        );

        if out.len() > 1 {
            out.sort_by(|a, b| a.min.y.total_cmp(&b.min.y));
        }
        out
    }
}

/// No geometry at all
#[cfg(test)]
pub struct EmptyCollision;

#[cfg(test)]
impl CollisionQuery for EmptyCollision {
    fn collisions(&self, _query: &Aabb) -> Vec<Aabb> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::geometry::PrimitiveShape;
    use crate::world::{Block, InstanceWorld, ModelLibrary, Primitive, WorldId};
    use glam::Vec3;
    use std::sync::Arc;

    fn world() -> InstanceWorld {
        InstanceWorld::new(WorldId::new(), Arc::new(ModelLibrary::new()))
    }

    #[test]
    fn query_edge_on_cell_boundary_excludes_next_cell() {
        let mut w = world();
        w.set_block(IVec3::new(0, 0, 0), Block::solid());
        w.set_block(IVec3::new(1, 0, 0), Block::solid());

        let view = BlockCollisionView::new(&w);
        let hits = view.collisions(&Aabb::new(DVec3::new(0.2, 0.2, 0.2), DVec3::new(1.0, 0.8, 0.8)));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].min, DVec3::ZERO);
    }

    #[test]
    fn skips_air_liquid_and_shapeless_blocks() {
        let mut w = world();
        w.set_block(IVec3::new(0, 0, 0), Block::liquid());
        w.set_block(IVec3::new(1, 0, 0), Block::passable());
        w.set_block(IVec3::new(2, 0, 0), Block::slab());

        let view = BlockCollisionView::new(&w);
        let hits = view.collisions(&Aabb::new(DVec3::ZERO, DVec3::new(3.0, 1.0, 1.0)));
        assert_eq!(hits.len(), 1);
        assert!((hits[0].max.y - 0.5).abs() < 1e-12);
    }

    #[test]
    fn results_are_sorted_by_bottom() {
        let mut w = world();
        w.set_block(IVec3::new(0, 2, 0), Block::solid());
        w.set_block(IVec3::new(0, 0, 0), Block::solid());
        w.insert_primitive(
            Primitive::new(1, PrimitiveShape::Cube, Vec3::new(0.5, 1.5, 0.5)).with_scale(Vec3::splat(0.5)),
        );

        let view = BlockCollisionView::new(&w);
        let hits = view.collisions(&Aabb::new(DVec3::ZERO, DVec3::new(1.0, 3.0, 1.0)));
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|p| p[0].min.y <= p[1].min.y));
        assert!((hits[1].min.y - 1.25).abs() < 1e-6);
    }

    #[test]
    fn negative_coordinates_floor_correctly() {
        let mut w = world();
        w.set_block(IVec3::new(-1, -1, -1), Block::solid());

        let view = BlockCollisionView::new(&w);
        let hits = view.collisions(&Aabb::new(DVec3::splat(-0.5), DVec3::splat(-0.1)));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].min, DVec3::splat(-1.0));
    }
}
