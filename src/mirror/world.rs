//! Rapier-backed mirror world
//!
//! Each authoritative world gets its own collision scene holding only
//! static triangle-mesh colliders. Probes are never inserted; they are
//! swept through the scene with a kinematic character controller.

use glam::{DVec3, Quat, Vec3};
use rapier3d::dynamics::{IslandManager, RigidBodySet};
use rapier3d::geometry::{Collider, ColliderBuilder, ColliderHandle, ColliderSet};
use rapier3d::math::{Isometry, Point, Real, Vector};
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::parry::query;
use rapier3d::pipeline::{QueryFilter, QueryPipeline};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::cache::{
    BodyStore, ChunkSignature, MirrorCache, ModelSignature, PrimitiveSignature,
};
use super::geometry::{self, Triangle};
use super::probe::{GroundProbe, MoveRequest, MoveResult, ProbeCharacter};
use super::{MeshMirror, MirrorError, MirrorStats, SyncReport};
use crate::world::{CollisionMode, MeshModel, ModelId, Primitive, PrimitiveId, WorldId, WorldView};

const MAX_RECOVERY_ITERATIONS: usize = 4;
const POSE_EPSILON: Real = 1.0e-6;
const MIN_TRIANGLE_AREA_SQ: Real = 1.0e-12;

type ChunkKey = (WorldId, i32, i32);
type ModelKey = (WorldId, ModelId);
type PrimitiveKey = (WorldId, PrimitiveId);

struct MirrorScene {
    bodies: RigidBodySet,
    colliders: ColliderSet,
    islands: IslandManager,
    queries: QueryPipeline,
    dirty: bool,
}

impl MirrorScene {
    fn new() -> Self {
        Self {
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            islands: IslandManager::new(),
            queries: QueryPipeline::new(),
            dirty: false,
        }
    }

    fn insert(&mut self, collider: Collider) -> ColliderHandle {
        self.dirty = true;
        self.colliders.insert(collider)
    }

    fn remove(&mut self, handle: ColliderHandle) {
        if self
            .colliders
            .remove(handle, &mut self.islands, &mut self.bodies, false)
            .is_some()
        {
            self.dirty = true;
        }
    }

    /// Move a collider in place; returns whether the pose changed.
    fn place(&mut self, handle: ColliderHandle, pose: Isometry<Real>) -> bool {
        let Some(collider) = self.colliders.get_mut(handle) else {
            return false;
        };
        let current = collider.position();
        let moved = (current.translation.vector - pose.translation.vector).norm() > POSE_EPSILON
            || current.rotation.angle_to(&pose.rotation) > POSE_EPSILON;
        if moved {
            collider.set_position(pose);
            self.dirty = true;
        }
        moved
    }

    fn refresh(&mut self) {
        if self.dirty {
            self.queries.update(&self.colliders);
            self.dirty = false;
        }
    }

    /// Push the probe out of anything its inner capsule overlaps.
    fn recover_penetration(&self, probe: &ProbeCharacter, center: Vector<Real>) -> Vector<Real> {
        let mut offset = Vector::zeros();
        for _ in 0..MAX_RECOVERY_ITERATIONS {
            let pose = Isometry::translation(center.x + offset.x, center.y + offset.y, center.z + offset.z);
            let Some(hit) = self.queries.intersection_with_shape(
                &self.bodies,
                &self.colliders,
                &pose,
                probe.inner(),
                QueryFilter::default(),
            ) else {
                break;
            };
            let Some(collider) = self.colliders.get(hit) else {
                break;
            };
            match query::contact(&pose, probe.outer(), collider.position(), collider.shape(), 0.0) {
                Ok(Some(contact)) if contact.dist < 0.0 => {
                    offset += contact.normal1.into_inner() * contact.dist;
                }
                _ => break,
            }
        }
        offset
    }
}

#[derive(Default)]
struct Scenes(HashMap<WorldId, MirrorScene>);

impl Scenes {
    fn scene_mut(&mut self, world: WorldId) -> &mut MirrorScene {
        self.0.entry(world).or_insert_with(MirrorScene::new)
    }
}

impl BodyStore<ColliderHandle> for Scenes {
    fn destroy(&mut self, world: WorldId, body: ColliderHandle) {
        if let Some(scene) = self.0.get_mut(&world) {
            scene.remove(body);
        }
    }
}

fn to_vector(v: DVec3) -> Vector<Real> {
    Vector::new(v.x as Real, v.y as Real, v.z as Real)
}

fn to_dvec3(v: &Vector<Real>) -> DVec3 {
    DVec3::new(v.x as f64, v.y as f64, v.z as f64)
}

fn to_point(v: Vec3) -> Point<Real> {
    Point::new(v.x, v.y, v.z)
}

fn to_isometry(position: DVec3, rotation: Quat) -> Isometry<Real> {
    let rotation = rotation.normalize();
    Isometry::from_parts(
        Translation3::new(position.x as Real, position.y as Real, position.z as Real),
        UnitQuaternion::from_quaternion(Quaternion::new(rotation.w, rotation.x, rotation.y, rotation.z)),
    )
}

/// Keep only triangles whose indices all reference existing vertices.
fn valid_triangles(indices: &[u32], vertex_count: usize) -> Vec<[u32; 3]> {
    indices
        .chunks_exact(3)
        .filter(|t| t.iter().all(|&i| (i as usize) < vertex_count))
        .map(|t| [t[0], t[1], t[2]])
        .collect()
}

fn has_area(vertices: &[Point<Real>], [a, b, c]: [u32; 3]) -> bool {
    let (a, b, c) = (vertices[a as usize], vertices[b as usize], vertices[c as usize]);
    (b - a).cross(&(c - a)).norm_squared() > MIN_TRIANGLE_AREA_SQ
}

/// Build a static trimesh collider. Non-finite vertices and meshes made only
/// of zero-area triangles are rejected before they reach the engine.
fn trimesh(
    vertices: Vec<Point<Real>>,
    indices: Vec<[u32; 3]>,
    pose: Isometry<Real>,
    target: impl FnOnce() -> String,
) -> Result<Option<Collider>, MirrorError> {
    if vertices.len() < 3 || indices.is_empty() {
        return Ok(None);
    }
    if vertices.iter().any(|p| !p.coords.iter().all(|c| c.is_finite())) {
        return Err(MirrorError::MeshBuild {
            target: target(),
            reason: "non-finite vertex".into(),
        });
    }
    let indices: Vec<[u32; 3]> = indices.into_iter().filter(|t| has_area(&vertices, *t)).collect();
    if indices.is_empty() {
        return Err(MirrorError::MeshBuild {
            target: target(),
            reason: "every triangle is degenerate".into(),
        });
    }
    Ok(Some(ColliderBuilder::trimesh(vertices, indices).position(pose).build()))
}

/// Rapier implementation of [`MeshMirror`]
pub struct MirrorWorld {
    scenes: Scenes,
    models: MirrorCache<ModelKey, ModelSignature, ColliderHandle>,
    chunks: MirrorCache<ChunkKey, ChunkSignature, ColliderHandle>,
    primitives: MirrorCache<PrimitiveKey, PrimitiveSignature, ColliderHandle>,
    sync_stamp: u64,
    /// Primitives already reported as producing no triangles
    empty_primitives: HashSet<PrimitiveKey>,
}

impl MirrorWorld {
    pub fn new() -> Self {
        Self {
            scenes: Scenes::default(),
            models: MirrorCache::new(),
            chunks: MirrorCache::new(),
            primitives: MirrorCache::new(),
            sync_stamp: 0,
            empty_primitives: HashSet::new(),
        }
    }

    fn upsert_model(&mut self, world: &dyn WorldView, model: &MeshModel, stamp: u64) -> Result<(bool, bool), MirrorError> {
        let world_id = world.id();
        let Some(mesh) = world.model_geometry(&model.geometry_path) else {
            return Ok((false, false));
        };
        let pose = to_isometry(model.position, model.rotation);
        let signature = ModelSignature {
            geometry_path: model.geometry_path.clone(),
            scale: model.scale,
        };

        let upserted = self.models.get_or_rebuild(
            &mut self.scenes,
            (world_id, model.id),
            world_id,
            signature,
            stamp,
            |scenes, sig| {
                let vertices: Vec<Point<Real>> =
                    mesh.vertices.iter().map(|v| to_point(*v * sig.scale)).collect();
                let indices = valid_triangles(&mesh.indices, vertices.len());
                let collider = trimesh(vertices, indices, pose, || format!("model {}", model.id))?;
                Ok::<_, MirrorError>(collider.map(|c| scenes.scene_mut(world_id).insert(c)))
            },
        )?;

        Ok(match upserted {
            Some(u) if u.rebuilt => {
                debug!(world_id = %world_id, model_id = model.id, "Mirrored model rebuilt");
                (true, false)
            }
            Some(u) => (false, self.scenes.scene_mut(world_id).place(u.body, pose)),
            None => (false, false),
        })
    }
}

impl Default for MirrorWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshMirror for MirrorWorld {
    fn sync_meshes_for_world(&mut self, world: &dyn WorldView) -> Result<SyncReport, MirrorError> {
        self.sync_stamp += 1;
        let stamp = self.sync_stamp;
        let mut report = SyncReport::default();

        for model in world.models() {
            if model.collision != CollisionMode::Mesh || model.geometry_path.is_empty() {
                continue;
            }
            match self.upsert_model(world, model, stamp) {
                Ok((rebuilt, moved)) => {
                    report.rebuilt += rebuilt as usize;
                    report.moved += moved as usize;
                }
                Err(e) => {
                    warn!(world_id = %world.id(), model_id = model.id, error = %e, "Skipping model mirror");
                }
            }
        }

        report.pruned = self.models.prune_unseen(&mut self.scenes, world.id(), stamp);
        Ok(report)
    }

    fn upsert_chunk_mesh(
        &mut self,
        world: WorldId,
        chunk_x: i32,
        chunk_z: i32,
        vertices: &[f32],
        indices: &[u32],
    ) -> Result<(), MirrorError> {
        if vertices.len() < 9 || indices.len() < 3 {
            self.remove_chunk_mesh(world, chunk_x, chunk_z);
            return Ok(());
        }
        let key = (world, chunk_x, chunk_z);
        let upserted = self.chunks.get_or_rebuild(
            &mut self.scenes,
            key,
            world,
            ChunkSignature::of(vertices, indices),
            0,
            |scenes, _| {
                let points: Vec<Point<Real>> = vertices
                    .chunks_exact(3)
                    .map(|v| Point::new(v[0], v[1], v[2]))
                    .collect();
                let triangles = valid_triangles(indices, points.len());
                let collider = trimesh(points, triangles, Isometry::identity(), || {
                    format!("chunk {chunk_x},{chunk_z}")
                })?;
                Ok::<_, MirrorError>(collider.map(|c| scenes.scene_mut(world).insert(c)))
            },
        )?;

        if matches!(upserted, Some(u) if u.rebuilt) {
            debug!(world_id = %world, chunk_x, chunk_z, "Mirrored chunk rebuilt");
        }
        Ok(())
    }

    fn remove_chunk_mesh(&mut self, world: WorldId, chunk_x: i32, chunk_z: i32) -> bool {
        self.chunks.remove(&mut self.scenes, &(world, chunk_x, chunk_z))
    }

    fn upsert_primitive(&mut self, world: WorldId, primitive: &Primitive) -> Result<(), MirrorError> {
        if !primitive.shape.has_volume() || !primitive.collision {
            self.remove_primitive(world, primitive.id);
            return Ok(());
        }
        let key = (world, primitive.id);
        let signature = PrimitiveSignature::of(&primitive.shape, primitive.rotation, primitive.scale);
        let translation = to_isometry(primitive.position.as_dvec3(), Quat::IDENTITY);
        let empty = &mut self.empty_primitives;

        let upserted = self.primitives.get_or_rebuild(
            &mut self.scenes,
            key,
            world,
            signature,
            0,
            |scenes, sig| {
                // Rotation and scale are baked in; translation stays on the collider.
                let triangles: Vec<Triangle> =
                    geometry::generate_mesh(&primitive.shape, Vec3::ZERO, sig.rotation, sig.scale);
                if triangles.is_empty() {
                    if empty.insert(key) {
                        warn!(world_id = %world, primitive_id = primitive.id, "Primitive produced no triangles; not mirrored");
                    }
                    return Ok(None);
                }
                let (vertices, indices) = geometry::to_buffers(&triangles, Vec3::ZERO);
                let points = vertices.into_iter().map(to_point).collect();
                let collider = trimesh(points, indices, translation, || format!("primitive {}", primitive.id))?;
                Ok::<_, MirrorError>(collider.map(|c| scenes.scene_mut(world).insert(c)))
            },
        )?;

        if let Some(u) = upserted {
            if !u.rebuilt {
                self.scenes.scene_mut(world).place(u.body, translation);
            }
        }
        Ok(())
    }

    fn remove_primitive(&mut self, world: WorldId, id: PrimitiveId) -> bool {
        self.empty_primitives.remove(&(world, id));
        self.primitives.remove(&mut self.scenes, &(world, id))
    }

    fn remove_world(&mut self, world: WorldId) -> usize {
        let removed = self.models.remove_world(&mut self.scenes, world)
            + self.chunks.remove_world(&mut self.scenes, world)
            + self.primitives.remove_world(&mut self.scenes, world);
        self.empty_primitives.retain(|(w, _)| *w != world);
        if self.scenes.0.remove(&world).is_some() {
            debug!(world_id = %world, removed, "Mirror scene dropped");
        }
        removed
    }

    fn create_probe(&mut self, width: f32, height: f32) -> Result<ProbeCharacter, MirrorError> {
        ProbeCharacter::new(width, height)
    }

    fn move_character(
        &mut self,
        world: WorldId,
        probe: &ProbeCharacter,
        request: &MoveRequest,
    ) -> Result<MoveResult, MirrorError> {
        if !request.is_finite() {
            return Err(MirrorError::NonFinite);
        }
        if request.dt <= 0.0 {
            return Ok(MoveResult::unobstructed(request.displacement));
        }
        let Some(scene) = self.scenes.0.get_mut(&world) else {
            return Ok(MoveResult::unobstructed(request.displacement));
        };
        scene.refresh();

        let center = to_vector(request.feet + DVec3::new(0.0, request.height as f64 * 0.5, 0.0));
        let start = center + scene.recover_penetration(probe, center);
        let controller = probe.controller(request.step_height, request.allow_step);

        let movement = controller.move_shape(
            request.dt,
            &scene.bodies,
            &scene.colliders,
            &scene.queries,
            probe.outer(),
            &Isometry::translation(start.x, start.y, start.z),
            to_vector(request.displacement),
            QueryFilter::default(),
            |_| {},
        );

        let mut result = MoveResult {
            achieved: to_dvec3(&(start - center + movement.translation)),
            on_ground: movement.grounded,
            colliding_horizontally: false,
        };
        result.colliding_horizontally = result.blocked_horizontally(&request.displacement);
        Ok(result)
    }

    fn probe_ground(
        &mut self,
        world: WorldId,
        probe: &ProbeCharacter,
        request: &GroundProbe,
    ) -> Result<bool, MirrorError> {
        let displacement = DVec3::new(0.0, -(request.step_down.abs() as f64), 0.0);
        let result = self.move_character(
            world,
            probe,
            &MoveRequest {
                feet: request.feet,
                displacement,
                dt: request.dt,
                height: request.height,
                step_height: 0.0,
                allow_step: false,
            },
        )?;
        Ok(result.on_ground || result.blocked_y(&displacement))
    }

    fn stats(&self) -> MirrorStats {
        MirrorStats {
            scenes: self.scenes.0.len(),
            models: self.models.len(),
            chunks: self.chunks.len(),
            primitives: self.primitives.len(),
            rebuilds: self.models.rebuilds() + self.chunks.rebuilds() + self.primitives.rebuilds(),
            removals: self.models.removals() + self.chunks.removals() + self.primitives.removals(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::refine::combine;
    use crate::game::state::PlayerState;
    use crate::mirror::geometry::PrimitiveShape;
    use crate::mirror::probe::PROBE_SKIN;
    use crate::world::{InstanceWorld, MeshData, ModelLibrary};
    use std::sync::Arc;

    const DT: f32 = 0.05;

    /// 20x20 double-triangle floor with its top at `y`.
    fn floor_buffers(y: f32) -> (Vec<f32>, Vec<u32>) {
        let vertices = vec![
            -10.0, y, -10.0, //
            10.0, y, -10.0, //
            10.0, y, 10.0, //
            -10.0, y, 10.0,
        ];
        (vertices, vec![0, 2, 1, 0, 3, 2])
    }

    fn world_with_floor(mirror: &mut MirrorWorld, y: f32) -> WorldId {
        let world = WorldId::new();
        let (v, i) = floor_buffers(y);
        mirror.upsert_chunk_mesh(world, 0, 0, &v, &i).expect("chunk");
        world
    }

    #[test]
    fn chunk_upsert_is_idempotent() {
        let mut mirror = MirrorWorld::new();
        let world = world_with_floor(&mut mirror, 64.0);
        let (v, i) = floor_buffers(64.0);
        mirror.upsert_chunk_mesh(world, 0, 0, &v, &i).expect("chunk");

        let stats = mirror.stats();
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.rebuilds, 1);
    }

    #[test]
    fn degenerate_chunk_removes_mirror() {
        let mut mirror = MirrorWorld::new();
        let world = world_with_floor(&mut mirror, 64.0);

        mirror.upsert_chunk_mesh(world, 0, 0, &[0.0; 6], &[0, 1, 0]).expect("degenerate");
        assert_eq!(mirror.stats().chunks, 0);
        assert!(!mirror.remove_chunk_mesh(world, 0, 0));
    }

    #[test]
    fn translated_primitive_is_moved_not_rebuilt() {
        let mut mirror = MirrorWorld::new();
        let world = WorldId::new();
        let mut prim = Primitive::new(5, PrimitiveShape::Cube, Vec3::new(0.0, 64.0, 0.0));
        mirror.upsert_primitive(world, &prim).expect("cube");

        prim.position = Vec3::new(3.0, 64.0, 0.0);
        mirror.upsert_primitive(world, &prim).expect("moved cube");
        assert_eq!(mirror.stats().rebuilds, 1);

        prim = prim.with_rotation(Quat::from_rotation_y(1.0e-4));
        mirror.upsert_primitive(world, &prim).expect("nudged cube");
        assert_eq!(mirror.stats().rebuilds, 1);

        prim = prim.with_rotation(Quat::from_rotation_y(0.5));
        mirror.upsert_primitive(world, &prim).expect("rotated cube");
        assert_eq!(mirror.stats().rebuilds, 2);
        assert_eq!(mirror.stats().primitives, 1);
    }

    #[test]
    fn lines_and_non_colliding_primitives_are_not_mirrored() {
        let mut mirror = MirrorWorld::new();
        let world = WorldId::new();
        mirror
            .upsert_primitive(world, &Primitive::new(1, PrimitiveShape::Line, Vec3::ZERO))
            .expect("line");
        mirror
            .upsert_primitive(world, &Primitive::new(2, PrimitiveShape::Cube, Vec3::ZERO).without_collision())
            .expect("ghost");
        assert_eq!(mirror.stats().primitives, 0);
    }

    #[test]
    fn empty_custom_mesh_is_skipped() {
        let mut mirror = MirrorWorld::new();
        let world = WorldId::new();
        let prim = Primitive::new(
            3,
            PrimitiveShape::Mesh {
                vertices: vec![Vec3::ZERO],
                indices: vec![0, 5, 9],
            },
            Vec3::ZERO,
        );
        mirror.upsert_primitive(world, &prim).expect("no error for empty mesh");
        mirror.upsert_primitive(world, &prim).expect("still no error");
        assert_eq!(mirror.stats().primitives, 0);
    }

    #[test]
    fn model_sync_tracks_moves_scale_and_removal() {
        let mut world = InstanceWorld::new(WorldId::new(), slab_library());
        world.insert_model(MeshModel::new(1, "slab", DVec3::new(0.0, 64.0, 0.0)));
        let mut boxed = MeshModel::new(2, "slab", DVec3::ZERO);
        boxed.collision = CollisionMode::Box;
        world.insert_model(boxed);

        let mut mirror = MirrorWorld::new();
        let first = mirror.sync_meshes_for_world(&world).expect("sync");
        assert_eq!(first, SyncReport { rebuilt: 1, moved: 0, pruned: 0 });

        let unchanged = mirror.sync_meshes_for_world(&world).expect("sync");
        assert_eq!(unchanged, SyncReport::default());

        if let Some(m) = world.model_mut(1) {
            m.position.y = 65.0;
        }
        let moved = mirror.sync_meshes_for_world(&world).expect("sync");
        assert_eq!(moved, SyncReport { rebuilt: 0, moved: 1, pruned: 0 });

        if let Some(m) = world.model_mut(1) {
            m.scale = Vec3::splat(2.0);
        }
        let rescaled = mirror.sync_meshes_for_world(&world).expect("sync");
        assert_eq!(rescaled.rebuilt, 1);

        world.remove_model(1);
        let pruned = mirror.sync_meshes_for_world(&world).expect("sync");
        assert_eq!(pruned.pruned, 1);
        assert_eq!(mirror.stats().models, 0);
    }

    fn slab_library() -> Arc<ModelLibrary> {
        let library = Arc::new(ModelLibrary::new());
        let (v, i) = floor_buffers(0.0);
        library.register(
            "slab",
            MeshData::new(v.chunks_exact(3).map(|c| Vec3::new(c[0], c[1], c[2])).collect(), i),
        );
        library
    }

    #[test]
    fn worlds_sharing_ids_keep_separate_mirrors() {
        let library = slab_library();
        let mut a = InstanceWorld::new(WorldId::new(), library.clone());
        let mut b = InstanceWorld::new(WorldId::new(), library);
        a.insert_model(MeshModel::new(1, "slab", DVec3::new(0.0, 64.0, 0.0)));
        b.insert_model(MeshModel::new(1, "slab", DVec3::new(0.0, 10.0, 0.0)));

        let mut mirror = MirrorWorld::new();
        mirror.sync_meshes_for_world(&a).expect("sync a");
        mirror.sync_meshes_for_world(&b).expect("sync b");
        assert_eq!(mirror.sync_meshes_for_world(&a).expect("sync a"), SyncReport::default());
        assert_eq!(mirror.sync_meshes_for_world(&b).expect("sync b"), SyncReport::default());
        assert_eq!(mirror.stats().models, 2);
        assert_eq!(mirror.stats().rebuilds, 2);

        let cube = Primitive::new(7, PrimitiveShape::Cube, Vec3::new(0.0, 80.0, 0.0));
        mirror.upsert_primitive(a.id(), &cube).expect("cube a");
        mirror.upsert_primitive(b.id(), &cube).expect("cube b");
        assert!(mirror.remove_primitive(b.id(), 7));
        assert_eq!(mirror.stats().primitives, 1);

        let probe = mirror.create_probe(0.6, 1.8).expect("probe");
        let fall = MoveRequest {
            feet: DVec3::new(0.0, 64.05, 0.0),
            displacement: DVec3::new(0.0, -0.5, 0.0),
            dt: DT,
            height: 1.8,
            step_height: 0.6,
            allow_step: false,
        };
        let result = mirror.move_character(a.id(), &probe, &fall).expect("move");
        assert!(result.blocked_y(&fall.displacement));
    }

    #[test]
    fn removing_a_world_drops_its_scene_and_mirrors() {
        let library = slab_library();
        let mut a = InstanceWorld::new(WorldId::new(), library.clone());
        let mut b = InstanceWorld::new(WorldId::new(), library);
        a.insert_model(MeshModel::new(1, "slab", DVec3::ZERO));
        b.insert_model(MeshModel::new(1, "slab", DVec3::ZERO));

        let mut mirror = MirrorWorld::new();
        mirror.sync_meshes_for_world(&a).expect("sync a");
        mirror.sync_meshes_for_world(&b).expect("sync b");
        let (v, i) = floor_buffers(64.0);
        mirror.upsert_chunk_mesh(a.id(), 0, 0, &v, &i).expect("chunk");
        mirror
            .upsert_primitive(a.id(), &Primitive::new(3, PrimitiveShape::Sphere, Vec3::ZERO))
            .expect("sphere");

        assert_eq!(mirror.remove_world(a.id()), 3);
        let stats = mirror.stats();
        assert_eq!(stats.scenes, 1);
        assert_eq!((stats.models, stats.chunks, stats.primitives), (1, 0, 0));
        assert_eq!(mirror.remove_world(a.id()), 0);
    }

    #[test]
    fn unusable_triangles_are_rejected() {
        let points = |ys: [f32; 3]| -> Vec<Point<Real>> {
            vec![Point::new(0.0, ys[0], 0.0), Point::new(1.0, ys[1], 0.0), Point::new(0.0, ys[2], 1.0)]
        };
        let build = |vertices| trimesh(vertices, vec![[0, 1, 2]], Isometry::identity(), || "test".into());

        assert!(matches!(build(points([0.0, f32::NAN, 0.0])), Err(MirrorError::MeshBuild { .. })));
        let collinear = vec![Point::new(0.0, 0.0, 0.0), Point::new(1.0, 0.0, 0.0), Point::new(2.0, 0.0, 0.0)];
        assert!(matches!(build(collinear), Err(MirrorError::MeshBuild { .. })));
        assert!(matches!(build(points([0.0, 0.0, 0.0])), Ok(Some(_))));
    }

    #[test]
    fn ramp_is_climbed_without_horizontal_block() {
        let mut mirror = MirrorWorld::new();
        let world = world_with_floor(&mut mirror, 64.0);
        let ramp = Primitive::new(
            11,
            PrimitiveShape::Mesh {
                vertices: vec![
                    Vec3::new(-0.5, 0.0, 0.0),
                    Vec3::new(0.5, 0.0, 0.0),
                    Vec3::new(0.5, 1.0, 1.0),
                    Vec3::new(-0.5, 1.0, 1.0),
                ],
                indices: vec![0, 2, 1, 0, 3, 2],
            },
            Vec3::new(0.0, 64.0, 0.0),
        )
        .with_scale(Vec3::new(4.0, 1.0, 4.0));
        mirror.upsert_primitive(world, &ramp).expect("ramp");
        let probe = mirror.create_probe(0.6, 1.8).expect("probe");

        let velocity = glam::Vec3::new(0.0, 0.0, 4.0);
        let mut feet = DVec3::new(0.0, 64.0 + PROBE_SKIN as f64, -1.0);
        for _ in 0..15 {
            let displacement = DVec3::new(0.0, 0.0, 0.2);
            let request = MoveRequest {
                feet,
                displacement,
                dt: DT,
                height: 1.8,
                step_height: 0.6,
                allow_step: true,
            };
            let result = mirror.move_character(world, &probe, &request).expect("move");
            assert!(!result.colliding_horizontally, "blocked at {feet:?}: {result:?}");

            let prev = PlayerState {
                position: feet,
                velocity,
                on_ground: true,
                colliding_horizontally: false,
            };
            let base = PlayerState {
                position: feet + displacement,
                ..prev
            };
            let next = combine(&prev, &base, displacement, &result);
            assert_eq!(next.velocity.z, 4.0);
            assert!(!next.colliding_horizontally);
            feet = next.position;
        }

        assert!(feet.y > 64.2, "did not climb: {feet:?}");
        assert!(feet.z > 0.5);
    }

    #[test]
    fn probe_finds_mesh_floor_below() {
        let mut mirror = MirrorWorld::new();
        let world = world_with_floor(&mut mirror, 64.0);
        let probe = mirror.create_probe(0.6, 1.8).expect("probe");

        let near = GroundProbe {
            feet: DVec3::new(0.0, 64.02, 0.0),
            dt: DT,
            height: 1.8,
            step_down: 0.1,
        };
        assert!(mirror.probe_ground(world, &probe, &near).expect("probe"));

        let far = GroundProbe {
            feet: DVec3::new(0.0, 66.0, 0.0),
            ..near
        };
        assert!(!mirror.probe_ground(world, &probe, &far).expect("probe"));
    }

    #[test]
    fn falling_onto_mesh_is_blocked_vertically() {
        let mut mirror = MirrorWorld::new();
        let world = world_with_floor(&mut mirror, 64.0);
        let probe = mirror.create_probe(0.6, 1.8).expect("probe");

        let request = MoveRequest {
            feet: DVec3::new(0.0, 64.05, 0.0),
            displacement: DVec3::new(0.0, -0.5, 0.0),
            dt: DT,
            height: 1.8,
            step_height: 0.6,
            allow_step: false,
        };
        let result = mirror.move_character(world, &probe, &request).expect("move");
        assert!(result.blocked_y(&request.displacement));
        assert!(result.achieved.y > -0.1);
    }

    #[test]
    fn free_space_move_is_unobstructed() {
        let mut mirror = MirrorWorld::new();
        let world = world_with_floor(&mut mirror, 0.0);
        let probe = mirror.create_probe(0.6, 1.8).expect("probe");

        let request = MoveRequest {
            feet: DVec3::new(0.0, 50.0, 0.0),
            displacement: DVec3::new(0.2, 0.0, -0.1),
            dt: DT,
            height: 1.8,
            step_height: 0.6,
            allow_step: false,
        };
        let result = mirror.move_character(world, &probe, &request).expect("move");
        assert!((result.achieved - request.displacement).length() < 1e-4);
        assert!(!result.colliding_horizontally);

        let unknown = mirror.move_character(WorldId::new(), &probe, &request).expect("move");
        assert_eq!(unknown.achieved, request.displacement);
    }

    #[test]
    fn non_finite_request_is_rejected() {
        let mut mirror = MirrorWorld::new();
        let world = world_with_floor(&mut mirror, 0.0);
        let probe = mirror.create_probe(0.6, 1.8).expect("probe");
        let request = MoveRequest {
            feet: DVec3::new(f64::NAN, 0.0, 0.0),
            displacement: DVec3::ZERO,
            dt: DT,
            height: 1.8,
            step_height: 0.6,
            allow_step: true,
        };
        assert!(matches!(
            mirror.move_character(world, &probe, &request),
            Err(MirrorError::NonFinite)
        ));
    }
}
