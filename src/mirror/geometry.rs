//! Procedural primitive tessellation
//!
//! Every volumetric primitive kind is turned into a world-space triangle
//! soup with a fixed segment count per kind, so the same primitive always
//! yields the same triangles. Line kinds have no volume and produce nothing.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI, TAU};

use crate::world::Aabb;

pub const SPHERE_SEGMENTS: usize = 12;
pub const CYLINDER_SEGMENTS: usize = 16;
/// Latitude rings per capsule hemisphere
pub const CAPSULE_HEMISPHERE_RINGS: usize = CYLINDER_SEGMENTS / 4;

/// Shape of a procedural primitive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrimitiveShape {
    Cube,
    Sphere,
    Cylinder,
    Capsule,
    Cone,
    Plane,
    Line,
    LineStrip,
    Mesh { vertices: Vec<Vec3>, indices: Vec<u32> },
}

/// Payload-free discriminant, used for signature comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    Cube,
    Sphere,
    Cylinder,
    Capsule,
    Cone,
    Plane,
    Line,
    LineStrip,
    Mesh,
}

impl PrimitiveShape {
    pub fn kind(&self) -> ShapeKind {
        match self {
            PrimitiveShape::Cube => ShapeKind::Cube,
            PrimitiveShape::Sphere => ShapeKind::Sphere,
            PrimitiveShape::Cylinder => ShapeKind::Cylinder,
            PrimitiveShape::Capsule => ShapeKind::Capsule,
            PrimitiveShape::Cone => ShapeKind::Cone,
            PrimitiveShape::Plane => ShapeKind::Plane,
            PrimitiveShape::Line => ShapeKind::Line,
            PrimitiveShape::LineStrip => ShapeKind::LineStrip,
            PrimitiveShape::Mesh { .. } => ShapeKind::Mesh,
        }
    }

    /// Lines and line strips never block anything.
    pub fn has_volume(&self) -> bool {
        !matches!(self, PrimitiveShape::Line | PrimitiveShape::LineStrip)
    }
}

/// A world-space triangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub a: Vec3,
    pub b: Vec3,
    pub c: Vec3,
}

impl Triangle {
    fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self { a, b, c }
    }
}

/// Rigid placement of a primitive; procedural kinds bake `scale` into
/// their dimensions, custom meshes scale each vertex first.
#[derive(Debug, Clone, Copy)]
struct Placement {
    position: Vec3,
    rotation: Quat,
}

impl Placement {
    fn apply(&self, local: Vec3) -> Vec3 {
        self.position + self.rotation * local
    }
}

/// Tessellate a primitive into world-space triangles.
pub fn generate_mesh(
    shape: &PrimitiveShape,
    position: Vec3,
    rotation: Quat,
    scale: Vec3,
) -> Vec<Triangle> {
    let place = Placement {
        position,
        rotation: rotation.normalize(),
    };
    let mut out = Vec::new();

    match shape {
        PrimitiveShape::Cube => cube(&mut out, &place, scale),
        PrimitiveShape::Sphere => sphere(&mut out, &place, scale),
        PrimitiveShape::Cylinder => cylinder(&mut out, &place, scale),
        PrimitiveShape::Capsule => capsule(&mut out, &place, scale),
        PrimitiveShape::Cone => cone(&mut out, &place, scale),
        PrimitiveShape::Plane => plane(&mut out, &place, scale),
        PrimitiveShape::Mesh { vertices, indices } => {
            custom_mesh(&mut out, &place, scale, vertices, indices)
        }
        PrimitiveShape::Line | PrimitiveShape::LineStrip => {}
    }

    out
}

/// World-space bounds of a primitive, or `None` for shapes without volume
/// or a custom mesh with no usable triangles.
pub fn world_bounds(
    shape: &PrimitiveShape,
    position: Vec3,
    rotation: Quat,
    scale: Vec3,
) -> Option<Aabb> {
    if !shape.has_volume() {
        return None;
    }
    let triangles = generate_mesh(shape, position, rotation, scale);
    Aabb::from_points(
        triangles
            .iter()
            .flat_map(|t| [t.a, t.b, t.c])
            .map(|v| v.as_dvec3()),
    )
}

fn cube(out: &mut Vec<Triangle>, place: &Placement, scale: Vec3) {
    let h = scale * 0.5;
    let corners = [
        Vec3::new(-h.x, -h.y, -h.z),
        Vec3::new(h.x, -h.y, -h.z),
        Vec3::new(h.x, h.y, -h.z),
        Vec3::new(-h.x, h.y, -h.z),
        Vec3::new(-h.x, -h.y, h.z),
        Vec3::new(h.x, -h.y, h.z),
        Vec3::new(h.x, h.y, h.z),
        Vec3::new(-h.x, h.y, h.z),
    ]
    .map(|c| place.apply(c));

    const FACES: [[usize; 4]; 6] = [
        [0, 1, 2, 3],
        [5, 4, 7, 6],
        [1, 5, 6, 2],
        [4, 0, 3, 7],
        [3, 2, 6, 7],
        [4, 5, 1, 0],
    ];
    for f in FACES {
        out.push(Triangle::new(corners[f[0]], corners[f[1]], corners[f[2]]));
        out.push(Triangle::new(corners[f[0]], corners[f[2]], corners[f[3]]));
    }
}

fn sphere(out: &mut Vec<Triangle>, place: &Placement, scale: Vec3) {
    let radius = scale.max_element() * 0.5;
    let rings = SPHERE_SEGMENTS / 2;
    let segments = SPHERE_SEGMENTS;

    let grid: Vec<Vec<Vec3>> = (0..=rings)
        .map(|r| {
            let phi = PI * r as f32 / rings as f32;
            let y = phi.cos() * radius;
            let ring_radius = phi.sin() * radius;
            (0..segments)
                .map(|s| {
                    let theta = TAU * s as f32 / segments as f32;
                    place.apply(Vec3::new(
                        theta.cos() * ring_radius,
                        y,
                        theta.sin() * ring_radius,
                    ))
                })
                .collect()
        })
        .collect();

    // Pole rows collapse to a point, so each emits only one triangle per quad.
    for r in 0..rings {
        for s in 0..segments {
            let next = (s + 1) % segments;
            let p0 = grid[r][s];
            let p1 = grid[r][next];
            let p2 = grid[r + 1][next];
            let p3 = grid[r + 1][s];
            if r > 0 {
                out.push(Triangle::new(p0, p1, p2));
            }
            if r < rings - 1 {
                out.push(Triangle::new(p0, p2, p3));
            }
        }
    }
}

/// Point on a horizontal circle of `radius` at height `y`.
fn rim(segment: usize, radius: f32, y: f32) -> Vec3 {
    let angle = TAU * (segment % CYLINDER_SEGMENTS) as f32 / CYLINDER_SEGMENTS as f32;
    Vec3::new(angle.cos() * radius, y, angle.sin() * radius)
}

fn cylinder(out: &mut Vec<Triangle>, place: &Placement, scale: Vec3) {
    let radius = scale.x.max(scale.z) * 0.5;
    let hh = scale.y * 0.5;
    let top_center = place.apply(Vec3::new(0.0, hh, 0.0));
    let bottom_center = place.apply(Vec3::new(0.0, -hh, 0.0));

    for i in 0..CYLINDER_SEGMENTS {
        let t1 = place.apply(rim(i, radius, hh));
        let b1 = place.apply(rim(i, radius, -hh));
        let t2 = place.apply(rim(i + 1, radius, hh));
        let b2 = place.apply(rim(i + 1, radius, -hh));

        out.push(Triangle::new(top_center, t2, t1));
        out.push(Triangle::new(bottom_center, b1, b2));
        out.push(Triangle::new(t1, b1, b2));
        out.push(Triangle::new(t1, b2, t2));
    }
}

fn capsule(out: &mut Vec<Triangle>, place: &Placement, scale: Vec3) {
    let radius = scale.x.max(scale.z) * 0.5;
    let hh = (scale.y * 0.5 - radius).max(0.0);

    for i in 0..CYLINDER_SEGMENTS {
        let t1 = place.apply(rim(i, radius, hh));
        let t2 = place.apply(rim(i + 1, radius, hh));
        let b1 = place.apply(rim(i, radius, -hh));
        let b2 = place.apply(rim(i + 1, radius, -hh));
        out.push(Triangle::new(t1, b1, b2));
        out.push(Triangle::new(t1, b2, t2));
    }

    hemisphere(out, place, radius, hh, true);
    hemisphere(out, place, radius, -hh, false);
}

fn hemisphere(out: &mut Vec<Triangle>, place: &Placement, radius: f32, y_offset: f32, top: bool) {
    let sign = if top { 1.0 } else { -1.0 };
    let rings = CAPSULE_HEMISPHERE_RINGS;

    for r in 0..rings {
        let phi1 = FRAC_PI_2 * r as f32 / rings as f32;
        let phi2 = FRAC_PI_2 * (r + 1) as f32 / rings as f32;
        let y1 = y_offset + sign * phi1.sin() * radius;
        let y2 = y_offset + sign * phi2.sin() * radius;
        let r1 = phi1.cos() * radius;
        let r2 = phi2.cos() * radius;

        for s in 0..CYLINDER_SEGMENTS {
            let p0 = place.apply(rim(s, r1, y1));
            let p1 = place.apply(rim(s + 1, r1, y1));
            let p2 = place.apply(rim(s + 1, r2, y2));
            let p3 = place.apply(rim(s, r2, y2));
            if top {
                out.push(Triangle::new(p0, p1, p2));
                out.push(Triangle::new(p0, p2, p3));
            } else {
                out.push(Triangle::new(p0, p2, p1));
                out.push(Triangle::new(p0, p3, p2));
            }
        }
    }
}

fn cone(out: &mut Vec<Triangle>, place: &Placement, scale: Vec3) {
    let radius = scale.x.max(scale.z) * 0.5;
    let apex = place.apply(Vec3::new(0.0, scale.y, 0.0));
    let center = place.apply(Vec3::ZERO);

    for i in 0..CYLINDER_SEGMENTS {
        let p1 = place.apply(rim(i, radius, 0.0));
        let p2 = place.apply(rim(i + 1, radius, 0.0));
        out.push(Triangle::new(apex, p2, p1));
        out.push(Triangle::new(center, p1, p2));
    }
}

/// Double-sided so it collides from above and below.
fn plane(out: &mut Vec<Triangle>, place: &Placement, scale: Vec3) {
    let hx = scale.x * 0.5;
    let hz = scale.z * 0.5;
    let p0 = place.apply(Vec3::new(-hx, 0.0, -hz));
    let p1 = place.apply(Vec3::new(hx, 0.0, -hz));
    let p2 = place.apply(Vec3::new(hx, 0.0, hz));
    let p3 = place.apply(Vec3::new(-hx, 0.0, hz));

    out.push(Triangle::new(p0, p1, p2));
    out.push(Triangle::new(p0, p2, p3));
    out.push(Triangle::new(p2, p1, p0));
    out.push(Triangle::new(p3, p2, p0));
}

fn custom_mesh(
    out: &mut Vec<Triangle>,
    place: &Placement,
    scale: Vec3,
    vertices: &[Vec3],
    indices: &[u32],
) {
    if vertices.is_empty() {
        return;
    }
    let vertex = |i: u32| vertices.get(i as usize).map(|v| place.apply(*v * scale));

    for tri in indices.chunks_exact(3) {
        // Out-of-range indices drop only the affected triangle.
        if let (Some(a), Some(b), Some(c)) = (vertex(tri[0]), vertex(tri[1]), vertex(tri[2])) {
            out.push(Triangle::new(a, b, c));
        }
    }
}

/// Converts a triangle soup into shared vertex/index buffers for mesh
/// colliders, offset so that `origin` becomes the local origin.
pub fn to_buffers(triangles: &[Triangle], origin: Vec3) -> (Vec<Vec3>, Vec<[u32; 3]>) {
    let mut vertices = Vec::with_capacity(triangles.len() * 3);
    let mut indices = Vec::with_capacity(triangles.len());
    for t in triangles {
        let base = vertices.len() as u32;
        vertices.extend([t.a - origin, t.b - origin, t.c - origin]);
        indices.push([base, base + 1, base + 2]);
    }
    (vertices, indices)
}
