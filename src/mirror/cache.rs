//! Signature-keyed mirror cache
//!
//! One cache per mirror flavor (model, chunk, primitive). A body is rebuilt
//! exactly when the owning world or the content signature changes; pure
//! translation of an unchanged shape is handled by the caller in place.

use glam::{Quat, Vec3};
use std::collections::HashMap;
use std::hash::Hash;

use super::geometry::{PrimitiveShape, ShapeKind};
use crate::world::WorldId;

/// Quaternions closer than this (by |dot|) are the same rotation.
pub const ROTATION_DOT_THRESHOLD: f32 = 0.999_999;
pub const SCALE_EPSILON: f32 = 1.0e-6;

pub fn rotation_matches(a: Quat, b: Quat) -> bool {
    a.dot(b).abs() >= ROTATION_DOT_THRESHOLD
}

pub fn scale_matches(a: Vec3, b: Vec3) -> bool {
    (a - b).abs().max_element() <= SCALE_EPSILON
}

/// Content fingerprint deciding whether a mirrored body can be reused
pub trait Signature {
    fn matches(&self, other: &Self) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSignature {
    pub geometry_path: String,
    pub scale: Vec3,
}

impl Signature for ModelSignature {
    fn matches(&self, other: &Self) -> bool {
        self.geometry_path == other.geometry_path && scale_matches(self.scale, other.scale)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSignature {
    pub hash: u64,
}

impl ChunkSignature {
    pub fn of(vertices: &[f32], indices: &[u32]) -> Self {
        Self {
            hash: sampled_hash(vertices, indices),
        }
    }
}

impl Signature for ChunkSignature {
    fn matches(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveSignature {
    pub kind: ShapeKind,
    pub rotation: Quat,
    pub scale: Vec3,
    pub content_hash: u64,
}

impl PrimitiveSignature {
    pub fn of(shape: &PrimitiveShape, rotation: Quat, scale: Vec3) -> Self {
        let content_hash = match shape {
            PrimitiveShape::Mesh { vertices, indices } => custom_mesh_hash(vertices, indices),
            _ => 0,
        };
        Self {
            kind: shape.kind(),
            rotation,
            scale,
            content_hash,
        }
    }
}

impl Signature for PrimitiveSignature {
    fn matches(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.content_hash == other.content_hash
            && rotation_matches(self.rotation, other.rotation)
            && scale_matches(self.scale, other.scale)
    }
}

fn mix(h: u64, v: u64) -> u64 {
    h.wrapping_mul(31).wrapping_add(v)
}

/// Cheap content hash over buffer lengths and the first, middle and last
/// entries of each buffer. Chunk edits that keep all sampled entries and
/// lengths equal will not trigger a rebuild.
pub fn sampled_hash(vertices: &[f32], indices: &[u32]) -> u64 {
    let mut h = 17u64;
    h = mix(h, vertices.len() as u64);
    h = mix(h, indices.len() as u64);
    for i in sample_points(vertices.len()) {
        h = mix(h, vertices[i].to_bits() as u64);
    }
    for i in sample_points(indices.len()) {
        h = mix(h, indices[i] as u64);
    }
    h
}

fn sample_points(len: usize) -> impl Iterator<Item = usize> {
    let points = if len == 0 { vec![] } else { vec![0, len / 2, len - 1] };
    points.into_iter()
}

/// Full hash over custom primitive mesh data.
pub fn custom_mesh_hash(vertices: &[Vec3], indices: &[u32]) -> u64 {
    let mut h = 17u64;
    h = mix(h, vertices.len() as u64);
    h = mix(h, indices.len() as u64);
    for v in vertices {
        h = mix(h, v.x.to_bits() as u64);
        h = mix(h, v.y.to_bits() as u64);
        h = mix(h, v.z.to_bits() as u64);
    }
    for i in indices {
        h = mix(h, *i as u64);
    }
    h
}

/// Storage that owns the mirrored bodies a cache refers to
pub trait BodyStore<B> {
    fn destroy(&mut self, world: WorldId, body: B);
}

#[derive(Debug, Clone)]
pub struct MirrorEntry<S, B> {
    pub world: WorldId,
    pub signature: S,
    pub body: B,
    /// Sync stamp of the last pass that observed this entry
    pub last_seen: u64,
}

/// Outcome of [`MirrorCache::get_or_rebuild`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted<B> {
    pub body: B,
    pub rebuilt: bool,
}

pub struct MirrorCache<K, S, B> {
    entries: HashMap<K, MirrorEntry<S, B>>,
    rebuilds: u64,
    removals: u64,
}

impl<K, S, B> MirrorCache<K, S, B>
where
    K: Hash + Eq + Clone,
    S: Signature,
    B: Copy,
{
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            rebuilds: 0,
            removals: 0,
        }
    }

    /// Return the existing body when world and signature still match,
    /// otherwise destroy it and build a new one. A builder returning
    /// `Ok(None)` leaves no entry behind.
    pub fn get_or_rebuild<St, E, F>(
        &mut self,
        store: &mut St,
        key: K,
        world: WorldId,
        signature: S,
        stamp: u64,
        build: F,
    ) -> Result<Option<Upserted<B>>, E>
    where
        St: BodyStore<B>,
        F: FnOnce(&mut St, &S) -> Result<Option<B>, E>,
    {
        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.world == world && entry.signature.matches(&signature) {
                entry.last_seen = stamp;
                return Ok(Some(Upserted {
                    body: entry.body,
                    rebuilt: false,
                }));
            }
        }

        self.remove(store, &key);

        let Some(body) = build(store, &signature)? else {
            return Ok(None);
        };
        self.rebuilds += 1;
        self.entries.insert(
            key,
            MirrorEntry {
                world,
                signature,
                body,
                last_seen: stamp,
            },
        );
        Ok(Some(Upserted {
            body,
            rebuilt: true,
        }))
    }

    pub fn remove<St: BodyStore<B>>(&mut self, store: &mut St, key: &K) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                store.destroy(entry.world, entry.body);
                self.removals += 1;
                true
            }
            None => false,
        }
    }

    /// Drop every entry of `world` not observed at `stamp`.
    pub fn prune_unseen<St: BodyStore<B>>(&mut self, store: &mut St, world: WorldId, stamp: u64) -> usize {
        self.remove_where(store, |e| e.world == world && e.last_seen != stamp)
    }

    /// Drop every entry owned by `world`.
    pub fn remove_world<St: BodyStore<B>>(&mut self, store: &mut St, world: WorldId) -> usize {
        self.remove_where(store, |e| e.world == world)
    }

    fn remove_where<St, P>(&mut self, store: &mut St, pred: P) -> usize
    where
        St: BodyStore<B>,
        P: Fn(&MirrorEntry<S, B>) -> bool,
    {
        let stale: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| pred(e))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            self.remove(store, key);
        }
        stale.len()
    }

    pub fn get(&self, key: &K) -> Option<&MirrorEntry<S, B>> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn removals(&self) -> u64 {
        self.removals
    }
}

impl<K, S, B> Default for MirrorCache<K, S, B>
where
    K: Hash + Eq + Clone,
    S: Signature,
    B: Copy,
{
    fn default() -> Self {
        Self::new()
    }
}
