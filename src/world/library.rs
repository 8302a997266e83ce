//! Model geometry library
//!
//! Geometry is loaded elsewhere and registered here by path. Mirror builders
//! treat a path as a stable identifier for its vertex/index data.

use dashmap::DashMap;
use glam::Vec3;
use std::sync::Arc;
use tracing::debug;

/// Indexed triangle geometry in model-local space
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Axis-aligned bounds of the raw vertices
    pub fn local_bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.vertices.first()?;
        Some(
            self.vertices
                .iter()
                .fold((first, first), |(min, max), v| (min.min(*v), max.max(*v))),
        )
    }
}

/// Registry of loaded model geometry keyed by asset path
pub struct ModelLibrary {
    meshes: DashMap<String, Arc<MeshData>>,
}

impl ModelLibrary {
    pub fn new() -> Self {
        Self {
            meshes: DashMap::new(),
        }
    }

    pub fn register(&self, path: impl Into<String>, mesh: MeshData) -> Arc<MeshData> {
        let path = path.into();
        let mesh = Arc::new(mesh);
        debug!(path = %path, triangles = mesh.triangle_count(), "Registered model geometry");
        self.meshes.insert(path, mesh.clone());
        mesh
    }

    pub fn get(&self, path: &str) -> Option<Arc<MeshData>> {
        self.meshes.get(path).map(|m| m.value().clone())
    }
}

impl Default for ModelLibrary {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup_by_path() {
        let library = ModelLibrary::new();
        library.register(
            "models/crate.obj",
            MeshData::new(vec![Vec3::ZERO, Vec3::X, Vec3::Z], vec![0, 1, 2]),
        );

        let mesh = library.get("models/crate.obj").expect("registered");
        assert_eq!(mesh.triangle_count(), 1);
        assert!(library.get("models/missing.obj").is_none());

        let (min, max) = mesh.local_bounds().expect("bounds");
        assert_eq!(min, Vec3::ZERO);
        assert_eq!(max, Vec3::new(1.0, 0.0, 1.0));
    }
}
