//! Meshlet arena
//!
//! One owner for every array derived from a source mesh. Meshes are addressed
//! by [`MeshId`]; removing a mesh drops all of its derived data at once.

use super::build_operations::build_meshlets;
use super::meshlet_data::MeshletMesh;
use crate::config::ClusterConfig;
use crate::error::{EngineError, EngineResult, OptionExt};
use crate::geometry::MeshData;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

#[derive(Debug, Default)]
pub struct MeshletStore {
    meshes: FxHashMap<MeshId, MeshletMesh>,
    next_id: u32,
}

/// Thread-safe shared store (Arc<RwLock<>>)
pub type SharedMeshletStore = Arc<RwLock<MeshletStore>>;

pub fn create_shared_store() -> SharedMeshletStore {
    Arc::new(RwLock::new(MeshletStore::default()))
}

impl MeshletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an already built mesh
    pub fn insert(&mut self, mesh: MeshletMesh) -> MeshId {
        let id = MeshId(self.next_id);
        self.next_id += 1;
        self.meshes.insert(id, mesh);
        id
    }

    /// Build meshlets for `mesh` and store them
    pub fn build(&mut self, mesh: &MeshData, config: &ClusterConfig) -> EngineResult<MeshId> {
        let built = build_meshlets(mesh, config)?;
        Ok(self.insert(built))
    }

    pub fn get(&self, id: MeshId) -> EngineResult<&MeshletMesh> {
        self.meshes.get(&id).ok_or_engine(|| EngineError::ResourceNotFound {
            resource_type: "meshlet mesh".to_string(),
            id: id.0.to_string(),
        })
    }

    pub fn remove(&mut self, id: MeshId) -> Option<MeshletMesh> {
        self.meshes.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Ids in insertion order
    pub fn ids(&self) -> Vec<MeshId> {
        let mut ids: Vec<MeshId> = self.meshes.keys().copied().collect();
        ids.sort();
        ids
    }
}
