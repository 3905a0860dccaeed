//! Tunables for clustering, Hi-Z and culling
//!
//! Defaults reproduce the classic meshlet setup (64 vertices, 42 primitives,
//! equal score weights). Everything can be overridden from a TOML file.

use crate::error::{EngineError, EngineResult};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hard ceiling imposed by the 10-bit local index packing.
pub const MAX_PACKABLE_VERTICES: u32 = 1024;

/// Meshlet clustering parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Unique vertices per meshlet
    pub max_vertices: u32,
    /// Primitives per meshlet
    pub max_triangles: u32,
    pub reuse_weight: f32,
    pub locality_weight: f32,
    pub orientation_weight: f32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_vertices: 64,
            max_triangles: 42,
            reuse_weight: 1.0 / 3.0,
            locality_weight: 1.0 / 3.0,
            orientation_weight: 1.0 / 3.0,
        }
    }
}

/// Hierarchical depth pyramid parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HiZConfig {
    /// Reduction stops once both dimensions are at or below this size
    pub min_dimension: u32,
}

impl Default for HiZConfig {
    fn default() -> Self {
        Self { min_dimension: 2 }
    }
}

/// Per-frame culling switches
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullingConfig {
    pub enable_occlusion: bool,
    pub enable_cone_culling: bool,
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self {
            enable_occlusion: true,
            enable_cone_culling: true,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshletEngineConfig {
    pub cluster: ClusterConfig,
    pub hiz: HiZConfig,
    pub culling: CullingConfig,
}

impl MeshletEngineConfig {
    /// Parse configuration from a TOML string. Missing keys take defaults.
    pub fn from_toml_str(source: &str) -> EngineResult<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| EngineError::IoError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let config = Self::from_toml_str(&source)?;
        log::info!(
            "[MeshletEngineConfig] Loaded {} (max_vertices={}, max_triangles={})",
            path.display(),
            config.cluster.max_vertices,
            config.cluster.max_triangles
        );
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        self.cluster.validate()?;

        if self.hiz.min_dimension < 2 {
            return Err(anyhow::anyhow!(
                "MeshletEngineConfig: hiz.min_dimension must be greater than 1, got {}",
                self.hiz.min_dimension
            ));
        }

        log::info!(
            "[MeshletEngineConfig] Validation: max_vertices={}, max_triangles={}, hiz_min={}, occlusion={}, cone={}",
            self.cluster.max_vertices,
            self.cluster.max_triangles,
            self.hiz.min_dimension,
            self.culling.enable_occlusion,
            self.culling.enable_cone_culling
        );

        Ok(())
    }
}

impl ClusterConfig {
    /// Validate clustering caps and weights
    pub fn validate(&self) -> Result<()> {
        if self.max_vertices < 3 {
            return Err(anyhow::anyhow!(
                "ClusterConfig: max_vertices must be at least 3, got {}",
                self.max_vertices
            ));
        }

        if self.max_vertices > MAX_PACKABLE_VERTICES {
            return Err(anyhow::anyhow!(
                "ClusterConfig: max_vertices {} exceeds packable maximum of {}",
                self.max_vertices,
                MAX_PACKABLE_VERTICES
            ));
        }

        if self.max_triangles == 0 {
            return Err(anyhow::anyhow!("ClusterConfig: max_triangles cannot be 0"));
        }

        let weights = [
            self.reuse_weight,
            self.locality_weight,
            self.orientation_weight,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(anyhow::anyhow!(
                "ClusterConfig: score weights must be finite and non-negative, got {:?}",
                weights
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = MeshletEngineConfig::default();
        assert_eq!(config.cluster.max_vertices, 64);
        assert_eq!(config.cluster.max_triangles, 42);
        assert_eq!(config.hiz.min_dimension, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = MeshletEngineConfig::from_toml_str(
            r#"
            [cluster]
            max_triangles = 124

            [culling]
            enable_occlusion = false
            "#,
        )
        .expect("partial config should parse");

        assert_eq!(config.cluster.max_triangles, 124);
        assert_eq!(config.cluster.max_vertices, 64);
        assert!(!config.culling.enable_occlusion);
        assert!(config.culling.enable_cone_culling);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[hiz]\nmin_dimension = 4").expect("write config");

        let config = MeshletEngineConfig::load(file.path()).expect("load config");
        assert_eq!(config.hiz.min_dimension, 4);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = MeshletEngineConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(EngineError::IoError { .. })));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = MeshletEngineConfig::default();
        config.cluster.max_vertices = 2048;
        assert!(config.validate().is_err());

        let mut config = MeshletEngineConfig::default();
        config.cluster.max_triangles = 0;
        assert!(config.validate().is_err());

        let mut config = MeshletEngineConfig::default();
        config.cluster.locality_weight = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = MeshletEngineConfig::default();
        config.hiz.min_dimension = 1;
        assert!(config.validate().is_err());
    }
}
