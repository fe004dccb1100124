//! Scene configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SceneError, SceneResult};

/// Tolerances and worker settings used by the scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Points closer than this are the same point (path closure detection)
    pub same_point_tolerance: f64,
    /// Tolerance for dimensionality checks and flattening
    pub coincidence_tolerance: f64,
    /// How far a revolution axis origin is moved back along its direction
    pub revolve_axis_offset: f64,
    /// Number of threads running kernel builds
    pub worker_threads: usize,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            same_point_tolerance: 0.001,
            coincidence_tolerance: 0.001,
            revolve_axis_offset: 1.0,
            worker_threads: 2,
        }
    }
}

impl SceneConfig {
    /// Parse a RON document. Missing fields take their defaults.
    pub fn from_ron(content: &str) -> SceneResult<Self> {
        ron::from_str(content).map_err(|e| SceneError::Config(e.to_string()))
    }

    pub fn to_ron(&self) -> SceneResult<String> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| SceneError::Config(e.to_string()))
    }

    /// Load configuration from a file
    pub fn load(path: impl AsRef<Path>) -> SceneResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SceneError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_ron(&content)?;
        tracing::debug!("Loaded scene config from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: impl AsRef<Path>) -> SceneResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_ron()?)
            .map_err(|e| SceneError::Config(format!("{}: {}", path.display(), e)))
    }
}
