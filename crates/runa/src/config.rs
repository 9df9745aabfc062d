//! Scene configuration.
//!
//! Defaults work out of the box; a game can override them in code with the
//! builder methods or ship a JSON file:
//!
//! ```json
//! {
//!   "name": "level_1",
//!   "fixed_timestep_ms": 20,
//!   "entity_dir": "assets/entities",
//!   "max_fixed_steps_per_frame": 5,
//!   "frame_limit": 60
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub name: String,
    /// Step of every `fixed_update`, in milliseconds on disk.
    #[serde(rename = "fixed_timestep_ms", with = "millis")]
    pub fixed_timestep: Duration,
    /// Directory entity documents are saved to and loaded from.
    pub entity_dir: PathBuf,
    /// Upper bound on fixed steps run in a single frame.
    pub max_fixed_steps_per_frame: u32,
    /// Frames per second [`Scene::run`](crate::scene::Scene::run) sleeps
    /// down to. `None` runs unthrottled.
    pub frame_limit: Option<u32>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            name: "scene".to_string(),
            fixed_timestep: Duration::from_secs_f64(1.0 / 60.0),
            entity_dir: PathBuf::from("resources/entities"),
            max_fixed_steps_per_frame: 8,
            frame_limit: None,
        }
    }
}

impl SceneConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_fixed_timestep(mut self, step: Duration) -> Self {
        self.fixed_timestep = step;
        self
    }

    pub fn with_entity_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.entity_dir = dir.into();
        self
    }

    pub fn with_max_fixed_steps(mut self, steps: u32) -> Self {
        self.max_fixed_steps_per_frame = steps;
        self
    }

    pub fn with_frame_limit(mut self, fps: u32) -> Self {
        self.frame_limit = Some(fps);
        self
    }

    /// Reads and validates a JSON config file. Missing fields keep their
    /// defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fixed_timestep.is_zero() {
            return Err(ConfigError::Invalid("fixed_timestep_ms must be positive".into()));
        }
        if self.max_fixed_steps_per_frame == 0 {
            return Err(ConfigError::Invalid(
                "max_fixed_steps_per_frame must be at least 1".into(),
            ));
        }
        if self.frame_limit == Some(0) {
            return Err(ConfigError::Invalid("frame_limit must be positive".into()));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(deserializer)?;
        if !ms.is_finite() || ms < 0.0 {
            return Err(serde::de::Error::custom("fixed_timestep_ms must be a non-negative number"));
        }
        Ok(Duration::from_secs_f64(ms / 1000.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("runa_config_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn defaults() {
        let config = SceneConfig::default();
        assert_eq!(config.entity_dir, PathBuf::from("resources/entities"));
        assert_eq!(config.max_fixed_steps_per_frame, 8);
        assert!((config.fixed_timestep.as_secs_f64() - 1.0 / 60.0).abs() < 1e-9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let path = temp_path("partial.json");
        std::fs::write(&path, r#"{ "name": "level_1", "fixed_timestep_ms": 20 }"#).unwrap();
        let config = SceneConfig::from_json_file(&path).unwrap();
        assert_eq!(config.name, "level_1");
        assert_eq!(config.fixed_timestep, Duration::from_millis(20));
        assert_eq!(config.max_fixed_steps_per_frame, 8);
        assert_eq!(config.frame_limit, None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let path = temp_path("invalid.json");
        std::fs::write(&path, r#"{ "max_fixed_steps_per_frame": 0 }"#).unwrap();
        assert!(matches!(
            SceneConfig::from_json_file(&path),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            SceneConfig::from_json_file(&path),
            Err(ConfigError::Json { .. })
        ));

        assert!(matches!(
            SceneConfig::from_json_file(temp_path("missing.json")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn builder() {
        let config = SceneConfig::new("demo")
            .with_fixed_timestep(Duration::from_millis(5))
            .with_max_fixed_steps(2)
            .with_frame_limit(30)
            .with_entity_dir("saves");
        assert_eq!(config.name, "demo");
        assert_eq!(config.frame_limit, Some(30));
        assert_eq!(config.entity_dir, PathBuf::from("saves"));
    }
}
