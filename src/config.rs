//! Run configuration, loaded from JSON.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```json
//! { "speed": { "meters_per_pixel": 0.03 }, "tracker": { "max_age": 45 } }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::annotate::AnnotationConfig;
use crate::error::{Error, Result};
use crate::integration::DetectorConfig;
use crate::kinematics::SpeedConfig;
use crate::tracker::TrackerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detector: DetectorConfig,
    pub tracker: TrackerConfig,
    pub speed: SpeedConfig,
    pub annotation: AnnotationConfig,
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| Error::input(path, e))?;
        let config = Self::from_json(&json)?;
        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = PipelineConfig::from_json(
            r#"{ "speed": { "meters_per_pixel": 0.03 }, "tracker": { "max_age": 45 } }"#,
        )
        .unwrap();
        assert_eq!(config.speed.meters_per_pixel, 0.03);
        assert_eq!(config.tracker.max_age, 45);
        assert_eq!(config.tracker.track_thresh, 0.5);
        assert_eq!(config.annotation.hazard_label, "accident");
        assert_eq!(config.detector.conf_threshold, 0.25);
    }

    #[test]
    fn defaults_survive_a_json_round_trip() {
        let json = PipelineConfig::default().to_json().unwrap();
        let back = PipelineConfig::from_json(&json).unwrap();
        assert_eq!(back.speed.meters_per_pixel, 0.05);
        assert_eq!(back.annotation.thickness, 2);
        assert!(back.annotation.font_path.is_none());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(PipelineConfig::from_json("{ nope"), Err(Error::Config(_))));
    }
}
