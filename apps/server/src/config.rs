//! Server configuration.
//!
//! Loads the full core configuration tree from a YAML file, then applies
//! environment variable overrides recognized by the core
//! (`VIGIL_VLM_API_KEY`, `VIGIL_OUTPUT_DIR`).

use std::path::Path;

use anyhow::{Context, Result};
use vigil_core::Config;

/// A preset for the packager mode triple, selectable from the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StreamProfile {
    /// One re-encoded frame per cadence tick: triple `(1, 1, 1)`.
    Image,
    /// Sampled MP4 clips: the configured video triple.
    Video,
}

/// Loads configuration from a YAML file (or defaults), then applies
/// environment overrides.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut config = if let Some(path) = path {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    } else {
        Config::new("127.0.0.1:1234", "./output")
    };

    config.apply_env_overrides();
    Ok(config)
}

/// Applies a CLI stream-type override to the packager triple.
pub fn apply_stream_profile(config: &mut Config, profile: StreamProfile) {
    match profile {
        StreamProfile::Image => {
            config.packager.target_duration_secs = 1;
            config.packager.output_fps = 1;
            config.packager.target_frames_per_video = 1;
        }
        StreamProfile::Video => {
            // Leave the configured triple alone unless it is the image
            // preset, in which case restore the default clip settings.
            if config.packager.is_image_mode() {
                config.packager.target_duration_secs = 3;
                config.packager.output_fps = 1;
                config.packager.target_frames_per_video = 3;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_file() {
        let config = load(None).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn yaml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.yaml");
        std::fs::write(
            &path,
            "port: 9090\ningest:\n  endpoint: \"camera.local:5000\"\n",
        )
        .unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.ingest.endpoint, "camera.local:5000");
    }

    #[test]
    fn image_profile_forces_unit_triple() {
        let mut config = Config::new("x:1", "/tmp/out");
        apply_stream_profile(&mut config, StreamProfile::Image);
        assert!(config.packager.is_image_mode());
    }

    #[test]
    fn video_profile_restores_clip_triple_from_image_preset() {
        let mut config = Config::new("x:1", "/tmp/out");
        apply_stream_profile(&mut config, StreamProfile::Image);
        apply_stream_profile(&mut config, StreamProfile::Video);
        assert!(!config.packager.is_image_mode());
    }
}
