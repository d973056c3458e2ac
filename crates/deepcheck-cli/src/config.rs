use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use deepcheck_core::client::validate_endpoint;
use deepcheck_core::source::DEFAULT_MAX_UPLOAD_BYTES;
use deepcheck_core::{ProgressSchedule, ProgressStep, WorkflowSettings};
use serde::{Deserialize, Serialize};

/// One synthetic progress step as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressStepConfig {
    pub after_ms: u64,
    pub percent: u8,
}

/// CLI configuration: defaults, then the TOML file named by
/// `DEEPCHECK_CONFIG`, then `DEEPCHECK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Analysis service URL (default: http://localhost:8000/api/analyze/).
    pub endpoint: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Frames discarded after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Largest image accepted for submission, in bytes.
    pub max_upload_bytes: usize,
    /// Synthetic progress schedule. File only.
    pub progress: Vec<ProgressStepConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/api/analyze/".to_string(),
            request_timeout_secs: 30,
            camera_device: "/dev/video0".to_string(),
            capture_width: 1280,
            capture_height: 720,
            warmup_frames: 4,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            progress: ProgressSchedule::default()
                .steps()
                .iter()
                .map(|s| ProgressStepConfig {
                    after_ms: s.after.as_millis() as u64,
                    percent: s.percent,
                })
                .collect(),
        }
    }
}

impl Config {
    /// Load from the process environment and the optional config file.
    pub fn load() -> Result<Self> {
        let file = match std::env::var("DEEPCHECK_CONFIG") {
            Ok(path) => Some(
                std::fs::read_to_string(Path::new(&path))
                    .with_context(|| format!("reading config file {path}"))?,
            ),
            Err(_) => None,
        };
        Self::layered(file.as_deref(), |key| std::env::var(key).ok())
    }

    /// Layer `env` over the TOML text `file` over the defaults, then validate.
    pub fn layered(file: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base = match file {
            Some(text) => toml::from_str::<Config>(text).context("parsing config file")?,
            None => Config::default(),
        };

        let config = Self {
            endpoint: env("DEEPCHECK_ENDPOINT").unwrap_or(base.endpoint),
            request_timeout_secs: env_parse(
                &env,
                "DEEPCHECK_REQUEST_TIMEOUT_SECS",
                base.request_timeout_secs,
            ),
            camera_device: env("DEEPCHECK_CAMERA_DEVICE").unwrap_or(base.camera_device),
            capture_width: env_parse(&env, "DEEPCHECK_CAPTURE_WIDTH", base.capture_width),
            capture_height: env_parse(&env, "DEEPCHECK_CAPTURE_HEIGHT", base.capture_height),
            warmup_frames: env_parse(&env, "DEEPCHECK_WARMUP_FRAMES", base.warmup_frames),
            max_upload_bytes: env_parse(&env, "DEEPCHECK_MAX_UPLOAD_BYTES", base.max_upload_bytes),
            progress: base.progress,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        validate_endpoint(&self.endpoint)?;
        self.progress_schedule()?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn progress_schedule(&self) -> Result<ProgressSchedule> {
        let steps = self
            .progress
            .iter()
            .map(|s| ProgressStep::at_millis(s.after_ms, s.percent))
            .collect();
        ProgressSchedule::new(steps).context("invalid progress schedule")
    }

    pub fn workflow_settings(&self) -> Result<WorkflowSettings> {
        Ok(WorkflowSettings {
            max_upload_bytes: self.max_upload_bytes,
            progress: self.progress_schedule()?,
        })
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing config")
    }
}

/// Unparseable values fall back to `default`.
fn env_parse<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    env(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::layered(None, no_env).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.endpoint, "http://localhost:8000/api/analyze/");
        assert_eq!(config.max_upload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.progress_schedule().unwrap(), ProgressSchedule::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = r#"
            endpoint = "https://detector.example.org/api/analyze/"
            warmup_frames = 8

            [[progress]]
            after_ms = 50
            percent = 20
        "#;
        let config = Config::layered(Some(file), no_env).unwrap();
        assert_eq!(config.endpoint, "https://detector.example.org/api/analyze/");
        assert_eq!(config.warmup_frames, 8);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.progress_schedule().unwrap().steps(), &[ProgressStep::at_millis(50, 20)]);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = r#"camera_device = "/dev/video2""#;
        let env = env_of(&[
            ("DEEPCHECK_CAMERA_DEVICE", "/dev/video4"),
            ("DEEPCHECK_REQUEST_TIMEOUT_SECS", "5"),
        ]);
        let config = Config::layered(Some(file), env).unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_unparseable_env_keeps_lower_layer() {
        let env = env_of(&[("DEEPCHECK_WARMUP_FRAMES", "lots")]);
        assert_eq!(Config::layered(None, env).unwrap().warmup_frames, 4);
    }

    #[test]
    fn test_bad_endpoint_is_rejected() {
        let env = env_of(&[("DEEPCHECK_ENDPOINT", "ftp://example.org/")]);
        assert!(Config::layered(None, env).is_err());
        let env = env_of(&[("DEEPCHECK_ENDPOINT", "not a url")]);
        assert!(Config::layered(None, env).is_err());
    }

    #[test]
    fn test_bad_progress_schedule_is_rejected() {
        let file = r#"
            [[progress]]
            after_ms = 100
            percent = 100
        "#;
        assert!(Config::layered(Some(file), no_env).is_err());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(Config::layered(Some("similarity = 0.4"), no_env).is_err());
    }

    #[test]
    fn test_toml_output_parses_back() {
        let config = Config::default();
        let text = config.to_toml().unwrap();
        assert_eq!(Config::layered(Some(&text), no_env).unwrap(), config);
    }
}
