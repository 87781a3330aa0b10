use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

pub use config_model::EndpointConfig;

use crate::indexer::{BoundaryPolicy, InteractionMode};
use crate::processing::downscale::{DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DIMENSION};
use crate::selection::DEFAULT_NEUTRAL_TOLERANCE;

/// Placeholder target the upstream expects when the user names none.
pub const DEFAULT_TARGET: &str = "abc";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Where the generation service (or a relay in front of it) lives.
    pub endpoint: EndpointConfig,
    pub upload: UploadOptions,
    pub generate: GenerateOptions,
    pub selection: SelectionOptions,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct UploadOptions {
    /// Longer side cap applied before transmission.
    pub max_dimension: u32,
    /// Lossy re-encode quality in `(0, 1]`.
    pub jpeg_quality: f32,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Multipart field carrying the image.
    pub field_name: String,
    pub file_name: String,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            timeout: Duration::from_secs(30),
            field_name: "file".to_string(),
            file_name: "upload.jpg".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct GenerateOptions {
    pub default_target: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            default_target: DEFAULT_TARGET.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModeKind {
    #[default]
    Drag,
    Orbit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SelectionOptions {
    pub mode: ModeKind,
    /// Treatment of drag samples outside the unit disk.
    pub boundary: BoundaryPolicy,
    pub neutral_tolerance: f64,
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            mode: ModeKind::Drag,
            boundary: BoundaryPolicy::Reject,
            neutral_tolerance: DEFAULT_NEUTRAL_TOLERANCE,
        }
    }
}

impl SelectionOptions {
    pub fn interaction_mode(&self) -> InteractionMode {
        match self.mode {
            ModeKind::Drag => InteractionMode::drag(self.boundary),
            ModeKind::Orbit => InteractionMode::orbit(),
        }
    }
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        serde_yaml::from_str(&s)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        self.endpoint
            .validate()
            .context("invalid endpoint configuration")?;
        ensure!(
            self.upload.max_dimension > 0,
            "upload.max-dimension must be greater than zero"
        );
        ensure!(
            self.upload.jpeg_quality > 0.0 && self.upload.jpeg_quality <= 1.0,
            "upload.jpeg-quality must be in (0, 1]"
        );
        ensure!(
            !self.upload.timeout.is_zero(),
            "upload.timeout must be greater than zero"
        );
        ensure!(
            !self.upload.field_name.trim().is_empty(),
            "upload.field-name must not be empty"
        );
        ensure!(
            !self.generate.default_target.trim().is_empty(),
            "generate.default-target must not be empty"
        );
        ensure!(
            !self.generate.timeout.is_zero(),
            "generate.timeout must be greater than zero"
        );
        ensure!(
            self.selection.neutral_tolerance.is_finite() && self.selection.neutral_tolerance >= 0.0,
            "selection.neutral-tolerance must be a non-negative number"
        );
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: Configuration = serde_yaml::from_str("{}").expect("parse config");
        let cfg = cfg.validated().expect("defaults are valid");
        assert_eq!(cfg.upload.max_dimension, 1200);
        assert!((cfg.upload.jpeg_quality - 0.8).abs() < f32::EPSILON);
        assert_eq!(cfg.upload.timeout, Duration::from_secs(30));
        assert_eq!(cfg.upload.field_name, "file");
        assert_eq!(cfg.generate.default_target, "abc");
        assert_eq!(
            cfg.selection.interaction_mode(),
            InteractionMode::drag(BoundaryPolicy::Reject)
        );
    }

    #[test]
    fn orbit_mode_ignores_boundary() {
        let cfg: Configuration = serde_yaml::from_str(
            r#"
selection:
  mode: orbit
  boundary: clamp
"#,
        )
        .expect("parse config");
        assert_eq!(cfg.selection.interaction_mode(), InteractionMode::orbit());
    }
}
