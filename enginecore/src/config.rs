//! Pipeline configuration with type-safe validation.
//!
//! `PipelineConfig` is handed to `initialize` and passed through to the
//! install/build pipeline. The coordinator itself only reads the marker
//! location; everything else belongs to the pipeline.

use std::path::{Path, PathBuf};

use nutype::nutype;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Default name of the install marker artifact.
pub const DEFAULT_MARKER_FILE: &str = "install.lock";

/// File name of the install marker artifact.
///
/// Trimmed, non-empty, at most 255 characters, and a bare file name: no
/// path separators and no parent references.
#[nutype(
    sanitize(trim),
    validate(
        not_empty,
        len_char_max = 255,
        predicate = |name: &str| !name.contains(['/', '\\']) && name != "." && name != ".."
    ),
    derive(Debug, Clone, PartialEq, Eq, Hash, AsRef, Display, Serialize, Deserialize)
)]
pub struct MarkerFileName(String);

/// Configuration for one initialization of the engine runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPipelineConfig")]
pub struct PipelineConfig {
    install_dir: PathBuf,
    marker_file: MarkerFileName,
    cache_dir: Option<PathBuf>,
    engine_args: Vec<String>,
}

impl PipelineConfig {
    /// Starts building a configuration rooted at `install_dir`.
    pub fn builder(install_dir: impl Into<PathBuf>) -> PipelineConfigBuilder {
        PipelineConfigBuilder::new(install_dir)
    }

    /// Directory the engine is installed into.
    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// File name of the install marker artifact.
    pub const fn marker_file(&self) -> &MarkerFileName {
        &self.marker_file
    }

    /// Full path of the install marker artifact.
    pub fn marker_path(&self) -> PathBuf {
        self.install_dir.join(self.marker_file.as_ref())
    }

    /// Directory for downloaded archives, if any.
    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// Switches forwarded to the engine when it is built.
    pub fn engine_args(&self) -> &[String] {
        &self.engine_args
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct PipelineConfigBuilder {
    install_dir: PathBuf,
    marker_file: String,
    cache_dir: Option<PathBuf>,
    engine_args: Vec<String>,
}

impl PipelineConfigBuilder {
    fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            marker_file: DEFAULT_MARKER_FILE.to_string(),
            cache_dir: None,
            engine_args: Vec::new(),
        }
    }

    /// Overrides the marker file name.
    #[must_use]
    pub fn marker_file(mut self, name: impl Into<String>) -> Self {
        self.marker_file = name.into();
        self
    }

    /// Sets the download cache directory.
    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Appends one engine switch.
    #[must_use]
    pub fn engine_arg(mut self, arg: impl Into<String>) -> Self {
        self.engine_args.push(arg.into());
        self
    }

    /// Appends several engine switches.
    #[must_use]
    pub fn engine_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.engine_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        if self.install_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyInstallDir);
        }
        let marker_file = MarkerFileName::try_new(self.marker_file)
            .map_err(|e| ConfigError::InvalidMarkerFileName(e.to_string()))?;

        Ok(PipelineConfig {
            install_dir: self.install_dir,
            marker_file,
            cache_dir: self.cache_dir,
            engine_args: self.engine_args,
        })
    }
}

#[derive(Deserialize)]
struct RawPipelineConfig {
    install_dir: PathBuf,
    #[serde(default = "default_marker_file")]
    marker_file: String,
    #[serde(default)]
    cache_dir: Option<PathBuf>,
    #[serde(default)]
    engine_args: Vec<String>,
}

fn default_marker_file() -> String {
    DEFAULT_MARKER_FILE.to_string()
}

impl TryFrom<RawPipelineConfig> for PipelineConfig {
    type Error = ConfigError;

    fn try_from(raw: RawPipelineConfig) -> Result<Self, Self::Error> {
        let mut builder = Self::builder(raw.install_dir)
            .marker_file(raw.marker_file)
            .engine_args(raw.engine_args);
        if let Some(dir) = raw.cache_dir {
            builder = builder.cache_dir(dir);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::builder("/opt/engine").build().unwrap();
        assert_eq!(config.install_dir(), Path::new("/opt/engine"));
        assert_eq!(config.marker_file().as_ref(), DEFAULT_MARKER_FILE);
        assert_eq!(config.marker_path(), Path::new("/opt/engine/install.lock"));
        assert!(config.cache_dir().is_none());
        assert!(config.engine_args().is_empty());
    }

    #[test]
    fn test_builder_overrides() {
        let config = PipelineConfig::builder("/opt/engine")
            .marker_file("  ready.lock ")
            .cache_dir("/tmp/engine-cache")
            .engine_arg("--disable-gpu")
            .engine_args(["--lang=en", "--no-sandbox"])
            .build()
            .unwrap();

        assert_eq!(config.marker_path(), Path::new("/opt/engine/ready.lock"));
        assert_eq!(config.cache_dir(), Some(Path::new("/tmp/engine-cache")));
        assert_eq!(
            config.engine_args(),
            ["--disable-gpu", "--lang=en", "--no-sandbox"]
        );
    }

    #[test]
    fn test_rejects_empty_install_dir() {
        assert!(matches!(
            PipelineConfig::builder("").build(),
            Err(ConfigError::EmptyInstallDir)
        ));
    }

    #[test]
    fn test_rejects_bad_marker_names() {
        for name in ["", "   ", "../escape.lock", "nested/install.lock", "..", "a\\b"] {
            let result = PipelineConfig::builder("/opt/engine")
                .marker_file(name)
                .build();
            assert!(
                matches!(result, Err(ConfigError::InvalidMarkerFileName(_))),
                "marker name {name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_marker_name_length_limit() {
        assert!(MarkerFileName::try_new("a".repeat(255)).is_ok());
        assert!(MarkerFileName::try_new("a".repeat(256)).is_err());
    }

    #[test]
    fn test_deserialize_applies_defaults_and_validation() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "install_dir": "/srv/engine" }"#).unwrap();
        assert_eq!(config.marker_path(), Path::new("/srv/engine/install.lock"));

        let invalid = serde_json::from_str::<PipelineConfig>(
            r#"{ "install_dir": "/srv/engine", "marker_file": "a/b" }"#,
        );
        assert!(invalid.is_err());
    }
}
