//! Launcher configuration.
//!
//! An optional TOML file (`--config lyre.toml`) tunes the collector and
//! names libraries to load before any command-line input:
//!
//! ```toml
//! [gc]
//! growth_factor = 2.0
//! min_threshold = 8192
//!
//! [preload]
//! sources = ["lib/util.lyre"]
//! images = ["lib/boot.lyb"]
//! ```

use lyre_runtime::Interp;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gc: GcConfig,
    #[serde(default)]
    pub preload: Preload,
}

#[derive(Debug, Default, Deserialize)]
pub struct GcConfig {
    /// Live-set multiplier for the next collection trigger (>= 1.5).
    pub growth_factor: Option<f64>,
    /// Floor for the trigger point, in objects.
    pub min_threshold: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Preload {
    /// Source libraries, loaded first.
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    /// Bytecode libraries, loaded before the sources.
    #[serde(default)]
    pub images: Vec<PathBuf>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        toml::from_str(&text).map_err(|e| format!("invalid config {}: {}", path.display(), e))
    }

    /// Build an interpreter instance honoring the GC tuning, if any.
    pub fn make_interp(&self) -> Interp {
        if self.gc.growth_factor.is_some() || self.gc.min_threshold.is_some() {
            Interp::with_gc_config(
                self.gc.growth_factor.unwrap_or(2.0),
                self.gc.min_threshold.unwrap_or(4096),
            )
        } else {
            Interp::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.gc.growth_factor.is_none());
        assert!(config.preload.sources.is_empty());
        let _ = config.make_interp();
    }

    #[test]
    fn test_full_config() {
        let config: Config = toml::from_str(
            r#"
            [gc]
            growth_factor = 3.0
            min_threshold = 128

            [preload]
            sources = ["a.lyre"]
            images = ["b.lyb"]
            "#,
        )
        .unwrap();
        assert_eq!(config.gc.growth_factor, Some(3.0));
        assert_eq!(config.gc.min_threshold, Some(128));
        assert_eq!(config.preload.sources, vec![PathBuf::from("a.lyre")]);
        assert_eq!(config.preload.images, vec![PathBuf::from("b.lyb")]);
        let _ = config.make_interp();
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Config::load(Path::new("/no/such/lyre.toml")).is_err());
    }
}
