//! Configuration management for KartenWarp

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::geometry::Point2D;
use crate::pipeline::WarpOptions;
use crate::resample::{BorderFill, Interpolation};
use crate::tps::TpsParams;

/// Sampling settings for both resampling passes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct RenderConfig {
    #[serde(default)]
    pub interpolation: Interpolation,

    /// RGBA colour written where the warp reads outside the source image
    #[serde(default)]
    pub border_fill: BorderFill,
}

/// Landmarks clicked on both maps.
///
/// `game_points[i]` and `real_points[i]` mark the same place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Correspondence {
    /// Destination landmarks on the stylized game map
    #[serde(default)]
    pub game_points: Vec<Point2D>,

    /// Source landmarks on the real-world map
    #[serde(default)]
    pub real_points: Vec<Point2D>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub tps: TpsParams,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub correspondence: Correspondence,
}

impl Config {
    /// Read `path`, or write the defaults there on first run
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            tracing::info!(
                "No config at {:?}, wrote defaults; add landmarks under [correspondence]",
                path
            );
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in {:?}", path))?;
        tracing::info!(
            "Config {:?}: {} game / {} real landmarks",
            path,
            config.correspondence.game_points.len(),
            config.correspondence.real_points.len()
        );
        Ok(config)
    }

    /// Write as pretty TOML, creating missing directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create directory {:?}", dir))?,
            _ => {}
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::debug!("Wrote configuration to {:?}", path);
        Ok(())
    }

    /// Reject settings the pipeline would refuse anyway, with a config-level message
    pub fn validate(&self) -> Result<()> {
        if !self.tps.reg_lambda.is_finite() || self.tps.reg_lambda < 0.0 {
            bail!(
                "tps.reg_lambda must be a finite number >= 0 (got {})",
                self.tps.reg_lambda
            );
        }
        if !self.tps.min_pair_distance.is_finite() || self.tps.min_pair_distance < 0.0 {
            bail!(
                "tps.min_pair_distance must be a finite number >= 0 (got {})",
                self.tps.min_pair_distance
            );
        }
        Ok(())
    }

    /// Explicit pipeline options, so the library never reads shared settings
    pub fn warp_options(&self) -> WarpOptions {
        WarpOptions {
            tps: self.tps,
            interpolation: self.render.interpolation,
            border_fill: self.render.border_fill,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tps.reg_lambda, 1e-3);
        assert!(!config.tps.adaptive);
        assert_eq!(config.render.interpolation, Interpolation::Bicubic);
        assert_eq!(config.render.border_fill, BorderFill::WHITE);
        assert!(config.correspondence.game_points.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial() {
        let config: Config = toml::from_str(
            r#"
            [tps]
            reg_lambda = 0.5
            adaptive = true

            [render]
            interpolation = "bilinear"
            border_fill = [0, 0, 0, 255]

            [correspondence]
            game_points = [{ x = 1.0, y = 2.0 }, { x = 3.5, y = 4.0 }]
            real_points = [{ x = 10.0, y = 20.0 }, { x = 30.0, y = 40.0 }]
            "#,
        )
        .unwrap();

        assert_eq!(config.tps.reg_lambda, 0.5);
        assert!(config.tps.adaptive);
        assert_eq!(config.tps.min_pair_distance, 0.0);
        assert_eq!(config.render.interpolation, Interpolation::Bilinear);
        assert_eq!(config.render.border_fill, BorderFill::BLACK);
        assert_eq!(config.correspondence.game_points[1], Point2D::new(3.5, 4.0));
        assert_eq!(config.correspondence.real_points.len(), 2);

        let options = config.warp_options();
        assert_eq!(options.tps.reg_lambda, 0.5);
        assert_eq!(options.interpolation, Interpolation::Bilinear);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validate_rejects_negative_lambda() {
        let mut config = Config::default();
        config.tps.reg_lambda = -0.1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tps.min_pair_distance = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("kartenwarp-config-{}", std::process::id()));
        let path = dir.join("config.toml");

        let mut config = Config::default();
        config.tps.adaptive = true;
        config.correspondence.game_points = vec![Point2D::new(1.0, 2.0)];
        config.correspondence.real_points = vec![Point2D::new(3.0, 4.0)];
        config.save(&path).unwrap();

        let loaded = Config::load_or_create(&path).unwrap();
        assert_eq!(loaded, config);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_creates_default() {
        let dir = std::env::temp_dir().join(format!("kartenwarp-create-{}", std::process::id()));
        let path = dir.join("nested").join("config.toml");

        let config = Config::load_or_create(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
