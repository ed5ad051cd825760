//! Pipeline configuration snapshot.
//!
//! The option set is deserialized from JSON using the camelCase keys the
//! host applications already speak (`enablePostprocess`, `bloomEffect`, ...).
//! Missing keys fall back to defaults, so `{}` is a valid configuration that
//! renders the plain scene with no effects.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigResult, ConfigurationError};

/// Every flag the [`PipelineAssembler`](crate::PipelineAssembler) consults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Master switch for post-processing passes (bloom).
    pub enable_postprocess: bool,
    /// Render a shadow map and feed it to the scene capture.
    pub enable_shadow: bool,
    /// Antialias the primary image in the final composite.
    pub enable_antialias: bool,
    /// Tile intermediate outputs over the scene surface for debugging.
    pub enable_preview: bool,
    /// Bloom buffer size and extraction gamma; needs `enable_postprocess`.
    pub bloom_effect: BloomEffect,
    pub shadow_quality: ShadowQuality,
    /// Gamma of the final composite.
    pub rendering_image: RenderingImage,
    /// Name of an image registered in the [`ImageCache`](crate::ImageCache).
    pub background_image: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_postprocess: false,
            enable_shadow: false,
            enable_antialias: false,
            enable_preview: false,
            bloom_effect: BloomEffect::default(),
            shadow_quality: ShadowQuality::default(),
            rendering_image: RenderingImage::default(),
            background_image: None,
        }
    }
}

/// Bloom options. Bloom only runs when both `enabled` and
/// [`PipelineConfig::enable_postprocess`] are set.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BloomEffect {
    pub enabled: bool,
    /// Fraction of the render size used for the bloom buffers, in `(0, 1]`.
    pub threshold: f32,
    /// Gamma factor applied while extracting the bloom source.
    pub gamma: f32,
}

impl Default for BloomEffect {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0.25,
            gamma: 1.0,
        }
    }
}

/// Directional-light shadow map options.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShadowQuality {
    /// Half-extent of the light's orthographic frustum in world units.
    pub scale: f32,
    /// Depth range covered by the light frustum.
    pub view_depth: f32,
    /// Square shadow-map resolution in pixels.
    pub resolution: u32,
}

impl Default for ShadowQuality {
    fn default() -> Self {
        Self {
            scale: 10.0,
            view_depth: 50.0,
            resolution: 2048,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderingImage {
    /// Display gamma; the composite applies its reciprocal.
    pub gamma: f32,
}

impl Default for RenderingImage {
    fn default() -> Self {
        Self { gamma: 1.0 }
    }
}

impl PipelineConfig {
    /// Parses and validates a JSON option set.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ConfigurationError::invalid(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Bloom nodes exist only when post-processing and bloom are both on.
    pub fn bloom_active(&self) -> bool {
        self.enable_postprocess && self.bloom_effect.enabled
    }

    /// Rejects values the assembler cannot turn into a sane graph.
    pub fn validate(&self) -> ConfigResult<()> {
        let bloom = &self.bloom_effect;
        if !(bloom.threshold > 0.0 && bloom.threshold <= 1.0) {
            return Err(ConfigurationError::invalid(format!(
                "bloomEffect.threshold must be in (0, 1], got {}",
                bloom.threshold
            )));
        }
        check_gamma("bloomEffect.gamma", bloom.gamma)?;
        check_gamma("renderingImage.gamma", self.rendering_image.gamma)?;

        let shadow = &self.shadow_quality;
        if !(shadow.scale.is_finite() && shadow.scale > 0.0) {
            return Err(ConfigurationError::invalid(
                "shadowQuality.scale must be positive",
            ));
        }
        if !(shadow.view_depth.is_finite() && shadow.view_depth > 0.0) {
            return Err(ConfigurationError::invalid(
                "shadowQuality.viewDepth must be positive",
            ));
        }
        if shadow.resolution == 0 {
            return Err(ConfigurationError::invalid(
                "shadowQuality.resolution must be non-zero",
            ));
        }
        Ok(())
    }
}

fn check_gamma(name: &str, gamma: f32) -> ConfigResult<()> {
    if gamma.is_finite() && gamma > 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::invalid(format!(
            "{name} must be a positive finite number, got {gamma}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_is_all_defaults() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(!config.bloom_active());
        assert_eq!(config.shadow_quality.resolution, 2048);
    }

    #[test]
    fn camel_case_keys_are_accepted() {
        let config = PipelineConfig::from_json(
            r#"{
                "enablePostprocess": true,
                "enableShadow": true,
                "bloomEffect": { "enabled": true, "threshold": 0.3, "gamma": 2.0 },
                "shadowQuality": { "viewDepth": 80.0 },
                "backgroundImage": "sky"
            }"#,
        )
        .unwrap();

        assert!(config.bloom_active());
        assert_eq!(config.bloom_effect.threshold, 0.3);
        assert_eq!(config.shadow_quality.view_depth, 80.0);
        assert_eq!(config.shadow_quality.scale, 10.0);
        assert_eq!(config.background_image.as_deref(), Some("sky"));
    }

    #[test]
    fn bloom_needs_postprocess() {
        let mut config = PipelineConfig::default();
        config.bloom_effect.enabled = true;
        assert!(!config.bloom_active());
        config.enable_postprocess = true;
        assert!(config.bloom_active());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = PipelineConfig::from_json(r#"{ "bloomEffect": { "threshold": 1.5 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Invalid(_)));

        let err =
            PipelineConfig::from_json(r#"{ "renderingImage": { "gamma": 0.0 } }"#).unwrap_err();
        assert!(err.to_string().contains("renderingImage.gamma"));

        let err = PipelineConfig::from_json(r#"{ "shadowQuality": { "resolution": 0 } }"#)
            .unwrap_err();
        assert!(err.to_string().contains("resolution"));
    }

    #[test]
    fn malformed_json_is_a_configuration_error() {
        let err = PipelineConfig::from_json("{ not json").unwrap_err();
        assert!(err.to_string().starts_with("invalid configuration: malformed config"));
    }
}
