//! Swatches, themes and the image payload they are derived from.

use serde::{Deserialize, Serialize};

use crate::color::Rgb;
use crate::error::{PipelineError, SwatchbookResult};
use crate::key::CompositeKey;
use crate::params::ColorSelector;

/// Saturation split between vibrant and muted picks.
const VIBRANT_MIN_SATURATION: f32 = 0.35;
/// Lightness window considered for vibrant and muted picks.
const PICK_LIGHTNESS: (f32, f32) = (0.2, 0.8);

// ============================================================================
// SOURCE IMAGE
// ============================================================================

/// Already-decoded RGBA8 pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl SourceImage {
    /// Wrap a row-major RGBA8 buffer.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidImage` when the image is empty or the
    /// buffer length is not `width * height * 4`.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> SwatchbookResult<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidImage {
                reason: format!("empty image {}x{}", width, height),
            }
            .into());
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(PipelineError::InvalidImage {
                reason: format!("expected {} bytes, got {}", expected, pixels.len()),
            }
            .into());
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Solid single-color image.
    pub fn solid(width: u32, height: u32, color: Rgb) -> SwatchbookResult<Self> {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * 4);
        for _ in 0..count {
            pixels.extend_from_slice(&[color.r, color.g, color.b, 255]);
        }
        Self::new(width, height, pixels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA8 bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

// ============================================================================
// SWATCH
// ============================================================================

/// One quantized color and how many pixels fell into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwatchColor {
    pub color: Rgb,
    pub population: u32,
}

/// Color signature extracted for a base key.
///
/// Independent of generation parameters; one swatch feeds every theme
/// variant for the same base key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swatch {
    /// Colors ordered by descending population.
    pub colors: Vec<SwatchColor>,
    pub dominant: Rgb,
    pub vibrant: Option<Rgb>,
    pub muted: Option<Rgb>,
}

impl Swatch {
    /// Build a swatch from quantized colors, deriving the dominant,
    /// vibrant and muted picks.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::EmptySwatch` when `colors` is empty.
    pub fn from_colors(mut colors: Vec<SwatchColor>) -> SwatchbookResult<Self> {
        colors.sort_by(|a, b| b.population.cmp(&a.population));
        let dominant = colors
            .first()
            .map(|c| c.color)
            .ok_or(PipelineError::EmptySwatch)?;

        let in_window = |c: &&SwatchColor| {
            let l = c.color.to_hsl().l;
            l >= PICK_LIGHTNESS.0 && l <= PICK_LIGHTNESS.1
        };

        let vibrant = colors
            .iter()
            .filter(in_window)
            .filter(|c| c.color.to_hsl().s >= VIBRANT_MIN_SATURATION)
            .max_by(|a, b| vibrancy(a).total_cmp(&vibrancy(b)))
            .map(|c| c.color);

        let muted = colors
            .iter()
            .filter(in_window)
            .filter(|c| c.color.to_hsl().s < VIBRANT_MIN_SATURATION)
            .max_by_key(|c| c.population)
            .map(|c| c.color);

        Ok(Self {
            colors,
            dominant,
            vibrant,
            muted,
        })
    }

    /// Trivial swatch wrapping a single seed color.
    pub fn from_seed(seed: Rgb) -> Self {
        Self {
            colors: vec![SwatchColor {
                color: seed,
                population: 1,
            }],
            dominant: seed,
            vibrant: None,
            muted: None,
        }
    }

    /// Resolve the seed color for a selector, falling back to the dominant
    /// color when the requested pick does not exist.
    pub fn select(&self, selector: ColorSelector) -> Rgb {
        match selector {
            ColorSelector::Dominant => self.dominant,
            ColorSelector::Vibrant => self.vibrant.unwrap_or(self.dominant),
            ColorSelector::Muted => self.muted.unwrap_or(self.dominant),
        }
    }
}

fn vibrancy(c: &SwatchColor) -> f32 {
    let hsl = c.color.to_hsl();
    hsl.s * (c.population as f32).sqrt()
}

// ============================================================================
// THEME
// ============================================================================

/// Color roles for one brightness mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorScheme {
    pub primary: Rgb,
    pub on_primary: Rgb,
    pub primary_container: Rgb,
    pub on_primary_container: Rgb,
    pub secondary: Rgb,
    pub on_secondary: Rgb,
    pub tertiary: Rgb,
    pub on_tertiary: Rgb,
    pub background: Rgb,
    pub on_background: Rgb,
    pub surface: Rgb,
    pub on_surface: Rgb,
    pub surface_variant: Rgb,
    pub on_surface_variant: Rgb,
    pub outline: Rgb,
    pub error: Rgb,
    pub on_error: Rgb,
}

/// Light and dark schemes generated from one seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub seed: Rgb,
    pub light: ColorScheme,
    pub dark: ColorScheme,
}

/// Final artifact of the theme stage.
///
/// Immutable once computed; recomputation under the same composite key
/// overwrites it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputedTheme {
    pub composite_key: CompositeKey,
    pub source_key: String,
    pub theme: Theme,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SwatchbookError;

    #[test]
    fn test_source_image_validates_length() {
        assert!(SourceImage::new(2, 2, vec![0; 16]).is_ok());
        let err = SourceImage::new(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(
            err,
            SwatchbookError::Pipeline(PipelineError::InvalidImage { .. })
        ));
        assert!(SourceImage::new(0, 4, vec![]).is_err());
    }

    #[test]
    fn test_solid_image() {
        let image = SourceImage::solid(3, 2, Rgb::new(1, 2, 3)).unwrap();
        assert_eq!(image.pixels().len(), 24);
        assert_eq!(&image.pixels()[0..4], &[1, 2, 3, 255]);
    }

    #[test]
    fn test_swatch_orders_by_population() {
        let swatch = Swatch::from_colors(vec![
            SwatchColor {
                color: Rgb::new(10, 10, 10),
                population: 3,
            },
            SwatchColor {
                color: Rgb::new(200, 40, 40),
                population: 9,
            },
        ])
        .unwrap();
        assert_eq!(swatch.dominant, Rgb::new(200, 40, 40));
        assert_eq!(swatch.colors[0].population, 9);
    }

    #[test]
    fn test_swatch_picks_vibrant_and_muted() {
        let vivid = Rgb::new(230, 30, 60);
        let dusty = Rgb::new(120, 110, 100);
        let swatch = Swatch::from_colors(vec![
            SwatchColor {
                color: dusty,
                population: 50,
            },
            SwatchColor {
                color: vivid,
                population: 10,
            },
        ])
        .unwrap();
        assert_eq!(swatch.vibrant, Some(vivid));
        assert_eq!(swatch.muted, Some(dusty));
        assert_eq!(swatch.select(ColorSelector::Vibrant), vivid);
        assert_eq!(swatch.select(ColorSelector::Muted), dusty);
    }

    #[test]
    fn test_empty_swatch_is_an_error() {
        let err = Swatch::from_colors(vec![]).unwrap_err();
        assert!(matches!(
            err,
            SwatchbookError::Pipeline(PipelineError::EmptySwatch)
        ));
    }

    #[test]
    fn test_seed_swatch_falls_back_to_dominant() {
        let seed = Rgb::new(0, 120, 200);
        let swatch = Swatch::from_seed(seed);
        for selector in [ColorSelector::Dominant, ColorSelector::Vibrant, ColorSelector::Muted] {
            assert_eq!(swatch.select(selector), seed);
        }
    }
}
