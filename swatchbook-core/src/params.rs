//! Theme generation parameters.
//!
//! Every knob is a closed enum so consumers match exhaustively. `Display`
//! output doubles as the token used inside encoded composite keys, so the
//! strings below are part of the on-disk format and must stay stable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ENUMS
// ============================================================================

/// Which swatch color seeds the generated theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ColorSelector {
    /// Most populous color in the image.
    #[default]
    Dominant,
    /// Most saturated mid-lightness color.
    Vibrant,
    /// Least saturated mid-lightness color.
    Muted,
}

/// Scheme variant used to derive the tonal palettes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Schema {
    #[default]
    TonalSpot,
    Vibrant,
    Expressive,
    Neutral,
    Monochrome,
    Fidelity,
    Content,
}

/// Contrast level between foreground and background roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ContrastLevel {
    Reduced,
    #[default]
    Standard,
    Medium,
    High,
}

/// Revision of the color-role tone tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SpecVersion {
    #[default]
    V2021,
    V2025,
}

impl ContrastLevel {
    /// Signed contrast step: negative lowers contrast, positive raises it.
    pub fn step(&self) -> f32 {
        match self {
            ContrastLevel::Reduced => -0.5,
            ContrastLevel::Standard => 0.0,
            ContrastLevel::Medium => 0.5,
            ContrastLevel::High => 1.0,
        }
    }
}

fn normalize_token(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl fmt::Display for ColorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ColorSelector::Dominant => "Dominant",
            ColorSelector::Vibrant => "Vibrant",
            ColorSelector::Muted => "Muted",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for ColorSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "dominant" => Ok(ColorSelector::Dominant),
            "vibrant" => Ok(ColorSelector::Vibrant),
            "muted" => Ok(ColorSelector::Muted),
            _ => Err(format!("Invalid ColorSelector: {}", s)),
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Schema::TonalSpot => "TonalSpot",
            Schema::Vibrant => "Vibrant",
            Schema::Expressive => "Expressive",
            Schema::Neutral => "Neutral",
            Schema::Monochrome => "Monochrome",
            Schema::Fidelity => "Fidelity",
            Schema::Content => "Content",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for Schema {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "tonalspot" => Ok(Schema::TonalSpot),
            "vibrant" => Ok(Schema::Vibrant),
            "expressive" => Ok(Schema::Expressive),
            "neutral" => Ok(Schema::Neutral),
            "monochrome" => Ok(Schema::Monochrome),
            "fidelity" => Ok(Schema::Fidelity),
            "content" => Ok(Schema::Content),
            _ => Err(format!("Invalid Schema: {}", s)),
        }
    }
}

impl fmt::Display for ContrastLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            ContrastLevel::Reduced => "Reduced",
            ContrastLevel::Standard => "Standard",
            ContrastLevel::Medium => "Medium",
            ContrastLevel::High => "High",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for ContrastLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "reduced" => Ok(ContrastLevel::Reduced),
            "standard" => Ok(ContrastLevel::Standard),
            "medium" => Ok(ContrastLevel::Medium),
            "high" => Ok(ContrastLevel::High),
            _ => Err(format!("Invalid ContrastLevel: {}", s)),
        }
    }
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            SpecVersion::V2021 => "V2021",
            SpecVersion::V2025 => "V2025",
        };
        write!(f, "{}", value)
    }
}

impl FromStr for SpecVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "v2021" | "2021" => Ok(SpecVersion::V2021),
            "v2025" | "2025" => Ok(SpecVersion::V2025),
            _ => Err(format!("Invalid SpecVersion: {}", s)),
        }
    }
}

// ============================================================================
// GENERATION PARAMETERS
// ============================================================================

/// How a swatch is expanded into a full theme.
///
/// Several parameter sets may coexist for one base key; each addresses its
/// own entry in the theme cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct GenerationParameters {
    pub color_selector: ColorSelector,
    pub schema: Schema,
    pub contrast: ContrastLevel,
    pub spec_version: SpecVersion,
}

impl GenerationParameters {
    pub fn new(
        color_selector: ColorSelector,
        schema: Schema,
        contrast: ContrastLevel,
        spec_version: SpecVersion,
    ) -> Self {
        Self {
            color_selector,
            schema,
            contrast,
            spec_version,
        }
    }

    pub fn with_selector(mut self, color_selector: ColorSelector) -> Self {
        self.color_selector = color_selector;
        self
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_contrast(mut self, contrast: ContrastLevel) -> Self {
        self.contrast = contrast;
        self
    }

    pub fn with_spec_version(mut self, spec_version: SpecVersion) -> Self {
        self.spec_version = spec_version;
        self
    }

    /// True for the parameter set used when a fresh swatch is forwarded
    /// to the theme stage.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parameters() {
        let params = GenerationParameters::default();
        assert_eq!(params.color_selector, ColorSelector::Dominant);
        assert_eq!(params.schema, Schema::TonalSpot);
        assert_eq!(params.contrast, ContrastLevel::Standard);
        assert_eq!(params.spec_version, SpecVersion::V2021);
        assert!(params.is_default());
        assert!(!params.with_schema(Schema::Vibrant).is_default());
    }

    #[test]
    fn test_schema_parse_is_lenient() {
        assert_eq!("tonal_spot".parse::<Schema>().unwrap(), Schema::TonalSpot);
        assert_eq!("Tonal Spot".parse::<Schema>().unwrap(), Schema::TonalSpot);
        assert_eq!("MONOCHROME".parse::<Schema>().unwrap(), Schema::Monochrome);
        assert!("pastel".parse::<Schema>().is_err());
    }

    #[test]
    fn test_spec_version_accepts_bare_year() {
        assert_eq!("2025".parse::<SpecVersion>().unwrap(), SpecVersion::V2025);
        assert_eq!("v2021".parse::<SpecVersion>().unwrap(), SpecVersion::V2021);
    }

    #[test]
    fn test_contrast_steps_are_ordered() {
        let steps: Vec<f32> = [
            ContrastLevel::Reduced,
            ContrastLevel::Standard,
            ContrastLevel::Medium,
            ContrastLevel::High,
        ]
        .iter()
        .map(|c| c.step())
        .collect();
        assert!(steps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_display_parse_roundtrip_for_all_variants() {
        for selector in [ColorSelector::Dominant, ColorSelector::Vibrant, ColorSelector::Muted] {
            assert_eq!(selector.to_string().parse::<ColorSelector>().unwrap(), selector);
        }
        for schema in [
            Schema::TonalSpot,
            Schema::Vibrant,
            Schema::Expressive,
            Schema::Neutral,
            Schema::Monochrome,
            Schema::Fidelity,
            Schema::Content,
        ] {
            assert_eq!(schema.to_string().parse::<Schema>().unwrap(), schema);
        }
        for contrast in [
            ContrastLevel::Reduced,
            ContrastLevel::Standard,
            ContrastLevel::Medium,
            ContrastLevel::High,
        ] {
            assert_eq!(contrast.to_string().parse::<ContrastLevel>().unwrap(), contrast);
        }
        for spec in [SpecVersion::V2021, SpecVersion::V2025] {
            assert_eq!(spec.to_string().parse::<SpecVersion>().unwrap(), spec);
        }
    }
}
