//! SWATCHBOOK Core - Entity Types
//!
//! Pure data structures shared by every other crate in the workspace:
//! colors, swatches, generated themes, generation parameters, composite
//! cache keys and the error taxonomy. This crate contains no I/O and no
//! async code.

pub mod color;
pub mod entities;
pub mod error;
pub mod key;
pub mod params;

pub use color::{Hsl, Rgb};
pub use entities::{ColorScheme, ComputedTheme, SourceImage, Swatch, SwatchColor, Theme};
pub use error::{
    ConfigError, PipelineError, StorageError, SwatchbookError, SwatchbookResult,
};
pub use key::{CacheKeyBuilder, CompositeKey};
pub use params::{ColorSelector, ContrastLevel, GenerationParameters, Schema, SpecVersion};
