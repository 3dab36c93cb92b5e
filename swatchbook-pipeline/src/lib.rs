//! SWATCHBOOK Pipeline
//!
//! The two compute stages the theme manager coordinates:
//!
//! - **Quantizer**: `(base key, SourceImage)` → `(base key, Swatch)`
//! - **Theme**: `(base key, Swatch, GenerationParameters)` → `(base key, ComputedTheme)`
//!
//! [`QuantizerPipeline`] and [`ThemePipeline`] are the contracts the manager
//! depends on. [`StagePipeline`] is the worker that backs both reference
//! implementations: it tracks in-flight keys, bounds concurrency, delivers
//! every outcome losslessly to attached feeds, and multicasts successful
//! results on a broadcast sink.

pub mod contract;
pub mod quantizer;
pub mod stage;
pub mod theme;

pub use contract::{QuantizerPipeline, StageEvent, ThemePipeline};
pub use quantizer::{PopulationQuantizer, QuantizeStage};
pub use stage::{Stage, StageConfig, StagePipeline};
pub use theme::{ThemeStage, TonalThemeGenerator};

/// Reference quantizer pipeline.
pub type SwatchPipeline = StagePipeline<QuantizeStage>;

/// Reference theme pipeline.
pub type TonalThemePipeline = StagePipeline<ThemeStage>;
