//! SWATCHBOOK Engine
//!
//! The caching theme manager and its ambient wiring:
//! - [`CachingThemeManager`]: coalesced enqueue, tiered fallback, observe
//! - [`EngineConfig`]: environment-driven configuration
//! - [`FeatureGate`]: runtime toggles for dynamic theming
//! - [`init_tracing`]: subscriber setup for binaries

pub mod config;
pub mod gate;
pub mod manager;
pub mod telemetry;

pub use config::EngineConfig;
pub use gate::FeatureGate;
pub use manager::{CachingThemeManager, ManagerStats, ThemeStream};
pub use telemetry::init_tracing;
