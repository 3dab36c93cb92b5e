//! Feature gate for dynamic theming.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::EngineConfig;

/// Two independently settable toggles; theming is active if either is on.
///
/// Toggles can flip at any time from any thread; the manager reads the
/// current value on every enqueue.
#[derive(Debug)]
pub struct FeatureGate {
    theme_item_detail: AtomicBool,
    theme_playback: AtomicBool,
}

impl FeatureGate {
    pub fn new(theme_item_detail: bool, theme_playback: bool) -> Self {
        Self {
            theme_item_detail: AtomicBool::new(theme_item_detail),
            theme_playback: AtomicBool::new(theme_playback),
        }
    }

    pub fn enabled() -> Self {
        Self::new(true, true)
    }

    pub fn disabled() -> Self {
        Self::new(false, false)
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.theme_item_detail, config.theme_playback)
    }

    pub fn is_active(&self) -> bool {
        self.theme_item_detail.load(Ordering::Acquire) || self.theme_playback.load(Ordering::Acquire)
    }

    pub fn theme_item_detail(&self) -> bool {
        self.theme_item_detail.load(Ordering::Acquire)
    }

    pub fn theme_playback(&self) -> bool {
        self.theme_playback.load(Ordering::Acquire)
    }

    pub fn set_theme_item_detail(&self, on: bool) {
        self.theme_item_detail.store(on, Ordering::Release);
    }

    pub fn set_theme_playback(&self, on: bool) {
        self.theme_playback.store(on, Ordering::Release);
    }
}

impl Default for FeatureGate {
    fn default() -> Self {
        Self::enabled()
    }
}
