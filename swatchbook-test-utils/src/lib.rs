//! SWATCHBOOK Test Utilities
//!
//! Centralized test infrastructure for the SWATCHBOOK workspace:
//! - Scripted pipeline doubles that record calls and emit on demand
//! - Proptest generators for colors, parameters and swatches
//! - Test fixtures for common scenarios
//! - Async helpers for stream and condition waiting

// Re-export the disk double from its source crate
pub use swatchbook_storage::InMemoryDiskCache;

// Re-export core types for convenience
pub use swatchbook_core::{
    CacheKeyBuilder, ColorScheme, ColorSelector, CompositeKey, ComputedTheme, ContrastLevel,
    GenerationParameters, Rgb, Schema, SourceImage, SpecVersion, Swatch, SwatchColor,
    SwatchbookError, SwatchbookResult, Theme,
};

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use swatchbook_pipeline::{QuantizerPipeline, StageEvent, ThemePipeline};
use tokio::sync::{broadcast, mpsc};

const SINK_CAPACITY: usize = 64;

/// Large enough that a test never fills a feed the manager is draining.
const FEED_CAPACITY: usize = 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Feeds attached to a scripted double. Events are pushed synchronously.
struct ScriptedFeeds<T> {
    senders: Mutex<Vec<mpsc::Sender<StageEvent<T>>>>,
}

impl<T: Clone> ScriptedFeeds<T> {
    fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    fn attach(&self) -> mpsc::Receiver<StageEvent<T>> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        lock(&self.senders).push(tx);
        rx
    }

    fn push(&self, event: StageEvent<T>) {
        let mut senders = lock(&self.senders);
        senders.retain(|tx| !tx.is_closed());
        for tx in senders.iter() {
            if let Err(e) = tx.try_send(event.clone()) {
                panic!("scripted feed rejected event: {e}");
            }
        }
    }
}

// ============================================================================
// SCRIPTED PIPELINES
// ============================================================================

/// Quantizer double.
///
/// `queue` records the call and marks the key in flight; nothing is computed.
/// The test decides when (and whether) a result appears by calling
/// [`ScriptedQuantizer::emit`].
pub struct ScriptedQuantizer {
    queued: Mutex<Vec<String>>,
    in_flight: Mutex<HashSet<String>>,
    sink: broadcast::Sender<(String, Swatch)>,
    feeds: ScriptedFeeds<Swatch>,
}

impl Default for ScriptedQuantizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedQuantizer {
    pub fn new() -> Self {
        let (sink, _) = broadcast::channel(SINK_CAPACITY);
        Self {
            queued: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashSet::new()),
            sink,
            feeds: ScriptedFeeds::new(),
        }
    }

    /// Keys passed to `queue`, in call order.
    pub fn queued_keys(&self) -> Vec<String> {
        lock(&self.queued).clone()
    }

    pub fn queue_count(&self) -> usize {
        lock(&self.queued).len()
    }

    /// Force the in-flight predicate for `key`.
    pub fn set_in_flight(&self, key: &str, in_flight: bool) {
        let mut set = lock(&self.in_flight);
        if in_flight {
            set.insert(key.to_string());
        } else {
            set.remove(key);
        }
    }

    /// Finish `key`: clear its in-flight mark and publish the swatch.
    pub fn emit(&self, key: &str, swatch: Swatch) {
        self.set_in_flight(key, false);
        self.feeds.push(StageEvent::Completed {
            key: key.to_string(),
            output: swatch.clone(),
        });
        let _ = self.sink.send((key.to_string(), swatch));
    }

    /// Clear the in-flight mark and report a failure, as a failed run would.
    pub fn fail(&self, key: &str) {
        self.set_in_flight(key, false);
        self.feeds.push(StageEvent::Failed {
            key: key.to_string(),
        });
    }
}

impl QuantizerPipeline for ScriptedQuantizer {
    fn queue(&self, key: &str, _image: SourceImage) {
        lock(&self.queued).push(key.to_string());
        self.set_in_flight(key, true);
    }

    fn subscribe(&self) -> broadcast::Receiver<(String, Swatch)> {
        self.sink.subscribe()
    }

    fn attach(&self) -> mpsc::Receiver<StageEvent<Swatch>> {
        self.feeds.attach()
    }

    fn contains_key(&self, key: &str) -> bool {
        lock(&self.in_flight).contains(key)
    }
}

/// Theme stage double. In-flight state is tracked per composite key.
pub struct ScriptedThemePipeline {
    queued: Mutex<Vec<(String, Swatch, GenerationParameters)>>,
    in_flight: Mutex<HashSet<String>>,
    sink: broadcast::Sender<(String, ComputedTheme)>,
    feeds: ScriptedFeeds<ComputedTheme>,
}

impl Default for ScriptedThemePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedThemePipeline {
    pub fn new() -> Self {
        let (sink, _) = broadcast::channel(SINK_CAPACITY);
        Self {
            queued: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashSet::new()),
            sink,
            feeds: ScriptedFeeds::new(),
        }
    }

    /// `(base key, parameters)` passed to `queue`, in call order.
    pub fn queued(&self) -> Vec<(String, GenerationParameters)> {
        lock(&self.queued)
            .iter()
            .map(|(key, _, params)| (key.clone(), *params))
            .collect()
    }

    /// Swatches passed to `queue`, in call order.
    pub fn queued_swatches(&self) -> Vec<Swatch> {
        lock(&self.queued)
            .iter()
            .map(|(_, swatch, _)| swatch.clone())
            .collect()
    }

    pub fn queue_count(&self) -> usize {
        lock(&self.queued).len()
    }

    pub fn set_in_flight(&self, composite_key: &CompositeKey, in_flight: bool) {
        let mut set = lock(&self.in_flight);
        if in_flight {
            set.insert(composite_key.encode());
        } else {
            set.remove(&composite_key.encode());
        }
    }

    /// Publish a computed theme under its source key.
    pub fn emit(&self, computed: ComputedTheme) {
        self.set_in_flight(&computed.composite_key, false);
        self.feeds.push(StageEvent::Completed {
            key: computed.source_key.clone(),
            output: computed.clone(),
        });
        let _ = self.sink.send((computed.source_key.clone(), computed));
    }

    /// Clear the in-flight mark for `composite_key` and report a failure.
    pub fn fail(&self, composite_key: &CompositeKey) {
        self.set_in_flight(composite_key, false);
        self.feeds.push(StageEvent::Failed {
            key: composite_key.encode(),
        });
    }

    /// Finish `(key, params)` with a fixture theme and return it.
    pub fn complete(&self, key: &str, params: GenerationParameters) -> ComputedTheme {
        let computed = fixtures::computed_theme(key, params);
        self.emit(computed.clone());
        computed
    }
}

impl ThemePipeline for ScriptedThemePipeline {
    fn queue(&self, key: &str, swatch: Swatch, params: GenerationParameters) {
        lock(&self.queued).push((key.to_string(), swatch, params));
        self.set_in_flight(&CacheKeyBuilder::build_with(key, &params), true);
    }

    fn subscribe(&self) -> broadcast::Receiver<(String, ComputedTheme)> {
        self.sink.subscribe()
    }

    fn attach(&self) -> mpsc::Receiver<StageEvent<ComputedTheme>> {
        self.feeds.attach()
    }

    fn contains_key(&self, composite_key: &CompositeKey) -> bool {
        lock(&self.in_flight).contains(&composite_key.encode())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for SWATCHBOOK types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_rgb() -> impl Strategy<Value = Rgb> {
        any::<(u8, u8, u8)>().prop_map(|(r, g, b)| Rgb::new(r, g, b))
    }

    pub fn arb_color_selector() -> impl Strategy<Value = ColorSelector> {
        prop_oneof![
            Just(ColorSelector::Dominant),
            Just(ColorSelector::Vibrant),
            Just(ColorSelector::Muted),
        ]
    }

    pub fn arb_schema() -> impl Strategy<Value = Schema> {
        prop_oneof![
            Just(Schema::TonalSpot),
            Just(Schema::Vibrant),
            Just(Schema::Expressive),
            Just(Schema::Neutral),
            Just(Schema::Monochrome),
            Just(Schema::Fidelity),
            Just(Schema::Content),
        ]
    }

    pub fn arb_contrast() -> impl Strategy<Value = ContrastLevel> {
        prop_oneof![
            Just(ContrastLevel::Reduced),
            Just(ContrastLevel::Standard),
            Just(ContrastLevel::Medium),
            Just(ContrastLevel::High),
        ]
    }

    pub fn arb_spec_version() -> impl Strategy<Value = SpecVersion> {
        prop_oneof![Just(SpecVersion::V2021), Just(SpecVersion::V2025)]
    }

    pub fn arb_params() -> impl Strategy<Value = GenerationParameters> {
        (
            arb_color_selector(),
            arb_schema(),
            arb_contrast(),
            arb_spec_version(),
        )
            .prop_map(|(selector, schema, contrast, spec)| {
                GenerationParameters::new(selector, schema, contrast, spec)
            })
    }

    /// Base keys including the separator and escape characters.
    pub fn arb_base_key() -> impl Strategy<Value = String> {
        "[a-z0-9|\\\\-]{1,24}"
    }

    pub fn arb_swatch() -> impl Strategy<Value = Swatch> {
        prop::collection::vec((arb_rgb(), 1u32..10_000), 1..16).prop_map(|colors| {
            let colors = colors
                .into_iter()
                .map(|(color, population)| SwatchColor { color, population })
                .collect();
            Swatch::from_colors(colors).unwrap_or_else(|_| Swatch::from_seed(Rgb::BLACK))
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values for common testing scenarios.

    use super::*;
    use swatchbook_pipeline::TonalThemeGenerator;

    pub const BLUE: Rgb = Rgb::new(30, 90, 200);
    pub const RED: Rgb = Rgb::new(200, 30, 40);

    /// 4x4 single-color image.
    pub fn solid_image(color: Rgb) -> SourceImage {
        SourceImage::new(4, 4, [color.r, color.g, color.b, 255].repeat(16))
            .unwrap_or_else(|e| panic!("fixture image must be valid: {e}"))
    }

    pub fn swatch(color: Rgb) -> Swatch {
        Swatch::from_seed(color)
    }

    /// A real generated theme for `key` under `params`, seeded from [`BLUE`].
    pub fn computed_theme(key: &str, params: GenerationParameters) -> ComputedTheme {
        TonalThemeGenerator::new().compute(key, &swatch(BLUE), &params)
    }

    pub fn default_theme(key: &str) -> ComputedTheme {
        computed_theme(key, GenerationParameters::default())
    }

    /// Parameters that differ from the default in every field.
    pub fn non_default_params() -> GenerationParameters {
        GenerationParameters::new(
            ColorSelector::Vibrant,
            Schema::Expressive,
            ContrastLevel::High,
            SpecVersion::V2025,
        )
    }
}

// ============================================================================
// ASYNC HELPERS
// ============================================================================

pub mod waiting {
    //! Bounded waits for streams and conditions.

    use std::time::Duration;

    use futures_util::{Stream, StreamExt};

    /// Next stream item, or `None` on timeout or end of stream.
    pub async fn next_within<S>(stream: &mut S, timeout: Duration) -> Option<S::Item>
    where
        S: Stream + Unpin,
    {
        tokio::time::timeout(timeout, stream.next())
            .await
            .ok()
            .flatten()
    }

    /// Panics if the stream yields anything within `window`.
    pub async fn assert_silent<S>(stream: &mut S, window: Duration)
    where
        S: Stream + Unpin,
        S::Item: std::fmt::Debug,
    {
        if let Ok(Some(item)) = tokio::time::timeout(window, stream.next()).await {
            panic!("expected no emission, got {:?}", item);
        }
    }

    /// Poll `condition` every few milliseconds until it holds or `timeout`
    /// elapses. Returns whether it held.
    pub async fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
