//! Caching theme manager.
//!
//! Wires the quantizer and theme pipelines to the swatch and theme cache
//! tiers and exposes enqueue/observe to callers.
//!
//! ```text
//! enqueue_image ─► QuantizerPipeline ─► feed ─► swatch tiers ─► ThemePipeline (default params)
//!                                                   │
//!                                                   └─► swatch-ready
//!
//! ThemePipeline ─► feed ─► theme channel ─► observers
//!                               └─► theme tiers
//! ```
//!
//! Both feeds are lossless: every outcome a stage produces is committed or,
//! for failures, cleared from the pending set.
//!
//! # Coalescing
//!
//! Every enqueue decision, every observer fallback run, and every commit
//! happens under one async lock guarding the pending set. A key stays
//! pending from the moment it is queued until its result is committed or
//! its failure is reported, which covers the hand-off between a stage
//! finishing and the manager caching the output. Duplicate requests
//! collapse into a single pipeline call.
//!
//! # Fallback Chain
//!
//! An observer subscribes to the theme channel first, then resolves:
//! in flight → memory theme → disk theme (promoted) → memory swatch
//! (re-derive with the requested parameters) → `None`.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_stream::stream;
use futures_util::Stream;
use swatchbook_core::{
    CacheKeyBuilder, ColorSelector, CompositeKey, ComputedTheme, ContrastLevel,
    GenerationParameters, Rgb, Schema, SourceImage, SpecVersion, Swatch, SwatchbookResult, Theme,
};
use swatchbook_pipeline::{QuantizerPipeline, StageEvent, ThemePipeline};
use swatchbook_storage::{CacheStats, DiskCache, MemoryCache, TieredCache};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::gate::FeatureGate;

/// Stream of theme values for one composite key.
///
/// `None` means nothing is cached and nothing can be derived yet; a later
/// computation for the same key still arrives as `Some`.
pub type ThemeStream = Pin<Box<dyn Stream<Item = Option<Theme>> + Send>>;

/// Memory tier statistics for both artifact kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerStats {
    pub swatches: CacheStats,
    pub themes: CacheStats,
}

enum Resolution {
    Ready(Theme),
    Pending,
    Missing,
}

enum Step {
    Emit(Theme),
    Rerun,
    Resync,
    Skip,
    Stop,
}

/// Work queued by the manager whose outcome has not been handled yet.
#[derive(Default)]
struct Pending {
    /// Base keys.
    swatches: HashSet<String>,
    /// Encoded composite keys.
    themes: HashSet<String>,
}

struct Shared {
    config: EngineConfig,
    gate: Arc<FeatureGate>,
    quantizer: Arc<dyn QuantizerPipeline>,
    theme_pipeline: Arc<dyn ThemePipeline>,
    swatch_cache: TieredCache<Swatch>,
    theme_cache: TieredCache<ComputedTheme>,
    theme_tx: broadcast::Sender<ComputedTheme>,
    swatch_ready: broadcast::Sender<String>,
    shutdown: watch::Sender<bool>,
    pending: tokio::sync::Mutex<Pending>,
}

impl Shared {
    /// Commit a fresh swatch, forward it to the theme stage with default
    /// parameters, then announce it.
    async fn on_swatch(&self, key: String, swatch: Swatch) {
        {
            let mut pending = self.pending.lock().await;
            self.swatch_cache.put(&key, swatch.clone()).await;
            pending.swatches.remove(&key);

            let params = GenerationParameters::default();
            let composite = CacheKeyBuilder::build_with(&key, &params);
            let encoded = composite.encode();
            if pending.themes.contains(&encoded) || self.theme_pipeline.contains_key(&composite) {
                debug!(key = %key, "default theme already in flight");
            } else {
                self.theme_pipeline.queue(&key, swatch, params);
                pending.themes.insert(encoded);
            }
        }

        let _ = self.swatch_ready.send(key);
    }

    async fn on_swatch_failed(&self, key: &str) {
        if self.pending.lock().await.swatches.remove(key) {
            debug!(key, "quantization failed, key may be requested again");
        }
    }

    /// Publish to observers first, then commit to both theme tiers.
    ///
    /// Runs under the pending lock, so a fallback run sees either the
    /// pending mark or the committed theme.
    async fn on_theme(&self, computed: ComputedTheme) {
        let encoded = computed.composite_key.encode();
        let mut pending = self.pending.lock().await;
        match self.theme_tx.send(computed.clone()) {
            Ok(receivers) => debug!(key = %encoded, receivers, "published theme"),
            Err(_) => debug!(key = %encoded, "no observers for theme"),
        }
        self.theme_cache.put(&encoded, computed).await;
        pending.themes.remove(&encoded);
    }

    async fn on_theme_failed(&self, encoded: &str) {
        if self.pending.lock().await.themes.remove(encoded) {
            debug!(key = %encoded, "theme derivation failed, key may be requested again");
        }
    }

    /// One run of the fallback chain.
    async fn resolve(&self, key: &str, composite: &CompositeKey, encoded: &str) -> Resolution {
        let mut pending = self.pending.lock().await;

        if pending.themes.contains(encoded)
            || pending.swatches.contains(key)
            || self.theme_pipeline.contains_key(composite)
            || self.quantizer.contains_key(key)
        {
            debug!(key = %encoded, "computation in flight, waiting for result");
            return Resolution::Pending;
        }

        if let Some(computed) = self.theme_cache.get_memory(encoded) {
            return Resolution::Ready(computed.theme);
        }

        if let Some(computed) = self.theme_cache.promote_from_disk(encoded).await {
            return Resolution::Ready(computed.theme);
        }

        if self.gate.is_active() {
            if let Some(swatch) = self.swatch_cache.get_memory(key) {
                debug!(key = %encoded, "re-deriving theme from cached swatch");
                self.theme_pipeline.queue(key, swatch, composite.params());
                pending.themes.insert(encoded.to_string());
                return Resolution::Pending;
            }
        }

        Resolution::Missing
    }

    async fn hydrate(&self) {
        if let Some(ttl) = self.config.disk_ttl {
            if let Err(e) = self.swatch_cache.prune_disk(ttl).await {
                warn!(error = %e, "failed to prune swatch disk tier");
            }
            if let Err(e) = self.theme_cache.prune_disk(ttl).await {
                warn!(error = %e, "failed to prune theme disk tier");
            }
        }

        if let Err(e) = self.swatch_cache.hydrate().await {
            warn!(error = %e, "swatch hydration failed, starting cold");
        }
        if let Err(e) = self.theme_cache.hydrate().await {
            warn!(error = %e, "theme hydration failed, starting cold");
        }
    }
}

async fn forward_swatches(shared: Arc<Shared>, mut feed: mpsc::Receiver<StageEvent<Swatch>>) {
    while let Some(event) = feed.recv().await {
        match event {
            StageEvent::Completed { key, output } => shared.on_swatch(key, output).await,
            StageEvent::Failed { key } => shared.on_swatch_failed(&key).await,
        }
    }
    info!("quantizer feed closed");
}

async fn forward_themes(shared: Arc<Shared>, mut feed: mpsc::Receiver<StageEvent<ComputedTheme>>) {
    while let Some(event) = feed.recv().await {
        match event {
            StageEvent::Completed { output, .. } => shared.on_theme(output).await,
            StageEvent::Failed { key } => shared.on_theme_failed(&key).await,
        }
    }
    info!("theme feed closed");
}

/// Orchestrates both pipelines and both cache tiers.
///
/// Hold it behind an `Arc` and share it; every method takes `&self`.
pub struct CachingThemeManager {
    shared: Arc<Shared>,
    initialized: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CachingThemeManager {
    /// # Errors
    ///
    /// Returns a `ConfigError` when `config` fails validation.
    pub fn new(
        config: EngineConfig,
        gate: Arc<FeatureGate>,
        quantizer: Arc<dyn QuantizerPipeline>,
        theme_pipeline: Arc<dyn ThemePipeline>,
        swatch_disk: Arc<dyn DiskCache<Swatch>>,
        theme_disk: Arc<dyn DiskCache<ComputedTheme>>,
    ) -> SwatchbookResult<Self> {
        config.validate()?;

        let (theme_tx, _) = broadcast::channel(config.theme_channel_capacity);
        let (swatch_ready, _) = broadcast::channel(config.theme_channel_capacity);
        let (shutdown, _) = watch::channel(false);

        let shared = Shared {
            swatch_cache: TieredCache::new(
                "swatch",
                MemoryCache::new(config.swatch_policy()),
                swatch_disk,
            ),
            theme_cache: TieredCache::new(
                "theme",
                MemoryCache::new(config.theme_policy()),
                theme_disk,
            ),
            config,
            gate,
            quantizer,
            theme_pipeline,
            theme_tx,
            swatch_ready,
            shutdown,
            pending: tokio::sync::Mutex::new(Pending::default()),
        };

        Ok(Self {
            shared: Arc::new(shared),
            initialized: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start hydration and the pipeline output tasks.
    ///
    /// Idempotent. Must be called from within a tokio runtime. Hydration
    /// runs in the background; this returns immediately. Pipeline feeds are
    /// attached before returning, so no outcome produced afterwards is lost.
    pub fn initialize(&self) {
        if *self.shared.shutdown.borrow() {
            warn!("theme manager is shut down, not initializing");
            return;
        }
        if self.initialized.swap(true, Ordering::AcqRel) {
            debug!("theme manager already initialized");
            return;
        }

        let swatch_feed = self.shared.quantizer.attach();
        let theme_feed = self.shared.theme_pipeline.attach();

        let hydration = {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move { shared.hydrate().await })
        };
        let swatches = tokio::spawn(forward_swatches(Arc::clone(&self.shared), swatch_feed));
        let themes = tokio::spawn(forward_themes(Arc::clone(&self.shared), theme_feed));

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([hydration, swatches, themes]);

        info!("theme manager initialized");
    }

    /// Stop background tasks and end every observer stream.
    ///
    /// Terminal: a later `initialize` is a no-op.
    pub fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in &tasks {
            task.abort();
        }
        if !tasks.is_empty() {
            info!(tasks = tasks.len(), "theme manager shut down");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Request a swatch (and its default theme) for `key`.
    ///
    /// No-op when the gate is off, when a quantization for `key` is already
    /// pending, or when the swatch is cached in either tier.
    pub async fn enqueue_image(&self, key: &str, image: SourceImage) {
        let shared = &self.shared;
        if !shared.gate.is_active() {
            debug!(key, "theming disabled, ignoring image");
            return;
        }

        let mut pending = shared.pending.lock().await;

        if pending.swatches.contains(key) || shared.quantizer.contains_key(key) {
            debug!(key, "quantization already in flight");
            return;
        }
        if shared.swatch_cache.contains_memory(key) {
            debug!(key, "swatch cached in memory");
            return;
        }
        if shared.swatch_cache.contains_disk(key).await {
            debug!(key, "swatch cached on disk");
            return;
        }

        debug!(key, "queueing quantization");
        shared.quantizer.queue(key, image);
        pending.swatches.insert(key.to_string());
    }

    /// Request a default-parameter theme for `key` from a single seed color,
    /// bypassing quantization.
    ///
    /// No-op when the gate is off, or when the default theme for `key` is
    /// in flight or cached in either tier.
    pub async fn enqueue_seed(&self, key: &str, seed: Rgb) {
        let shared = &self.shared;
        if !shared.gate.is_active() {
            debug!(key, "theming disabled, ignoring seed");
            return;
        }

        let params = GenerationParameters::default();
        let composite = CacheKeyBuilder::build_with(key, &params);
        let encoded = composite.encode();

        let mut pending = shared.pending.lock().await;

        if pending.themes.contains(&encoded) || shared.theme_pipeline.contains_key(&composite) {
            debug!(key = %encoded, "default theme already in flight");
            return;
        }
        if shared.theme_cache.contains(&encoded).await {
            debug!(key = %encoded, "default theme already cached");
            return;
        }

        debug!(key = %encoded, seed = %seed, "queueing theme from seed");
        shared
            .theme_pipeline
            .queue(key, Swatch::from_seed(seed), params);
        pending.themes.insert(encoded);
    }

    /// Observe the theme for `key` under the given parameters.
    pub fn observe_theme_for(
        &self,
        key: &str,
        color_selector: ColorSelector,
        schema: Schema,
        contrast: ContrastLevel,
        spec_version: SpecVersion,
    ) -> ThemeStream {
        let params = GenerationParameters::new(color_selector, schema, contrast, spec_version);
        self.observe_theme(key, &params)
    }

    /// Observe the theme for `key` under `params`.
    ///
    /// The stream first runs the fallback chain, then follows live results
    /// for the same composite key. Consecutive duplicates are suppressed.
    /// While no theme has been seen, a swatch landing for `key` re-runs the
    /// chain; after a broadcast lag the memory tier is re-read.
    pub fn observe_theme(&self, key: &str, params: &GenerationParameters) -> ThemeStream {
        let shared = Arc::clone(&self.shared);
        let key = key.to_string();
        let composite = CacheKeyBuilder::build_with(&key, params);
        let encoded = composite.encode();

        // Subscribed here, before any lookup runs.
        let mut themes = shared.theme_tx.subscribe();
        let mut ready = shared.swatch_ready.subscribe();
        let mut shutdown = shared.shutdown.subscribe();

        Box::pin(stream! {
            let mut last: Option<Option<Theme>> = None;
            let mut waiting = true;

            match shared.resolve(&key, &composite, &encoded).await {
                Resolution::Ready(theme) => {
                    waiting = false;
                    last = Some(Some(theme.clone()));
                    yield Some(theme);
                }
                Resolution::Pending => {}
                Resolution::Missing => {
                    last = Some(None);
                    yield None;
                }
            }

            let mut live = !*shutdown.borrow();

            while live {
                let step = tokio::select! {
                    received = themes.recv() => match received {
                        Ok(computed) if computed.source_key == key && computed.composite_key == composite => {
                            Step::Emit(computed.theme)
                        }
                        Ok(_) => Step::Skip,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(key = %encoded, skipped, "observer lagged, resyncing from cache");
                            Step::Resync
                        }
                        Err(RecvError::Closed) => Step::Stop,
                    },
                    received = ready.recv(), if waiting => match received {
                        Ok(ready_key) if ready_key == key => Step::Rerun,
                        Ok(_) => Step::Skip,
                        Err(RecvError::Lagged(_)) => Step::Rerun,
                        Err(RecvError::Closed) => Step::Stop,
                    },
                    _ = shutdown.changed() => Step::Stop,
                };

                let next = match step {
                    Step::Emit(theme) => Some(Some(theme)),
                    Step::Rerun => match shared.resolve(&key, &composite, &encoded).await {
                        Resolution::Ready(theme) => Some(Some(theme)),
                        Resolution::Pending => None,
                        Resolution::Missing => Some(None),
                    },
                    Step::Resync => shared
                        .theme_cache
                        .get_memory(&encoded)
                        .map(|computed| Some(computed.theme)),
                    Step::Skip => None,
                    Step::Stop => {
                        live = false;
                        None
                    }
                };

                if let Some(value) = next {
                    if last.as_ref() != Some(&value) {
                        if value.is_some() {
                            waiting = false;
                        }
                        last = Some(value.clone());
                        yield value;
                    }
                }
            }
        })
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            swatches: self.shared.swatch_cache.stats(),
            themes: self.shared.theme_cache.stats(),
        }
    }

    pub fn gate(&self) -> &FeatureGate {
        &self.shared.gate
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }
}

impl Drop for CachingThemeManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
