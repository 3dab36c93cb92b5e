//! Stage contracts consumed by the theme manager.

use swatchbook_core::{CompositeKey, ComputedTheme, GenerationParameters, SourceImage, Swatch};
use tokio::sync::{broadcast, mpsc};

/// Outcome of one unit of stage work, as delivered on an attached feed.
#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent<T> {
    /// Computation finished. `key` is the base key the output belongs to.
    Completed { key: String, output: T },
    /// Computation failed or was dropped. `key` is the key the work was
    /// tracked under: the base key for quantization, the encoded composite
    /// key for themes.
    Failed { key: String },
}

/// Image → swatch stage.
///
/// `queue` never blocks and never fails visibly: a failed computation is
/// logged and produces no output. Every successful computation is published
/// exactly once on the sink returned by `subscribe`.
pub trait QuantizerPipeline: Send + Sync {
    fn queue(&self, key: &str, image: SourceImage);

    /// New receiver on the `(base key, swatch)` output sink.
    ///
    /// Best effort: a receiver that falls behind the sink capacity lags.
    fn subscribe(&self) -> broadcast::Receiver<(String, Swatch)>;

    /// Attach a lossless feed of every outcome produced from now on.
    ///
    /// The stage waits for room on the feed instead of dropping events, so
    /// the receiver must be drained.
    fn attach(&self) -> mpsc::Receiver<StageEvent<Swatch>>;

    /// True while a quantization for `key` is queued or running.
    fn contains_key(&self, key: &str) -> bool;
}

/// Swatch + parameters → theme stage.
///
/// Work is tracked per composite key, so different parameter sets for the
/// same base key run independently.
pub trait ThemePipeline: Send + Sync {
    fn queue(&self, key: &str, swatch: Swatch, params: GenerationParameters);

    /// New receiver on the `(base key, computed theme)` output sink.
    fn subscribe(&self) -> broadcast::Receiver<(String, ComputedTheme)>;

    /// Attach a lossless feed of every outcome produced from now on.
    fn attach(&self) -> mpsc::Receiver<StageEvent<ComputedTheme>>;

    /// True while a theme for `composite_key` is queued or running.
    fn contains_key(&self, composite_key: &CompositeKey) -> bool;
}
