//! End-to-end tests with the reference pipelines and LMDB tiers.

use std::sync::Arc;
use std::time::Duration;

use swatchbook_engine::{CachingThemeManager, EngineConfig, FeatureGate};
use swatchbook_pipeline::{
    PopulationQuantizer, QuantizeStage, StagePipeline, ThemeStage, TonalThemeGenerator,
};
use swatchbook_storage::{LmdbDiskCache, LmdbStore};
use swatchbook_test_utils::fixtures::{self, BLUE};
use swatchbook_test_utils::waiting::{next_within, wait_for};
use swatchbook_test_utils::*;

const WAIT: Duration = Duration::from_secs(5);

struct Stack {
    manager: CachingThemeManager,
    theme_disk: Arc<LmdbDiskCache<ComputedTheme>>,
}

fn build(store: &LmdbStore, config: EngineConfig) -> Stack {
    let swatch_disk = Arc::new(LmdbDiskCache::<Swatch>::open(store).unwrap());
    let theme_disk = Arc::new(LmdbDiskCache::<ComputedTheme>::open(store).unwrap());
    let quantizer = Arc::new(StagePipeline::new(
        QuantizeStage::new(PopulationQuantizer::default()),
        config.stage_config(),
    ));
    let themes = Arc::new(StagePipeline::new(
        ThemeStage::new(TonalThemeGenerator::new()),
        config.stage_config(),
    ));
    let manager = CachingThemeManager::new(
        config,
        Arc::new(FeatureGate::enabled()),
        quantizer,
        themes,
        swatch_disk,
        theme_disk.clone(),
    )
    .unwrap();
    manager.initialize();
    Stack {
        manager,
        theme_disk,
    }
}

async fn first_theme(stream: &mut swatchbook_engine::ThemeStream) -> Option<Theme> {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        match next_within(stream, WAIT).await {
            Some(Some(theme)) => return Some(theme),
            Some(None) => continue,
            None => return None,
        }
    }
    None
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_image_to_theme_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default().with_cache_dir(dir.path());
    let store = LmdbStore::open(dir.path(), config.lmdb_map_size_mb).unwrap();
    let params = GenerationParameters::default();
    let encoded = CacheKeyBuilder::build_default("book-42").encode();

    let theme = {
        let stack = build(&store, config.clone());
        let mut stream = stack.manager.observe_theme("book-42", &params);
        stack
            .manager
            .enqueue_image("book-42", fixtures::solid_image(BLUE))
            .await;

        let theme = first_theme(&mut stream).await.expect("theme was produced");
        let disk = stack.theme_disk.clone();
        assert!(wait_for(|| disk.len().unwrap_or(0) == 1, WAIT).await);
        theme
    };

    // Fresh manager over the same environment: served from disk, nothing recomputed.
    let stack = build(&store, config);
    let mut stream = stack.manager.observe_theme("book-42", &params);
    assert_eq!(first_theme(&mut stream).await, Some(theme.clone()));
    assert_eq!(stack.theme_disk.len().unwrap(), 1);

    let stored = CompositeKey::decode(&encoded).unwrap();
    assert_eq!(stored.base_key(), "book-42");
    assert_eq!(stored.params(), params);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_seed_theme_with_real_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default().with_cache_dir(dir.path());
    let store = LmdbStore::open(dir.path(), config.lmdb_map_size_mb).unwrap();
    let stack = build(&store, config);

    let mut stream = stack
        .manager
        .observe_theme("radio-1", &GenerationParameters::default());
    stack.manager.enqueue_seed("radio-1", BLUE).await;

    let theme = first_theme(&mut stream).await.expect("theme was produced");
    assert_eq!(theme.seed, BLUE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_seed_burst_through_tiny_stage_buffers_is_fully_cached() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default().with_cache_dir(dir.path());
    config.stage_output_capacity = 1;
    let store = LmdbStore::open(dir.path(), config.lmdb_map_size_mb).unwrap();
    let stack = build(&store, config);

    let burst = 50;
    for i in 0..burst {
        stack
            .manager
            .enqueue_seed(&format!("radio-{i}"), BLUE)
            .await;
    }

    let disk = stack.theme_disk.clone();
    assert!(wait_for(|| disk.len().unwrap_or(0) == burst, WAIT).await);
    assert_eq!(stack.manager.stats().themes.entry_count, burst);
}
