//! SWATCHBOOK command line entry point.
//!
//! Runs one request through the full manager (LMDB tiers, reference
//! pipelines) and prints the resulting theme as JSON.
//!
//! Usage:
//!   swatchbook seed <key> <#rrggbb>
//!   swatchbook image <key> <#rrggbb> [schema] [contrast] [spec-version]

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use swatchbook_core::{
    ComputedTheme, ConfigError, GenerationParameters, Rgb, SourceImage, StorageError, Swatch,
    SwatchbookResult,
};
use swatchbook_engine::{init_tracing, CachingThemeManager, EngineConfig, FeatureGate};
use swatchbook_pipeline::{
    PopulationQuantizer, QuantizeStage, StagePipeline, ThemeStage, TonalThemeGenerator,
};
use swatchbook_storage::{LmdbDiskCache, LmdbStore};

const RESULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Side length of the synthetic image used by `image`.
const IMAGE_SIZE: u32 = 32;

enum Command {
    Seed { key: String, seed: Rgb },
    Image {
        key: String,
        color: Rgb,
        params: GenerationParameters,
    },
}

fn usage() -> ! {
    eprintln!("Usage:");
    eprintln!("  swatchbook seed <key> <#rrggbb>");
    eprintln!("  swatchbook image <key> <#rrggbb> [schema] [contrast] [spec-version]");
    std::process::exit(2);
}

fn parse_arg<T>(field: &str, value: &str) -> SwatchbookResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(|reason| {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason,
        }
        .into()
    })
}

fn parse_command(args: &[String]) -> SwatchbookResult<Command> {
    match args {
        [cmd, key, color] if cmd == "seed" => Ok(Command::Seed {
            key: key.clone(),
            seed: parse_arg("color", color)?,
        }),
        [cmd, key, color, rest @ ..] if cmd == "image" && rest.len() <= 3 => {
            let mut params = GenerationParameters::default();
            if let Some(schema) = rest.first() {
                params = params.with_schema(parse_arg("schema", schema)?);
            }
            if let Some(contrast) = rest.get(1) {
                params = params.with_contrast(parse_arg("contrast", contrast)?);
            }
            if let Some(spec) = rest.get(2) {
                params = params.with_spec_version(parse_arg("spec", spec)?);
            }
            Ok(Command::Image {
                key: key.clone(),
                color: parse_arg("color", color)?,
                params,
            })
        }
        _ => usage(),
    }
}

#[tokio::main]
async fn main() -> SwatchbookResult<()> {
    let config = EngineConfig::from_env();
    init_tracing(config.json_logs)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_command(&args)?;

    let store = LmdbStore::open(&config.cache_dir, config.lmdb_map_size_mb)?;
    let swatch_disk = Arc::new(LmdbDiskCache::<Swatch>::open(&store)?);
    let theme_disk = Arc::new(LmdbDiskCache::<ComputedTheme>::open(&store)?);

    let quantizer = Arc::new(StagePipeline::new(
        QuantizeStage::new(PopulationQuantizer::default()),
        config.stage_config(),
    ));
    let themes = Arc::new(StagePipeline::new(
        ThemeStage::new(TonalThemeGenerator::new()),
        config.stage_config(),
    ));

    let gate = Arc::new(FeatureGate::from_config(&config));
    let manager = CachingThemeManager::new(
        config,
        gate,
        quantizer,
        themes,
        swatch_disk,
        theme_disk,
    )?;
    manager.initialize();

    let (key, mut stream) = match command {
        Command::Seed { key, seed } => {
            let stream = manager.observe_theme(&key, &GenerationParameters::default());
            manager.enqueue_seed(&key, seed).await;
            (key, stream)
        }
        Command::Image { key, color, params } => {
            let stream = manager.observe_theme(&key, &params);
            let image = SourceImage::solid(IMAGE_SIZE, IMAGE_SIZE, color)?;
            manager.enqueue_image(&key, image).await;
            (key, stream)
        }
    };

    let waited = tokio::time::timeout(RESULT_TIMEOUT, async {
        while let Some(value) = stream.next().await {
            match value {
                Some(theme) => return Some(theme),
                None => tracing::debug!(key = %key, "nothing cached yet, waiting"),
            }
        }
        None
    })
    .await;

    match waited {
        Ok(Some(theme)) => {
            let json = serde_json::to_string_pretty(&theme).map_err(|e| {
                StorageError::Serialization {
                    key: key.clone(),
                    reason: e.to_string(),
                }
            })?;
            println!("{}", json);
        }
        Ok(None) => tracing::warn!(key = %key, "theme stream ended without a result"),
        Err(_) => tracing::warn!(key = %key, timeout = ?RESULT_TIMEOUT, "timed out waiting for theme"),
    }

    let stats = manager.stats();
    tracing::info!(
        swatch_hits = stats.swatches.hits,
        theme_hits = stats.themes.hits,
        theme_misses = stats.themes.misses,
        "done"
    );
    manager.shutdown();
    Ok(())
}
