//! Tonal light/dark scheme generator.
//!
//! A seed color is picked from the swatch via the `ColorSelector`, turned
//! into five tonal palettes (hue + saturation pairs) according to the
//! [`Schema`], and sampled at fixed tones to fill each color role. Tones are
//! HSL lightness percentages; the contrast level pushes accent tones away
//! from the background.

use swatchbook_core::{
    CacheKeyBuilder, ColorScheme, CompositeKey, ComputedTheme, ContrastLevel,
    GenerationParameters, Hsl, Rgb, Schema, SpecVersion, Swatch, SwatchbookResult, Theme,
};
use tokio::sync::{broadcast, mpsc};

use crate::contract::{StageEvent, ThemePipeline};
use crate::stage::{Stage, StagePipeline};

const ERROR_HUE: f32 = 3.0;
const ERROR_SATURATION: f32 = 0.68;

/// Hue and saturation sampled at arbitrary tones.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TonalPalette {
    hue: f32,
    saturation: f32,
}

impl TonalPalette {
    fn new(hue: f32, saturation: f32) -> Self {
        Self {
            hue: hue.rem_euclid(360.0),
            saturation: saturation.clamp(0.0, 1.0),
        }
    }

    fn tone(&self, tone: f32) -> Rgb {
        Hsl::new(self.hue, self.saturation, tone.clamp(0.0, 100.0) / 100.0).to_rgb()
    }
}

struct Palettes {
    primary: TonalPalette,
    secondary: TonalPalette,
    tertiary: TonalPalette,
    neutral: TonalPalette,
    neutral_variant: TonalPalette,
}

impl Palettes {
    fn for_schema(seed: Rgb, schema: Schema) -> Self {
        let Hsl { h, s, .. } = seed.to_hsl();
        let p = TonalPalette::new;
        match schema {
            Schema::TonalSpot => Self {
                primary: p(h, s.min(0.48)),
                secondary: p(h, 0.16),
                tertiary: p(h + 60.0, 0.24),
                neutral: p(h, 0.04),
                neutral_variant: p(h, 0.08),
            },
            Schema::Vibrant => Self {
                primary: p(h, s.max(0.8)),
                secondary: p(h + 15.0, 0.4),
                tertiary: p(h + 60.0, 0.5),
                neutral: p(h, 0.1),
                neutral_variant: p(h, 0.12),
            },
            Schema::Expressive => Self {
                primary: p(h + 240.0, 0.4),
                secondary: p(h + 15.0, 0.24),
                tertiary: p(h + 135.0, 0.32),
                neutral: p(h + 15.0, 0.08),
                neutral_variant: p(h + 15.0, 0.12),
            },
            Schema::Neutral => Self {
                primary: p(h, 0.12),
                secondary: p(h, 0.08),
                tertiary: p(h + 60.0, 0.16),
                neutral: p(h, 0.02),
                neutral_variant: p(h, 0.02),
            },
            Schema::Monochrome => Self {
                primary: p(h, 0.0),
                secondary: p(h, 0.0),
                tertiary: p(h, 0.0),
                neutral: p(h, 0.0),
                neutral_variant: p(h, 0.0),
            },
            Schema::Fidelity => Self {
                primary: p(h, s),
                secondary: p(h, s * 0.5),
                tertiary: p(h + 180.0, s * 0.6),
                neutral: p(h, s / 12.0),
                neutral_variant: p(h, s / 8.0),
            },
            Schema::Content => Self {
                primary: p(h, s),
                secondary: p(h, (s - 0.32).max(s * 0.5)),
                tertiary: p(h + 60.0, s),
                neutral: p(h, s / 12.0),
                neutral_variant: p(h, s / 8.0),
            },
        }
    }
}

/// Tone table for one brightness mode.
struct Tones {
    accent: f32,
    on_accent: f32,
    container: f32,
    on_container: f32,
    background: f32,
    on_background: f32,
    surface_variant: f32,
    on_surface_variant: f32,
    outline: f32,
}

impl Tones {
    /// Light tones move accents darker as contrast rises.
    fn light(contrast: ContrastLevel, spec: SpecVersion) -> Self {
        let k = contrast.step();
        Self {
            accent: 40.0 - 10.0 * k,
            on_accent: 100.0,
            container: 90.0 - 5.0 * k,
            on_container: (10.0 - 10.0 * k).max(0.0),
            background: match spec {
                SpecVersion::V2021 => 99.0,
                SpecVersion::V2025 => 98.0,
            },
            on_background: 10.0 - 10.0 * k.max(0.0),
            surface_variant: 90.0,
            on_surface_variant: 30.0 - 10.0 * k,
            outline: 50.0 - 10.0 * k,
        }
    }

    /// Dark tones move accents lighter as contrast rises.
    fn dark(contrast: ContrastLevel, spec: SpecVersion) -> Self {
        let k = contrast.step();
        Self {
            accent: 80.0 + 10.0 * k,
            on_accent: (20.0 - 10.0 * k).max(0.0),
            container: 30.0 + 5.0 * k,
            on_container: (90.0 + 10.0 * k).min(100.0),
            background: match spec {
                SpecVersion::V2021 => 6.0,
                SpecVersion::V2025 => 4.0,
            },
            on_background: 90.0 + 10.0 * k.max(0.0),
            surface_variant: 30.0,
            on_surface_variant: 80.0 + 10.0 * k,
            outline: 60.0 + 10.0 * k,
        }
    }
}

/// Generates light and dark [`ColorScheme`]s from a swatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct TonalThemeGenerator;

impl TonalThemeGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, swatch: &Swatch, params: &GenerationParameters) -> Theme {
        let seed = swatch.select(params.color_selector);
        let palettes = Palettes::for_schema(seed, params.schema);
        Theme {
            seed,
            light: scheme(
                &palettes,
                &Tones::light(params.contrast, params.spec_version),
                params.spec_version,
            ),
            dark: scheme(
                &palettes,
                &Tones::dark(params.contrast, params.spec_version),
                params.spec_version,
            ),
        }
    }

    /// Generate and wrap as the artifact cached under the composite key.
    pub fn compute(
        &self,
        base_key: &str,
        swatch: &Swatch,
        params: &GenerationParameters,
    ) -> ComputedTheme {
        ComputedTheme {
            composite_key: CacheKeyBuilder::build_with(base_key, params),
            source_key: base_key.to_string(),
            theme: self.generate(swatch, params),
        }
    }
}

fn scheme(p: &Palettes, t: &Tones, spec: SpecVersion) -> ColorScheme {
    // 2025 surfaces are tinted with the primary hue.
    let surface_palette = match spec {
        SpecVersion::V2021 => p.neutral,
        SpecVersion::V2025 => TonalPalette::new(p.primary.hue, p.neutral.saturation.max(0.06)),
    };
    let error = TonalPalette::new(ERROR_HUE, ERROR_SATURATION);

    ColorScheme {
        primary: p.primary.tone(t.accent),
        on_primary: p.primary.tone(t.on_accent),
        primary_container: p.primary.tone(t.container),
        on_primary_container: p.primary.tone(t.on_container),
        secondary: p.secondary.tone(t.accent),
        on_secondary: p.secondary.tone(t.on_accent),
        tertiary: p.tertiary.tone(t.accent),
        on_tertiary: p.tertiary.tone(t.on_accent),
        background: p.neutral.tone(t.background),
        on_background: p.neutral.tone(t.on_background),
        surface: surface_palette.tone(t.background),
        on_surface: surface_palette.tone(t.on_background),
        surface_variant: p.neutral_variant.tone(t.surface_variant),
        on_surface_variant: p.neutral_variant.tone(t.on_surface_variant),
        outline: p.neutral_variant.tone(t.outline),
        error: error.tone(t.accent),
        on_error: error.tone(t.on_accent),
    }
}

/// [`TonalThemeGenerator`] as a pipeline stage, keyed by composite key.
#[derive(Debug, Clone, Default)]
pub struct ThemeStage {
    generator: TonalThemeGenerator,
}

impl ThemeStage {
    pub fn new(generator: TonalThemeGenerator) -> Self {
        Self { generator }
    }
}

impl Stage for ThemeStage {
    type Input = (Swatch, GenerationParameters);
    type Output = ComputedTheme;
    const NAME: &'static str = "theme";

    fn compute(
        &self,
        key: &str,
        (swatch, params): (Swatch, GenerationParameters),
    ) -> SwatchbookResult<ComputedTheme> {
        Ok(self.generator.compute(key, &swatch, &params))
    }
}

impl ThemePipeline for StagePipeline<ThemeStage> {
    fn queue(&self, key: &str, swatch: Swatch, params: GenerationParameters) {
        let composite = CacheKeyBuilder::build_with(key, &params);
        self.submit(composite.encode(), key.to_string(), (swatch, params));
    }

    fn subscribe(&self) -> broadcast::Receiver<(String, ComputedTheme)> {
        self.subscribe_output()
    }

    fn attach(&self) -> mpsc::Receiver<StageEvent<ComputedTheme>> {
        self.attach_feed()
    }

    fn contains_key(&self, composite_key: &CompositeKey) -> bool {
        self.is_in_flight(&composite_key.encode())
    }
}
