//! Population-bucket quantizer.

use swatchbook_core::{
    PipelineError, Rgb, SourceImage, Swatch, SwatchColor, SwatchbookResult,
};
use tokio::sync::{broadcast, mpsc};

use crate::contract::{QuantizerPipeline, StageEvent};
use crate::stage::{Stage, StagePipeline};

const BITS: u32 = 5;
const SHIFT: u32 = 8 - BITS;
const BUCKETS: usize = 1 << (BITS * 3);

#[derive(Clone, Copy, Default)]
struct Bucket {
    count: u32,
    r: u64,
    g: u64,
    b: u64,
}

/// Reduces an RGBA image to its most populated colors.
///
/// Pixels are binned into a 5-bit-per-channel histogram; the `max_colors`
/// fullest bins are averaged into swatch colors. Pixels with alpha below
/// `alpha_threshold` are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulationQuantizer {
    pub max_colors: usize,
    pub alpha_threshold: u8,
}

impl Default for PopulationQuantizer {
    fn default() -> Self {
        Self {
            max_colors: 16,
            alpha_threshold: 125,
        }
    }
}

impl PopulationQuantizer {
    pub fn new(max_colors: usize) -> Self {
        Self {
            max_colors: max_colors.max(1),
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// Returns `PipelineError::EmptySwatch` when no pixel is opaque enough.
    pub fn quantize(&self, image: &SourceImage) -> SwatchbookResult<Swatch> {
        let mut histogram = vec![Bucket::default(); BUCKETS];

        for px in image.pixels().chunks_exact(4) {
            if px[3] < self.alpha_threshold {
                continue;
            }
            let index = ((px[0] as usize >> SHIFT) << (2 * BITS))
                | ((px[1] as usize >> SHIFT) << BITS)
                | (px[2] as usize >> SHIFT);
            let bucket = &mut histogram[index];
            bucket.count += 1;
            bucket.r += px[0] as u64;
            bucket.g += px[1] as u64;
            bucket.b += px[2] as u64;
        }

        let mut filled: Vec<Bucket> = histogram.into_iter().filter(|b| b.count > 0).collect();
        if filled.is_empty() {
            return Err(PipelineError::EmptySwatch.into());
        }
        filled.sort_by(|a, b| b.count.cmp(&a.count));
        filled.truncate(self.max_colors);

        let colors = filled
            .into_iter()
            .map(|b| {
                let n = b.count as u64;
                SwatchColor {
                    color: Rgb::new((b.r / n) as u8, (b.g / n) as u8, (b.b / n) as u8),
                    population: b.count,
                }
            })
            .collect();

        Swatch::from_colors(colors)
    }
}

/// [`PopulationQuantizer`] as a pipeline stage, keyed by base key.
#[derive(Debug, Clone, Default)]
pub struct QuantizeStage {
    quantizer: PopulationQuantizer,
}

impl QuantizeStage {
    pub fn new(quantizer: PopulationQuantizer) -> Self {
        Self { quantizer }
    }
}

impl Stage for QuantizeStage {
    type Input = SourceImage;
    type Output = Swatch;
    const NAME: &'static str = "quantizer";

    fn compute(&self, _key: &str, image: SourceImage) -> SwatchbookResult<Swatch> {
        self.quantizer.quantize(&image)
    }
}

impl QuantizerPipeline for StagePipeline<QuantizeStage> {
    fn queue(&self, key: &str, image: SourceImage) {
        self.submit(key.to_string(), key.to_string(), image);
    }

    fn subscribe(&self) -> broadcast::Receiver<(String, Swatch)> {
        self.subscribe_output()
    }

    fn attach(&self) -> mpsc::Receiver<StageEvent<Swatch>> {
        self.attach_feed()
    }

    fn contains_key(&self, key: &str) -> bool {
        self.is_in_flight(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageConfig;
    use std::time::Duration;
    use swatchbook_core::SwatchbookError;

    fn two_tone(a: Rgb, a_count: usize, b: Rgb, b_count: usize) -> SourceImage {
        let mut pixels = Vec::new();
        for _ in 0..a_count {
            pixels.extend_from_slice(&[a.r, a.g, a.b, 255]);
        }
        for _ in 0..b_count {
            pixels.extend_from_slice(&[b.r, b.g, b.b, 255]);
        }
        SourceImage::new((a_count + b_count) as u32, 1, pixels).unwrap()
    }

    #[test]
    fn test_solid_image_yields_single_color() {
        let image = SourceImage::solid(8, 8, Rgb::new(200, 16, 64)).unwrap();
        let swatch = PopulationQuantizer::default().quantize(&image).unwrap();
        assert_eq!(swatch.colors.len(), 1);
        assert_eq!(swatch.dominant, Rgb::new(200, 16, 64));
        assert_eq!(swatch.colors[0].population, 64);
    }

    #[test]
    fn test_dominant_is_most_populated() {
        let red = Rgb::new(220, 20, 20);
        let blue = Rgb::new(20, 20, 220);
        let image = two_tone(red, 3, blue, 9);
        let swatch = PopulationQuantizer::default().quantize(&image).unwrap();
        assert_eq!(swatch.dominant, blue);
        assert_eq!(swatch.colors[1].color, red);
    }

    #[test]
    fn test_transparent_pixels_ignored() {
        let image = SourceImage::new(2, 1, vec![10, 10, 10, 0, 250, 0, 0, 255]).unwrap();
        let swatch = PopulationQuantizer::default().quantize(&image).unwrap();
        assert_eq!(swatch.colors.len(), 1);
        assert_eq!(swatch.dominant, Rgb::new(250, 0, 0));
    }

    #[test]
    fn test_fully_transparent_is_empty() {
        let image = SourceImage::new(1, 1, vec![255, 255, 255, 0]).unwrap();
        let err = PopulationQuantizer::default().quantize(&image).unwrap_err();
        assert!(matches!(
            err,
            SwatchbookError::Pipeline(PipelineError::EmptySwatch)
        ));
    }

    #[test]
    fn test_max_colors_truncates() {
        let mut pixels = Vec::new();
        for i in 0..10u8 {
            pixels.extend_from_slice(&[i * 25, 255 - i * 25, 0, 255]);
        }
        let image = SourceImage::new(10, 1, pixels).unwrap();
        let swatch = PopulationQuantizer::new(3).quantize(&image).unwrap();
        assert_eq!(swatch.colors.len(), 3);
    }

    #[tokio::test]
    async fn test_pipeline_contract() {
        let pipeline = StagePipeline::new(QuantizeStage::default(), StageConfig::default());
        let mut rx = QuantizerPipeline::subscribe(&pipeline);

        let image = SourceImage::solid(4, 4, Rgb::new(0, 128, 255)).unwrap();
        QuantizerPipeline::queue(&pipeline, "book-1", image);
        assert!(QuantizerPipeline::contains_key(&pipeline, "book-1"));

        let (key, swatch) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(key, "book-1");
        assert_eq!(swatch.dominant, Rgb::new(0, 128, 255));
    }

    #[tokio::test]
    async fn test_failed_quantization_reported_on_feed() {
        let pipeline = StagePipeline::new(QuantizeStage::default(), StageConfig::default());
        let mut feed = QuantizerPipeline::attach(&pipeline);

        let transparent = SourceImage::new(1, 1, vec![255, 255, 255, 0]).unwrap();
        QuantizerPipeline::queue(&pipeline, "book-2", transparent);

        let event = tokio::time::timeout(Duration::from_secs(5), feed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            StageEvent::Failed {
                key: "book-2".to_string()
            }
        );
    }
}
