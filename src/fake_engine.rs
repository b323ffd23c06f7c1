use async_trait::async_trait;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::engine::{Classifier, ModelHandle, ModelLoader};
use crate::error::{ClassificationError, ModelLoadError};
use crate::types::Id2Label;

/// Deterministic classifier keyed on the image's dominant colour channel.
///
/// Red favours class 0, green class 1, blue class 2; the score falls off with
/// distance from that class. Images narrower than two pixels fail inference.
pub struct FakeClassifier {
    id2label: Id2Label,
    output_len: Option<usize>,
    poison: Option<f32>,
}

impl FakeClassifier {
    pub fn new(num_classes: u32) -> Self {
        Self::with_labels((0..num_classes).map(|id| (id, format!("dish_{id}"))).collect())
    }

    pub fn with_labels(id2label: Id2Label) -> Self {
        Self {
            id2label,
            output_len: None,
            poison: None,
        }
    }

    pub fn with_output_len(mut self, len: usize) -> Self {
        self.output_len = Some(len);
        self
    }

    pub fn with_poison(mut self, score: f32) -> Self {
        self.poison = Some(score);
        self
    }

    fn dominant_channel(image: &DynamicImage) -> usize {
        let rgb = image.to_rgb8();
        let mut sums = [0u64; 3];
        for pixel in rgb.pixels() {
            for (sum, value) in sums.iter_mut().zip(pixel.0) {
                *sum += value as u64;
            }
        }
        (0..3).max_by_key(|&c| (sums[c], std::cmp::Reverse(c))).unwrap_or(0)
    }
}

impl Classifier for FakeClassifier {
    fn name(&self) -> &str {
        "fake"
    }

    fn id2label(&self) -> &Id2Label {
        &self.id2label
    }

    fn predict(&self, image: &DynamicImage) -> Result<Vec<f32>, ClassificationError> {
        if image.width() < 2 {
            return Err(ClassificationError::Inference(format!(
                "incompatible input width {}",
                image.width()
            )));
        }

        let len = self.output_len.unwrap_or(self.id2label.len());
        let target = Self::dominant_channel(image) as f32;
        let weights: Vec<f32> = (0..len)
            .map(|i| 1.0 / (1.0 + (i as f32 - target).abs()))
            .collect();
        let total: f32 = weights.iter().sum();
        let mut probs: Vec<f32> = weights.iter().map(|w| w / total).collect();

        if let (Some(score), Some(last)) = (self.poison, probs.last_mut()) {
            *last = score;
        }
        Ok(probs)
    }
}

pub struct FakeLoader {
    num_classes: u32,
    delay: Option<Duration>,
    fail_first: usize,
    loads: AtomicUsize,
}

impl FakeLoader {
    pub fn new(num_classes: u32) -> Self {
        Self {
            num_classes,
            delay: None,
            fail_first: 0,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_first(mut self, attempts: usize) -> Self {
        self.fail_first = attempts;
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for FakeLoader {
    async fn load(&self) -> Result<ModelHandle, ModelLoadError> {
        let attempt = self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if attempt < self.fail_first {
            return Err(ModelLoadError::NotFound {
                path: "/models/missing".into(),
            });
        }
        Ok(Arc::new(FakeClassifier::new(self.num_classes)))
    }
}

/// Loader that hands out a prebuilt classifier.
pub struct StaticLoader(pub ModelHandle);

#[async_trait]
impl ModelLoader for StaticLoader {
    async fn load(&self) -> Result<ModelHandle, ModelLoadError> {
        Ok(self.0.clone())
    }
}

pub fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb(rgb)))
}

pub fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, format).unwrap();
    bytes.into_inner()
}
