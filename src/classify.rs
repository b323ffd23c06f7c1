use image::{DynamicImage, ImageFormat};
use metrics::{counter, histogram};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crate::engine::ModelHandle;
use crate::error::{ClassificationError, ClassifyError, ImageDecodeError};
use crate::provider::ModelProvider;
use crate::types::{Id2Label, Prediction, PredictionSet};

pub const TOP_K: usize = 5;

/// Decodes an upload, accepting only JPEG and PNG content.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ImageDecodeError> {
    if bytes.is_empty() {
        return Err(ImageDecodeError::Empty);
    }

    let format =
        image::guess_format(bytes).map_err(|e| ImageDecodeError::Malformed(e.to_string()))?;
    if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
        return Err(ImageDecodeError::UnsupportedFormat(format!("{format:?}")));
    }

    image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ImageDecodeError::Malformed(e.to_string()))
}

/// Picks the `k` most probable classes, highest first.
///
/// Ties keep the model's class order. Classes without a label are reported as
/// `LABEL_<id>`.
pub fn top_k(
    probs: &[f32],
    id2label: &Id2Label,
    k: usize,
) -> Result<Vec<Prediction>, ClassificationError> {
    if probs.is_empty() || probs.len() != id2label.len() {
        return Err(ClassificationError::OutputShape {
            expected: id2label.len(),
            actual: probs.len(),
        });
    }
    if let Some((class_id, &score)) = probs
        .iter()
        .enumerate()
        .find(|(_, p)| !p.is_finite() || !(0.0..=1.0).contains(*p))
    {
        return Err(ClassificationError::InvalidScore { class_id, score });
    }

    let mut ranked: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    Ok(ranked
        .into_iter()
        .take(k)
        .map(|(index, confidence)| {
            let class_id = index as u32;
            let label = id2label
                .get(&class_id)
                .cloned()
                .unwrap_or_else(|| format!("LABEL_{class_id}"));
            Prediction {
                class_id,
                label,
                confidence,
            }
        })
        .collect())
}

fn rank(model: &ModelHandle, image: &DynamicImage) -> Result<PredictionSet, ClassificationError> {
    let probs = model.predict(image)?;
    let predictions = top_k(&probs, model.id2label(), TOP_K)?;
    Ok(PredictionSet {
        model: model.name().to_string(),
        predictions,
    })
}

/// Runs a decoder on the blocking pool. A failed task is a server fault, not a
/// bad upload.
async fn decode_off_runtime<F>(
    decode: F,
) -> Result<Result<DynamicImage, ImageDecodeError>, ClassificationError>
where
    F: FnOnce() -> Result<DynamicImage, ImageDecodeError> + Send + 'static,
{
    tokio::task::spawn_blocking(decode)
        .await
        .map_err(|e| ClassificationError::Task(e.to_string()))
}

/// Turns uploaded images into ranked predictions using the shared model.
#[derive(Clone)]
pub struct ClassificationService {
    provider: Arc<ModelProvider>,
}

impl ClassificationService {
    pub fn new(provider: Arc<ModelProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<ModelProvider> {
        &self.provider
    }

    #[tracing::instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub async fn classify(&self, image: DynamicImage) -> Result<PredictionSet, ClassifyError> {
        counter!("classification_requests_total").increment(1);
        let result = self.run(image).await;
        if let Err(e) = &result {
            counter!("classification_errors_total", "kind" => e.kind()).increment(1);
            tracing::warn!(error = %e, "Classification failed");
        }
        result
    }

    #[tracing::instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub async fn classify_upload(&self, bytes: Vec<u8>) -> Result<PredictionSet, ClassifyError> {
        match decode_off_runtime(move || decode_image(&bytes)).await {
            Ok(Ok(image)) => self.classify(image).await,
            Ok(Err(e)) => {
                counter!("classification_requests_total").increment(1);
                counter!("classification_errors_total", "kind" => "decode").increment(1);
                tracing::info!(error = %e, "Rejected upload");
                Err(e.into())
            }
            Err(e) => {
                counter!("classification_requests_total").increment(1);
                counter!("classification_errors_total", "kind" => "classification").increment(1);
                tracing::error!(error = %e, "Decoder task failed");
                Err(e.into())
            }
        }
    }

    async fn run(&self, image: DynamicImage) -> Result<PredictionSet, ClassifyError> {
        let model = self.provider.get_model().await?;

        let start = Instant::now();
        let set = tokio::task::spawn_blocking(move || rank(&model, &image))
            .await
            .map_err(|e| ClassificationError::Task(e.to_string()))??;
        histogram!("classification_inference_seconds").record(start.elapsed().as_secs_f64());

        tracing::debug!(
            top = set.predictions.first().map(|p| p.label.as_str()),
            "Classification completed"
        );
        Ok(set)
    }
}
