use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;

use crate::error::{ClassificationError, ModelLoadError};
use crate::types::Id2Label;

/// A loaded, ready-to-use image classifier.
///
/// Implementations must be read-only after construction so one instance can
/// serve concurrent requests. `predict` is blocking and should be called off
/// the async runtime.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    fn id2label(&self) -> &Id2Label;

    /// Normalized class probabilities for one image, indexed by class id.
    fn predict(&self, image: &DynamicImage) -> Result<Vec<f32>, ClassificationError>;
}

pub type ModelHandle = Arc<dyn Classifier>;

#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<ModelHandle, ModelLoadError>;
}
