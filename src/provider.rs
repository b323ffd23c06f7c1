use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::engine::{ModelHandle, ModelLoader};
use crate::error::ModelLoadError;

/// Owns the process-wide model handle and loads it at most once.
///
/// Concurrent first callers wait on the same load. A failed load is not
/// cached, so the next call tries again.
pub struct ModelProvider {
    loader: Arc<dyn ModelLoader>,
    model: OnceCell<ModelHandle>,
}

impl ModelProvider {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            model: OnceCell::new(),
        }
    }

    pub async fn get_model(&self) -> Result<ModelHandle, ModelLoadError> {
        self.model
            .get_or_try_init(|| async {
                tracing::info!("Loading classification model");
                let model = self.loader.load().await?;
                tracing::info!(
                    model = model.name(),
                    num_classes = model.id2label().len(),
                    "Model loaded successfully"
                );
                Ok(model)
            })
            .await
            .cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }
}
