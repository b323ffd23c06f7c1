use async_trait::async_trait;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Tensor};
use candle_nn::ops::softmax;
use candle_nn::{Func, Module, VarBuilder};
use candle_transformers::models::resnet;
use hf_hub::{Repo, RepoType, api::tokio::Api};
use image::DynamicImage;
use image::imageops::FilterType;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::engine::{Classifier, ModelHandle, ModelLoader};
use crate::error::{ClassificationError, ModelLoadError};
use crate::types::Id2Label;

const CONFIG_FILE: &str = "config.json";
const WEIGHTS_FILE: &str = "model.safetensors";

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Resnet18,
    Resnet34,
    Resnet50,
    Resnet101,
    Resnet152,
}

impl Architecture {
    fn build(
        self,
        num_classes: usize,
        vb: VarBuilder<'static>,
    ) -> candle_core::Result<Func<'static>> {
        match self {
            Self::Resnet18 => resnet::resnet18(num_classes, vb),
            Self::Resnet34 => resnet::resnet34(num_classes, vb),
            Self::Resnet50 => resnet::resnet50(num_classes, vb),
            Self::Resnet101 => resnet::resnet101(num_classes, vb),
            Self::Resnet152 => resnet::resnet152(num_classes, vb),
        }
    }
}

fn default_image_size() -> usize {
    224
}

/// Contents of the artifact's `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactConfig {
    pub architecture: Architecture,
    #[serde(default = "default_image_size")]
    pub image_size: usize,
    #[serde(default)]
    pub id2label: Option<Id2Label>,
}

#[derive(Debug, Clone)]
pub struct CandleConfig {
    pub model_id: Option<String>,
    pub model_path: Option<PathBuf>,
    pub revision: String,
    pub cpu: bool,
    pub id2label: Option<HashMap<u32, String>>,
}

impl Default for CandleConfig {
    fn default() -> Self {
        Self {
            model_id: None,
            model_path: None,
            revision: "main".to_string(),
            cpu: false,
            id2label: None,
        }
    }
}

pub struct CandleClassifier {
    name: String,
    model: Func<'static>,
    device: Device,
    id2label: Id2Label,
    image_size: usize,
}

impl CandleClassifier {
    fn device(cpu: bool) -> Result<Device, ModelLoadError> {
        if cpu {
            Ok(Device::Cpu)
        } else if metal_is_available() {
            tracing::info!("Using metal acceleration");
            Device::new_metal(0).map_err(|e| ModelLoadError::Weights(e.to_string()))
        } else if cuda_is_available() {
            tracing::info!("Using CUDA GPU acceleration");
            Device::new_cuda(0).map_err(|e| ModelLoadError::Weights(e.to_string()))
        } else {
            tracing::info!(
                "CUDA not available, running on CPU. To run on GPU, build with `--features cuda`"
            );
            Ok(Device::Cpu)
        }
    }

    pub fn from_var_builder(
        name: impl Into<String>,
        architecture: Architecture,
        image_size: usize,
        id2label: Id2Label,
        vb: VarBuilder<'static>,
        device: Device,
    ) -> Result<Self, ModelLoadError> {
        if image_size == 0 {
            return Err(ModelLoadError::InvalidConfig(
                "image_size must be positive".to_string(),
            ));
        }
        let num_classes = validate_id2label(&id2label)?;
        let model = architecture
            .build(num_classes, vb)
            .map_err(|e| ModelLoadError::Weights(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            model,
            device,
            id2label,
            image_size,
        })
    }

    /// Builds the classifier from a resolved config and weights file. Blocking.
    fn from_files(
        name: String,
        artifact: ArtifactConfig,
        id2label: Id2Label,
        weights: PathBuf,
        device: Device,
    ) -> Result<Self, ModelLoadError> {
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)
                .map_err(|e| ModelLoadError::Weights(e.to_string()))?
        };
        Self::from_var_builder(
            name,
            artifact.architecture,
            artifact.image_size,
            id2label,
            vb,
            device,
        )
    }

    fn preprocess(&self, image: &DynamicImage) -> candle_core::Result<Tensor> {
        let size = self.image_size as u32;
        let rgb = image
            .resize_to_fill(size, size, FilterType::Triangle)
            .to_rgb8()
            .into_raw();

        let pixels = Tensor::from_vec(rgb, (self.image_size, self.image_size, 3), &self.device)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?;
        let pixels = (pixels / 255.)?;

        let mean = Tensor::new(&IMAGENET_MEAN, &self.device)?.reshape((3, 1, 1))?;
        let std = Tensor::new(&IMAGENET_STD, &self.device)?.reshape((3, 1, 1))?;
        pixels.broadcast_sub(&mean)?.broadcast_div(&std)?.unsqueeze(0)
    }
}

impl Classifier for CandleClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn id2label(&self) -> &Id2Label {
        &self.id2label
    }

    #[tracing::instrument(skip(self, image), fields(model = %self.name, width = image.width(), height = image.height()))]
    fn predict(&self, image: &DynamicImage) -> Result<Vec<f32>, ClassificationError> {
        let input = self
            .preprocess(image)
            .map_err(|e| ClassificationError::Preprocess(e.to_string()))?;

        let logits = self
            .model
            .forward(&input)
            .map_err(|e| ClassificationError::Inference(e.to_string()))?;
        let probs = softmax(&logits, 1)
            .and_then(|p| p.squeeze(0))
            .and_then(|p| p.to_vec1::<f32>())
            .map_err(|e| ClassificationError::Inference(e.to_string()))?;

        Ok(probs)
    }
}

/// Labels must cover `0..n` without gaps; returns `n`.
fn validate_id2label(id2label: &Id2Label) -> Result<usize, ModelLoadError> {
    if id2label.is_empty() {
        return Err(ModelLoadError::Labels("no labels configured".to_string()));
    }
    let num_classes = id2label.len();
    if let Some(missing) = (0..num_classes as u32).find(|id| !id2label.contains_key(id)) {
        return Err(ModelLoadError::Labels(format!(
            "{num_classes} labels given but class {missing} has none"
        )));
    }
    Ok(num_classes)
}

/// Loads a candle classifier from a local artifact directory or the Hugging Face Hub.
pub struct CandleLoader {
    config: CandleConfig,
}

impl CandleLoader {
    pub fn new(config: CandleConfig) -> Self {
        Self { config }
    }

    fn model_name(&self) -> String {
        match (&self.config.model_id, &self.config.model_path) {
            (_, Some(path)) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            (Some(id), None) => id.clone(),
            (None, None) => "unknown".to_string(),
        }
    }

    async fn resolve_files(&self) -> Result<(PathBuf, PathBuf), ModelLoadError> {
        match &self.config.model_path {
            Some(base_path) => {
                if !base_path.is_dir() {
                    return Err(ModelLoadError::NotFound {
                        path: base_path.clone(),
                    });
                }
                Ok((base_path.join(CONFIG_FILE), base_path.join(WEIGHTS_FILE)))
            }
            None => {
                let Some(model_id) = &self.config.model_id else {
                    return Err(ModelLoadError::InvalidConfig(
                        "Either model_id or model_path must be specified".to_string(),
                    ));
                };

                let repo = Repo::with_revision(
                    model_id.clone(),
                    RepoType::Model,
                    self.config.revision.clone(),
                );
                let api = Api::new().map_err(|e| ModelLoadError::Hub(e.to_string()))?;
                let api = api.repo(repo);
                let config_file = api
                    .get(CONFIG_FILE)
                    .await
                    .map_err(|e| ModelLoadError::Hub(e.to_string()))?;
                let weights_file = api
                    .get(WEIGHTS_FILE)
                    .await
                    .map_err(|e| ModelLoadError::Hub(e.to_string()))?;
                Ok((config_file, weights_file))
            }
        }
    }

    fn read_artifact_config(path: &Path) -> Result<ArtifactConfig, ModelLoadError> {
        if !path.is_file() {
            return Err(ModelLoadError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| ModelLoadError::InvalidConfig(e.to_string()))
    }
}

#[async_trait]
impl ModelLoader for CandleLoader {
    #[tracing::instrument(skip(self), fields(model_id = ?self.config.model_id, model_path = ?self.config.model_path, cpu = self.config.cpu))]
    async fn load(&self) -> Result<ModelHandle, ModelLoadError> {
        let (config_file, weights_file) = self.resolve_files().await?;
        let artifact = Self::read_artifact_config(&config_file)?;

        // Command-line id2label takes precedence over the artifact's.
        let id2label = match (&self.config.id2label, &artifact.id2label) {
            (Some(id2label), _) => id2label.clone(),
            (None, Some(id2label)) => id2label.clone(),
            (None, None) => {
                return Err(ModelLoadError::Labels(
                    "Id2Label not found in the model configuration nor specified as a parameter"
                        .to_string(),
                ));
            }
        };
        validate_id2label(&id2label)?;

        if !weights_file.is_file() {
            return Err(ModelLoadError::NotFound { path: weights_file });
        }

        let device = CandleClassifier::device(self.config.cpu)?;
        let name = self.model_name();
        tracing::info!(
            architecture = ?artifact.architecture,
            image_size = artifact.image_size,
            num_classes = id2label.len(),
            "Loading weights"
        );

        let classifier = tokio::task::spawn_blocking(move || {
            CandleClassifier::from_files(name, artifact, id2label, weights_file, device)
        })
        .await
        .map_err(|e| ModelLoadError::Task(e.to_string()))??;

        Ok(Arc::new(classifier))
    }
}
