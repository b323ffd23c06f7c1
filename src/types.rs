use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Class index to human readable label.
pub type Id2Label = HashMap<u32, String>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub class_id: u32,
    pub label: String,
    pub confidence: f32,
}

/// Top predictions for one image, highest confidence first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionSet {
    pub model: String,
    pub predictions: Vec<Prediction>,
}

#[derive(Debug, Serialize)]
pub struct ClassificationResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub data: Vec<ClassificationData>,
}

#[derive(Debug, Serialize)]
pub struct ClassificationData {
    pub index: usize,
    pub class_id: u32,
    pub label: String,
    pub confidence: f32,
}

impl From<PredictionSet> for ClassificationResponse {
    fn from(set: PredictionSet) -> Self {
        Self {
            id: format!("classify-{}", Uuid::new_v4().simple()),
            object: "list".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: set.model,
            data: set
                .predictions
                .into_iter()
                .enumerate()
                .map(|(index, p)| ClassificationData {
                    index,
                    class_id: p.class_id,
                    label: p.label,
                    confidence: p.confidence,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReviewRequest {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Review {
    pub id: Uuid,
    pub name: String,
    pub text: String,
    pub created: i64,
}
