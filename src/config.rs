use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::candle_engine::CandleConfig;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Model ID from Hugging Face Hub
    #[arg(long, env = "MODEL_ID")]
    pub model_id: Option<String>,

    /// Local path to the model artifact directory
    #[arg(long, env = "MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Model revision/branch on Hugging Face
    #[arg(long, env = "MODEL_REVISION", default_value = "main")]
    pub model_revision: String,

    /// Run on CPU instead of GPU
    #[arg(long, env = "CPU_ONLY")]
    pub cpu_only: bool,

    /// Labels mapping in format "0=biryani,1=dosa"
    #[arg(long, env = "ID2LABEL")]
    pub id2label: Option<String>,

    /// Maximum accepted upload size in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value = "10485760")]
    pub max_upload_bytes: usize,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn parse_id2label(&self) -> Option<HashMap<u32, String>> {
        self.id2label.as_ref().map(|labels| {
            labels
                .split(',')
                .filter_map(|pair| {
                    let mut parts = pair.splitn(2, '=');
                    let id = parts.next()?.trim().parse().ok()?;
                    let label = parts.next()?.trim().to_string();
                    Some((id, label))
                })
                .collect()
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn has_model_source(&self) -> bool {
        self.model_id.is_some() || self.model_path.is_some()
    }
}

impl From<&Config> for CandleConfig {
    fn from(config: &Config) -> Self {
        Self {
            model_id: config.model_id.clone(),
            model_path: config.model_path.clone(),
            revision: config.model_revision.clone(),
            cpu: config.cpu_only,
            id2label: config.parse_id2label(),
        }
    }
}
