//! DrowsinessScorer - perception collaborator boundary
//!
//! ## Responsibilities
//!
//! - Contract: one visual sample in, an EAR-equivalent score or "no face" out
//! - HTTP adapter to the external landmark-inference service
//!
//! The core is agnostic to how the score is computed; it only consumes this
//! contract. No retry on `NoFace` - the sample is simply skipped upstream.

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of scoring one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreOutcome {
    /// EAR-equivalent score; lower means more likely eyes-closed
    Ear(f64),
    /// No face in the sample; state updates are skipped for it
    NoFace,
}

/// Scorer contract consumed by the orchestrator
#[async_trait]
pub trait DrowsinessScorer: Send + Sync {
    async fn score(&self, frame: &[u8]) -> Result<ScoreOutcome>;
}

/// Response from the inference service
#[derive(Debug, Clone, Deserialize)]
struct ScoreResponse {
    face_detected: bool,
    #[serde(default)]
    ear_value: Option<f64>,
}

/// HTTP adapter to the landmark-inference service
pub struct InferenceScorer {
    client: reqwest::Client,
    base_url: String,
    model_path: PathBuf,
}

impl InferenceScorer {
    /// Create a new scorer adapter
    pub fn new(base_url: String, model_path: PathBuf) -> Self {
        Self::with_timeout(base_url, model_path, Duration::from_secs(10))
    }

    /// Create with a custom request timeout
    pub fn with_timeout(base_url: String, model_path: PathBuf, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url,
            model_path,
        }
    }

    /// Model asset the service is asked to apply
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Check inference service health
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

#[async_trait]
impl DrowsinessScorer for InferenceScorer {
    async fn score(&self, frame: &[u8]) -> Result<ScoreOutcome> {
        let url = format!("{}/v1/score", self.base_url);

        let form = Form::new()
            .part(
                "frame",
                Part::bytes(frame.to_vec())
                    .file_name("frame.jpg")
                    .mime_str("image/jpeg")?,
            )
            .text("model", self.model_path.to_string_lossy().into_owned());

        let resp = self.client.post(&url).multipart(form).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Scorer(format!(
                "inference service returned {}",
                resp.status()
            )));
        }

        let result: ScoreResponse = resp.json().await?;

        if !result.face_detected {
            return Ok(ScoreOutcome::NoFace);
        }

        match result.ear_value {
            Some(ear) => Ok(ScoreOutcome::Ear(ear)),
            None => Err(Error::Scorer(
                "face detected but no ear_value in response".to_string(),
            )),
        }
    }
}
