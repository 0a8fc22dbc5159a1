//! HTTP client for the external image-classification model.
//!
//! Sends `POST {base_url}/classify` with the image reference and the
//! reporter's hint, and expects
//! `{"category": "...", "confidence": 0.0..1.0, "severity_hint": 0..100}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use urbanwatch_core::category::IssueCategory;
use urbanwatch_core::classification::Classification;
use urbanwatch_core::observation::Observation;

use crate::{Classifier, ClassifierError};

/// Request body for `/classify`.
#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    image_ref: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    category_hint: Option<IssueCategory>,
}

/// Raw model answer before contract checks.
#[derive(Debug, Deserialize)]
pub struct ClassifyResponse {
    #[serde(alias = "label")]
    pub category: String,
    pub confidence: f64,
    #[serde(alias = "severity")]
    pub severity_hint: f64,
}

/// HTTP client for one model service.
pub struct HttpClassifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClassifier {
    /// * `base_url` - e.g. `http://classifier:8000`. A trailing slash is ignored.
    /// * `request_timeout` - transport-level timeout for a single request.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ClassifierError::Unavailable(format!("client build failed: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ---- private helpers ----

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ClassifierError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ClassifierError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Decode and validate a model answer.
pub fn parse_classification(body: &[u8]) -> Result<Classification, ClassifierError> {
    let raw: ClassifyResponse = serde_json::from_slice(body)
        .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))?;
    let category: IssueCategory = raw
        .category
        .parse()
        .map_err(|e| ClassifierError::InvalidResponse(format!("{e}")))?;
    Classification::from_model(category, raw.confidence, raw.severity_hint)
        .map_err(|e| ClassifierError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, observation: &Observation) -> Result<Classification, ClassifierError> {
        let body = ClassifyRequest {
            image_ref: &observation.image_ref,
            category_hint: observation.category_hint,
        };

        let response = self
            .client
            .post(format!("{}/classify", self.base_url))
            .json(&body)
            .send()
            .await?;

        let bytes = Self::ensure_success(response).await?.bytes().await?;
        parse_classification(&bytes)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
