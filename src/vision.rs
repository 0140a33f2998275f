//! # Vision service client
//!
//! HTTP bindings for the three cloud vision calls the pipeline needs:
//!
//! | Call | Endpoint | Body |
//! |------|----------|------|
//! | vectorize image | `POST {endpoint}/computervision/retrieval:vectorizeImage` | raw image bytes |
//! | vectorize text | `POST {endpoint}/computervision/retrieval:vectorizeText` | `{"text": "..."}` |
//! | analyze image | `POST {endpoint}/computervision/imageanalysis:analyze` | raw image bytes |
//!
//! Every request carries the `Ocp-Apim-Subscription-Key` header plus `api-version`
//! (and `modelVersion` for retrieval calls) as query parameters.
//!
//! The pipeline does not talk to [`VisionClient`] directly but to the [`Embedder`] and
//! [`Captioner`] traits, so ingestion and queries can run against in-process fakes.
//!
//! Each call is a single request. There is no retry here; the caller decides whether a
//! failed image aborts the run or is recorded and skipped.

use reqwest::{Client, StatusCode, header::CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::{path::Path, time::Duration};
use tracing::debug;

use crate::config::AzureSettings;
use crate::error::{Result, RetrievalError};

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Features requested from the analysis endpoint. Only the caption is kept, the rest
/// travels along in [`CaptionResult::raw_features`].
pub const ANALYSIS_FEATURES: &str = "caption,tags,objects,people,read,smartCrops";

/// Turns images and text into vectors living in the same space.
#[allow(async_fn_in_trait)]
pub trait Embedder {
    async fn vectorize_image(&self, path: &Path) -> Result<Vec<f32>>;
    async fn vectorize_text(&self, text: &str) -> Result<Vec<f32>>;
}

/// Produces a caption for an image.
#[allow(async_fn_in_trait)]
pub trait Captioner {
    async fn describe_image(&self, path: &Path) -> Result<CaptionResult>;
}

/// Outcome of an image analysis call.
///
/// A response without a caption is still a successful call: `caption_text` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionResult {
    pub caption_text: Option<String>,
    pub confidence: Option<f32>,
    /// The whole analysis response, untouched.
    pub raw_features: JsonValue,
}

impl CaptionResult {
    pub fn from_analysis(raw_features: JsonValue) -> Self {
        let caption = raw_features.get("captionResult");
        let caption_text = caption
            .and_then(|c| c.get("text"))
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        let confidence = caption
            .and_then(|c| c.get("confidence"))
            .and_then(JsonValue::as_f64)
            .map(|c| c as f32);
        Self {
            caption_text,
            confidence,
            raw_features,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VectorizeResponse {
    vector: Vec<f32>,
    #[serde(default)]
    model_version: Option<String>,
}

/// Client for the cloud vision endpoints.
#[derive(Debug, Clone)]
pub struct VisionClient {
    http: Client,
    endpoint: String,
    key: String,
    api_version: String,
    model_version: String,
    dimension: usize,
}

impl VisionClient {
    /// Build a client from the `azure` settings. `dimension` is the vector length every
    /// vectorize response must have.
    pub fn new(settings: &AzureSettings, dimension: usize) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| RetrievalError::remote("client", e))?;
        debug!("Vision client created for {}", settings.endpoint);
        Ok(Self {
            http,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            key: settings.key.clone(),
            api_version: settings.api_version.clone(),
            model_version: settings.model_version.clone(),
            dimension,
        })
    }

    fn url(&self, operation: &str) -> String {
        format!("{}/computervision/{}", self.endpoint, operation)
    }

    async fn read_image(path: &Path) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    /// Send a prepared request and return the JSON body of a successful response.
    async fn send(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<JsonValue> {
        let response = request
            .header(SUBSCRIPTION_KEY_HEADER, &self.key)
            .send()
            .await
            .map_err(|e| RetrievalError::remote(operation, e))?;

        let status = response.status();
        debug!("{operation} answered {status}");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::remote(operation, status_message(status, &body)));
        }

        response
            .json::<JsonValue>()
            .await
            .map_err(|e| RetrievalError::remote(operation, format!("invalid JSON: {e}")))
    }

    fn parse_vector(&self, operation: &'static str, body: JsonValue) -> Result<Vec<f32>> {
        let parsed: VectorizeResponse = serde_json::from_value(body)
            .map_err(|e| RetrievalError::remote(operation, format!("unexpected response: {e}")))?;
        if parsed.vector.len() != self.dimension {
            return Err(RetrievalError::remote(
                operation,
                format!(
                    "vector has {} values, expected {}",
                    parsed.vector.len(),
                    self.dimension
                ),
            ));
        }
        debug!(
            "{operation} returned {} values (model {})",
            parsed.vector.len(),
            parsed.model_version.as_deref().unwrap_or("unknown")
        );
        Ok(parsed.vector)
    }
}

impl Embedder for VisionClient {
    async fn vectorize_image(&self, path: &Path) -> Result<Vec<f32>> {
        const OP: &str = "vectorizeImage";
        let bytes = Self::read_image(path).await?;
        let request = self
            .http
            .post(self.url("retrieval:vectorizeImage"))
            .query(&[
                ("api-version", self.api_version.as_str()),
                ("modelVersion", self.model_version.as_str()),
            ])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes);
        let body = self.send(OP, request).await?;
        self.parse_vector(OP, body)
    }

    async fn vectorize_text(&self, text: &str) -> Result<Vec<f32>> {
        const OP: &str = "vectorizeText";
        let request = self
            .http
            .post(self.url("retrieval:vectorizeText"))
            .query(&[
                ("api-version", self.api_version.as_str()),
                ("modelVersion", self.model_version.as_str()),
            ])
            .json(&serde_json::json!({ "text": text }));
        let body = self.send(OP, request).await?;
        self.parse_vector(OP, body)
    }
}

impl Captioner for VisionClient {
    async fn describe_image(&self, path: &Path) -> Result<CaptionResult> {
        let bytes = Self::read_image(path).await?;
        let request = self
            .http
            .post(self.url("imageanalysis:analyze"))
            .query(&[
                ("api-version", self.api_version.as_str()),
                ("features", ANALYSIS_FEATURES),
            ])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes);
        let body = self.send("analyze", request).await?;
        Ok(CaptionResult::from_analysis(body))
    }
}

fn status_message(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    }
}
