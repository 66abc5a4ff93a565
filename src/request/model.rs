//! Request records, queued tasks and the typed inference request

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::status::RequestStatus;
use crate::error::SubmissionError;

/// Opaque generation parameters, passed to workers verbatim
pub type GenerationParameters = Map<String, Value>;

/// Message published to the work queue
///
/// Serialized as `{"request_id": "<uuid>", "params": {...}}`, the shape the
/// image workers consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationTask {
    request_id: Uuid,
    #[serde(rename = "params")]
    parameters: GenerationParameters,
}

impl GenerationTask {
    pub fn new(request_id: Uuid, parameters: GenerationParameters) -> Self {
        Self {
            request_id,
            parameters,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn parameters(&self) -> &GenerationParameters {
        &self.parameters
    }

    /// Encode the wire payload
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Persisted state of one submitted request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: Uuid,
    pub status: RequestStatus,
    pub image_url: Option<String>,
    pub parameters: GenerationParameters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RequestRecord {
    /// A fresh record in `Pending` with a newly assigned id
    pub fn new_pending(parameters: GenerationParameters) -> Self {
        let now = Utc::now();
        Self {
            request_id: Uuid::new_v4(),
            status: RequestStatus::Pending,
            image_url: None,
            parameters,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task(&self) -> GenerationTask {
        GenerationTask::new(self.request_id, self.parameters.clone())
    }

    /// Client-facing projection
    pub fn view(&self) -> StatusView {
        StatusView {
            request_id: self.request_id,
            status: self.status,
            image_url: match self.status {
                RequestStatus::Completed => self.image_url.clone(),
                _ => None,
            },
        }
    }
}

/// Answer to a status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    pub request_id: Uuid,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Typed text-to-image request with the defaults workers expect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_steps")]
    pub num_inference_steps: u32,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f64,
    #[serde(default = "default_seed")]
    pub seed: i64,
}

fn default_steps() -> u32 {
    50
}

fn default_guidance_scale() -> f64 {
    7.5
}

fn default_seed() -> i64 {
    50
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            num_inference_steps: default_steps(),
            guidance_scale: default_guidance_scale(),
            seed: default_seed(),
        }
    }

    pub fn validate(&self) -> Result<(), SubmissionError> {
        if self.prompt.trim().is_empty() {
            return Err(SubmissionError::InvalidRequest(
                "prompt must not be empty".to_string(),
            ));
        }
        if self.num_inference_steps == 0 {
            return Err(SubmissionError::InvalidRequest(
                "num_inference_steps must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Flatten into the opaque parameter map carried by the task
    pub fn into_parameters(self) -> Result<GenerationParameters, SubmissionError> {
        self.validate()?;
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(SubmissionError::InvalidRequest(format!(
                "expected an object, got {other}"
            ))),
            Err(e) => Err(SubmissionError::InvalidRequest(e.to_string())),
        }
    }
}
