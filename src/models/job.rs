//! Модели запроса и ответа задания
//!
//! Хостинг присылает событие вида `{"input": {...}}`. Числовые поля
//! принимаются как числами, так и строками.

use std::ops::RangeInclusive;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RangePolicy;
use crate::errors::{WorkerError, WorkerResult};

pub const DEFAULT_GUIDANCE_SCALE: f64 = 2.0;
pub const DEFAULT_INFERENCE_STEPS: i64 = 20;
pub const GUIDANCE_SCALE_RANGE: RangeInclusive<f64> = 1.0..=3.0;
pub const INFERENCE_STEPS_RANGE: RangeInclusive<i64> = 20..=50;

/// Число в JSON: целое, дробное или строка с числом
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Numeric {
    fn to_f64(&self, field: &str) -> WorkerResult<f64> {
        let value = match self {
            Numeric::Int(v) => *v as f64,
            Numeric::Float(v) => *v,
            Numeric::Text(s) => s.trim().parse::<f64>().map_err(|_| invalid(field, s))?,
        };
        if !value.is_finite() {
            return Err(invalid(field, &value.to_string()));
        }
        Ok(value)
    }

    // Дробные значения отбрасывают дробную часть, строки должны быть целыми
    fn to_i64(&self, field: &str) -> WorkerResult<i64> {
        match self {
            Numeric::Int(v) => Ok(*v),
            Numeric::Float(v) if v.is_finite() => Ok(v.trunc() as i64),
            Numeric::Float(v) => Err(invalid(field, &v.to_string())),
            Numeric::Text(s) => s.trim().parse::<i64>().map_err(|_| invalid(field, s)),
        }
    }
}

fn invalid(field: &str, value: &str) -> WorkerError {
    WorkerError::Validation(format!("Invalid value for {}: {}", field, value))
}

#[derive(Debug, Deserialize)]
struct RawJobInput {
    video_url: Option<String>,
    audio_url: Option<String>,
    guidance_scale: Option<Numeric>,
    inference_steps: Option<Numeric>,
    seed: Option<Numeric>,
}

/// Одно задание на липсинк
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRequest {
    pub video_url: String,
    pub audio_url: String,
    pub guidance_scale: f64,
    pub inference_steps: i64,
    /// 0 или отрицательное значение означает случайный сид
    pub seed: i64,
}

impl JobRequest {
    /// Parse the `input` object of a hosting event
    pub fn from_event(event: &Value) -> WorkerResult<Self> {
        let input = match event.get("input") {
            Some(Value::Object(map)) if !map.is_empty() => Value::Object(map.clone()),
            _ => {
                return Err(WorkerError::Validation(
                    "No input provided in event".to_string(),
                ))
            }
        };
        Self::from_input(input)
    }

    pub fn from_input(input: Value) -> WorkerResult<Self> {
        let raw: RawJobInput = serde_json::from_value(input)
            .map_err(|e| WorkerError::Validation(format!("Malformed job input: {}", e)))?;

        let video_url = raw.video_url.filter(|s| !s.trim().is_empty());
        let audio_url = raw.audio_url.filter(|s| !s.trim().is_empty());
        let (video_url, audio_url) = match (video_url, audio_url) {
            (Some(v), Some(a)) => (v, a),
            _ => {
                return Err(WorkerError::Validation(
                    "video_url and audio_url are required.".to_string(),
                ))
            }
        };

        let guidance_scale = match &raw.guidance_scale {
            Some(n) => n.to_f64("guidance_scale")?,
            None => DEFAULT_GUIDANCE_SCALE,
        };
        let inference_steps = match &raw.inference_steps {
            Some(n) => n.to_i64("inference_steps")?,
            None => DEFAULT_INFERENCE_STEPS,
        };
        let seed = match &raw.seed {
            Some(n) => n.to_i64("seed")?,
            None => 0,
        };

        Ok(Self {
            video_url,
            audio_url,
            guidance_scale,
            inference_steps,
            seed,
        })
    }

    /// Apply the configured policy to out-of-range hyperparameters
    pub fn apply_range_policy(mut self, policy: RangePolicy) -> WorkerResult<Self> {
        let guidance_ok = GUIDANCE_SCALE_RANGE.contains(&self.guidance_scale);
        let steps_ok = INFERENCE_STEPS_RANGE.contains(&self.inference_steps);
        if guidance_ok && steps_ok {
            return Ok(self);
        }

        match policy {
            RangePolicy::PassThrough => {
                log::warn!(
                    "Passing out-of-range hyperparameters through: guidance_scale={}, inference_steps={}",
                    self.guidance_scale,
                    self.inference_steps
                );
                Ok(self)
            }
            RangePolicy::Clamp => {
                self.guidance_scale = self
                    .guidance_scale
                    .clamp(*GUIDANCE_SCALE_RANGE.start(), *GUIDANCE_SCALE_RANGE.end());
                self.inference_steps = self
                    .inference_steps
                    .clamp(*INFERENCE_STEPS_RANGE.start(), *INFERENCE_STEPS_RANGE.end());
                log::info!(
                    "Clamped hyperparameters to guidance_scale={}, inference_steps={}",
                    self.guidance_scale,
                    self.inference_steps
                );
                Ok(self)
            }
            RangePolicy::Reject if !guidance_ok => Err(WorkerError::Validation(format!(
                "guidance_scale must be between {} and {}, got {}",
                GUIDANCE_SCALE_RANGE.start(),
                GUIDANCE_SCALE_RANGE.end(),
                self.guidance_scale
            ))),
            RangePolicy::Reject => Err(WorkerError::Validation(format!(
                "inference_steps must be between {} and {}, got {}",
                INFERENCE_STEPS_RANGE.start(),
                INFERENCE_STEPS_RANGE.end(),
                self.inference_steps
            ))),
        }
    }
}

/// Ответ на задание
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobResponse {
    Local {
        output_path: String,
    },
    Remote {
        output_url: String,
    },
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl JobResponse {
    pub fn local(path: &Path) -> Self {
        JobResponse::Local {
            output_path: path.to_string_lossy().to_string(),
        }
    }

    pub fn remote(url: String) -> Self {
        JobResponse::Remote { output_url: url }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, JobResponse::Failed { .. })
    }
}

impl From<WorkerError> for JobResponse {
    fn from(err: WorkerError) -> Self {
        JobResponse::Failed {
            details: err.details().map(str::to_string),
            error: err.to_string(),
        }
    }
}
