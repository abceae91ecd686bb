//! Обработчик заданий
//!
//! Линейный конвейер: валидация → подготовка моделей → загрузка входов →
//! инференс → (опционально) выгрузка. Ошибка любого этапа превращается в
//! ответ `{error, details?}`; завершённые этапы не откатываются.

use std::fmt;
use std::sync::Arc;

use log::{error, info, warn};
use serde_json::Value;

use crate::config::{RangePolicy, WorkerConfig};
use crate::errors::WorkerResult;
use crate::models::{JobRequest, JobResponse};
use crate::services::{
    InferenceInvoker, InferenceParams, ModelProvisioner, RemoteFetcher, ResultPublisher,
};
use crate::utils::temp::JobScratch;

/// Этап обработки задания
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Idle,
    Validating,
    Provisioning,
    Fetching,
    Invoking,
    Publishing,
    Done,
    Failed,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStage::Idle => "idle",
            JobStage::Validating => "validating",
            JobStage::Provisioning => "provisioning",
            JobStage::Fetching => "fetching",
            JobStage::Invoking => "invoking",
            JobStage::Publishing => "publishing",
            JobStage::Done => "done",
            JobStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub struct JobHandler {
    provisioner: Arc<ModelProvisioner>,
    fetcher: RemoteFetcher,
    invoker: InferenceInvoker,
    publisher: Option<ResultPublisher>,
    range_policy: RangePolicy,
}

impl JobHandler {
    /// Build a handler around an already constructed provisioner
    pub fn new(config: &WorkerConfig, provisioner: Arc<ModelProvisioner>) -> WorkerResult<Self> {
        let publisher = match &config.storage {
            Some(storage) => Some(ResultPublisher::new(storage)?),
            None => None,
        };

        Ok(Self {
            provisioner,
            fetcher: RemoteFetcher::new(config.fetch.tool.clone()),
            invoker: InferenceInvoker::new(config),
            publisher,
            range_policy: config.range_policy,
        })
    }

    /// Handle one hosting event and produce the response payload
    pub async fn handle_event(&self, event: &Value) -> JobResponse {
        self.handle_event_traced(event).await.1
    }

    /// Same as `handle_event`, also reporting the terminal stage
    pub async fn handle_event_traced(&self, event: &Value) -> (JobStage, JobResponse) {
        let mut stage = JobStage::Idle;
        match self.run_stages(event, &mut stage).await {
            Ok(response) => {
                info!("Job completed");
                (JobStage::Done, response)
            }
            Err(e) => {
                error!("Job failed while {} ({}): {}", stage, e.kind(), e);
                (JobStage::Failed, e.into())
            }
        }
    }

    async fn run_stages(&self, event: &Value, stage: &mut JobStage) -> WorkerResult<JobResponse> {
        *stage = JobStage::Validating;
        let job = JobRequest::from_event(event)?.apply_range_policy(self.range_policy)?;

        // Обычно уже выполнено при старте воркера
        *stage = JobStage::Provisioning;
        if !self.provisioner.is_ready() {
            warn!("Model cache was not prepared at startup, provisioning now");
        }
        self.provisioner.ensure_ready().await?;

        *stage = JobStage::Fetching;
        let scratch = JobScratch::new()?;
        let video_path = self.fetcher.fetch(&job.video_url, scratch.video_dir()).await?;
        let audio_path = self.fetcher.fetch(&job.audio_url, scratch.audio_dir()).await?;

        *stage = JobStage::Invoking;
        info!(
            "Calling inference with video: {}, audio: {}",
            video_path.display(),
            audio_path.display()
        );
        let params = InferenceParams {
            video_path,
            audio_path,
            guidance_scale: job.guidance_scale,
            inference_steps: job.inference_steps,
            seed: job.seed,
        };
        let output_path = self.invoker.run(&params).await?;

        let publisher = match &self.publisher {
            Some(publisher) => publisher,
            None => return Ok(JobResponse::local(&output_path)),
        };

        *stage = JobStage::Publishing;
        match publisher.publish(&output_path).await {
            Ok(url) => Ok(JobResponse::remote(url)),
            Err(e) => {
                warn!(
                    "Result was not delivered; generated video left at {}",
                    output_path.display()
                );
                Err(e)
            }
        }
    }
}
