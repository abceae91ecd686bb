//! Воркер для липсинка на модели LatentSync-1.5
//!
//! Готовит веса модели, скачивает входные видео и аудио, запускает внешний
//! скрипт инференса и при необходимости выгружает результат в объектное
//! хранилище.

pub mod config;
pub mod errors;
pub mod handler;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::errors::WorkerResult;
use crate::handler::JobHandler;
use crate::services::ModelProvisioner;

/// Build the provisioner, prepare the model cache and return a ready handler
pub async fn start_worker(config: &WorkerConfig) -> WorkerResult<JobHandler> {
    let provisioner = Arc::new(ModelProvisioner::new(config)?);

    log::info!("Initializing model cache...");
    provisioner.ensure_ready().await?;
    log::info!("Model cache initialized");

    JobHandler::new(config, provisioner)
}
