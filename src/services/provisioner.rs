//! Подготовка весов модели
//!
//! Скачивает LatentSync-1.5 с Hugging Face Hub в локальный кэш и создаёт
//! симлинки на вспомогательные модели (детектор лиц, VGG) в кэше torch hub,
//! где их ищет скрипт инференса. Выполняется не более одного раза за время
//! жизни процесса.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::config::WorkerConfig;
use crate::errors::{WorkerError, WorkerResult};
use crate::utils::tools::{check_command_in_path, run_command};

/// Источник весов модели
#[async_trait]
pub trait ModelHub: Send + Sync {
    /// Download the repository snapshot into `local_dir`
    async fn download(&self, repo_id: &str, local_dir: &Path, exclude: &[String]) -> WorkerResult<()>;
}

/// Загрузка через `huggingface-cli download`
pub struct HuggingFaceCli {
    program: String,
}

impl HuggingFaceCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ModelHub for HuggingFaceCli {
    async fn download(&self, repo_id: &str, local_dir: &Path, exclude: &[String]) -> WorkerResult<()> {
        let program = check_command_in_path(&self.program)?;

        let mut command = Command::new(program);
        command
            .arg("download")
            .arg(repo_id)
            .arg("--local-dir")
            .arg(local_dir)
            // Нужны настоящие файлы, а не ссылки в кэш хаба
            .args(["--local-dir-use-symlinks", "False"]);
        if !exclude.is_empty() {
            command.arg("--exclude").args(exclude);
        }

        let output = run_command(command)
            .await
            .map_err(|e| WorkerError::Download(format!("Failed to run {}: {}", self.program, e)))?;

        if !output.success {
            return Err(WorkerError::Download(format!(
                "{} download {} failed ({}): {}",
                self.program, repo_id, output.status, output.stderr
            )));
        }

        Ok(())
    }
}

/// Результат подготовки: где лежат веса и какие ссылки созданы
#[derive(Debug, Clone)]
pub struct ProvisionedModels {
    pub cache_dir: PathBuf,
    pub auxiliary_links: Vec<PathBuf>,
    /// Веса были скачаны в этом процессе (а не найдены в кэше)
    pub downloaded: bool,
}

/// Готовит кэш моделей; разделяется между заданиями через `Arc`
pub struct ModelProvisioner {
    repo_id: String,
    cache_dir: PathBuf,
    torch_hub_dir: PathBuf,
    checkpoint_file: String,
    exclude: Vec<String>,
    auxiliary_files: Vec<String>,
    hub: Box<dyn ModelHub>,
    state: OnceCell<ProvisionedModels>,
}

impl ModelProvisioner {
    pub fn new(config: &WorkerConfig) -> WorkerResult<Self> {
        let hub = HuggingFaceCli::new(config.model.hub_cli.clone());
        Self::with_hub(config, Box::new(hub))
    }

    pub fn with_hub(config: &WorkerConfig, hub: Box<dyn ModelHub>) -> WorkerResult<Self> {
        Ok(Self {
            repo_id: config.model.repo_id.clone(),
            cache_dir: absolute(&config.model_cache_dir())?,
            torch_hub_dir: config.torch_hub_dir()?,
            checkpoint_file: config.model.checkpoint_file.clone(),
            exclude: config.model.exclude.clone(),
            auxiliary_files: config.model.auxiliary_files.clone(),
            hub,
            state: OnceCell::new(),
        })
    }

    /// Ensure weights and auxiliary links are in place.
    ///
    /// Concurrent callers wait for the first initialization; a failed attempt
    /// leaves the provisioner uninitialized so a later call can retry.
    pub async fn ensure_ready(&self) -> WorkerResult<&ProvisionedModels> {
        self.state.get_or_try_init(|| self.provision()).await
    }

    pub fn is_ready(&self) -> bool {
        self.state.initialized()
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    async fn provision(&self) -> WorkerResult<ProvisionedModels> {
        let downloaded = self.download_weights().await?;
        let auxiliary_links = self.link_auxiliary_models().await?;

        info!("Model cache ready at {}", self.cache_dir.display());
        Ok(ProvisionedModels {
            cache_dir: self.cache_dir.clone(),
            auxiliary_links,
            downloaded,
        })
    }

    async fn download_weights(&self) -> WorkerResult<bool> {
        let checkpoint = self.cache_dir.join(&self.checkpoint_file);
        let present = tokio::fs::metadata(&checkpoint)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if present {
            info!(
                "Found {} in {}, skipping download",
                self.checkpoint_file,
                self.cache_dir.display()
            );
            return Ok(false);
        }

        info!("Downloading model files from Hugging Face Hub ({})...", self.repo_id);
        tokio::fs::create_dir_all(&self.cache_dir).await.map_err(|e| {
            WorkerError::Provisioning(format!(
                "Failed to create cache directory {}: {}",
                self.cache_dir.display(),
                e
            ))
        })?;

        self.hub
            .download(&self.repo_id, &self.cache_dir, &self.exclude)
            .await?;

        info!("Model files downloaded successfully");
        Ok(true)
    }

    async fn link_auxiliary_models(&self) -> WorkerResult<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.torch_hub_dir).await.map_err(|e| {
            WorkerError::Provisioning(format!(
                "Failed to create {}: {}",
                self.torch_hub_dir.display(),
                e
            ))
        })?;

        let auxiliary_dir = self.cache_dir.join("auxiliary");
        let mut links = Vec::with_capacity(self.auxiliary_files.len());

        for name in &self.auxiliary_files {
            let link = self.torch_hub_dir.join(name);

            // Любая существующая запись, даже битая ссылка, остаётся как есть
            if tokio::fs::symlink_metadata(&link).await.is_ok() {
                debug!("{} already present", link.display());
                links.push(link);
                continue;
            }

            let target = auxiliary_dir.join(name);
            if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
                warn!("Auxiliary model {} is missing", target.display());
                return Err(WorkerError::Provisioning(format!(
                    "Auxiliary model not found: {}",
                    target.display()
                )));
            }

            create_symlink(&target, &link).await.map_err(|e| {
                WorkerError::Provisioning(format!(
                    "Failed to link {} -> {}: {}",
                    link.display(),
                    target.display(),
                    e
                ))
            })?;
            debug!("Linked {} -> {}", link.display(), target.display());
            links.push(link);
        }

        Ok(links)
    }
}

fn absolute(path: &Path) -> WorkerResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(unix)]
async fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(windows)]
async fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink_file(target, link).await
}
