//! Запуск скрипта инференса LatentSync
//!
//! Скрипт вызывается синхронно (с ожиданием завершения) из корня
//! репозитория LatentSync:
//! `python -m scripts.inference --unet_config_path ... --seed ... --inference_steps ...`

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info};
use rand::rngs::OsRng;
use rand::Rng;
use tokio::process::Command;

use crate::config::WorkerConfig;
use crate::errors::{WorkerError, WorkerResult};
use crate::utils::tools::{check_command_in_path, run_command};

/// Параметры одного запуска
#[derive(Debug, Clone)]
pub struct InferenceParams {
    pub video_path: PathBuf,
    pub audio_path: PathBuf,
    pub guidance_scale: f64,
    pub inference_steps: i64,
    pub seed: i64,
}

/// Replace a non-positive seed with a random 16-bit value from the OS CSPRNG
pub fn resolve_seed(seed: i64) -> i64 {
    if seed > 0 {
        seed
    } else {
        i64::from(OsRng.gen::<u16>())
    }
}

pub struct InferenceInvoker {
    python: String,
    module: String,
    repo_dir: PathBuf,
    unet_config_path: PathBuf,
    checkpoint_path: PathBuf,
    /// Путь для `--video_out_path`, относительно `repo_dir`
    output_arg: PathBuf,
    /// Тот же файл, как его видит воркер
    output_path: PathBuf,
    timeout: Option<Duration>,
}

impl InferenceInvoker {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            python: config.inference.python.clone(),
            module: config.inference.module.clone(),
            repo_dir: config.inference.repo_dir.clone(),
            unet_config_path: config.inference.unet_config_path.clone(),
            checkpoint_path: config.checkpoint_path(),
            output_arg: config.inference.output_path.clone(),
            output_path: config.repo_path(&config.inference.output_path),
            timeout: config.inference.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Command line arguments for the inference script, after the interpreter
    pub fn build_args(&self, params: &InferenceParams, seed: i64) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-m".into(), self.module.clone().into()];
        let mut flag = |name: &str, value: OsString| {
            args.push(format!("--{}", name).into());
            args.push(value);
        };

        flag("unet_config_path", self.unet_config_path.clone().into());
        flag("inference_ckpt_path", self.checkpoint_path.clone().into());
        flag("guidance_scale", params.guidance_scale.to_string().into());
        flag("video_path", params.video_path.clone().into());
        flag("audio_path", params.audio_path.clone().into());
        flag("video_out_path", self.output_arg.clone().into());
        flag("seed", seed.to_string().into());
        flag("inference_steps", params.inference_steps.to_string().into());

        args
    }

    /// Run the inference script and return the produced video path
    pub async fn run(&self, params: &InferenceParams) -> WorkerResult<PathBuf> {
        let seed = resolve_seed(params.seed);
        info!("Using seed: {}", seed);

        let program = check_command_in_path(&self.python)?;
        self.remove_stale_output().await?;

        let mut command = Command::new(program);
        command
            .args(self.build_args(params, seed))
            .current_dir(&self.repo_dir)
            .kill_on_drop(true);

        info!(
            "Running {} -m {} (guidance_scale={}, inference_steps={})",
            self.python, self.module, params.guidance_scale, params.inference_steps
        );

        let run = run_command(command);
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                WorkerError::Inference(format!("inference timed out after {}s", limit.as_secs()))
            })?,
            None => run.await,
        }
        .map_err(|e| WorkerError::Inference(format!("failed to start inference: {}", e)))?;

        if !output.success {
            error!("Inference exited with {}", output.status);
            return Err(WorkerError::Inference(format!(
                "inference exited with {}: {}",
                output.status, output.stderr
            )));
        }

        match tokio::fs::metadata(&self.output_path).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                error!("Inference exited successfully but {} is missing", self.output_path.display());
                return Err(WorkerError::Inference(format!(
                    "inference produced no output at {}",
                    self.output_path.display()
                )));
            }
        }

        info!("Prediction successful. Output at: {}", self.output_path.display());
        Ok(self.output_path.clone())
    }

    // Результат предыдущего задания не должен выдаваться за новый
    async fn remove_stale_output(&self) -> WorkerResult<()> {
        match tokio::fs::remove_file(&self.output_path).await {
            Ok(()) => {
                debug!("Removed previous output {}", self.output_path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkerError::Inference(format!(
                "failed to remove previous output {}: {}",
                self.output_path.display(),
                e
            ))),
        }
    }
}
