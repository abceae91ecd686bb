//! Сквозные тесты обработчика заданий
//!
//! Внешние инструменты подменяются shell-скриптами во временной директории,
//! хранилище подменяется mockito.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mockito::Matcher;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::{StorageConfig, WorkerConfig};
use crate::handler::{JobHandler, JobStage};
use crate::models::JobResponse;
use crate::services::ModelProvisioner;

struct Sandbox {
    dir: TempDir,
    config: WorkerConfig,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        // Веса уже в кэше, загрузка с хаба не нужна
        let aux = root.join("checkpoints/auxiliary");
        fs::create_dir_all(&aux).unwrap();
        fs::write(root.join("checkpoints/latentsync_unet.pt"), b"unet").unwrap();

        let mut config = WorkerConfig::default();
        for name in &config.model.auxiliary_files {
            fs::write(aux.join(name), b"aux").unwrap();
        }
        config.model.hub_cli = "no-such-hub-cli-for-tests".to_string();
        config.model.torch_hub_dir = Some(root.join("torch/hub/checkpoints"));
        config.inference.repo_dir = root.to_path_buf();
        config.inference.output_path = root.join("video_out.mp4");

        let fetch_log = root.join("fetch.log");
        config.fetch.tool = script(
            root,
            "fake-pget",
            &format!("echo \"$2\" >> '{}'\necho data > \"$2\"", fetch_log.display()),
        );

        let args_log = root.join("inference.args");
        config.inference.python = script(
            root,
            "fake-python",
            &format!(
                "echo \"$@\" > '{}'\n\
                 while [ $# -gt 0 ]; do\n\
                   if [ \"$1\" = \"--video_out_path\" ]; then echo lipsynced > \"$2\"; fi\n\
                   shift\n\
                 done",
                args_log.display()
            ),
        );

        Self { dir, config }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn fetched(&self) -> Vec<PathBuf> {
        match fs::read_to_string(self.root().join("fetch.log")) {
            Ok(text) => text.lines().map(PathBuf::from).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn inference_args(&self) -> String {
        fs::read_to_string(self.root().join("inference.args")).unwrap_or_default()
    }

    fn with_storage(mut self, server_url: &str, key: Option<&str>) -> Self {
        self.config.storage = Some(StorageConfig {
            upload_url: format!("{}/zone", server_url),
            public_url: "https://zone.example.net".to_string(),
            access_key: key.map(str::to_string),
            ..StorageConfig::default()
        });
        self
    }

    async fn handler(&self) -> JobHandler {
        let provisioner = Arc::new(ModelProvisioner::new(&self.config).unwrap());
        provisioner.ensure_ready().await.unwrap();
        JobHandler::new(&self.config, provisioner).unwrap()
    }
}

fn script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().to_string()
}

fn event(extra: Value) -> Value {
    let mut input = json!({
        "video_url": "https://cdn.example.com/in/face.mp4",
        "audio_url": "https://cdn.example.com/in/speech.wav?token=abc",
    });
    if let (Some(input), Some(extra)) = (input.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            input.insert(k.clone(), v.clone());
        }
    }
    json!({ "input": input })
}

#[tokio::test]
async fn test_local_result_returns_output_path() {
    let sandbox = Sandbox::new();
    let handler = sandbox.handler().await;

    let (stage, response) = handler.handle_event_traced(&event(json!({}))).await;

    assert_eq!(stage, JobStage::Done);
    assert_eq!(response, JobResponse::local(&sandbox.root().join("video_out.mp4")));

    let fetched = sandbox.fetched();
    assert_eq!(fetched.len(), 2);
    assert!(fetched[0].ends_with("face.mp4"));
    assert!(fetched[1].ends_with("speech.wav"));
    // Временные директории удалены после задания
    for path in &fetched {
        assert!(!path.parent().unwrap().exists());
    }
}

#[tokio::test]
async fn test_relative_output_path_is_resolved_under_repo_dir() {
    let mut sandbox = Sandbox::new();
    sandbox.config.inference.output_path = PathBuf::from("results/out.mp4");
    fs::create_dir_all(sandbox.root().join("results")).unwrap();
    let handler = sandbox.handler().await;

    let response = handler.handle_event(&event(json!({}))).await;

    let expected = sandbox.root().join("results/out.mp4");
    assert_eq!(response, JobResponse::local(&expected));
    assert_eq!(fs::read_to_string(&expected).unwrap(), "lipsynced\n");
    // Скрипту передаётся путь как есть, он запускается из repo_dir
    assert!(sandbox.inference_args().contains("--video_out_path results/out.mp4"));
}

#[tokio::test]
async fn test_previous_video_is_not_returned_when_script_writes_nothing() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("PUT", Matcher::Any)
        .with_status(201)
        .expect(0)
        .create_async()
        .await;

    let mut sandbox = Sandbox::new().with_storage(&server.url(), Some("secret"));
    fs::write(sandbox.root().join("video_out.mp4"), b"someone else's video").unwrap();
    sandbox.config.inference.python = script(sandbox.root(), "silent-python", "exit 0");
    let handler = sandbox.handler().await;

    let (stage, response) = handler.handle_event_traced(&event(json!({}))).await;
    let value = serde_json::to_value(&response).unwrap();

    assert_eq!(stage, JobStage::Failed);
    assert!(value["error"].as_str().unwrap().starts_with("Prediction failed"));
    assert!(!sandbox.root().join("video_out.mp4").exists());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_missing_url_skips_downloads() {
    let sandbox = Sandbox::new();
    let handler = sandbox.handler().await;

    let response = handler
        .handle_event(&json!({ "input": { "video_url": "https://cdn.example.com/in/face.mp4" } }))
        .await;

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({ "error": "video_url and audio_url are required." })
    );
    assert!(sandbox.fetched().is_empty());
}

#[tokio::test]
async fn test_out_of_range_job_is_rejected_before_download() {
    let sandbox = Sandbox::new();
    let handler = sandbox.handler().await;

    let response = handler.handle_event(&event(json!({ "inference_steps": 80 }))).await;

    assert!(response.is_error());
    assert!(sandbox.fetched().is_empty());
}

#[tokio::test]
async fn test_seed_and_hyperparameters_reach_the_script() {
    let sandbox = Sandbox::new();
    let handler = sandbox.handler().await;

    let response = handler
        .handle_event(&event(json!({ "seed": 9, "guidance_scale": "2.5", "inference_steps": 35 })))
        .await;
    assert!(!response.is_error());

    let args = sandbox.inference_args();
    assert!(args.starts_with("-m scripts.inference"));
    assert!(args.contains("--seed 9"));
    assert!(args.contains("--guidance_scale 2.5"));
    assert!(args.contains("--inference_steps 35"));
}

#[tokio::test]
async fn test_random_seed_is_sixteen_bit() {
    let sandbox = Sandbox::new();
    let handler = sandbox.handler().await;

    handler.handle_event(&event(json!({ "seed": -3 }))).await;

    let args = sandbox.inference_args();
    let seed: i64 = args
        .split_whitespace()
        .skip_while(|a| *a != "--seed")
        .nth(1)
        .unwrap()
        .parse()
        .unwrap();
    assert!((0..=65535).contains(&seed));
}

#[tokio::test]
async fn test_upload_returns_only_url() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("PUT", Matcher::Regex(r"^/zone/[0-9a-f-]{36}\.mp4$".to_string()))
        .match_header("AccessKey", "secret")
        .match_body("lipsynced\n")
        .with_status(201)
        .create_async()
        .await;

    let sandbox = Sandbox::new().with_storage(&server.url(), Some("secret"));
    let handler = sandbox.handler().await;

    let response = handler.handle_event(&event(json!({}))).await;
    let value = serde_json::to_value(&response).unwrap();

    let object = value.as_object().unwrap();
    assert_eq!(object.len(), 1);
    assert!(object["output_url"]
        .as_str()
        .unwrap()
        .starts_with("https://zone.example.net/"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_upload_failure_reports_body_as_details() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("PUT", Matcher::Any)
        .with_status(500)
        .with_body("storage zone is read-only")
        .create_async()
        .await;

    let sandbox = Sandbox::new().with_storage(&server.url(), Some("secret"));
    let handler = sandbox.handler().await;

    let (stage, response) = handler.handle_event_traced(&event(json!({}))).await;

    assert_eq!(stage, JobStage::Failed);
    let value = serde_json::to_value(&response).unwrap();
    assert_eq!(value["details"], "storage zone is read-only");
    assert!(value["error"].as_str().unwrap().contains("500"));
    // Видео остаётся на диске
    assert!(sandbox.root().join("video_out.mp4").exists());
}

#[tokio::test]
async fn test_missing_credential_is_reported_not_raised() {
    let sandbox = Sandbox::new().with_storage("http://127.0.0.1:9", None);
    let handler = sandbox.handler().await;

    let response = handler.handle_event(&event(json!({}))).await;
    let value = serde_json::to_value(&response).unwrap();

    assert!(value["error"]
        .as_str()
        .unwrap()
        .starts_with("Configuration error"));
}

#[tokio::test]
async fn test_inference_failure_skips_upload() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("PUT", Matcher::Any)
        .with_status(201)
        .expect(0)
        .create_async()
        .await;

    let mut sandbox = Sandbox::new().with_storage(&server.url(), Some("secret"));
    sandbox.config.inference.python = script(sandbox.root(), "broken-python", "echo CUDA out of memory >&2\nexit 1");
    let handler = sandbox.handler().await;

    let response = handler.handle_event(&event(json!({}))).await;
    let value = serde_json::to_value(&response).unwrap();

    let error = value["error"].as_str().unwrap();
    assert!(error.starts_with("Prediction failed"));
    assert!(error.contains("CUDA out of memory"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_failed_download_aborts_job() {
    let mut sandbox = Sandbox::new();
    sandbox.config.fetch.tool = script(sandbox.root(), "broken-pget", "echo 404 >&2\nexit 2");
    let handler = sandbox.handler().await;

    let response = handler.handle_event(&event(json!({}))).await;
    let value = serde_json::to_value(&response).unwrap();

    assert!(value["error"].as_str().unwrap().starts_with("Download error"));
    assert!(sandbox.inference_args().is_empty());
}

#[tokio::test]
async fn test_missing_input_envelope() {
    let sandbox = Sandbox::new();
    let handler = sandbox.handler().await;

    let response = handler.handle_event(&json!({ "id": "job-1" })).await;
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({ "error": "No input provided in event" })
    );
}
