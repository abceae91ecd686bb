//! Выгрузка результата в объектное хранилище
//!
//! Файл целиком читается в память и отправляется одним PUT под новым
//! уникальным именем. Успехом считается только ответ 201 Created.

use std::path::Path;
use std::time::Duration;

use log::{error, info};
use reqwest::{Client, StatusCode};

use crate::config::{StorageConfig, ACCESS_KEY_ENV};
use crate::errors::{WorkerError, WorkerResult};

pub struct ResultPublisher {
    client: Client,
    upload_url: String,
    public_url: String,
    access_key_header: String,
    access_key: Option<String>,
}

impl ResultPublisher {
    pub fn new(config: &StorageConfig) -> WorkerResult<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            upload_url: config.upload_url.trim_end_matches('/').to_string(),
            public_url: config.public_url.trim_end_matches('/').to_string(),
            access_key_header: config.access_key_header.clone(),
            access_key: config.access_key.clone(),
        })
    }

    /// Upload `local_path` and return its public URL
    pub async fn publish(&self, local_path: &Path) -> WorkerResult<String> {
        let access_key = self.access_key.as_deref().ok_or_else(|| {
            WorkerError::Configuration(format!("{} environment variable is not set", ACCESS_KEY_ENV))
        })?;
        if self.upload_url.is_empty() || self.public_url.is_empty() {
            return Err(WorkerError::Configuration(
                "Storage upload and public URLs must both be configured".to_string(),
            ));
        }

        let object_name = object_name_for(local_path);
        let upload_url = format!("{}/{}", self.upload_url, object_name);

        let body = tokio::fs::read(local_path).await.map_err(|e| WorkerError::Upload {
            message: format!("Failed to read {}: {}", local_path.display(), e),
            details: None,
        })?;

        info!("Uploading {} bytes to {}", body.len(), upload_url);
        let response = self
            .client
            .put(&upload_url)
            .header(self.access_key_header.as_str(), access_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| WorkerError::Upload {
                message: format!("Request to storage failed: {}", e),
                details: None,
            })?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = match response.text().await {
                Ok(text) => text,
                Err(e) => format!("Failed to read error response: {}", e),
            };
            error!("Upload failed (status {}): {}", status, body);
            return Err(WorkerError::Upload {
                message: format!("storage returned {}", status),
                details: Some(body),
            });
        }

        let public_url = format!("{}/{}", self.public_url, object_name);
        info!("Uploaded result to {}", public_url);
        Ok(public_url)
    }
}

/// Fresh object name keeping the source extension
fn object_name_for(path: &Path) -> String {
    let id = uuid::Uuid::new_v4();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if !ext.is_empty() => format!("{}.{}", id, ext),
        _ => format!("{}.mp4", id),
    }
}
