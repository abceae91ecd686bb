//! Загрузка входных файлов задания по URL
//!
//! Использует внешний загрузчик (`pget` по умолчанию), вызываемый как
//! `<tool> <url> <dest>`. Без повторов, проверки контрольных сумм и докачки.

use std::path::{Path, PathBuf};

use log::{error, info};
use tokio::process::Command;

use crate::errors::{WorkerError, WorkerResult};
use crate::utils::tools::{check_command_in_path, run_command};

/// File name used when a URL has no usable last path segment
const FALLBACK_FILE_NAME: &str = "input";

pub struct RemoteFetcher {
    tool: String,
}

impl RemoteFetcher {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }

    /// Download `url` into `dest_dir`, returning the local file path
    pub async fn fetch(&self, url: &str, dest_dir: &Path) -> WorkerResult<PathBuf> {
        info!("Downloading {} to {}", url, dest_dir.display());

        if !dest_dir.is_dir() {
            return Err(WorkerError::Download(format!(
                "Destination directory does not exist: {}",
                dest_dir.display()
            )));
        }

        let program = check_command_in_path(&self.tool)?;
        let destination = dest_dir.join(file_name_from_url(url));

        let mut command = Command::new(program);
        command.arg(url).arg(&destination);

        let output = run_command(command).await.map_err(|e| {
            WorkerError::Download(format!("Failed to run {} for {}: {}", self.tool, url, e))
        })?;

        if !output.success {
            error!("Error downloading {}: {}", url, output.status);
            return Err(WorkerError::Download(format!(
                "{} failed for {} ({}): {}",
                self.tool, url, output.status, output.stderr
            )));
        }

        info!("Successfully downloaded {} to {}", url, destination.display());
        Ok(destination)
    }
}

/// Last path segment of a URL, without query string or fragment
pub fn file_name_from_url(url: &str) -> String {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let after_scheme = match without_query.find("://") {
        Some(idx) => &without_query[idx + 3..],
        None => without_query,
    };

    // Первый сегмент после схемы это хост, а не имя файла
    let name = match after_scheme.split_once('/') {
        Some((_, path)) => path.rsplit('/').next().unwrap_or(""),
        None => "",
    };

    if name.is_empty() || name == "." || name == ".." {
        FALLBACK_FILE_NAME.to_string()
    } else {
        name.to_string()
    }
}
