// Error handling module
// Contains the worker error type and its conversion into job responses

use thiserror::Error;

/// Ошибки воркера
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Некорректный запрос
    #[error("{0}")]
    Validation(String),

    /// Не найден внешний инструмент или не задан ключ доступа
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Ошибка загрузки входных файлов или весов модели
    #[error("Download error: {0}")]
    Download(String),

    /// Ошибка подготовки кэша моделей (директории, симлинки)
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// Скрипт инференса завершился с ошибкой
    #[error("Prediction failed: {0}")]
    Inference(String),

    /// Ошибка выгрузки результата в хранилище
    #[error("Upload failed: {message}")]
    Upload {
        message: String,
        details: Option<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    /// Diagnostic payload carried into the `details` field of an error response
    pub fn details(&self) -> Option<&str> {
        match self {
            WorkerError::Upload { details, .. } => details.as_deref(),
            _ => None,
        }
    }

    /// Short stage-independent label, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::Validation(_) => "validation",
            WorkerError::Configuration(_) => "configuration",
            WorkerError::Download(_) => "download",
            WorkerError::Provisioning(_) => "provisioning",
            WorkerError::Inference(_) => "inference",
            WorkerError::Upload { .. } => "upload",
            WorkerError::Io(_) => "io",
            WorkerError::Http(_) => "http",
            WorkerError::Json(_) => "json",
        }
    }
}

// Result type alias for the worker
pub type WorkerResult<T> = Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_error_exposes_details() {
        let err = WorkerError::Upload {
            message: "storage returned 500 Internal Server Error".to_string(),
            details: Some("disk full".to_string()),
        };
        assert_eq!(err.details(), Some("disk full"));
        assert_eq!(err.kind(), "upload");
        assert!(err.to_string().starts_with("Upload failed"));
    }

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = WorkerError::Validation("video_url and audio_url are required.".to_string());
        assert_eq!(err.to_string(), "video_url and audio_url are required.");
        assert_eq!(err.details(), None);
    }
}
