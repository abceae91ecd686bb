//! Модуль конфигурации воркера
//!
//! Значения по умолчанию совпадают с раскладкой репозитория LatentSync:
//! веса в `checkpoints/`, конфиг UNet в `configs/unet/stage2.yaml`,
//! результат в `/tmp/video_out.mp4`. Файл конфигурации (JSON) и переменные
//! окружения накладываются поверх значений по умолчанию.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{WorkerError, WorkerResult};

/// Environment variable holding the object storage credential
pub const ACCESS_KEY_ENV: &str = "STORAGE_ACCESS_KEY";

/// Что делать с гиперпараметрами вне допустимого диапазона
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RangePolicy {
    /// Вернуть ошибку валидации
    Reject,
    /// Прижать значение к ближайшей границе
    Clamp,
    /// Передать скрипту как есть
    PassThrough,
}

impl Default for RangePolicy {
    fn default() -> Self {
        Self::Reject
    }
}

impl RangePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" => Some(Self::Reject),
            "clamp" => Some(Self::Clamp),
            "pass_through" | "passthrough" | "pass-through" => Some(Self::PassThrough),
            _ => None,
        }
    }
}

/// Настройки загрузки весов модели
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Репозиторий на Hugging Face Hub
    pub repo_id: String,
    /// Локальная директория кэша (относительно `repo_dir`, если путь относительный)
    pub cache_dir: PathBuf,
    /// CLI для загрузки с хаба
    pub hub_cli: String,
    /// Шаблоны, исключаемые из загрузки
    pub exclude: Vec<String>,
    /// Файл, наличие которого означает, что веса уже скачаны
    pub checkpoint_file: String,
    /// Директория torch hub для вспомогательных моделей; по умолчанию `~/.cache/torch/hub/checkpoints`
    pub torch_hub_dir: Option<PathBuf>,
    /// Вспомогательные модели из `<cache_dir>/auxiliary`
    pub auxiliary_files: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            repo_id: "ByteDance/LatentSync-1.5".to_string(),
            cache_dir: PathBuf::from("checkpoints"),
            hub_cli: "huggingface-cli".to_string(),
            exclude: vec!["*.git*".to_string(), "*.md".to_string()],
            checkpoint_file: "latentsync_unet.pt".to_string(),
            torch_hub_dir: None,
            auxiliary_files: vec![
                "2DFAN4-cd938726ad.zip".to_string(),
                "s3fd-619a316812.pth".to_string(),
                "vgg16-397923af.pth".to_string(),
            ],
        }
    }
}

/// Настройки загрузки входных файлов
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Внешний загрузчик, вызывается как `<tool> <url> <dest>`
    pub tool: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            tool: "pget".to_string(),
        }
    }
}

/// Настройки запуска скрипта инференса
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Интерпретатор Python
    pub python: String,
    /// Модуль, запускаемый через `python -m`
    pub module: String,
    /// Корень репозитория LatentSync, рабочая директория скрипта
    pub repo_dir: PathBuf,
    pub unet_config_path: PathBuf,
    /// Куда скрипт пишет результат
    pub output_path: PathBuf,
    /// Ограничение времени работы скрипта; `None` = без ограничения
    pub timeout_secs: Option<u64>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            python: "python".to_string(),
            module: "scripts.inference".to_string(),
            repo_dir: PathBuf::from("."),
            unet_config_path: PathBuf::from("configs/unet/stage2.yaml"),
            output_path: PathBuf::from("/tmp/video_out.mp4"),
            timeout_secs: None,
        }
    }
}

/// Настройки объектного хранилища для выгрузки результата
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Базовый URL для PUT, например `https://storage.bunnycdn.com/<zone>`
    pub upload_url: String,
    /// Базовый публичный URL, например `https://<zone>.b-cdn.net`
    pub public_url: String,
    /// Заголовок, в котором передаётся ключ доступа
    pub access_key_header: String,
    /// Ключ доступа; читается только из окружения
    #[serde(skip)]
    pub access_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_url: String::new(),
            public_url: String::new(),
            access_key_header: "AccessKey".to_string(),
            access_key: None,
            timeout_secs: None,
        }
    }
}

/// Конфигурация воркера
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub model: ModelConfig,
    pub fetch: FetchConfig,
    pub inference: InferenceConfig,
    /// Если задано, результат выгружается в хранилище, иначе возвращается локальный путь
    pub storage: Option<StorageConfig>,
    pub range_policy: RangePolicy,
}

impl WorkerConfig {
    /// Load configuration from an optional JSON file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> WorkerResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> WorkerResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            WorkerError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = serde_json::from_str(&content)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in production)
    pub fn apply_env_with<F>(&mut self, lookup: F) -> WorkerResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = lookup("LATENTSYNC_MODEL_CACHE") {
            self.model.cache_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("LATENTSYNC_REPO_DIR") {
            self.inference.repo_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("LATENTSYNC_OUTPUT_PATH") {
            self.inference.output_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("LATENTSYNC_RANGE_POLICY") {
            self.range_policy = RangePolicy::parse(&value).ok_or_else(|| {
                WorkerError::Configuration(format!("Unknown range policy: {}", value))
            })?;
        }

        let upload_url = lookup("LATENTSYNC_STORAGE_URL");
        let public_url = lookup("LATENTSYNC_PUBLIC_URL");
        if upload_url.is_some() || public_url.is_some() {
            let storage = self.storage.get_or_insert_with(StorageConfig::default);
            if let Some(url) = upload_url {
                storage.upload_url = url;
            }
            if let Some(url) = public_url {
                storage.public_url = url;
            }
        }
        if let Some(storage) = self.storage.as_mut() {
            storage.access_key = lookup(ACCESS_KEY_ENV);
        }

        Ok(())
    }

    /// Resolve a path against the LatentSync checkout
    pub fn repo_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.inference.repo_dir.join(path)
        }
    }

    /// Директория кэша весов
    pub fn model_cache_dir(&self) -> PathBuf {
        self.repo_path(&self.model.cache_dir)
    }

    /// Путь к чекпоинту UNet, передаваемый скрипту
    pub fn checkpoint_path(&self) -> PathBuf {
        self.model.cache_dir.join(&self.model.checkpoint_file)
    }

    /// Директория torch hub, где скрипт ищет вспомогательные модели
    pub fn torch_hub_dir(&self) -> WorkerResult<PathBuf> {
        if let Some(dir) = &self.model.torch_hub_dir {
            return Ok(dir.clone());
        }
        let home = dirs::home_dir().ok_or_else(|| {
            WorkerError::Configuration("Cannot determine home directory".to_string())
        })?;
        Ok(home.join(".cache").join("torch").join("hub").join("checkpoints"))
    }
}
