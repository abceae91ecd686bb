//! Временные директории для входных файлов задания
//!
//! Директории удаляются при уничтожении объекта, в том числе при ошибке.

use std::path::Path;
use tempfile::TempDir;

use crate::errors::WorkerResult;

/// Пара временных директорий под видео и аудио одного задания
pub struct JobScratch {
    video_dir: TempDir,
    audio_dir: TempDir,
}

impl JobScratch {
    pub fn new() -> WorkerResult<Self> {
        let video_dir = tempfile::Builder::new().prefix("latentsync_video_").tempdir()?;
        let audio_dir = tempfile::Builder::new().prefix("latentsync_audio_").tempdir()?;
        log::debug!(
            "Created temporary directories: {}, {}",
            video_dir.path().display(),
            audio_dir.path().display()
        );

        Ok(Self {
            video_dir,
            audio_dir,
        })
    }

    pub fn video_dir(&self) -> &Path {
        self.video_dir.path()
    }

    pub fn audio_dir(&self) -> &Path {
        self.audio_dir.path()
    }
}
