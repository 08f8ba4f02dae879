use std::path::PathBuf;
use std::sync::Arc;

use storage::blob::{BlobStore, FsBlobStore};
use storage::repository::Storage;
use storage::signing::{HmacUrlSigner, UrlSigner};

use crate::Clock;
use crate::config::ServiceConfig;
use crate::course_service::CourseService;
use crate::error::AppServicesError;
use crate::media::{FfmpegTranscoder, MediaService, MediaTranscoder};
use crate::playback_service::PlaybackService;
use crate::progress_service::ProgressService;
use crate::section_service::SectionService;

/// Where the production backends live.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub db_url: String,
    pub blob_root: PathBuf,
    pub cdn_base_url: String,
    pub signing_key_id: String,
    pub signing_secret: String,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

/// Assembles every service over one set of collaborators.
#[derive(Clone)]
pub struct AppServices {
    config: ServiceConfig,
    courses: Arc<CourseService>,
    sections: Arc<SectionService>,
    media: Arc<MediaService>,
    progress: Arc<ProgressService>,
    playback: Arc<PlaybackService>,
}

impl AppServices {
    #[must_use]
    pub fn new(
        storage: Storage,
        blobs: Arc<dyn BlobStore>,
        signer: Arc<dyn UrlSigner>,
        transcoder: Arc<dyn MediaTranscoder>,
        clock: Clock,
        config: ServiceConfig,
    ) -> Self {
        let progress = ProgressService::new(
            clock,
            Arc::clone(&storage.courses),
            Arc::clone(&storage.progress),
        );
        let media = MediaService::new(
            clock,
            Arc::clone(&storage.courses),
            blobs,
            transcoder,
            progress.clone(),
            config.clone(),
        );
        let sections = SectionService::new(
            clock,
            Arc::clone(&storage.courses),
            media.clone(),
            progress.clone(),
            config.clone(),
        );
        let courses = CourseService::new(
            clock,
            Arc::clone(&storage.courses),
            media.clone(),
            config.clone(),
        );
        let playback = PlaybackService::new(clock, storage.courses, signer, config.clone());

        Self {
            config,
            courses: Arc::new(courses),
            sections: Arc::new(sections),
            media: Arc::new(media),
            progress: Arc::new(progress),
            playback: Arc::new(playback),
        }
    }

    /// Build services backed by `SQLite`, a filesystem blob store, the HMAC
    /// signer and the ffmpeg transcoder.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the config is invalid, the database or
    /// blob root cannot be opened, or the signing settings are rejected.
    pub async fn new_sqlite(
        settings: &BackendSettings,
        clock: Clock,
        config: ServiceConfig,
    ) -> Result<Self, AppServicesError> {
        config.validate()?;
        let storage = Storage::sqlite(&settings.db_url).await?;
        let blobs = FsBlobStore::open(settings.blob_root.clone()).await?;
        let signer = HmacUrlSigner::new(
            &settings.cdn_base_url,
            settings.signing_key_id.clone(),
            settings.signing_secret.as_bytes(),
        )?;
        let transcoder = FfmpegTranscoder::new(settings.ffmpeg.clone(), settings.ffprobe.clone())
            .with_command_timeout(config.transcode_timeout())
            .with_segment_secs(config.hls_segment_secs);

        tracing::debug!(
            db_url = %settings.db_url,
            blob_root = %settings.blob_root.display(),
            "backends ready"
        );
        Ok(Self::new(
            storage,
            Arc::new(blobs),
            Arc::new(signer),
            Arc::new(transcoder),
            clock,
            config,
        ))
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn courses(&self) -> Arc<CourseService> {
        Arc::clone(&self.courses)
    }

    #[must_use]
    pub fn sections(&self) -> Arc<SectionService> {
        Arc::clone(&self.sections)
    }

    #[must_use]
    pub fn media(&self) -> Arc<MediaService> {
        Arc::clone(&self.media)
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn playback(&self) -> Arc<PlaybackService> {
        Arc::clone(&self.playback)
    }
}
