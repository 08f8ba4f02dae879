use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use course_core::model::{
    Course, CourseError, CourseId, MediaType, Section, SectionId, VideoMetadata,
};
use serde::Serialize;
use storage::blob::{BlobError, BlobStore, content_type_for};
use storage::repository::CourseRepository;

use crate::Clock;
use crate::commit::commit_with_retry;
use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::media::keys::{self, AssetLocation};
use crate::media::transcoder::{MediaTranscoder, TranscodeError, TranscodeOutput};
use crate::progress_service::{ProgressService, PurgeOutcome};

/// A file received from a client, already on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub path: PathBuf,
    /// Name as supplied by the client; only its extension and a sanitized
    /// form end up in the storage key.
    pub file_name: String,
}

impl MediaUpload {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            file_name: file_name.into(),
        }
    }

    /// Use the path's own file name as the client name.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, file_name }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachedMedia {
    pub section: Section,
    pub key: String,
    /// Content key the section pointed at before this attach.
    pub replaced_key: Option<String>,
    /// Set when the replaced asset could not be removed.
    pub orphaned_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetachedMedia {
    pub section: Section,
    pub removed_key: Option<String>,
    /// Set when the blob delete failed; the section is cleared regardless.
    pub orphaned_key: Option<String>,
    pub purge: PurgeOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseImageUpdate {
    pub key: String,
    pub replaced_key: Option<String>,
    pub orphaned_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub key: String,
    pub error: String,
}

/// Outcome of removing every asset a course owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaCleanupReport {
    pub attempted: usize,
    pub failures: Vec<CleanupFailure>,
}

impl MediaCleanupReport {
    #[must_use]
    pub fn removed(&self) -> usize {
        self.attempted - self.failures.len()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, key: &str, result: Result<(), BlobError>) {
        self.attempted += 1;
        if let Err(err) = result {
            tracing::warn!(key, error = %err, "course media cleanup failed");
            self.failures.push(CleanupFailure {
                key: key.to_owned(),
                error: err.to_string(),
            });
        }
    }
}

/// Assets written to the blob store but not yet referenced by the course.
struct StagedAsset {
    key: String,
    location: AssetLocation,
    metadata: Option<VideoMetadata>,
}

/// Moves media between clients, the transcoder, the blob store and sections.
#[derive(Clone)]
pub struct MediaService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    blobs: Arc<dyn BlobStore>,
    transcoder: Arc<dyn MediaTranscoder>,
    progress: ProgressService,
    config: ServiceConfig,
}

impl MediaService {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        blobs: Arc<dyn BlobStore>,
        transcoder: Arc<dyn MediaTranscoder>,
        progress: ProgressService,
        config: ServiceConfig,
    ) -> Self {
        Self {
            clock,
            courses,
            blobs,
            transcoder,
            progress,
            config,
        }
    }

    /// Upload media for a section and point the section at it.
    ///
    /// Video goes through probe and transcode first; the section then stores
    /// the manifest key and the probed metadata. Nothing is written to the
    /// blob store unless the section exists and its kind matches `media`.
    ///
    /// # Errors
    ///
    /// - `ServiceError::NotFound` if the course or section is missing, also
    ///   when the section disappears before the commit.
    /// - `ServiceError::Validation` on a kind mismatch or unaccepted file.
    /// - `ServiceError::Transcode` if probing or transcoding fails or times out.
    /// - `ServiceError::Storage` if the upload fails; partial uploads are removed.
    /// - `ServiceError::Persistence` if the commit fails.
    pub async fn attach_media(
        &self,
        course_id: CourseId,
        section_id: SectionId,
        media: MediaType,
        upload: &MediaUpload,
    ) -> Result<AttachedMedia, ServiceError> {
        let course = self.load_course(course_id).await?;
        let section = course
            .section(section_id)
            .ok_or_else(|| ServiceError::section_not_found(section_id))?;
        section.ensure_media_type(media)?;
        keys::check_upload_name(media, &upload.file_name)?;

        let staged = match media {
            MediaType::Video => self.stage_video(course_id, section_id, &upload.path).await?,
            MediaType::Pdf => self.stage_pdf(course_id, section_id, upload).await?,
        };

        let committed = self
            .commit(course_id, |course, now| {
                course.attach_media(
                    section_id,
                    media,
                    staged.key.clone(),
                    staged.metadata.clone(),
                    now,
                )
            })
            .await
            .and_then(|(course, replaced)| {
                let section = course
                    .section(section_id)
                    .cloned()
                    .ok_or_else(|| ServiceError::section_not_found(section_id))?;
                Ok((section, replaced))
            });
        let (section, replaced_key) = match committed {
            Ok(done) => done,
            Err(err) => {
                self.discard(&staged.location).await;
                return Err(err);
            }
        };

        let mut orphaned_key = None;
        if let Some(old) = replaced_key.as_deref() {
            let location = AssetLocation::for_content(media, old);
            if let Err(err) = self.remove_asset(&location).await {
                tracing::warn!(key = old, error = %err, "replaced media left behind");
                orphaned_key = Some(location.as_str().to_owned());
            }
        }

        tracing::info!(
            course_id = %course_id,
            section_id = %section_id,
            media = %media,
            key = %staged.key,
            "media attached"
        );
        Ok(AttachedMedia {
            section,
            key: staged.key,
            replaced_key,
            orphaned_key,
        })
    }

    /// Remove a section's media and clear its content and metadata.
    ///
    /// The blob delete is best-effort: a failure is logged and reported in
    /// `orphaned_key`, and the section is cleared anyway.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the course or section is missing,
    /// `ServiceError::Validation` on a kind mismatch, and
    /// `ServiceError::Persistence` if the commit fails.
    pub async fn detach_media(
        &self,
        course_id: CourseId,
        section_id: SectionId,
        media: MediaType,
    ) -> Result<DetachedMedia, ServiceError> {
        let course = self.load_course(course_id).await?;
        let section = course
            .section(section_id)
            .ok_or_else(|| ServiceError::section_not_found(section_id))?;
        section.ensure_media_type(media)?;

        let mut orphaned_key = None;
        let removed_key = Some(section.content().to_owned()).filter(|k| !k.is_empty());
        if let Some(key) = removed_key.as_deref() {
            let location = AssetLocation::for_content(media, key);
            if let Err(err) = self.remove_asset(&location).await {
                tracing::warn!(key, error = %err, "detached media left behind");
                orphaned_key = Some(location.as_str().to_owned());
            }
        }

        let (course, cleared) = self
            .commit(course_id, |course, now| course.detach_media(section_id, media, now))
            .await?;
        // Content attached between the read and the commit was cleared too.
        if let Some(late) = cleared.filter(|k| Some(k) != removed_key.as_ref()) {
            let location = AssetLocation::for_content(media, &late);
            if let Err(err) = self.remove_asset(&location).await {
                tracing::warn!(key = %late, error = %err, "detached media left behind");
                orphaned_key = Some(location.as_str().to_owned());
            }
        }
        let section = course
            .section(section_id)
            .cloned()
            .ok_or_else(|| ServiceError::section_not_found(section_id))?;

        let purge = if self.config.purge_progress_on_detach {
            self.progress
                .purge_with_retry(
                    course_id,
                    section_id,
                    self.config.purge_retry_attempts,
                    self.config.purge_retry_backoff(),
                )
                .await
        } else {
            PurgeOutcome::Skipped
        };

        tracing::info!(
            course_id = %course_id,
            section_id = %section_id,
            media = %media,
            removed = removed_key.is_some(),
            "media detached"
        );
        Ok(DetachedMedia {
            section,
            removed_key,
            orphaned_key,
            purge,
        })
    }

    /// Remove the image and every section asset of `course`.
    ///
    /// Each removal is attempted even after earlier ones fail.
    pub async fn delete_course_media(&self, course: &Course) -> MediaCleanupReport {
        let mut report = MediaCleanupReport::default();
        if let Some(image) = course.image() {
            report.record(image, self.blobs.delete(image).await);
        }
        for section in course.sections().iter().filter(|s| s.has_content()) {
            let Some(media) = section.kind().media_type() else {
                continue;
            };
            let location = AssetLocation::for_content(media, section.content());
            let result = self.remove_asset(&location).await.map(|_| ());
            report.record(location.as_str(), result);
        }
        tracing::info!(
            course_id = %course.id(),
            attempted = report.attempted,
            failed = report.failures.len(),
            "course media cleanup finished"
        );
        report
    }

    /// Best-effort removal of whatever `section` points at. Returns the
    /// location left behind when the delete fails.
    pub async fn release_section_media(&self, section: &Section) -> Option<String> {
        let media = section.kind().media_type()?;
        if !section.has_content() {
            return None;
        }
        let location = AssetLocation::for_content(media, section.content());
        match self.remove_asset(&location).await {
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(key = location.as_str(), error = %err, "section media left behind");
                Some(location.as_str().to_owned())
            }
        }
    }

    /// Store a new course image and point the course at it.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the course is missing,
    /// `ServiceError::Validation` for an unaccepted or unreadable file,
    /// `ServiceError::Storage` if the upload fails, and
    /// `ServiceError::Persistence` if the commit fails.
    pub async fn upload_course_image(
        &self,
        course_id: CourseId,
        upload: &MediaUpload,
    ) -> Result<CourseImageUpdate, ServiceError> {
        self.load_course(course_id).await?;
        keys::check_image_name(&upload.file_name)?;

        let key = keys::image_key(course_id, &upload.file_name, self.clock.now());
        let bytes = read_upload(&upload.path).await?;
        let location = AssetLocation::Object(key.clone());
        if let Err(err) = self.blobs.put(&key, bytes, content_type_for(&key)).await {
            self.discard(&location).await;
            return Err(err.into());
        }

        let committed = self
            .commit(course_id, |course, now| {
                Ok::<_, CourseError>(course.set_image(Some(key.clone()), now))
            })
            .await;
        let replaced_key = match committed {
            Ok((_, replaced)) => replaced,
            Err(err) => {
                self.discard(&location).await;
                return Err(err);
            }
        };

        let mut orphaned_key = None;
        if let Some(old) = replaced_key.as_deref() {
            if let Err(err) = self.blobs.delete(old).await {
                tracing::warn!(key = old, error = %err, "replaced course image left behind");
                orphaned_key = Some(old.to_owned());
            }
        }
        tracing::info!(course_id = %course_id, key = %key, "course image updated");
        Ok(CourseImageUpdate {
            key,
            replaced_key,
            orphaned_key,
        })
    }

    // ─── Internals ──────────────────────────────────────────────────────────

    async fn load_course(&self, course_id: CourseId) -> Result<Course, ServiceError> {
        self.courses
            .get_course(course_id)
            .await?
            .ok_or_else(|| ServiceError::course_not_found(course_id))
    }

    async fn commit<T, F>(&self, course_id: CourseId, apply: F) -> Result<(Course, T), ServiceError>
    where
        F: FnMut(&mut Course, DateTime<Utc>) -> Result<T, CourseError>,
    {
        commit_with_retry(
            self.courses.as_ref(),
            self.clock,
            self.config.commit_retry_attempts,
            course_id,
            apply,
        )
        .await
    }

    async fn stage_video(
        &self,
        course_id: CourseId,
        section_id: SectionId,
        input: &Path,
    ) -> Result<StagedAsset, ServiceError> {
        let scratch = tempfile::Builder::new()
            .prefix("course-transcode-")
            .tempdir()
            .map_err(TranscodeError::from)?;

        let limit = self.config.transcode_timeout();
        let work = async {
            let probe = self.transcoder.probe(input).await?;
            let output = self
                .transcoder
                .transcode_to_adaptive_streaming(input, scratch.path())
                .await?;
            Ok::<_, TranscodeError>((probe, output))
        };
        let (mut probe, output) = tokio::time::timeout(limit, work)
            .await
            .map_err(|_| TranscodeError::Timeout {
                tool: "transcode".into(),
                secs: limit.as_secs(),
            })??;
        if probe.duration_secs <= 0.0 {
            probe.duration_secs = output.duration_secs;
        }
        let metadata = probe.metadata()?;
        if !output.files.contains(&output.manifest) {
            return Err(TranscodeError::Unsupported("transcode produced no manifest".into()).into());
        }

        let folder = keys::video_folder(course_id, section_id, self.clock.now());
        let location = AssetLocation::Folder(folder.clone());
        if let Err(err) = self.upload_rendition(&folder, scratch.path(), &output).await {
            self.discard(&location).await;
            return Err(err);
        }

        tracing::debug!(
            course_id = %course_id,
            section_id = %section_id,
            files = output.files.len(),
            duration_secs = metadata.duration_secs(),
            "video rendition uploaded"
        );
        Ok(StagedAsset {
            key: format!("{folder}{}", key_path(&output.manifest)),
            location,
            metadata: Some(metadata),
        })
    }

    async fn upload_rendition(
        &self,
        folder: &str,
        scratch: &Path,
        output: &TranscodeOutput,
    ) -> Result<(), ServiceError> {
        for file in &output.files {
            let key = format!("{folder}{}", key_path(file));
            let bytes = tokio::fs::read(scratch.join(file))
                .await
                .map_err(TranscodeError::from)?;
            self.blobs
                .put(&key, Bytes::from(bytes), content_type_for(&key))
                .await?;
        }
        Ok(())
    }

    async fn stage_pdf(
        &self,
        course_id: CourseId,
        section_id: SectionId,
        upload: &MediaUpload,
    ) -> Result<StagedAsset, ServiceError> {
        let key = keys::pdf_key(course_id, section_id, &upload.file_name, self.clock.now());
        let bytes = read_upload(&upload.path).await?;
        let location = AssetLocation::Object(key.clone());
        if let Err(err) = self.blobs.put(&key, bytes, content_type_for(&key)).await {
            self.discard(&location).await;
            return Err(err.into());
        }
        Ok(StagedAsset {
            key,
            location,
            metadata: None,
        })
    }

    async fn remove_asset(&self, location: &AssetLocation) -> Result<usize, BlobError> {
        match location {
            AssetLocation::Folder(prefix) => self.blobs.delete_prefix(prefix).await,
            AssetLocation::Object(key) => self.blobs.delete(key).await.map(|()| 1),
        }
    }

    /// Best-effort removal of staged assets that never got committed.
    async fn discard(&self, location: &AssetLocation) {
        if let Err(err) = self.remove_asset(location).await {
            tracing::warn!(key = location.as_str(), error = %err, "staged media left behind");
        }
    }
}

async fn read_upload(path: &Path) -> Result<Bytes, ServiceError> {
    tokio::fs::read(path).await.map(Bytes::from).map_err(|e| {
        ServiceError::Validation(format!("cannot read upload {}: {e}", path.display()))
    })
}

fn key_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
