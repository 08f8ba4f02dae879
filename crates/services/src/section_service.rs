use std::sync::Arc;

use course_core::model::{CourseId, Section, SectionDraft, SectionId, SectionPatch};
use serde::Serialize;
use storage::repository::CourseRepository;

use crate::Clock;
use crate::commit::commit_with_retry;
use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::media::MediaService;
use crate::progress_service::{ProgressService, PurgeOutcome};

/// Outcome of a section delete. The delete itself always went through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionDeletion {
    pub section_id: SectionId,
    /// Set when the section's media could not be removed from the blob store.
    pub orphaned_key: Option<String>,
    pub purge: PurgeOutcome,
}

/// CRUD over the ordered sections of a course.
#[derive(Clone)]
pub struct SectionService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    media: MediaService,
    progress: ProgressService,
    config: ServiceConfig,
}

impl SectionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        media: MediaService,
        progress: ProgressService,
        config: ServiceConfig,
    ) -> Self {
        Self {
            clock,
            courses,
            media,
            progress,
            config,
        }
    }

    /// Append a section with a freshly generated id.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the course does not exist,
    /// `ServiceError::Validation` if the draft is invalid, and
    /// `ServiceError::Persistence` if storage fails.
    pub async fn add_section(
        &self,
        course_id: CourseId,
        draft: SectionDraft,
    ) -> Result<Section, ServiceError> {
        let (_, section) = commit_with_retry(
            self.courses.as_ref(),
            self.clock,
            self.config.commit_retry_attempts,
            course_id,
            |course, now| course.add_section(draft.clone(), now).cloned(),
        )
        .await?;
        tracing::info!(
            course_id = %course_id,
            section_id = %section.id(),
            kind = %section.kind(),
            "section added"
        );
        Ok(section)
    }

    /// Merge `patch` into one section.
    ///
    /// If the patch clears or replaces attached media, the old asset is
    /// removed afterwards, best-effort.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the course or section does not
    /// exist, `ServiceError::Validation` if the merged section would be
    /// invalid, and `ServiceError::Persistence` if storage fails.
    pub async fn update_section(
        &self,
        course_id: CourseId,
        section_id: SectionId,
        patch: SectionPatch,
    ) -> Result<Section, ServiceError> {
        if patch.is_empty() {
            return self.get_section(course_id, section_id).await;
        }
        let (_, (previous, section)) = commit_with_retry(
            self.courses.as_ref(),
            self.clock,
            self.config.commit_retry_attempts,
            course_id,
            |course, now| {
                let previous = course.section(section_id).cloned();
                let section = course.update_section(section_id, patch.clone(), now)?.clone();
                Ok((previous, section))
            },
        )
        .await?;
        tracing::debug!(course_id = %course_id, section_id = %section_id, "section updated");

        if let Some(previous) = previous.filter(|p| drops_media(p, &section)) {
            self.media.release_section_media(&previous).await;
        }
        Ok(section)
    }

    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the course or section does not exist.
    pub async fn get_section(
        &self,
        course_id: CourseId,
        section_id: SectionId,
    ) -> Result<Section, ServiceError> {
        let course = self
            .courses
            .get_course(course_id)
            .await?
            .ok_or_else(|| ServiceError::course_not_found(course_id))?;
        course
            .section(section_id)
            .cloned()
            .ok_or_else(|| ServiceError::section_not_found(section_id))
    }

    /// Sections of a course in display order.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the course does not exist.
    pub async fn list_sections(&self, course_id: CourseId) -> Result<Vec<Section>, ServiceError> {
        let course = self
            .courses
            .get_course(course_id)
            .await?
            .ok_or_else(|| ServiceError::course_not_found(course_id))?;
        Ok(course.sections().to_vec())
    }

    /// Remove a section, then strip it from every learner's progress.
    ///
    /// The removal is a single atomic pull. The progress cascade runs
    /// afterwards with retries; if it never succeeds the delete still stands
    /// and `SectionDeletion::purge` says so.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the course does not exist or has no
    /// such section, and `ServiceError::Persistence` if the pull fails.
    pub async fn delete_section(
        &self,
        course_id: CourseId,
        section_id: SectionId,
    ) -> Result<SectionDeletion, ServiceError> {
        let section = self.get_section(course_id, section_id).await?;
        let removed = self
            .courses
            .pull_section(course_id, section_id, self.clock.now())
            .await?;
        if !removed {
            return Err(ServiceError::section_not_found(section_id));
        }
        tracing::info!(course_id = %course_id, section_id = %section_id, "section deleted");

        let orphaned_key = self.media.release_section_media(&section).await;
        let purge = self
            .progress
            .purge_with_retry(
                course_id,
                section_id,
                self.config.purge_retry_attempts,
                self.config.purge_retry_backoff(),
            )
            .await;

        Ok(SectionDeletion {
            section_id,
            orphaned_key,
            purge,
        })
    }
}

/// True when `before` held a media asset that `after` no longer points at.
fn drops_media(before: &Section, after: &Section) -> bool {
    before.kind().media_type().is_some()
        && before.has_content()
        && (before.kind() != after.kind() || before.content() != after.content())
}
