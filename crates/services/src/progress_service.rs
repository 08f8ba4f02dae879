use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use course_core::model::{CourseId, Progress, SectionId, UserId};
use serde::Serialize;
use storage::repository::{CourseRepository, ProgressRepository};

use crate::Clock;
use crate::error::ServiceError;

/// Result of the progress cascade that follows a section removal or media detach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PurgeOutcome {
    /// The cascade is disabled for this operation.
    Skipped,
    /// Number of progress records that changed.
    Purged(u64),
    /// Every attempt failed; `reconcile_course` heals the leftovers.
    Failed { attempts: u32, error: String },
}

impl PurgeOutcome {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, PurgeOutcome::Failed { .. })
    }
}

/// Tracks per-user completion and keeps it consistent with the course's sections.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    progress: Arc<dyn ProgressRepository>,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        progress: Arc<dyn ProgressRepository>,
    ) -> Self {
        Self {
            clock,
            courses,
            progress,
        }
    }

    /// Record that `user_id` completed a section and refresh the cached percentage.
    ///
    /// Repeating the call for the same section leaves the completed set and
    /// the percentage unchanged.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` if `section_id` is not a well-formed id,
    /// `ServiceError::NotFound` if the course or section does not exist, and
    /// `ServiceError::Persistence` if storage fails.
    pub async fn mark_completed(
        &self,
        user_id: UserId,
        course_id: CourseId,
        section_id: &str,
    ) -> Result<Progress, ServiceError> {
        let section_id: SectionId = section_id.parse()?;
        let course = self
            .courses
            .get_course(course_id)
            .await?
            .ok_or_else(|| ServiceError::course_not_found(course_id))?;
        if !course.has_section(section_id) {
            return Err(ServiceError::section_not_found(section_id));
        }

        let mut progress = self
            .progress
            .record_completion(user_id, course_id, section_id, self.clock.now())
            .await?;
        if progress.refresh_percent(course.total_sections()) {
            self.progress
                .set_progress_percent(user_id, course_id, progress.progress_percent())
                .await?;
        }

        tracing::debug!(
            user_id = %user_id,
            course_id = %course_id,
            section_id = %section_id,
            percent = progress.progress_percent(),
            "section completed"
        );
        Ok(progress)
    }

    /// The stored record, or a zero-valued one when the user has not started.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Persistence` if storage fails.
    pub async fn get_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Progress, ServiceError> {
        let progress = self.progress.get_progress(user_id, course_id).await?;
        Ok(progress.unwrap_or_else(|| Progress::not_started(user_id, course_id)))
    }

    /// Strip `section_id` from every progress record of the course.
    ///
    /// Idempotent. Cached percentages are left as they are until the next
    /// completion. Returns how many records changed.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Persistence` if storage fails.
    pub async fn purge_section_references(
        &self,
        course_id: CourseId,
        section_id: SectionId,
    ) -> Result<u64, ServiceError> {
        let modified = self
            .progress
            .pull_completed_section(course_id, section_id)
            .await?;
        tracing::info!(
            course_id = %course_id,
            section_id = %section_id,
            modified,
            "purged section from progress"
        );
        Ok(modified)
    }

    /// `purge_section_references` with up to `attempts` tries and linear back-off.
    ///
    /// Never fails: exhausting the attempts is logged and reported in the outcome.
    pub async fn purge_with_retry(
        &self,
        course_id: CourseId,
        section_id: SectionId,
        attempts: u32,
        backoff: Duration,
    ) -> PurgeOutcome {
        let attempts = attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.purge_section_references(course_id, section_id).await {
                Ok(modified) => return PurgeOutcome::Purged(modified),
                Err(err) => {
                    tracing::warn!(
                        course_id = %course_id,
                        section_id = %section_id,
                        attempt,
                        error = %err,
                        "progress purge attempt failed"
                    );
                    last_error = err.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(backoff * attempt).await;
                    }
                }
            }
        }
        tracing::error!(
            course_id = %course_id,
            section_id = %section_id,
            attempts,
            error = %last_error,
            "progress purge gave up; records still reference the removed section"
        );
        PurgeOutcome::Failed {
            attempts,
            error: last_error,
        }
    }

    /// Full scan that drops references to sections no longer in the course
    /// and refreshes each touched record's percentage.
    ///
    /// Heals purges that never ran. Returns how many records changed.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the course does not exist and
    /// `ServiceError::Persistence` if storage fails.
    pub async fn reconcile_course(&self, course_id: CourseId) -> Result<u64, ServiceError> {
        let course = self
            .courses
            .get_course(course_id)
            .await?
            .ok_or_else(|| ServiceError::course_not_found(course_id))?;
        let existing: BTreeSet<SectionId> = course.sections().iter().map(|s| s.id()).collect();

        let mut modified = 0_u64;
        for mut record in self.progress.list_course_progress(course_id).await? {
            let before = record.clone();
            record.retain_sections(&existing);
            if record == before {
                continue;
            }
            record.refresh_percent(course.total_sections());
            self.progress.save_progress(&record).await?;
            modified += 1;
        }

        if modified > 0 {
            tracing::warn!(
                course_id = %course_id,
                modified,
                "reconciled dangling progress references"
            );
        }
        Ok(modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use course_core::model::{
        Course, CourseDraft, CourseLevel, CourseStatus, SectionDraft, SectionKind,
    };
    use course_core::time::{fixed_clock, fixed_now};
    use storage::repository::{InMemoryRepository, NewCourseRecord};

    async fn course_with_sections(
        repo: &InMemoryRepository,
        n: usize,
    ) -> (CourseId, Vec<SectionId>) {
        let placeholder = Course::new(
            CourseId::new(1),
            CourseDraft {
                title: "Progress".into(),
                description: None,
                instructor_name: "Ada".into(),
                category: "Testing".into(),
                level: CourseLevel::Beginner,
                status: CourseStatus::Published,
            },
            fixed_now(),
        )
        .unwrap();
        let id = repo
            .insert_new_course(NewCourseRecord::from_course(&placeholder))
            .await
            .unwrap();
        let mut course = repo.get_course(id).await.unwrap().unwrap();
        let mut ids = Vec::new();
        for i in 0..n {
            ids.push(
                course
                    .add_section(
                        SectionDraft::empty(SectionKind::Text, format!("S{i}")),
                        fixed_now(),
                    )
                    .unwrap()
                    .id(),
            );
        }
        repo.save_course(&course).await.unwrap();
        (id, ids)
    }

    fn service(repo: &InMemoryRepository) -> ProgressService {
        ProgressService::new(fixed_clock(), Arc::new(repo.clone()), Arc::new(repo.clone()))
    }

    #[tokio::test]
    async fn mark_completed_is_idempotent() {
        let repo = InMemoryRepository::new();
        let (course, sections) = course_with_sections(&repo, 4).await;
        let svc = service(&repo);
        let user = UserId::new(1);
        let raw = sections[0].to_string();

        let once = svc.mark_completed(user, course, &raw).await.unwrap();
        let twice = svc.mark_completed(user, course, &raw).await.unwrap();

        assert_eq!(once.completed_sections(), twice.completed_sections());
        assert_eq!(once.progress_percent(), 25);
        assert_eq!(twice.progress_percent(), 25);
        assert_eq!(twice.last_accessed_section(), Some(sections[0]));
    }

    #[tokio::test]
    async fn mark_completed_validates_inputs() {
        let repo = InMemoryRepository::new();
        let (course, _) = course_with_sections(&repo, 1).await;
        let svc = service(&repo);
        let user = UserId::new(1);

        let err = svc.mark_completed(user, course, "not-an-id").await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let missing = SectionId::generate().to_string();
        let err = svc.mark_completed(user, course, &missing).await.unwrap_err();
        assert_eq!(err.status_code(), 404);

        let err = svc
            .mark_completed(user, CourseId::new(99), &missing)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { resource: "course", .. }));
        assert!(repo.get_progress(user, course).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_progress_defaults_to_not_started() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let p = svc.get_progress(UserId::new(4), CourseId::new(8)).await.unwrap();
        assert_eq!(p, Progress::not_started(UserId::new(4), CourseId::new(8)));
    }

    #[tokio::test]
    async fn reconcile_drops_ids_missing_from_course() {
        let repo = InMemoryRepository::new();
        let (course, sections) = course_with_sections(&repo, 3).await;
        let svc = service(&repo);
        let user = UserId::new(2);
        for s in &sections {
            svc.mark_completed(user, course, &s.to_string()).await.unwrap();
        }
        // Remove a section without running the purge.
        repo.pull_section(course, sections[2], fixed_now()).await.unwrap();

        assert_eq!(svc.reconcile_course(course).await.unwrap(), 1);
        assert_eq!(svc.reconcile_course(course).await.unwrap(), 0);

        let p = svc.get_progress(user, course).await.unwrap();
        assert_eq!(p.completed_sections().len(), 2);
        assert!(!p.is_completed(sections[2]));
        assert_eq!(p.last_accessed_section(), None);
        assert_eq!(p.progress_percent(), 100);
    }
}
