use std::sync::Arc;

use course_core::model::{Course, CourseDraft, CourseId, CoursePatch, UserId};
use serde::Serialize;
use storage::repository::{CourseRepository, NewCourseRecord};

use crate::Clock;
use crate::commit::commit_with_retry;
use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::media::{MediaCleanupReport, MediaService};

/// Outcome of a course delete; the document is gone even if cleanup was partial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseDeletion {
    pub course_id: CourseId,
    pub media: MediaCleanupReport,
}

#[derive(Clone)]
pub struct CourseService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    media: MediaService,
    config: ServiceConfig,
}

impl CourseService {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        media: MediaService,
        config: ServiceConfig,
    ) -> Self {
        Self {
            clock,
            courses,
            media,
            config,
        }
    }

    /// # Errors
    ///
    /// Returns `ServiceError::Validation` if the draft is invalid and
    /// `ServiceError::Persistence` if storage fails.
    pub async fn create_course(&self, draft: CourseDraft) -> Result<Course, ServiceError> {
        let now = self.clock.now();
        // Placeholder id; the repository assigns the real one.
        let validated = Course::new(CourseId::new(0), draft, now)?;
        let id = self
            .courses
            .insert_new_course(NewCourseRecord::from_course(&validated))
            .await?;
        tracing::info!(course_id = %id, title = validated.title(), "course created");
        self.get_course(id).await
    }

    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the course does not exist.
    pub async fn get_course(&self, id: CourseId) -> Result<Course, ServiceError> {
        self.courses
            .get_course(id)
            .await?
            .ok_or_else(|| ServiceError::course_not_found(id))
    }

    /// # Errors
    ///
    /// Returns `ServiceError::Persistence` if storage fails.
    pub async fn list_courses(&self, limit: u32) -> Result<Vec<Course>, ServiceError> {
        Ok(self.courses.list_courses(limit).await?)
    }

    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the course does not exist and
    /// `ServiceError::Validation` if the patch would blank a required field.
    pub async fn update_course(
        &self,
        id: CourseId,
        patch: CoursePatch,
    ) -> Result<Course, ServiceError> {
        let (course, ()) = commit_with_retry(
            self.courses.as_ref(),
            self.clock,
            self.config.commit_retry_attempts,
            id,
            |course, now| course.apply_patch(patch.clone(), now),
        )
        .await?;
        Ok(course)
    }

    /// Add `user_id` to the course's enrollments. Returns `false` if already enrolled.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the course does not exist.
    pub async fn enroll(&self, id: CourseId, user_id: UserId) -> Result<bool, ServiceError> {
        let (_, added) = commit_with_retry(
            self.courses.as_ref(),
            self.clock,
            self.config.commit_retry_attempts,
            id,
            |course, now| Ok(course.enroll(user_id, now)),
        )
        .await?;
        if added {
            tracing::info!(course_id = %id, user_id = %user_id, "learner enrolled");
        }
        Ok(added)
    }

    /// Remove the course's media, then the course itself.
    ///
    /// Learner progress for the course is left in place.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotFound` if the course does not exist and
    /// `ServiceError::Persistence` if the delete fails.
    pub async fn delete_course(&self, id: CourseId) -> Result<CourseDeletion, ServiceError> {
        let course = self.get_course(id).await?;
        let media = self.media.delete_course_media(&course).await;
        if !media.is_clean() {
            tracing::warn!(
                course_id = %id,
                failed = media.failures.len(),
                "deleting course with media left behind"
            );
        }
        if !self.courses.delete_course(id).await? {
            return Err(ServiceError::course_not_found(id));
        }
        tracing::info!(course_id = %id, "course deleted");
        Ok(CourseDeletion {
            course_id: id,
            media,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use course_core::model::{CourseLevel, CourseStatus};
    use course_core::time::{fixed_clock, fixed_now};
    use storage::blob::InMemoryBlobStore;
    use storage::repository::InMemoryRepository;

    use crate::media::FfmpegTranscoder;
    use crate::progress_service::ProgressService;

    fn service(repo: &InMemoryRepository) -> CourseService {
        let progress = ProgressService::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        );
        let media = MediaService::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(FfmpegTranscoder::default()),
            progress,
            ServiceConfig::default(),
        );
        CourseService::new(
            fixed_clock(),
            Arc::new(repo.clone()),
            media,
            ServiceConfig::default(),
        )
    }

    fn draft(title: &str) -> CourseDraft {
        CourseDraft {
            title: title.into(),
            description: Some("Hands-on".into()),
            instructor_name: "Kai".into(),
            category: "Music".into(),
            level: CourseLevel::Beginner,
            status: CourseStatus::Drafts,
        }
    }

    #[tokio::test]
    async fn create_get_list_and_update() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let a = svc.create_course(draft("Guitar")).await.unwrap();
        let b = svc.create_course(draft("Drums")).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.created_at(), fixed_now());

        let listed = svc.list_courses(10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(svc.list_courses(1).await.unwrap().len(), 1);

        let updated = svc
            .update_course(
                a.id(),
                CoursePatch {
                    status: Some(CourseStatus::Published),
                    ..CoursePatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status(), CourseStatus::Published);
        assert_eq!(updated.title(), "Guitar");
        assert_eq!(updated.revision(), 1);

        let err = svc
            .update_course(
                a.id(),
                CoursePatch {
                    title: Some("  ".into()),
                    ..CoursePatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn create_rejects_blank_title() {
        let repo = InMemoryRepository::new();
        let err = service(&repo).create_course(draft("")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(repo.list_courses(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn enroll_is_idempotent() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let course = svc.create_course(draft("Piano")).await.unwrap();
        assert!(svc.enroll(course.id(), UserId::new(5)).await.unwrap());
        assert!(!svc.enroll(course.id(), UserId::new(5)).await.unwrap());
        let stored = svc.get_course(course.id()).await.unwrap();
        assert_eq!(stored.enrollments().len(), 1);
        assert_eq!(
            svc.enroll(CourseId::new(99), UserId::new(5))
                .await
                .unwrap_err()
                .status_code(),
            404
        );
    }

    #[tokio::test]
    async fn delete_course_without_media_is_clean() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo);
        let course = svc.create_course(draft("Bass")).await.unwrap();
        let deletion = svc.delete_course(course.id()).await.unwrap();
        assert_eq!(deletion.media.attempted, 0);
        assert!(deletion.media.is_clean());
        assert_eq!(
            svc.get_course(course.id()).await.unwrap_err().status_code(),
            404
        );
        assert_eq!(
            svc.delete_course(course.id()).await.unwrap_err().status_code(),
            404
        );
    }
}
