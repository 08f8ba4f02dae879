use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{Course, CourseDraft, CourseId, Progress, SectionId, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// The stored document changed since it was read.
    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persisted shape for a brand-new course before an id is assigned.
#[derive(Debug, Clone)]
pub struct NewCourseRecord {
    pub draft: CourseDraft,
    pub created_at: DateTime<Utc>,
}

impl NewCourseRecord {
    #[must_use]
    pub fn from_course(course: &Course) -> Self {
        Self {
            draft: course.draft(),
            created_at: course.created_at(),
        }
    }
}

/// Repository contract for course documents (course + embedded sections + enrollments).
#[async_trait]
pub trait CourseRepository: Send + Sync {
    /// Insert a new course and return its assigned ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the course cannot be stored.
    async fn insert_new_course(&self, course: NewCourseRecord) -> Result<CourseId, StorageError>;

    /// Fetch a course by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError>;

    /// List courses ordered by ID, up to `limit`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_courses(&self, limit: u32) -> Result<Vec<Course>, StorageError>;

    /// Replace the stored document if its revision still equals `course.revision()`.
    ///
    /// Returns the new revision.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the course is gone and
    /// `StorageError::Conflict` if it was modified since it was read.
    async fn save_course(&self, course: &Course) -> Result<u64, StorageError>;

    /// Atomically remove one section from a course.
    ///
    /// Returns `false` when the course or the section does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn pull_section(
        &self,
        course_id: CourseId,
        section_id: SectionId,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Delete a course document. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn delete_course(&self, id: CourseId) -> Result<bool, StorageError>;
}

/// Repository contract for per-(user, course) progress records.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch the progress record for a user in a course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Progress>, StorageError>;

    /// Upsert the record and add `section_id` to its completed set.
    ///
    /// Also sets the last accessed section and the update time. Returns the
    /// record as stored after the update.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn record_completion(
        &self,
        user_id: UserId,
        course_id: CourseId,
        section_id: SectionId,
        at: DateTime<Utc>,
    ) -> Result<Progress, StorageError>;

    /// Overwrite the cached completion percentage.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no record exists.
    async fn set_progress_percent(
        &self,
        user_id: UserId,
        course_id: CourseId,
        percent: u8,
    ) -> Result<(), StorageError>;

    /// Remove `section_id` from every record of the course.
    ///
    /// Returns how many records were modified.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn pull_completed_section(
        &self,
        course_id: CourseId,
        section_id: SectionId,
    ) -> Result<u64, StorageError>;

    /// All progress records of a course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_course_progress(&self, course_id: CourseId)
    -> Result<Vec<Progress>, StorageError>;

    /// Replace a whole record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn save_progress(&self, progress: &Progress) -> Result<(), StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    courses: Arc<Mutex<HashMap<CourseId, Course>>>,
    next_course_id: Arc<Mutex<u64>>,
    progress: Arc<Mutex<HashMap<(UserId, CourseId), Progress>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait]
impl CourseRepository for InMemoryRepository {
    async fn insert_new_course(&self, course: NewCourseRecord) -> Result<CourseId, StorageError> {
        let id = {
            let mut next = self.next_course_id.lock().map_err(poisoned)?;
            *next += 1;
            CourseId::new(*next)
        };
        let course = Course::new(id, course.draft, course.created_at)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let mut guard = self.courses.lock().map_err(poisoned)?;
        guard.insert(id, course);
        Ok(id)
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError> {
        let guard = self.courses.lock().map_err(poisoned)?;
        Ok(guard.get(&id).cloned())
    }

    async fn list_courses(&self, limit: u32) -> Result<Vec<Course>, StorageError> {
        let guard = self.courses.lock().map_err(poisoned)?;
        let mut courses: Vec<Course> = guard.values().cloned().collect();
        courses.sort_by_key(Course::id);
        courses.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(courses)
    }

    async fn save_course(&self, course: &Course) -> Result<u64, StorageError> {
        let mut guard = self.courses.lock().map_err(poisoned)?;
        let stored = guard.get_mut(&course.id()).ok_or(StorageError::NotFound)?;
        if stored.revision() != course.revision() {
            return Err(StorageError::Conflict);
        }
        let revision = course.revision() + 1;
        let mut next = course.clone();
        next.set_revision(revision);
        *stored = next;
        Ok(revision)
    }

    async fn pull_section(
        &self,
        course_id: CourseId,
        section_id: SectionId,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut guard = self.courses.lock().map_err(poisoned)?;
        let Some(course) = guard.get_mut(&course_id) else {
            return Ok(false);
        };
        if course.remove_section(section_id, at).is_none() {
            return Ok(false);
        }
        let revision = course.revision() + 1;
        course.set_revision(revision);
        Ok(true)
    }

    async fn delete_course(&self, id: CourseId) -> Result<bool, StorageError> {
        let mut guard = self.courses.lock().map_err(poisoned)?;
        Ok(guard.remove(&id).is_some())
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Progress>, StorageError> {
        let guard = self.progress.lock().map_err(poisoned)?;
        Ok(guard.get(&(user_id, course_id)).cloned())
    }

    async fn record_completion(
        &self,
        user_id: UserId,
        course_id: CourseId,
        section_id: SectionId,
        at: DateTime<Utc>,
    ) -> Result<Progress, StorageError> {
        let mut guard = self.progress.lock().map_err(poisoned)?;
        let progress = guard
            .entry((user_id, course_id))
            .or_insert_with(|| Progress::not_started(user_id, course_id));
        progress.record_completion(section_id, at);
        Ok(progress.clone())
    }

    async fn set_progress_percent(
        &self,
        user_id: UserId,
        course_id: CourseId,
        percent: u8,
    ) -> Result<(), StorageError> {
        let mut guard = self.progress.lock().map_err(poisoned)?;
        let progress = guard
            .get_mut(&(user_id, course_id))
            .ok_or(StorageError::NotFound)?;
        *progress = Progress::from_persisted(
            user_id,
            course_id,
            progress.completed_sections().clone(),
            progress.last_accessed_section(),
            percent,
            progress.updated_at(),
        );
        Ok(())
    }

    async fn pull_completed_section(
        &self,
        course_id: CourseId,
        section_id: SectionId,
    ) -> Result<u64, StorageError> {
        let mut guard = self.progress.lock().map_err(poisoned)?;
        let mut modified = 0_u64;
        for progress in guard.values_mut() {
            if progress.course_id() == course_id && progress.purge_section(section_id) {
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn list_course_progress(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<Progress>, StorageError> {
        let guard = self.progress.lock().map_err(poisoned)?;
        let mut records: Vec<Progress> = guard
            .values()
            .filter(|p| p.course_id() == course_id)
            .cloned()
            .collect();
        records.sort_by_key(Progress::user_id);
        Ok(records)
    }

    async fn save_progress(&self, progress: &Progress) -> Result<(), StorageError> {
        let mut guard = self.progress.lock().map_err(poisoned)?;
        guard.insert((progress.user_id(), progress.course_id()), progress.clone());
        Ok(())
    }
}

/// Aggregates course and progress repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub courses: Arc<dyn CourseRepository>,
    pub progress: Arc<dyn ProgressRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let courses: Arc<dyn CourseRepository> = Arc::new(repo.clone());
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo);
        Self { courses, progress }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::model::{CourseLevel, CourseStatus, SectionDraft, SectionKind};
    use course_core::time::fixed_now;

    fn record() -> NewCourseRecord {
        NewCourseRecord {
            draft: CourseDraft {
                title: "Media 101".into(),
                description: None,
                instructor_name: "Ada".into(),
                category: "Video".into(),
                level: CourseLevel::Beginner,
                status: CourseStatus::Published,
            },
            created_at: fixed_now(),
        }
    }

    #[tokio::test]
    async fn save_course_enforces_revision() {
        let repo = InMemoryRepository::new();
        let id = repo.insert_new_course(record()).await.unwrap();

        let mut first = repo.get_course(id).await.unwrap().unwrap();
        let mut second = first.clone();

        first
            .add_section(SectionDraft::empty(SectionKind::Text, "A"), fixed_now())
            .unwrap();
        assert_eq!(repo.save_course(&first).await.unwrap(), 1);

        second
            .add_section(SectionDraft::empty(SectionKind::Text, "B"), fixed_now())
            .unwrap();
        let err = repo.save_course(&second).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));

        let stored = repo.get_course(id).await.unwrap().unwrap();
        assert_eq!(stored.total_sections(), 1);
        assert_eq!(stored.sections()[0].title(), "A");
    }

    #[tokio::test]
    async fn pull_section_reports_missing() {
        let repo = InMemoryRepository::new();
        let id = repo.insert_new_course(record()).await.unwrap();
        let mut course = repo.get_course(id).await.unwrap().unwrap();
        let section = course
            .add_section(SectionDraft::empty(SectionKind::Quiz, "Q"), fixed_now())
            .unwrap()
            .id();
        repo.save_course(&course).await.unwrap();

        assert!(repo.pull_section(id, section, fixed_now()).await.unwrap());
        assert!(!repo.pull_section(id, section, fixed_now()).await.unwrap());
        assert!(
            !repo
                .pull_section(CourseId::new(99), section, fixed_now())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn pull_completed_section_fans_out_within_course() {
        let repo = InMemoryRepository::new();
        let course = CourseId::new(1);
        let other = CourseId::new(2);
        let section = SectionId::generate();

        for user in 1..=3 {
            repo.record_completion(UserId::new(user), course, section, fixed_now())
                .await
                .unwrap();
        }
        repo.record_completion(UserId::new(1), other, section, fixed_now())
            .await
            .unwrap();

        assert_eq!(repo.pull_completed_section(course, section).await.unwrap(), 3);
        assert_eq!(repo.pull_completed_section(course, section).await.unwrap(), 0);

        let untouched = repo.get_progress(UserId::new(1), other).await.unwrap().unwrap();
        assert!(untouched.is_completed(section));
    }
}
