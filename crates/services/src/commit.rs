use chrono::{DateTime, Utc};
use course_core::model::{Course, CourseError, CourseId};
use storage::repository::{CourseRepository, StorageError};

use crate::Clock;
use crate::error::ServiceError;

/// Read the course, apply `apply`, and save with the revision check.
///
/// A revision conflict re-reads and re-applies, up to `attempts` times in
/// total. Returns the saved course (with its new revision) and whatever
/// `apply` returned on the attempt that stuck.
pub(crate) async fn commit_with_retry<T, F>(
    courses: &dyn CourseRepository,
    clock: Clock,
    attempts: u32,
    course_id: CourseId,
    mut apply: F,
) -> Result<(Course, T), ServiceError>
where
    F: FnMut(&mut Course, DateTime<Utc>) -> Result<T, CourseError>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let mut course = courses
            .get_course(course_id)
            .await?
            .ok_or_else(|| ServiceError::course_not_found(course_id))?;
        let out = apply(&mut course, clock.now())?;
        match courses.save_course(&course).await {
            Ok(revision) => {
                course.set_revision(revision);
                return Ok((course, out));
            }
            Err(StorageError::Conflict) if attempt < attempts => {
                tracing::debug!(course_id = %course_id, attempt, "revision conflict, retrying");
                attempt += 1;
            }
            Err(StorageError::NotFound) => return Err(ServiceError::course_not_found(course_id)),
            Err(err) => return Err(err.into()),
        }
    }
}
