use chrono::{DateTime, Utc};
use course_core::model::{Course, CourseId, SectionId};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use std::collections::BTreeSet;

use super::SqliteRepository;
use super::mapping::{
    VideoColumns, conn, course_draft_from_row, course_id_from_i64, course_id_to_i64,
    map_section_row, ser, u64_to_i64, user_id_from_i64, user_id_to_i64,
};
use crate::repository::{CourseRepository, NewCourseRecord, StorageError};

#[async_trait::async_trait]
impl CourseRepository for SqliteRepository {
    async fn insert_new_course(&self, course: NewCourseRecord) -> Result<CourseId, StorageError> {
        let draft = course.draft;
        let res = sqlx::query(
            r"
            INSERT INTO courses
                (title, description, instructor_name, category, level, status,
                 image, revision, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 0, ?7, ?7)
            ",
        )
        .bind(draft.title)
        .bind(draft.description)
        .bind(draft.instructor_name)
        .bind(draft.category)
        .bind(draft.level.as_str())
        .bind(draft.status.as_str())
        .bind(course.created_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        course_id_from_i64(res.last_insert_rowid())
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError> {
        // One read transaction so the header, sections and enrollments share a snapshot.
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let row = sqlx::query(
            r"
            SELECT id, title, description, instructor_name, category, level, status,
                   image, revision, created_at, updated_at
            FROM courses WHERE id = ?1
            ",
        )
        .bind(course_id_to_i64(id)?)
        .fetch_optional(&mut *tx)
        .await
        .map_err(conn)?;

        let course = match row {
            Some(row) => Some(hydrate_course(&mut *tx, &row).await?),
            None => None,
        };
        tx.commit().await.map_err(conn)?;
        Ok(course)
    }

    async fn list_courses(&self, limit: u32) -> Result<Vec<Course>, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        let rows = sqlx::query(
            r"
            SELECT id, title, description, instructor_name, category, level, status,
                   image, revision, created_at, updated_at
            FROM courses
            ORDER BY id ASC
            LIMIT ?1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await
        .map_err(conn)?;

        let mut courses = Vec::with_capacity(rows.len());
        for row in rows {
            courses.push(hydrate_course(&mut *tx, &row).await?);
        }
        tx.commit().await.map_err(conn)?;
        Ok(courses)
    }

    async fn save_course(&self, course: &Course) -> Result<u64, StorageError> {
        let course_id = course_id_to_i64(course.id())?;
        let expected = u64_to_i64("revision", course.revision())?;
        let draft = course.draft();

        let mut tx = self.pool.begin().await.map_err(conn)?;

        let res = sqlx::query(
            r"
            UPDATE courses SET
                title = ?1,
                description = ?2,
                instructor_name = ?3,
                category = ?4,
                level = ?5,
                status = ?6,
                image = ?7,
                updated_at = ?8,
                revision = revision + 1
            WHERE id = ?9 AND revision = ?10
            ",
        )
        .bind(draft.title)
        .bind(draft.description)
        .bind(draft.instructor_name)
        .bind(draft.category)
        .bind(draft.level.as_str())
        .bind(draft.status.as_str())
        .bind(course.image())
        .bind(course.updated_at())
        .bind(course_id)
        .bind(expected)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM courses WHERE id = ?1")
                .bind(course_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(conn)?;
            return Err(if exists.is_some() {
                StorageError::Conflict
            } else {
                StorageError::NotFound
            });
        }

        sqlx::query("DELETE FROM course_sections WHERE course_id = ?1")
            .bind(course_id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for (position, section) in course.sections().iter().enumerate() {
            let video = VideoColumns::from_metadata(section.video_metadata());
            sqlx::query(
                r"
                INSERT INTO course_sections (
                    course_id, id, position, kind, title, description, content,
                    video_duration_secs, video_width, video_height, video_format
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ",
            )
            .bind(course_id)
            .bind(section.id().to_string())
            .bind(i64::try_from(position).map_err(ser)?)
            .bind(section.kind().as_str())
            .bind(section.title())
            .bind(section.description())
            .bind(section.content())
            .bind(video.duration_secs)
            .bind(video.width)
            .bind(video.height)
            .bind(video.format)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        sqlx::query("DELETE FROM course_enrollments WHERE course_id = ?1")
            .bind(course_id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for user in course.enrollments() {
            sqlx::query("INSERT INTO course_enrollments (course_id, user_id) VALUES (?1, ?2)")
                .bind(course_id)
                .bind(user_id_to_i64(*user)?)
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(course.revision() + 1)
    }

    async fn pull_section(
        &self,
        course_id: CourseId,
        section_id: SectionId,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let course_id = course_id_to_i64(course_id)?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let res = sqlx::query("DELETE FROM course_sections WHERE course_id = ?1 AND id = ?2")
            .bind(course_id)
            .bind(section_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        if res.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE courses SET revision = revision + 1, updated_at = ?1 WHERE id = ?2",
        )
        .bind(at)
        .bind(course_id)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;
        Ok(true)
    }

    async fn delete_course(&self, id: CourseId) -> Result<bool, StorageError> {
        let res = sqlx::query("DELETE FROM courses WHERE id = ?1")
            .bind(course_id_to_i64(id)?)
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(res.rows_affected() > 0)
    }
}

/// Load the sections and enrollments belonging to a `courses` row.
async fn hydrate_course(
    db: &mut SqliteConnection,
    row: &SqliteRow,
) -> Result<Course, StorageError> {
    let id_raw: i64 = row.try_get("id").map_err(ser)?;

    let section_rows = sqlx::query(
        r"
        SELECT id, kind, title, description, content,
               video_duration_secs, video_width, video_height, video_format
        FROM course_sections
        WHERE course_id = ?1
        ORDER BY position ASC
        ",
    )
    .bind(id_raw)
    .fetch_all(&mut *db)
    .await
    .map_err(conn)?;
    let mut sections = Vec::with_capacity(section_rows.len());
    for section_row in &section_rows {
        sections.push(map_section_row(section_row)?);
    }

    let enrollment_rows =
        sqlx::query("SELECT user_id FROM course_enrollments WHERE course_id = ?1")
            .bind(id_raw)
            .fetch_all(&mut *db)
            .await
            .map_err(conn)?;
    let mut enrollments = BTreeSet::new();
    for enrollment in &enrollment_rows {
        enrollments.insert(user_id_from_i64(
            enrollment.try_get::<i64, _>("user_id").map_err(ser)?,
        )?);
    }

    let revision: i64 = row.try_get("revision").map_err(ser)?;
    Course::from_persisted(
        course_id_from_i64(id_raw)?,
        course_draft_from_row(row)?,
        row.try_get("image").map_err(ser)?,
        sections,
        enrollments,
        u64::try_from(revision)
            .map_err(|_| StorageError::Serialization("revision sign overflow".into()))?,
        row.try_get("created_at").map_err(ser)?,
        row.try_get("updated_at").map_err(ser)?,
    )
    .map_err(ser)
}
