use chrono::{DateTime, Utc};
use course_core::model::{CourseId, Progress, SectionId, UserId};
use sqlx::{Row, SqliteConnection};
use std::collections::BTreeSet;

use super::SqliteRepository;
use super::mapping::{
    conn, course_id_to_i64, section_id_from_str, ser, user_id_from_i64, user_id_to_i64,
};
use crate::repository::{ProgressRepository, StorageError};

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<Progress>, StorageError> {
        let mut c = self.pool.acquire().await.map_err(conn)?;
        fetch_progress(&mut *c, user_id, course_id).await
    }

    async fn record_completion(
        &self,
        user_id: UserId,
        course_id: CourseId,
        section_id: SectionId,
        at: DateTime<Utc>,
    ) -> Result<Progress, StorageError> {
        let user = user_id_to_i64(user_id)?;
        let course = course_id_to_i64(course_id)?;
        let section = section_id.to_string();

        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO course_progress
                (user_id, course_id, last_accessed_section, progress_percent, updated_at)
            VALUES (?1, ?2, ?3, 0, ?4)
            ON CONFLICT(user_id, course_id) DO UPDATE SET
                last_accessed_section = excluded.last_accessed_section,
                updated_at = excluded.updated_at
            ",
        )
        .bind(user)
        .bind(course)
        .bind(section.as_str())
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO progress_completed_sections (user_id, course_id, section_id)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id, course_id, section_id) DO NOTHING
            ",
        )
        .bind(user)
        .bind(course)
        .bind(section.as_str())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        let progress = fetch_progress(&mut *tx, user_id, course_id)
            .await?
            .ok_or(StorageError::NotFound)?;
        tx.commit().await.map_err(conn)?;
        Ok(progress)
    }

    async fn set_progress_percent(
        &self,
        user_id: UserId,
        course_id: CourseId,
        percent: u8,
    ) -> Result<(), StorageError> {
        let res = sqlx::query(
            "UPDATE course_progress SET progress_percent = ?1 \
             WHERE user_id = ?2 AND course_id = ?3",
        )
        .bind(i64::from(percent.min(100)))
        .bind(user_id_to_i64(user_id)?)
        .bind(course_id_to_i64(course_id)?)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn pull_completed_section(
        &self,
        course_id: CourseId,
        section_id: SectionId,
    ) -> Result<u64, StorageError> {
        let course = course_id_to_i64(course_id)?;
        let section = section_id.to_string();

        let mut tx = self.pool.begin().await.map_err(conn)?;

        let touched: i64 = sqlx::query(
            r"
            SELECT COUNT(*) AS touched
            FROM course_progress p
            WHERE p.course_id = ?1
              AND (
                p.last_accessed_section = ?2
                OR EXISTS (
                    SELECT 1 FROM progress_completed_sections c
                    WHERE c.user_id = p.user_id
                      AND c.course_id = p.course_id
                      AND c.section_id = ?2
                )
              )
            ",
        )
        .bind(course)
        .bind(section.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(conn)?
        .try_get("touched")
        .map_err(ser)?;

        sqlx::query(
            "DELETE FROM progress_completed_sections WHERE course_id = ?1 AND section_id = ?2",
        )
        .bind(course)
        .bind(section.as_str())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query(
            r"
            UPDATE course_progress SET last_accessed_section = NULL
            WHERE course_id = ?1 AND last_accessed_section = ?2
            ",
        )
        .bind(course)
        .bind(section.as_str())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;
        u64::try_from(touched)
            .map_err(|_| StorageError::Serialization("count sign overflow".into()))
    }

    async fn list_course_progress(
        &self,
        course_id: CourseId,
    ) -> Result<Vec<Progress>, StorageError> {
        let mut c = self.pool.acquire().await.map_err(conn)?;
        let rows = sqlx::query(
            "SELECT user_id FROM course_progress WHERE course_id = ?1 ORDER BY user_id ASC",
        )
        .bind(course_id_to_i64(course_id)?)
        .fetch_all(&mut *c)
        .await
        .map_err(conn)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let user = user_id_from_i64(row.try_get::<i64, _>("user_id").map_err(ser)?)?;
            if let Some(progress) = fetch_progress(&mut *c, user, course_id).await? {
                records.push(progress);
            }
        }
        Ok(records)
    }

    async fn save_progress(&self, progress: &Progress) -> Result<(), StorageError> {
        let user = user_id_to_i64(progress.user_id())?;
        let course = course_id_to_i64(progress.course_id())?;

        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO course_progress
                (user_id, course_id, last_accessed_section, progress_percent, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, course_id) DO UPDATE SET
                last_accessed_section = excluded.last_accessed_section,
                progress_percent = excluded.progress_percent,
                updated_at = excluded.updated_at
            ",
        )
        .bind(user)
        .bind(course)
        .bind(progress.last_accessed_section().map(|s| s.to_string()))
        .bind(i64::from(progress.progress_percent()))
        .bind(progress.updated_at())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query("DELETE FROM progress_completed_sections WHERE user_id = ?1 AND course_id = ?2")
            .bind(user)
            .bind(course)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for section in progress.completed_sections() {
            sqlx::query(
                "INSERT INTO progress_completed_sections (user_id, course_id, section_id) \
                 VALUES (?1, ?2, ?3)",
            )
            .bind(user)
            .bind(course)
            .bind(section.to_string())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }
}

async fn fetch_progress(
    c: &mut SqliteConnection,
    user_id: UserId,
    course_id: CourseId,
) -> Result<Option<Progress>, StorageError> {
    let user = user_id_to_i64(user_id)?;
    let course = course_id_to_i64(course_id)?;

    let Some(row) = sqlx::query(
        r"
        SELECT last_accessed_section, progress_percent, updated_at
        FROM course_progress
        WHERE user_id = ?1 AND course_id = ?2
        ",
    )
    .bind(user)
    .bind(course)
    .fetch_optional(&mut *c)
    .await
    .map_err(conn)?
    else {
        return Ok(None);
    };

    let completed_rows = sqlx::query(
        r"
        SELECT section_id FROM progress_completed_sections
        WHERE user_id = ?1 AND course_id = ?2
        ",
    )
    .bind(user)
    .bind(course)
    .fetch_all(&mut *c)
    .await
    .map_err(conn)?;

    let mut completed = BTreeSet::new();
    for completed_row in &completed_rows {
        let raw: String = completed_row.try_get("section_id").map_err(ser)?;
        completed.insert(section_id_from_str(&raw)?);
    }

    let last_accessed = row
        .try_get::<Option<String>, _>("last_accessed_section")
        .map_err(ser)?
        .as_deref()
        .map(section_id_from_str)
        .transpose()?;
    let percent: i64 = row.try_get("progress_percent").map_err(ser)?;
    let percent = u8::try_from(percent)
        .map_err(|_| StorageError::Serialization(format!("invalid progress_percent: {percent}")))?;

    Ok(Some(Progress::from_persisted(
        user_id,
        course_id,
        completed,
        last_accessed,
        percent,
        row.try_get("updated_at").map_err(ser)?,
    )))
}
