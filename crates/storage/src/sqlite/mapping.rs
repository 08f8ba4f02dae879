use course_core::model::{
    CourseDraft, CourseId, CourseLevel, CourseStatus, Section, SectionId, SectionKind, UserId,
    VideoMetadata,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn u64_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn course_id_from_i64(v: i64) -> Result<CourseId, StorageError> {
    Ok(CourseId::new(i64_to_u64("course_id", v)?))
}

pub(crate) fn user_id_from_i64(v: i64) -> Result<UserId, StorageError> {
    Ok(UserId::new(i64_to_u64("user_id", v)?))
}

pub(crate) fn course_id_to_i64(id: CourseId) -> Result<i64, StorageError> {
    u64_to_i64("course_id", id.value())
}

pub(crate) fn user_id_to_i64(id: UserId) -> Result<i64, StorageError> {
    u64_to_i64("user_id", id.value())
}

pub(crate) fn section_id_from_str(s: &str) -> Result<SectionId, StorageError> {
    s.parse::<SectionId>().map_err(ser)
}

pub(crate) fn course_draft_from_row(row: &SqliteRow) -> Result<CourseDraft, StorageError> {
    let level: String = row.try_get("level").map_err(ser)?;
    let status: String = row.try_get("status").map_err(ser)?;
    Ok(CourseDraft {
        title: row.try_get("title").map_err(ser)?,
        description: row.try_get("description").map_err(ser)?,
        instructor_name: row.try_get("instructor_name").map_err(ser)?,
        category: row.try_get("category").map_err(ser)?,
        level: level.parse::<CourseLevel>().map_err(ser)?,
        status: status.parse::<CourseStatus>().map_err(ser)?,
    })
}

/// Flattened video metadata columns of a section row.
pub(crate) struct VideoColumns {
    pub duration_secs: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub format: Option<String>,
}

impl VideoColumns {
    pub(crate) fn from_metadata(meta: Option<&VideoMetadata>) -> Self {
        Self {
            duration_secs: meta.map(VideoMetadata::duration_secs),
            width: meta.map(|m| i64::from(m.width())),
            height: meta.map(|m| i64::from(m.height())),
            format: meta.map(|m| m.format().to_owned()),
        }
    }

    fn into_metadata(self) -> Result<Option<VideoMetadata>, StorageError> {
        match (self.duration_secs, self.width, self.height, self.format) {
            (None, None, None, None) => Ok(None),
            (Some(duration), Some(width), Some(height), Some(format)) => {
                let width = u32::try_from(width)
                    .map_err(|_| StorageError::Serialization("video_width overflow".into()))?;
                let height = u32::try_from(height)
                    .map_err(|_| StorageError::Serialization("video_height overflow".into()))?;
                VideoMetadata::new(duration, width, height, format)
                    .map(Some)
                    .map_err(ser)
            }
            _ => Err(StorageError::Serialization(
                "partial video metadata columns".into(),
            )),
        }
    }
}

pub(crate) fn map_section_row(row: &SqliteRow) -> Result<Section, StorageError> {
    let id: String = row.try_get("id").map_err(ser)?;
    let kind: String = row.try_get("kind").map_err(ser)?;
    let video = VideoColumns {
        duration_secs: row.try_get("video_duration_secs").map_err(ser)?,
        width: row.try_get("video_width").map_err(ser)?,
        height: row.try_get("video_height").map_err(ser)?,
        format: row.try_get("video_format").map_err(ser)?,
    };

    Section::from_persisted(
        section_id_from_str(&id)?,
        kind.parse::<SectionKind>().map_err(ser)?,
        row.try_get("title").map_err(ser)?,
        row.try_get("description").map_err(ser)?,
        row.try_get("content").map_err(ser)?,
        video.into_metadata()?,
    )
    .map_err(ser)
}
