//! Blob key layout for course media.
//!
//! ```text
//! videos/<course>/<section>/<millis>-<uuid>/master.m3u8   (+ segments)
//! course-content/<course>/<section>/<millis>-<uuid>-<file>
//! course-images/<course>/<millis>-<uuid>-<file>
//! ```
//!
//! Every key carries a fresh uuid, so a re-attach never lands on a key that a
//! previous upload used.

use chrono::{DateTime, Utc};
use course_core::model::{CourseId, MediaType, SectionId};
use uuid::Uuid;

use crate::error::ServiceError;

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi"];
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Where an attached asset lives in the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLocation {
    /// Every object under this prefix belongs to the asset.
    Folder(String),
    Object(String),
}

impl AssetLocation {
    /// Derive the location from a section's content key.
    ///
    /// A video key names the manifest, so the asset is the folder holding it.
    #[must_use]
    pub fn for_content(media: MediaType, key: &str) -> Self {
        match (media, key.rsplit_once('/')) {
            (MediaType::Video, Some((dir, _))) if !dir.is_empty() => {
                AssetLocation::Folder(format!("{dir}/"))
            }
            _ => AssetLocation::Object(key.to_owned()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            AssetLocation::Folder(prefix) => prefix,
            AssetLocation::Object(key) => key,
        }
    }
}

#[must_use]
pub fn video_folder(course: CourseId, section: SectionId, now: DateTime<Utc>) -> String {
    format!("videos/{course}/{section}/{}/", unique_stem(now))
}

#[must_use]
pub fn pdf_key(
    course: CourseId,
    section: SectionId,
    file_name: &str,
    now: DateTime<Utc>,
) -> String {
    format!(
        "course-content/{course}/{section}/{}-{}",
        unique_stem(now),
        sanitize_file_name(file_name)
    )
}

#[must_use]
pub fn image_key(course: CourseId, file_name: &str, now: DateTime<Utc>) -> String {
    format!(
        "course-images/{course}/{}-{}",
        unique_stem(now),
        sanitize_file_name(file_name)
    )
}

fn unique_stem(now: DateTime<Utc>) -> String {
    format!("{}-{}", now.timestamp_millis(), Uuid::new_v4().simple())
}

/// Reduce a client-supplied name to `[A-Za-z0-9._-]` with no leading dots.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_owned()
    } else {
        cleaned.to_owned()
    }
}

fn extension(file_name: &str) -> Option<String> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// # Errors
///
/// Returns `ServiceError::Validation` when the file extension does not fit `media`.
pub fn check_upload_name(media: MediaType, file_name: &str) -> Result<(), ServiceError> {
    let ext = extension(file_name);
    let accepted = match media {
        MediaType::Video => ext.as_deref().is_some_and(|e| VIDEO_EXTENSIONS.contains(&e)),
        MediaType::Pdf => ext.as_deref() == Some("pdf"),
    };
    if accepted {
        Ok(())
    } else {
        Err(ServiceError::Validation(format!(
            "{file_name:?} is not an accepted {media} upload"
        )))
    }
}

/// # Errors
///
/// Returns `ServiceError::Validation` for anything but png, jpeg or webp.
pub fn check_image_name(file_name: &str) -> Result<(), ServiceError> {
    match extension(file_name) {
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(ServiceError::Validation(format!(
            "{file_name:?} is not an accepted course image"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::time::fixed_now;

    #[test]
    fn video_keys_are_fresh_folders() {
        let course = CourseId::new(3);
        let section = SectionId::generate();
        let a = video_folder(course, section, fixed_now());
        let b = video_folder(course, section, fixed_now());
        assert_ne!(a, b);
        assert!(a.starts_with(&format!("videos/3/{section}/1700000000000-")));
        assert!(a.ends_with('/'));
    }

    #[test]
    fn video_content_maps_to_its_folder() {
        let loc = AssetLocation::for_content(MediaType::Video, "videos/3/s/123-abc/master.m3u8");
        assert_eq!(loc, AssetLocation::Folder("videos/3/s/123-abc/".into()));
        assert_eq!(
            AssetLocation::for_content(MediaType::Pdf, "course-content/3/s/1-a-notes.pdf"),
            AssetLocation::Object("course-content/3/s/1-a-notes.pdf".into())
        );
        assert_eq!(
            AssetLocation::for_content(MediaType::Video, "loose.m3u8"),
            AssetLocation::Object("loose.m3u8".into())
        );
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("My Notes (v2).pdf"), "My-Notes--v2-.pdf");
        assert_eq!(sanitize_file_name("..."), "upload");
        assert_eq!(sanitize_file_name(r"C:\tmp\slides.pdf"), "slides.pdf");
    }

    #[test]
    fn pdf_and_image_keys_embed_the_clean_name() {
        let section = SectionId::generate();
        let key = pdf_key(CourseId::new(1), section, "a b.pdf", fixed_now());
        assert!(key.starts_with(&format!("course-content/1/{section}/")));
        assert!(key.ends_with("-a-b.pdf"));
        assert!(image_key(CourseId::new(1), "cover.PNG", fixed_now()).ends_with("-cover.PNG"));
    }

    #[test]
    fn upload_extensions_follow_media_type() {
        assert!(check_upload_name(MediaType::Video, "lesson.MOV").is_ok());
        assert!(check_upload_name(MediaType::Video, "lesson.mkv").is_ok());
        assert!(check_upload_name(MediaType::Video, "lesson.pdf").is_err());
        assert!(check_upload_name(MediaType::Pdf, "notes.pdf").is_ok());
        assert!(check_upload_name(MediaType::Pdf, "notes").is_err());
        assert!(check_image_name("cover.jpeg").is_ok());
        assert!(check_image_name("cover.gif").is_err());
    }
}
