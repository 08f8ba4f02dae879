use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::SectionId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SectionError {
    #[error("section title cannot be empty")]
    EmptyTitle,

    #[error("unknown section type: {0:?}")]
    UnknownKind(String),

    #[error("unknown media type: {0:?}")]
    UnknownMediaType(String),

    #[error("video duration must be a finite, non-negative number of seconds")]
    InvalidVideoDuration,

    #[error("video dimensions cannot be zero")]
    InvalidVideoDimensions,

    #[error("video format cannot be empty")]
    EmptyVideoFormat,

    #[error("video metadata requires attached content")]
    MetadataWithoutContent,

    #[error("video metadata is only allowed on Video sections, not {kind}")]
    MetadataOnNonVideo { kind: SectionKind },

    #[error("a Video section with content must carry video metadata")]
    MissingVideoMetadata,

    #[error("section does not contain a {media} (section type is {section})")]
    KindMismatch {
        section: SectionKind,
        media: MediaType,
    },

    #[error("media key cannot be empty")]
    EmptyMediaKey,

    #[error("cannot change a section from {from} to {to} while it has content; clear it first")]
    KindChangeWithContent { from: SectionKind, to: SectionKind },
}

//
// ─── KINDS ─────────────────────────────────────────────────────────────────────
//

/// The content type of a section.
///
/// String forms are exact and case-sensitive: `"Video"` parses, `"video"` does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SectionKind {
    Text,
    Quiz,
    Video,
    Pdf,
}

impl SectionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SectionKind::Text => "Text",
            SectionKind::Quiz => "Quiz",
            SectionKind::Video => "Video",
            SectionKind::Pdf => "Pdf",
        }
    }

    /// The media type this kind accepts, if any.
    #[must_use]
    pub fn media_type(self) -> Option<MediaType> {
        match self {
            SectionKind::Video => Some(MediaType::Video),
            SectionKind::Pdf => Some(MediaType::Pdf),
            SectionKind::Text | SectionKind::Quiz => None,
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionKind {
    type Err = SectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Text" => Ok(SectionKind::Text),
            "Quiz" => Ok(SectionKind::Quiz),
            "Video" => Ok(SectionKind::Video),
            "Pdf" => Ok(SectionKind::Pdf),
            other => Err(SectionError::UnknownKind(other.to_owned())),
        }
    }
}

/// Media a caller attaches to (or detaches from) a section.
///
/// Always chosen explicitly by the caller and compared against the section's
/// declared kind; never inferred from the section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MediaType {
    Video,
    Pdf,
}

impl MediaType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Video => "Video",
            MediaType::Pdf => "Pdf",
        }
    }

    #[must_use]
    pub fn section_kind(self) -> SectionKind {
        match self {
            MediaType::Video => SectionKind::Video,
            MediaType::Pdf => SectionKind::Pdf,
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = SectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Video" => Ok(MediaType::Video),
            "Pdf" => Ok(MediaType::Pdf),
            other => Err(SectionError::UnknownMediaType(other.to_owned())),
        }
    }
}

//
// ─── VIDEO METADATA ────────────────────────────────────────────────────────────
//

/// Structural metadata of an attached video, derived from the probe at upload time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoMetadata {
    duration_secs: f64,
    width: u32,
    height: u32,
    format: String,
}

impl VideoMetadata {
    /// Creates validated video metadata.
    ///
    /// # Errors
    ///
    /// Returns `SectionError` if the duration is negative or not finite, a
    /// dimension is zero, or the format is blank.
    pub fn new(
        duration_secs: f64,
        width: u32,
        height: u32,
        format: impl Into<String>,
    ) -> Result<Self, SectionError> {
        if !duration_secs.is_finite() || duration_secs < 0.0 {
            return Err(SectionError::InvalidVideoDuration);
        }
        if width == 0 || height == 0 {
            return Err(SectionError::InvalidVideoDimensions);
        }
        let format = format.into();
        if format.trim().is_empty() {
            return Err(SectionError::EmptyVideoFormat);
        }
        Ok(Self {
            duration_secs,
            width,
            height,
            format: format.trim().to_owned(),
        })
    }

    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn format(&self) -> &str {
        &self.format
    }
}

//
// ─── SECTION ───────────────────────────────────────────────────────────────────
//

/// One content unit of a course.
///
/// `content` is either empty (nothing attached) or an opaque blob key.
/// `video_metadata` is present exactly when the section is a Video section
/// with content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    id: SectionId,
    kind: SectionKind,
    title: String,
    description: Option<String>,
    content: String,
    video_metadata: Option<VideoMetadata>,
}

impl Section {
    /// Rehydrate a section from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `SectionError` if the stored values violate a section invariant.
    pub fn from_persisted(
        id: SectionId,
        kind: SectionKind,
        title: String,
        description: Option<String>,
        content: String,
        video_metadata: Option<VideoMetadata>,
    ) -> Result<Self, SectionError> {
        let section = Self {
            id,
            kind,
            title: normalize_title(title)?,
            description: normalize_description(description),
            content,
            video_metadata,
        };
        section.check_media_invariant()?;
        Ok(section)
    }

    // Accessors
    #[must_use]
    pub fn id(&self) -> SectionId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> SectionKind {
        self.kind
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn video_metadata(&self) -> Option<&VideoMetadata> {
        self.video_metadata.as_ref()
    }

    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    /// True when this is a Video section with something to play.
    #[must_use]
    pub fn is_playable(&self) -> bool {
        self.kind == SectionKind::Video && self.has_content()
    }

    /// Checks that `media` is exactly the media this section declares.
    ///
    /// # Errors
    ///
    /// Returns `SectionError::KindMismatch` when the kinds differ.
    pub fn ensure_media_type(&self, media: MediaType) -> Result<(), SectionError> {
        if self.kind == media.section_kind() {
            Ok(())
        } else {
            Err(SectionError::KindMismatch {
                section: self.kind,
                media,
            })
        }
    }

    /// Apply a partial update. The section is left unchanged on error.
    ///
    /// # Errors
    ///
    /// Returns `SectionError` if the merged section would violate an invariant.
    pub fn apply_patch(&mut self, patch: SectionPatch) -> Result<(), SectionError> {
        let mut next = self.clone();
        if let Some(kind) = patch.kind {
            next.kind = kind;
        }
        if let Some(title) = patch.title {
            next.title = normalize_title(title)?;
        }
        if let Some(description) = patch.description {
            next.description = normalize_description(Some(description));
        }
        if let Some(content) = patch.content {
            if content.is_empty() {
                next.video_metadata = None;
            }
            next.content = content;
        }
        if let Some(metadata) = patch.video_metadata {
            next.video_metadata = Some(metadata);
        }
        let carries_media = self.kind.media_type().is_some() || next.kind.media_type().is_some();
        if next.kind != self.kind && next.has_content() && carries_media {
            return Err(SectionError::KindChangeWithContent {
                from: self.kind,
                to: next.kind,
            });
        }
        next.check_media_invariant()?;
        *self = next;
        Ok(())
    }

    /// Point the section at a stored asset. Returns the previous key, if any.
    ///
    /// # Errors
    ///
    /// Returns `SectionError` if the key is empty, metadata is missing for a
    /// Video section, or metadata is given for any other kind.
    pub fn attach(
        &mut self,
        key: impl Into<String>,
        video_metadata: Option<VideoMetadata>,
    ) -> Result<Option<String>, SectionError> {
        let key = key.into();
        if key.is_empty() {
            return Err(SectionError::EmptyMediaKey);
        }
        match (self.kind, video_metadata.is_some()) {
            (SectionKind::Video, false) => return Err(SectionError::MissingVideoMetadata),
            (kind, true) if kind != SectionKind::Video => {
                return Err(SectionError::MetadataOnNonVideo { kind });
            }
            _ => {}
        }
        let previous = std::mem::replace(&mut self.content, key);
        self.video_metadata = video_metadata;
        Ok(Some(previous).filter(|p| !p.is_empty()))
    }

    /// Clear content and metadata together. Returns the removed key, if any.
    pub fn detach(&mut self) -> Option<String> {
        self.video_metadata = None;
        let previous = std::mem::take(&mut self.content);
        Some(previous).filter(|p| !p.is_empty())
    }

    fn check_media_invariant(&self) -> Result<(), SectionError> {
        match (self.kind, self.has_content(), self.video_metadata.is_some()) {
            (_, false, true) => Err(SectionError::MetadataWithoutContent),
            (SectionKind::Video, true, false) => Err(SectionError::MissingVideoMetadata),
            (kind, true, true) if kind != SectionKind::Video => {
                Err(SectionError::MetadataOnNonVideo { kind })
            }
            _ => Ok(()),
        }
    }
}

fn normalize_title(title: String) -> Result<String, SectionError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(SectionError::EmptyTitle);
    }
    Ok(trimmed.to_owned())
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_owned())
        .filter(|d| !d.is_empty())
}

//
// ─── DRAFTS ────────────────────────────────────────────────────────────────────
//

/// Unvalidated input for a new section.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionDraft {
    pub kind: SectionKind,
    pub title: String,
    pub description: Option<String>,
    pub content: String,
    pub video_metadata: Option<VideoMetadata>,
}

impl SectionDraft {
    /// A draft with no content attached yet.
    pub fn empty(kind: SectionKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            description: None,
            content: String::new(),
            video_metadata: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    #[must_use]
    pub fn with_video_metadata(mut self, metadata: VideoMetadata) -> Self {
        self.video_metadata = Some(metadata);
        self
    }

    /// Validate the draft and bind it to `id`.
    ///
    /// # Errors
    ///
    /// Returns `SectionError` if the draft violates any section invariant.
    pub fn validate(self, id: SectionId) -> Result<Section, SectionError> {
        Section::from_persisted(
            id,
            self.kind,
            self.title,
            self.description,
            self.content,
            self.video_metadata,
        )
    }
}

/// Partial update for a section; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionPatch {
    pub kind: Option<SectionKind>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub video_metadata: Option<VideoMetadata>,
}

impl SectionPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
