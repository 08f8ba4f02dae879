use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{CourseId, SectionId, UserId};
use crate::model::section::{
    MediaType, Section, SectionDraft, SectionError, SectionPatch, VideoMetadata,
};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CourseError {
    #[error("course title cannot be empty")]
    EmptyTitle,

    #[error("instructor name cannot be empty")]
    EmptyInstructor,

    #[error("course category cannot be empty")]
    EmptyCategory,

    #[error("unknown course level: {0:?}")]
    UnknownLevel(String),

    #[error("unknown course status: {0:?}")]
    UnknownStatus(String),

    #[error("section {0} not found")]
    SectionNotFound(SectionId),

    #[error("section {0} appears more than once")]
    DuplicateSection(SectionId),

    #[error(transparent)]
    Section(#[from] SectionError),
}

//
// ─── LEVEL / STATUS ────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CourseLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl CourseLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CourseLevel::Beginner => "Beginner",
            CourseLevel::Intermediate => "Intermediate",
            CourseLevel::Advanced => "Advanced",
        }
    }
}

impl fmt::Display for CourseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CourseLevel {
    type Err = CourseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Beginner" => Ok(CourseLevel::Beginner),
            "Intermediate" => Ok(CourseLevel::Intermediate),
            "Advanced" => Ok(CourseLevel::Advanced),
            other => Err(CourseError::UnknownLevel(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CourseStatus {
    Drafts,
    Published,
}

impl CourseStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CourseStatus::Drafts => "Drafts",
            CourseStatus::Published => "Published",
        }
    }
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CourseStatus {
    type Err = CourseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Drafts" => Ok(CourseStatus::Drafts),
            "Published" => Ok(CourseStatus::Published),
            other => Err(CourseError::UnknownStatus(other.to_owned())),
        }
    }
}

//
// ─── DRAFTS ────────────────────────────────────────────────────────────────────
//

/// Unvalidated input for a new course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseDraft {
    pub title: String,
    pub description: Option<String>,
    pub instructor_name: String,
    pub category: String,
    pub level: CourseLevel,
    pub status: CourseStatus,
}

/// Partial update of course details; sections, image and enrollments have
/// their own operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoursePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub instructor_name: Option<String>,
    pub category: Option<String>,
    pub level: Option<CourseLevel>,
    pub status: Option<CourseStatus>,
}

//
// ─── COURSE ────────────────────────────────────────────────────────────────────
//

/// A course and the ordered sections it owns.
///
/// All section mutation goes through the course so that one persisted
/// document is the unit of read-modify-write. `revision` is bumped by the
/// repository on every successful save.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Course {
    id: CourseId,
    title: String,
    description: Option<String>,
    instructor_name: String,
    category: String,
    level: CourseLevel,
    status: CourseStatus,
    image: Option<String>,
    sections: Vec<Section>,
    enrollments: BTreeSet<UserId>,
    revision: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Course {
    /// Creates a new course with no sections.
    ///
    /// # Errors
    ///
    /// Returns `CourseError` if a required text field is blank.
    pub fn new(id: CourseId, draft: CourseDraft, now: DateTime<Utc>) -> Result<Self, CourseError> {
        Ok(Self {
            id,
            title: required(draft.title, CourseError::EmptyTitle)?,
            description: optional(draft.description),
            instructor_name: required(draft.instructor_name, CourseError::EmptyInstructor)?,
            category: required(draft.category, CourseError::EmptyCategory)?,
            level: draft.level,
            status: draft.status,
            image: None,
            sections: Vec::new(),
            enrollments: BTreeSet::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rehydrate a course from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `CourseError` if a required field is blank or a section id is duplicated.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: CourseId,
        draft: CourseDraft,
        image: Option<String>,
        sections: Vec<Section>,
        enrollments: BTreeSet<UserId>,
        revision: u64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, CourseError> {
        let mut seen = HashSet::with_capacity(sections.len());
        for section in &sections {
            if !seen.insert(section.id()) {
                return Err(CourseError::DuplicateSection(section.id()));
            }
        }

        let mut course = Self::new(id, draft, created_at)?;
        course.image = image.filter(|i| !i.is_empty());
        course.sections = sections;
        course.enrollments = enrollments;
        course.revision = revision;
        course.updated_at = updated_at;
        Ok(course)
    }

    // Accessors
    #[must_use]
    pub fn id(&self) -> CourseId {
        self.id
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
    pub fn instructor_name(&self) -> &str {
        &self.instructor_name
    }

    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    #[must_use]
    pub fn level(&self) -> CourseLevel {
        self.level
    }

    #[must_use]
    pub fn status(&self) -> CourseStatus {
        self.status
    }

    #[must_use]
    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }

    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    #[must_use]
    pub fn total_sections(&self) -> usize {
        self.sections.len()
    }

    #[must_use]
    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.sections.iter().find(|s| s.id() == id)
    }

    #[must_use]
    pub fn has_section(&self, id: SectionId) -> bool {
        self.section(id).is_some()
    }

    #[must_use]
    pub fn enrollments(&self) -> &BTreeSet<UserId> {
        &self.enrollments
    }

    #[must_use]
    pub fn is_enrolled(&self, user: UserId) -> bool {
        self.enrollments.contains(&user)
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// A copy of the draft fields, used by storage mappers.
    #[must_use]
    pub fn draft(&self) -> CourseDraft {
        CourseDraft {
            title: self.title.clone(),
            description: self.description.clone(),
            instructor_name: self.instructor_name.clone(),
            category: self.category.clone(),
            level: self.level,
            status: self.status,
        }
    }

    /// Record the revision assigned by the repository after a save.
    pub fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    /// Apply a partial update to the course details.
    ///
    /// # Errors
    ///
    /// Returns `CourseError` if a required field would become blank.
    pub fn apply_patch(
        &mut self,
        patch: CoursePatch,
        now: DateTime<Utc>,
    ) -> Result<(), CourseError> {
        let mut draft = self.draft();
        if let Some(title) = patch.title {
            draft.title = title;
        }
        if let Some(description) = patch.description {
            draft.description = Some(description);
        }
        if let Some(instructor) = patch.instructor_name {
            draft.instructor_name = instructor;
        }
        if let Some(category) = patch.category {
            draft.category = category;
        }
        if let Some(level) = patch.level {
            draft.level = level;
        }
        if let Some(status) = patch.status {
            draft.status = status;
        }

        let validated = Self::new(self.id, draft, self.created_at)?;
        self.title = validated.title;
        self.description = validated.description;
        self.instructor_name = validated.instructor_name;
        self.category = validated.category;
        self.level = validated.level;
        self.status = validated.status;
        self.updated_at = now;
        Ok(())
    }

    /// Replace the course image key. Returns the previous key, if any.
    pub fn set_image(&mut self, key: Option<String>, now: DateTime<Utc>) -> Option<String> {
        self.updated_at = now;
        std::mem::replace(&mut self.image, key.filter(|k| !k.is_empty()))
    }

    /// Enroll a user. Returns `false` if they were already enrolled.
    pub fn enroll(&mut self, user: UserId, now: DateTime<Utc>) -> bool {
        let added = self.enrollments.insert(user);
        if added {
            self.updated_at = now;
        }
        added
    }

    /// Validate `draft` and append it with a fresh id unique within this course.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::Section` if the draft is invalid.
    pub fn add_section(
        &mut self,
        draft: SectionDraft,
        now: DateTime<Utc>,
    ) -> Result<&Section, CourseError> {
        let mut id = SectionId::generate();
        while self.has_section(id) {
            id = SectionId::generate();
        }
        let section = draft.validate(id)?;
        self.sections.push(section);
        self.updated_at = now;
        let last = self.sections.len() - 1;
        Ok(&self.sections[last])
    }

    /// Apply a partial update to one section.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::SectionNotFound` or the section's validation error.
    pub fn update_section(
        &mut self,
        id: SectionId,
        patch: SectionPatch,
        now: DateTime<Utc>,
    ) -> Result<&Section, CourseError> {
        let section = self.section_mut(id)?;
        section.apply_patch(patch)?;
        self.updated_at = now;
        self.section(id).ok_or(CourseError::SectionNotFound(id))
    }

    /// Remove a section, returning it if it existed.
    pub fn remove_section(&mut self, id: SectionId, now: DateTime<Utc>) -> Option<Section> {
        let index = self.sections.iter().position(|s| s.id() == id)?;
        self.updated_at = now;
        Some(self.sections.remove(index))
    }

    /// Attach stored media to a section whose kind matches `media`.
    /// Returns the key that was replaced, if any.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::SectionNotFound`, or `CourseError::Section` for a
    /// kind mismatch or invalid media state.
    pub fn attach_media(
        &mut self,
        id: SectionId,
        media: MediaType,
        key: impl Into<String>,
        video_metadata: Option<VideoMetadata>,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, CourseError> {
        let section = self.section_mut(id)?;
        section.ensure_media_type(media)?;
        let previous = section.attach(key, video_metadata)?;
        self.updated_at = now;
        Ok(previous)
    }

    /// Clear the media of a section whose kind matches `media`.
    /// Returns the removed key, if any.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::SectionNotFound` or `CourseError::Section` for a kind mismatch.
    pub fn detach_media(
        &mut self,
        id: SectionId,
        media: MediaType,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, CourseError> {
        let section = self.section_mut(id)?;
        section.ensure_media_type(media)?;
        let removed = section.detach();
        self.updated_at = now;
        Ok(removed)
    }

    fn section_mut(&mut self, id: SectionId) -> Result<&mut Section, CourseError> {
        self.sections
            .iter_mut()
            .find(|s| s.id() == id)
            .ok_or(CourseError::SectionNotFound(id))
    }
}

fn required(value: String, err: CourseError) -> Result<String, CourseError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(err);
    }
    Ok(trimmed.to_owned())
}

fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
