mod course;
mod ids;
mod progress;
mod section;

pub use ids::{CourseId, ParseIdError, SectionId, UserId};

pub use course::{Course, CourseDraft, CourseError, CourseLevel, CoursePatch, CourseStatus};
pub use progress::{Progress, completion_percent};
pub use section::{
    MediaType, Section, SectionDraft, SectionError, SectionKind, SectionPatch, VideoMetadata,
};
