#![forbid(unsafe_code)]

pub mod app_services;
mod commit;
pub mod config;
pub mod course_service;
pub mod error;
pub mod media;
pub mod playback_service;
pub mod progress_service;
pub mod section_service;

pub use course_core::Clock;

pub use app_services::{AppServices, BackendSettings};
pub use config::ServiceConfig;
pub use course_service::{CourseDeletion, CourseService};
pub use error::{AppServicesError, ServiceError};
pub use media::{
    AttachedMedia, CourseImageUpdate, DetachedMedia, FfmpegTranscoder, MediaCleanupReport,
    MediaService, MediaTranscoder, MediaUpload, TranscodeError,
};
pub use playback_service::{PlaybackGrant, PlaybackService, Viewer};
pub use progress_service::{ProgressService, PurgeOutcome};
pub use section_service::{SectionDeletion, SectionService};
