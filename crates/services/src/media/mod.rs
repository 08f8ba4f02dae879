//! Section media: upload, transcode, attach, detach and cleanup.

pub mod keys;
mod service;
mod transcoder;

pub use keys::AssetLocation;
pub use service::{
    AttachedMedia, CleanupFailure, CourseImageUpdate, DetachedMedia, MediaCleanupReport,
    MediaService, MediaUpload,
};
pub use transcoder::{
    FfmpegTranscoder, MANIFEST_NAME, MediaTranscoder, TranscodeError, TranscodeOutput, VideoProbe,
};
