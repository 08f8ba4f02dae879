use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use course_core::model::{
    CourseId, CourseLevel, CourseStatus, MediaType, SectionId, SectionKind, UserId,
};

#[derive(Parser)]
#[command(name = "course-admin")]
#[command(author, version, about = "Course media and learner progress administration")]
pub struct Cli {
    /// Path to a JSON service config
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args)]
pub struct BackendArgs {
    /// `SQLite` database URL
    #[arg(long, global = true, env = "COURSE_DB_URL", default_value = "sqlite:dev.sqlite3")]
    pub db: String,

    /// Directory holding uploaded media
    #[arg(long, global = true, env = "COURSE_BLOB_ROOT", default_value = "media")]
    pub blob_root: PathBuf,

    /// Base URL playback links are signed against
    #[arg(
        long,
        global = true,
        env = "COURSE_CDN_BASE_URL",
        default_value = "http://localhost:8080/media/"
    )]
    pub cdn_base_url: String,

    /// Identifier of the signing key
    #[arg(long, global = true, env = "COURSE_SIGNING_KEY_ID", default_value = "dev")]
    pub signing_key_id: String,

    /// Secret used to sign playback URLs
    #[arg(long, global = true, env = "COURSE_SIGNING_SECRET", hide_env_values = true)]
    pub signing_secret: Option<String>,

    /// ffmpeg binary
    #[arg(long, global = true, env = "COURSE_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// ffprobe binary
    #[arg(long, global = true, env = "COURSE_FFPROBE", default_value = "ffprobe")]
    pub ffprobe: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a course
    CreateCourse {
        #[arg(long)]
        title: String,

        #[arg(long)]
        instructor: String,

        #[arg(long)]
        category: String,

        /// Beginner, Intermediate or Advanced
        #[arg(long, default_value = "Beginner")]
        level: CourseLevel,

        /// Drafts or Published
        #[arg(long, default_value = "Drafts")]
        status: CourseStatus,

        #[arg(long)]
        description: Option<String>,
    },

    /// List courses in creation order
    ListCourses {
        #[arg(long, default_value = "50")]
        limit: u32,
    },

    /// Show one course with its sections
    ShowCourse { course: CourseId },

    /// Change course details
    UpdateCourse {
        course: CourseId,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        instructor: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        level: Option<CourseLevel>,

        #[arg(long)]
        status: Option<CourseStatus>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Delete a course and all of its media
    DeleteCourse { course: CourseId },

    /// Enroll a learner in a course
    Enroll {
        course: CourseId,

        #[arg(long)]
        user: UserId,
    },

    /// Append a section to a course
    AddSection {
        course: CourseId,

        /// Text, Quiz, Video or Pdf
        #[arg(long)]
        kind: SectionKind,

        #[arg(long)]
        title: String,

        #[arg(long)]
        description: Option<String>,

        /// Inline content for Text and Quiz sections
        #[arg(long)]
        content: Option<String>,
    },

    /// List the sections of a course
    ListSections { course: CourseId },

    /// Change a section's fields
    UpdateSection {
        course: CourseId,
        section: SectionId,

        #[arg(long)]
        kind: Option<SectionKind>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        content: Option<String>,
    },

    /// Delete a section and strip it from learner progress
    DeleteSection { course: CourseId, section: SectionId },

    /// Upload a video or PDF into a section
    AttachMedia {
        course: CourseId,
        section: SectionId,

        /// Video or Pdf
        #[arg(long)]
        media: MediaType,

        #[arg(required = true)]
        file: PathBuf,
    },

    /// Remove a section's video or PDF
    DetachMedia {
        course: CourseId,
        section: SectionId,

        #[arg(long)]
        media: MediaType,
    },

    /// Replace the course image
    UploadImage {
        course: CourseId,

        #[arg(required = true)]
        file: PathBuf,
    },

    /// Mark a section completed for a learner
    Complete {
        course: CourseId,
        section: String,

        #[arg(long)]
        user: UserId,
    },

    /// Show a learner's progress in a course
    Progress {
        course: CourseId,

        #[arg(long)]
        user: UserId,
    },

    /// Drop progress entries pointing at sections that no longer exist
    Reconcile { course: CourseId },

    /// Issue a signed playback URL for a video section
    PlaybackUrl {
        course: CourseId,
        section: SectionId,

        /// Viewer; omit to request anonymously
        #[arg(long)]
        user: Option<UserId>,

        /// Treat the viewer as an administrator
        #[arg(long, requires = "user")]
        admin: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_typed_ids_and_kinds() {
        let cli = Cli::try_parse_from([
            "course-admin",
            "attach-media",
            "7",
            "3f1c2b9e-6a43-4d0e-9a57-0c7f2e1d5a10",
            "--media",
            "Video",
            "intro.mp4",
        ])
        .unwrap();
        match cli.command {
            Commands::AttachMedia {
                course,
                media,
                file,
                ..
            } => {
                assert_eq!(course, CourseId::new(7));
                assert_eq!(media, MediaType::Video);
                assert_eq!(file, PathBuf::from("intro.mp4"));
            }
            _ => panic!("expected attach-media"),
        }
    }

    #[test]
    fn rejects_unknown_section_kind() {
        let err = Cli::try_parse_from([
            "course-admin",
            "add-section",
            "1",
            "--kind",
            "Podcast",
            "--title",
            "Episode",
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn admin_flag_requires_a_user() {
        let err = Cli::try_parse_from([
            "course-admin",
            "playback-url",
            "1",
            "3f1c2b9e-6a43-4d0e-9a57-0c7f2e1d5a10",
            "--admin",
        ]);
        assert!(err.is_err());
    }
}
