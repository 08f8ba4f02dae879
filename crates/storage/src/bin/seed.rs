use std::fmt;

use chrono::{DateTime, Utc};
use course_core::model::{
    Course, CourseDraft, CourseId, CourseLevel, CourseStatus, SectionDraft, SectionKind, UserId,
};
use storage::repository::{NewCourseRecord, Storage};

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    title: String,
    instructor: String,
    learners: u32,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidLearners { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidLearners { raw } => write!(f, "invalid --learners value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("COURSE_DB_URL").unwrap_or_else(|_| "sqlite:dev.sqlite3".into());
        let mut title = "Video Production Basics".to_owned();
        let mut instructor = "Demo Instructor".to_owned();
        let mut learners = 2;
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--title" => title = require_value(&mut args, "--title")?,
                "--instructor" => instructor = require_value(&mut args, "--instructor")?,
                "--learners" => {
                    let value = require_value(&mut args, "--learners")?;
                    learners = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidLearners { raw: value.clone() })?;
                }
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            title,
            instructor,
            learners,
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:dev.sqlite3)");
    eprintln!("  --title <text>            Course title");
    eprintln!("  --instructor <name>       Instructor name");
    eprintln!("  --learners <n>            Number of enrolled learners, ids 1..=n (default: 2)");
    eprintln!("  --now <rfc3339>           Fixed current time for deterministic seeding");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment: COURSE_DB_URL");
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;
    let now = args.now.unwrap_or_else(Utc::now);

    let draft = Course::new(
        CourseId::new(1),
        CourseDraft {
            title: args.title.clone(),
            description: Some("Seeded demo course".into()),
            instructor_name: args.instructor.clone(),
            category: "Media".into(),
            level: CourseLevel::Beginner,
            status: CourseStatus::Published,
        },
        now,
    )?;
    let course_id = storage
        .courses
        .insert_new_course(NewCourseRecord::from_course(&draft))
        .await?;

    let mut course = storage
        .courses
        .get_course(course_id)
        .await?
        .ok_or("seeded course vanished")?;
    let sections = [
        (SectionKind::Text, "Welcome"),
        (SectionKind::Video, "Lighting a scene"),
        (SectionKind::Pdf, "Shot list template"),
        (SectionKind::Quiz, "Checkpoint"),
    ];
    for (kind, title) in sections {
        course.add_section(SectionDraft::empty(kind, title), now)?;
    }
    for learner in 1..=args.learners {
        course.enroll(UserId::new(u64::from(learner)), now);
    }
    storage.courses.save_course(&course).await?;

    println!(
        "Seeded course {} with {} sections and {} learners into {}",
        course_id,
        course.total_sections(),
        args.learners,
        args.db_url
    );
    for section in course.sections() {
        println!("  {} {} {}", section.id(), section.kind(), section.title());
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
