mod cli;
mod db_url;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{BackendArgs, Cli, Commands};
use course_core::model::{CourseDraft, CoursePatch, SectionDraft, SectionPatch};
use serde::Serialize;
use services::{
    AppServices, BackendSettings, Clock, MediaUpload, ServiceConfig, ServiceError, Viewer,
};

async fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let Some(path) = path else {
        return Ok(ServiceConfig::default());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = ServiceConfig::from_json(&raw)?;
    tracing::debug!(path = %path.display(), "service config loaded");
    Ok(config)
}

fn backend_settings(args: BackendArgs) -> Result<BackendSettings> {
    let signing_secret = args
        .signing_secret
        .context("a signing secret is required (--signing-secret or COURSE_SIGNING_SECRET)")?;
    let db_url = db_url::normalize_sqlite_url(&args.db);
    db_url::prepare_sqlite_file(&db_url)?;
    Ok(BackendSettings {
        db_url,
        blob_root: args.blob_root,
        cdn_base_url: args.cdn_base_url,
        signing_key_id: args.signing_key_id,
        signing_secret,
        ffmpeg: args.ffmpeg,
        ffprobe: args.ffprobe,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn dispatch(services: &AppServices, command: Commands) -> Result<()> {
    match command {
        Commands::CreateCourse {
            title,
            instructor,
            category,
            level,
            status,
            description,
        } => {
            let course = services
                .courses()
                .create_course(CourseDraft {
                    title,
                    description,
                    instructor_name: instructor,
                    category,
                    level,
                    status,
                })
                .await?;
            print_json(&course)
        }
        Commands::ListCourses { limit } => {
            print_json(&services.courses().list_courses(limit).await?)
        }
        Commands::ShowCourse { course } => {
            print_json(&services.courses().get_course(course).await?)
        }
        Commands::UpdateCourse {
            course,
            title,
            instructor,
            category,
            level,
            status,
            description,
        } => {
            let patch = CoursePatch {
                title,
                description,
                instructor_name: instructor,
                category,
                level,
                status,
            };
            print_json(&services.courses().update_course(course, patch).await?)
        }
        Commands::DeleteCourse { course } => {
            print_json(&services.courses().delete_course(course).await?)
        }
        Commands::Enroll { course, user } => {
            let added = services.courses().enroll(course, user).await?;
            print_json(&serde_json::json!({ "course_id": course, "user_id": user, "added": added }))
        }
        Commands::AddSection {
            course,
            kind,
            title,
            description,
            content,
        } => {
            let mut draft = SectionDraft::empty(kind, title);
            if let Some(description) = description {
                draft = draft.with_description(description);
            }
            if let Some(content) = content {
                draft = draft.with_content(content);
            }
            print_json(&services.sections().add_section(course, draft).await?)
        }
        Commands::ListSections { course } => {
            print_json(&services.sections().list_sections(course).await?)
        }
        Commands::UpdateSection {
            course,
            section,
            kind,
            title,
            description,
            content,
        } => {
            let patch = SectionPatch {
                kind,
                title,
                description,
                content,
                video_metadata: None,
            };
            print_json(
                &services
                    .sections()
                    .update_section(course, section, patch)
                    .await?,
            )
        }
        Commands::DeleteSection { course, section } => {
            print_json(&services.sections().delete_section(course, section).await?)
        }
        Commands::AttachMedia {
            course,
            section,
            media,
            file,
        } => {
            let upload = MediaUpload::from_path(file);
            print_json(
                &services
                    .media()
                    .attach_media(course, section, media, &upload)
                    .await?,
            )
        }
        Commands::DetachMedia {
            course,
            section,
            media,
        } => print_json(
            &services
                .media()
                .detach_media(course, section, media)
                .await?,
        ),
        Commands::UploadImage { course, file } => {
            let upload = MediaUpload::from_path(file);
            print_json(&services.media().upload_course_image(course, &upload).await?)
        }
        Commands::Complete {
            course,
            section,
            user,
        } => print_json(
            &services
                .progress()
                .mark_completed(user, course, &section)
                .await?,
        ),
        Commands::Progress { course, user } => {
            print_json(&services.progress().get_progress(user, course).await?)
        }
        Commands::Reconcile { course } => {
            let changed = services.progress().reconcile_course(course).await?;
            print_json(&serde_json::json!({ "course_id": course, "changed": changed }))
        }
        Commands::PlaybackUrl {
            course,
            section,
            user,
            admin,
        } => {
            let viewer = user.map(|id| {
                if admin {
                    Viewer::admin(id)
                } else {
                    Viewer::learner(id)
                }
            });
            print_json(
                &services
                    .playback()
                    .get_playback_url(viewer.as_ref(), course, section)
                    .await?,
            )
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref()).await?;
    let settings = backend_settings(cli.backend)?;
    let services = AppServices::new_sqlite(&settings, Clock::default_clock(), config).await?;
    dispatch(&services, cli.command).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "course_admin=debug,services=debug,storage=debug,course_core=debug".to_string()
        } else {
            "course_admin=info,services=info,storage=warn".to_string()
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli).await {
        match err.downcast_ref::<ServiceError>() {
            Some(service_err) => eprintln!("error ({}): {service_err}", service_err.status_code()),
            None => eprintln!("error: {err:#}"),
        }
        std::process::exit(2);
    }
}
