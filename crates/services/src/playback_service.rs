use std::sync::Arc;

use chrono::{DateTime, Utc};
use course_core::model::{CourseId, SectionId, UserId};
use serde::Serialize;
use storage::repository::CourseRepository;
use storage::signing::UrlSigner;

use crate::Clock;
use crate::config::ServiceConfig;
use crate::error::ServiceError;

/// The authenticated caller, as resolved by whatever fronts the services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Viewer {
    #[must_use]
    pub fn learner(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    #[must_use]
    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }
}

/// A time-limited URL for one video manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackGrant {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues signed playback URLs to enrolled learners and admins.
#[derive(Clone)]
pub struct PlaybackService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    signer: Arc<dyn UrlSigner>,
    config: ServiceConfig,
}

impl PlaybackService {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        signer: Arc<dyn UrlSigner>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            clock,
            courses,
            signer,
            config,
        }
    }

    /// Sign the manifest of a Video section for `viewer`.
    ///
    /// Enrollment is checked before the section is looked at, so a viewer
    /// without access learns nothing about the course's sections.
    ///
    /// # Errors
    ///
    /// - `ServiceError::Unauthorized` without a viewer.
    /// - `ServiceError::NotFound` if the course or section does not exist.
    /// - `ServiceError::Forbidden` unless the viewer is enrolled or an admin.
    /// - `ServiceError::Validation` unless the section is a Video with content,
    ///   or if the configured TTL puts the expiry out of range.
    /// - `ServiceError::Signing` if the URL cannot be built.
    pub async fn get_playback_url(
        &self,
        viewer: Option<&Viewer>,
        course_id: CourseId,
        section_id: SectionId,
    ) -> Result<PlaybackGrant, ServiceError> {
        let viewer = viewer.ok_or(ServiceError::Unauthorized)?;
        let course = self
            .courses
            .get_course(course_id)
            .await?
            .ok_or_else(|| ServiceError::course_not_found(course_id))?;

        if !viewer.is_admin && !course.is_enrolled(viewer.user_id) {
            tracing::debug!(
                course_id = %course_id,
                user_id = %viewer.user_id,
                "playback refused: not enrolled"
            );
            return Err(ServiceError::Forbidden(course_id));
        }

        let section = course
            .section(section_id)
            .ok_or_else(|| ServiceError::section_not_found(section_id))?;
        if !section.is_playable() {
            return Err(ServiceError::Validation(format!(
                "section {section_id} has no playable video"
            )));
        }

        let expires_at = self
            .config
            .playback_url_ttl()
            .and_then(|ttl| self.clock.after(ttl))
            .ok_or_else(|| {
                ServiceError::Validation(format!(
                    "playback url ttl of {}s is out of range",
                    self.config.playback_url_ttl_secs
                ))
            })?;
        let url = self.signer.sign(section.content(), expires_at)?;
        tracing::debug!(
            course_id = %course_id,
            section_id = %section_id,
            user_id = %viewer.user_id,
            %expires_at,
            "playback url issued"
        );
        Ok(PlaybackGrant { url, expires_at })
    }
}
