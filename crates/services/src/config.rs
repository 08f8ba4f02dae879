//! Tunables shared by the services.
//!
//! Every field has a default, so an empty `{}` document is a valid config.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ServiceError;

/// Longest lifetime a signed playback URL may be given (seven days).
pub const MAX_PLAYBACK_URL_TTL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Lifetime of a signed playback URL.
    pub playback_url_ttl_secs: u64,
    /// Upper bound for probe plus transcode of one upload.
    pub transcode_timeout_secs: u64,
    /// Target length of one HLS segment.
    pub hls_segment_secs: u32,
    /// Attempts at the progress purge after a section delete.
    pub purge_retry_attempts: u32,
    pub purge_retry_backoff_ms: u64,
    /// Re-reads of the course when a media commit hits a revision conflict.
    pub commit_retry_attempts: u32,
    /// Strip a section from completed sets when its media is detached.
    pub purge_progress_on_detach: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            playback_url_ttl_secs: 3600,
            transcode_timeout_secs: 1800,
            hls_segment_secs: 6,
            purge_retry_attempts: 3,
            purge_retry_backoff_ms: 50,
            commit_retry_attempts: 3,
            purge_progress_on_detach: true,
        }
    }
}

impl ServiceConfig {
    /// Parse a config from JSON; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Validation` if the JSON is malformed or a value
    /// is out of range.
    pub fn from_json(json: &str) -> Result<Self, ServiceError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ServiceError::Validation(format!("config parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `ServiceError::Validation` for a zero or oversized TTL, a zero
    /// timeout or segment length, or a zero attempt count.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.playback_url_ttl_secs == 0 {
            return Err(ServiceError::Validation(
                "playback_url_ttl_secs must be positive".into(),
            ));
        }
        if self.playback_url_ttl_secs > MAX_PLAYBACK_URL_TTL_SECS {
            return Err(ServiceError::Validation(format!(
                "playback_url_ttl_secs must be at most {MAX_PLAYBACK_URL_TTL_SECS}"
            )));
        }
        if self.transcode_timeout_secs == 0 {
            return Err(ServiceError::Validation(
                "transcode_timeout_secs must be positive".into(),
            ));
        }
        if self.hls_segment_secs == 0 {
            return Err(ServiceError::Validation(
                "hls_segment_secs must be positive".into(),
            ));
        }
        if self.purge_retry_attempts == 0 {
            return Err(ServiceError::Validation(
                "purge_retry_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// `None` when the TTL does not fit a `chrono::Duration`.
    #[must_use]
    pub fn playback_url_ttl(&self) -> Option<chrono::Duration> {
        i64::try_from(self.playback_url_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    }

    #[must_use]
    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_secs)
    }

    #[must_use]
    pub fn purge_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.purge_retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(ServiceConfig::from_json("{}").unwrap(), ServiceConfig::default());
    }

    #[test]
    fn partial_document_overrides_only_given_fields() {
        let config = ServiceConfig::from_json(
            r#"{"playback_url_ttl_secs": 60, "purge_progress_on_detach": false}"#,
        )
        .unwrap();
        assert_eq!(config.playback_url_ttl(), Some(chrono::Duration::seconds(60)));
        assert_eq!(config.hls_segment_secs, 6);
        assert!(!config.purge_progress_on_detach);
        assert_eq!(config.transcode_timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn rejects_zero_ttl_and_bad_json() {
        assert!(matches!(
            ServiceConfig::from_json(r#"{"playback_url_ttl_secs": 0}"#),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            ServiceConfig::from_json("not json"),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            ServiceConfig::from_json(r#"{"hls_segment_secs": 0}"#),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn rejects_ttl_beyond_a_week() {
        assert!(matches!(
            ServiceConfig::from_json(r#"{"playback_url_ttl_secs": 100000000000000}"#),
            Err(ServiceError::Validation(_))
        ));
        let at_limit = format!(r#"{{"playback_url_ttl_secs": {MAX_PLAYBACK_URL_TTL_SECS}}}"#);
        assert!(ServiceConfig::from_json(&at_limit).is_ok());
    }

    #[test]
    fn unrepresentable_ttl_has_no_duration() {
        let config = ServiceConfig {
            playback_url_ttl_secs: u64::MAX,
            ..ServiceConfig::default()
        };
        assert_eq!(config.playback_url_ttl(), None);
    }
}
