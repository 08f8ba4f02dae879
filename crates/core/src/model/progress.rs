use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::model::ids::{CourseId, SectionId, UserId};

/// Completion percentage for `completed` out of `total` sections.
///
/// Rounds half away from zero, returns `0` for a course without sections and
/// never exceeds `100`.
#[must_use]
pub fn completion_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total);
    // Integer form of round(100 * completed / total).
    let rounded = (200 * completed + total) / (2 * total);
    u8::try_from(rounded.min(100)).unwrap_or(100)
}

/// Per-user, per-course completion state.
///
/// `progress_percent` is a cached value. It is refreshed whenever a
/// completion is recorded, but not when a section reference is purged, so it
/// may be stale until the next completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    user_id: UserId,
    course_id: CourseId,
    completed_sections: BTreeSet<SectionId>,
    last_accessed_section: Option<SectionId>,
    progress_percent: u8,
    updated_at: Option<DateTime<Utc>>,
}

impl Progress {
    /// The synthetic record returned for a course the user has not started.
    #[must_use]
    pub fn not_started(user_id: UserId, course_id: CourseId) -> Self {
        Self {
            user_id,
            course_id,
            completed_sections: BTreeSet::new(),
            last_accessed_section: None,
            progress_percent: 0,
            updated_at: None,
        }
    }

    /// Rehydrate a progress record from persisted storage.
    #[must_use]
    pub fn from_persisted(
        user_id: UserId,
        course_id: CourseId,
        completed_sections: BTreeSet<SectionId>,
        last_accessed_section: Option<SectionId>,
        progress_percent: u8,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            user_id,
            course_id,
            completed_sections,
            last_accessed_section,
            progress_percent: progress_percent.min(100),
            updated_at,
        }
    }

    // Accessors
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn completed_sections(&self) -> &BTreeSet<SectionId> {
        &self.completed_sections
    }

    #[must_use]
    pub fn is_completed(&self, section: SectionId) -> bool {
        self.completed_sections.contains(&section)
    }

    #[must_use]
    pub fn last_accessed_section(&self) -> Option<SectionId> {
        self.last_accessed_section
    }

    #[must_use]
    pub fn progress_percent(&self) -> u8 {
        self.progress_percent
    }

    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.updated_at.is_some()
    }

    /// Add `section` to the completed set (idempotent) and mark it as last accessed.
    pub fn record_completion(&mut self, section: SectionId, now: DateTime<Utc>) {
        self.completed_sections.insert(section);
        self.last_accessed_section = Some(section);
        self.updated_at = Some(now);
    }

    /// Recompute the cached percentage. Returns `true` if the value changed.
    pub fn refresh_percent(&mut self, total_sections: usize) -> bool {
        let percent = completion_percent(self.completed_sections.len(), total_sections);
        if percent == self.progress_percent {
            return false;
        }
        self.progress_percent = percent;
        true
    }

    /// Drop every reference to `section`. Returns `true` if anything changed.
    ///
    /// Leaves `progress_percent` as is.
    pub fn purge_section(&mut self, section: SectionId) -> bool {
        let removed = self.completed_sections.remove(&section);
        let cleared = self.last_accessed_section == Some(section);
        if cleared {
            self.last_accessed_section = None;
        }
        removed || cleared
    }

    /// Drop every reference to a section not in `existing`. Returns the number
    /// of ids removed from the completed set.
    pub fn retain_sections(&mut self, existing: &BTreeSet<SectionId>) -> usize {
        let before = self.completed_sections.len();
        self.completed_sections.retain(|id| existing.contains(id));
        if self
            .last_accessed_section
            .is_some_and(|id| !existing.contains(&id))
        {
            self.last_accessed_section = None;
        }
        before - self.completed_sections.len()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn percent_rounds_and_handles_empty_course() {
        assert_eq!(completion_percent(0, 0), 0);
        assert_eq!(completion_percent(3, 0), 0);
        assert_eq!(completion_percent(2, 4), 50);
        assert_eq!(completion_percent(1, 3), 33);
        assert_eq!(completion_percent(2, 3), 67);
        assert_eq!(completion_percent(1, 8), 13);
        assert_eq!(completion_percent(4, 4), 100);
        assert_eq!(completion_percent(9, 4), 100);
    }

    #[test]
    fn not_started_is_zero_valued() {
        let p = Progress::not_started(UserId::new(1), CourseId::new(2));
        assert!(p.completed_sections().is_empty());
        assert_eq!(p.progress_percent(), 0);
        assert_eq!(p.last_accessed_section(), None);
        assert!(!p.is_started());
    }

    #[test]
    fn record_completion_is_idempotent() {
        let mut p = Progress::not_started(UserId::new(1), CourseId::new(2));
        let s = SectionId::generate();
        p.record_completion(s, fixed_now());
        assert!(p.refresh_percent(4));
        let once = p.clone();

        p.record_completion(s, fixed_now());
        assert!(!p.refresh_percent(4));
        assert_eq!(p, once);
        assert_eq!(p.progress_percent(), 25);
    }

    #[test]
    fn purge_keeps_percent_stale() {
        let mut p = Progress::not_started(UserId::new(1), CourseId::new(2));
        let a = SectionId::generate();
        let b = SectionId::generate();
        p.record_completion(a, fixed_now());
        p.record_completion(b, fixed_now());
        p.refresh_percent(4);
        assert_eq!(p.progress_percent(), 50);

        assert!(p.purge_section(b));
        assert_eq!(p.completed_sections().len(), 1);
        assert_eq!(p.last_accessed_section(), None);
        assert_eq!(p.progress_percent(), 50);

        assert!(!p.purge_section(b));
    }

    #[test]
    fn retain_sections_drops_dangling_ids() {
        let mut p = Progress::not_started(UserId::new(1), CourseId::new(2));
        let keep = SectionId::generate();
        let gone = SectionId::generate();
        p.record_completion(keep, fixed_now());
        p.record_completion(gone, fixed_now());

        let existing = BTreeSet::from([keep]);
        assert_eq!(p.retain_sections(&existing), 1);
        assert!(p.is_completed(keep));
        assert!(!p.is_completed(gone));
        assert_eq!(p.last_accessed_section(), None);
    }
}
