use chrono::Duration;
use course_core::model::{
    Course, CourseDraft, CourseId, CourseLevel, CourseStatus, MediaType, SectionDraft,
    SectionId, SectionKind, UserId, VideoMetadata,
};
use course_core::time::fixed_now;
use storage::repository::{
    CourseRepository, NewCourseRecord, ProgressRepository, StorageError,
};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn draft(title: &str) -> CourseDraft {
    CourseDraft {
        title: title.into(),
        description: Some("Lighting, framing, sound".into()),
        instructor_name: "Rin".into(),
        category: "Media".into(),
        level: CourseLevel::Advanced,
        status: CourseStatus::Published,
    }
}

async fn seeded_course(repo: &SqliteRepository, title: &str) -> Course {
    let placeholder = Course::new(CourseId::new(1), draft(title), fixed_now()).unwrap();
    let id = repo
        .insert_new_course(NewCourseRecord::from_course(&placeholder))
        .await
        .unwrap();
    repo.get_course(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn sqlite_roundtrip_preserves_sections_metadata_and_enrollments() {
    let repo = connect("memdb_course_roundtrip").await;
    let mut course = seeded_course(&repo, "Filmmaking").await;
    assert_eq!(course.revision(), 0);

    let text = course
        .add_section(SectionDraft::empty(SectionKind::Text, "Welcome"), fixed_now())
        .unwrap()
        .id();
    let video = course
        .add_section(SectionDraft::empty(SectionKind::Video, "Lighting"), fixed_now())
        .unwrap()
        .id();
    let pdf = course
        .add_section(
            SectionDraft::empty(SectionKind::Pdf, "Shot list").with_description("printable"),
            fixed_now(),
        )
        .unwrap()
        .id();
    let meta = VideoMetadata::new(93.25, 1920, 1080, "mov,mp4,m4a,3gp,3g2,mj2").unwrap();
    course
        .attach_media(
            video,
            MediaType::Video,
            "videos/1/lighting/100-a/master.m3u8",
            Some(meta.clone()),
            fixed_now(),
        )
        .unwrap();
    course
        .attach_media(pdf, MediaType::Pdf, "course-content/1/x/shots.pdf", None, fixed_now())
        .unwrap();
    course.enroll(UserId::new(7), fixed_now());
    course.enroll(UserId::new(3), fixed_now());
    course.set_image(Some("course-images/1/cover.png".into()), fixed_now());

    assert_eq!(repo.save_course(&course).await.unwrap(), 1);

    let stored = repo.get_course(course.id()).await.unwrap().unwrap();
    assert_eq!(stored.revision(), 1);
    let order: Vec<_> = stored.sections().iter().map(|s| s.id()).collect();
    assert_eq!(order, vec![text, video, pdf]);
    assert_eq!(stored.section(video).unwrap().video_metadata(), Some(&meta));
    assert_eq!(
        stored.section(pdf).unwrap().content(),
        "course-content/1/x/shots.pdf"
    );
    assert!(stored.section(pdf).unwrap().video_metadata().is_none());
    assert_eq!(stored.section(pdf).unwrap().description(), Some("printable"));
    assert!(stored.is_enrolled(UserId::new(3)));
    assert!(stored.is_enrolled(UserId::new(7)));
    assert_eq!(stored.image(), Some("course-images/1/cover.png"));
    assert_eq!(stored.level(), CourseLevel::Advanced);
}

#[tokio::test]
async fn sqlite_save_with_stale_revision_conflicts() {
    let repo = connect("memdb_course_conflict").await;
    let mut first = seeded_course(&repo, "Editing").await;
    let mut second = first.clone();

    first
        .add_section(SectionDraft::empty(SectionKind::Text, "A"), fixed_now())
        .unwrap();
    repo.save_course(&first).await.unwrap();

    second
        .add_section(SectionDraft::empty(SectionKind::Text, "B"), fixed_now())
        .unwrap();
    let err = repo.save_course(&second).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    let mut ghost = first.clone();
    ghost.set_revision(1);
    repo.delete_course(first.id()).await.unwrap();
    let err = repo.save_course(&ghost).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}

#[tokio::test]
async fn sqlite_pull_section_is_atomic_and_reports_misses() {
    let repo = connect("memdb_pull_section").await;
    let mut course = seeded_course(&repo, "Sound").await;
    let keep = course
        .add_section(SectionDraft::empty(SectionKind::Quiz, "Keep"), fixed_now())
        .unwrap()
        .id();
    let drop = course
        .add_section(SectionDraft::empty(SectionKind::Text, "Drop"), fixed_now())
        .unwrap()
        .id();
    repo.save_course(&course).await.unwrap();

    let later = fixed_now() + Duration::minutes(5);
    assert!(repo.pull_section(course.id(), drop, later).await.unwrap());
    assert!(!repo.pull_section(course.id(), drop, later).await.unwrap());
    assert!(
        !repo
            .pull_section(CourseId::new(404), keep, later)
            .await
            .unwrap()
    );

    let stored = repo.get_course(course.id()).await.unwrap().unwrap();
    assert_eq!(stored.total_sections(), 1);
    assert!(stored.has_section(keep));
    assert_eq!(stored.revision(), 2);
    assert_eq!(stored.updated_at(), later);
}

#[tokio::test]
async fn sqlite_progress_upsert_is_idempotent_and_purge_fans_out() {
    let repo = connect("memdb_progress").await;
    let course = CourseId::new(11);
    let other_course = CourseId::new(12);
    let a = SectionId::generate();
    let b = SectionId::generate();

    let p = repo
        .record_completion(UserId::new(1), course, a, fixed_now())
        .await
        .unwrap();
    assert_eq!(p.completed_sections().len(), 1);
    let p = repo
        .record_completion(UserId::new(1), course, a, fixed_now())
        .await
        .unwrap();
    assert_eq!(p.completed_sections().len(), 1);
    assert_eq!(p.last_accessed_section(), Some(a));

    repo.record_completion(UserId::new(1), course, b, fixed_now())
        .await
        .unwrap();
    repo.record_completion(UserId::new(2), course, b, fixed_now())
        .await
        .unwrap();
    repo.record_completion(UserId::new(3), course, a, fixed_now())
        .await
        .unwrap();
    repo.record_completion(UserId::new(1), other_course, b, fixed_now())
        .await
        .unwrap();
    repo.set_progress_percent(UserId::new(1), course, 50)
        .await
        .unwrap();

    assert_eq!(repo.pull_completed_section(course, b).await.unwrap(), 2);
    assert_eq!(repo.pull_completed_section(course, b).await.unwrap(), 0);

    let user1 = repo.get_progress(UserId::new(1), course).await.unwrap().unwrap();
    assert!(user1.is_completed(a));
    assert!(!user1.is_completed(b));
    assert_eq!(user1.last_accessed_section(), None);
    assert_eq!(user1.progress_percent(), 50);

    let untouched = repo
        .get_progress(UserId::new(1), other_course)
        .await
        .unwrap()
        .unwrap();
    assert!(untouched.is_completed(b));

    let all = repo.list_course_progress(course).await.unwrap();
    let users: Vec<_> = all.iter().map(|p| p.user_id()).collect();
    assert_eq!(users, vec![UserId::new(1), UserId::new(2), UserId::new(3)]);
}

#[tokio::test]
async fn sqlite_set_percent_without_record_is_not_found() {
    let repo = connect("memdb_percent_missing").await;
    let err = repo
        .set_progress_percent(UserId::new(1), CourseId::new(1), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
    assert!(
        repo.get_progress(UserId::new(1), CourseId::new(1))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn sqlite_save_progress_replaces_completed_set() {
    let repo = connect("memdb_save_progress").await;
    let course = CourseId::new(5);
    let keep = SectionId::generate();
    let gone = SectionId::generate();
    repo.record_completion(UserId::new(9), course, keep, fixed_now())
        .await
        .unwrap();
    let mut progress = repo
        .record_completion(UserId::new(9), course, gone, fixed_now())
        .await
        .unwrap();

    let existing = std::collections::BTreeSet::from([keep]);
    assert_eq!(progress.retain_sections(&existing), 1);
    repo.save_progress(&progress).await.unwrap();

    let stored = repo.get_progress(UserId::new(9), course).await.unwrap().unwrap();
    assert_eq!(stored, progress);
}

#[tokio::test]
async fn sqlite_delete_course_cascades_sections_but_keeps_progress() {
    let repo = connect("memdb_delete_course").await;
    let mut course = seeded_course(&repo, "Color").await;
    let section = course
        .add_section(SectionDraft::empty(SectionKind::Text, "Intro"), fixed_now())
        .unwrap()
        .id();
    course.enroll(UserId::new(1), fixed_now());
    repo.save_course(&course).await.unwrap();
    repo.record_completion(UserId::new(1), course.id(), section, fixed_now())
        .await
        .unwrap();

    assert!(repo.delete_course(course.id()).await.unwrap());
    assert!(!repo.delete_course(course.id()).await.unwrap());
    assert!(repo.get_course(course.id()).await.unwrap().is_none());
    assert!(
        repo.get_progress(UserId::new(1), course.id())
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reads_never_see_a_half_written_course() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("courses.db").display());
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    let id = seeded_course(&repo, "Snapshots").await.id();

    // Every save adds exactly one section, so a consistent read has
    // as many sections as the revision it reports.
    let writer = {
        let repo = repo.clone();
        tokio::spawn(async move {
            for n in 0..25 {
                let mut course = repo.get_course(id).await.unwrap().unwrap();
                course
                    .add_section(
                        SectionDraft::empty(SectionKind::Text, format!("Part {n}")),
                        fixed_now(),
                    )
                    .unwrap();
                repo.save_course(&course).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    loop {
        let course = repo.get_course(id).await.unwrap().unwrap();
        assert_eq!(course.total_sections() as u64, course.revision());
        for listed in repo.list_courses(10).await.unwrap() {
            assert_eq!(listed.total_sections() as u64, listed.revision());
        }
        if writer.is_finished() {
            break;
        }
    }
    writer.await.unwrap();

    let last = repo.get_course(id).await.unwrap().unwrap();
    assert_eq!(last.revision(), 25);
    assert_eq!(last.total_sections(), 25);
}
