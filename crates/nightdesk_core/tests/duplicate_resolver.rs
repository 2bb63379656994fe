mod common;

use common::{
    create_database, create_page, live_titled, parent_page, set_last_edited, setup, SearchOutage,
};
use nightdesk_core::model::resource::{Parent, ResourceKind};
use nightdesk_core::repo::ContentRepository;
use nightdesk_core::service::duplicate_resolver::ArchiveAction;
use nightdesk_core::{
    DuplicateResolver, MemoryStateStore, SandboxCapabilities, SqliteContentRepository,
    StateSnapshot,
};
use time::macros::datetime;

const REVIEW: &str = "Night Desk — Review";
const TASKS: &str = "Night Desk — Tasks";
const INBOX: &str = "Night Desk — Inbox";

const JAN_02_MS: i64 = 1_704_153_600_000;
const JAN_05_MS: i64 = 1_704_412_800_000;

#[test]
fn most_recently_edited_page_is_kept_and_others_archived() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let older = create_page(&repo, Some(parent), REVIEW);
    let newer = create_page(&repo, Some(parent), REVIEW);
    set_last_edited(&conn, older, 1_000);
    set_last_edited(&conn, newer, 2_000);
    let mut resolver = DuplicateResolver::new(&repo);

    let resolution = resolver
        .resolve(REVIEW, ResourceKind::Page, parent)
        .unwrap();

    assert_eq!(resolution.group.keeper.id, newer);
    assert_eq!(resolution.outcomes.len(), 1);
    assert_eq!(resolution.outcomes[0].id, older);
    assert_eq!(resolution.outcomes[0].action, ArchiveAction::Archived);
    assert_eq!(resolution.outcomes[0].child_count, Some(0));
    assert!(repo.retrieve(ResourceKind::Page, older).unwrap().archived);
    assert_eq!(resolver.archive_page(), None);
}

#[test]
fn single_instance_has_nothing_to_quarantine() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let only = create_page(&repo, Some(parent), REVIEW);
    let resolver = DuplicateResolver::new(&repo);

    let group = resolver.plan(REVIEW, ResourceKind::Page, parent).unwrap();

    assert_eq!(group.keeper.id, only);
    assert!(group.duplicates.is_empty());
    assert!(resolver.plan("Night Desk — Missing", ResourceKind::Page, parent).is_none());
}

#[test]
fn duplicate_databases_are_renamed_and_moved_under_one_archive_page() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let keeper = create_database(&repo, parent, TASKS, &[]);
    let first_copy = create_database(&repo, parent, TASKS, &[]);
    let second_copy = create_database(&repo, parent, TASKS, &[]);
    set_last_edited(&conn, keeper, 9_000);
    set_last_edited(&conn, first_copy, 1_000);
    set_last_edited(&conn, second_copy, 2_000);
    let mut resolver = DuplicateResolver::with_clock(&repo, datetime!(2024-01-05 10:20 UTC));

    let resolution = resolver
        .resolve(TASKS, ResourceKind::Database, parent)
        .unwrap();

    assert_eq!(resolution.group.keeper.id, keeper);
    let archive_page = resolver.archive_page().unwrap();
    let archive = repo.retrieve(ResourceKind::Page, archive_page).unwrap();
    assert_eq!(archive.title, "Archive — Night Desk (Temp) — 2024-01-05");
    assert_eq!(archive.parent, Parent::Page(parent));

    for outcome in &resolution.outcomes {
        assert_eq!(
            outcome.action,
            ArchiveAction::RenamedAndMoved {
                new_title: "DUPLICATE — Night Desk — Tasks — 2024-01-05-10-20".to_string()
            }
        );
        let moved = repo.retrieve(ResourceKind::Database, outcome.id).unwrap();
        assert_eq!(moved.parent, Parent::Page(archive_page));
        assert!(moved.title.starts_with("DUPLICATE — "));
    }

    let archive_pages = live_titled(
        &repo,
        ResourceKind::Page,
        "Archive — Night Desk (Temp) — 2024-01-05",
    );
    assert_eq!(archive_pages.len(), 1);
    assert_eq!(live_titled(&repo, ResourceKind::Database, TASKS).len(), 1);
}

#[test]
fn page_archive_failure_falls_back_to_move() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn)
        .unwrap()
        .with_capabilities(SandboxCapabilities {
            page_archive: false,
            ..SandboxCapabilities::default()
        });
    let parent = parent_page(&repo);
    let keeper = create_page(&repo, Some(parent), REVIEW);
    let copy = create_page(&repo, Some(parent), REVIEW);
    create_page(&repo, Some(copy), "Child note");
    set_last_edited(&conn, keeper, 5_000);
    set_last_edited(&conn, copy, 1_000);
    let mut resolver = DuplicateResolver::new(&repo);

    let resolution = resolver
        .resolve(REVIEW, ResourceKind::Page, parent)
        .unwrap();

    let outcome = &resolution.outcomes[0];
    assert_eq!(outcome.id, copy);
    assert_eq!(outcome.child_count, Some(1));
    assert_eq!(outcome.action, ArchiveAction::MovedToArchive);
    let moved = repo.retrieve(ResourceKind::Page, copy).unwrap();
    assert_eq!(moved.parent, Parent::Page(resolver.archive_page().unwrap()));
}

#[test]
fn resolve_all_records_keepers_and_stamps_the_run() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let tasks_keeper = create_database(&repo, parent, TASKS, &[]);
    let tasks_copy = create_database(&repo, parent, TASKS, &[]);
    set_last_edited(&conn, tasks_keeper, 8_000);
    set_last_edited(&conn, tasks_copy, 1_000);
    let review = create_page(&repo, Some(parent), REVIEW);
    let store = MemoryStateStore::new();
    let mut state = StateSnapshot::default();
    state.record(ResourceKind::Database, TASKS, tasks_copy);
    let now = datetime!(2024-01-05 10:20 UTC);
    let mut resolver = DuplicateResolver::with_clock(&repo, now);

    let report = resolver
        .resolve_all(
            &store,
            &mut state,
            &[
                (ResourceKind::Database, TASKS),
                (ResourceKind::Page, REVIEW),
                (ResourceKind::Page, "Night Desk — Template Root"),
            ],
            parent,
        )
        .unwrap();

    assert_eq!(report.duplicate_count(), 1);
    assert_eq!(report.failure_count(), 0);
    assert_eq!(
        report.missing,
        vec![(ResourceKind::Page, "Night Desk — Template Root".to_string())]
    );
    assert_eq!(report.archive_page, resolver.archive_page());

    let saved = store.saved().unwrap();
    assert_eq!(saved.resource_id(ResourceKind::Database, TASKS), Some(tasks_keeper));
    assert_eq!(saved.resource_id(ResourceKind::Page, REVIEW), Some(review));
    assert_eq!(saved.last_deduped, Some(now));
    assert_eq!(store.save_count(), 1);
}

#[test]
fn resources_under_other_parents_are_left_alone() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let other_parent = create_page(&repo, None, "Other workspace");
    let ours = create_page(&repo, Some(parent), REVIEW);
    let theirs = create_page(&repo, Some(other_parent), REVIEW);
    let mut resolver = DuplicateResolver::new(&repo);

    let resolution = resolver
        .resolve(REVIEW, ResourceKind::Page, parent)
        .unwrap();

    assert_eq!(resolution.group.keeper.id, ours);
    assert!(resolution.outcomes.is_empty());
    assert!(!repo.retrieve(ResourceKind::Page, theirs).unwrap().archived);
}

#[test]
fn plain_copy_beats_a_newer_decorated_copy() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let plain = create_page(&repo, Some(parent), INBOX);
    let decorated = create_page(&repo, Some(parent), "📥 Night Desk — Inbox");
    create_page(&repo, Some(parent), "Night Desk — Inbox Archive");
    set_last_edited(&conn, plain, JAN_02_MS);
    set_last_edited(&conn, decorated, JAN_05_MS);
    let mut resolver = DuplicateResolver::new(&repo);

    let resolution = resolver
        .resolve(INBOX, ResourceKind::Page, parent)
        .unwrap();

    assert_eq!(resolution.group.candidates.len(), 2);
    assert_eq!(resolution.group.keeper.id, plain);
    assert_eq!(resolution.outcomes.len(), 1);
    assert_eq!(resolution.outcomes[0].id, decorated);
    assert_eq!(resolution.outcomes[0].action, ArchiveAction::Archived);
    assert!(repo.retrieve(ResourceKind::Page, decorated).unwrap().archived);
    assert!(!repo.retrieve(ResourceKind::Page, plain).unwrap().archived);
}

#[test]
fn all_decorated_copies_keep_the_most_recent() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let newer = create_page(&repo, Some(parent), "📥 Night Desk — Inbox");
    let older = create_page(&repo, Some(parent), "🗂️ Night Desk — Inbox");
    set_last_edited(&conn, newer, JAN_05_MS);
    set_last_edited(&conn, older, JAN_02_MS);
    let mut resolver = DuplicateResolver::new(&repo);

    let resolution = resolver
        .resolve(INBOX, ResourceKind::Page, parent)
        .unwrap();

    assert_eq!(resolution.group.keeper.id, newer);
    assert_eq!(resolution.outcomes.len(), 1);
    assert_eq!(resolution.outcomes[0].id, older);
    assert!(repo.retrieve(ResourceKind::Page, older).unwrap().archived);
}

#[test]
fn confirmed_missing_name_is_dropped_from_state() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let gone = create_page(&repo, Some(parent), REVIEW);
    repo.archive(ResourceKind::Page, gone).unwrap();
    let store = MemoryStateStore::new();
    let mut state = StateSnapshot::default();
    state.record(ResourceKind::Page, REVIEW, gone);
    let mut resolver = DuplicateResolver::new(&repo);

    let report = resolver
        .resolve_all(&store, &mut state, &[(ResourceKind::Page, REVIEW)], parent)
        .unwrap();

    assert_eq!(report.missing, vec![(ResourceKind::Page, REVIEW.to_string())]);
    assert_eq!(state.resource_id(ResourceKind::Page, REVIEW), None);
    assert_eq!(
        store.saved().unwrap().resource_id(ResourceKind::Page, REVIEW),
        None
    );
}

#[test]
fn failed_search_keeps_the_recorded_id() {
    let conn = setup();
    let sandbox = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&sandbox);
    let review = create_page(&sandbox, Some(parent), REVIEW);
    let repo = SearchOutage::new(&sandbox);
    let store = MemoryStateStore::new();
    let mut state = StateSnapshot::default();
    state.record(ResourceKind::Page, REVIEW, review);
    let mut resolver = DuplicateResolver::new(&repo);

    let report = resolver
        .resolve_all(&store, &mut state, &[(ResourceKind::Page, REVIEW)], parent)
        .unwrap();

    assert_eq!(report.missing, vec![(ResourceKind::Page, REVIEW.to_string())]);
    assert_eq!(state.resource_id(ResourceKind::Page, REVIEW), Some(review));
    assert_eq!(repo.mutations.get(), 0);
}
