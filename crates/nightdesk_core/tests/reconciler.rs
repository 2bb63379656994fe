mod common;

use common::{create_page, live_titled, parent_page, setup, SearchOutage};
use nightdesk_core::model::resource::{Parent, ResourceDraft, ResourceKind};
use nightdesk_core::model::schema::PropertySpec;
use nightdesk_core::repo::ContentRepository;
use nightdesk_core::{
    EnsureSource, MemoryStateStore, ReconcileError, Reconciler, SqliteContentRepository,
    StateSnapshot, StateStore,
};
use uuid::Uuid;

const REVIEW: &str = "Night Desk — Review";
const TASKS: &str = "Night Desk — Tasks";

fn task_schema() -> Vec<(String, PropertySpec)> {
    vec![
        ("Name".to_string(), PropertySpec::Title),
        ("Resurface On".to_string(), PropertySpec::Date),
    ]
}

#[test]
fn second_ensure_reuses_state_without_creating() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let store = MemoryStateStore::new();
    let reconciler = Reconciler::new(&repo, &store);
    let mut state = StateSnapshot::default();

    let first = reconciler
        .ensure(&mut state, TASKS, ResourceKind::Database, Some(parent), &task_schema())
        .unwrap();
    let second = reconciler
        .ensure(&mut state, TASKS, ResourceKind::Database, Some(parent), &task_schema())
        .unwrap();

    assert_eq!(first.source, EnsureSource::Created);
    assert_eq!(second.source, EnsureSource::Reused);
    assert_eq!(first.resource.remote_id, second.resource.remote_id);
    assert_eq!(live_titled(&repo, ResourceKind::Database, TASKS).len(), 1);

    let database = repo
        .retrieve(ResourceKind::Database, first.resource.remote_id)
        .unwrap();
    assert!(database.properties.contains_key("Resurface On"));
    assert_eq!(store.save_count(), 1);
}

#[test]
fn single_remote_match_is_adopted_and_recorded() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let existing = create_page(&repo, Some(parent), REVIEW);
    let store = MemoryStateStore::new();
    let reconciler = Reconciler::new(&repo, &store);
    let mut state = StateSnapshot::default();

    let outcome = reconciler
        .ensure(&mut state, REVIEW, ResourceKind::Page, Some(parent), &[])
        .unwrap();

    assert_eq!(outcome.source, EnsureSource::Adopted);
    assert_eq!(outcome.resource.remote_id, existing);
    assert_eq!(outcome.resource.logical_name, REVIEW);
    assert_eq!(
        store.saved().unwrap().resource_id(ResourceKind::Page, REVIEW),
        Some(existing)
    );
    assert_eq!(live_titled(&repo, ResourceKind::Page, REVIEW).len(), 1);
}

#[test]
fn several_matches_are_ambiguous_and_nothing_is_created() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let a = create_page(&repo, Some(parent), REVIEW);
    let b = create_page(&repo, Some(parent), REVIEW);
    let store = MemoryStateStore::new();
    let reconciler = Reconciler::new(&repo, &store);
    let mut state = StateSnapshot::default();

    let err = reconciler
        .ensure(&mut state, REVIEW, ResourceKind::Page, Some(parent), &[])
        .unwrap_err();

    assert!(err.is_ambiguous());
    match err {
        ReconcileError::Ambiguous { candidates, .. } => assert_eq!(candidates, vec![a, b]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(live_titled(&repo, ResourceKind::Page, REVIEW).len(), 2);
    assert_eq!(state.resource_id(ResourceKind::Page, REVIEW), None);
    assert_eq!(store.save_count(), 0);
}

#[test]
fn matches_elsewhere_or_with_longer_titles_are_ignored() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let elsewhere = create_page(&repo, None, "Somewhere else");
    create_page(&repo, Some(elsewhere), REVIEW);
    create_page(&repo, Some(parent), "Night Desk — Review (draft)");
    let store = MemoryStateStore::new();
    let reconciler = Reconciler::new(&repo, &store);
    let mut state = StateSnapshot::default();

    let outcome = reconciler
        .ensure(&mut state, REVIEW, ResourceKind::Page, Some(parent), &[])
        .unwrap();

    assert_eq!(outcome.source, EnsureSource::Created);
    let created = repo
        .retrieve(ResourceKind::Page, outcome.resource.remote_id)
        .unwrap();
    assert_eq!(created.parent, Parent::Page(parent));
}

#[test]
fn archived_match_is_not_adopted() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let archived = create_page(&repo, Some(parent), REVIEW);
    repo.archive(ResourceKind::Page, archived).unwrap();
    let store = MemoryStateStore::new();
    let reconciler = Reconciler::new(&repo, &store);
    let mut state = StateSnapshot::default();

    let outcome = reconciler
        .ensure(&mut state, REVIEW, ResourceKind::Page, Some(parent), &[])
        .unwrap();

    assert_eq!(outcome.source, EnsureSource::Created);
    assert_ne!(outcome.resource.remote_id, archived);
}

#[test]
fn search_outage_degrades_to_create() {
    let conn = setup();
    let sandbox = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&sandbox);
    create_page(&sandbox, Some(parent), REVIEW);
    let repo = SearchOutage::new(&sandbox);
    let store = MemoryStateStore::new();
    let reconciler = Reconciler::new(&repo, &store);
    let mut state = StateSnapshot::default();

    let outcome = reconciler
        .ensure(&mut state, REVIEW, ResourceKind::Page, Some(parent), &[])
        .unwrap();

    assert_eq!(outcome.source, EnsureSource::Created);
    assert_eq!(repo.mutations.get(), 1);
    assert_eq!(live_titled(&sandbox, ResourceKind::Page, REVIEW).len(), 2);
}

#[test]
fn recorded_id_wins_over_remote_search() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    create_page(&repo, Some(parent), REVIEW);
    let recorded = Uuid::new_v4();
    let mut state = StateSnapshot::default();
    state.record(ResourceKind::Page, REVIEW, recorded);
    let store = MemoryStateStore::with_snapshot(state.clone());
    let reconciler = Reconciler::new(&repo, &store);

    let outcome = reconciler
        .ensure(&mut state, REVIEW, ResourceKind::Page, Some(parent), &[])
        .unwrap();

    assert_eq!(outcome.source, EnsureSource::Reused);
    assert_eq!(outcome.resource.remote_id, recorded);
    assert_eq!(store.load().unwrap().resource_id(ResourceKind::Page, REVIEW), Some(recorded));
}

#[test]
fn create_failure_is_reported_with_the_logical_name() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let store = MemoryStateStore::new();
    let reconciler = Reconciler::new(&repo, &store);
    let mut state = StateSnapshot::default();
    let missing_parent = repo
        .create(&ResourceDraft::new(ResourceKind::Page, Parent::Workspace, "Gone"))
        .unwrap()
        .id;
    repo.archive(ResourceKind::Page, missing_parent).unwrap();

    let err = reconciler
        .ensure(&mut state, REVIEW, ResourceKind::Page, Some(missing_parent), &[])
        .unwrap_err();

    match err {
        ReconcileError::Create { logical_name, .. } => assert_eq!(logical_name, REVIEW),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.save_count(), 0);
}
