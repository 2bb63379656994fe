mod common;

use common::{create_database, create_page, create_record, parent_page, setup};
use nightdesk_core::model::resource::{
    Parent, PropertyValue, RecordFilter, ResourceDraft, ResourceKind, ResourcePatch,
};
use nightdesk_core::model::schema::PropertySpec;
use nightdesk_core::repo::{ContentRepository, StoreError};
use nightdesk_core::{SandboxCapabilities, SqliteContentRepository};
use time::macros::date;

#[test]
fn databases_must_live_under_a_page() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();

    let draft = ResourceDraft::new(ResourceKind::Database, Parent::Workspace, "Loose")
        .with_properties(vec![("Name".to_string(), PropertySpec::Title)]);
    let err = repo.create(&draft).unwrap_err();
    assert!(matches!(err, StoreError::Rejected { .. }), "unexpected error: {err}");
}

#[test]
fn database_requires_exactly_one_title_property() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);

    let draft = ResourceDraft::new(ResourceKind::Database, Parent::Page(parent), "No title")
        .with_properties(vec![("Notes".to_string(), PropertySpec::RichText)]);
    assert!(repo.create(&draft).is_err());
}

#[test]
fn search_is_substring_and_skips_archived() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let kept = create_page(&repo, Some(parent), "Night Desk — Review");
    create_page(&repo, Some(parent), "Night Desk — Review (old)");
    let archived = create_page(&repo, Some(parent), "Night Desk — Review");
    repo.archive(ResourceKind::Page, archived).unwrap();

    let found = repo.search("Night Desk — Review", ResourceKind::Page).unwrap();
    let ids: Vec<_> = found.iter().map(|resource| resource.id).collect();
    assert_eq!(found.len(), 2);
    assert_eq!(ids[0], kept);
    assert!(!ids.contains(&archived));

    let retrieved = repo.retrieve(ResourceKind::Page, archived).unwrap();
    assert!(retrieved.archived);
}

#[test]
fn databases_cannot_be_archived_in_place() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let database = create_database(&repo, parent, "Night Desk — Tasks", &[]);

    let err = repo.archive(ResourceKind::Database, database).unwrap_err();
    assert!(matches!(err, StoreError::Unsupported(_)));
}

#[test]
fn page_archive_capability_can_be_disabled() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn)
        .unwrap()
        .with_capabilities(SandboxCapabilities {
            page_archive: false,
            ..SandboxCapabilities::default()
        });
    let parent = parent_page(&repo);
    let page = create_page(&repo, Some(parent), "Night Desk — Review");

    let err = repo.archive(ResourceKind::Page, page).unwrap_err();
    assert!(matches!(err, StoreError::Unsupported(_)));
}

#[test]
fn move_rejects_cycles() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let outer = parent_page(&repo);
    let inner = create_page(&repo, Some(outer), "Inner");

    let err = repo.move_to(ResourceKind::Page, outer, inner).unwrap_err();
    assert!(matches!(err, StoreError::Rejected { .. }));
}

#[test]
fn list_children_reports_block_types_in_order() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    create_page(&repo, Some(parent), "First");
    create_database(&repo, parent, "Second", &[]);

    let children = repo.list_children(parent, 100).unwrap();
    let kinds: Vec<_> = children
        .iter()
        .map(|child| child.block_type.as_str())
        .collect();
    assert_eq!(kinds, vec!["child_page", "child_database"]);
    assert_eq!(children[0].title.as_deref(), Some("First"));
}

#[test]
fn property_id_is_stable_across_spec_changes() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let projects = create_database(&repo, parent, "Projects", &[]);
    let tasks = create_database(&repo, parent, "Tasks", &[]);

    let first = repo
        .update(
            ResourceKind::Database,
            tasks,
            &ResourcePatch::property("Project", PropertySpec::relation(projects)),
        )
        .unwrap();
    let id = first.property_id("Project").unwrap().to_string();

    let second = repo
        .update(
            ResourceKind::Database,
            tasks,
            &ResourcePatch::property("Project", PropertySpec::RichText),
        )
        .unwrap();
    assert_eq!(second.property_id("Project"), Some(id.as_str()));
}

#[test]
fn rollup_requires_a_relation_property() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let projects = create_database(&repo, parent, "Projects", &[]);

    let rollup = PropertySpec::rollup(
        "Tasks",
        "Completed On",
        nightdesk_core::model::schema::RollupFunction::PercentNotEmpty,
    )
    .unwrap();
    let err = repo
        .update(
            ResourceKind::Database,
            projects,
            &ResourcePatch::property("Progress %", rollup),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Schema(_)), "unexpected error: {err}");
}

#[test]
fn query_records_filters_by_date() {
    let conn = setup();
    let repo = SqliteContentRepository::try_new(&conn).unwrap();
    let parent = parent_page(&repo);
    let tasks = create_database(
        &repo,
        parent,
        "Tasks",
        &[("Resurface On", PropertySpec::Date)],
    );
    let due = create_record(
        &repo,
        tasks,
        "Due today",
        &[("Resurface On", PropertyValue::Date(date!(2024 - 01 - 05)))],
    );
    create_record(
        &repo,
        tasks,
        "Due tomorrow",
        &[("Resurface On", PropertyValue::Date(date!(2024 - 01 - 06)))],
    );
    create_record(&repo, tasks, "Undated", &[]);

    let records = repo
        .query_records(
            tasks,
            &RecordFilter::DateEquals {
                property: "Resurface On".to_string(),
                date: date!(2024 - 01 - 05),
            },
        )
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, due);
    assert_eq!(records[0].title, "Due today");
}
