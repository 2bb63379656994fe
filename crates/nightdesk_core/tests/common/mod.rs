#![allow(dead_code)]

use nightdesk_core::db::open_db_in_memory;
use nightdesk_core::model::resource::{
    ChildBlock, Parent, PropertyValue, RecordFilter, Resource, ResourceDraft, ResourceId,
    ResourceKind, ResourcePatch,
};
use nightdesk_core::model::schema::PropertySpec;
use nightdesk_core::repo::{ContentRepository, StoreError, StoreResult};
use rusqlite::Connection;
use std::cell::Cell;
use std::collections::BTreeMap;

pub fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

/// Creates the workspace-level page everything is provisioned under.
pub fn parent_page<R: ContentRepository>(repo: &R) -> ResourceId {
    create_page(repo, None, "Night Desk Parent")
}

pub fn create_page<R: ContentRepository>(
    repo: &R,
    parent: Option<ResourceId>,
    title: &str,
) -> ResourceId {
    let parent = parent.map_or(Parent::Workspace, Parent::Page);
    repo.create(&ResourceDraft::new(ResourceKind::Page, parent, title))
        .unwrap()
        .id
}

pub fn create_database<R: ContentRepository>(
    repo: &R,
    parent: ResourceId,
    title: &str,
    extra: &[(&str, PropertySpec)],
) -> ResourceId {
    let mut properties = vec![("Name".to_string(), PropertySpec::Title)];
    properties.extend(
        extra
            .iter()
            .map(|(name, spec)| (name.to_string(), spec.clone())),
    );
    repo.create(
        &ResourceDraft::new(ResourceKind::Database, Parent::Page(parent), title)
            .with_properties(properties),
    )
    .unwrap()
    .id
}

pub fn create_record<R: ContentRepository>(
    repo: &R,
    database: ResourceId,
    title: &str,
    values: &[(&str, PropertyValue)],
) -> ResourceId {
    let mut draft = ResourceDraft::new(ResourceKind::Page, Parent::Database(database), title);
    draft.values = values
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect::<BTreeMap<_, _>>();
    draft
        .values
        .insert("Name".to_string(), PropertyValue::Title(title.to_string()));
    repo.create(&draft).unwrap().id
}

/// Pins `last_edited_at` so ordering tests do not depend on the clock.
pub fn set_last_edited(conn: &Connection, id: ResourceId, unix_ms: i64) {
    conn.execute(
        "UPDATE resources SET last_edited_at = ?2 WHERE resource_id = ?1;",
        rusqlite::params![id.to_string(), unix_ms],
    )
    .unwrap();
}

/// Live resources of `kind` titled exactly `title`.
pub fn live_titled<R: ContentRepository>(repo: &R, kind: ResourceKind, title: &str) -> Vec<Resource> {
    repo.search(title, kind)
        .unwrap()
        .into_iter()
        .filter(|resource| resource.title == title)
        .collect()
}

/// Store wrapper whose search always fails, counting mutations.
pub struct SearchOutage<R> {
    pub inner: R,
    pub mutations: Cell<usize>,
}

impl<R> SearchOutage<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            mutations: Cell::new(0),
        }
    }

    fn mutated(&self) {
        self.mutations.set(self.mutations.get() + 1);
    }
}

impl<R: ContentRepository> ContentRepository for SearchOutage<R> {
    fn create(&self, draft: &ResourceDraft) -> StoreResult<Resource> {
        self.mutated();
        self.inner.create(draft)
    }

    fn update(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        patch: &ResourcePatch,
    ) -> StoreResult<Resource> {
        self.mutated();
        self.inner.update(kind, id, patch)
    }

    fn retrieve(&self, kind: ResourceKind, id: ResourceId) -> StoreResult<Resource> {
        self.inner.retrieve(kind, id)
    }

    fn search(&self, _query: &str, _kind: ResourceKind) -> StoreResult<Vec<Resource>> {
        Err(StoreError::Transport("connection reset".to_string()))
    }

    fn archive(&self, kind: ResourceKind, id: ResourceId) -> StoreResult<()> {
        self.mutated();
        self.inner.archive(kind, id)
    }

    fn move_to(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        new_parent: ResourceId,
    ) -> StoreResult<()> {
        self.mutated();
        self.inner.move_to(kind, id, new_parent)
    }

    fn list_children(&self, id: ResourceId, page_size: u32) -> StoreResult<Vec<ChildBlock>> {
        self.inner.list_children(id, page_size)
    }

    fn query_records(
        &self,
        database_id: ResourceId,
        filter: &RecordFilter,
    ) -> StoreResult<Vec<Resource>> {
        self.inner.query_records(database_id, filter)
    }
}
