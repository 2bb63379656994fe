//! Content store contracts and backends.
//!
//! # Responsibility
//! - Define the store operations the engine consumes (`ContentRepository`).
//! - Isolate wire (Notion HTTP) and SQL (sandbox) details from services.
//!
//! # Invariants
//! - Backends never assume strong consistency: a write may not be visible to
//!   a subsequent `search`.
//! - Backends validate property specs before mutating schema.
//! - Backends report unsupported capabilities as `StoreError::Unsupported`,
//!   never as a transport failure.

use crate::db::DbError;
use crate::model::resource::{
    ChildBlock, RecordFilter, Resource, ResourceDraft, ResourceId, ResourceKind, ResourcePatch,
};
use crate::model::schema::SchemaError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod notion_repo;
pub mod sqlite_repo;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from content store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Sandbox SQLite failure.
    Db(DbError),
    /// Network or protocol failure before the store answered.
    Transport(String),
    /// Store answered and refused the request.
    Rejected {
        status: u16,
        code: String,
        message: String,
    },
    /// Resource does not exist, or exists with a different kind.
    NotFound(ResourceId),
    /// Store cannot perform this operation at all.
    Unsupported(String),
    /// Property spec failed validation.
    Schema(SchemaError),
    /// Store payload cannot be decoded into the model.
    InvalidData(String),
}

impl StoreError {
    pub(crate) fn rejected(code: &str, message: impl Into<String>) -> Self {
        Self::Rejected {
            status: 400,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Transport(message) => write!(f, "store transport failure: {message}"),
            Self::Rejected {
                status,
                code,
                message,
            } => write!(f, "store rejected request ({status} {code}): {message}"),
            Self::NotFound(id) => write!(f, "resource not found: {id}"),
            Self::Unsupported(what) => write!(f, "unsupported by store: {what}"),
            Self::Schema(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid store data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Schema(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<SchemaError> for StoreError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

/// Remote hierarchical content store.
///
/// Every call is synchronous; implementations perform no retries.
pub trait ContentRepository {
    /// Creates one database or page.
    fn create(&self, draft: &ResourceDraft) -> StoreResult<Resource>;
    /// Applies a partial update and returns the updated resource.
    fn update(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        patch: &ResourcePatch,
    ) -> StoreResult<Resource>;
    /// Loads one resource, archived ones included.
    fn retrieve(&self, kind: ResourceKind, id: ResourceId) -> StoreResult<Resource>;
    /// Title search. May return substring matches and resources under any
    /// parent; callers filter.
    fn search(&self, query: &str, kind: ResourceKind) -> StoreResult<Vec<Resource>>;
    /// Soft-deletes one resource in place.
    fn archive(&self, kind: ResourceKind, id: ResourceId) -> StoreResult<()>;
    /// Re-parents one resource under a page.
    fn move_to(&self, kind: ResourceKind, id: ResourceId, new_parent: ResourceId)
        -> StoreResult<()>;
    /// Lists up to `page_size` children of one page.
    fn list_children(&self, id: ResourceId, page_size: u32) -> StoreResult<Vec<ChildBlock>>;
    /// Lists live records of one database matching `filter`, most recently
    /// edited first.
    fn query_records(
        &self,
        database_id: ResourceId,
        filter: &RecordFilter,
    ) -> StoreResult<Vec<Resource>>;
}

impl<T: ContentRepository + ?Sized> ContentRepository for &T {
    fn create(&self, draft: &ResourceDraft) -> StoreResult<Resource> {
        (**self).create(draft)
    }

    fn update(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        patch: &ResourcePatch,
    ) -> StoreResult<Resource> {
        (**self).update(kind, id, patch)
    }

    fn retrieve(&self, kind: ResourceKind, id: ResourceId) -> StoreResult<Resource> {
        (**self).retrieve(kind, id)
    }

    fn search(&self, query: &str, kind: ResourceKind) -> StoreResult<Vec<Resource>> {
        (**self).search(query, kind)
    }

    fn archive(&self, kind: ResourceKind, id: ResourceId) -> StoreResult<()> {
        (**self).archive(kind, id)
    }

    fn move_to(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        new_parent: ResourceId,
    ) -> StoreResult<()> {
        (**self).move_to(kind, id, new_parent)
    }

    fn list_children(&self, id: ResourceId, page_size: u32) -> StoreResult<Vec<ChildBlock>> {
        (**self).list_children(id, page_size)
    }

    fn query_records(
        &self,
        database_id: ResourceId,
        filter: &RecordFilter,
    ) -> StoreResult<Vec<Resource>> {
        (**self).query_records(database_id, filter)
    }
}
