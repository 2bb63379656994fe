//! Remote resource model.
//!
//! # Responsibility
//! - Define the shapes exchanged with a content store (resources, drafts,
//!   patches, child blocks, record values).
//! - Define the state-side reference (`ResourceRef`) and the resurfacing
//!   queue item.
//!
//! # Invariants
//! - `Resource::id` is assigned by the store and never changes.
//! - Titles are not unique in the store; uniqueness under one parent is an
//!   engine concern, not a model concern.

use crate::model::schema::{PropertySchema, PropertySpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// Store-assigned resource identifier.
pub type ResourceId = Uuid;

/// Resource category in the content store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Structured container with a property schema.
    Database,
    /// Hierarchical page, or a record when its parent is a database.
    Page,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Page => "page",
        }
    }
}

/// Where a resource lives in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parent {
    Workspace,
    Page(ResourceId),
    Database(ResourceId),
}

impl Parent {
    /// Parent id, when the parent is another resource.
    pub fn id(&self) -> Option<ResourceId> {
        match self {
            Self::Workspace => None,
            Self::Page(id) | Self::Database(id) => Some(*id),
        }
    }

    /// Returns true when this parent is exactly the page `page_id`.
    pub fn is_page(&self, page_id: ResourceId) -> bool {
        matches!(self, Self::Page(id) if *id == page_id)
    }
}

/// One record property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Title(String),
    RichText(String),
    Number(f64),
    Checkbox(bool),
    Select(String),
    Url(String),
    Email(String),
    Date(#[serde(with = "iso_date")] Date),
    Relation(Vec<ResourceId>),
}

/// Resource as reported by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    /// Plain-text title. Records use their title property value.
    pub title: String,
    pub parent: Parent,
    /// Soft-delete marker.
    pub archived: bool,
    pub last_edited_time: OffsetDateTime,
    /// Database schema by property name. Empty for pages.
    pub properties: BTreeMap<String, PropertySchema>,
    /// Record values by property name. Empty for databases and plain pages.
    pub values: BTreeMap<String, PropertyValue>,
}

impl Resource {
    /// Store-assigned id of a named database property.
    pub fn property_id(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(|schema| schema.id.as_str())
    }

    /// Date value of a record property, if set.
    pub fn date_value(&self, name: &str) -> Option<Date> {
        match self.values.get(name) {
            Some(PropertyValue::Date(date)) => Some(*date),
            _ => None,
        }
    }
}

/// Input for creating one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDraft {
    pub kind: ResourceKind,
    pub parent: Parent,
    pub title: String,
    /// Database schema, in declaration order. Ignored for pages.
    pub properties: Vec<(String, PropertySpec)>,
    /// Record values. Only meaningful for pages under a database.
    pub values: BTreeMap<String, PropertyValue>,
}

impl ResourceDraft {
    /// Creates a draft with no schema or values.
    pub fn new(kind: ResourceKind, parent: Parent, title: impl Into<String>) -> Self {
        Self {
            kind,
            parent,
            title: title.into(),
            properties: Vec::new(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_properties(mut self, properties: Vec<(String, PropertySpec)>) -> Self {
        self.properties = properties;
        self
    }
}

/// Partial update of one resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourcePatch {
    pub title: Option<String>,
    /// Database schema additions/replacements by property name.
    pub properties: BTreeMap<String, PropertySpec>,
    /// Record value replacements by property name.
    pub values: BTreeMap<String, PropertyValue>,
}

impl ResourcePatch {
    pub fn rename(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn property(name: impl Into<String>, spec: PropertySpec) -> Self {
        let mut patch = Self::default();
        patch.properties.insert(name.into(), spec);
        patch
    }

    pub fn value(name: impl Into<String>, value: PropertyValue) -> Self {
        let mut patch = Self::default();
        patch.values.insert(name.into(), value);
        patch
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.properties.is_empty() && self.values.is_empty()
    }
}

/// Child entry of a page as listed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildBlock {
    pub id: String,
    /// Store block type, e.g. `child_page`, `child_database`, `paragraph`.
    pub block_type: String,
    /// Title for child pages/databases.
    pub title: Option<String>,
}

/// Filter for querying records of one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFilter {
    /// Records whose date property equals `date`.
    DateEquals { property: String, date: Date },
}

/// State-side mapping entry from logical name to remote id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub logical_name: String,
    pub remote_id: ResourceId,
}

/// Category of a resurfacing queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResurfaceCategory {
    Task,
    Note,
}

impl ResurfaceCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Note => "note",
        }
    }
}

/// Record scheduled to resurface on a given day. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResurfaceItem {
    pub id: ResourceId,
    pub name: String,
    pub category: ResurfaceCategory,
    pub last_edited_time: OffsetDateTime,
    pub resurface_date: Date,
}

/// `YYYY-MM-DD` serde helpers for calendar dates.
pub mod iso_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::format_description::FormatItem;
    use time::macros::format_description;
    use time::Date;

    pub const FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

    pub fn format(date: Date) -> String {
        date.format(FORMAT).unwrap_or_else(|_| date.to_string())
    }

    pub fn parse(value: &str) -> Result<Date, time::error::Parse> {
        Date::parse(value, FORMAT)
    }

    pub fn serialize<S>(date: &Date, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(*date))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Date, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        parse(&value).map_err(serde::de::Error::custom)
    }
}
