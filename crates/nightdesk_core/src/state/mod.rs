//! Local provisioning state.
//!
//! # Responsibility
//! - Map logical resource names to store-assigned ids between runs.
//! - Carry run flags (`seeded`, `pages.created`, `lastDeduped`).
//!
//! # Invariants
//! - At most one id per logical name per snapshot; recording a name for one
//!   kind removes it from the other kind's map.
//! - Top-level keys this crate does not know are preserved on rewrite.
//! - The snapshot is a cache: remote search wins when both disagree.

use crate::model::resource::{ResourceId, ResourceKind, ResourceRef};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use time::OffsetDateTime;

mod file_store;
mod memory_store;

pub use file_store::{JsonFileStateStore, DEFAULT_STATE_FILE};
pub use memory_store::MemoryStateStore;

pub type StateResult<T> = Result<T, StateError>;

/// Errors from loading or saving state.
#[derive(Debug)]
pub enum StateError {
    /// State file could not be read or written.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// State file exists but is not a valid snapshot.
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// Snapshot could not be encoded.
    Encode(serde_json::Error),
    /// Command requires a state file that does not exist.
    Missing(PathBuf),
}

impl Display for StateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "state file `{}` i/o failure: {source}", path.display())
            }
            Self::Corrupt { path, source } => {
                write!(f, "state file `{}` is not valid: {source}", path.display())
            }
            Self::Encode(err) => write!(f, "failed to encode state: {err}"),
            Self::Missing(path) => write!(
                f,
                "state file `{}` not found; run `provision` first",
                path.display()
            ),
        }
    }
}

impl Error for StateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Corrupt { source, .. } => Some(source),
            Self::Encode(err) => Some(err),
            Self::Missing(_) => None,
        }
    }
}

/// Page ids by logical name plus the scaffold flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageState {
    #[serde(default)]
    pub created: bool,
    #[serde(flatten)]
    pub ids: BTreeMap<String, ResourceId>,
}

/// In-memory view of the state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub databases: BTreeMap<String, ResourceId>,
    #[serde(default)]
    pub pages: PageState,
    #[serde(default)]
    pub seeded: bool,
    #[serde(
        rename = "lastDeduped",
        default,
        skip_serializing_if = "Option::is_none",
        with = "rfc3339_option"
    )]
    pub last_deduped: Option<OffsetDateTime>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StateSnapshot {
    /// Recorded id for `name` of `kind`.
    pub fn resource_id(&self, kind: ResourceKind, name: &str) -> Option<ResourceId> {
        self.map(kind).get(name).copied()
    }

    pub fn resource_ref(&self, kind: ResourceKind, name: &str) -> Option<ResourceRef> {
        self.resource_id(kind, name).map(|remote_id| ResourceRef {
            logical_name: name.to_string(),
            remote_id,
        })
    }

    /// Records `id` for `name`, replacing any previous id of either kind.
    pub fn record(&mut self, kind: ResourceKind, name: &str, id: ResourceId) {
        let other = match kind {
            ResourceKind::Database => ResourceKind::Page,
            ResourceKind::Page => ResourceKind::Database,
        };
        self.map_mut(other).remove(name);
        self.map_mut(kind).insert(name.to_string(), id);
    }

    /// Drops the mapping for `name` of `kind`, returning the old id.
    pub fn forget(&mut self, kind: ResourceKind, name: &str) -> Option<ResourceId> {
        self.map_mut(kind).remove(name)
    }

    fn map(&self, kind: ResourceKind) -> &BTreeMap<String, ResourceId> {
        match kind {
            ResourceKind::Database => &self.databases,
            ResourceKind::Page => &self.pages.ids,
        }
    }

    fn map_mut(&mut self, kind: ResourceKind) -> &mut BTreeMap<String, ResourceId> {
        match kind {
            ResourceKind::Database => &mut self.databases,
            ResourceKind::Page => &mut self.pages.ids,
        }
    }
}

/// Durable home of the state snapshot.
pub trait StateStore {
    /// Loads the snapshot. A store with nothing saved yields an empty one.
    fn load(&self) -> StateResult<StateSnapshot>;
    /// Replaces the stored snapshot.
    fn save(&self, snapshot: &StateSnapshot) -> StateResult<()>;
    /// Loads the snapshot, failing when nothing was ever saved.
    fn load_required(&self) -> StateResult<StateSnapshot>;
}

impl<T: StateStore + ?Sized> StateStore for &T {
    fn load(&self) -> StateResult<StateSnapshot> {
        (**self).load()
    }

    fn save(&self, snapshot: &StateSnapshot) -> StateResult<()> {
        (**self).save(snapshot)
    }

    fn load_required(&self) -> StateResult<StateSnapshot> {
        (**self).load_required()
    }
}

mod rfc3339_option {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::format_description::well_known::Rfc3339;
    use time::OffsetDateTime;

    pub fn serialize<S>(value: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(timestamp) => {
                let text = timestamp
                    .format(&Rfc3339)
                    .map_err(serde::ser::Error::custom)?;
                serializer.serialize_some(&text)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|text| OffsetDateTime::parse(&text, &Rfc3339).map_err(serde::de::Error::custom))
            .transpose()
    }
}
