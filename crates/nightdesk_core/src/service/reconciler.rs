//! Ensure-exists use case.
//!
//! # Responsibility
//! - Reuse a recorded id, adopt a unique remote match, or create.
//! - Write every new mapping through to the state store before returning.
//!
//! # Invariants
//! - A recorded id short-circuits with zero store calls.
//! - Several live matches never lead to a create; they surface as
//!   `ReconcileError::Ambiguous` for the dedupe pass to settle.
//! - Search failures degrade to the create path.

use crate::model::resource::{Parent, ResourceDraft, ResourceId, ResourceKind, ResourceRef};
use crate::model::schema::PropertySpec;
use crate::repo::{ContentRepository, StoreError};
use crate::service::duplicate_resolver::find_candidates;
use crate::state::{StateError, StateSnapshot, StateStore};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// How `ensure` obtained the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureSource {
    /// Recorded in state; no store call made.
    Reused,
    /// Found by search under the parent and recorded.
    Adopted,
    /// Created in the store and recorded.
    Created,
}

impl EnsureSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reused => "reused",
            Self::Adopted => "adopted",
            Self::Created => "created",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureOutcome {
    pub resource: ResourceRef,
    pub source: EnsureSource,
}

/// Errors from `Reconciler::ensure`.
#[derive(Debug)]
pub enum ReconcileError {
    /// More than one live match under the parent.
    Ambiguous {
        logical_name: String,
        kind: ResourceKind,
        candidates: Vec<ResourceId>,
    },
    /// Store refused or failed the create.
    Create {
        logical_name: String,
        source: StoreError,
    },
    /// New mapping could not be persisted.
    State(StateError),
}

impl ReconcileError {
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous { .. })
    }
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ambiguous {
                logical_name,
                kind,
                candidates,
            } => write!(
                f,
                "{} `{logical_name}` has {} live copies under the parent; run `dedupe`",
                kind.as_str(),
                candidates.len()
            ),
            Self::Create {
                logical_name,
                source,
            } => write!(f, "failed to create `{logical_name}`: {source}"),
            Self::State(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ReconcileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Ambiguous { .. } => None,
            Self::Create { source, .. } => Some(source),
            Self::State(err) => Some(err),
        }
    }
}

impl From<StateError> for ReconcileError {
    fn from(value: StateError) -> Self {
        Self::State(value)
    }
}

/// Reconciler over one content store and one state store.
pub struct Reconciler<R: ContentRepository, S: StateStore> {
    repo: R,
    state_store: S,
}

impl<R: ContentRepository, S: StateStore> Reconciler<R, S> {
    pub fn new(repo: R, state_store: S) -> Self {
        Self { repo, state_store }
    }

    /// Ensures exactly one `kind` resource named `logical_name` is known.
    ///
    /// `parent_id` scopes adoption and creation; without it the resource is
    /// created at workspace level and no adoption is attempted.
    /// `desired_properties` is the schema used on create and ignored
    /// otherwise.
    ///
    /// # Errors
    /// - `Ambiguous` when search finds several live matches.
    /// - `Create` when the store rejects creation.
    /// - `State` when the new mapping cannot be saved.
    pub fn ensure(
        &self,
        state: &mut StateSnapshot,
        logical_name: &str,
        kind: ResourceKind,
        parent_id: Option<ResourceId>,
        desired_properties: &[(String, PropertySpec)],
    ) -> Result<EnsureOutcome, ReconcileError> {
        if let Some(resource) = state.resource_ref(kind, logical_name) {
            info!(
                "event=reconcile_ensure module=reconciler status=reused kind={} name={:?} id={}",
                kind.as_str(),
                logical_name,
                resource.remote_id
            );
            return Ok(EnsureOutcome {
                resource,
                source: EnsureSource::Reused,
            });
        }

        if let Some(parent_id) = parent_id {
            let matches = match find_candidates(&self.repo, logical_name, kind, parent_id) {
                Ok(matches) => matches,
                Err(err) => {
                    warn!(
                        "event=reconcile_search module=reconciler status=degraded kind={} name={:?} error={}",
                        kind.as_str(),
                        logical_name,
                        err
                    );
                    Vec::new()
                }
            };

            match matches.as_slice() {
                [] => {}
                [only] => {
                    return self.record(state, logical_name, kind, only.id, EnsureSource::Adopted);
                }
                several => {
                    warn!(
                        "event=reconcile_ensure module=reconciler status=ambiguous kind={} name={:?} candidates={}",
                        kind.as_str(),
                        logical_name,
                        several.len()
                    );
                    return Err(ReconcileError::Ambiguous {
                        logical_name: logical_name.to_string(),
                        kind,
                        candidates: several.iter().map(|resource| resource.id).collect(),
                    });
                }
            }
        }

        let parent = parent_id.map_or(Parent::Workspace, Parent::Page);
        let draft = ResourceDraft::new(kind, parent, logical_name)
            .with_properties(desired_properties.to_vec());
        let created = self
            .repo
            .create(&draft)
            .map_err(|source| ReconcileError::Create {
                logical_name: logical_name.to_string(),
                source,
            })?;
        self.record(state, logical_name, kind, created.id, EnsureSource::Created)
    }

    fn record(
        &self,
        state: &mut StateSnapshot,
        logical_name: &str,
        kind: ResourceKind,
        id: ResourceId,
        source: EnsureSource,
    ) -> Result<EnsureOutcome, ReconcileError> {
        state.record(kind, logical_name, id);
        self.state_store.save(state)?;
        info!(
            "event=reconcile_ensure module=reconciler status={} kind={} name={:?} id={}",
            source.as_str(),
            kind.as_str(),
            logical_name,
            id
        );
        Ok(EnsureOutcome {
            resource: ResourceRef {
                logical_name: logical_name.to_string(),
                remote_id: id,
            },
            source,
        })
    }
}
