//! Full provisioning run.
//!
//! # Responsibility
//! - Ensure every blueprint database, bind relations, apply derived
//!   properties, then ensure every page.
//! - Persist the resulting mapping and the `pages.created` flag.
//!
//! # Invariants
//! - Ambiguous resources are reported, never created; relations touching
//!   them are skipped.
//! - Create and state failures abort the run; relation and derived
//!   property failures are reported and the run continues.

use crate::blueprint::{Blueprint, RelationBlueprint};
use crate::model::resource::{ResourceId, ResourceKind, ResourcePatch};
use crate::model::schema::PropertySpec;
use crate::repo::ContentRepository;
use crate::service::reconciler::{EnsureSource, ReconcileError, Reconciler};
use crate::service::relation_binder::{BindMode, RelationBinder, RelationSpec};
use crate::state::{StateError, StateSnapshot, StateStore};
use log::{info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors that abort a provisioning run.
#[derive(Debug)]
pub enum ProvisionError {
    Reconcile(ReconcileError),
    State(StateError),
}

impl Display for ProvisionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reconcile(err) => write!(f, "{err}"),
            Self::State(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ProvisionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Reconcile(err) => Some(err),
            Self::State(err) => Some(err),
        }
    }
}

impl From<ReconcileError> for ProvisionError {
    fn from(value: ReconcileError) -> Self {
        match value {
            ReconcileError::State(err) => Self::State(err),
            other => Self::Reconcile(other),
        }
    }
}

impl From<StateError> for ProvisionError {
    fn from(value: StateError) -> Self {
        Self::State(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredResource {
    pub kind: ResourceKind,
    pub name: String,
    pub id: ResourceId,
    pub source: EnsureSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousResource {
    pub kind: ResourceKind,
    pub name: String,
    pub candidates: Vec<ResourceId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationStatus {
    /// Both ends already formed a dual relation; nothing written.
    AlreadyDual,
    Bound(BindMode),
    /// An end was not resolved in this run.
    Skipped,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationReport {
    pub owner: String,
    pub owner_property: String,
    pub target: String,
    pub status: RelationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub ensured: Vec<EnsuredResource>,
    pub ambiguous: Vec<AmbiguousResource>,
    pub relations: Vec<RelationReport>,
    /// Databases whose derived properties could not be applied.
    pub derived_failures: Vec<(String, String)>,
}

impl ProvisionReport {
    pub fn count(&self, source: EnsureSource) -> usize {
        self.ensured.iter().filter(|r| r.source == source).count()
    }

    /// True when anything needs operator attention.
    pub fn has_issues(&self) -> bool {
        !self.ambiguous.is_empty()
            || !self.derived_failures.is_empty()
            || self
                .relations
                .iter()
                .any(|r| matches!(r.status, RelationStatus::Failed { .. }))
    }
}

/// Provisioning run over one content store and state store.
pub struct Provisioner<R: ContentRepository + Copy, S: StateStore + Copy> {
    repo: R,
    reconciler: Reconciler<R, S>,
    binder: RelationBinder<R>,
    state_store: S,
}

impl<R: ContentRepository + Copy, S: StateStore + Copy> Provisioner<R, S> {
    pub fn new(repo: R, state_store: S) -> Self {
        Self {
            repo,
            reconciler: Reconciler::new(repo, state_store),
            binder: RelationBinder::new(repo),
            state_store,
        }
    }

    /// Provisions `blueprint` under `parent_id`.
    ///
    /// # Errors
    /// - `Reconcile` when a resource cannot be created.
    /// - `State` when the state cannot be saved.
    pub fn provision(
        &mut self,
        state: &mut StateSnapshot,
        blueprint: &Blueprint,
        parent_id: ResourceId,
    ) -> Result<ProvisionReport, ProvisionError> {
        let mut report = ProvisionReport::default();
        let mut databases: BTreeMap<String, ResourceId> = BTreeMap::new();

        for database in &blueprint.databases {
            if let Some(id) = self.ensure(
                state,
                &mut report,
                ResourceKind::Database,
                &database.name,
                parent_id,
                &database.properties,
            )? {
                databases.insert(database.name.clone(), id);
            }
        }

        for relation in &blueprint.relations {
            let status = self.bind_relation(relation, &databases);
            report.relations.push(RelationReport {
                owner: relation.owner.clone(),
                owner_property: relation.owner_property.clone(),
                target: relation.target.clone(),
                status,
            });
        }

        for database in &blueprint.databases {
            let Some(&id) = databases.get(&database.name) else {
                continue;
            };
            if database.derived.is_empty() {
                continue;
            }
            let patch = ResourcePatch {
                properties: database.derived.iter().cloned().collect(),
                ..ResourcePatch::default()
            };
            if let Err(err) = self.repo.update(ResourceKind::Database, id, &patch) {
                warn!(
                    "event=provision_derived module=provisioner status=error name={:?} error={}",
                    database.name, err
                );
                report
                    .derived_failures
                    .push((database.name.clone(), err.to_string()));
            }
        }

        let mut pages_resolved = true;
        for page in &blueprint.pages {
            let ensured = self.ensure(
                state,
                &mut report,
                ResourceKind::Page,
                &page.name,
                parent_id,
                &[],
            )?;
            pages_resolved &= ensured.is_some();
        }

        state.pages.created = pages_resolved;
        self.state_store.save(state)?;
        info!(
            "event=provision_run module=provisioner status=ok reused={} adopted={} created={} ambiguous={} relations={}",
            report.count(EnsureSource::Reused),
            report.count(EnsureSource::Adopted),
            report.count(EnsureSource::Created),
            report.ambiguous.len(),
            report.relations.len()
        );
        Ok(report)
    }

    fn ensure(
        &self,
        state: &mut StateSnapshot,
        report: &mut ProvisionReport,
        kind: ResourceKind,
        name: &str,
        parent_id: ResourceId,
        properties: &[(String, PropertySpec)],
    ) -> Result<Option<ResourceId>, ProvisionError> {
        match self
            .reconciler
            .ensure(state, name, kind, Some(parent_id), properties)
        {
            Ok(outcome) => {
                report.ensured.push(EnsuredResource {
                    kind,
                    name: name.to_string(),
                    id: outcome.resource.remote_id,
                    source: outcome.source,
                });
                Ok(Some(outcome.resource.remote_id))
            }
            Err(ReconcileError::Ambiguous { candidates, .. }) => {
                report.ambiguous.push(AmbiguousResource {
                    kind,
                    name: name.to_string(),
                    candidates,
                });
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn bind_relation(
        &mut self,
        relation: &RelationBlueprint,
        databases: &BTreeMap<String, ResourceId>,
    ) -> RelationStatus {
        let (Some(&owner), Some(&target)) = (
            databases.get(&relation.owner),
            databases.get(&relation.target),
        ) else {
            return RelationStatus::Skipped;
        };

        let result = match &relation.target_property {
            None => self
                .binder
                .bind_single(owner, &relation.owner_property, target),
            Some(target_property) => {
                match self.binder.is_bound_dual(
                    owner,
                    &relation.owner_property,
                    target,
                    target_property,
                ) {
                    Ok(true) => return RelationStatus::AlreadyDual,
                    Ok(false) => {}
                    Err(err) => warn!(
                        "event=provision_relation module=provisioner status=degraded owner={:?} property={:?} error={}",
                        relation.owner, relation.owner_property, err
                    ),
                }
                let mut spec = RelationSpec {
                    owner,
                    owner_property: relation.owner_property.clone(),
                    target,
                    target_property: target_property.clone(),
                    mode: BindMode::Dual,
                };
                self.binder.bind(&mut spec)
            }
        };

        match result {
            Ok(outcome) => RelationStatus::Bound(outcome.mode),
            Err(err) => {
                warn!(
                    "event=provision_relation module=provisioner status=error owner={:?} property={:?} error={}",
                    relation.owner, relation.owner_property, err
                );
                RelationStatus::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }
}
