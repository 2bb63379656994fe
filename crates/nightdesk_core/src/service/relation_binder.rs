//! Relation wiring between two databases.
//!
//! # Responsibility
//! - Bind a relation property on both ends as single-direction links.
//! - Upgrade both ends to one dual (synced) relation when the store allows.
//!
//! # Invariants
//! - The dual upgrade runs only after both single binds, since each end
//!   references the other by store-assigned property id.
//! - A failed upgrade leaves both ends single and is not an error.
//! - A pair that failed to upgrade is not retried by the same binder.

use crate::model::resource::{Resource, ResourceId, ResourceKind, ResourcePatch};
use crate::model::schema::{PropertySpec, RelationMode};
use crate::repo::{ContentRepository, StoreError, StoreResult};
use log::{info, warn};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Relation direction as bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    Single,
    Dual,
}

impl BindMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Dual => "dual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindOutcome {
    pub mode: BindMode,
}

/// One relation to bind; `mode` records the downgrade after binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSpec {
    pub owner: ResourceId,
    pub owner_property: String,
    pub target: ResourceId,
    pub target_property: String,
    pub mode: BindMode,
}

/// Errors from single-direction binds.
#[derive(Debug)]
pub enum RelationError {
    /// Store rejected setting the relation property.
    Bind {
        database: ResourceId,
        property: String,
        source: StoreError,
    },
    /// Store did not report an id for a property it just accepted.
    PropertyIdMissing {
        database: ResourceId,
        property: String,
    },
}

impl Display for RelationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind {
                database,
                property,
                source,
            } => write!(f, "failed to bind `{property}` on {database}: {source}"),
            Self::PropertyIdMissing { database, property } => {
                write!(f, "store reported no id for `{property}` on {database}")
            }
        }
    }
}

impl Error for RelationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Bind { source, .. } => Some(source),
            Self::PropertyIdMissing { .. } => None,
        }
    }
}

type PairKey = (ResourceId, String, ResourceId, String);

/// Relation binder over one content store.
pub struct RelationBinder<R: ContentRepository> {
    repo: R,
    downgraded: HashSet<PairKey>,
}

impl<R: ContentRepository> RelationBinder<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            downgraded: HashSet::new(),
        }
    }

    /// Returns true when this binder already downgraded the pair.
    pub fn is_downgraded(
        &self,
        owner: ResourceId,
        owner_property: &str,
        target: ResourceId,
        target_property: &str,
    ) -> bool {
        self.downgraded.contains(&pair_key(
            owner,
            owner_property,
            target,
            target_property,
        ))
    }

    /// Binds `spec` and writes the resulting mode back into it.
    ///
    /// A spec already at `Single` is bound single on both ends without an
    /// upgrade attempt.
    pub fn bind(&mut self, spec: &mut RelationSpec) -> Result<BindOutcome, RelationError> {
        let outcome = match spec.mode {
            BindMode::Dual => self.bind_dual(
                spec.owner,
                &spec.owner_property,
                spec.target,
                &spec.target_property,
            )?,
            BindMode::Single => {
                self.bind_ends(
                    spec.owner,
                    &spec.owner_property,
                    spec.target,
                    &spec.target_property,
                )?;
                BindOutcome {
                    mode: BindMode::Single,
                }
            }
        };
        spec.mode = outcome.mode;
        Ok(outcome)
    }

    /// Binds `owner_property` on `owner` and `target_property` on `target`,
    /// then tries to make them one dual relation.
    ///
    /// # Errors
    /// - `Bind` / `PropertyIdMissing` when a single-direction bind fails.
    ///   Upgrade failures are reported as `BindMode::Single` instead.
    pub fn bind_dual(
        &mut self,
        owner: ResourceId,
        owner_property: &str,
        target: ResourceId,
        target_property: &str,
    ) -> Result<BindOutcome, RelationError> {
        let (owner_property_id, target_property_id) =
            self.bind_ends(owner, owner_property, target, target_property)?;

        let key = pair_key(owner, owner_property, target, target_property);
        if self.downgraded.contains(&key) {
            info!(
                "event=relation_bind module=relation_binder status=ok mode=single reason=downgraded owner={} property={:?}",
                owner, owner_property
            );
            return Ok(BindOutcome {
                mode: BindMode::Single,
            });
        }

        match self.upgrade(
            owner,
            owner_property,
            &owner_property_id,
            target,
            target_property,
            &target_property_id,
        ) {
            Ok(()) => {
                info!(
                    "event=relation_bind module=relation_binder status=ok mode=dual owner={} property={:?} target={} target_property={:?}",
                    owner, owner_property, target, target_property
                );
                Ok(BindOutcome {
                    mode: BindMode::Dual,
                })
            }
            Err(err) => {
                warn!(
                    "event=relation_bind module=relation_binder status=degraded mode=single owner={} property={:?} target={} target_property={:?} error={}",
                    owner, owner_property, target, target_property, err
                );
                self.downgraded.insert(key);
                Ok(BindOutcome {
                    mode: BindMode::Single,
                })
            }
        }
    }

    /// Binds a one-way relation on `owner` only.
    pub fn bind_single(
        &self,
        owner: ResourceId,
        owner_property: &str,
        target: ResourceId,
    ) -> Result<BindOutcome, RelationError> {
        self.set_single(owner, owner_property, target)?;
        info!(
            "event=relation_bind module=relation_binder status=ok mode=single owner={} property={:?} target={}",
            owner, owner_property, target
        );
        Ok(BindOutcome {
            mode: BindMode::Single,
        })
    }

    /// Returns true when both ends already form one dual relation.
    pub fn is_bound_dual(
        &self,
        owner: ResourceId,
        owner_property: &str,
        target: ResourceId,
        target_property: &str,
    ) -> StoreResult<bool> {
        let owner_db = self.repo.retrieve(ResourceKind::Database, owner)?;
        let target_db = self.repo.retrieve(ResourceKind::Database, target)?;
        let links = |from: &Resource, property: &str, to: ResourceId, synced: &str| {
            matches!(
                from.properties.get(property).map(|schema| &schema.spec),
                Some(PropertySpec::Relation {
                    database_id,
                    mode: RelationMode::Dual { synced_property_name, .. },
                }) if *database_id == to && synced_property_name.as_str() == synced
            )
        };
        Ok(links(&owner_db, owner_property, target, target_property)
            && links(&target_db, target_property, owner, owner_property))
    }

    fn bind_ends(
        &self,
        owner: ResourceId,
        owner_property: &str,
        target: ResourceId,
        target_property: &str,
    ) -> Result<(String, String), RelationError> {
        self.set_single(owner, owner_property, target)?;
        let owner_property_id = self.property_id(owner, owner_property)?;
        self.set_single(target, target_property, owner)?;
        let target_property_id = self.property_id(target, target_property)?;
        Ok((owner_property_id, target_property_id))
    }

    fn set_single(
        &self,
        database: ResourceId,
        property: &str,
        points_at: ResourceId,
    ) -> Result<(), RelationError> {
        self.repo
            .update(
                ResourceKind::Database,
                database,
                &ResourcePatch::property(property, PropertySpec::relation(points_at)),
            )
            .map(|_| ())
            .map_err(|source| RelationError::Bind {
                database,
                property: property.to_string(),
                source,
            })
    }

    fn property_id(&self, database: ResourceId, property: &str) -> Result<String, RelationError> {
        let resource = self
            .repo
            .retrieve(ResourceKind::Database, database)
            .map_err(|source| RelationError::Bind {
                database,
                property: property.to_string(),
                source,
            })?;
        resource
            .property_id(property)
            .map(str::to_string)
            .ok_or_else(|| RelationError::PropertyIdMissing {
                database,
                property: property.to_string(),
            })
    }

    fn upgrade(
        &self,
        owner: ResourceId,
        owner_property: &str,
        owner_property_id: &str,
        target: ResourceId,
        target_property: &str,
        target_property_id: &str,
    ) -> StoreResult<()> {
        let owner_dual = PropertySpec::dual_relation(target, target_property_id, target_property)?;
        self.repo.update(
            ResourceKind::Database,
            owner,
            &ResourcePatch::property(owner_property, owner_dual),
        )?;

        let target_result = PropertySpec::dual_relation(owner, owner_property_id, owner_property)
            .map_err(StoreError::from)
            .and_then(|target_dual| {
                self.repo.update(
                    ResourceKind::Database,
                    target,
                    &ResourcePatch::property(target_property, target_dual),
                )
            });
        if let Err(err) = target_result {
            if let Err(revert_err) = self.set_single(owner, owner_property, target) {
                warn!(
                    "event=relation_revert module=relation_binder status=error owner={} property={:?} error={}",
                    owner, owner_property, revert_err
                );
            }
            return Err(err);
        }
        Ok(())
    }
}

fn pair_key(
    owner: ResourceId,
    owner_property: &str,
    target: ResourceId,
    target_property: &str,
) -> PairKey {
    (
        owner,
        owner_property.to_string(),
        target,
        target_property.to_string(),
    )
}
