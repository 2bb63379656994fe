//! Read-only health check of a provisioned workspace.
//!
//! # Responsibility
//! - Confirm state records every blueprint resource.
//! - Confirm recorded databases expose the blueprint's properties.
//! - Confirm each canonical name has exactly one live instance.
//!
//! # Invariants
//! - Never mutates the store or the state.

use crate::blueprint::Blueprint;
use crate::model::resource::{ResourceId, ResourceKind};
use crate::repo::ContentRepository;
use crate::service::duplicate_resolver::{choose_keeper, find_group_candidates};
use crate::state::StateSnapshot;
use log::info;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validator over one content store.
pub struct Validator<R: ContentRepository> {
    repo: R,
}

impl<R: ContentRepository> Validator<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Checks `state` and the store against `blueprint`.
    ///
    /// Duplicate checks run only when `parent_id` is known.
    pub fn validate(
        &self,
        state: &StateSnapshot,
        blueprint: &Blueprint,
        parent_id: Option<ResourceId>,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();
        self.check_state(state, blueprint, &mut report);
        self.check_properties(state, blueprint, &mut report);
        if let Some(parent_id) = parent_id {
            self.check_duplicates(blueprint, parent_id, &mut report);
        }
        info!(
            "event=validate_run module=validator status={} errors={} warnings={}",
            if report.is_ok() { "ok" } else { "failed" },
            report.errors.len(),
            report.warnings.len()
        );
        report
    }

    fn check_state(&self, state: &StateSnapshot, blueprint: &Blueprint, report: &mut ValidationReport) {
        for kind in [ResourceKind::Database, ResourceKind::Page] {
            let missing: Vec<&str> = blueprint
                .names(kind)
                .into_iter()
                .filter(|name| state.resource_id(kind, name).is_none())
                .collect();
            if !missing.is_empty() {
                report.errors.push(format!(
                    "missing {} ids in state: {}",
                    kind.as_str(),
                    missing.join(", ")
                ));
            }
        }
        if !state.pages.created {
            report
                .warnings
                .push("state does not mark scaffold pages as created".to_string());
        }
    }

    fn check_properties(
        &self,
        state: &StateSnapshot,
        blueprint: &Blueprint,
        report: &mut ValidationReport,
    ) {
        for database in &blueprint.databases {
            let Some(id) = state.resource_id(ResourceKind::Database, &database.name) else {
                continue;
            };
            let resource = match self.repo.retrieve(ResourceKind::Database, id) {
                Ok(resource) => resource,
                Err(err) => {
                    report
                        .errors
                        .push(format!("failed to retrieve {}: {err}", database.name));
                    continue;
                }
            };
            if resource.archived {
                report
                    .errors
                    .push(format!("{} ({id}) is archived", database.name));
            }
            let missing: Vec<String> = blueprint
                .expected_properties(&database.name)
                .into_iter()
                .filter(|name| !resource.properties.contains_key(name))
                .collect();
            if !missing.is_empty() {
                report.errors.push(format!(
                    "{} missing properties: {}",
                    database.name,
                    missing.join(", ")
                ));
            }
        }
    }

    fn check_duplicates(&self, blueprint: &Blueprint, parent_id: ResourceId, report: &mut ValidationReport) {
        for (kind, name) in blueprint.targets() {
            match find_group_candidates(&self.repo, name, kind, parent_id) {
                Ok(candidates) if candidates.len() > 1 => {
                    let keeper = choose_keeper(&candidates)
                        .map(|index| candidates[index].id.to_string())
                        .unwrap_or_default();
                    report.errors.push(format!(
                        "{} copies of {} `{name}` under the parent; `dedupe` would keep {keeper}",
                        candidates.len(),
                        kind.as_str()
                    ));
                }
                Ok(candidates) if candidates.is_empty() => {
                    report.warnings.push(format!(
                        "no live {} `{name}` under the parent",
                        kind.as_str()
                    ));
                }
                Ok(_) => {}
                Err(err) => report
                    .warnings
                    .push(format!("search for `{name}` failed: {err}")),
            }
        }
    }
}
