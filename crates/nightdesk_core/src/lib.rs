//! Provisioning and reconciliation engine for the Night Desk workspace.
//! This crate owns the convergence rules; front ends only wire inputs.

pub mod blueprint;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod state;

pub use blueprint::{night_desk, Blueprint};
pub use config::{Config, ConfigError};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::resource::{Resource, ResourceId, ResourceKind, ResourceRef, ResurfaceItem};
pub use repo::notion_repo::NotionContentRepository;
pub use repo::sqlite_repo::{SandboxCapabilities, SqliteContentRepository};
pub use repo::{ContentRepository, StoreError, StoreResult};
pub use service::cap_scheduler::{CapReport, CapScheduler, DEFAULT_MAX_PER_CATEGORY};
pub use service::duplicate_resolver::{DedupeReport, DuplicateResolver};
pub use service::provisioner::{ProvisionError, ProvisionReport, Provisioner};
pub use service::reconciler::{EnsureOutcome, EnsureSource, ReconcileError, Reconciler};
pub use service::relation_binder::{BindMode, RelationBinder, RelationSpec};
pub use service::validator::{ValidationReport, Validator};
pub use state::{JsonFileStateStore, MemoryStateStore, StateError, StateSnapshot, StateStore};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
