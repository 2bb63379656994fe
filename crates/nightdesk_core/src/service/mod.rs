//! Provisioning engine services.
//!
//! # Responsibility
//! - Turn content store primitives into idempotent provisioning steps.
//! - Keep CLI code decoupled from store and state details.
//!
//! # See also
//! - `blueprint` for the declared workspace shape these services converge to.

pub mod cap_scheduler;
pub mod duplicate_resolver;
pub mod provisioner;
pub mod reconciler;
pub mod relation_binder;
pub mod validator;
