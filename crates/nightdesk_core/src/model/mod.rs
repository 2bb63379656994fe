//! Domain model for provisioned resources.
//!
//! # Responsibility
//! - Define the resource shapes exchanged with any content store backend.
//! - Define typed property schemas that replace loose property bags.
//!
//! # Invariants
//! - Every remote resource is identified by a store-assigned `ResourceId`.
//! - Property specs are validated before they reach a store write path.

pub mod resource;
pub mod schema;
