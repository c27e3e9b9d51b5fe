//! Cumulus - declarative AWS resource management for Kubernetes
//!
//! Cumulus watches managed-resource records (Role, RolePolicyAttachment,
//! LoadBalancer) and drives the external AWS resources they describe toward
//! the declared state through observe/create/update/delete control loops.
//!
//! # Architecture
//!
//! One generic reconciliation core drives every kind:
//! - The core owns finalizers, conditions, scheduling, and the branch on
//!   existence/drift/deletion
//! - Per-kind adapters translate between records and cloud shapes
//! - Cross-reference resolution and tagging run as initializers before the
//!   first cloud call
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions and the Managed/Taggable traits
//! - [`controller`] - The generic reconciliation core and registry seam
//! - [`external`] - Per-kind external adapters over the cloud gateways
//! - [`cloud`] - Thin per-service gateways over the AWS SDK
//! - [`reference`] - Cross-reference resolution between records
//! - [`tagger`] - Default tag stamping
//! - [`diff`] - Set/map/tag difference rules and late initialization
//! - [`secrets`] - Connection detail publishing
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

pub mod cloud;
pub mod controller;
pub mod crd;
pub mod diff;
pub mod error;
pub mod external;
pub mod reference;
pub mod secrets;
pub mod tagger;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Identity Constants
// =============================================================================
// These strings are persisted on records and external resources; changing
// any of them orphans everything written under the old value.

/// Annotation holding the authoritative cloud-side identifier of a record
pub const EXTERNAL_NAME_ANNOTATION: &str = "cumulus.dev/external-name";

/// Finalizer marker identifying this reconciliation core
pub const FINALIZER: &str = "managed.cumulus.dev";

/// Field manager name for server-side apply
pub const FIELD_MANAGER: &str = "cumulus-controller";

/// Tag key carrying the controller instance identifier
pub const TAG_OWNER_KEY: &str = "owner";

/// Tag key carrying the owning record's uid
pub const TAG_UID_KEY: &str = "uid";

/// Default controller instance identifier stamped as the owner tag
pub const DEFAULT_OWNER: &str = "cumulus";
