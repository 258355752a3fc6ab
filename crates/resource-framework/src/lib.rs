//! # Resource Framework
//!
//! This crate provides the building blocks for the data-access and dependency
//! layers of a service: a generic, typed repository over document collections, a
//! uniform contract for external resources, and an orchestrator that brings those
//! resources up and down concurrently.
//!
//! ## Architecture Overview
//!
//! The framework is split into layers, leaves first:
//!
//! 1. **Storage seam** ([`store::DocumentCollection`]) - the narrow interface the
//!    repository needs from a document database, with an in-memory engine
//!    ([`MemoryEngine`]).
//! 2. **Repository core** ([`BaseRepository`]) - typed CRUD and query operations
//!    that classify every storage outcome into one closed error taxonomy
//!    ([`RepositoryError`] / [`ErrorKind`]).
//! 3. **Resources** ([`Resource`]) - `connect / close / ping / name` for every
//!    external dependency, plus timed health checks ([`check_health`]).
//! 4. **Orchestration** ([`ResourceManager`]) - concurrent fan-out/fan-in over the
//!    fixed resource set at startup and shutdown.
//!
//! Domain crates build on top: a domain repository wraps a `BaseRepository` and maps
//! storage documents to entities, and a service layer matches only on
//! [`ErrorKind`], never on storage-specific errors. Swapping the storage engine
//! therefore never touches service logic.
//!
//! ## Error Taxonomy
//!
//! | Kind | Meaning |
//! |------|---------|
//! | `NotFound` | no document matched a single-item operation |
//! | `AlreadyExists` | a unique index rejected the write |
//! | `InvalidId` | the identifier could not be used |
//! | `InvalidInput` | the caller's data cannot be stored |
//! | `Storage` | anything else, wrapped with operation context |
//!
//! Domain repositories may give these entity-specific names but must not invent new
//! underlying conditions.
//!
//! ## Concurrency Model
//!
//! - Collections are shared (`Arc<dyn DocumentCollection>`) by any number of tasks;
//!   the engine serializes writes per collection.
//! - The orchestrator spawns one task per resource and waits for all of them.
//!   Resources are independent: there is no start or stop ordering.
//! - Shutdown is bounded by a timeout independent of each resource's own.
//!
//! ## Testing
//!
//! [`mock::MockResource`] stands in for any external dependency with injectable
//! failures and delays. See the [`mock`] module.

pub mod document;
pub mod error;
pub mod lifecycle;
pub mod mock;
pub mod repository;
pub mod resource;
pub mod store;
pub mod tracing;

// Re-export core types for convenience
pub use document::{DocumentId, IdPolicy};
pub use error::{ErrorKind, RepositoryError, ResourceError, StoreError};
pub use lifecycle::{ConnectReport, LifecycleError, ResourceManager, ShutdownReport};
pub use repository::{BaseRepository, RepositoryConfig};
pub use resource::{check_health, HealthCheck, HealthStatus, ReadinessReport, Resource};
pub use store::{DocumentCollection, FindOptions, MemoryEngine};
