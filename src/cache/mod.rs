//! Client-side resource cache for admin content views.
//!
//! Keeps paginated lists, featured subsets, category listings and per-id
//! details consistent with the remote store while writes happen alongside
//! reads:
//!
//! - **Store**: key → entry table with per-key subscriptions
//! - **Executor**: serves fresh entries, de-duplicates in-flight requests
//! - **Coordinator**: runs writes and reconciles every affected view
//!
//! ## Configuration
//!
//! Freshness policy is controlled via `cms-cache.toml`:
//!
//! ```toml
//! [cache]
//! stale_after_secs = 300
//! refetch_on_focus = true
//! refetch_interval_ms = 0
//! ```

mod config;
mod entry;
mod error;
mod family;
mod fetch;
mod keys;
mod lock;
mod mutation;
mod payload;
mod planner;
mod registry;
mod store;
mod subscription;
mod transform;

pub use config::CacheConfig;
pub use entry::{CacheEntry, FetchStatus, Staleness};
pub use error::{ErrorInfo, ErrorKind, MutationError, PlanError, RemoteError};
pub use family::{FamilyDescriptor, PAGINATION_PARAMS};
pub use fetch::{FetchExecutor, FetchFuture, FetchOptions, Fetcher};
pub use keys::{EntityId, KeyParams, KeyPattern, ParamValue, ResourceKey, ViewKind};
pub use mutation::MutationCoordinator;
pub use payload::{Payload, Record, record_id};
pub use planner::{ListPatch, MutationIntent, MutationPlan, Operation};
pub use registry::KeyRegistry;
pub use store::{CacheStore, Epoch, PatchOutcome, StoreStats};
pub use subscription::Subscription;
pub use transform::{SummaryProjection, ViewTransformer};
