//! Nier Catalog Service
//!
//! Movie catalog backed by a relational record store and an object store for
//! poster images. The service keeps the two consistent across create, update
//! and delete: a record is only written after its poster upload succeeds, old
//! posters are removed when replaced, and a deleted movie takes its poster
//! with it.
//!
//! ## Architecture
//!
//! ```text
//!  HTTP API                Lifecycle                 Stores
//! ┌──────────────┐       ┌──────────────┐         ┌──────────────┐
//! │ /api/v1/     │       │ Movie        │────────▶│ S3 bucket    │
//! │   movies     │──────▶│ Lifecycle    │         │ movie-posters│
//! └──────────────┘       └──────────────┘         └──────────────┘
//!        │                      │                        ▲
//!        ▼                      ▼                        │
//! ┌──────────────┐       ┌──────────────┐         ┌──────────────┐
//! │ Movie        │       │ PostgreSQL   │◀────────│ Reconciler   │
//! │ Cache        │       │ movies       │         │ (orphans)    │
//! └──────────────┘       └──────────────┘         └──────────────┘
//! ```

pub mod api;
pub mod asset_store;
pub mod cache;
pub mod config;
pub mod keys;
pub mod lifecycle;
pub mod movie;
pub mod reconcile;
pub mod record_store;

pub use asset_store::{AssetStore, S3AssetStore, StoreError};
pub use cache::MovieCache;
pub use config::Config;
pub use keys::{generate_key, key_from_public_url, StoragePath};
pub use lifecycle::{ActionError, ActionResult, ErrorKind, LifecycleError, MovieLifecycle};
pub use movie::{MovieFields, MoviePatch, MovieRecord, PosterUpload, ValidationError};
pub use reconcile::{ReconcileReport, Reconciler};
pub use record_store::{PgRecordStore, RecordStore, RecordStoreError};
