//! Movie lifecycle manager.
//!
//! Sequences poster uploads/deletes against record writes so that a record
//! never points at a poster that was not successfully stored. The two stores
//! are not transactional: each operation is one fixed sequence of store calls,
//! and the failure windows between them are accepted.
//!
//! ```text
//! create:  put(new) -> insert
//! update:  remove(old) -> put(new) -> update
//! delete:  remove(old) -> delete_by_id
//! ```

use crate::asset_store::{AssetStore, StoreError};
use crate::keys::{generate_key, key_from_public_url};
use crate::movie::{
    MovieChanges, MovieFields, MoviePatch, MovieRecord, NewMovie, PosterUpload, ValidationError,
};
use crate::record_store::{RecordStore, RecordStoreError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Failures of a lifecycle operation
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Invalid movie: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to upload poster: {0}")]
    AssetUploadFailed(#[source] StoreError),

    #[error("Failed to delete poster {url}: {reason}")]
    AssetDeleteFailed { url: String, reason: String },

    #[error("Record store failed: {0}")]
    RecordStoreFailed(#[from] RecordStoreError),
}

/// Machine-readable error category reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    AssetUploadFailed,
    AssetDeleteFailed,
    NotFound,
    RecordStoreFailed,
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::Validation(_) => ErrorKind::Validation,
            LifecycleError::AssetUploadFailed(_) => ErrorKind::AssetUploadFailed,
            LifecycleError::AssetDeleteFailed { .. } => ErrorKind::AssetDeleteFailed,
            LifecycleError::RecordStoreFailed(RecordStoreError::NotFound(_)) => ErrorKind::NotFound,
            LifecycleError::RecordStoreFailed(_) => ErrorKind::RecordStoreFailed,
        }
    }
}

/// Error payload of a failed action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&LifecycleError> for ActionError {
    fn from(error: &LifecycleError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Result value returned by every action; actions never fail with `Err`.
///
/// `warnings` carries non-fatal problems (an old poster that could not be
/// removed) so a caller can tell "saved, cleanup failed" from "nothing saved".
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl<T> ActionResult<T> {
    fn succeeded(data: Option<T>, warnings: Vec<String>) -> Self {
        Self {
            success: true,
            data,
            error: None,
            warnings,
        }
    }

    fn failed(error: &LifecycleError, warnings: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            warnings,
        }
    }
}

/// Orchestrates poster and record writes for movies
pub struct MovieLifecycle {
    assets: Arc<dyn AssetStore>,
    records: Arc<dyn RecordStore>,
}

impl MovieLifecycle {
    pub fn new(assets: Arc<dyn AssetStore>, records: Arc<dyn RecordStore>) -> Self {
        Self { assets, records }
    }

    /// Create a movie, uploading its poster first when one is given.
    ///
    /// A failed upload aborts before the record store is touched. A failed
    /// insert after a successful upload leaves the poster orphaned.
    #[instrument(skip(self, input, poster), fields(title = %input.title, has_poster = poster.is_some()))]
    pub async fn create_movie(
        &self,
        input: MovieFields,
        poster: Option<PosterUpload>,
    ) -> ActionResult<MovieRecord> {
        if let Err(e) = input.validate() {
            return reject(e.into(), Vec::new());
        }

        let image_url = match poster {
            Some(poster) => match self.upload_poster(poster).await {
                Ok(url) => Some(url),
                Err(e) => return reject(e, Vec::new()),
            },
            None => None,
        };

        match self.records.insert(&NewMovie::new(input, image_url.clone())).await {
            Ok(movie) => {
                info!(movie_id = %movie.id, "Movie created");
                metrics::counter!("catalog.movies.created").increment(1);
                ActionResult::succeeded(Some(movie), Vec::new())
            }
            Err(e) => {
                if let Some(ref url) = image_url {
                    warn!(image_url = %url, "Poster orphaned by failed insert");
                }
                reject(e.into(), Vec::new())
            }
        }
    }

    /// Update a movie, replacing its poster when a new one is given.
    ///
    /// `previous_image_url` is the poster the caller last saw on this record.
    /// The old poster is removed before the new one is uploaded; failing to
    /// remove it is reported as a warning and does not stop the update.
    #[instrument(skip(self, patch, previous_image_url, poster), fields(has_poster = poster.is_some()))]
    pub async fn update_movie(
        &self,
        id: Uuid,
        patch: MoviePatch,
        previous_image_url: Option<&str>,
        poster: Option<PosterUpload>,
    ) -> ActionResult<MovieRecord> {
        if let Err(e) = patch.validate() {
            return reject(e.into(), Vec::new());
        }

        let mut warnings = Vec::new();

        let image_url = match poster {
            Some(poster) => {
                if let Some(old_url) = previous_image_url {
                    self.discard_poster(old_url, &mut warnings).await;
                }

                match self.upload_poster(poster).await {
                    Ok(url) => Some(url),
                    Err(e) => {
                        if previous_image_url.is_some() {
                            warn!(movie_id = %id, "Record still references the removed poster");
                        }
                        return reject(e, warnings);
                    }
                }
            }
            None => None,
        };

        match self.records.update(id, &MovieChanges::new(patch, image_url.clone())).await {
            Ok(movie) => {
                info!(movie_id = %movie.id, "Movie updated");
                metrics::counter!("catalog.movies.updated").increment(1);
                ActionResult::succeeded(Some(movie), warnings)
            }
            Err(e) => {
                if let Some(ref url) = image_url {
                    warn!(image_url = %url, "Poster orphaned by failed update");
                }
                reject(e.into(), warnings)
            }
        }
    }

    /// Delete a movie and the poster it references.
    ///
    /// The poster is removed first; a failed removal is only reported as a
    /// warning and the record is deleted regardless. The result reflects the
    /// record deletion alone.
    #[instrument(skip(self, known_image_url))]
    pub async fn delete_movie(&self, id: Uuid, known_image_url: Option<&str>) -> ActionResult<()> {
        let mut warnings = Vec::new();

        if let Some(url) = known_image_url {
            self.discard_poster(url, &mut warnings).await;
        }

        match self.records.delete_by_id(id).await {
            Ok(()) => {
                info!("Movie deleted");
                metrics::counter!("catalog.movies.deleted").increment(1);
                ActionResult::succeeded(None, warnings)
            }
            Err(e) => {
                if known_image_url.is_some() {
                    warn!("Record delete failed after poster cleanup");
                }
                reject(e.into(), warnings)
            }
        }
    }

    /// All movies, newest first
    #[instrument(skip(self))]
    pub async fn list_movies(&self) -> Result<Vec<MovieRecord>, LifecycleError> {
        self.records.list_ordered_by_created_desc().await.map_err(|e| {
            error!(error = %e, "Failed to list movies");
            e.into()
        })
    }

    /// Upload a poster under a fresh key and return its public URL
    async fn upload_poster(&self, poster: PosterUpload) -> Result<String, LifecycleError> {
        let key = generate_key(&poster.file_name);

        self.assets
            .put(&key, poster.bytes)
            .await
            .map_err(LifecycleError::AssetUploadFailed)?;

        Ok(self.assets.public_url_for(&key))
    }

    /// Best-effort poster removal; failures become warnings
    async fn discard_poster(&self, url: &str, warnings: &mut Vec<String>) {
        let outcome = match key_from_public_url(url) {
            Some(path) => self.assets.remove(&path).await.map_err(|e| e.to_string()),
            None => Err("URL does not name a stored poster".to_string()),
        };

        if let Err(reason) = outcome {
            let error = LifecycleError::AssetDeleteFailed {
                url: url.to_string(),
                reason,
            };
            warn!(error = %error, "Poster cleanup failed");
            metrics::counter!("catalog.assets.delete_failed").increment(1);
            warnings.push(error.to_string());
        }
    }
}

fn reject<T>(error: LifecycleError, warnings: Vec<String>) -> ActionResult<T> {
    match error {
        LifecycleError::Validation(_) => warn!(error = %error, "Movie rejected"),
        _ => error!(error = %error, "Movie operation failed"),
    }
    ActionResult::failed(&error, warnings)
}
