use crate::asset_store::{AssetStore, StoreError};
use crate::keys::{key_from_public_url, key_timestamp, StoragePath};
use crate::record_store::{RecordStore, RecordStoreError};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Concurrent orphan deletions during a sweep
const SWEEP_CONCURRENCY: usize = 8;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Failed to list posters: {0}")]
    Assets(#[from] StoreError),

    #[error("Failed to list movies: {0}")]
    Records(#[from] RecordStoreError),
}

/// Differences between the poster bucket and the movie table
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Stored posters no movie references
    pub orphans: Vec<StoragePath>,
    /// Unreferenced posters still inside the grace window; never swept
    pub in_flight: Vec<StoragePath>,
    /// Movies whose poster URL names no stored object
    pub dangling: Vec<Uuid>,
    /// Orphans deleted by a sweep
    pub removed: usize,
}

/// Diffs the poster bucket against the movie table
pub struct Reconciler {
    assets: Arc<dyn AssetStore>,
    records: Arc<dyn RecordStore>,
    orphan_grace: Duration,
}

impl Reconciler {
    /// `orphan_grace` covers the gap between a poster upload and the record write
    /// that references it; unreferenced posters younger than that are left alone.
    pub fn new(
        assets: Arc<dyn AssetStore>,
        records: Arc<dyn RecordStore>,
        orphan_grace: Duration,
    ) -> Self {
        Self {
            assets,
            records,
            orphan_grace,
        }
    }

    /// Report orphans and dangling references without changing anything
    #[instrument(skip(self))]
    pub async fn scan(&self) -> Result<ReconcileReport, ReconcileError> {
        let stored = self.assets.list().await?;
        let movies = self.records.list_ordered_by_created_desc().await?;

        let referenced: Vec<(Uuid, Option<StoragePath>)> = movies
            .iter()
            .filter_map(|m| m.image_url.as_deref().map(|url| (m.id, key_from_public_url(url))))
            .collect();

        let stored_set: HashSet<&StoragePath> = stored.iter().collect();
        let referenced_set: HashSet<&StoragePath> =
            referenced.iter().filter_map(|(_, path)| path.as_ref()).collect();

        let cutoff = chrono::Duration::from_std(self.orphan_grace)
            .ok()
            .and_then(|grace| Utc::now().checked_sub_signed(grace));

        let (orphans, in_flight): (Vec<StoragePath>, Vec<StoragePath>) = stored
            .iter()
            .filter(|path| !referenced_set.contains(path))
            .cloned()
            .partition(|path| settled(path, cutoff));

        let dangling: Vec<Uuid> = referenced
            .iter()
            .filter(|(_, path)| path.as_ref().map_or(true, |p| !stored_set.contains(p)))
            .map(|(id, _)| *id)
            .collect();

        info!(
            stored = stored.len(),
            movies = movies.len(),
            orphans = orphans.len(),
            in_flight = in_flight.len(),
            dangling = dangling.len(),
            "Reconciliation scan complete"
        );

        Ok(ReconcileReport {
            orphans,
            in_flight,
            dangling,
            removed: 0,
        })
    }

    /// Scan, then delete every orphaned poster
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<ReconcileReport, ReconcileError> {
        let mut report = self.scan().await?;
        let assets = self.assets.clone();

        let outcomes: Vec<Result<(), StoreError>> = stream::iter(report.orphans.clone())
            .map(move |path| {
                let assets = assets.clone();
                async move {
                    assets.remove(&path).await.map_err(|e| {
                        warn!(path = %path, error = %e, "Failed to remove orphaned poster");
                        e
                    })
                }
            })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;

        report.removed = outcomes.iter().filter(|r| r.is_ok()).count();
        metrics::counter!("catalog.orphans.swept").increment(report.removed as u64);

        info!(removed = report.removed, "Orphaned posters swept");
        Ok(report)
    }
}

/// Whether an unreferenced poster is old enough to be an orphan.
///
/// Keys without an upload timestamp were not minted by this service and are
/// always eligible.
fn settled(path: &StoragePath, cutoff: Option<DateTime<Utc>>) -> bool {
    match (key_timestamp(&path.key), cutoff) {
        (None, _) => true,
        (Some(uploaded_at), Some(cutoff)) => uploaded_at < cutoff,
        (Some(_), None) => false,
    }
}
