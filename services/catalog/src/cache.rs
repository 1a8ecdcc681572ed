use crate::lifecycle::{ActionResult, LifecycleError, MovieLifecycle};
use crate::movie::{MovieFields, MoviePatch, MovieRecord, PosterUpload};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Read-through copy of the movie list.
///
/// The record store stays the source of truth. The cache fills itself on the
/// first read after construction or [`MovieCache::invalidate`], and each
/// successful action is applied to it optimistically.
pub struct MovieCache {
    lifecycle: Arc<MovieLifecycle>,
    movies: RwLock<Option<Vec<MovieRecord>>>,
}

impl MovieCache {
    pub fn new(lifecycle: Arc<MovieLifecycle>) -> Self {
        Self {
            lifecycle,
            movies: RwLock::new(None),
        }
    }

    /// Cached movie list, newest first, loading it from the store on a miss
    pub async fn movies(&self) -> Result<Vec<MovieRecord>, LifecycleError> {
        if let Some(ref movies) = *self.movies.read().await {
            return Ok(movies.clone());
        }

        let mut guard = self.movies.write().await;
        if let Some(ref movies) = *guard {
            return Ok(movies.clone());
        }

        let movies = self.lifecycle.list_movies().await?;
        debug!(count = movies.len(), "Movie cache filled");
        *guard = Some(movies.clone());
        Ok(movies)
    }

    /// Drop the cached list so the next read goes to the store
    pub async fn invalidate(&self) {
        *self.movies.write().await = None;
    }

    pub async fn create_movie(
        &self,
        input: MovieFields,
        poster: Option<PosterUpload>,
    ) -> ActionResult<MovieRecord> {
        let result = self.lifecycle.create_movie(input, poster).await;

        if let Some(ref movie) = result.data {
            if let Some(ref mut movies) = *self.movies.write().await {
                // A concurrent fill may already have listed the new row
                if !movies.iter().any(|m| m.id == movie.id) {
                    movies.insert(0, movie.clone());
                }
            }
        }
        result
    }

    pub async fn update_movie(
        &self,
        id: Uuid,
        patch: MoviePatch,
        previous_image_url: Option<&str>,
        poster: Option<PosterUpload>,
    ) -> ActionResult<MovieRecord> {
        let result = self
            .lifecycle
            .update_movie(id, patch, previous_image_url, poster)
            .await;

        if let Some(ref movie) = result.data {
            let mut guard = self.movies.write().await;
            let stale = match guard.as_mut() {
                Some(movies) => match movies.iter_mut().find(|m| m.id == movie.id) {
                    Some(slot) => {
                        *slot = movie.clone();
                        false
                    }
                    None => true,
                },
                None => false,
            };

            // Updated a movie this copy never saw: reload on next read
            if stale {
                *guard = None;
            }
        }
        result
    }

    pub async fn delete_movie(&self, id: Uuid, known_image_url: Option<&str>) -> ActionResult<()> {
        let result = self.lifecycle.delete_movie(id, known_image_url).await;

        if result.success {
            if let Some(ref mut movies) = *self.movies.write().await {
                movies.retain(|m| m.id != id);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_store::MockAssetStore;
    use crate::movie::{MovieChanges, NewMovie};
    use crate::record_store::{MockRecordStore, RecordStoreError};
    use chrono::{Duration, Utc};

    fn record(id: u128, title: &str, age_secs: i64) -> MovieRecord {
        let at = Utc::now() - Duration::seconds(age_secs);
        MovieRecord {
            id: Uuid::from_u128(id),
            title: title.to_string(),
            description: String::new(),
            release_year: 2021,
            genre: "Sci-Fi".to_string(),
            image_url: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn inserted(movie: &NewMovie) -> MovieRecord {
        let mut stored = record(99, &movie.title, 0);
        stored.image_url = movie.image_url.clone();
        stored
    }

    fn renamed(id: Uuid, changes: &MovieChanges) -> MovieRecord {
        let mut stored = record(id.as_u128(), changes.title.as_deref().unwrap_or("?"), 60);
        stored.updated_at = Utc::now();
        stored
    }

    fn cache(records: MockRecordStore) -> MovieCache {
        let lifecycle = MovieLifecycle::new(Arc::new(MockAssetStore::new()), Arc::new(records));
        MovieCache::new(Arc::new(lifecycle))
    }

    fn fields(title: &str) -> MovieFields {
        MovieFields {
            title: title.to_string(),
            description: String::new(),
            release_year: 2021,
            genre: "Sci-Fi".to_string(),
        }
    }

    #[tokio::test]
    async fn test_reads_through_once() {
        let mut records = MockRecordStore::new();
        records
            .expect_list_ordered_by_created_desc()
            .times(1)
            .returning(|| Ok(vec![record(2, "Arrival", 10), record(1, "Dune", 20)]));

        let cache = cache(records);

        assert_eq!(cache.movies().await.unwrap().len(), 2);
        assert_eq!(cache.movies().await.unwrap()[0].title, "Arrival");
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let mut records = MockRecordStore::new();
        records
            .expect_list_ordered_by_created_desc()
            .times(2)
            .returning(|| Ok(vec![record(1, "Dune", 20)]));

        let cache = cache(records);
        cache.movies().await.unwrap();
        cache.invalidate().await;
        cache.movies().await.unwrap();
    }

    #[tokio::test]
    async fn test_load_failure_is_not_cached() {
        let mut records = MockRecordStore::new();
        let mut calls = 0;
        records
            .expect_list_ordered_by_created_desc()
            .times(2)
            .returning(move || {
                calls += 1;
                if calls == 1 {
                    Err(RecordStoreError::Database(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(vec![record(1, "Dune", 20)])
                }
            });

        let cache = cache(records);

        assert!(cache.movies().await.is_err());
        assert_eq!(cache.movies().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_prepends_to_loaded_list() {
        let mut records = MockRecordStore::new();
        records
            .expect_list_ordered_by_created_desc()
            .times(1)
            .returning(|| Ok(vec![record(1, "Dune", 20)]));
        records.expect_insert().times(1).returning(|movie| Ok(inserted(movie)));

        let cache = cache(records);
        cache.movies().await.unwrap();

        let result = cache.create_movie(fields("Arrival"), None).await;
        assert!(result.success);

        let movies = cache.movies().await.unwrap();
        assert_eq!(movies.len(), 2);
        assert_eq!(movies[0].title, "Arrival");
    }

    #[tokio::test]
    async fn test_create_does_not_duplicate_listed_movie() {
        let mut records = MockRecordStore::new();
        records
            .expect_list_ordered_by_created_desc()
            .times(1)
            .returning(|| Ok(vec![record(99, "Arrival", 0), record(1, "Dune", 20)]));
        records.expect_insert().times(1).returning(|movie| Ok(inserted(movie)));

        let cache = cache(records);
        cache.movies().await.unwrap();

        let result = cache.create_movie(fields("Arrival"), None).await;
        assert!(result.success);

        let movies = cache.movies().await.unwrap();
        assert_eq!(movies.len(), 2);
        assert_eq!(movies.iter().filter(|m| m.id == Uuid::from_u128(99)).count(), 1);
    }

    #[tokio::test]
    async fn test_update_replaces_entry() {
        let mut records = MockRecordStore::new();
        records
            .expect_list_ordered_by_created_desc()
            .times(1)
            .returning(|| Ok(vec![record(2, "Arrival", 10), record(1, "Dune", 20)]));
        records
            .expect_update()
            .times(1)
            .returning(|id, changes| Ok(renamed(id, changes)));

        let cache = cache(records);
        cache.movies().await.unwrap();

        let patch = MoviePatch {
            title: Some("Dune: Part One".to_string()),
            ..Default::default()
        };
        let result = cache.update_movie(Uuid::from_u128(1), patch, None, None).await;
        assert!(result.success);

        let movies = cache.movies().await.unwrap();
        assert_eq!(movies.len(), 2);
        assert_eq!(movies[1].title, "Dune: Part One");
    }

    #[tokio::test]
    async fn test_failed_delete_leaves_entry() {
        let mut records = MockRecordStore::new();
        records
            .expect_list_ordered_by_created_desc()
            .times(1)
            .returning(|| Ok(vec![record(1, "Dune", 20)]));
        records
            .expect_delete_by_id()
            .times(1)
            .returning(|id| Err(RecordStoreError::NotFound(id)));

        let cache = cache(records);
        cache.movies().await.unwrap();

        let result = cache.delete_movie(Uuid::from_u128(1), None).await;
        assert!(!result.success);
        assert_eq!(cache.movies().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_entry() {
        let mut records = MockRecordStore::new();
        records
            .expect_list_ordered_by_created_desc()
            .times(1)
            .returning(|| Ok(vec![record(2, "Arrival", 10), record(1, "Dune", 20)]));
        records.expect_delete_by_id().times(1).returning(|_| Ok(()));

        let cache = cache(records);
        cache.movies().await.unwrap();

        assert!(cache.delete_movie(Uuid::from_u128(2), None).await.success);

        let movies = cache.movies().await.unwrap();
        assert_eq!(movies.len(), 1);
        assert_eq!(movies[0].title, "Dune");
    }
}
