use crate::config::DatabaseConfig;
use crate::movie::{MovieChanges, MovieRecord, NewMovie};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Errors reported by the movie record store
#[derive(Error, Debug)]
pub enum RecordStoreError {
    #[error("Movie not found: {0}")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Table of movie records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a movie, returning it with its assigned id and timestamps
    async fn insert(&self, movie: &NewMovie) -> Result<MovieRecord, RecordStoreError>;

    /// Apply changes to a movie by id
    async fn update(&self, id: Uuid, changes: &MovieChanges) -> Result<MovieRecord, RecordStoreError>;

    /// Delete a movie by id
    async fn delete_by_id(&self, id: Uuid) -> Result<(), RecordStoreError>;

    /// All movies, newest first
    async fn list_ordered_by_created_desc(&self) -> Result<Vec<MovieRecord>, RecordStoreError>;

    /// Check store connectivity
    async fn health_check(&self) -> Result<(), RecordStoreError>;
}

const MOVIE_COLUMNS: &str =
    "id, title, description, release_year, genre, image_url, created_at, updated_at";

/// PostgreSQL-backed record store
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Create a new record store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self, movie), fields(title = %movie.title))]
    async fn insert(&self, movie: &NewMovie) -> Result<MovieRecord, RecordStoreError> {
        let sql = format!(
            r#"
            INSERT INTO movies (title, description, release_year, genre, image_url)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {MOVIE_COLUMNS}
            "#
        );

        let record = sqlx::query_as::<_, MovieRecord>(&sql)
            .bind(&movie.title)
            .bind(&movie.description)
            .bind(movie.release_year)
            .bind(&movie.genre)
            .bind(&movie.image_url)
            .fetch_one(&self.pool)
            .await?;

        debug!(movie_id = %record.id, "Movie inserted");
        Ok(record)
    }

    #[instrument(skip(self, changes))]
    async fn update(&self, id: Uuid, changes: &MovieChanges) -> Result<MovieRecord, RecordStoreError> {
        let sql = format!(
            r#"
            UPDATE movies SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                release_year = COALESCE($4, release_year),
                genre = COALESCE($5, genre),
                image_url = COALESCE($6, image_url),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {MOVIE_COLUMNS}
            "#
        );

        let record = sqlx::query_as::<_, MovieRecord>(&sql)
            .bind(id)
            .bind(&changes.title)
            .bind(&changes.description)
            .bind(changes.release_year)
            .bind(&changes.genre)
            .bind(&changes.image_url)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RecordStoreError::NotFound(id))?;

        debug!("Movie updated");
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn delete_by_id(&self, id: Uuid) -> Result<(), RecordStoreError> {
        let result = sqlx::query("DELETE FROM movies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RecordStoreError::NotFound(id));
        }

        debug!("Movie deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_ordered_by_created_desc(&self) -> Result<Vec<MovieRecord>, RecordStoreError> {
        let sql = format!("SELECT {MOVIE_COLUMNS} FROM movies ORDER BY created_at DESC");

        let movies = sqlx::query_as::<_, MovieRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = movies.len(), "Movies listed");
        Ok(movies)
    }

    async fn health_check(&self) -> Result<(), RecordStoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
