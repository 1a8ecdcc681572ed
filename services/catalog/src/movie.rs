use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// Year of the first surviving motion picture
pub const EARLIEST_RELEASE_YEAR: i32 = 1888;

/// How far into the future an announced release may be dated
pub const FUTURE_RELEASE_WINDOW: i32 = 5;

/// Stored movie row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MovieRecord {
    /// Identifier assigned by the record store
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub release_year: i32,
    pub genre: String,
    /// Public poster URL, absent when no poster is attached
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User-editable fields of a new movie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieFields {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub release_year: i32,
    #[serde(default)]
    pub genre: String,
}

/// Partial edit of an existing movie; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoviePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub release_year: Option<i32>,
    pub genre: Option<String>,
}

/// Poster file supplied alongside a create or update
#[derive(Clone, PartialEq)]
pub struct PosterUpload {
    /// Name of the file on the client, used for its extension
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for PosterUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PosterUpload")
            .field("file_name", &self.file_name)
            .field("size_bytes", &self.bytes.len())
            .finish()
    }
}

/// Row handed to the record store on insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewMovie {
    pub title: String,
    pub description: String,
    pub release_year: i32,
    pub genre: String,
    pub image_url: Option<String>,
}

impl NewMovie {
    pub fn new(fields: MovieFields, image_url: Option<String>) -> Self {
        Self {
            title: fields.title,
            description: fields.description,
            release_year: fields.release_year,
            genre: fields.genre,
            image_url,
        }
    }
}

/// Column changes handed to the record store on update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovieChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub release_year: Option<i32>,
    pub genre: Option<String>,
    /// Replacement poster URL; `None` keeps the current one
    pub image_url: Option<String>,
}

impl MovieChanges {
    pub fn new(patch: MoviePatch, image_url: Option<String>) -> Self {
        Self {
            title: patch.title,
            description: patch.description,
            release_year: patch.release_year,
            genre: patch.genre,
            image_url,
        }
    }
}

/// Rejected movie input
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Title must not be empty")]
    BlankTitle,

    #[error("Release year {year} is outside {min}..={max}")]
    ReleaseYearOutOfRange { year: i32, min: i32, max: i32 },
}

impl MovieFields {
    /// Validate against the current calendar year
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_for_year(Utc::now().year())
    }

    fn validate_for_year(&self, current_year: i32) -> Result<(), ValidationError> {
        check_title(&self.title)?;
        check_release_year(self.release_year, current_year)
    }
}

impl MoviePatch {
    /// Validate only the fields being changed
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_for_year(Utc::now().year())
    }

    fn validate_for_year(&self, current_year: i32) -> Result<(), ValidationError> {
        if let Some(ref title) = self.title {
            check_title(title)?;
        }
        if let Some(year) = self.release_year {
            check_release_year(year, current_year)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.release_year.is_none()
            && self.genre.is_none()
    }
}

fn check_title(title: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        Err(ValidationError::BlankTitle)
    } else {
        Ok(())
    }
}

fn check_release_year(year: i32, current_year: i32) -> Result<(), ValidationError> {
    let max = current_year + FUTURE_RELEASE_WINDOW;

    if (EARLIEST_RELEASE_YEAR..=max).contains(&year) {
        Ok(())
    } else {
        Err(ValidationError::ReleaseYearOutOfRange {
            year,
            min: EARLIEST_RELEASE_YEAR,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dune() -> MovieFields {
        MovieFields {
            title: "Dune".to_string(),
            description: "Paul Atreides arrives on Arrakis.".to_string(),
            release_year: 2021,
            genre: "Sci-Fi".to_string(),
        }
    }

    #[test]
    fn test_valid_fields() {
        assert_eq!(dune().validate_for_year(2024), Ok(()));
    }

    #[test]
    fn test_blank_title_rejected() {
        let mut fields = dune();
        fields.title = "   ".to_string();

        assert_eq!(fields.validate_for_year(2024), Err(ValidationError::BlankTitle));
    }

    #[test]
    fn test_release_year_bounds() {
        let mut fields = dune();

        fields.release_year = 1888;
        assert!(fields.validate_for_year(2024).is_ok());

        fields.release_year = 2029;
        assert!(fields.validate_for_year(2024).is_ok());

        fields.release_year = 1887;
        assert!(matches!(
            fields.validate_for_year(2024),
            Err(ValidationError::ReleaseYearOutOfRange { year: 1887, .. })
        ));

        fields.release_year = 2030;
        assert_eq!(
            fields.validate_for_year(2024),
            Err(ValidationError::ReleaseYearOutOfRange {
                year: 2030,
                min: 1888,
                max: 2029
            })
        );
    }

    #[test]
    fn test_patch_validates_only_present_fields() {
        assert!(MoviePatch::default().validate_for_year(2024).is_ok());

        let patch = MoviePatch {
            title: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(patch.validate_for_year(2024), Err(ValidationError::BlankTitle));

        let patch = MoviePatch {
            release_year: Some(1500),
            ..Default::default()
        };
        assert!(patch.validate_for_year(2024).is_err());
    }

    #[test]
    fn test_new_movie_carries_image_url() {
        let url = "https://proj.supabase.co/storage/v1/object/public/movie-posters/a-1.jpg";
        let movie = NewMovie::new(dune(), Some(url.to_string()));

        assert_eq!(movie.title, "Dune");
        assert_eq!(movie.image_url.as_deref(), Some(url));
    }

    #[test]
    fn test_poster_debug_hides_bytes() {
        let poster = PosterUpload {
            file_name: "dune.jpg".to_string(),
            bytes: vec![0u8; 2048],
        };

        let rendered = format!("{:?}", poster);
        assert!(rendered.contains("size_bytes: 2048"));
        assert!(!rendered.contains("[0, 0"));
    }
}
