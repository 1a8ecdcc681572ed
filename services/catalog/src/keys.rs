//! Storage key generation and public URL parsing for poster assets.
//!
//! Keys have the shape `{token}-{epoch_millis}.{ext}`. Public URLs published by
//! the asset store look like `{base}/public/{bucket}/{key}`; the part after the
//! `/public/` segment is the bucket-qualified object path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;
use url::Url;
use uuid::Uuid;

/// Path segment separating the store's routing prefix from the public bucket namespace
const PUBLIC_SEGMENT: &str = "/public/";

/// Length of the random token at the start of a key
const TOKEN_LEN: usize = 12;

/// Bucket-qualified location of a stored asset
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoragePath {
    /// Bucket the object lives in
    pub bucket: String,
    /// Object key inside the bucket
    pub key: String,
}

impl StoragePath {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Generate a fresh storage key for an uploaded file
pub fn generate_key(original_filename: &str) -> String {
    let token = Uuid::new_v4().simple().to_string();
    build_key(&token[..TOKEN_LEN], Utc::now(), original_filename)
}

/// Assemble `{token}-{millis}.{ext}`; the dot is omitted when the file has no extension
fn build_key(token: &str, at: DateTime<Utc>, original_filename: &str) -> String {
    let millis = at.timestamp_millis();

    match file_extension(original_filename) {
        Some(ext) => format!("{token}-{millis}.{ext}"),
        None => format!("{token}-{millis}"),
    }
}

/// Extension after the last `.` of a filename, sanitized for use in a URL path
fn file_extension(original_filename: &str) -> Option<String> {
    let (_, ext) = original_filename.rsplit_once('.')?;
    let ext = sanitize_path_component(ext);

    if ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// Keep only characters that survive a URL path unescaped
fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Upload time encoded in a generated key, if the key has the generated shape
pub fn key_timestamp(key: &str) -> Option<DateTime<Utc>> {
    let stem = key.split_once('.').map_or(key, |(stem, _)| stem);
    let (token, millis) = stem.rsplit_once('-')?;

    if token.is_empty() || millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    DateTime::from_timestamp_millis(millis.parse().ok()?)
}

/// Recover the storage path from a public asset URL.
///
/// Returns `None` for anything that is not an absolute URL with a
/// `/public/{bucket}/{key}` tail.
pub fn key_from_public_url(url: &str) -> Option<StoragePath> {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(url = %url, error = %e, "Malformed asset URL");
            return None;
        }
    };

    let Some((_, object_path)) = parsed.path().split_once(PUBLIC_SEGMENT) else {
        warn!(url = %url, "Asset URL has no public segment");
        return None;
    };

    match object_path.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
            Some(StoragePath::new(bucket, key))
        }
        _ => {
            warn!(url = %url, "Asset URL is missing a bucket or key");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BASE: &str = "https://proj.supabase.co/storage/v1/object/public/movie-posters";

    #[test]
    fn test_build_key_format() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();

        assert_eq!(
            build_key("k3j9x0a1b2c3", at, "dune.poster.jpg"),
            format!("k3j9x0a1b2c3-{}.jpg", at.timestamp_millis())
        );
        assert_eq!(
            build_key("k3j9x0a1b2c3", at, "README"),
            format!("k3j9x0a1b2c3-{}", at.timestamp_millis())
        );
    }

    #[test]
    fn test_generate_key_shape() {
        let key = generate_key("poster.PNG");
        let (stem, ext) = key.rsplit_once('.').unwrap();
        let (token, millis) = stem.split_once('-').unwrap();

        assert_eq!(ext, "PNG");
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(millis.parse::<i64>().unwrap() > 0);
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(generate_key("a.jpg"), generate_key("a.jpg"));
    }

    #[test]
    fn test_extension_is_sanitized() {
        assert_eq!(file_extension("cover.we bp"), Some("we_bp".to_string()));
        assert_eq!(file_extension("trailing."), None);
        assert_eq!(file_extension("noext"), None);
    }

    #[test]
    fn test_key_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();

        assert_eq!(key_timestamp(&build_key("k3j9x0a1b2c3", at, "dune.jpg")), Some(at));
        assert_eq!(key_timestamp(&build_key("k3j9x0a1b2c3", at, "README")), Some(at));

        let fresh = key_timestamp(&generate_key("dune.jpg")).unwrap();
        assert!(Utc::now() - fresh < chrono::Duration::seconds(5));

        assert_eq!(key_timestamp("poster.jpg"), None);
        assert_eq!(key_timestamp("-1700000000000.jpg"), None);
        assert_eq!(key_timestamp("abc-17000x0000000.jpg"), None);
        assert_eq!(key_timestamp("abc-.jpg"), None);
    }

    #[test]
    fn test_key_from_public_url() {
        let path = key_from_public_url(&format!("{BASE}/abc123-1700000000000.jpg")).unwrap();

        assert_eq!(path.bucket, "movie-posters");
        assert_eq!(path.key, "abc123-1700000000000.jpg");
        assert_eq!(path.to_string(), "movie-posters/abc123-1700000000000.jpg");
    }

    #[test]
    fn test_round_trip_generated_key() {
        let key = generate_key("poster.jpeg");
        let url = format!("{BASE}/{key}");

        assert_eq!(key_from_public_url(&url).map(|p| p.key), Some(key));
    }

    #[test]
    fn test_malformed_urls_yield_none() {
        assert_eq!(key_from_public_url("not-a-url"), None);
        assert_eq!(key_from_public_url(""), None);
        assert_eq!(key_from_public_url("https://host/no-public-segment/x"), None);
        assert_eq!(key_from_public_url("https://host/storage/public/"), None);
        assert_eq!(key_from_public_url("https://host/storage/public/bucket-only"), None);
    }
}
