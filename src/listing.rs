//! Listings: an uploaded file plus its price, and the quote derived from it.

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::util::{MoneyAmount, MoneyAmountParseError, UnixTimestamp};

/// Opaque listing identifier: 128 random bits, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingId(String);

impl ListingId {
    const HEX_LEN: usize = 32;

    pub fn random() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid listing id {0:?}")]
pub struct ListingIdFormatError(String);

impl FromStr for ListingId {
    type Err = ListingIdFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == Self::HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit());
        if valid {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(ListingIdFormatError(s.to_string()))
        }
    }
}

impl Display for ListingId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ListingId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ListingId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ListingId::from_str(&s).map_err(de::Error::custom)
    }
}

/// An uploaded file and its price. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListing {
    pub id: ListingId,
    pub filename: String,
    pub price: MoneyAmount,
    pub mime_type: String,
    pub size_bytes: u64,
    pub created_at: UnixTimestamp,
}

impl FileListing {
    pub fn quote(&self) -> Quote {
        Quote {
            listing_id: self.id.clone(),
            filename: self.filename.clone(),
            price: self.price,
        }
    }

    pub fn is_free(&self) -> bool {
        self.price.is_zero()
    }
}

/// Filename and price of a listing, fetched once per unlock session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub listing_id: ListingId,
    pub filename: String,
    pub price: MoneyAmount,
}

impl Quote {
    pub fn is_free(&self) -> bool {
        self.price.is_zero()
    }

    /// The transfer amount this quote asks for, in wei.
    pub fn amount_wei(&self) -> Result<U256, MoneyAmountParseError> {
        self.price.to_wei()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FilenameError {
    #[error("No selected file")]
    Empty,
    #[error("Filename {0:?} is not allowed")]
    Forbidden(String),
}

/// Reduces an uploaded filename to a safe single path component.
///
/// Directory parts are discarded, whitespace becomes `_`, and anything outside
/// `[A-Za-z0-9._-]` is dropped. Leading dots are stripped so the result is never
/// hidden, `.` or `..`.
pub fn sanitize_filename(raw: &str) -> Result<String, FilenameError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(FilenameError::Empty);
    }
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_whitespace() => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => Some(c),
            _ => None,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        return Err(FilenameError::Forbidden(raw.to_string()));
    }
    Ok(cleaned.to_string())
}

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Guesses a MIME type from the filename extension.
pub fn guess_mime_type(filename: &str) -> &'static str {
    let Some((_, extension)) = filename.rsplit_once('.') else {
        return DEFAULT_MIME_TYPE;
    };
    match extension.to_ascii_lowercase().as_str() {
        "txt" | "text" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        "7z" => "application/x-7z-compressed",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/vnd.microsoft.icon",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "epub" => "application/epub+zip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "wasm" => "application/wasm",
        _ => DEFAULT_MIME_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_distinct_hex() {
        let a = ListingId::random();
        let b = ListingId::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert_eq!(a.as_str().parse::<ListingId>().unwrap(), a);
    }

    #[test]
    fn listing_id_rejects_paths_and_short_values() {
        assert!("../../etc/passwd".parse::<ListingId>().is_err());
        assert!("abc".parse::<ListingId>().is_err());
        assert!("zz0123456789abcdef0123456789abcd".parse::<ListingId>().is_err());
        let upper: ListingId = "0123456789ABCDEF0123456789ABCDEF".parse().unwrap();
        assert_eq!(upper.as_str(), "0123456789abcdef0123456789abcdef");
    }

    #[test]
    fn sanitize_strips_directories_and_oddities() {
        assert_eq!(sanitize_filename("report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\my file.txt").unwrap(), "my_file.txt");
        assert_eq!(sanitize_filename(".bashrc").unwrap(), "bashrc");
        assert!(matches!(sanitize_filename("   "), Err(FilenameError::Empty)));
        assert!(matches!(sanitize_filename(".."), Err(FilenameError::Forbidden(_))));
        assert!(matches!(sanitize_filename("dir/"), Err(FilenameError::Forbidden(_))));
    }

    #[test]
    fn mime_guess() {
        assert_eq!(guess_mime_type("notes.TXT"), "text/plain");
        assert_eq!(guess_mime_type("photo.jpeg"), "image/jpeg");
        assert_eq!(guess_mime_type("archive.tar.gz"), "application/gzip");
        assert_eq!(guess_mime_type("Makefile"), DEFAULT_MIME_TYPE);
        assert_eq!(guess_mime_type("blob.xyz"), DEFAULT_MIME_TYPE);
    }

    #[test]
    fn quote_amount_in_wei() {
        let listing = FileListing {
            id: ListingId::random(),
            filename: "a.txt".into(),
            price: "0.01".parse().unwrap(),
            mime_type: "text/plain".into(),
            size_bytes: 3,
            created_at: UnixTimestamp::from_secs(0),
        };
        let quote = listing.quote();
        assert!(!quote.is_free());
        assert_eq!(
            quote.amount_wei().unwrap(),
            U256::from(10_000_000_000_000_000u64)
        );
    }
}
