//! Core data models used throughout the review engine.
//!
//! Entities reference each other only by id. Children are always looked
//! up through a parent-id query, never held as back-pointers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::auth::Role;
use crate::error::{ReviewError, Result};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

/// Author summary embedded in every review.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reviewer {
    pub id: i64,
    pub username: String,
}

/// A rated entity. The three rating fields are derived from the shop's
/// top-level reviews and are only ever written by the rating aggregator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub owner_id: Option<i64>,
    pub review_count: i64,
    pub average_rating: Decimal,
    pub weighted_rating: Decimal,
    pub media: Vec<ShopMedia>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: i64,
    pub shop_id: i64,
    pub user: Reviewer,
    pub parent_review_id: Option<i64>,
    pub rating: Option<i64>,
    pub content: Option<String>,
    pub reply_count: i64,
    pub media: Vec<ReviewMedia>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Review {
    pub fn is_top_level(&self) -> bool {
        self.parent_review_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewMedia {
    pub id: i64,
    pub review_id: i64,
    pub kind: MediaKind,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopMedia {
    pub id: i64,
    pub shop_id: i64,
    pub kind: MediaKind,
    pub url: String,
    pub display_order: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }

    /// Classify a MIME content type, if it is one we can hold at all.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let ct = content_type.trim().to_ascii_lowercase();
        if ct.starts_with("image/") {
            Some(MediaKind::Image)
        } else if ct.starts_with("video/") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// What a media row belongs to. Ownership is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentType {
    Review,
    Shop,
}

impl ParentType {
    /// Storage namespace prefix; files land under `{prefix}/{parent_id}`.
    pub fn namespace(&self, parent_id: i64) -> String {
        match self {
            ParentType::Review => format!("reviews/{}", parent_id),
            ParentType::Shop => format!("shops/{}", parent_id),
        }
    }

    pub fn entity(&self) -> &'static str {
        match self {
            ParentType::Review => "review",
            ParentType::Shop => "shop",
        }
    }

    pub(crate) fn media_table(&self) -> &'static str {
        match self {
            ParentType::Review => "review_media",
            ParentType::Shop => "shop_media",
        }
    }

    pub(crate) fn media_fk(&self) -> &'static str {
        match self {
            ParentType::Review => "review_id",
            ParentType::Shop => "shop_id",
        }
    }
}

/// An uploaded file as handed over by the request boundary.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: Some(content_type.into()),
            data,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// File extension (with the leading dot) kept on the stored name.
    pub fn extension(&self) -> Option<&str> {
        let dot = self.file_name.rfind('.')?;
        if dot == 0 {
            return None;
        }
        let ext = &self.file_name[dot..];
        if ext.len() > 1 && ext[1..].chars().all(|c| c.is_ascii_alphanumeric()) {
            Some(ext)
        } else {
            None
        }
    }
}

/// A media row created by an attach call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedMedia {
    pub id: i64,
    pub kind: MediaKind,
    pub url: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Empty,
    UnsupportedType,
    TooLarge,
    QuotaExhausted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    pub file_name: String,
    pub reason: SkipReason,
}

/// Result of a lenient batch upload: every input file ends up in exactly
/// one of the two lists.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachOutcome {
    pub accepted: Vec<AcceptedMedia>,
    pub skipped: Vec<SkippedFile>,
}

/// Result of a cascading media removal. File deletion is best-effort,
/// so `files_failed` may be non-zero on an otherwise successful call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaCleanup {
    pub rows_deleted: u64,
    pub files_deleted: u64,
    pub files_missing: u64,
    pub files_failed: u64,
}

impl MediaCleanup {
    pub fn absorb(&mut self, other: MediaCleanup) {
        self.rows_deleted += other.rows_deleted;
        self.files_deleted += other.files_deleted;
        self.files_missing += other.files_missing;
        self.files_failed += other.files_failed;
    }

    /// Number of file deletions that were attempted.
    pub fn files_attempted(&self) -> u64 {
        self.files_deleted + self.files_missing + self.files_failed
    }
}

/// What a review deletion removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSummary {
    pub reviews_deleted: u64,
    pub media: MediaCleanup,
}

/// A review returned together with what happened to its uploads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewWithUploads {
    pub review: Review,
    pub uploads: AttachOutcome,
}

#[derive(Debug, Clone)]
pub struct NewReview {
    pub shop_id: i64,
    pub rating: Option<i64>,
    pub content: Option<String>,
    pub parent_review_id: Option<i64>,
    pub files: Vec<UploadFile>,
}

impl NewReview {
    pub fn top_level(shop_id: i64, rating: i64, content: impl Into<String>) -> Self {
        Self {
            shop_id,
            rating: Some(rating),
            content: Some(content.into()),
            parent_review_id: None,
            files: Vec::new(),
        }
    }

    pub fn reply(shop_id: i64, parent_review_id: i64, content: impl Into<String>) -> Self {
        Self {
            shop_id,
            rating: None,
            content: Some(content.into()),
            parent_review_id: Some(parent_review_id),
            files: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<UploadFile>) -> Self {
        self.files = files;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReviewEdit {
    pub content: Option<String>,
    pub rating: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    Rating,
}

impl SortField {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "createdAt" | "created_at" => Some(SortField::CreatedAt),
            "rating" => Some(SortField::Rating),
            _ => None,
        }
    }

    pub(crate) fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "r.created_at",
            SortField::Rating => "r.rating",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Some(SortDir::Asc),
            "desc" => Some(SortDir::Desc),
            _ => None,
        }
    }

    pub(crate) fn sql(&self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    /// Zero-based page index.
    pub page: i64,
    pub size: i64,
    pub sort_field: SortField,
    pub sort_dir: SortDir,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: 5,
            sort_field: SortField::CreatedAt,
            sort_dir: SortDir::Desc,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page_no: i64,
    pub page_size: i64,
    pub total_elements: i64,
    pub total_pages: i64,
    pub last: bool,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, page_no: i64, page_size: i64, total_elements: i64) -> Self {
        let total_pages = if page_size > 0 && total_elements > 0 {
            total_elements / page_size + i64::from(total_elements % page_size != 0)
        } else {
            0
        };
        Self {
            content,
            page_no,
            page_size,
            total_elements,
            total_pages,
            last: page_no >= total_pages.saturating_sub(1),
        }
    }
}

/// Largest page a listing will return.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Row offset of a zero-based page. `BadRequest` for a negative page, a
/// size outside `1..=MAX_PAGE_SIZE`, or an offset past `i64`.
pub(crate) fn page_offset(page: i64, size: i64) -> Result<i64> {
    if page < 0 {
        return Err(ReviewError::bad_request("page must be >= 0"));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&size) {
        return Err(ReviewError::bad_request(format!(
            "size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    page.checked_mul(size)
        .ok_or_else(|| ReviewError::bad_request(format!("page {} is out of range", page)))
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
