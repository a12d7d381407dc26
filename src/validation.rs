//! Input validation for every client-supplied value
//!
//! All bounds are enforced here, before anything reaches the embedder or the
//! store. Lengths are counted in characters, not bytes.

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;

pub const MIN_CONTENT_LENGTH: usize = 1;
pub const MAX_CONTENT_LENGTH: usize = 10_000;
pub const MAX_PROJECT_LENGTH: usize = 100;
pub const MAX_METADATA_SIZE: usize = 10_000; // serialized JSON bytes
pub const MAX_EMAIL_LENGTH: usize = 255;

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 100;
pub const MAX_LIST_OFFSET: usize = 1000;

pub const MAX_QUERY_LENGTH: usize = 500;
pub const DEFAULT_SEARCH_LIMIT: usize = 10;
pub const MAX_SEARCH_LIMIT: usize = 50;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex");
}

/// Validate memory content (1-10,000 characters)
pub fn validate_content(content: &str) -> Result<()> {
    let len = content.chars().count();
    if len < MIN_CONTENT_LENGTH {
        return Err(anyhow!("Content cannot be empty"));
    }
    if len > MAX_CONTENT_LENGTH {
        return Err(anyhow!(
            "Content must be less than {MAX_CONTENT_LENGTH} characters (got {len})"
        ));
    }
    Ok(())
}

/// Validate and normalize a project label. Returns the trimmed label.
pub fn validate_project(project: &str) -> Result<String> {
    let trimmed = project.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("project cannot be empty"));
    }
    let len = trimmed.chars().count();
    if len > MAX_PROJECT_LENGTH {
        return Err(anyhow!(
            "project too long: {len} chars (max: {MAX_PROJECT_LENGTH})"
        ));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(anyhow!("project contains control characters"));
    }
    Ok(trimmed.to_string())
}

/// Metadata must be a JSON object of bounded serialized size
pub fn validate_metadata(metadata: &serde_json::Value) -> Result<()> {
    if !metadata.is_object() {
        return Err(anyhow!("metadata must be a JSON object"));
    }
    let size = serde_json::to_vec(metadata)
        .map_err(|e| anyhow!("metadata is not serializable: {e}"))?
        .len();
    if size > MAX_METADATA_SIZE {
        return Err(anyhow!(
            "metadata too large: {size} bytes (max: {MAX_METADATA_SIZE})"
        ));
    }
    Ok(())
}

/// Validate an email address. Returns the trimmed, lowercased form.
pub fn validate_email(email: &str) -> Result<String> {
    let normalized = email.trim().to_lowercase();
    if normalized.len() > MAX_EMAIL_LENGTH {
        return Err(anyhow!("email too long (max: {MAX_EMAIL_LENGTH})"));
    }
    if !EMAIL_RE.is_match(&normalized) {
        return Err(anyhow!("Invalid email"));
    }
    Ok(normalized)
}

/// Parse a pagination value coming from a query string
fn parse_count(raw: Option<&str>, default: usize) -> Result<usize> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(s) => s
            .parse::<usize>()
            .map_err(|_| anyhow!("expected a non-negative integer, got '{s}'")),
    }
}

/// List page size: 1-100, default 50
pub fn validate_list_limit(raw: Option<&str>) -> Result<usize> {
    let limit = parse_count(raw, DEFAULT_LIST_LIMIT)?;
    if limit == 0 {
        return Err(anyhow!("limit must be at least 1"));
    }
    if limit > MAX_LIST_LIMIT {
        return Err(anyhow!("limit must be at most {MAX_LIST_LIMIT}"));
    }
    Ok(limit)
}

/// List offset: 0-1000, default 0
pub fn validate_list_offset(raw: Option<&str>) -> Result<usize> {
    let offset = parse_count(raw, 0)?;
    if offset > MAX_LIST_OFFSET {
        return Err(anyhow!(
            "Maximum offset is {MAX_LIST_OFFSET} to prevent excessive pagination"
        ));
    }
    Ok(offset)
}

/// Search query: 1-500 characters
pub fn validate_search_query(query: &str) -> Result<()> {
    let len = query.chars().count();
    if len == 0 {
        return Err(anyhow!("query cannot be empty"));
    }
    if len > MAX_QUERY_LENGTH {
        return Err(anyhow!(
            "query too long: {len} chars (max: {MAX_QUERY_LENGTH})"
        ));
    }
    Ok(())
}

/// Search result count: 1-50, default 10
pub fn validate_search_limit(limit: Option<usize>) -> Result<usize> {
    let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    if limit == 0 {
        return Err(anyhow!("limit must be at least 1"));
    }
    if limit > MAX_SEARCH_LIMIT {
        return Err(anyhow!("limit must be at most {MAX_SEARCH_LIMIT}"));
    }
    Ok(limit)
}

/// Validate memory_id (UUID format)
pub fn validate_memory_id(memory_id: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(memory_id).map_err(|e| anyhow!("Invalid memory id: {e}"))
}
