//! Utility functions for string handling, LLM response cleanup and file system checks.
//!
//! This module provides helper functions used throughout the application:
//! - String truncation and slugification for logging and file names
//! - JSON extraction and error classification for backend responses
//! - File system validation for output directories

use std::error::Error;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};

/// Truncate a string for logging purposes.
///
/// Long strings are cut to at most `max` bytes (backing off to a character
/// boundary) with an ellipsis and byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
///
/// When the LLM response is cut off (e.g., due to token limits), the
/// resulting JSON will fail to parse with an EOF error.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Cut the outermost JSON object out of a model response.
///
/// Models like to wrap JSON in prose or Markdown code fences. Everything
/// between the first `{` and the last `}` is returned; `None` when there is
/// no such span.
pub fn extract_json_object(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&response[start..=end])
}

/// Convert a title to a file-name friendly slug.
///
/// Lowercases the text, drops anything that is not alphanumeric, a space or
/// a hyphen, replaces spaces with hyphens and caps the result at `max_len`
/// characters.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify_title("Hello World", 50), "hello-world");
/// assert_eq!(slugify_title("Test-Article!", 50), "test-article");
/// ```
pub fn slugify_title(title: &str, max_len: usize) -> String {
    let slug: String = title
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ' && c != '-', "")
        .trim()
        .replace(' ', "-")
        .chars()
        .take(max_len)
        .collect();
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() { "untitled".to_string() } else { slug }
}

/// Ensure a directory exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a scratch file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let scratch_path = format!("{}/..__write_check__", path.trim_end_matches('/'));
    match stdfs::File::create(&scratch_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&scratch_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}
