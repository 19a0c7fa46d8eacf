//! Helpers for sanitizing data before it enters logs and span attributes.
//!
//! Tax documents carry personal data, so file paths, owner identifiers and
//! model replies are reduced before being recorded.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Final component of a client-supplied file name, accepting both `/` and
/// `\` separators.
pub fn redact_file_name(name: &str) -> String {
    match name.rsplit(['/', '\\']).next() {
        Some(last) if !last.is_empty() => last.to_string(),
        _ => "<unknown>".to_string(),
    }
}

/// Short deterministic hash for correlating an identifier across log lines
/// without recording it.
pub fn hash_id(id: &str) -> String {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Cuts `text` to at most `max_chars` characters, noting how much was dropped.
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{}... ({} more chars)", kept, total - max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_path_returns_filename() {
        assert_eq!(
            redact_path(Path::new("/home/user/taxes/2024/w2.pdf")),
            "w2.pdf"
        );
        assert_eq!(redact_path(Path::new("/")), "<unknown>");
    }

    #[test]
    fn test_redact_file_name() {
        assert_eq!(redact_file_name("C:\\Users\\jo\\w2.pdf"), "w2.pdf");
        assert_eq!(redact_file_name("scans/1099.png"), "1099.png");
        assert_eq!(redact_file_name("plain.txt"), "plain.txt");
        assert_eq!(redact_file_name("dir/"), "<unknown>");
    }

    #[test]
    fn test_hash_id_deterministic() {
        assert_eq!(hash_id("user-1"), hash_id("user-1"));
        assert_ne!(hash_id("user-1"), hash_id("user-2"));
        assert_eq!(hash_id("user-1").len(), 16);
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(truncate_for_log("abcdef", 3), "abc... (3 more chars)");
        // multi-byte characters are never split
        assert_eq!(truncate_for_log("ééé", 1), "é... (2 more chars)");
    }
}
