//! Identifier list handling.
//!
//! Helpers for turning raw shard files into the normalized identifiers the
//! engine works on.

use crate::error::SweepError;
use std::path::{Path, PathBuf};

/// Normalize one raw input line.
///
/// Surrounding whitespace is removed, blank lines and `#` comments yield
/// `None`, and a bare host gets an `https://` scheme.
///
/// # Examples
///
/// ```rust
/// use domain_sweep_lib::normalize_identifier;
///
/// assert_eq!(normalize_identifier(" example.com "), Some("https://example.com".to_string()));
/// assert_eq!(normalize_identifier("http://a.example"), Some("http://a.example".to_string()));
/// assert_eq!(normalize_identifier("# note"), None);
/// ```
pub fn normalize_identifier(line: &str) -> Option<String> {
    let trimmed = line.trim();

    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Some(trimmed.to_string())
    } else {
        Some(format!("https://{}", trimmed))
    }
}

/// Normalize every line of an identifier list, keeping order and duplicates.
pub fn parse_identifier_list(content: &str) -> Vec<String> {
    content.lines().filter_map(normalize_identifier).collect()
}

/// File name of a numbered shard, e.g. `7` → `part_0007.txt`.
pub fn shard_file_name(shard: &str) -> Result<String, SweepError> {
    let shard = shard.trim();
    if shard.is_empty() || !shard.chars().all(|c| c.is_ascii_digit()) {
        return Err(SweepError::config(format!(
            "Invalid shard '{}': expected a number",
            shard
        )));
    }
    Ok(format!("part_{:0>4}.txt", shard))
}

/// Path of a numbered shard inside `dir`.
pub fn shard_path(dir: &Path, shard: &str) -> Result<PathBuf, SweepError> {
    Ok(dir.join(shard_file_name(shard)?))
}

/// Read and normalize an identifier file.
pub async fn read_identifier_file(path: &Path) -> Result<Vec<String>, SweepError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        SweepError::file_error(
            path.to_string_lossy(),
            format!("Failed to read identifier file: {}", e),
        )
    })?;
    Ok(parse_identifier_list(&content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(
            normalize_identifier("example.com"),
            Some("https://example.com".to_string())
        );
        assert_eq!(
            normalize_identifier("  https://a.example/path  "),
            Some("https://a.example/path".to_string())
        );
        assert_eq!(
            normalize_identifier("HTTP://Upper.example"),
            Some("HTTP://Upper.example".to_string())
        );
        assert_eq!(normalize_identifier(""), None);
        assert_eq!(normalize_identifier("   \t"), None);
        assert_eq!(normalize_identifier("# comment"), None);
    }

    #[test]
    fn test_parse_identifier_list_keeps_order_and_duplicates() {
        let content = "b.example\n\n# skip\r\na.example\nb.example\n";
        assert_eq!(
            parse_identifier_list(content),
            vec![
                "https://b.example",
                "https://a.example",
                "https://b.example"
            ]
        );
    }

    #[test]
    fn test_shard_file_name() {
        assert_eq!(shard_file_name("7").unwrap(), "part_0007.txt");
        assert_eq!(shard_file_name("42").unwrap(), "part_0042.txt");
        assert_eq!(shard_file_name("12345").unwrap(), "part_12345.txt");
        assert!(shard_file_name("").is_err());
        assert!(shard_file_name("x1").is_err());
        assert!(shard_file_name("../1").is_err());
    }

    #[tokio::test]
    async fn test_read_identifier_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "one.example").unwrap();
        writeln!(file, "  ").unwrap();
        writeln!(file, "http://two.example").unwrap();
        file.flush().unwrap();

        let ids = read_identifier_file(file.path()).await.unwrap();
        assert_eq!(ids, vec!["https://one.example", "http://two.example"]);
    }

    #[tokio::test]
    async fn test_read_missing_file_is_file_error() {
        let err = read_identifier_file(Path::new("/no/such/part_0001.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::FileError { .. }));
        assert!(err.is_fatal());
    }
}
