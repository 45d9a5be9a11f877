use std::fs;
use std::path::Path;

use crate::error::ScanError;

/// Split wordlist content into candidate labels.
///
/// - one label per line, surrounding whitespace trimmed
/// - blank lines are skipped
/// - order and duplicates are preserved
pub fn parse_wordlist_str(s: &str) -> Vec<String> {
    clean_labels(s.lines())
}

/// Trim each label and drop the empty ones.
pub fn clean_labels<'a>(labels: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    labels
        .into_iter()
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Load a wordlist from a file path. Missing files and non-UTF-8 content are input errors.
pub fn load_wordlist_from_path(path: impl AsRef<Path>) -> Result<Vec<String>, ScanError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ScanError::Input {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_wordlist_str(&content))
}
