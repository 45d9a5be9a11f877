use std::fs::{self, File};
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::types::ScanResult;

/// Render the found lines as one text block, one subdomain per line.
pub fn found_text(results: &ScanResult) -> String {
    let mut out = results.found_lines().join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Write the found lines verbatim to `path`. Refuses to write an empty export.
pub fn write_found_lines(path: &Path, results: &ScanResult) -> Result<()> {
    if results.found.is_empty() {
        bail!("no results to export");
    }
    fs::write(path, found_text(results))
        .with_context(|| format!("failed to write results to {}", path.display()))
}

/// Write the whole result (entries and counters) as pretty JSON.
pub fn write_results_json(path: &Path, results: &ScanResult) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, results)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FoundEntry, ScanProgress};
    use std::net::{IpAddr, Ipv4Addr};

    fn sample() -> ScanResult {
        ScanResult {
            found: vec![
                FoundEntry {
                    candidate: "www.example.com".into(),
                    address: IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
                    timestamp: "2024-01-01T00:00:00Z".into(),
                },
                FoundEntry {
                    candidate: "mail.example.com".into(),
                    address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
                    timestamp: "2024-01-01T00:00:01Z".into(),
                },
            ],
            progress: ScanProgress {
                total: 5,
                completed: 5,
                found: 2,
            },
        }
    }

    #[test]
    fn text_export_is_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("found.txt");
        write_found_lines(&path, &sample()).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "www.example.com (93.184.216.34)\nmail.example.com (10.0.0.2)\n"
        );
    }

    #[test]
    fn empty_export_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("found.txt");
        assert!(write_found_lines(&path, &ScanResult::default()).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn json_export_keeps_counters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("found.json");
        write_results_json(&path, &sample()).unwrap();
        let back: ScanResult =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.progress.found, 2);
        assert_eq!(back.found[1].candidate, "mail.example.com");
    }
}
