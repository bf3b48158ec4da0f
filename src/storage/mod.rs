//! Per-offer claim persistence
//!
//! Each offer owns two files next to each other: an append-only text
//! log (`<Offer>_claimed_keys.txt`) that doubles as the dedup source,
//! and an on-demand CSV export (`<Offer>_all_keys.csv`).

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

static EMAIL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Email: (.+?) \|").expect("email line pattern")
});

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One successful claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimResult {
    pub email: String,
    pub key: String,
    pub offer: String,
}

/// File-backed claim store for a single offer.
#[derive(Debug, Clone)]
pub struct ClaimStore {
    dir: PathBuf,
    file_stem: String,
}

impl ClaimStore {
    pub fn new(dir: PathBuf, file_stem: &str) -> Self {
        Self {
            dir,
            file_stem: file_stem.to_string(),
        }
    }

    /// Path of the append-only claim log.
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(format!("{}_claimed_keys.txt", self.file_stem))
    }

    fn default_export_path(&self) -> PathBuf {
        self.dir.join(format!("{}_all_keys.csv", self.file_stem))
    }

    /// Read every email that already claimed a key for this offer.
    /// A missing log means no prior claims; malformed lines are skipped.
    pub fn load_claimed_emails(&self) -> HashSet<String> {
        let content = match fs::read_to_string(self.log_path()) {
            Ok(content) => content,
            Err(e) => {
                debug!("No existing claim log: {}", e);
                return HashSet::new();
            }
        };

        content
            .lines()
            .filter_map(|line| EMAIL_LINE.captures(line))
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .collect()
    }

    /// Append one claim to the log, creating the file and its parent
    /// directory on first use.
    pub fn append(&self, result: &ClaimResult) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        writeln!(
            file,
            "Email: {} | Key: {} | Offer: {}",
            result.email, result.key, result.offer
        )?;
        Ok(())
    }

    /// Write the given claims as CSV. Returns the written path, or
    /// `Ok(None)` without touching the filesystem when there is nothing
    /// to export.
    pub fn export(
        &self,
        results: &[ClaimResult],
        filename: Option<PathBuf>,
    ) -> Result<Option<PathBuf>, StorageError> {
        if results.is_empty() {
            return Ok(None);
        }

        let path = filename.unwrap_or_else(|| self.default_export_path());
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut out = String::from("Email,Key,Offer\n");
        for result in results {
            out.push_str(&format!(
                "{},{},{}\n",
                csv_field(&result.email),
                csv_field(&result.key),
                csv_field(&result.offer)
            ));
        }
        fs::write(&path, out)?;
        Ok(Some(path))
    }
}

/// Quote a CSV field when it contains a delimiter, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn result(email: &str, key: &str) -> ClaimResult {
        ClaimResult {
            email: email.to_string(),
            key: key.to_string(),
            offer: "Test Offer".to_string(),
        }
    }

    #[test]
    fn test_load_from_missing_log_is_empty() {
        let dir = tempdir().unwrap();
        let store = ClaimStore::new(dir.path().to_path_buf(), "Test Offer");
        assert!(store.load_claimed_emails().is_empty());
    }

    #[test]
    fn test_append_then_reload() {
        let dir = tempdir().unwrap();
        let store = ClaimStore::new(dir.path().to_path_buf(), "Test Offer");

        store.append(&result("a@b.c", "KEY-1")).unwrap();
        store.append(&result("d@e.f", "KEY-2")).unwrap();

        let emails = store.load_claimed_emails();
        assert_eq!(emails.len(), 2);
        assert!(emails.contains("a@b.c"));
        assert!(emails.contains("d@e.f"));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let store = ClaimStore::new(dir.path().to_path_buf(), "Test Offer");
        fs::write(
            store.log_path(),
            "Email: ok@b.c | Key: K | Offer: O\ngarbage line\nEmail without pipe\n",
        )
        .unwrap();

        let emails = store.load_claimed_emails();
        assert_eq!(emails.len(), 1);
        assert!(emails.contains("ok@b.c"));
    }

    #[test]
    fn test_loaded_emails_are_trimmed() {
        let dir = tempdir().unwrap();
        let store = ClaimStore::new(dir.path().to_path_buf(), "Test Offer");
        // Hand-edited logs sometimes carry stray whitespace around the email
        fs::write(
            store.log_path(),
            "Email:  padded@b.c | Key: K | Offer: O\nEmail: trailing@b.c  | Key: K | Offer: O\n",
        )
        .unwrap();

        let emails = store.load_claimed_emails();
        assert!(emails.contains("padded@b.c"));
        assert!(emails.contains("trailing@b.c"));
        assert_eq!(emails.len(), 2);
    }

    #[test]
    fn test_export_empty_writes_nothing() {
        let dir = tempdir().unwrap();
        let store = ClaimStore::new(dir.path().to_path_buf(), "Test Offer");
        assert!(store.export(&[], None).unwrap().is_none());
        assert!(!dir.path().join("Test Offer_all_keys.csv").exists());
    }

    #[test]
    fn test_export_header_and_rows() {
        let dir = tempdir().unwrap();
        let store = ClaimStore::new(dir.path().to_path_buf(), "Test Offer");
        let claims = vec![result("a@b.c", "KEY-1"), result("d@e.f", "KEY-2")];

        let path = store.export(&claims, None).unwrap().unwrap();
        let content = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "Email,Key,Offer");
        assert_eq!(lines[1], "a@b.c,KEY-1,Test Offer");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_export_quotes_fields_with_commas() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_export_custom_filename() {
        let dir = tempdir().unwrap();
        let store = ClaimStore::new(dir.path().to_path_buf(), "Test Offer");
        let custom = dir.path().join("sub").join("keys.csv");

        let path = store
            .export(&[result("a@b.c", "K")], Some(custom.clone()))
            .unwrap()
            .unwrap();
        assert_eq!(path, custom);
        assert!(custom.exists());
    }
}
