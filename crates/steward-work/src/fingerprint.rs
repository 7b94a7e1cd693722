//! Content hash used to collapse repeated issues into one work item.

use sha2::{Digest, Sha256};

use steward_core::{Category, Severity};

const DELIMITER: &str = "|";

/// `SHA-256(CATEGORY|SEVERITY|title|locator)` as lowercase hex.
///
/// Category and severity are uppercased, the title is trimmed and a missing
/// locator hashes as the empty string.
pub fn fingerprint(category: Category, severity: Severity, title: &str, locator: Option<&str>) -> String {
    let material = [
        category.as_str().to_uppercase().as_str(),
        severity.as_str(),
        title.trim(),
        locator.unwrap_or(""),
    ]
    .join(DELIMITER);

    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    format!("{:x}", hasher.finalize())
}
