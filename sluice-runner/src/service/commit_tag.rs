//! Commit tag substitution
//!
//! Replaces a marker string with the deployed commit hash in every text
//! file of the deploy directory. `.git` directories are never touched and
//! files that are not valid UTF-8 are left alone.

use std::io;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Replaces `marker` with `commit_hash` in all UTF-8 files under `root`
///
/// # Returns
/// Number of files that were rewritten
pub fn substitute_commit_tag(root: &Path, marker: &str, commit_hash: &str) -> io::Result<usize> {
    if marker.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "commit tag marker is empty",
        ));
    }

    let mut updated = 0;
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(text) = String::from_utf8(std::fs::read(entry.path())?) else {
            continue;
        };
        if !text.contains(marker) {
            continue;
        }

        std::fs::write(entry.path(), text.replace(marker, commit_hash))?;
        debug!("Tagged {}", entry.path().display());
        updated += 1;
    }

    Ok(updated)
}
