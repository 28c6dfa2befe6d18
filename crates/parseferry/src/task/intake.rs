//! File intake for building upload queues from user-picked paths.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, info};
use walkdir::WalkDir;

/// Collects the PDF files referenced by a mixed list of file and directory
/// paths.
///
/// Directories are walked recursively. Paths are canonicalized so the same
/// file selected twice (or reached through a symlink) is queued only once;
/// first-seen order is preserved. Anything that does not exist or is not a
/// PDF is skipped.
pub fn collect_pdf_inputs<I, P>(paths: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut seen = HashSet::new();
    let mut accepted = Vec::new();

    for path in paths {
        let path = path.as_ref();
        if path.is_dir() {
            for entry in WalkDir::new(path)
                .min_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_dir() {
                    continue;
                }
                push_if_pdf(entry.path(), &mut seen, &mut accepted);
            }
        } else {
            push_if_pdf(path, &mut seen, &mut accepted);
        }
    }

    info!("Collected {} PDF files", accepted.len());
    accepted
}

fn push_if_pdf(path: &Path, seen: &mut HashSet<PathBuf>, accepted: &mut Vec<PathBuf>) {
    if !path.exists() {
        return;
    }
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    if !is_pdf {
        return;
    }

    let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if seen.insert(resolved.clone()) {
        debug!("Queued document: {}", resolved.display());
        accepted.push(resolved);
    }
}
