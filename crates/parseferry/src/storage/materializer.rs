//! Unpacks downloaded result packages into the batch output tree.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Outcome of materializing one result package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedResult {
    /// Directory the archive was extracted into.
    pub target_dir: PathBuf,
    /// Copied markdown summary, when the package contained a `full.md`.
    pub summary_path: Option<PathBuf>,
}

/// Writes result packages under a batch's output directory.
///
/// Each file's package lands in `<batch_root>/<file-stem>/`, with the
/// markdown summary mirrored next to it as `<batch_root>/<file-stem>.md`.
pub struct ResultMaterializer {
    batch_root: PathBuf,
}

impl ResultMaterializer {
    pub fn new(batch_root: impl Into<PathBuf>) -> Self {
        Self {
            batch_root: batch_root.into(),
        }
    }

    /// Extracts `package` for the file named `display_name`, replacing any
    /// previous extraction wholesale.
    ///
    /// A package without a `full.md` is still a success; the caller decides
    /// whether to warn.
    pub fn materialize(
        &self,
        display_name: &str,
        package: &[u8],
    ) -> Result<MaterializedResult, StorageError> {
        let stem = Path::new(display_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| display_name.to_string());
        let target_dir = self.batch_root.join(&stem);

        if target_dir.exists() {
            std::fs::remove_dir_all(&target_dir).map_err(|source| {
                StorageError::RemoveDirectory {
                    path: target_dir.clone(),
                    source,
                }
            })?;
        }
        std::fs::create_dir_all(&target_dir).map_err(|source| StorageError::CreateDirectory {
            path: target_dir.clone(),
            source,
        })?;

        let mut archive = zip::ZipArchive::new(Cursor::new(package))
            .map_err(|err| StorageError::Archive(format!("Failed to open result archive: {}", err)))?;
        archive.extract(&target_dir).map_err(|err| {
            StorageError::Archive(format!("Failed to extract result archive: {}", err))
        })?;

        // First member named full.md wins, in archive order.
        let mut summary_source: Option<PathBuf> = None;
        for index in 0..archive.len() {
            let member = archive.by_index(index).map_err(|err| {
                StorageError::Archive(format!("Failed to read archive member: {}", err))
            })?;
            let member_path = Path::new(member.name());
            if member_path.file_name().is_some_and(|name| name == "full.md") {
                summary_source = Some(target_dir.join(member_path));
                break;
            }
        }

        let summary_path = match summary_source {
            Some(found) if found.exists() => {
                let destination = self.batch_root.join(format!("{}.md", stem));
                std::fs::copy(&found, &destination).map_err(|err| StorageError::CopySummary {
                    from: found.clone(),
                    to: destination.clone(),
                    source: err,
                })?;
                Some(destination)
            }
            _ => None,
        };

        Ok(MaterializedResult {
            target_dir,
            summary_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn build_package(members: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, contents) in members {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_materialize_extracts_and_copies_summary() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = ResultMaterializer::new(dir.path());
        let package = build_package(&[("layout.json", "{}"), ("full.md", "# Report")]);

        let result = materializer.materialize("report.pdf", &package).unwrap();

        assert_eq!(result.target_dir, dir.path().join("report"));
        assert!(result.target_dir.join("layout.json").exists());
        let summary = result.summary_path.unwrap();
        assert_eq!(summary, dir.path().join("report.md"));
        assert_eq!(std::fs::read_to_string(summary).unwrap(), "# Report");
    }

    #[test]
    fn test_materialize_finds_nested_summary() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = ResultMaterializer::new(dir.path());
        let package = build_package(&[("pages/ocr.txt", "text"), ("pages/full.md", "# Nested")]);

        let result = materializer.materialize("scan.pdf", &package).unwrap();

        assert_eq!(
            std::fs::read_to_string(result.summary_path.unwrap()).unwrap(),
            "# Nested"
        );
    }

    #[test]
    fn test_materialize_without_summary_is_still_success() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = ResultMaterializer::new(dir.path());
        let package = build_package(&[("layout.json", "{}")]);

        let result = materializer.materialize("report.pdf", &package).unwrap();

        assert!(result.summary_path.is_none());
        assert!(result.target_dir.join("layout.json").exists());
        assert!(!dir.path().join("report.md").exists());
    }

    #[test]
    fn test_materialize_replaces_previous_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = ResultMaterializer::new(dir.path());

        let stale_dir = dir.path().join("report");
        std::fs::create_dir_all(&stale_dir).unwrap();
        std::fs::write(stale_dir.join("stale.txt"), "old run").unwrap();

        let package = build_package(&[("full.md", "# Fresh")]);
        let result = materializer.materialize("report.pdf", &package).unwrap();

        assert!(!result.target_dir.join("stale.txt").exists());
        assert!(result.target_dir.join("full.md").exists());
    }

    #[test]
    fn test_materialize_rejects_garbage_archive() {
        let dir = tempfile::tempdir().unwrap();
        let materializer = ResultMaterializer::new(dir.path());

        let result = materializer.materialize("report.pdf", b"not a zip");
        assert!(matches!(result, Err(StorageError::Archive(_))));
    }
}
