//! Submission discovery
//!
//! Normalizes the two input shapes into a list of [`Submission`] records:
//!
//! - **batch**: a zip of per-student directories (as downloaded from the
//!   course page), each holding one inner tar archive;
//! - **single**: a path to one submission archive.
//!
//! In both cases the identifier is the roll number found in the archive's
//! file name, lowercased.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use tempfile::TempDir;
use walkdir::WalkDir;

use autograder_common::{StageError, Submission};

use crate::config::IdentifierConfig;

/// Why a batch entry was not turned into a submission
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    /// Student directory holds no file
    Empty,
    /// Archive name carries no identifier
    InvalidIdentifier(String),
    /// Identifier already taken by an earlier directory
    DuplicateIdentifier(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Empty => write!(f, "no submission file"),
            RejectReason::InvalidIdentifier(name) => {
                write!(f, "no identifier in archive name '{}'", name)
            }
            RejectReason::DuplicateIdentifier(id) => write!(f, "duplicate identifier '{}'", id),
        }
    }
}

/// Batch entry skipped during discovery
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RejectedEntry {
    /// Directory name inside the outer archive
    pub entry: String,
    #[serde(flatten)]
    pub reason: RejectReason,
}

/// Submissions discovered from one input
#[derive(Debug)]
pub struct SubmissionBatch {
    pub submissions: Vec<Submission>,
    pub rejected: Vec<RejectedEntry>,
    // Keeps the extracted outer archive alive while submissions are evaluated
    _scratch: Option<TempDir>,
}

impl SubmissionBatch {
    pub fn len(&self) -> usize {
        self.submissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty()
    }
}

/// Resolves batch or single inputs into submissions
#[derive(Debug, Clone)]
pub struct SubmissionSource {
    pattern: Regex,
}

impl SubmissionSource {
    pub fn new(config: &IdentifierConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(&config.pattern)?,
        })
    }

    /// Extract the lowercased identifier from an archive file name
    pub fn identifier_of(&self, file_name: &str) -> Option<String> {
        let captures = self.pattern.captures(file_name)?;
        let matched = captures.get(1).or_else(|| captures.get(0))?;
        Some(matched.as_str().to_lowercase())
    }

    /// Resolve a single submission archive
    pub fn single(&self, archive: &Path) -> Result<Submission, StageError> {
        if !archive.is_file() {
            return Err(StageError::InvalidIdentifier(format!(
                "{} does not exist",
                archive.display()
            )));
        }

        let file_name = file_name_of(archive);
        let identifier = self.identifier_of(&file_name).ok_or_else(|| {
            StageError::InvalidIdentifier(format!("'{}' does not contain a roll number", file_name))
        })?;

        Ok(Submission::new(identifier, archive))
    }

    /// Extract an outer zip and discover one submission per student directory
    pub async fn batch(&self, outer_archive: &Path) -> Result<SubmissionBatch> {
        let scratch = tempfile::Builder::new()
            .prefix("autograder-batch-")
            .tempdir()
            .context("Failed to create scratch directory")?;

        tracing::info!(
            archive = %outer_archive.display(),
            scratch = %scratch.path().display(),
            "Extracting submissions archive"
        );
        extract_zip(outer_archive, scratch.path()).await?;

        let mut batch = self.scan(scratch.path())?;
        batch._scratch = Some(scratch);
        Ok(batch)
    }

    /// Discover submissions in an already-extracted batch directory.
    ///
    /// Each immediate subdirectory contributes the first regular file it
    /// holds, in name order. Entries without a valid, unique identifier are
    /// recorded as rejected rather than failing the batch.
    pub fn scan(&self, root: &Path) -> Result<SubmissionBatch> {
        let mut submissions = Vec::new();
        let mut rejected = Vec::new();
        let mut seen = HashSet::new();

        for entry in WalkDir::new(root).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to list {}", root.display()))?;
            let entry_name = entry.file_name().to_string_lossy().into_owned();

            if !entry.file_type().is_dir() {
                tracing::debug!(entry = %entry_name, "Ignoring non-directory batch entry");
                continue;
            }

            let reject = |reason: RejectReason| {
                tracing::warn!(entry = %entry_name, %reason, "Skipping batch entry");
                RejectedEntry {
                    entry: entry_name.clone(),
                    reason,
                }
            };

            let Some(archive) = first_file(entry.path())? else {
                rejected.push(reject(RejectReason::Empty));
                continue;
            };

            let file_name = file_name_of(&archive);
            let Some(identifier) = self.identifier_of(&file_name) else {
                rejected.push(reject(RejectReason::InvalidIdentifier(file_name)));
                continue;
            };

            if !seen.insert(identifier.clone()) {
                rejected.push(reject(RejectReason::DuplicateIdentifier(identifier)));
                continue;
            }

            let student_name = entry_name
                .split('_')
                .next()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);

            tracing::debug!(
                submission = %identifier,
                archive = %archive.display(),
                "Discovered submission"
            );
            submissions.push(Submission::new(identifier, archive).with_student_name(student_name));
        }

        tracing::info!(
            submissions = submissions.len(),
            rejected = rejected.len(),
            "Submission discovery complete"
        );

        Ok(SubmissionBatch {
            submissions,
            rejected,
            _scratch: None,
        })
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// First regular file directly inside `dir`, in name order
fn first_file(dir: &Path) -> Result<Option<PathBuf>> {
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        if entry.file_type().is_file() {
            return Ok(Some(entry.into_path()));
        }
    }
    Ok(None)
}

/// Extract a ZIP file to a directory, refusing entries outside it.
async fn extract_zip(zip_path: &Path, dest_dir: &Path) -> Result<()> {
    let zip_path = zip_path.to_path_buf();
    let dest_dir = dest_dir.to_path_buf();

    // Run extraction in blocking task
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&zip_path)
            .with_context(|| format!("Failed to open ZIP: {}", zip_path.display()))?;
        let mut archive = zip::ZipArchive::new(file).context("Failed to read ZIP archive")?;

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let Some(relative) = file.enclosed_name() else {
                tracing::warn!(entry = %file.name(), "Skipping ZIP entry outside the target");
                continue;
            };
            let outpath = dest_dir.join(relative);

            if file.is_dir() {
                std::fs::create_dir_all(&outpath)?;
            } else {
                if let Some(parent) = outpath.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut outfile = std::fs::File::create(&outpath)
                    .with_context(|| format!("Failed to create {}", outpath.display()))?;
                std::io::copy(&mut file, &mut outfile)?;
            }
        }

        Ok::<(), anyhow::Error>(())
    })
    .await
    .context("ZIP extraction task failed")??;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source() -> SubmissionSource {
        SubmissionSource::new(&IdentifierConfig::default()).unwrap()
    }

    #[test]
    fn test_identifier_extraction() {
        let source = source();
        assert_eq!(source.identifier_of("CS17B012.tar.gz").as_deref(), Some("cs17b012"));
        assert_eq!(source.identifier_of("cs17b012_lab3.tar.xz").as_deref(), Some("cs17b012"));
        assert_eq!(source.identifier_of("lab3-Ee18M104.tgz").as_deref(), Some("ee18m104"));
        assert_eq!(source.identifier_of("submission.tar.gz"), None);
        assert_eq!(source.identifier_of("cs17b0123.tar.gz"), None);
        assert_eq!(source.identifier_of("xcs17b012.tar.gz"), None);
    }

    #[test]
    fn test_single_requires_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("CS17B001.tar.gz");
        let bad = dir.path().join("final.tar.gz");
        std::fs::write(&good, b"").unwrap();
        std::fs::write(&bad, b"").unwrap();

        let submission = source().single(&good).unwrap();
        assert_eq!(submission.identifier, "cs17b001");
        assert_eq!(submission.archive_path, good);

        assert!(matches!(
            source().single(&bad),
            Err(StageError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            source().single(&dir.path().join("cs17b002.tar.gz")),
            Err(StageError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_scan_skips_invalid_and_duplicate_entries() {
        let root = tempfile::tempdir().unwrap();
        let entries = [
            ("Alice Smith_1001_assignsubmission_file_", Some("CS17B001.tar.gz")),
            ("Bob Jones_1002_assignsubmission_file_", Some("final_submission.tar.gz")),
            ("Carol White_1003_assignsubmission_file_", Some("cs17b003.tar.xz")),
            ("Dan Brown_1004_assignsubmission_file_", None),
            ("Eve Black_1005_assignsubmission_file_", Some("cs17b001-resubmit.tar.gz")),
        ];
        for (dir, file) in entries {
            let path = root.path().join(dir);
            std::fs::create_dir(&path).unwrap();
            if let Some(file) = file {
                std::fs::write(path.join(file), b"").unwrap();
            }
        }

        let batch = source().scan(root.path()).unwrap();

        let ids: Vec<_> = batch.submissions.iter().map(|s| s.identifier.as_str()).collect();
        assert_eq!(ids, vec!["cs17b001", "cs17b003"]);
        assert_eq!(batch.submissions[0].student_name.as_deref(), Some("Alice Smith"));

        let reasons: Vec<_> = batch.rejected.iter().map(|r| r.reason.clone()).collect();
        assert_eq!(
            reasons,
            vec![
                RejectReason::InvalidIdentifier("final_submission.tar.gz".to_string()),
                RejectReason::Empty,
                RejectReason::DuplicateIdentifier("cs17b001".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_batch_extracts_outer_zip() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("submissions.zip");
        {
            let file = std::fs::File::create(&zip_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            for (student, archive) in [
                ("Alice_1_assignsubmission_file_", "cs17b001.tar.gz"),
                ("Bob_2_assignsubmission_file_", "homework.tar.gz"),
                ("Carol_3_assignsubmission_file_", "CS17B003.tar.gz"),
            ] {
                writer
                    .add_directory(format!("{}/", student), options)
                    .unwrap();
                writer
                    .start_file(format!("{}/{}", student, archive), options)
                    .unwrap();
                writer.write_all(b"not really a tarball").unwrap();
            }
            writer.finish().unwrap();
        }

        let batch = source().batch(&zip_path).await.unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.rejected.len(), 1);
        for submission in &batch.submissions {
            assert!(submission.archive_path.is_file());
        }
        let paths: HashSet<_> = batch.submissions.iter().map(|s| &s.archive_path).collect();
        assert_eq!(paths.len(), batch.len());
    }
}
