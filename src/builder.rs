//! Submission extraction, build and binary discovery

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use autograder_common::StageError;

use crate::config::BuildConfig;
use crate::executor::{CommandExecutor, CommandPolicy, CommandResult, CommandSpec};

/// Turns a submission archive into a built working tree
pub struct Builder {
    executor: Arc<CommandExecutor>,
    config: BuildConfig,
    diagnostic_limit: usize,
}

impl Builder {
    pub fn new(
        executor: Arc<CommandExecutor>,
        config: BuildConfig,
        diagnostic_limit: usize,
    ) -> Self {
        Self {
            executor,
            config,
            diagnostic_limit,
        }
    }

    /// Unpack a tar archive (gzip/xz autodetected) into `target_dir`, dropping
    /// the archive's top-level directory
    pub async fn extract(&self, archive: &Path, target_dir: &Path) -> Result<(), StageError> {
        tokio::fs::create_dir_all(target_dir)
            .await
            .map_err(|e| StageError::Extract {
                details: format!("Failed to create {}: {}", target_dir.display(), e),
            })?;

        let command = CommandSpec::new("tar")
            .arg("-xf")
            .arg(archive)
            .arg("-C")
            .arg(target_dir)
            .arg("--strip-components=1")
            .timeout(self.config.timeout);

        let result = self
            .executor
            .run(&command, CommandPolicy::Trusted)
            .await
            .map_err(|e| StageError::Extract {
                details: e.to_string(),
            })?;

        if !result.success() {
            return Err(StageError::Extract {
                details: self.failure_details("tar", &result),
            });
        }

        tracing::debug!(
            archive = %archive.display(),
            target = %target_dir.display(),
            "Extracted submission"
        );
        Ok(())
    }

    /// Run the clean command (best effort) and then the build command
    pub async fn build(&self, target_dir: &Path) -> Result<(), StageError> {
        let clean = CommandSpec::shell(&self.config.clean_command)
            .current_dir(target_dir)
            .timeout(self.config.timeout);
        match self.executor.run(&clean, CommandPolicy::Restricted).await {
            Ok(result) if !result.success() => tracing::debug!(
                exit_code = result.exit_code,
                "Clean command failed, continuing"
            ),
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Clean command could not run, continuing"),
        }

        let build = CommandSpec::shell(&self.config.build_command)
            .current_dir(target_dir)
            .timeout(self.config.timeout);
        let result = self
            .executor
            .run(&build, CommandPolicy::Restricted)
            .await
            .map_err(|e| StageError::Build {
                details: e.to_string(),
            })?;

        if !result.success() {
            return Err(StageError::Build {
                details: self.failure_details(&self.config.build_command, &result),
            });
        }

        tracing::debug!(dir = %target_dir.display(), "Build succeeded");
        Ok(())
    }

    /// Find the executable the build left in the tree root
    pub fn locate_binary(&self, target_dir: &Path) -> Result<PathBuf, StageError> {
        let preferred = target_dir.join(&self.config.binary_name);
        if preferred.is_file() {
            return Ok(preferred);
        }

        for entry in WalkDir::new(target_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let executable = entry
                .metadata()
                .map(|m| m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false);
            if executable {
                return Ok(entry.into_path());
            }
        }

        Err(StageError::BinaryNotFound(format!(
            "no '{}' or other executable in {}",
            self.config.binary_name,
            target_dir.display()
        )))
    }

    fn failure_details(&self, command: &str, result: &CommandResult) -> String {
        let mut details = if result.timed_out {
            format!("`{}` timed out", command)
        } else {
            format!("`{}` exited with code {}", command, result.exit_code)
        };
        let output = result.diagnostics(self.diagnostic_limit);
        if !output.trim().is_empty() {
            details.push('\n');
            details.push_str(output.trim_end());
        }
        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use autograder_common::StageErrorKind;

    use crate::config::{ExecutionConfig, ToolchainConfig};

    fn builder(build_command: &str) -> Builder {
        let executor =
            CommandExecutor::new(&ToolchainConfig::default(), &ExecutionConfig::default()).unwrap();
        let config = BuildConfig {
            clean_command: "rm -f a.out".to_string(),
            build_command: build_command.to_string(),
            binary_name: "a.out".to_string(),
            timeout: Duration::from_secs(10),
        };
        Builder::new(Arc::new(executor), config, 256)
    }

    fn make_tarball(dir: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let tree = dir.join("tree");
        let top = tree.join("submission");
        std::fs::create_dir_all(&top).unwrap();
        for (file, contents) in files {
            std::fs::write(top.join(file), contents).unwrap();
        }
        let archive = dir.join(name);
        let status = std::process::Command::new("tar")
            .arg("-czf")
            .arg(&archive)
            .arg("-C")
            .arg(&tree)
            .arg("submission")
            .status()
            .unwrap();
        assert!(status.success());
        archive
    }

    fn set_mode(path: &Path, mode: u32) {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    #[tokio::test]
    async fn test_extract_strips_top_directory() {
        let dir = tempfile::tempdir().unwrap();
        let archive = make_tarball(dir.path(), "cs17b001.tar.gz", &[("Makefile", "all:\n")]);
        let target = dir.path().join("work");

        builder("true").extract(&archive, &target).await.unwrap();
        assert!(target.join("Makefile").is_file());
    }

    #[tokio::test]
    async fn test_extract_failure() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("cs17b001.tar.gz");
        std::fs::write(&archive, b"definitely not gzip").unwrap();

        let err = builder("true")
            .extract(&archive, &dir.path().join("work"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StageErrorKind::Extract);
    }

    #[tokio::test]
    async fn test_build_failure_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let err = builder("echo 'main.c:1: error'; exit 2")
            .build(dir.path())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), StageErrorKind::Build);
        assert!(err.details().contains("exited with code 2"));
        assert!(err.details().contains("main.c:1: error"));
    }

    #[tokio::test]
    async fn test_build_runs_in_target_dir() {
        let dir = tempfile::tempdir().unwrap();
        builder("touch built").build(dir.path()).await.unwrap();
        assert!(dir.path().join("built").exists());
    }

    #[test]
    fn test_locate_prefers_default_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.out"), b"").unwrap();
        std::fs::write(dir.path().join("compiler"), b"").unwrap();
        set_mode(&dir.path().join("compiler"), 0o755);

        let found = builder("true").locate_binary(dir.path()).unwrap();
        assert_eq!(found, dir.path().join("a.out"));
    }

    #[test]
    fn test_locate_falls_back_to_first_executable() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["zcc", "mycc", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        set_mode(&dir.path().join("zcc"), 0o755);
        set_mode(&dir.path().join("mycc"), 0o700);
        set_mode(&dir.path().join("notes.txt"), 0o644);

        let found = builder("true").locate_binary(dir.path()).unwrap();
        assert_eq!(found, dir.path().join("mycc"));
    }

    #[test]
    fn test_locate_without_executable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.c"), b"int main;").unwrap();
        set_mode(&dir.path().join("main.c"), 0o644);

        let err = builder("true").locate_binary(dir.path()).unwrap_err();
        assert_eq!(err.kind(), StageErrorKind::BinaryNotFound);
    }
}
