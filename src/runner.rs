//! Per-fixture execution and comparison
//!
//! The submission under test is a code generator: given a fixture's input it
//! prints an assembly program. Each fixture therefore runs a four-step
//! sequence in its own scratch directory:
//!
//! 1. run the submission binary, `stdin = input`, `stdout > assembly.s`
//! 2. assemble `assembly.s` into `generated.out` with the pinned assembler
//! 3. run `generated.out`, `stdout > actual.txt`
//! 4. `diff expected actual.txt`

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use autograder_common::{FixtureStep, TestFixture, TestOutcome};

use crate::config::ExecutionConfig;
use crate::constants::SCRATCH_DIR_NAME;
use crate::executor::{CommandExecutor, CommandPolicy, CommandResult, CommandSpec, truncate_text};

const ASSEMBLY_FILE: &str = "assembly.s";
const GENERATED_FILE: &str = "generated.out";
const ACTUAL_FILE: &str = "actual.txt";

/// Runs a located binary against every fixture
pub struct TestRunner {
    executor: Arc<CommandExecutor>,
    fixtures: Arc<[TestFixture]>,
    execution: ExecutionConfig,
    assemble_timeout: Duration,
}

impl TestRunner {
    pub fn new(
        executor: Arc<CommandExecutor>,
        fixtures: Arc<[TestFixture]>,
        execution: ExecutionConfig,
        assemble_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            fixtures,
            execution,
            assemble_timeout,
        }
    }

    pub fn fixture_count(&self) -> usize {
        self.fixtures.len()
    }

    /// Produce exactly one outcome per fixture, in fixture order
    pub async fn run(&self, binary: &Path, work_dir: &Path) -> Vec<TestOutcome> {
        let mut outcomes = Vec::with_capacity(self.fixtures.len());

        for (index, fixture) in self.fixtures.iter().enumerate() {
            let scratch = work_dir
                .join(SCRATCH_DIR_NAME)
                .join(format!("fixture-{:03}", index + 1));
            let outcome = self.run_fixture(fixture, binary, work_dir, &scratch).await;

            if outcome.passed {
                tracing::debug!(fixture = %fixture.id, "Fixture passed");
            } else {
                tracing::debug!(
                    fixture = %fixture.id,
                    step = ?outcome.failed_step,
                    timed_out = outcome.timed_out,
                    "Fixture failed"
                );
            }
            outcomes.push(outcome);
        }

        outcomes
    }

    async fn run_fixture(
        &self,
        fixture: &TestFixture,
        binary: &Path,
        work_dir: &Path,
        scratch: &Path,
    ) -> TestOutcome {
        if let Err(e) = reset_dir(scratch).await {
            return TestOutcome::fail(
                &fixture.id,
                FixtureStep::Run,
                false,
                Some(format!("Failed to prepare {}: {}", scratch.display(), e)),
            );
        }

        let commands = self.commands(fixture, binary, work_dir, scratch);
        let result = match self
            .executor
            .run_sequence(&commands, CommandPolicy::Restricted)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                let details = Some(e.to_string());
                return TestOutcome::fail(&fixture.id, FixtureStep::Run, false, details);
            }
        };

        self.judge(&fixture.id, &result)
    }

    fn commands(
        &self,
        fixture: &TestFixture,
        binary: &Path,
        work_dir: &Path,
        scratch: &Path,
    ) -> Vec<CommandSpec> {
        let assembler = &self.execution.assembler;
        vec![
            CommandSpec::new(absolute(binary))
                .current_dir(work_dir)
                .stdin_file(&fixture.input_path)
                .stdout_file(scratch.join(ASSEMBLY_FILE))
                .timeout(self.execution.run_timeout),
            CommandSpec::new(&assembler.program)
                .args(&assembler.flags)
                .args(["-o", GENERATED_FILE, ASSEMBLY_FILE])
                .current_dir(scratch)
                .timeout(self.assemble_timeout)
                .policy(CommandPolicy::Trusted),
            CommandSpec::new(scratch.join(GENERATED_FILE))
                .current_dir(scratch)
                .stdout_file(scratch.join(ACTUAL_FILE))
                .timeout(self.execution.run_timeout),
            CommandSpec::new(&self.execution.diff_program)
                .arg(absolute(&fixture.expected_output_path))
                .arg(ACTUAL_FILE)
                .current_dir(scratch)
                .timeout(self.execution.run_timeout)
                .policy(CommandPolicy::Trusted),
        ]
    }

    /// Pass iff the whole sequence succeeded and the diff printed nothing
    fn judge(&self, fixture_id: &str, result: &CommandResult) -> TestOutcome {
        let limit = self.execution.diagnostic_limit_bytes;

        if !result.success() {
            let step = step_at(result.step);
            return TestOutcome::fail(
                fixture_id,
                step,
                result.timed_out,
                Some(result.diagnostics(limit)),
            );
        }

        if !result.output.is_empty() {
            return TestOutcome::fail(
                fixture_id,
                FixtureStep::Compare,
                false,
                Some(truncate_text(&result.output_lossy(), limit)),
            );
        }

        TestOutcome::pass(fixture_id)
    }
}

fn step_at(index: usize) -> FixtureStep {
    match index {
        0 => FixtureStep::Run,
        1 => FixtureStep::Assemble,
        2 => FixtureStep::Execute,
        _ => FixtureStep::Compare,
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(dir).await? {
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await
}
