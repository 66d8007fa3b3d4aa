//! Per-submission evaluation pipeline
//!
//! `NotStarted -> Extracted -> Built -> BinaryLocated -> TestsRun -> Scored`
//!
//! The first failing stage stops the pipeline; its [`StageError`] is frozen
//! into the result and never escapes [`Evaluator::evaluate`].

use std::path::{Path, PathBuf};

use autograder_common::{EvaluationResult, EvaluationStage, StageError, Submission, TestOutcome};

use crate::builder::Builder;
use crate::runner::TestRunner;

/// Drives one submission at a time through extract, build, test and score
pub struct Evaluator {
    builder: Builder,
    runner: TestRunner,
    extract_root: PathBuf,
    points_per_pass: f64,
}

impl Evaluator {
    pub fn new(
        builder: Builder,
        runner: TestRunner,
        extract_root: impl Into<PathBuf>,
        points_per_pass: f64,
    ) -> Self {
        Self {
            builder,
            runner,
            extract_root: extract_root.into(),
            points_per_pass,
        }
    }

    pub fn fixture_count(&self) -> usize {
        self.runner.fixture_count()
    }

    /// Working directory owned by a submission
    pub fn work_dir(&self, submission: &Submission) -> PathBuf {
        self.extract_root.join(&submission.identifier)
    }

    /// Evaluate one submission; never fails, every error becomes part of the result
    pub async fn evaluate(&self, submission: &Submission) -> EvaluationResult {
        tracing::info!(
            submission = %submission.identifier,
            archive = %submission.archive_path.display(),
            "Evaluating submission"
        );

        let mut stage = EvaluationStage::NotStarted;
        match self.run_stages(submission, &mut stage).await {
            Ok(outcomes) => {
                let result = EvaluationResult::scored(submission, outcomes, self.points_per_pass);
                tracing::info!(
                    submission = %submission.identifier,
                    passed = result.passed_count(),
                    total = self.fixture_count(),
                    score = result.score(),
                    "Submission scored"
                );
                result
            }
            Err(err) => {
                tracing::warn!(
                    submission = %submission.identifier,
                    stage = %stage,
                    kind = %err.kind(),
                    "Submission failed: {}",
                    first_line(err.details())
                );
                EvaluationResult::failed(&submission.identifier, &err, stage)
                    .with_student_name(submission.student_name.clone())
            }
        }
    }

    async fn run_stages(
        &self,
        submission: &Submission,
        stage: &mut EvaluationStage,
    ) -> Result<Vec<TestOutcome>, StageError> {
        let work_dir = self.work_dir(submission);
        clear_stale(&work_dir).await?;

        self.builder
            .extract(&submission.archive_path, &work_dir)
            .await?;
        advance(submission, stage, EvaluationStage::Extracted);

        self.builder.build(&work_dir).await?;
        advance(submission, stage, EvaluationStage::Built);

        let binary = self.builder.locate_binary(&work_dir)?;
        tracing::debug!(
            submission = %submission.identifier,
            binary = %binary.display(),
            "Located executable"
        );
        advance(submission, stage, EvaluationStage::BinaryLocated);

        let outcomes = self.runner.run(&binary, &work_dir).await;
        advance(submission, stage, EvaluationStage::TestsRun);

        Ok(outcomes)
    }
}

fn advance(submission: &Submission, stage: &mut EvaluationStage, next: EvaluationStage) {
    tracing::debug!(
        submission = %submission.identifier,
        from = %stage,
        to = %next,
        "Stage complete"
    );
    *stage = next;
}

/// Remove what a previous run left in the working directory
async fn clear_stale(work_dir: &Path) -> Result<(), StageError> {
    match tokio::fs::remove_dir_all(work_dir).await {
        Ok(()) => {
            tracing::debug!(dir = %work_dir.display(), "Cleared stale working directory");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StageError::Extract {
            details: format!("Failed to clear {}: {}", work_dir.display(), e),
        }),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
