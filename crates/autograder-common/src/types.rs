//! Domain types for the evaluation pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{StageError, StageErrorKind};

/// One student's submission, before extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Lowercased roll-number identifier taken from the archive name
    pub identifier: String,
    /// Path to the submission archive
    pub archive_path: PathBuf,
    /// Display name from the batch directory, if any
    pub student_name: Option<String>,
}

impl Submission {
    pub fn new(identifier: impl Into<String>, archive_path: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            archive_path: archive_path.into(),
            student_name: None,
        }
    }

    pub fn with_student_name(mut self, name: Option<String>) -> Self {
        self.student_name = name;
        self
    }
}

/// One input/expected-output test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFixture {
    pub id: String,
    pub input_path: PathBuf,
    pub expected_output_path: PathBuf,
}

/// Step of the per-fixture pipeline that rejected the submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureStep {
    /// Running the submission binary on the fixture input
    Run,
    /// Assembling the generated artifact with the pinned toolchain
    Assemble,
    /// Running the assembled executable
    Execute,
    /// Comparing actual and expected output
    Compare,
}

impl std::fmt::Display for FixtureStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixtureStep::Run => write!(f, "run"),
            FixtureStep::Assemble => write!(f, "assemble"),
            FixtureStep::Execute => write!(f, "execute"),
            FixtureStep::Compare => write!(f, "compare"),
        }
    }
}

/// Verdict for a single (submission, fixture) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub fixture_id: String,
    pub passed: bool,
    /// Step that failed (None when passed)
    pub failed_step: Option<FixtureStep>,
    /// Whether the failing step was killed by the timeout
    pub timed_out: bool,
    /// Truncated output or diff kept for reporting
    pub diagnostics: Option<String>,
}

impl TestOutcome {
    /// Create a passing outcome
    pub fn pass(fixture_id: impl Into<String>) -> Self {
        Self {
            fixture_id: fixture_id.into(),
            passed: true,
            failed_step: None,
            timed_out: false,
            diagnostics: None,
        }
    }

    /// Create a failing outcome
    pub fn fail(
        fixture_id: impl Into<String>,
        step: FixtureStep,
        timed_out: bool,
        diagnostics: Option<String>,
    ) -> Self {
        Self {
            fixture_id: fixture_id.into(),
            passed: false,
            failed_step: Some(step),
            timed_out,
            diagnostics,
        }
    }
}

/// Pipeline progress of a single submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStage {
    NotStarted,
    Extracted,
    Built,
    BinaryLocated,
    TestsRun,
    Scored,
}

impl std::fmt::Display for EvaluationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluationStage::NotStarted => write!(f, "not_started"),
            EvaluationStage::Extracted => write!(f, "extracted"),
            EvaluationStage::Built => write!(f, "built"),
            EvaluationStage::BinaryLocated => write!(f, "binary_located"),
            EvaluationStage::TestsRun => write!(f, "tests_run"),
            EvaluationStage::Scored => write!(f, "scored"),
        }
    }
}

/// Frozen classification of a stage error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: StageErrorKind,
    pub details: String,
}

impl From<&StageError> for StageFailure {
    fn from(err: &StageError) -> Self {
        Self {
            kind: err.kind(),
            details: err.details().to_string(),
        }
    }
}

/// Final record for one submission.
///
/// Only constructible through [`EvaluationResult::scored`] and
/// [`EvaluationResult::failed`], so the score always derives from the
/// finalized outcomes and a failed submission never carries outcomes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    submission_id: String,
    student_name: Option<String>,
    stage_failure: Option<StageFailure>,
    outcomes: Vec<TestOutcome>,
    score: f64,
    completed_stage: EvaluationStage,
}

impl EvaluationResult {
    /// Result of a submission that reached the test stage
    pub fn scored(
        submission: &Submission,
        outcomes: Vec<TestOutcome>,
        points_per_pass: f64,
    ) -> Self {
        let passed = outcomes.iter().filter(|o| o.passed).count();
        Self {
            submission_id: submission.identifier.clone(),
            student_name: submission.student_name.clone(),
            stage_failure: None,
            score: points_per_pass * passed as f64,
            outcomes,
            completed_stage: EvaluationStage::Scored,
        }
    }

    /// Result of a submission that stopped at a failing stage
    pub fn failed(
        submission_id: impl Into<String>,
        error: &StageError,
        completed_stage: EvaluationStage,
    ) -> Self {
        Self {
            submission_id: submission_id.into(),
            student_name: None,
            stage_failure: Some(StageFailure::from(error)),
            outcomes: Vec::new(),
            score: 0.0,
            completed_stage,
        }
    }

    pub fn with_student_name(mut self, name: Option<String>) -> Self {
        self.student_name = name;
        self
    }

    pub fn submission_id(&self) -> &str {
        &self.submission_id
    }

    pub fn student_name(&self) -> Option<&str> {
        self.student_name.as_deref()
    }

    pub fn stage_failure(&self) -> Option<&StageFailure> {
        self.stage_failure.as_ref()
    }

    pub fn outcomes(&self) -> &[TestOutcome] {
        &self.outcomes
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    /// Last stage the submission completed before scoring or failing
    pub fn completed_stage(&self) -> EvaluationStage {
        self.completed_stage
    }

    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    /// Ids of fixtures that did not pass, in fixture order
    pub fn failed_fixtures(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| o.fixture_id.as_str())
            .collect()
    }
}
