//! Autograder - Batch Evaluation of Compiler Submissions
//!
//! Takes a batch of student submissions (or a single one) and a directory of
//! test fixtures, then for each submission extracts the archive, builds it
//! with its own build tool, runs the resulting binary against every fixture
//! and scores the outcomes.
//!
//! # Architecture
//!
//! - **Source**: turns the input archive into [`Submission`]s
//! - **Builder**: extract, build, locate the executable
//! - **Runner**: per-fixture run, assemble, execute and compare
//! - **Evaluator**: per-submission stage machine and scoring
//! - **Report**: table, CSV and JSON rendering plus summary statistics
//!
//! Every external process goes through [`executor::CommandExecutor`].
//!
//! [`Submission`]: autograder_common::Submission

pub mod builder;
pub mod config;
pub mod constants;
pub mod evaluator;
pub mod executor;
pub mod report;
pub mod runner;
pub mod source;
pub mod testcase;

// Re-export commonly used types
pub use autograder_common::{
    EvaluationResult, EvaluationStage, FixtureStep, StageError, StageErrorKind, Submission,
    TestFixture, TestOutcome,
};
pub use config::Config;
pub use evaluator::Evaluator;
pub use executor::{CommandExecutor, CommandPolicy, CommandResult, CommandSpec};
pub use report::ReportAggregator;
