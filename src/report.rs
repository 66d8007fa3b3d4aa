//! Result aggregation and report rendering

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use autograder_common::EvaluationResult;

use crate::source::RejectedEntry;

/// Score statistics over every evaluated submission
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub highest: f64,
    pub lowest: f64,
    /// Population standard deviation
    pub stddev: f64,
}

/// Collects results in evaluation order and renders them
#[derive(Debug)]
pub struct ReportAggregator {
    fixture_count: usize,
    results: Vec<EvaluationResult>,
    rejected: Vec<RejectedEntry>,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    generated_at: DateTime<Utc>,
    fixture_count: usize,
    results: Vec<JsonRow<'a>>,
    rejected: &'a [RejectedEntry],
    summary: Option<Summary>,
}

#[derive(Serialize)]
struct JsonRow<'a> {
    #[serde(flatten)]
    result: &'a EvaluationResult,
    comment: String,
}

impl ReportAggregator {
    pub fn new(fixture_count: usize) -> Self {
        Self {
            fixture_count,
            results: Vec::new(),
            rejected: Vec::new(),
        }
    }

    pub fn add(&mut self, result: EvaluationResult) {
        self.results.push(result);
    }

    pub fn reject(&mut self, entry: RejectedEntry) {
        self.rejected.push(entry);
    }

    pub fn results(&self) -> &[EvaluationResult] {
        &self.results
    }

    /// None when no submission was evaluated
    pub fn summary(&self) -> Option<Summary> {
        if self.results.is_empty() {
            return None;
        }

        let scores: Vec<f64> = self.results.iter().map(|r| r.score()).collect();
        let count = scores.len();
        let mean = scores.iter().sum::<f64>() / count as f64;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / count as f64;

        Some(Summary {
            count,
            mean,
            highest: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            lowest: scores.iter().copied().fold(f64::INFINITY, f64::min),
            stddev: variance.sqrt(),
        })
    }

    /// Report comment: the failure description, the failing fixtures, or nothing
    pub fn comment(result: &EvaluationResult) -> String {
        if let Some(failure) = result.stage_failure() {
            return failure.kind.describe().to_string();
        }
        let failed = result.failed_fixtures();
        if failed.is_empty() {
            String::new()
        } else {
            format!("Failed testcases: {}", failed.join(","))
        }
    }

    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "------------ Evaluation Report --------------------");
        let _ = writeln!(
            out,
            "{:<20} {:<12} {:<8} {}",
            "Identifier", "Passed", "Score", "Comment"
        );

        for result in &self.results {
            let passed = format!("{} / {}", result.passed_count(), self.fixture_count);
            let comment = Self::comment(result);
            let comment = if comment.is_empty() { "-" } else { comment.as_str() };
            let _ = writeln!(
                out,
                "{:<20} {:<12} {:<8} {}",
                result.submission_id(),
                passed,
                result.score(),
                comment
            );
        }

        if !self.rejected.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Skipped {} batch entries:", self.rejected.len());
            for entry in &self.rejected {
                let _ = writeln!(out, "  {}: {}", entry.entry, entry.reason);
            }
        }

        out
    }

    /// `identifier,score,comment` rows with RFC 4180 quoting
    pub fn render_csv(&self) -> String {
        let mut out = String::from("identifier,score,comment\r\n");
        for result in &self.results {
            let _ = write!(
                out,
                "{},{},{}\r\n",
                csv_field(result.submission_id()),
                result.score(),
                csv_field(&Self::comment(result))
            );
        }
        out
    }

    pub fn render_json(&self) -> serde_json::Result<String> {
        let report = JsonReport {
            generated_at: Utc::now(),
            fixture_count: self.fixture_count,
            results: self
                .results
                .iter()
                .map(|result| JsonRow {
                    result,
                    comment: Self::comment(result),
                })
                .collect(),
            rejected: &self.rejected,
            summary: self.summary(),
        };
        serde_json::to_string_pretty(&report)
    }

    pub fn render_summary(&self) -> String {
        match self.summary() {
            Some(s) => format!(
                "Submissions = {}\nMean = {:.3}\nHighest = {}\nLowest = {}\nStddev = {:.3}\n",
                s.count, s.mean, s.highest, s.lowest, s.stddev
            ),
            None => "No submissions evaluated\n".to_string(),
        }
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
