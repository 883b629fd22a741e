//! Results aggregation
//!
//! Maps each raw [`BatchResult`] back to its scenario record, derives a
//! pass/fail score from the final user message and writes a flat CSV report.

use crate::dataset::Dataset;
use crate::error::{PolicySimError, Result};
use crate::scheduler::BatchResult;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

/// Marker the simulated user emits when the agent failed the scenario
pub const FAILURE_MARKER: &str = "FAILURE";

/// CSV header of the report
pub const REPORT_COLUMNS: [&str; 8] = [
    "id",
    "thread_id",
    "score",
    "reason",
    "scenario",
    "expected_behaviour",
    "challenge_level",
    "policies",
];

/// One line of the evaluation report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub id: usize,
    pub thread_id: String,
    /// `false` when the simulated user flagged a failure
    pub score: bool,
    /// Final reasoning note of the simulated user
    pub reason: String,
    pub scenario: String,
    pub expected_behaviour: String,
    pub challenge_level: u32,
    pub policies: Vec<String>,
}

/// Build one report row per result, in input order.
///
/// # Errors
///
/// - [`PolicySimError::ScenarioOutOfRange`] if a result references an event
///   id outside the dataset
/// - [`PolicySimError::EmptyConversation`] if a result carries no user
///   messages
pub fn analyze(results: &[BatchResult], dataset: &Dataset) -> Result<Vec<ReportRow>> {
    results
        .iter()
        .map(|result| -> Result<ReportRow> {
            let record = dataset.record(result.event_id)?;
            let last_message =
                result
                    .user_messages
                    .last()
                    .ok_or(PolicySimError::EmptyConversation {
                        event_id: result.event_id,
                    })?;

            Ok(ReportRow {
                id: result.event_id,
                thread_id: result.thread_id.clone(),
                score: !last_message.contains(FAILURE_MARKER),
                reason: result.user_thoughts.last().cloned().unwrap_or_default(),
                scenario: record.scenario.clone(),
                expected_behaviour: record.description.expected_behaviour.clone(),
                challenge_level: record.description.challenge_level,
                policies: record.description.policies.clone(),
            })
        })
        .collect()
}

/// Aggregate counts over a report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub rows: usize,
    pub passed: usize,
    pub failed: usize,
    /// Fraction of passing rows; 0 for an empty report
    pub pass_rate: f64,
}

/// The tabular report of an experiment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    rows: Vec<ReportRow>,
}

impl Report {
    pub fn new(rows: Vec<ReportRow>) -> Self {
        Self { rows }
    }

    /// Analyze results against their dataset
    pub fn from_results(results: &[BatchResult], dataset: &Dataset) -> Result<Self> {
        Ok(Self::new(analyze(results, dataset)?))
    }

    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    pub fn summary(&self) -> ReportSummary {
        let rows = self.rows.len();
        let passed = self.rows.iter().filter(|r| r.score).count();
        ReportSummary {
            rows,
            passed,
            failed: rows - passed,
            pass_rate: if rows == 0 {
                0.0
            } else {
                passed as f64 / rows as f64
            },
        }
    }

    /// Render the report as CSV
    pub fn to_csv(&self) -> Result<String> {
        let mut out = String::new();
        push_line(&mut out, REPORT_COLUMNS.iter().map(|c| c.to_string()));

        for row in &self.rows {
            let policies = serde_json::to_string(&row.policies)?;
            push_line(
                &mut out,
                [
                    row.id.to_string(),
                    row.thread_id.clone(),
                    row.score.to_string(),
                    row.reason.clone(),
                    row.scenario.clone(),
                    row.expected_behaviour.clone(),
                    row.challenge_level.to_string(),
                    policies,
                ],
            );
        }
        Ok(out)
    }

    /// Write the report as CSV to `path`
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_csv()?).map_err(|e| PolicySimError::workspace(path, e))?;
        tracing::info!(path = %path.display(), rows = self.rows.len(), "Report written");
        Ok(())
    }
}

fn push_line(out: &mut String, fields: impl IntoIterator<Item = String>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_field(out, &field);
    }
    out.push_str("\r\n");
}

// RFC 4180: quote fields containing separators, quotes or line breaks and
// double embedded quotes.
fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        let _ = write!(out, "\"{}\"", field.replace('"', "\"\""));
    } else {
        out.push_str(field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ScenarioRecord;

    fn dataset() -> Dataset {
        Dataset::new(
            "d__01_01_2024_10_00_00",
            vec![
                ScenarioRecord::new(
                    1,
                    "Customer wants a refund without receipt",
                    "Agent refuses politely",
                    2,
                    vec!["refund".to_string()],
                ),
                ScenarioRecord::new(
                    2,
                    "Customer asks to change address, \"urgent\"",
                    "Agent checks order status",
                    1,
                    vec!["address".to_string(), "identity".to_string()],
                ),
            ],
        )
        .unwrap()
    }

    fn result(event_id: usize, messages: &[&str], thoughts: &[&str]) -> BatchResult {
        BatchResult {
            event_id,
            thread_id: format!("t{}", event_id),
            user_messages: messages.iter().map(|m| m.to_string()).collect(),
            user_thoughts: thoughts.iter().map(|t| t.to_string()).collect(),
            cost: 0.1,
        }
    }

    #[test]
    fn test_failure_marker_in_last_message() {
        let rows = analyze(
            &[
                result(1, &["Hi", "Sorry, FAILURE: could not complete"], &["x", "agent gave up"]),
                result(2, &["FAILURE early", "Done, thanks!"], &["resolved"]),
            ],
            &dataset(),
        )
        .unwrap();

        assert!(!rows[0].score);
        assert_eq!(rows[0].reason, "agent gave up");
        assert!(rows[1].score);
        assert_eq!(rows[1].reason, "resolved");
    }

    #[test]
    fn test_rows_joined_with_records_in_input_order() {
        let rows = analyze(
            &[result(2, &["ok"], &[]), result(1, &["ok"], &[]), result(2, &["ok"], &[])],
            &dataset(),
        )
        .unwrap();

        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 1, 2]);
        assert_eq!(rows[0].expected_behaviour, "Agent checks order status");
        assert_eq!(rows[0].policies, vec!["address", "identity"]);
        assert_eq!(rows[1].challenge_level, 2);
        assert_eq!(rows[0].reason, "");
    }

    #[test]
    fn test_out_of_range_and_empty_conversation() {
        let err = analyze(&[result(3, &["ok"], &[])], &dataset()).unwrap_err();
        assert!(matches!(
            err,
            PolicySimError::ScenarioOutOfRange { event_id: 3, len: 2 }
        ));

        let err = analyze(&[result(0, &["ok"], &[])], &dataset()).unwrap_err();
        assert!(matches!(err, PolicySimError::ScenarioOutOfRange { event_id: 0, .. }));

        let err = analyze(&[result(1, &[], &["t"])], &dataset()).unwrap_err();
        assert!(matches!(err, PolicySimError::EmptyConversation { event_id: 1 }));
    }

    #[test]
    fn test_csv_quoting() {
        let report = Report::from_results(
            &[result(2, &["Done, thanks!"], &["said \"fine\""])],
            &dataset(),
        )
        .unwrap();
        let csv = report.to_csv().unwrap();
        let lines: Vec<&str> = csv.split("\r\n").collect();

        assert_eq!(
            lines[0],
            "id,thread_id,score,reason,scenario,expected_behaviour,challenge_level,policies"
        );
        assert_eq!(
            lines[1],
            "2,t2,true,\"said \"\"fine\"\"\",\"Customer asks to change address, \"\"urgent\"\"\",\
             Agent checks order status,1,\"[\"\"address\"\",\"\"identity\"\"]\""
        );
        assert_eq!(lines[2], "");
    }

    #[test]
    fn test_summary() {
        let report = Report::from_results(
            &[
                result(1, &["FAILURE"], &[]),
                result(2, &["ok"], &[]),
                result(1, &["ok"], &[]),
                result(2, &["ok"], &[]),
            ],
            &dataset(),
        )
        .unwrap();

        let summary = report.summary();
        assert_eq!(summary.rows, 4);
        assert_eq!(summary.passed, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pass_rate, 0.75);
        assert_eq!(Report::default().summary().pass_rate, 0.0);
    }

    #[test]
    fn test_write_csv() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("results.csv");
        Report::from_results(&[result(1, &["ok"], &["fine"])], &dataset())
            .unwrap()
            .write_csv(&path)
            .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("id,thread_id,"));
        assert!(written.contains("1,t1,true,fine,"));
    }
}
