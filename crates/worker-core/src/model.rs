//! Wire and in-memory data types: Job, Task, Runnable context, Report.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which kind of sandbox a job's runner kit expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerKind {
    #[serde(rename = "PY")]
    Python,
    #[serde(rename = "DO")]
    Docker,
}

/// A job as delivered by `GET <base>/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: u64,
    /// Absolute URL to the task this job is evaluated against.
    pub task: String,
    pub runner: RunnerKind,
    pub file_url: String,
    /// Container image name; required iff `runner == Docker`.
    #[serde(default)]
    pub docker: Option<String>,
    /// Arbitrary coordinator-supplied metadata, carried only for log
    /// correlation — never interpreted by the pipeline.
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// A task (suite descriptor) as delivered by `GET <job.task>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub file_url: String,
    /// md5 hex digest of the suite zip's expected contents.
    pub file_hash: String,
    pub run_time_limit: u64,
    pub max_image_size: u64,
}

/// Terminal outcome of a job's execution, before being serialized into a Report.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Success { point: f64, test_cases: Value },
    Failure { error_type: String, args: Vec<String> },
}

/// The status the coordinator sees for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Done,
    Error,
}

impl ReportStatus {
    fn as_wire(self) -> &'static str {
        match self {
            ReportStatus::Done => "D",
            ReportStatus::Error => "E",
        }
    }
}

impl Serialize for ReportStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for ReportStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "D" => Ok(ReportStatus::Done),
            "E" => Ok(ReportStatus::Error),
            other => Err(serde::de::Error::custom(format!("unknown report status: {other}"))),
        }
    }
}

/// The payload delivered via `POST <job>/end/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub status: ReportStatus,
    pub point: Option<f64>,
    /// Always a JSON string, never a bare JSON value — matches
    /// `json.dumps(...)` in the source watcher.
    pub notes: String,
}

impl Report {
    pub fn from_outcome(outcome: &JobOutcome) -> Self {
        match outcome {
            JobOutcome::Success { point, test_cases } => Report {
                status: ReportStatus::Done,
                point: Some(*point),
                notes: test_cases.to_string(),
            },
            JobOutcome::Failure { error_type, args } => {
                let notes = serde_json::json!({
                    "error": { "type": error_type, "args": args }
                });
                Report {
                    status: ReportStatus::Error,
                    point: None,
                    notes: notes.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_status_round_trips_through_wire_codes() {
        for status in [ReportStatus::Done, ReportStatus::Error] {
            let wire = serde_json::to_string(&status).unwrap();
            let parsed: ReportStatus = serde_json::from_str(&wire).unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn runner_kind_wire_codes() {
        assert_eq!(serde_json::to_string(&RunnerKind::Python).unwrap(), "\"PY\"");
        assert_eq!(serde_json::to_string(&RunnerKind::Docker).unwrap(), "\"DO\"");
    }

    #[test]
    fn success_report_serializes_test_cases_as_json_string() {
        let outcome = JobOutcome::Success {
            point: 42.0,
            test_cases: serde_json::json!([{"name": "t1", "ok": true}]),
        };
        let report = Report::from_outcome(&outcome);
        assert_eq!(report.point, Some(42.0));
        assert_eq!(report.notes, r#"[{"name":"t1","ok":true}]"#);

        let wire = serde_json::to_value(&report).unwrap();
        assert_eq!(wire["status"], "D");
    }

    #[test]
    fn failure_report_embeds_error_type_and_args() {
        let outcome = JobOutcome::Failure {
            error_type: "MalformedOutputError".to_string(),
            args: vec!["not json".to_string()],
        };
        let report = Report::from_outcome(&outcome);
        assert_eq!(report.point, None);
        let notes: Value = serde_json::from_str(&report.notes).unwrap();
        assert_eq!(notes["error"]["type"], "MalformedOutputError");
        assert_eq!(notes["error"]["args"][0], "not json");

        let wire = serde_json::to_value(&report).unwrap();
        assert_eq!(wire["status"], "E");
    }
}
