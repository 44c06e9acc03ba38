//! Shared data models for the workshop: entities and the job lifecycle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A registered printer. Ids are client-supplied and never reassigned.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Printer {
    pub id: String,
    pub name: String,
}

/// A filament spool. `weight_grams` is the remaining physical weight and
/// never goes negative.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Filament {
    pub id: String,
    /// Material, free-form (PLA, PETG, ABS, TPU, ...).
    #[serde(rename = "type")]
    pub filament_type: String,
    pub color: String,
    pub weight_grams: f64,
}

/// Lifecycle states of a print job.
///
/// ```text
/// Queued ──► Running ──► Done
///    │          │
///    └──► Canceled ◄──┘
/// ```
///
/// `Done` and `Canceled` are terminal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Canceled,
}

impl JobStatus {
    /// Whether moving from `self` to `next` is a legal edge of the lattice.
    /// Self-loops and backward moves are not.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Canceled)
                | (JobStatus::Running, JobStatus::Done)
                | (JobStatus::Running, JobStatus::Canceled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "Queued",
            JobStatus::Running => "Running",
            JobStatus::Done => "Done",
            JobStatus::Canceled => "Canceled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid job status '{0}'")]
pub struct ParseStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Queued" => Ok(JobStatus::Queued),
            "Running" => Ok(JobStatus::Running),
            "Done" => Ok(JobStatus::Done),
            "Canceled" => Ok(JobStatus::Canceled),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// A print job referencing a printer and a filament spool by id.
///
/// The client-supplied `status` is ignored on creation; jobs always enter the
/// system as `Queued`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PrintJob {
    pub id: String,
    pub file_path: String,
    pub grams_needed: f64,
    pub printer_id: String,
    pub filament_id: String,
    #[serde(default = "default_status")]
    pub status: JobStatus,
}

fn default_status() -> JobStatus {
    JobStatus::Queued
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_allows_only_the_four_legal_edges() {
        use JobStatus::*;
        let all = [Queued, Running, Done, Canceled];
        for from in all {
            for to in all {
                let legal = matches!(
                    (from, to),
                    (Queued, Running) | (Queued, Canceled) | (Running, Done) | (Running, Canceled)
                );
                assert_eq!(from.can_transition_to(to), legal, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        use JobStatus::*;
        for to in [Queued, Running, Done, Canceled] {
            assert!(!Done.can_transition_to(to));
            assert!(!Canceled.can_transition_to(to));
        }
    }

    #[test]
    fn status_parses_and_displays_symmetrically() {
        for s in ["Queued", "Running", "Done", "Canceled"] {
            let status: JobStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
        let err = "Paused".parse::<JobStatus>().unwrap_err();
        assert_eq!(err.to_string(), "invalid job status 'Paused'");
    }

    #[test]
    fn filament_type_serializes_under_the_type_key() {
        let f = Filament {
            id: "f1".to_string(),
            filament_type: "PLA".to_string(),
            color: "Blue".to_string(),
            weight_grams: 1000.0,
        };
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["type"], "PLA");
        assert_eq!(json["weight_grams"], 1000.0);
    }

    #[test]
    fn print_job_status_defaults_to_queued() {
        let job: PrintJob = serde_json::from_str(
            r#"{"id":"j1","file_path":"/models/boat.gcode","grams_needed":50,
                "printer_id":"p1","filament_id":"f1"}"#,
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Queued);
    }
}
