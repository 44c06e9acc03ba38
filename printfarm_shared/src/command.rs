//! Wire format for replicated log entries.
//!
//! Every mutation travels through the consensus log as a [`Command`]: a tagged
//! op name plus an opaque JSON payload. The state machine decodes the payload
//! per op at apply time, so an unrecognized op or a malformed payload yields a
//! failure outcome instead of stalling replication.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Filament, JobStatus, PrintJob, Printer};

pub const OP_ADD_PRINTER: &str = "add_printer";
pub const OP_ADD_FILAMENT: &str = "add_filament";
pub const OP_ADD_PRINT_JOB: &str = "add_print_job";
pub const OP_UPDATE_JOB_STATUS: &str = "update_job_status";

/// A single log entry: `op` selects the mutation, `data` carries its payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Command {
    pub op: String,
    #[serde(default)]
    pub data: Value,
}

impl Command {
    pub fn add_printer(printer: &Printer) -> Result<Command, serde_json::Error> {
        Ok(Command {
            op: OP_ADD_PRINTER.to_string(),
            data: serde_json::to_value(printer)?,
        })
    }

    pub fn add_filament(filament: &Filament) -> Result<Command, serde_json::Error> {
        Ok(Command {
            op: OP_ADD_FILAMENT.to_string(),
            data: serde_json::to_value(filament)?,
        })
    }

    pub fn add_print_job(job: &PrintJob) -> Result<Command, serde_json::Error> {
        Ok(Command {
            op: OP_ADD_PRINT_JOB.to_string(),
            data: serde_json::to_value(job)?,
        })
    }

    pub fn update_job_status(job_id: &str, new_status: JobStatus) -> Result<Command, serde_json::Error> {
        Ok(Command {
            op: OP_UPDATE_JOB_STATUS.to_string(),
            data: serde_json::to_value(StatusUpdate {
                job_id: job_id.to_string(),
                new_status,
            })?,
        })
    }
}

/// Payload of [`OP_UPDATE_JOB_STATUS`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub job_id: String,
    pub new_status: JobStatus,
}

/// Result of applying a command, returned to the proposing node only.
///
/// Domain failures (unknown id, insufficient filament, illegal transition)
/// are carried here as a message; they are not errors at the consensus layer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CommandOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutcome {
    pub fn ok() -> Self {
        CommandOutcome { error: None }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        CommandOutcome {
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
