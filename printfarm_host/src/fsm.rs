//! Deterministic state machine for the workshop inventory.
//!
//! Every replica applies the same committed command sequence to an instance
//! of [`WorkshopFsm`] and must arrive at identical state. Nothing in here may
//! read the clock, use randomness, or depend on map iteration order beyond
//! commutative reductions.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use printfarm_shared::command::{
    Command, CommandOutcome, StatusUpdate, OP_ADD_FILAMENT, OP_ADD_PRINTER, OP_ADD_PRINT_JOB,
    OP_UPDATE_JOB_STATUS,
};
use printfarm_shared::models::{Filament, JobStatus, PrintJob, Printer};

/// The complete replicated state: three entity maps keyed by id.
///
/// BTreeMap rather than HashMap so that serialized snapshots are byte-equal
/// across replicas. Unknown top-level fields in a persisted snapshot are
/// ignored on restore, which leaves room to extend this document later.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct WorkshopState {
    #[serde(default)]
    pub printers: BTreeMap<String, Printer>,
    #[serde(default)]
    pub filaments: BTreeMap<String, Filament>,
    #[serde(default)]
    pub print_jobs: BTreeMap<String, PrintJob>,
}

impl WorkshopState {
    /// Grams reserved on a spool: the sum over its Queued and Running jobs.
    /// A commutative float reduction, so map order does not matter.
    pub fn reserved_grams(&self, filament_id: &str) -> f64 {
        self.print_jobs
            .values()
            .filter(|job| {
                job.filament_id == filament_id
                    && matches!(job.status, JobStatus::Queued | JobStatus::Running)
            })
            .map(|job| job.grams_needed)
            .sum()
    }
}

/// The FSM: workshop state behind a single mutex.
///
/// The consensus library calls `apply` sequentially from one dispatcher task;
/// the lock exists so HTTP readers and the snapshot path see whole commands,
/// never a partially applied one.
#[derive(Debug, Default)]
pub struct WorkshopFsm {
    state: Mutex<WorkshopState>,
}

impl WorkshopFsm {
    pub fn new() -> Self {
        WorkshopFsm::default()
    }

    fn lock(&self) -> MutexGuard<'_, WorkshopState> {
        // Apply never panics while holding the lock, so poisoning is
        // unreachable in practice.
        self.state.lock().expect("workshop state mutex poisoned")
    }

    /// Apply one committed command. Always returns an outcome; malformed
    /// payloads and unknown ops become failure outcomes so replication is
    /// never stalled by a bad entry.
    pub fn apply(&self, cmd: &Command) -> CommandOutcome {
        let mut state = self.lock();
        match cmd.op.as_str() {
            OP_ADD_PRINTER => match serde_json::from_value::<Printer>(cmd.data.clone()) {
                Ok(printer) => {
                    state.printers.insert(printer.id.clone(), printer);
                    CommandOutcome::ok()
                }
                Err(e) => CommandOutcome::fail(format!("invalid printer payload: {e}")),
            },
            OP_ADD_FILAMENT => match serde_json::from_value::<Filament>(cmd.data.clone()) {
                Ok(filament) => {
                    state.filaments.insert(filament.id.clone(), filament);
                    CommandOutcome::ok()
                }
                Err(e) => CommandOutcome::fail(format!("invalid filament payload: {e}")),
            },
            OP_ADD_PRINT_JOB => match serde_json::from_value::<PrintJob>(cmd.data.clone()) {
                Ok(job) => add_print_job(&mut state, job),
                Err(e) => CommandOutcome::fail(format!("invalid print job payload: {e}")),
            },
            OP_UPDATE_JOB_STATUS => match serde_json::from_value::<StatusUpdate>(cmd.data.clone()) {
                Ok(update) => update_job_status(&mut state, update),
                Err(e) => CommandOutcome::fail(format!("invalid status update payload: {e}")),
            },
            other => CommandOutcome::fail(format!("unrecognized command op: {other}")),
        }
    }

    /// Point-in-time copy of the full state, cloned under the lock so an
    /// in-flight snapshot write cannot observe later mutations.
    pub fn snapshot(&self) -> WorkshopState {
        self.lock().clone()
    }

    /// Replace the entire state from a persisted snapshot.
    pub fn restore(&self, state: WorkshopState) {
        *self.lock() = state;
    }

    pub fn printers(&self) -> Vec<Printer> {
        self.lock().printers.values().cloned().collect()
    }

    pub fn filaments(&self) -> Vec<Filament> {
        self.lock().filaments.values().cloned().collect()
    }

    pub fn print_jobs(&self) -> Vec<PrintJob> {
        self.lock().print_jobs.values().cloned().collect()
    }
}

fn add_print_job(state: &mut WorkshopState, mut job: PrintJob) -> CommandOutcome {
    if !(job.grams_needed > 0.0) {
        return CommandOutcome::fail(format!(
            "print job requires a positive grams_needed, got {:.2}",
            job.grams_needed
        ));
    }
    if !state.printers.contains_key(&job.printer_id) {
        return CommandOutcome::fail(format!("printer with ID {} not found", job.printer_id));
    }
    let Some(filament) = state.filaments.get(&job.filament_id) else {
        return CommandOutcome::fail(format!("filament with ID {} not found", job.filament_id));
    };

    let total = filament.weight_grams;
    let reserved = state.reserved_grams(&job.filament_id);
    let available = total - reserved;
    if available < job.grams_needed {
        return CommandOutcome::fail(format!(
            "insufficient filament: required {:.2}g, available {:.2}g (total {:.2}g, reserved {:.2}g)",
            job.grams_needed, available, total, reserved
        ));
    }

    job.status = JobStatus::Queued;
    state.print_jobs.insert(job.id.clone(), job);
    CommandOutcome::ok()
}

fn update_job_status(state: &mut WorkshopState, update: StatusUpdate) -> CommandOutcome {
    let (current, filament_id, grams_needed) = match state.print_jobs.get(&update.job_id) {
        Some(job) => (job.status, job.filament_id.clone(), job.grams_needed),
        None => {
            return CommandOutcome::fail(format!("print job with ID {} not found", update.job_id))
        }
    };

    if !current.can_transition_to(update.new_status) {
        return CommandOutcome::fail(format!(
            "invalid status transition from '{current}' to '{}'",
            update.new_status
        ));
    }

    // Running -> Done charges the spool exactly once; no other transition
    // touches filament weight.
    if update.new_status == JobStatus::Done {
        match state.filaments.get_mut(&filament_id) {
            Some(filament) => filament.weight_grams -= grams_needed,
            None => {
                return CommandOutcome::fail(format!("filament with ID {filament_id} not found"))
            }
        }
    }

    if let Some(job) = state.print_jobs.get_mut(&update.job_id) {
        job.status = update.new_status;
    }
    CommandOutcome::ok()
}
