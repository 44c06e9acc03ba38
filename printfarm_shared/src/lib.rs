// printfarm_shared: domain model, command codec, and configuration shared by
// the host binary and its tests.

pub mod api_models;
pub mod command;
pub mod config;
pub mod models;

pub use command::{Command, CommandOutcome};
pub use config::NodeConfig;
pub use models::{Filament, JobStatus, PrintJob, Printer};
