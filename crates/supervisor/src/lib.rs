//! Named worker process supervision.
//!
//! Each worker is a child process identified by a stable name (the first 16
//! hex characters of its branch hash). The supervisor starts, reloads,
//! stops, and inspects workers, appends their output to per-process log
//! files, and watches for exits so `describe` reflects reality.
//!
//! Every public operation runs behind a guard that bounds it in time and
//! converts a panic in the call path into an error, so no supervision
//! failure can take the calling process down.

pub mod error;
pub mod manager;
pub mod process;

pub use error::{Result, SupervisorError};
pub use manager::Supervisor;
pub use process::{ProcessInfo, ProcessSpec, ProcessStatus};
