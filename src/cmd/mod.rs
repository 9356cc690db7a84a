//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `run`    | `Run`, `Resume`  |
//! | `status` | `Status`, `Runs` |

pub mod run;
pub mod status;

pub use run::{cmd_resume, cmd_run};
pub use status::{cmd_runs, cmd_status};
