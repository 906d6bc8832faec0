//! Child-process plumbing shared by the execution engine and the supervisor:
//! command construction, process-group/job grouping, graceful and forced
//! termination, and stdout/stderr pumps.

mod child;
mod group;
pub mod io_pump;
mod launcher;
mod types;

pub use child::{ProcessSpec, TaskProcess};
pub use io_pump::{LineStream, LineTap, LineTapSink};
pub use launcher::Launcher;
pub use types::{ExitInfo, Signal};
