//! Task descriptors as produced by the discovery/analysis step, plus the pure
//! argument validation that every invocation path runs before launching.

mod args;
mod descriptor;

pub use args::{validate_arguments, TaskArgs, ValidatedArgs};
pub use descriptor::{ArgSpec, ArgType, InvocationKind, TaskDescriptor, DEFAULT_ENTRY};
