//! Child process management
//!
//! Spawning ([`ProcessLauncher`]), the process-group handle
//! ([`WrappedChild`]) and the per-session timers ([`TimeoutSupervisor`]).

mod launcher;
mod supervisor;
mod wrapped_child;

pub use launcher::{
    Backend, LaunchedChild, ProbeResult, ProcessLauncher, build_cli_args, shell_escape,
};
pub use supervisor::{TimeoutKind, TimeoutSupervisor};
pub use wrapped_child::{WrappedChild, signal_group};
