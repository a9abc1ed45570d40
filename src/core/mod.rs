//! Runtime core: orchestration and lifecycle.
//!
//! The public API of this module is [`Runtime`] and its [`RuntimeBuilder`].
//!
//! Internal modules:
//! - [`supervisor`]: consumes service commands, resolves target nodes, runs boot tasks;
//! - [`scheduler`]: releases delayed boot commands when due;
//! - [`detector`]: diffs the status registry each tick and reports transitions;
//! - [`router`]: maps observed transitions to follow-up commands and the fatal path;
//! - [`shutdown`]: cross-platform termination signal handling;
//! - [`runtime`]: wires the loops together and owns shutdown.

mod builder;
mod detector;
mod router;
mod runtime;
mod scheduler;
mod shutdown;
mod supervisor;

pub use builder::RuntimeBuilder;
pub use router::FatalHook;
pub use runtime::Runtime;
