//! Core of the Sandpit JavaScript snippet sandbox.
//!
//! Given arbitrary, untrusted source text, the sandbox executes it, intercepts
//! everything it writes to the two output channels (synchronously and from
//! callbacks it schedules), tells success from failure, and hands back an
//! ordered transcript. The host's own output channels are always restored.
//!
//! # Architecture Overview
//!
//! - **Output channels**: the process-wide standard/error writer pair
//! - **Interceptor**: temporary redirection of both channels with a restore guarantee
//! - **Coordinator**: compile, invoke, flush window, restore, result
//! - **Script engine**: the compile-and-run capability, backed by `boa_engine`
//! - **Configuration system**: YAML file with environment overrides
//!
//! No security isolation is provided; the engine runs the snippet in-process
//! and nothing bounds a snippet that never returns.

pub mod channels;
pub mod config;
pub mod errors;
pub mod executors;
pub mod interceptor;
pub mod transcript;
pub mod value;

pub use channels::{Channel, ChannelWriter, OutputChannels};
pub use config::*;
pub use errors::{Fault, FaultKind, SandboxError};
pub use executors::{CodeExecutor, Coordinator, ExecutionResult, ExecutionSettings, FlushMode, FlushPolicy};
pub use interceptor::{install, RestoreHandle};
pub use transcript::{Line, Severity, Transcript};
pub use value::ScriptValue;
