//! Events and states reported by the execution host.

use tracepad::{DebugEvent, StreamKind};

use crate::build::{Diagnostic, ExternReference};

/// Lifecycle of an [`ExecutionHost`](super::ExecutionHost).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// No usable reference set yet.
    Idle,
    Restoring,
    /// A reference set is available; scripts can be executed.
    Ready,
    Executing,
    /// An operation is being torn down.
    Cancelling,
}

/// Everything the host reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A restore succeeded.
    RestoreCompleted {
        references: Vec<ExternReference>,
        analyzers: Vec<ExternReference>,
    },
    /// One line of restore failure output.
    RestoreMessage(String),
    /// Compile result: error diagnostics, or a single success notice.
    BuildMessage(Diagnostic),
    /// Console text written by the script.
    Console { stream: StreamKind, text: String },
    /// A probe fired in the script.
    Debug(DebugEvent),
    /// The script's runtime reported a problem of its own.
    Diagnostic(String),
    /// The script process ended.
    ProcessExited { code: Option<i32> },
}
