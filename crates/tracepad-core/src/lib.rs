//! Host engine for tracepad live-traced scripts.
//!
//! This crate provides:
//! - Statement instrumentation (probe insertion with scoped variables)
//! - Toolchain discovery, dependency restore and script compilation
//! - Child process supervision with cancellation
//! - The execution host that ties them together and reports events

pub mod build;
pub mod cancel;
pub mod config;
pub mod error;
pub mod host;
pub mod instrument;
pub mod paths;
pub mod process;

pub use build::{
    Diagnostic, ExternReference, ExternalDependency, Level, ReferenceSet, ToolchainInfo,
    discover_toolchains, parse_dependencies, select_toolchain,
};
pub use cancel::CancelToken;
pub use config::HostConfig;
pub use error::{Error, Result};
pub use host::{Completion, ExecutionHost, HostEvent, HostState};
pub use instrument::{Instrumented, ProbeInsertion, instrument};
pub use paths::BuildDirs;
pub use process::{ProcessExit, ProcessHandle, ProcessSpec};
