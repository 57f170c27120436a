//! Statement instrumentation.
//!
//! Rewrites a script so that it reports, at runtime, every statement it is
//! about to execute and every block it leaves, together with the local
//! variables visible at that point:
//!
//! ```text
//! let x = 1;                    ::tracepad::probe!(0, 10);
//! println!("{}", x);     =>     let x = 1;
//!                               ::tracepad::probe!(11, 18; x);
//!                               println!("{}", x);
//!                               ::tracepad::probe!(29, 0; x);
//! ```
//!
//! Spans in the probes always refer to the original text, so a host can
//! highlight the executing statement in the editor the user typed into.

mod calls;
mod compiler;
mod scope;
mod syntax;

pub use calls::{ProbeCall, ProbeMap, Removal};
pub use compiler::{
    Instrumented, Layout, PROBE_MACRO, ProbeInsertion, apply, instrument, plan,
};
pub use scope::ScopeTracker;
pub use syntax::{
    NodeId, NodeKind, SourceUnit, Span, StatementNode, SyntaxTree, binding_names,
};
