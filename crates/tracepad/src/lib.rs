//! Tracepad runtime: the harness linked into every traced script.
//!
//! A script compiled by the tracepad host is wrapped in a generated `main`
//! that creates a [`Runtime`] before the script body runs. From then on:
//!
//! - [`probe!`] reports the statement about to execute and the values of the
//!   variables in scope;
//! - [`print!`], [`println!`], [`eprint!`] and [`eprintln!`] replace their
//!   `std` counterparts and report console text;
//!
//! and every report is written to stdout as one line of the console
//! [`protocol`]. The host decodes those lines to drive its display. Anything
//! else the process writes to stdout while the runtime is alive is reported
//! as console text too.
//!
//! ```rust,ignore
//! use tracepad::{print, println, eprint, eprintln};
//!
//! fn main() {
//!     let _runtime = tracepad::Runtime::init();
//!     ::tracepad::probe!(0, 10);
//!     let x = 1;
//!     ::tracepad::probe!(11, 17; x);
//!     println!("{}", x);
//! }
//! ```
//!
//! Scripts are normally never written against this crate by hand; the
//! instrumentation compiler in `tracepad-core` inserts the probes.

mod capture;
pub mod console;
pub mod parent;
pub mod protocol;
pub mod render;
mod runtime;

pub use console::ConsoleDumper;
pub use protocol::{
    ConsoleFrame, ConsoleMessage, DebugEvent, Payload, PayloadKind, ProtocolError, StreamKind,
    Var, decode, encode,
};
pub use runtime::Runtime;

#[doc(hidden)]
pub use runtime::{notify, write_console};

/// Report that execution reached `span_start..span_start + span_length`,
/// capturing the listed variables.
///
/// ```rust,ignore
/// ::tracepad::probe!(42, 9; total, i);
/// ```
#[macro_export]
macro_rules! probe {
    ($start:expr, $len:expr $(;)?) => {
        $crate::notify($start, $len, ::std::vec::Vec::new())
    };
    ($start:expr, $len:expr; $($var:ident),+ $(,)?) => {{
        #[allow(unused_imports)]
        use $crate::render::{ViaDebug as _, ViaTypeName as _};
        $crate::notify(
            $start,
            $len,
            ::std::vec![$(
                $crate::Var::new(
                    ::std::stringify!($var),
                    (&&$crate::render::Capture(&$var)).render(),
                )
            ),+],
        )
    }};
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::write_console($crate::StreamKind::Stdout, ::std::format!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::write_console($crate::StreamKind::Stdout, ::std::string::String::from("\n"))
    };
    ($($arg:tt)*) => {
        $crate::write_console(
            $crate::StreamKind::Stdout,
            ::std::format!("{}\n", ::std::format_args!($($arg)*)),
        )
    };
}

#[macro_export]
macro_rules! eprint {
    ($($arg:tt)*) => {
        $crate::write_console($crate::StreamKind::Stderr, ::std::format!($($arg)*))
    };
}

#[macro_export]
macro_rules! eprintln {
    () => {
        $crate::write_console($crate::StreamKind::Stderr, ::std::string::String::from("\n"))
    };
    ($($arg:tt)*) => {
        $crate::write_console(
            $crate::StreamKind::Stderr,
            ::std::format!("{}\n", ::std::format_args!($($arg)*)),
        )
    };
}
