//! Line-oriented writer for protocol frames.

use std::io::{self, Write};
use std::sync::Mutex;

use crate::protocol::{self, Payload};

#[cfg(windows)]
const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
const LINE_ENDING: &str = "\n";

/// Writes one encoded frame per line to an underlying writer.
///
/// Writes and flushes share one lock, so frames coming from several threads
/// never interleave within a line.
pub struct ConsoleDumper<W: Write> {
    out: Mutex<W>,
}

impl<W: Write> ConsoleDumper<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Encode and write a payload.
    ///
    /// If the payload cannot be encoded, a `Diagnostic` frame describing the
    /// failure is written in its place.
    pub fn dump(&self, payload: &Payload) -> io::Result<()> {
        let line = match protocol::encode(payload) {
            Ok(line) => line,
            Err(err) => {
                let fallback = Payload::Diagnostic(format!("Error during dump: {err}"));
                protocol::encode(&fallback).map_err(io::Error::other)?
            }
        };

        let mut out = self.lock();
        out.write_all(line.as_bytes())?;
        out.write_all(LINE_ENDING.as_bytes())
    }

    pub fn flush(&self) -> io::Result<()> {
        self.lock().flush()
    }

    /// Consume the dumper and return the underlying writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, W> {
        // A panicking writer leaves no partial state we care about.
        self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
