//! Compiler diagnostics.
//!
//! Both the dependency restore (`cargo --message-format=json`) and the script
//! compile (`rustc --error-format=json`) report problems as rustc JSON
//! diagnostics. Locations are mapped back from the generated harness to the
//! script text it wraps.

use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::instrument::{ProbeMap, Removal};

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
    Note,
    Help,
    /// Not from the compiler: progress reported by the host itself.
    Info,
}

impl Level {
    fn parse(level: &str) -> Option<Self> {
        match level {
            "error" | "error: internal compiler error" => Some(Level::Error),
            "warning" => Some(Level::Warning),
            "note" | "failure-note" => Some(Level::Note),
            "help" => Some(Level::Help),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Note => "note",
            Level::Help => "help",
            Level::Info => "info",
        }
    }
}

/// A diagnostic ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    /// Error code (e.g., "E0308")
    pub code: Option<String>,
    /// 1-based line in the script, when the primary span falls inside it.
    pub line: Option<usize>,
    /// 1-based column.
    pub column: Option<usize>,
    /// Full rendering produced by the compiler.
    pub rendered: Option<String>,
}

impl Diagnostic {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            message: message.into(),
            code: None,
            line: None,
            column: None,
            rendered: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == Level::Error
    }

    /// One-line summary: `error[E0425] (3:5): cannot find value`.
    pub fn summary(&self) -> String {
        let mut out = self.level.as_str().to_string();
        if let Some(code) = &self.code {
            out.push_str(&format!("[{code}]"));
        }
        if let (Some(line), Some(column)) = (self.line, self.column) {
            out.push_str(&format!(" ({line}:{column})"));
        }
        out.push_str(": ");
        out.push_str(&self.message);
        out
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Error codes meaning a name was moved or never initialized where it is read.
const MOVE_CODES: &[&str] = &["E0381", "E0382", "E0505"];

/// Rustc JSON diagnostic format.
#[derive(Debug, Deserialize)]
pub struct RustcDiagnostic {
    pub message: String,
    pub code: Option<RustcCode>,
    pub level: String,
    #[serde(default)]
    pub spans: Vec<RustcSpan>,
    #[serde(default)]
    pub children: Vec<RustcDiagnostic>,
    pub rendered: Option<String>,
}

impl RustcDiagnostic {
    /// Parse a line of compiler JSON output. Non-diagnostic lines yield None.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        match serde_json::from_str(line) {
            Ok(diagnostic) => Some(diagnostic),
            Err(e) => {
                tracing::debug!(
                    "Failed to parse rustc JSON: {} (line: {})",
                    e,
                    line.chars().take(100).collect::<String>()
                );
                None
            }
        }
    }

    pub fn is_error(&self) -> bool {
        Level::parse(&self.level) == Some(Level::Error)
    }

    fn code(&self) -> Option<&str> {
        self.code.as_ref().map(|c| c.code.as_str())
    }

    /// First name quoted in backticks, without deref or borrow sigils.
    fn quoted_name(&self) -> Option<&str> {
        let (_, rest) = self.message.split_once('`')?;
        let (quoted, _) = rest.split_once('`')?;
        let quoted = quoted.trim_start_matches(['*', '&']).trim_start_matches("mut ");
        let end = quoted
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(quoted.len());
        (end > 0).then(|| &quoted[..end])
    }
}

#[derive(Debug, Deserialize)]
pub struct RustcCode {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct RustcSpan {
    pub file_name: String,
    #[serde(default)]
    pub byte_start: Option<usize>,
    #[serde(default)]
    pub byte_end: Option<usize>,
    pub line_start: usize,
    pub column_start: usize,
    pub is_primary: bool,
    #[serde(default)]
    pub expansion: Option<Box<RustcExpansion>>,
}

#[derive(Debug, Deserialize)]
pub struct RustcExpansion {
    pub span: RustcSpan,
}

/// Converts rustc diagnostics for a harness into script locations.
///
/// The compiled script may carry probe calls. Locations are reported against
/// the script with those calls taken out, and a location inside a call is
/// reported at the statement the call precedes.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticMapper {
    /// Lines of generated code in front of the script.
    line_offset: usize,
    /// Bytes of generated code in front of the script.
    byte_offset: usize,
    /// Script as compiled.
    compiled: String,
    /// Script without probe calls.
    original: String,
    probes: ProbeMap,
    /// Harness file; spans in other files are followed through their expansions.
    file: Option<PathBuf>,
}

impl DiagnosticMapper {
    pub fn new(script: &str, line_offset: usize, byte_offset: usize) -> Self {
        let probes = ProbeMap::scan(script);
        Self {
            line_offset,
            byte_offset,
            original: probes.strip(script),
            compiled: script.to_string(),
            probes,
            file: None,
        }
    }

    pub fn for_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn probes(&self) -> &ProbeMap {
        &self.probes
    }

    /// Parse and map a line of compiler JSON output.
    pub fn parse_line(&self, line: &str) -> Option<Diagnostic> {
        self.map(&RustcDiagnostic::parse(line)?)
    }

    /// Map a rustc diagnostic. Unknown levels yield None.
    pub fn map(&self, diagnostic: &RustcDiagnostic) -> Option<Diagnostic> {
        let level = Level::parse(&diagnostic.level)?;

        let (line, column) = diagnostic
            .spans
            .iter()
            .find(|s| s.is_primary)
            .and_then(|span| self.local_span(span))
            .and_then(|span| self.locate(span))
            .unzip();

        Some(Diagnostic {
            level,
            message: diagnostic.message.clone(),
            code: diagnostic.code().map(str::to_string),
            line,
            column,
            rendered: diagnostic.rendered.clone(),
        })
    }

    /// Captures and calls to take out so that `errors` no longer arise from
    /// probe calls.
    ///
    /// A capture moved or left uninitialized is also dropped from the calls
    /// right after that keep capturing it. Errors outside probe calls yield
    /// nothing.
    pub fn removals(&self, errors: &[RustcDiagnostic]) -> Vec<Removal> {
        let mut removals = Vec::new();
        for error in errors.iter().filter(|e| e.is_error()) {
            for span in error.spans.iter().filter(|s| s.is_primary) {
                let Some(range) = self.local_span(span).and_then(|s| self.script_range(s)) else {
                    continue;
                };
                let Some(index) = self.probes.call_at(range.start) else {
                    continue;
                };
                let call = &self.probes.calls()[index];
                let name = call
                    .capture_within(range)
                    .or_else(|| error.quoted_name().filter(|n| call.captures(n)));
                match name {
                    Some(name) => {
                        removals.push(Removal::Capture {
                            call: index,
                            name: name.to_string(),
                        });
                        if error.code().is_some_and(|c| MOVE_CODES.contains(&c)) {
                            removals.extend(self.probes.run_after(index, name).map(|call| {
                                Removal::Capture {
                                    call,
                                    name: name.to_string(),
                                }
                            }));
                        }
                    }
                    None => removals.push(Removal::Call(index)),
                }
            }
        }
        removals.sort();
        removals.dedup();
        removals
    }

    /// The span itself when it lies in the harness, else the nearest macro
    /// call site that does.
    fn local_span<'s>(&self, span: &'s RustcSpan) -> Option<&'s RustcSpan> {
        let mut current = span;
        loop {
            if self.in_harness(&current.file_name) {
                return Some(current);
            }
            current = &current.expansion.as_ref()?.span;
        }
    }

    fn in_harness(&self, file_name: &str) -> bool {
        match &self.file {
            None => true,
            Some(file) => {
                let name = Path::new(file_name);
                file == name || file.ends_with(name)
            }
        }
    }

    /// Byte range of the span in the compiled script.
    fn script_range(&self, span: &RustcSpan) -> Option<Range<usize>> {
        let start = span.byte_start?.checked_sub(self.byte_offset)?;
        let end = span
            .byte_end
            .and_then(|end| end.checked_sub(self.byte_offset))
            .unwrap_or(start)
            .max(start);
        (start < self.compiled.len()).then_some(start..end)
    }

    /// Line and column in the script without probe calls.
    fn locate(&self, span: &RustcSpan) -> Option<(usize, usize)> {
        if let Some(range) = self.script_range(span) {
            return Some(line_column(&self.original, self.probes.original_offset(range.start)));
        }
        if span.byte_start.is_some() {
            return None;
        }

        // Line numbers only: the first column survives.
        let line = span.line_start.checked_sub(self.line_offset)?;
        if line == 0 {
            return None;
        }
        let start = if line == 1 {
            0
        } else {
            self.compiled.match_indices('\n').nth(line - 2)?.0 + 1
        };
        if start >= self.compiled.len() {
            return None;
        }
        let (line, _) = line_column(&self.original, self.probes.original_offset(start));
        Some((line, span.column_start))
    }
}

/// 1-based line and character column of `offset` in `text`.
fn line_column(text: &str, offset: usize) -> (usize, usize) {
    let before = text.get(..offset).unwrap_or(text);
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    (
        before.matches('\n').count() + 1,
        before[line_start..].chars().count() + 1,
    )
}
